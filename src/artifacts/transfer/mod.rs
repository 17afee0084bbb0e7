//! Moving objects and references between repositories
//!
//! A session starts with a request line naming the service and repository,
//! after which the server advertises its references and the two sides run
//! one of two exchanges over pkt-line framing:
//!
//! - `upload_pack` / `fetch_pack`: the client fetches, negotiating common
//!   history with have/ACK rounds before the server sends a pack
//! - `receive_pack` / `send_pack`: the client pushes a pack followed by
//!   compare-and-swap reference updates, answered with a status per ref
//!
//! Objects are always stored and verified before any reference is moved, so
//! an interrupted transfer leaves at worst unreferenced objects behind.

use crate::artifacts::objects::object_id::ObjectId;
use crate::errors::{RepositoryError, is_retryable};
use std::fmt;

pub mod advertisement;
pub mod capabilities;
pub mod fetch_pack;
pub mod negotiator;
pub mod pkt_line;
pub mod receive_pack;
pub mod refspec;
pub mod send_pack;
pub mod server;
pub mod transport;
pub mod upload_pack;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefStatus {
    UpToDate,
    Ok,
    Rejected(String),
}

/// Outcome of one reference in a fetch or push
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefUpdate {
    pub source: String,
    pub destination: String,
    pub old: Option<ObjectId>,
    pub new: Option<ObjectId>,
    pub forced: bool,
    pub status: RefStatus,
}

impl RefUpdate {
    pub fn is_rejected(&self) -> bool {
        matches!(self.status, RefStatus::Rejected(_))
    }

    fn short_name(name: &str) -> &str {
        ["refs/heads/", "refs/tags/", "refs/remotes/"]
            .iter()
            .find_map(|prefix| name.strip_prefix(prefix))
            .unwrap_or(name)
    }

    fn kind(&self) -> &'static str {
        if self.destination.starts_with("refs/tags/") {
            "[new tag]"
        } else {
            "[new branch]"
        }
    }
}

impl fmt::Display for RefUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let source = Self::short_name(&self.source);
        let destination = Self::short_name(&self.destination);
        let names = if source.is_empty() || source == destination {
            destination.to_string()
        } else {
            format!("{source} -> {destination}")
        };

        match (&self.status, &self.old, &self.new) {
            (RefStatus::Rejected(reason), _, _) => write!(f, " ! [rejected]        {names} ({reason})"),
            (RefStatus::UpToDate, _, _) => write!(f, " = [up to date]      {names}"),
            (RefStatus::Ok, _, None) => write!(f, " - [deleted]         {names}"),
            (RefStatus::Ok, None, Some(_)) => write!(f, " * {:<17} {names}", self.kind()),
            (RefStatus::Ok, Some(old), Some(new)) if self.forced => write!(
                f,
                " + {}...{} {names} (forced update)",
                old.to_short_oid(),
                new.to_short_oid()
            ),
            (RefStatus::Ok, Some(old), Some(new)) => {
                write!(f, "   {}..{}  {names}", old.to_short_oid(), new.to_short_oid())
            }
        }
    }
}

/// Turn the first rejected update into an error
pub fn ensure_accepted(updates: &[RefUpdate]) -> anyhow::Result<()> {
    match updates.iter().find_map(|update| match &update.status {
        RefStatus::Rejected(reason) => Some((update, reason)),
        _ => None,
    }) {
        Some((update, reason)) => Err(RepositoryError::TransferRejected {
            reference: update.destination.clone(),
            reason: reason.clone(),
        }
        .into()),
        None => Ok(()),
    }
}

/// Run `operation`, starting over after transport failures up to `retries` more times
pub async fn with_retries<T, F>(retries: usize, mut operation: F) -> anyhow::Result<T>
where
    F: AsyncFnMut() -> anyhow::Result<T>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Err(error) if attempt < retries && is_retryable(&error) => {
                attempt += 1;
                tracing::warn!(%error, attempt, retries, "transfer failed, retrying");
            }
            result => return result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn oid(fill: char) -> ObjectId {
        ObjectId::try_parse(fill.to_string().repeat(40)).unwrap()
    }

    fn update(old: Option<ObjectId>, new: Option<ObjectId>, status: RefStatus) -> RefUpdate {
        RefUpdate {
            source: "refs/heads/main".to_string(),
            destination: "refs/heads/main".to_string(),
            old,
            new,
            forced: false,
            status,
        }
    }

    #[test]
    fn updates_render_like_a_transfer_summary() {
        assert_eq!(
            update(None, Some(oid('a')), RefStatus::Ok).to_string(),
            " * [new branch]      main"
        );
        assert_eq!(
            update(Some(oid('a')), Some(oid('b')), RefStatus::Ok).to_string(),
            "   aaaaaaa..bbbbbbb  main"
        );
        assert_eq!(
            update(Some(oid('a')), None, RefStatus::Ok).to_string(),
            " - [deleted]         main"
        );
        assert_eq!(
            update(Some(oid('a')), Some(oid('b')), RefStatus::Rejected("non-fast-forward".into())).to_string(),
            " ! [rejected]        main (non-fast-forward)"
        );
    }

    #[test]
    fn first_rejection_becomes_an_error() {
        let updates = vec![
            update(None, Some(oid('a')), RefStatus::Ok),
            update(Some(oid('a')), Some(oid('b')), RefStatus::Rejected("fetch first".into())),
        ];

        let error = ensure_accepted(&updates).unwrap_err();

        assert!(matches!(
            error.downcast_ref::<RepositoryError>(),
            Some(RepositoryError::TransferRejected { reason, .. }) if reason == "fetch first"
        ));
        assert!(ensure_accepted(&updates[..1]).is_ok());
    }

    #[tokio::test]
    async fn transport_failures_are_retried() {
        let calls = AtomicUsize::new(0);

        let result = with_retries(2, async || {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(RepositoryError::transport("connection reset").into())
            } else {
                Ok("done")
            }
        })
        .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn other_failures_are_not_retried() {
        let calls = AtomicUsize::new(0);

        let result: anyhow::Result<()> = with_retries(5, async || {
            calls.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("repository does not exist")
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
