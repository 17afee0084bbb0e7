//! Pushing to receive-pack
//!
//! Turns requested updates into update commands against the advertised
//! values, refuses non-fast-forwards locally unless forced, sends the
//! objects the remote is missing and collects the per-reference report.

use crate::artifacts::history::History;
use crate::artifacts::history::rev_list::RevList;
use crate::artifacts::objects::object_id::ObjectId;
use crate::artifacts::transfer::advertisement::Advertisement;
use crate::artifacts::transfer::capabilities::{AGENT, Capabilities, REPORT_STATUS, agent};
use crate::artifacts::transfer::pkt_line::{PktReader, PktWriter};
use crate::artifacts::transfer::receive_pack::RefCommand;
use crate::artifacts::transfer::{RefStatus, RefUpdate};
use crate::errors::RepositoryError;
use std::collections::BTreeMap;
use tokio::io::{AsyncRead, AsyncWrite};

/// A reference the user asked to push
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushRequest {
    /// Local reference pushed from, empty for a deletion
    pub source: String,
    /// `None` deletes the remote reference
    pub new: Option<ObjectId>,
    pub destination: String,
    pub force: bool,
}

pub struct SendPack<'h, 'r> {
    history: &'h History<'r>,
}

impl<'h, 'r> SendPack<'h, 'r> {
    pub fn new(history: &'h History<'r>) -> Self {
        Self { history }
    }

    pub async fn push<R, W>(
        &self,
        reader: &mut PktReader<R>,
        writer: &mut PktWriter<W>,
        advertisement: &Advertisement,
        requests: Vec<PushRequest>,
    ) -> anyhow::Result<Vec<RefUpdate>>
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send,
    {
        let mut updates = Vec::with_capacity(requests.len());
        let mut commands = Vec::new();

        for request in requests {
            let old = advertisement.get(&request.destination).cloned();
            let mut update = RefUpdate {
                source: request.source.clone(),
                destination: request.destination.clone(),
                old: old.clone(),
                new: request.new.clone(),
                forced: false,
                status: RefStatus::Ok,
            };

            match self.local_verdict(&request, old.as_ref())? {
                Some(status) => update.status = status,
                None => {
                    update.forced = match (&old, &request.new) {
                        (Some(old), Some(new)) => !self.is_fast_forward(old, new)?,
                        _ => false,
                    };
                    commands.push(RefCommand {
                        old: old.unwrap_or_else(ObjectId::zero),
                        new: request.new.clone().unwrap_or_else(ObjectId::zero),
                        name: request.destination.clone(),
                    });
                }
            }
            updates.push(update);
        }

        if commands.is_empty() {
            writer.flush().await?;
            return Ok(updates);
        }

        let capabilities = Capabilities::default()
            .with(REPORT_STATUS, None)
            .with(AGENT, Some(agent()))
            .common_with(&advertisement.capabilities);
        for (position, command) in commands.iter().enumerate() {
            if position == 0 {
                writer.write_line(&format!("{command}\0{capabilities}")).await?;
            } else {
                writer.write_line(&command.to_string()).await?;
            }
        }
        writer.flush().await?;

        self.send_objects(writer, advertisement, &commands).await?;

        let report = self.read_report(reader).await?;
        for update in updates.iter_mut().filter(|update| update.status == RefStatus::Ok) {
            update.status = match report.get(&update.destination) {
                Some(status) => status.clone(),
                None => RefStatus::Rejected("no report from remote".to_string()),
            };
        }

        Ok(updates)
    }

    /// Decide locally when there is nothing to send or the update must be refused
    fn local_verdict(&self, request: &PushRequest, old: Option<&ObjectId>) -> anyhow::Result<Option<RefStatus>> {
        match (old, &request.new) {
            (None, None) => Ok(Some(RefStatus::Rejected("remote ref does not exist".to_string()))),
            (Some(old), Some(new)) if old == new => Ok(Some(RefStatus::UpToDate)),
            (Some(old), Some(new)) if !request.force => {
                if !self.history.database().contains(old) {
                    return Ok(Some(RefStatus::Rejected("fetch first".to_string())));
                }
                if !self.is_fast_forward(old, new)? {
                    return Ok(Some(RefStatus::Rejected("non-fast-forward".to_string())));
                }
                Ok(None)
            }
            _ => Ok(None),
        }
    }

    fn is_fast_forward(&self, old: &ObjectId, new: &ObjectId) -> anyhow::Result<bool> {
        let database = self.history.database();
        if !database.contains(old) {
            return Ok(false);
        }
        // tags and other non-commits only move when forced
        match (database.peel_to_commit(old), database.peel_to_commit(new)) {
            (Ok(old_commit), Ok(new_commit)) if old == &old_commit && new == &new_commit => {
                self.history.is_fast_forward(old, new)
            }
            _ => Ok(false),
        }
    }

    async fn send_objects<W>(
        &self,
        writer: &mut PktWriter<W>,
        advertisement: &Advertisement,
        commands: &[RefCommand],
    ) -> anyhow::Result<()>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let database = self.history.database();
        let tips = commands
            .iter()
            .filter(|command| !command.is_delete())
            .map(|command| command.new.clone())
            .collect::<Vec<_>>();
        let remote_has = advertisement
            .refs
            .iter()
            .map(|(_, oid)| oid.clone())
            .filter(|oid| database.contains(oid))
            .collect::<Vec<_>>();

        let (objects, _) = RevList::new(self.history, tips).excluding(remote_has).objects()?;
        let packfile = database.compact(&objects)?;

        tracing::debug!(objects = objects.len(), bytes = packfile.len(), "sending pack");
        writer.write_data(packfile.data()).await
    }

    async fn read_report<R>(&self, reader: &mut PktReader<R>) -> anyhow::Result<BTreeMap<String, RefStatus>>
    where
        R: AsyncRead + Unpin + Send,
    {
        let lines = reader.read_section().await?;
        let mut lines = lines.into_iter();

        let unpack = lines
            .next()
            .ok_or_else(|| RepositoryError::transport("remote sent an empty report"))?;
        if unpack != "unpack ok" {
            tracing::warn!(status = %unpack, "remote failed to unpack");
        }

        let mut report = BTreeMap::new();
        for line in lines {
            if let Some(name) = line.strip_prefix("ok ") {
                report.insert(name.to_string(), RefStatus::Ok);
            } else if let Some(rest) = line.strip_prefix("ng ") {
                let (name, reason) = rest.split_once(' ').unwrap_or((rest, "rejected"));
                report.insert(name.to_string(), RefStatus::Rejected(reason.to_string()));
            } else {
                return Err(RepositoryError::transport(format!("unexpected report line {line:?}")).into());
            }
        }

        Ok(report)
    }
}
