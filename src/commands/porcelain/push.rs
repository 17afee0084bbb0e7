use crate::areas::repository::Repository;
use crate::artifacts::branch::branch_name::RefName;
use crate::artifacts::branch::{HEADS_PREFIX, TAGS_PREFIX};
use crate::artifacts::transfer::advertisement::{Advertisement, Service};
use crate::artifacts::transfer::refspec::Refspec;
use crate::artifacts::transfer::send_pack::{PushRequest, SendPack};
use crate::artifacts::transfer::transport::transport_for;
use crate::artifacts::transfer::{RefStatus, RefUpdate, ensure_accepted, with_retries};
use std::io::Write;

impl Repository {
    /// Push to a configured remote (or a URL)
    ///
    /// Each argument is a push refspec: `main`, `+main`, `main:other`,
    /// `:gone` or a tag name. With none, the current branch is pushed to
    /// the branch of the same name. `force` applies to every argument.
    pub async fn push(&self, remote: &str, arguments: &[String], force: bool) -> anyhow::Result<Vec<RefUpdate>> {
        let url = match self.config().remotes.get(remote) {
            Some(remote) => remote.url.clone(),
            None => remote.to_string(),
        };

        let requests = self.push_requests(arguments, force)?;
        let retries = self.config().transfer.retries;
        let updates = with_retries(retries, async || self.push_once(&url, requests.clone()).await).await?;

        {
            let mut writer = self.writer();
            writeln!(writer, "To {url}")?;
            for update in &updates {
                writeln!(writer, "{update}")?;
            }
        }

        if self.config().remotes.contains_key(remote) {
            self.update_tracking_refs(remote, &updates)?;
        }

        ensure_accepted(&updates)?;
        Ok(updates)
    }

    fn push_requests(&self, arguments: &[String], force: bool) -> anyhow::Result<Vec<PushRequest>> {
        let arguments = if arguments.is_empty() {
            let branch = self
                .refs()
                .current_branch()?
                .ok_or_else(|| anyhow::anyhow!("you are not currently on a branch; name what to push"))?;
            vec![branch.to_string()]
        } else {
            arguments.to_vec()
        };

        let mut requests = Vec::with_capacity(arguments.len());
        for argument in arguments {
            let refspec = Refspec::parse_push(&self.qualify_push_argument(&argument)?)?;
            if refspec.is_glob() {
                anyhow::bail!("wildcard refspecs are not supported for push: '{argument}'");
            }

            let new = if refspec.is_deletion() {
                None
            } else {
                let source = RefName::try_parse(refspec.source.as_str())?;
                let oid = self
                    .refs()
                    .read_oid(&source)?
                    .ok_or_else(|| anyhow::anyhow!("src refspec '{}' does not match any", refspec.source))?;
                Some(oid)
            };

            requests.push(PushRequest {
                source: refspec.source.clone(),
                new,
                destination: refspec.destination.clone(),
                force: force || refspec.force,
            });
        }

        Ok(requests)
    }

    /// Turn a bare tag name into `refs/tags/<name>`; branches win over tags
    fn qualify_push_argument(&self, argument: &str) -> anyhow::Result<String> {
        let (prefix, name) = match argument.strip_prefix('+') {
            Some(rest) => ("+", rest),
            None => ("", argument),
        };
        if name.is_empty() || name.contains(':') || name.starts_with("refs/") || name == "HEAD" {
            return Ok(argument.to_string());
        }

        let branch = RefName::try_parse(format!("{HEADS_PREFIX}{name}"))?;
        let tag = RefName::try_parse(format!("{TAGS_PREFIX}{name}"))?;
        if !self.refs().exists(&branch)? && self.refs().exists(&tag)? {
            return Ok(format!("{prefix}{tag}"));
        }
        Ok(argument.to_string())
    }

    async fn push_once(&self, url: &str, requests: Vec<PushRequest>) -> anyhow::Result<Vec<RefUpdate>> {
        let transport = transport_for(url)?;
        let mut connection = transport.connect(Service::ReceivePack).await?;
        let advertisement = Advertisement::read(&mut connection.reader).await?;

        let history = self.history()?;
        let updates = SendPack::new(&history)
            .push(&mut connection.reader, &mut connection.writer, &advertisement, requests)
            .await?;

        tracing::info!(
            url,
            accepted = updates.iter().filter(|update| update.status == RefStatus::Ok).count(),
            rejected = updates.iter().filter(|update| update.is_rejected()).count(),
            "push finished"
        );
        Ok(updates)
    }

    /// Mirror accepted branch updates into `refs/remotes/<remote>/`
    fn update_tracking_refs(&self, remote: &str, updates: &[RefUpdate]) -> anyhow::Result<()> {
        let attempts = self.config().transfer.ref_update_retries;
        for update in updates.iter().filter(|update| update.status == RefStatus::Ok) {
            let Some(branch) = update.destination.strip_prefix(HEADS_PREFIX) else {
                continue;
            };
            let tracking = RefName::remote_tracking(remote, branch)?;
            let new = update.new.clone();

            self.refs().update_with_retry(&tracking, attempts, |_| Ok(new.clone()))?;
        }
        Ok(())
    }
}
