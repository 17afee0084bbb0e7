//! Serving pushes
//!
//! ```text
//! S: advertisement
//! C: <old> <new> <ref>\0<capabilities>
//! C: <old> <new> <ref>
//! C: 0000
//! C: pack data, 0000
//! S: unpack ok | unpack <error>
//! S: ok <ref> | ng <ref> <reason>
//! S: 0000
//! ```
//!
//! The whole pack is verified and every new tip checked for connectivity
//! before any reference moves. Each reference is then updated on its own
//! with a compare-and-swap against the old value the client saw, so one
//! rejected update never blocks the others.

use crate::areas::repository::Repository;
use crate::artifacts::branch::branch_name::RefName;
use crate::artifacts::history::History;
use crate::artifacts::history::rev_list::RevList;
use crate::artifacts::objects::object_id::ObjectId;
use crate::artifacts::pack::packfile::Packfile;
use crate::artifacts::transfer::advertisement::{Advertisement, Service};
use crate::artifacts::transfer::capabilities::Capabilities;
use crate::artifacts::transfer::pkt_line::{PktReader, PktWriter};
use crate::errors::{RepositoryError, classify};
use std::collections::HashSet;
use std::fmt;
use tokio::io::{AsyncRead, AsyncWrite};

/// One requested reference update; the zero ID stands for "absent"
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefCommand {
    pub old: ObjectId,
    pub new: ObjectId,
    pub name: String,
}

impl RefCommand {
    pub fn is_create(&self) -> bool {
        self.old.is_zero()
    }

    pub fn is_delete(&self) -> bool {
        self.new.is_zero()
    }

    pub fn parse(line: &str) -> anyhow::Result<(Self, Option<Capabilities>)> {
        let (line, capabilities) = match line.split_once('\0') {
            Some((line, capabilities)) => (line, Some(Capabilities::parse(capabilities))),
            None => (line, None),
        };

        let mut parts = line.splitn(3, ' ');
        let (Some(old), Some(new), Some(name)) = (parts.next(), parts.next(), parts.next()) else {
            return Err(RepositoryError::transport(format!("malformed update command {line:?}")).into());
        };

        let command = Self {
            old: ObjectId::try_parse(old.to_string())?,
            new: ObjectId::try_parse(new.to_string())?,
            name: name.to_string(),
        };
        Ok((command, capabilities))
    }
}

impl fmt::Display for RefCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.old, self.new, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandStatus {
    Ok,
    Rejected(String),
}

pub struct ReceivePack<'r> {
    repository: &'r Repository,
}

impl<'r> ReceivePack<'r> {
    pub fn new(repository: &'r Repository) -> Self {
        Self { repository }
    }

    pub async fn serve<R, W>(
        &self,
        reader: &mut PktReader<R>,
        writer: &mut PktWriter<W>,
    ) -> anyhow::Result<Vec<(RefCommand, CommandStatus)>>
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send,
    {
        Advertisement::from_repository(self.repository, Service::ReceivePack)?
            .write(writer)
            .await?;

        let mut commands = Vec::new();
        for line in reader.read_section().await? {
            let (command, _) = RefCommand::parse(&line)?;
            commands.push(command);
        }
        if commands.is_empty() {
            return Ok(Vec::new());
        }

        let data = reader.read_data().await?;
        let unpacked = self.unpack(Packfile::from_bytes(data));

        let results = match &unpacked {
            Ok(()) => self.apply(commands)?,
            Err(_) => commands
                .into_iter()
                .map(|command| (command, CommandStatus::Rejected("unpacker error".to_string())))
                .collect(),
        };

        match &unpacked {
            Ok(()) => writer.write_line("unpack ok").await?,
            Err(reason) => writer.write_line(&format!("unpack {reason}")).await?,
        }
        for (command, status) in &results {
            match status {
                CommandStatus::Ok => writer.write_line(&format!("ok {}", command.name)).await?,
                CommandStatus::Rejected(reason) => {
                    writer.write_line(&format!("ng {} {reason}", command.name)).await?
                }
            }
        }
        writer.flush().await?;

        Ok(results)
    }

    /// Verify and store the pack; the error is reported, not raised
    fn unpack(&self, packfile: Packfile) -> Result<(), String> {
        if packfile.data().is_empty() {
            return Ok(());
        }

        let limit = self.repository.config().transfer.unpack_limit;
        match self.repository.database().unpack(&packfile, limit) {
            Ok(oids) => {
                tracing::debug!(objects = oids.len(), "received pack stored");
                Ok(())
            }
            Err(error) => {
                tracing::warn!(%error, "rejecting pushed pack");
                Err(error.to_string())
            }
        }
    }

    fn apply(&self, commands: Vec<RefCommand>) -> anyhow::Result<Vec<(RefCommand, CommandStatus)>> {
        let refs = self.repository.refs();
        let history = History::new(self.repository.database(), refs.read_shallow()?);

        let mut known = refs
            .list("refs/")?
            .into_iter()
            .map(|(_, oid)| oid)
            .collect::<HashSet<_>>();
        known.extend(refs.read_head()?);

        let mut results = Vec::with_capacity(commands.len());
        for command in commands {
            let status = match self.check(&history, &known, &command)? {
                Some(reason) => CommandStatus::Rejected(reason),
                None => self.update(&command)?,
            };

            match &status {
                CommandStatus::Ok => {
                    tracing::info!(reference = %command.name, old = %command.old, new = %command.new, "accepted push")
                }
                CommandStatus::Rejected(reason) => {
                    tracing::info!(reference = %command.name, reason = %reason, "rejected push")
                }
            }
            results.push((command, status));
        }

        Ok(results)
    }

    /// Reason to refuse `command`, if any
    fn check(&self, history: &History<'_>, known: &HashSet<ObjectId>, command: &RefCommand) -> anyhow::Result<Option<String>> {
        let Ok(name) = RefName::try_parse(command.name.as_str()) else {
            return Ok(Some("invalid reference name".to_string()));
        };
        if !command.name.starts_with("refs/") {
            return Ok(Some("only references under refs/ can be pushed".to_string()));
        }

        let config = self.repository.config().receive.clone();
        let refs = self.repository.refs();
        let is_current =
            !self.repository.is_bare() && refs.current_branch()?.as_ref() == Some(&name);

        if command.is_delete() {
            if config.deny_deletes {
                return Ok(Some("deletion prohibited".to_string()));
            }
            if is_current && config.deny_current_branch {
                return Ok(Some("deletion of the current branch prohibited".to_string()));
            }
            return Ok(None);
        }

        if is_current && config.deny_current_branch {
            return Ok(Some("branch is currently checked out".to_string()));
        }

        if let Err(error) = RevList::new(history, [command.new.clone()]).check_connectivity(known) {
            tracing::warn!(reference = %command.name, %error, "pushed tip is not connected");
            return Ok(Some("missing necessary objects".to_string()));
        }

        let current = refs.read_oid(&name)?;
        if current.as_ref() != Some(&command.old).filter(|old| !old.is_zero()) {
            return Ok(Some("fetch first".to_string()));
        }

        if let Some(current) = current
            && config.deny_non_fast_forwards
            && !history.is_fast_forward(&current, &command.new)?
        {
            return Ok(Some("non-fast-forward".to_string()));
        }

        Ok(None)
    }

    fn update(&self, command: &RefCommand) -> anyhow::Result<CommandStatus> {
        let name = RefName::try_parse(command.name.as_str())?;
        let old = Some(&command.old).filter(|old| !old.is_zero());
        let new = Some(&command.new).filter(|new| !new.is_zero());

        match self.repository.refs().update(&name, old, new) {
            Ok(()) => Ok(CommandStatus::Ok),
            Err(error) => match classify(&error) {
                Some(RepositoryError::ReferenceConflict { .. }) => {
                    Ok(CommandStatus::Rejected("fetch first".to_string()))
                }
                _ => Err(error),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn command_parses_with_capabilities() {
        let zero = ObjectId::zero();
        let new = ObjectId::try_parse("a".repeat(40)).unwrap();
        let line = format!("{zero} {new} refs/heads/main\0report-status agent=knot/1");

        let (command, capabilities) = RefCommand::parse(&line).unwrap();

        assert!(command.is_create());
        assert!(!command.is_delete());
        assert_eq!(command.to_string(), format!("{zero} {new} refs/heads/main"));
        assert!(capabilities.unwrap().has("report-status"));
    }

    #[test]
    fn truncated_command_is_rejected() {
        assert!(RefCommand::parse("abc refs/heads/main").is_err());
    }
}
