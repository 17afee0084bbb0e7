//! Serving fetches
//!
//! After the advertisement the client states what it wants, then offers
//! haves in rounds until it sends `done`:
//!
//! ```text
//! C: want <oid> <capabilities>        S: shallow <oid>     (deepen only)
//! C: want <oid>                       S: 0000
//! C: shallow <oid>
//! C: deepen <n>                       S: ACK <oid> common  (per known have)
//! C: 0000                             S: NAK               (none known)
//! C: have <oid> ... 0000              S: 0000
//! C: done 0000                        S: ACK <oid> | NAK, 0000, pack, 0000
//! ```
//!
//! A client that only wanted the advertisement sends a bare flush.

use crate::areas::repository::Repository;
use crate::artifacts::history::History;
use crate::artifacts::history::rev_list::RevList;
use crate::artifacts::objects::object_id::ObjectId;
use crate::artifacts::objects::object_type::ObjectType;
use crate::artifacts::transfer::advertisement::{Advertisement, Service};
use crate::artifacts::transfer::capabilities::Capabilities;
use crate::artifacts::transfer::pkt_line::{PktReader, PktWriter};
use crate::errors::RepositoryError;
use std::collections::BTreeSet;
use tokio::io::{AsyncRead, AsyncWrite};

/// What the client asked for before negotiation starts
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadRequest {
    pub wants: Vec<ObjectId>,
    pub capabilities: Capabilities,
    /// Commits the client already holds as its shallow boundary
    pub shallow: BTreeSet<ObjectId>,
    pub depth: Option<usize>,
}

impl UploadRequest {
    pub fn parse(lines: &[String]) -> anyhow::Result<Self> {
        let mut request = UploadRequest::default();

        for line in lines {
            let (command, argument) = line.split_once(' ').unwrap_or((line.as_str(), ""));
            match command {
                "want" => {
                    let (oid, capabilities) = argument.split_once(' ').unwrap_or((argument, ""));
                    if request.wants.is_empty() {
                        request.capabilities = Capabilities::parse(capabilities);
                    }
                    request.wants.push(ObjectId::try_parse(oid.to_string())?);
                }
                "shallow" => {
                    request.shallow.insert(ObjectId::try_parse(argument.to_string())?);
                }
                "deepen" => {
                    let depth = argument
                        .parse::<usize>()
                        .map_err(|_| RepositoryError::transport(format!("invalid depth {argument:?}")))?;
                    request.depth = Some(depth).filter(|depth| *depth > 0);
                }
                _ => {
                    return Err(RepositoryError::transport(format!("unexpected line {line:?} in fetch request")).into());
                }
            }
        }

        Ok(request)
    }

    pub fn to_lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        for (position, want) in self.wants.iter().enumerate() {
            if position == 0 {
                lines.push(format!("want {want} {}", self.capabilities));
            } else {
                lines.push(format!("want {want}"));
            }
        }
        lines.extend(self.shallow.iter().map(|oid| format!("shallow {oid}")));
        if let Some(depth) = self.depth {
            lines.push(format!("deepen {depth}"));
        }
        lines
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UploadState {
    Negotiating { rounds: usize },
    Done,
}

/// Statistics of one served fetch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadSummary {
    pub wants: usize,
    pub common: usize,
    pub objects: usize,
}

pub struct UploadPack<'r> {
    repository: &'r Repository,
    max_rounds: usize,
}

impl<'r> UploadPack<'r> {
    pub fn new(repository: &'r Repository) -> Self {
        // the server tolerates more rounds than its own clients would use
        let max_rounds = repository.config().transfer.max_negotiation_rounds.saturating_mul(4);
        Self {
            repository,
            max_rounds,
        }
    }

    pub async fn serve<R, W>(&self, reader: &mut PktReader<R>, writer: &mut PktWriter<W>) -> anyhow::Result<UploadSummary>
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send,
    {
        Advertisement::from_repository(self.repository, Service::UploadPack)?
            .write(writer)
            .await?;

        let request = UploadRequest::parse(&reader.read_section().await?)?;
        if request.wants.is_empty() {
            tracing::debug!("client only listed references");
            return Ok(UploadSummary::default());
        }

        let database = self.repository.database();
        for want in &request.wants {
            if !database.contains(want) {
                writer.write_line(&format!("ERR upload-pack: not our ref {want}")).await?;
                writer.flush().await?;
                return Err(RepositoryError::ObjectNotFound(want.clone()).into());
            }
        }

        let history = History::new(database, self.repository.refs().read_shallow()?);
        if request.depth.is_some() {
            self.send_shallow_boundary(&history, &request, writer).await?;
        }

        let common = self.negotiate(reader, writer).await?;

        let (objects, _) = RevList::new(&history, request.wants.iter().cloned())
            .excluding(common.iter().cloned())
            .with_depth(request.depth)
            .objects()?;
        let packfile = database.compact(&objects)?;
        writer.write_data(packfile.data()).await?;

        tracing::info!(
            wants = request.wants.len(),
            common = common.len(),
            objects = objects.len(),
            bytes = packfile.len(),
            "served pack"
        );
        Ok(UploadSummary {
            wants: request.wants.len(),
            common: common.len(),
            objects: objects.len(),
        })
    }

    async fn send_shallow_boundary<W>(
        &self,
        history: &History<'_>,
        request: &UploadRequest,
        writer: &mut PktWriter<W>,
    ) -> anyhow::Result<()>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let walk = RevList::new(history, request.wants.iter().cloned())
            .with_depth(request.depth)
            .walk()?;

        for oid in &walk.boundary {
            writer.write_line(&format!("shallow {oid}")).await?;
        }
        for oid in &request.shallow {
            if walk.commits.contains(oid) && !walk.boundary.contains(oid) {
                writer.write_line(&format!("unshallow {oid}")).await?;
            }
        }
        writer.flush().await
    }

    /// Acknowledge haves round by round until the client is done
    async fn negotiate<R, W>(&self, reader: &mut PktReader<R>, writer: &mut PktWriter<W>) -> anyhow::Result<Vec<ObjectId>>
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send,
    {
        let database = self.repository.database();
        let mut common = Vec::new();
        let mut state = UploadState::Negotiating { rounds: 0 };

        while let UploadState::Negotiating { rounds } = state {
            if rounds > self.max_rounds {
                writer.write_line("ERR upload-pack: too many negotiation rounds").await?;
                writer.flush().await?;
                return Err(RepositoryError::transport("client exceeded the negotiation round limit").into());
            }

            let mut acknowledged = false;
            let mut done = false;
            for line in reader.read_section().await? {
                if line == "done" {
                    done = true;
                    break;
                }
                let oid = line
                    .strip_prefix("have ")
                    .ok_or_else(|| RepositoryError::transport(format!("unexpected line {line:?} in negotiation")))?;
                let oid = ObjectId::try_parse(oid.to_string())?;

                if database.contains(&oid) && database.get_object_type(&oid)? == ObjectType::Commit {
                    writer.write_line(&format!("ACK {oid} common")).await?;
                    common.push(oid);
                    acknowledged = true;
                }
            }

            if done {
                state = UploadState::Done;
                continue;
            }
            if !acknowledged {
                writer.write_line("NAK").await?;
            }
            writer.flush().await?;
            tracing::debug!(round = rounds + 1, common = common.len(), "negotiation round served");
            state = UploadState::Negotiating { rounds: rounds + 1 };
        }

        match common.last() {
            Some(last) => writer.write_line(&format!("ACK {last}")).await?,
            None => writer.write_line("NAK").await?,
        }
        writer.flush().await?;

        Ok(common)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn oid(fill: char) -> ObjectId {
        ObjectId::try_parse(fill.to_string().repeat(40)).unwrap()
    }

    #[test]
    fn request_lines_round_trip() {
        let request = UploadRequest {
            wants: vec![oid('a'), oid('b')],
            capabilities: Capabilities::default().with("shallow", None),
            shallow: BTreeSet::from([oid('c')]),
            depth: Some(3),
        };

        let lines = request.to_lines();

        assert_eq!(lines[0], format!("want {} shallow", oid('a')));
        assert_eq!(lines.last().unwrap(), "deepen 3");
        assert_eq!(UploadRequest::parse(&lines).unwrap(), request);
    }

    #[test]
    fn zero_depth_means_full_history() {
        let request = UploadRequest::parse(&[format!("want {}", oid('a')), "deepen 0".to_string()]).unwrap();
        assert_eq!(request.depth, None);
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(UploadRequest::parse(&["gimme everything".to_string()]).is_err());
        assert!(UploadRequest::parse(&["deepen many".to_string()]).is_err());
    }
}
