//! Reference advertisement
//!
//! The first thing a server sends: every reference it is willing to share,
//! `HEAD` first, then branches and tags by name. Annotated tags are followed
//! by a `<name>^{}` line with the commit they peel to. Capabilities ride on
//! the first line after a NUL byte.
//!
//! ```text
//! <oid> HEAD\0shallow agent=knot/0.1.0 symref=HEAD:refs/heads/main
//! <oid> refs/heads/main
//! <oid> refs/tags/v1
//! <oid> refs/tags/v1^{}
//! 0000
//! ```
//!
//! A repository without references advertises a single placeholder line so
//! the capabilities still reach the client:
//! `0000000000000000000000000000000000000000 capabilities^{}\0...`

use crate::areas::repository::Repository;
use crate::artifacts::branch::{HEADS_PREFIX, TAGS_PREFIX};
use crate::artifacts::objects::object_id::ObjectId;
use crate::artifacts::objects::object_type::ObjectType;
use crate::artifacts::transfer::capabilities::Capabilities;
use crate::artifacts::transfer::pkt_line::{PktReader, PktWriter};
use crate::errors::RepositoryError;
use std::collections::BTreeMap;
use tokio::io::{AsyncRead, AsyncWrite};

const PLACEHOLDER_NAME: &str = "capabilities^{}";
const PEELED_SUFFIX: &str = "^{}";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    UploadPack,
    ReceivePack,
}

impl Service {
    pub fn as_str(&self) -> &'static str {
        match self {
            Service::UploadPack => "knot-upload-pack",
            Service::ReceivePack => "knot-receive-pack",
        }
    }

    pub fn parse(name: &str) -> anyhow::Result<Self> {
        match name {
            "knot-upload-pack" => Ok(Service::UploadPack),
            "knot-receive-pack" => Ok(Service::ReceivePack),
            other => anyhow::bail!("unknown service '{other}'"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Advertisement {
    /// Advertised references in wire order
    pub refs: Vec<(String, ObjectId)>,
    /// Commits that annotated tags peel to, keyed by tag reference
    pub peeled: BTreeMap<String, ObjectId>,
    pub capabilities: Capabilities,
}

impl Advertisement {
    pub fn from_repository(repository: &Repository, service: Service) -> anyhow::Result<Self> {
        let refs_store = repository.refs();
        let database = repository.database();
        let mut advertisement = Advertisement::default();

        if let Some(head) = refs_store.read_head()? {
            advertisement.refs.push(("HEAD".to_string(), head));
        }

        for prefix in [HEADS_PREFIX, TAGS_PREFIX] {
            for (name, oid) in refs_store.list(prefix)? {
                if name.is_tag() && database.get_object_type(&oid)? == ObjectType::Tag {
                    let peeled = database.peel_to_commit(&oid)?;
                    advertisement.peeled.insert(name.to_string(), peeled);
                }
                advertisement.refs.push((name.to_string(), oid));
            }
        }

        advertisement.capabilities = match service {
            Service::UploadPack => {
                let head = refs_store.current_branch()?;
                Capabilities::upload_pack(head.as_ref().map(|head| head.as_ref()))
            }
            Service::ReceivePack => Capabilities::receive_pack(),
        };

        tracing::debug!(
            service = service.as_str(),
            refs = advertisement.refs.len(),
            "advertising references"
        );
        Ok(advertisement)
    }

    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&ObjectId> {
        self.refs
            .iter()
            .find(|(advertised, _)| advertised == name)
            .map(|(_, oid)| oid)
    }

    /// Branch the server's `HEAD` points at, when it said so
    pub fn head_target(&self) -> Option<&str> {
        self.capabilities.head_target()
    }

    /// Everything but `HEAD`, for refspec mapping
    pub fn named_refs(&self) -> impl Iterator<Item = (&str, &ObjectId)> {
        self.refs
            .iter()
            .filter(|(name, _)| name != "HEAD")
            .map(|(name, oid)| (name.as_str(), oid))
    }

    pub async fn write<W>(&self, writer: &mut PktWriter<W>) -> anyhow::Result<()>
    where
        W: AsyncWrite + Unpin + Send,
    {
        if self.refs.is_empty() {
            writer
                .write_line(&format!("{} {PLACEHOLDER_NAME}\0{}", ObjectId::zero(), self.capabilities))
                .await?;
            return writer.flush().await;
        }

        for (position, (name, oid)) in self.refs.iter().enumerate() {
            if position == 0 {
                writer
                    .write_line(&format!("{oid} {name}\0{}", self.capabilities))
                    .await?;
            } else {
                writer.write_line(&format!("{oid} {name}")).await?;
            }

            if let Some(peeled) = self.peeled.get(name) {
                writer
                    .write_line(&format!("{peeled} {name}{PEELED_SUFFIX}"))
                    .await?;
            }
        }

        writer.flush().await
    }

    pub async fn read<R>(reader: &mut PktReader<R>) -> anyhow::Result<Self>
    where
        R: AsyncRead + Unpin + Send,
    {
        let mut advertisement = Advertisement::default();

        for (position, line) in reader.read_section().await?.into_iter().enumerate() {
            let line = if position == 0 {
                let (line, capabilities) = line.split_once('\0').unwrap_or((line.as_str(), ""));
                advertisement.capabilities = Capabilities::parse(capabilities);
                line.to_string()
            } else {
                line
            };

            let (oid, name) = line
                .split_once(' ')
                .ok_or_else(|| RepositoryError::transport(format!("malformed advertisement line {line:?}")))?;
            let oid = ObjectId::try_parse(oid.to_string())?;

            if name == PLACEHOLDER_NAME {
                continue;
            }
            match name.strip_suffix(PEELED_SUFFIX) {
                Some(tag) => {
                    advertisement.peeled.insert(tag.to_string(), oid);
                }
                None => advertisement.refs.push((name.to_string(), oid)),
            }
        }

        Ok(advertisement)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::transfer::capabilities::SHALLOW;
    use pretty_assertions::assert_eq;

    fn oid(fill: char) -> ObjectId {
        ObjectId::try_parse(fill.to_string().repeat(40)).unwrap()
    }

    async fn round_trip(advertisement: &Advertisement) -> Advertisement {
        let (client, server) = tokio::io::duplex(4096);
        let mut writer = PktWriter::new(client);
        advertisement.write(&mut writer).await.unwrap();
        Advertisement::read(&mut PktReader::new(server)).await.unwrap()
    }

    #[tokio::test]
    async fn refs_capabilities_and_peeled_tags_survive_the_wire() {
        let advertisement = Advertisement {
            refs: vec![
                ("HEAD".to_string(), oid('a')),
                ("refs/heads/main".to_string(), oid('a')),
                ("refs/tags/v1".to_string(), oid('b')),
            ],
            peeled: BTreeMap::from([("refs/tags/v1".to_string(), oid('a'))]),
            capabilities: Capabilities::upload_pack(Some("refs/heads/main")),
        };

        let received = round_trip(&advertisement).await;

        assert_eq!(received, advertisement);
        assert_eq!(received.head_target(), Some("refs/heads/main"));
        assert_eq!(received.named_refs().count(), 2);
    }

    #[tokio::test]
    async fn empty_repository_still_sends_capabilities() {
        let advertisement = Advertisement {
            capabilities: Capabilities::upload_pack(Some("refs/heads/main")),
            ..Default::default()
        };

        let received = round_trip(&advertisement).await;

        assert!(received.is_empty());
        assert!(received.capabilities.has(SHALLOW));
        assert_eq!(received.head_target(), Some("refs/heads/main"));
    }

    #[test]
    fn services_parse_by_wire_name() {
        assert_eq!(Service::parse("knot-upload-pack").unwrap(), Service::UploadPack);
        assert_eq!(Service::parse(Service::ReceivePack.as_str()).unwrap(), Service::ReceivePack);
        assert!(Service::parse("git-upload-archive").is_err());
    }
}
