//! Annotated tag object
//!
//! ```text
//! object <sha>
//! type commit
//! tag v1.0
//! tagger <name> <email> <timestamp> <timezone>
//!
//! <message>
//! ```
//!
//! Lightweight tags are plain refs under `refs/tags/` and have no object.

use crate::artifacts::objects::commit::Author;
use crate::artifacts::objects::object::{Object, Packable, Unpackable};
use crate::artifacts::objects::object_id::ObjectId;
use crate::artifacts::objects::object_type::ObjectType;
use crate::errors::RepositoryError;
use anyhow::Context;
use bytes::Bytes;
use derive_new::new;
use std::io::BufRead;

#[derive(Debug, Clone, PartialEq, Eq, new)]
pub struct Tag {
    target: ObjectId,
    target_type: ObjectType,
    name: String,
    tagger: Author,
    message: String,
}

impl Tag {
    pub fn target(&self) -> &ObjectId {
        &self.target
    }

    pub fn target_type(&self) -> ObjectType {
        self.target_type
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Packable for Tag {
    fn serialize(&self) -> anyhow::Result<Bytes> {
        Ok(Bytes::from(self.display()))
    }
}

impl Unpackable for Tag {
    fn deserialize(mut reader: impl BufRead) -> anyhow::Result<Self> {
        let mut content = String::new();
        reader.read_to_string(&mut content)?;

        let (headers, message) = content
            .split_once("\n\n")
            .context("Invalid tag object: missing message separator")?;

        let mut target = None;
        let mut target_type = None;
        let mut name = None;
        let mut tagger = None;

        for line in headers.lines() {
            let (key, value) = line
                .split_once(' ')
                .context("Invalid tag object: malformed header")?;
            match key {
                "object" => target = Some(ObjectId::try_parse(value.to_string())?),
                "type" => target_type = Some(ObjectType::try_from(value)?),
                "tag" => name = Some(value.to_string()),
                "tagger" => tagger = Some(Author::try_from(value)?),
                _ => {}
            }
        }

        let missing = |field: &str| RepositoryError::InvalidObject(format!("tag missing {field}"));

        Ok(Tag {
            target: target.ok_or_else(|| missing("object"))?,
            target_type: target_type.ok_or_else(|| missing("type"))?,
            name: name.ok_or_else(|| missing("tag"))?,
            tagger: tagger.ok_or_else(|| missing("tagger"))?,
            message: message.to_string(),
        })
    }
}

impl Object for Tag {
    fn object_type(&self) -> ObjectType {
        ObjectType::Tag
    }

    fn display(&self) -> String {
        format!(
            "object {}\ntype {}\ntag {}\ntagger {}\n\n{}",
            self.target,
            self.target_type,
            self.name,
            self.tagger.display(),
            self.message
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn tag_reads_back() {
        let tagger = Author::try_from("Tagger <t@example.com> 1700000000 +0000").unwrap();
        let tag = Tag::new(
            ObjectId::digest(b"commit"),
            ObjectType::Commit,
            "v1.0".to_string(),
            tagger,
            "release\n".to_string(),
        );

        let bytes = tag.serialize().unwrap();
        assert_eq!(Tag::deserialize(&bytes[..]).unwrap(), tag);
    }
}
