use crate::artifacts::objects::blob::Blob;
use crate::artifacts::objects::commit::Commit;
use crate::artifacts::objects::object_id::ObjectId;
use crate::artifacts::objects::object_type::ObjectType;
use crate::artifacts::objects::tag::Tag;
use crate::artifacts::objects::tree::Tree;
use anyhow::Result;
use bytes::Bytes;
use std::io::BufRead;

/// Serialization of an object's content (without the `<type> <size>\0` frame)
pub trait Packable {
    fn serialize(&self) -> Result<Bytes>;
}

/// Deserialization of an object's content; the frame header has already been consumed
pub trait Unpackable {
    fn deserialize(reader: impl BufRead) -> Result<Self>
    where
        Self: Sized;
}

pub trait Object: Packable {
    fn object_type(&self) -> ObjectType;

    fn display(&self) -> String;

    fn object_id(&self) -> Result<ObjectId> {
        Ok(hash_object(self.object_type(), &self.serialize()?))
    }
}

/// Prefix content with the `<type> <size>\0` header that the digest covers
pub fn frame(object_type: ObjectType, content: &[u8]) -> Vec<u8> {
    let mut framed = format!("{} {}\0", object_type, content.len()).into_bytes();
    framed.extend_from_slice(content);
    framed
}

pub fn hash_object(object_type: ObjectType, content: &[u8]) -> ObjectId {
    ObjectId::digest(&frame(object_type, content))
}

pub enum ObjectBox {
    Blob(Box<Blob>),
    Tree(Box<Tree>),
    Commit(Box<Commit>),
    Tag(Box<Tag>),
}

impl ObjectBox {
    pub fn parse(object_type: ObjectType, content: &[u8]) -> Result<Self> {
        Ok(match object_type {
            ObjectType::Blob => ObjectBox::Blob(Box::new(Blob::deserialize(content)?)),
            ObjectType::Tree => ObjectBox::Tree(Box::new(Tree::deserialize(content)?)),
            ObjectType::Commit => ObjectBox::Commit(Box::new(Commit::deserialize(content)?)),
            ObjectType::Tag => ObjectBox::Tag(Box::new(Tag::deserialize(content)?)),
        })
    }

    pub fn object_type(&self) -> ObjectType {
        match self {
            ObjectBox::Blob(_) => ObjectType::Blob,
            ObjectBox::Tree(_) => ObjectType::Tree,
            ObjectBox::Commit(_) => ObjectType::Commit,
            ObjectBox::Tag(_) => ObjectType::Tag,
        }
    }

    pub fn display(&self) -> String {
        match self {
            ObjectBox::Blob(blob) => blob.display(),
            ObjectBox::Tree(tree) => tree.display(),
            ObjectBox::Commit(commit) => commit.display(),
            ObjectBox::Tag(tag) => tag.display(),
        }
    }
}
