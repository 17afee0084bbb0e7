use crate::areas::repository::Repository;
use crate::artifacts::objects::object::hash_object;
use crate::artifacts::objects::object_id::ObjectId;
use crate::artifacts::objects::object_type::ObjectType;
use anyhow::Context;
use std::io::Write;
use std::path::Path;

impl Repository {
    /// Digest a file as a blob, storing it when `write` is set
    pub async fn hash_object(&self, path: &Path, write: bool) -> anyhow::Result<ObjectId> {
        let content = std::fs::read(path).with_context(|| format!("could not open '{}' for reading", path.display()))?;

        let oid = if write {
            self.database().put(ObjectType::Blob, content.into())?
        } else {
            hash_object(ObjectType::Blob, &content)
        };

        writeln!(self.writer(), "{oid}")?;
        Ok(oid)
    }
}
