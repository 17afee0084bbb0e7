use crate::areas::repository::Repository;
use crate::artifacts::branch::revision::Revision;
use crate::artifacts::objects::object::ObjectBox;
use crate::artifacts::objects::object_id::ObjectId;
use crate::errors::RepositoryError;
use std::io::Write;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatFileMode {
    Type,
    Size,
    Pretty,
    /// Only report, through the result, whether the object exists
    Exists,
}

impl Repository {
    pub async fn cat_file(&self, object: &str, mode: CatFileMode) -> anyhow::Result<bool> {
        let oid = match self.resolve_object_name(object) {
            Ok(oid) => oid,
            Err(_) if mode == CatFileMode::Exists => return Ok(false),
            Err(error) => return Err(error),
        };
        if mode == CatFileMode::Exists {
            return Ok(self.database().contains(&oid));
        }

        let (object_type, content) = self.database().get(&oid)?;
        let mut writer = self.writer();
        match mode {
            CatFileMode::Type => writeln!(writer, "{object_type}")?,
            CatFileMode::Size => writeln!(writer, "{}", content.len())?,
            CatFileMode::Pretty => match ObjectBox::parse(object_type, &content)? {
                ObjectBox::Blob(_) => writer.write_all(&content)?,
                other => writeln!(writer, "{}", other.display())?,
            },
            CatFileMode::Exists => {}
        }

        Ok(true)
    }

    /// An object named by a full or abbreviated ID, a reference (not
    /// peeled), or a revision expression
    pub fn resolve_object_name(&self, name: &str) -> anyhow::Result<ObjectId> {
        if name.len() >= 4 && name.chars().all(|c| c.is_ascii_hexdigit()) {
            match self.database().find_objects_by_prefix(name)?.as_slice() {
                [oid] => return Ok(oid.clone()),
                [] => {}
                _ => anyhow::bail!("short object ID {name} is ambiguous"),
            }
        }

        for candidate in Revision::expand_ref_name(name) {
            if let Some(oid) = self.refs().read_oid(&candidate)? {
                return Ok(oid);
            }
        }

        Revision::try_parse(name)
            .and_then(|revision| revision.resolve(self))
            .map_err(|_| RepositoryError::UnknownReference(name.to_string()).into())
    }
}
