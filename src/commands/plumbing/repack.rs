use crate::areas::repository::Repository;
use crate::artifacts::objects::object_id::ObjectId;
use std::io::Write;

impl Repository {
    /// Move every loose object into one new pack
    pub async fn repack(&self) -> anyhow::Result<Option<ObjectId>> {
        let loose = self.database().loose_objects()?.len();
        let pack = self.database().repack()?;

        match &pack {
            Some(checksum) => writeln!(self.writer(), "Packed {loose} objects into pack-{checksum}")?,
            None => writeln!(self.writer(), "Nothing new to pack.")?,
        }
        Ok(pack)
    }
}
