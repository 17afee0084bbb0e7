//! Pack index (`.idx`) format
//!
//! ```text
//! "KIDX" | version (u32 BE) | count (u32 BE)
//! count * (raw digest (20 bytes) | offset (u64 BE)), sorted by digest
//! pack checksum (20 bytes)
//! SHA-1 of everything before it (20 bytes)
//! ```

use crate::artifacts::objects::object_id::ObjectId;
use crate::artifacts::objects::RAW_OBJECT_ID_LENGTH;
use crate::artifacts::pack::packfile::UnpackedEntry;
use crate::artifacts::pack::{PACK_INDEX_SIGNATURE, PACK_INDEX_VERSION};
use crate::errors::RepositoryError;
use byteorder::{ByteOrder, NetworkEndian, WriteBytesExt};
use bytes::Bytes;
use std::io::Write;

const RECORD_SIZE: usize = RAW_OBJECT_ID_LENGTH + 8;
const HEADER_SIZE: usize = 12;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackIndex {
    records: Vec<(ObjectId, u64)>,
    pack_checksum: ObjectId,
}

impl PackIndex {
    pub fn build(entries: &[UnpackedEntry], pack_checksum: ObjectId) -> Self {
        let mut records = entries
            .iter()
            .map(|entry| (entry.object.oid.clone(), entry.offset))
            .collect::<Vec<_>>();
        records.sort();
        records.dedup_by(|a, b| a.0 == b.0);

        Self {
            records,
            pack_checksum,
        }
    }

    pub fn lookup(&self, oid: &ObjectId) -> Option<u64> {
        self.records
            .binary_search_by(|(candidate, _)| candidate.cmp(oid))
            .ok()
            .map(|position| self.records[position].1)
    }

    pub fn contains(&self, oid: &ObjectId) -> bool {
        self.lookup(oid).is_some()
    }

    pub fn oids(&self) -> impl Iterator<Item = &ObjectId> {
        self.records.iter().map(|(oid, _)| oid)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn pack_checksum(&self) -> &ObjectId {
        &self.pack_checksum
    }

    pub fn serialize(&self) -> anyhow::Result<Bytes> {
        let mut bytes = Vec::with_capacity(HEADER_SIZE + self.records.len() * RECORD_SIZE + 40);
        bytes.write_all(PACK_INDEX_SIGNATURE)?;
        bytes.write_u32::<NetworkEndian>(PACK_INDEX_VERSION)?;
        bytes.write_u32::<NetworkEndian>(self.records.len() as u32)?;

        for (oid, offset) in &self.records {
            oid.write_h40_to(&mut bytes)?;
            bytes.write_u64::<NetworkEndian>(*offset)?;
        }

        self.pack_checksum.write_h40_to(&mut bytes)?;
        let checksum = ObjectId::digest(&bytes);
        checksum.write_h40_to(&mut bytes)?;

        Ok(Bytes::from(bytes))
    }

    pub fn deserialize(bytes: &[u8]) -> anyhow::Result<Self> {
        let invalid = |reason: &str| RepositoryError::InvalidObject(format!("pack index: {reason}"));

        if bytes.len() < HEADER_SIZE + 2 * RAW_OBJECT_ID_LENGTH {
            return Err(invalid("truncated").into());
        }
        if &bytes[0..4] != PACK_INDEX_SIGNATURE {
            return Err(invalid("bad signature").into());
        }
        if NetworkEndian::read_u32(&bytes[4..8]) != PACK_INDEX_VERSION {
            return Err(invalid("unsupported version").into());
        }

        let body_end = bytes.len() - RAW_OBJECT_ID_LENGTH;
        if ObjectId::digest(&bytes[..body_end]) != ObjectId::from_raw(&bytes[body_end..]) {
            return Err(invalid("checksum mismatch").into());
        }

        let count = NetworkEndian::read_u32(&bytes[8..12]) as usize;
        let records_end = HEADER_SIZE + count * RECORD_SIZE;
        if records_end + RAW_OBJECT_ID_LENGTH != body_end {
            return Err(invalid("record count does not match size").into());
        }

        let records = bytes[HEADER_SIZE..records_end]
            .chunks_exact(RECORD_SIZE)
            .map(|record| {
                (
                    ObjectId::from_raw(&record[..RAW_OBJECT_ID_LENGTH]),
                    NetworkEndian::read_u64(&record[RAW_OBJECT_ID_LENGTH..]),
                )
            })
            .collect();

        Ok(Self {
            records,
            pack_checksum: ObjectId::from_raw(&bytes[records_end..body_end]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::objects::object_type::ObjectType;
    use crate::artifacts::pack::packfile::PackedObject;
    use pretty_assertions::assert_eq;

    #[test]
    fn index_reads_back_and_finds_offsets() {
        let entries = (0..5u64)
            .map(|i| UnpackedEntry {
                offset: 12 + i * 30,
                object: PackedObject::new(ObjectType::Blob, Bytes::from(format!("blob {i}"))),
            })
            .collect::<Vec<_>>();

        let index = PackIndex::build(&entries, ObjectId::digest(b"pack"));
        let parsed = PackIndex::deserialize(&index.serialize().unwrap()).unwrap();

        assert_eq!(parsed, index);
        for entry in &entries {
            assert_eq!(parsed.lookup(&entry.object.oid), Some(entry.offset));
        }
        assert_eq!(parsed.lookup(&ObjectId::digest(b"absent")), None);
    }
}
