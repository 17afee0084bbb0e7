use crate::artifacts::index::{HEADER_SIZE, SIGNATURE, VERSION};
use crate::artifacts::objects::object::{Packable, Unpackable};
use anyhow::Context;
use byteorder::{NetworkEndian, ReadBytesExt, WriteBytesExt};
use bytes::Bytes;
use std::io::BufRead;

/// Fixed-size prefix of the index file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexHeader {
    pub(crate) entries_count: u32,
}

impl IndexHeader {
    pub(crate) fn for_entries(entries_count: usize) -> anyhow::Result<Self> {
        let entries_count = u32::try_from(entries_count).context("too many index entries")?;
        Ok(IndexHeader { entries_count })
    }
}

impl Packable for IndexHeader {
    fn serialize(&self) -> anyhow::Result<Bytes> {
        let mut bytes = Vec::with_capacity(HEADER_SIZE);
        bytes.extend_from_slice(SIGNATURE.as_bytes());
        bytes.write_u32::<NetworkEndian>(VERSION)?;
        bytes.write_u32::<NetworkEndian>(self.entries_count)?;

        Ok(Bytes::from(bytes))
    }
}

impl Unpackable for IndexHeader {
    /// Reads and checks signature and version
    fn deserialize(mut reader: impl BufRead) -> anyhow::Result<Self> {
        let mut signature = [0u8; 4];
        reader
            .read_exact(&mut signature)
            .context("index header is truncated")?;
        if signature != SIGNATURE.as_bytes() {
            anyhow::bail!("index file has bad signature {:?}", String::from_utf8_lossy(&signature));
        }

        let version = reader
            .read_u32::<NetworkEndian>()
            .context("index header is truncated")?;
        if version != VERSION {
            anyhow::bail!("unsupported index version {version}");
        }

        let entries_count = reader
            .read_u32::<NetworkEndian>()
            .context("index header is truncated")?;
        Ok(IndexHeader { entries_count })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Cursor;

    #[test]
    fn header_layout_is_signature_version_count() {
        let bytes = IndexHeader::for_entries(3).unwrap().serialize().unwrap();

        assert_eq!(bytes.as_ref(), b"DIRC\0\0\0\x02\0\0\0\x03");
        assert_eq!(
            IndexHeader::deserialize(Cursor::new(bytes)).unwrap(),
            IndexHeader { entries_count: 3 }
        );
    }

    #[test]
    fn foreign_files_are_refused() {
        let error = IndexHeader::deserialize(Cursor::new(b"PACK\0\0\0\x02\0\0\0\x01".to_vec())).unwrap_err();
        assert!(error.to_string().contains("bad signature"));

        let error = IndexHeader::deserialize(Cursor::new(b"DIRC\0\0\0\x03\0\0\0\x01".to_vec())).unwrap_err();
        assert!(error.to_string().contains("unsupported index version 3"));

        assert!(IndexHeader::deserialize(Cursor::new(b"DIRC\0\0".to_vec())).is_err());
    }
}
