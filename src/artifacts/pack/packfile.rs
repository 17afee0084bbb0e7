//! Packfile encoding and decoding
//!
//! ```text
//! "PACK" | version (u32 BE) | object count (u32 BE)
//! entry*: type/size header, then
//!         zlib(content)                       for commit/tree/blob/tag
//!         base digest (20 bytes) zlib(delta)  for ref-delta
//! trailer: SHA-1 of everything before it
//! ```
//!
//! The size in an entry header is the inflated size of what follows (the
//! content, or the delta for ref-delta entries).

use crate::artifacts::objects::object::hash_object;
use crate::artifacts::objects::object_id::ObjectId;
use crate::artifacts::objects::object_type::ObjectType;
use crate::artifacts::objects::RAW_OBJECT_ID_LENGTH;
use crate::artifacts::pack::delta::{apply_delta, create_delta};
use crate::artifacts::pack::{MAX_PREALLOC, PACK_HEADER_SIZE, PACK_SIGNATURE, PACK_VERSION, REF_DELTA_CODE};
use crate::errors::RepositoryError;
use byteorder::{ByteOrder, NetworkEndian, WriteBytesExt};
use bytes::Bytes;
use flate2::Compression;
use flate2::write::ZlibEncoder;
use std::collections::HashMap;
use std::io::{Read, Write};

/// Objects smaller than this are always stored whole
const MIN_DELTA_SIZE: usize = 64;
const MAX_DELTA_DEPTH: usize = 16;

/// A one-byte header plus the smallest zlib stream
const MIN_ENTRY_SIZE: usize = 9;

/// A fully reconstructed object, as stored in or extracted from a pack
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedObject {
    pub oid: ObjectId,
    pub object_type: ObjectType,
    pub content: Bytes,
}

impl PackedObject {
    pub fn new(object_type: ObjectType, content: Bytes) -> Self {
        Self {
            oid: hash_object(object_type, &content),
            object_type,
            content,
        }
    }
}

/// An object recovered from a pack together with its entry offset
#[derive(Debug, Clone)]
pub struct UnpackedEntry {
    pub offset: u64,
    pub object: PackedObject,
}

/// A complete, checksummed pack stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packfile {
    data: Bytes,
}

impl Packfile {
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.object_count() == 0
    }

    pub fn object_count(&self) -> u32 {
        if self.data.len() < PACK_HEADER_SIZE {
            return 0;
        }
        NetworkEndian::read_u32(&self.data[8..12])
    }

    /// Trailer digest, which also names the pack on disk
    pub fn checksum(&self) -> ObjectId {
        let start = self.data.len().saturating_sub(RAW_OBJECT_ID_LENGTH);
        ObjectId::from_raw(&self.data[start..])
    }

    /// Check the header and the trailer digest
    pub fn verify(&self) -> anyhow::Result<()> {
        let data = &self.data[..];
        if data.len() < PACK_HEADER_SIZE + RAW_OBJECT_ID_LENGTH {
            return Err(RepositoryError::InvalidObject("pack is truncated".into()).into());
        }
        if &data[0..4] != PACK_SIGNATURE {
            return Err(RepositoryError::InvalidObject("bad pack signature".into()).into());
        }
        let version = NetworkEndian::read_u32(&data[4..8]);
        if version != PACK_VERSION {
            return Err(RepositoryError::InvalidObject(format!("unsupported pack version {version}")).into());
        }

        let body = &data[..data.len() - RAW_OBJECT_ID_LENGTH];
        let expected = self.checksum();
        if ObjectId::digest(body) != expected {
            return Err(RepositoryError::ObjectCorrupt {
                oid: expected,
                reason: "pack trailer does not match contents".into(),
            }
            .into());
        }

        Ok(())
    }

    /// Decode every entry, resolving deltas
    ///
    /// Delta bases are looked up among earlier entries first, then through
    /// `external_base` (for bases the receiver already has). Nothing is
    /// written anywhere: callers persist the result only once this succeeds.
    pub fn unpack<F>(&self, mut external_base: F) -> anyhow::Result<Vec<UnpackedEntry>>
    where
        F: FnMut(&ObjectId) -> anyhow::Result<Option<(ObjectType, Bytes)>>,
    {
        self.verify()?;

        let data = &self.data[..self.data.len() - RAW_OBJECT_ID_LENGTH];
        let count = self.object_count() as usize;
        let mut offset = PACK_HEADER_SIZE;
        if count > (data.len() - offset) / MIN_ENTRY_SIZE {
            return Err(RepositoryError::InvalidObject(format!(
                "pack claims {count} objects in {} bytes",
                data.len() - offset
            ))
            .into());
        }
        let mut entries = Vec::with_capacity(count);
        let mut by_oid: HashMap<ObjectId, usize> = HashMap::with_capacity(count);

        for _ in 0..count {
            let raw = read_raw_entry(data, offset)?;

            let object = match raw.kind {
                RawKind::Whole(object_type) => PackedObject::new(object_type, raw.inflated.into()),
                RawKind::RefDelta(base_oid) => {
                    let (base_type, base_content) = match by_oid.get(&base_oid) {
                        Some(&position) => {
                            let base: &UnpackedEntry = &entries[position];
                            (base.object.object_type, base.object.content.clone())
                        }
                        None => external_base(&base_oid)?
                            .ok_or_else(|| RepositoryError::ObjectNotFound(base_oid.clone()))?,
                    };
                    let content = apply_delta(&base_content, &raw.inflated)?;
                    PackedObject::new(base_type, content.into())
                }
            };

            by_oid.insert(object.oid.clone(), entries.len());
            entries.push(UnpackedEntry {
                offset: offset as u64,
                object,
            });
            offset = raw.next_offset;
        }

        if offset != data.len() {
            return Err(RepositoryError::InvalidObject("trailing bytes after pack entries".into()).into());
        }

        Ok(entries)
    }

    /// Decode the single entry at `offset` of an installed pack
    pub fn read_at<F>(&self, offset: u64, resolve_base: &mut F) -> anyhow::Result<(ObjectType, Bytes)>
    where
        F: FnMut(&ObjectId) -> anyhow::Result<(ObjectType, Bytes)>,
    {
        let data = &self.data[..self.data.len().saturating_sub(RAW_OBJECT_ID_LENGTH)];
        let raw = read_raw_entry(data, offset as usize)?;

        match raw.kind {
            RawKind::Whole(object_type) => Ok((object_type, raw.inflated.into())),
            RawKind::RefDelta(base_oid) => {
                let (base_type, base_content) = resolve_base(&base_oid)?;
                let content = apply_delta(&base_content, &raw.inflated)?;
                Ok((base_type, content.into()))
            }
        }
    }
}

enum RawKind {
    Whole(ObjectType),
    RefDelta(ObjectId),
}

struct RawEntry {
    kind: RawKind,
    inflated: Vec<u8>,
    next_offset: usize,
}

fn read_raw_entry(data: &[u8], offset: usize) -> anyhow::Result<RawEntry> {
    let truncated = || RepositoryError::InvalidObject(format!("pack entry at {offset} is truncated"));

    let mut cursor = offset;
    let mut byte = *data.get(cursor).ok_or_else(truncated)?;
    cursor += 1;

    let type_code = (byte >> 4) & 0x07;
    let mut size = (byte & 0x0f) as u64;
    let mut shift = 4u32;
    while byte & 0x80 != 0 {
        byte = *data.get(cursor).ok_or_else(truncated)?;
        cursor += 1;
        let bits = u64::from(byte & 0x7f);
        if shift >= u64::BITS || (bits << shift) >> shift != bits {
            return Err(RepositoryError::InvalidObject(format!("pack entry at {offset} has an oversized header")).into());
        }
        size |= bits << shift;
        shift += 7;
    }
    let size = usize::try_from(size)
        .map_err(|_| RepositoryError::InvalidObject(format!("pack entry at {offset} is too large")))?;

    let kind = if type_code == REF_DELTA_CODE {
        let raw_oid = data
            .get(cursor..cursor + RAW_OBJECT_ID_LENGTH)
            .ok_or_else(truncated)?;
        cursor += RAW_OBJECT_ID_LENGTH;
        RawKind::RefDelta(ObjectId::from_raw(raw_oid))
    } else {
        RawKind::Whole(ObjectType::from_pack_code(type_code)?)
    };

    let compressed = data.get(cursor..).ok_or_else(truncated)?;
    let mut decoder = flate2::bufread::ZlibDecoder::new(compressed);
    let mut inflated = Vec::with_capacity(size.min(MAX_PREALLOC));
    // one byte past the declared size is enough to tell it was a lie
    (&mut decoder)
        .take((size as u64).saturating_add(1))
        .read_to_end(&mut inflated)?;
    cursor += decoder.total_in() as usize;

    if inflated.len() != size {
        return Err(RepositoryError::InvalidObject(format!(
            "pack entry at {offset} inflates to {} bytes, header says {size}",
            inflated.len()
        ))
        .into());
    }

    Ok(RawEntry {
        kind,
        inflated,
        next_offset: cursor,
    })
}

/// Builds packs, delta-compressing objects against recent objects of the same type
#[derive(Debug, Clone)]
pub struct PackWriter {
    window: usize,
    compression: Compression,
}

impl Default for PackWriter {
    fn default() -> Self {
        Self {
            window: 10,
            compression: Compression::default(),
        }
    }
}

impl PackWriter {
    pub fn new(window: usize) -> Self {
        Self {
            window,
            ..Self::default()
        }
    }

    pub fn write(&self, objects: Vec<PackedObject>) -> anyhow::Result<Packfile> {
        let mut objects = objects;
        // same-type objects next to each other, larger first, so smaller
        // revisions become deltas against bigger ones
        objects.sort_by(|a, b| {
            a.object_type
                .cmp(&b.object_type)
                .then_with(|| b.content.len().cmp(&a.content.len()))
                .then_with(|| a.oid.cmp(&b.oid))
        });
        objects.dedup_by(|a, b| a.oid == b.oid);

        let mut data = Vec::new();
        data.write_all(PACK_SIGNATURE)?;
        data.write_u32::<NetworkEndian>(PACK_VERSION)?;
        data.write_u32::<NetworkEndian>(objects.len() as u32)?;

        let mut depths: HashMap<&ObjectId, usize> = HashMap::new();
        let mut delta_count = 0;

        for (position, object) in objects.iter().enumerate() {
            let base = self.best_base(&objects, position, &depths);

            match base {
                Some((base, delta)) => {
                    let depth = depths.get(&base.oid).copied().unwrap_or_default() + 1;
                    depths.insert(&object.oid, depth);
                    delta_count += 1;

                    write_entry_header(&mut data, REF_DELTA_CODE, delta.len());
                    base.oid.write_h40_to(&mut data)?;
                    self.deflate_into(&mut data, &delta)?;
                }
                None => {
                    depths.insert(&object.oid, 0);
                    write_entry_header(&mut data, object.object_type.pack_code(), object.content.len());
                    self.deflate_into(&mut data, &object.content)?;
                }
            }
        }

        let checksum = ObjectId::digest(&data);
        checksum.write_h40_to(&mut data)?;

        tracing::debug!(
            objects = objects.len(),
            deltas = delta_count,
            bytes = data.len(),
            pack = %checksum,
            "wrote pack"
        );

        Ok(Packfile::from_bytes(data))
    }

    fn best_base<'o>(
        &self,
        objects: &'o [PackedObject],
        position: usize,
        depths: &HashMap<&ObjectId, usize>,
    ) -> Option<(&'o PackedObject, Vec<u8>)> {
        let object = &objects[position];
        if object.content.len() < MIN_DELTA_SIZE {
            return None;
        }

        objects[position.saturating_sub(self.window)..position]
            .iter()
            .filter(|candidate| candidate.object_type == object.object_type)
            .filter(|candidate| depths.get(&candidate.oid).copied().unwrap_or_default() < MAX_DELTA_DEPTH)
            .map(|candidate| (candidate, create_delta(&candidate.content, &object.content)))
            .filter(|(_, delta)| delta.len() < object.content.len() / 2)
            .min_by_key(|(_, delta)| delta.len())
    }

    fn deflate_into(&self, data: &mut Vec<u8>, content: &[u8]) -> anyhow::Result<()> {
        let mut encoder = ZlibEncoder::new(data, self.compression);
        encoder.write_all(content)?;
        encoder.finish()?;
        Ok(())
    }
}

fn write_entry_header(data: &mut Vec<u8>, type_code: u8, size: usize) {
    let mut byte = (type_code << 4) | (size & 0x0f) as u8;
    let mut size = size >> 4;
    while size != 0 {
        data.push(byte | 0x80);
        byte = (size & 0x7f) as u8;
        size >>= 7;
    }
    data.push(byte);
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn blob(content: &str) -> PackedObject {
        PackedObject::new(ObjectType::Blob, Bytes::from(content.to_string()))
    }

    fn no_external(_: &ObjectId) -> anyhow::Result<Option<(ObjectType, Bytes)>> {
        Ok(None)
    }

    #[test]
    fn unpack_recovers_every_object() {
        let base = "line of text that repeats\n".repeat(40);
        let objects = vec![
            blob(""),
            blob(&base),
            blob(&format!("{base}one more line\n")),
            PackedObject::new(ObjectType::Commit, Bytes::from_static(b"tree x\n\nmsg")),
        ];

        let pack = PackWriter::default().write(objects.clone()).unwrap();
        let mut unpacked = pack
            .unpack(no_external)
            .unwrap()
            .into_iter()
            .map(|entry| entry.object)
            .collect::<Vec<_>>();
        unpacked.sort_by(|a, b| a.oid.cmp(&b.oid));

        let mut expected = objects;
        expected.sort_by(|a, b| a.oid.cmp(&b.oid));

        assert_eq!(pack.object_count(), 4);
        assert_eq!(unpacked, expected);
    }

    #[test]
    fn similar_blobs_are_deltified() {
        let base = "0123456789abcdef".repeat(256);
        let whole = PackWriter::new(0)
            .write(vec![blob(&base), blob(&format!("{base}tail"))])
            .unwrap();
        let deltified = PackWriter::default()
            .write(vec![blob(&base), blob(&format!("{base}tail"))])
            .unwrap();

        assert!(deltified.len() < whole.len());
    }

    #[test]
    fn flipped_byte_fails_verification() {
        let pack = PackWriter::default().write(vec![blob("payload")]).unwrap();
        let mut bytes = pack.data().to_vec();
        bytes[PACK_HEADER_SIZE + 2] ^= 0xff;

        let error = Packfile::from_bytes(bytes).unpack(no_external).unwrap_err();
        assert!(matches!(
            error.downcast_ref::<RepositoryError>(),
            Some(RepositoryError::ObjectCorrupt { .. })
        ));
    }

    #[test]
    fn missing_delta_base_is_reported() {
        let original = blob(&"shared base content ".repeat(20));
        let revised = blob(&format!("{}!", "shared base content ".repeat(20)));
        let pack = PackWriter::default().write(vec![original, revised]).unwrap();

        // rebuild a pack holding only the delta entry
        let full = pack.unpack(no_external).unwrap();
        assert_eq!(full.len(), 2);
        let base = full[0].object.clone();

        let entries = &pack.data()[PACK_HEADER_SIZE..pack.len() - RAW_OBJECT_ID_LENGTH];
        let second = full[1].offset as usize - PACK_HEADER_SIZE;
        let mut thin = Vec::new();
        thin.extend_from_slice(PACK_SIGNATURE);
        thin.write_u32::<NetworkEndian>(PACK_VERSION).unwrap();
        thin.write_u32::<NetworkEndian>(1).unwrap();
        thin.extend_from_slice(&entries[second..]);
        let checksum = ObjectId::digest(&thin);
        checksum.write_h40_to(&mut thin).unwrap();
        let thin = Packfile::from_bytes(thin);

        assert!(thin.unpack(no_external).is_err());

        let resolved = thin
            .unpack(|oid| {
                Ok((oid == &base.oid).then(|| (base.object_type, base.content.clone())))
            })
            .unwrap();
        assert_eq!(resolved.len(), 1);
    }

    /// A pack with a correct trailer around arbitrary entry bytes
    fn forged_pack(count: u32, entries: &[u8]) -> Packfile {
        let mut data = Vec::new();
        data.extend_from_slice(PACK_SIGNATURE);
        data.write_u32::<NetworkEndian>(PACK_VERSION).unwrap();
        data.write_u32::<NetworkEndian>(count).unwrap();
        data.extend_from_slice(entries);
        ObjectId::digest(&data).write_h40_to(&mut data).unwrap();
        Packfile::from_bytes(data)
    }

    fn deflated(content: &[u8]) -> Vec<u8> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(content).unwrap();
        encoder.finish().unwrap()
    }

    fn invalid_reason(pack: &Packfile) -> String {
        match pack.unpack(no_external).unwrap_err().downcast_ref::<RepositoryError>() {
            Some(RepositoryError::InvalidObject(reason)) => reason.clone(),
            other => panic!("expected an invalid object error, got {other:?}"),
        }
    }

    #[test]
    fn object_count_beyond_the_data_is_rejected() {
        let pack = forged_pack(u32::MAX, &[]);

        assert!(invalid_reason(&pack).contains("claims 4294967295 objects"));
    }

    #[test]
    fn declared_size_is_checked_against_the_content() {
        let mut entries = Vec::new();
        write_entry_header(&mut entries, ObjectType::Blob.pack_code(), 1 << 46);
        entries.extend(deflated(b"abc"));

        assert!(invalid_reason(&forged_pack(1, &entries)).contains("header says 70368744177664"));
    }

    #[test]
    fn content_longer_than_declared_is_rejected() {
        let mut entries = Vec::new();
        write_entry_header(&mut entries, ObjectType::Blob.pack_code(), 2);
        entries.extend(deflated(b"abcdef"));

        assert!(invalid_reason(&forged_pack(1, &entries)).contains("header says 2"));
    }

    #[test]
    fn overlong_size_header_is_rejected() {
        let mut entries = vec![0xb0];
        entries.extend([0xff; 12]);
        entries.push(0x00);

        assert!(invalid_reason(&forged_pack(1, &entries)).contains("oversized header"));
    }

    #[test]
    fn overlong_header_in_an_installed_pack_is_rejected() {
        let mut entries = vec![0xb0];
        entries.extend([0xff; 12]);
        let pack = forged_pack(1, &entries);

        let result = pack.read_at(PACK_HEADER_SIZE as u64, &mut |oid| {
            Err(RepositoryError::ObjectNotFound(oid.clone()).into())
        });
        assert!(result.is_err());
    }

    proptest! {
        #[test]
        fn arbitrary_entries_fail_cleanly(count in 0u32..8, entries in prop::collection::vec(any::<u8>(), 0..256)) {
            let pack = forged_pack(count, &entries);

            // decoding garbage may fail, but must never panic or abort
            let _ = pack.unpack(no_external);
        }
    }
}
