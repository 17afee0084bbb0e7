//! Object store
//!
//! Content-addressed, write-once storage for blobs, trees, commits and tags.
//!
//! ## Layout
//!
//! - Loose objects: `objects/<2 hex>/<38 hex>`, zlib of `<type> <size>\0<content>`
//! - Packs: `objects/pack/pack-<checksum>.pack` plus `.idx`
//!
//! ## Guarantees
//!
//! - `put` is idempotent: writing the same content twice yields the same ID
//!   and one stored copy. Writers race safely because each writes a private
//!   temp file and links it into place; an existing object file is never
//!   replaced.
//! - `get` re-hashes what it reads. Bytes that do not match their ID are
//!   reported as `ObjectCorrupt` and never repaired.
//! - A different object under an existing ID is a `DigestCollision`.

use crate::artifacts::database::database_entry::DatabaseEntry;
use crate::artifacts::diff::tree_diff::TreeDiff;
use crate::artifacts::objects::blob::Blob;
use crate::artifacts::objects::commit::Commit;
use crate::artifacts::objects::object::{Object, ObjectBox, Unpackable, frame, hash_object};
use crate::artifacts::objects::object_id::ObjectId;
use crate::artifacts::objects::object_type::ObjectType;
use crate::artifacts::objects::tag::Tag;
use crate::artifacts::objects::tree::Tree;
use crate::artifacts::pack::pack_index::PackIndex;
use crate::artifacts::pack::packfile::{PackWriter, PackedObject, Packfile};
use crate::errors::RepositoryError;
use anyhow::Context;
use bytes::Bytes;
use fake::rand;
use std::collections::BTreeMap;
use std::io::{Cursor, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

/// A pack installed under `objects/pack`
#[derive(Debug)]
struct InstalledPack {
    pack: Packfile,
    index: PackIndex,
}

#[derive(Debug)]
pub struct Database {
    path: Box<Path>,
    packs: Mutex<Option<Vec<Arc<InstalledPack>>>>,
}

impl Database {
    pub fn new(path: Box<Path>) -> Self {
        Database {
            path,
            packs: Mutex::new(None),
        }
    }

    pub fn objects_path(&self) -> &Path {
        &self.path
    }

    pub fn pack_path(&self) -> PathBuf {
        self.path.join("pack")
    }

    /// Store content under its digest, returning the digest
    pub fn put(&self, object_type: ObjectType, content: Bytes) -> anyhow::Result<ObjectId> {
        let framed = frame(object_type, &content);
        let oid = ObjectId::digest(&framed);

        if self.contains(&oid) {
            self.check_same_object(&oid, object_type, &content)?;
            return Ok(oid);
        }

        let object_path = self.path.join(oid.to_path());
        let object_dir = object_path
            .parent()
            .with_context(|| format!("Invalid object path {}", object_path.display()))?;
        std::fs::create_dir_all(object_dir)
            .with_context(|| format!("Unable to create object directory {}", object_dir.display()))?;

        let temp_object_path = object_dir.join(Self::generate_temp_name());
        let compressed = Self::compress(&framed)?;
        {
            let mut file = std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&temp_object_path)
                .with_context(|| format!("Unable to open object file {}", temp_object_path.display()))?;
            file.write_all(&compressed)
                .with_context(|| format!("Unable to write object file {}", temp_object_path.display()))?;
            file.sync_all()?;
        }

        // linking fails instead of replacing when another writer got there first
        match std::fs::hard_link(&temp_object_path, &object_path) {
            Ok(()) => {
                std::fs::remove_file(&temp_object_path)?;
                tracing::debug!(oid = %oid, %object_type, size = content.len(), "stored object");
            }
            Err(error) if error.kind() == ErrorKind::AlreadyExists => {
                std::fs::remove_file(&temp_object_path)?;
                self.check_same_object(&oid, object_type, &content)?;
            }
            Err(_) => {
                std::fs::rename(&temp_object_path, &object_path).with_context(|| {
                    format!("Unable to move object file to {}", object_path.display())
                })?;
                tracing::debug!(oid = %oid, %object_type, size = content.len(), "stored object");
            }
        }

        Ok(oid)
    }

    pub fn store(&self, object: &impl Object) -> anyhow::Result<ObjectId> {
        self.put(object.object_type(), object.serialize()?)
    }

    /// Fetch an object, verifying its digest
    pub fn get(&self, oid: &ObjectId) -> anyhow::Result<(ObjectType, Bytes)> {
        if let Some(object) = self.read_loose(oid)? {
            return self.verified(oid, object);
        }
        if let Some(object) = self.read_packed(oid, false)? {
            return self.verified(oid, object);
        }
        // a concurrent repack may have moved it into a new pack
        if let Some(object) = self.read_packed(oid, true)? {
            return self.verified(oid, object);
        }

        Err(RepositoryError::ObjectNotFound(oid.clone()).into())
    }

    pub fn contains(&self, oid: &ObjectId) -> bool {
        self.path.join(oid.to_path()).is_file()
            || self
                .installed_packs(false)
                .map(|packs| packs.iter().any(|pack| pack.index.contains(oid)))
                .unwrap_or_default()
    }

    /// Group objects into one delta-compressed pack
    pub fn compact<'o>(&self, oids: impl IntoIterator<Item = &'o ObjectId>) -> anyhow::Result<Packfile> {
        let objects = oids
            .into_iter()
            .map(|oid| {
                let (object_type, content) = self.get(oid)?;
                Ok(PackedObject {
                    oid: oid.clone(),
                    object_type,
                    content,
                })
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        PackWriter::default().write(objects)
    }

    /// Verify a received pack completely, then persist its objects
    ///
    /// Nothing is written unless every entry decodes and hashes cleanly.
    /// Packs above `unpack_limit` objects are installed whole, smaller ones
    /// become loose objects.
    pub fn unpack(&self, packfile: &Packfile, unpack_limit: usize) -> anyhow::Result<Vec<ObjectId>> {
        let entries = packfile.unpack(|base| {
            if self.contains(base) {
                self.get(base).map(Some)
            } else {
                Ok(None)
            }
        })?;

        let oids = entries
            .iter()
            .map(|entry| entry.object.oid.clone())
            .collect::<Vec<_>>();

        if entries.len() > unpack_limit {
            let index = PackIndex::build(&entries, packfile.checksum());
            self.install_pack(packfile, &index)?;
        } else {
            for entry in entries {
                self.put(entry.object.object_type, entry.object.content)?;
            }
        }

        tracing::debug!(objects = oids.len(), bytes = packfile.len(), "unpacked objects");
        Ok(oids)
    }

    /// Move every loose object into a new pack and prune the loose copies
    pub fn repack(&self) -> anyhow::Result<Option<ObjectId>> {
        let loose = self.loose_objects()?;
        if loose.is_empty() {
            return Ok(None);
        }

        let packfile = self.compact(&loose)?;
        let entries = packfile.unpack(|_| Ok(None))?;
        let index = PackIndex::build(&entries, packfile.checksum());
        self.install_pack(&packfile, &index)?;

        for oid in &loose {
            match std::fs::remove_file(self.path.join(oid.to_path())) {
                Err(error) if error.kind() != ErrorKind::NotFound => return Err(error.into()),
                _ => {}
            }
        }

        tracing::info!(objects = loose.len(), pack = %packfile.checksum(), "repacked loose objects");
        Ok(Some(packfile.checksum()))
    }

    pub fn loose_objects(&self) -> anyhow::Result<Vec<ObjectId>> {
        let mut oids = Vec::new();

        for entry in std::fs::read_dir(&self.path)? {
            let entry = entry?;
            let dir_name = entry.file_name().to_string_lossy().to_string();
            if dir_name.len() != 2 || !entry.file_type()?.is_dir() {
                continue;
            }
            for object in std::fs::read_dir(entry.path())? {
                let file_name = object?.file_name().to_string_lossy().to_string();
                if let Ok(oid) = ObjectId::try_parse(format!("{dir_name}{file_name}")) {
                    oids.push(oid);
                }
            }
        }

        oids.sort();
        Ok(oids)
    }

    pub fn tree_diff(
        &self,
        old_oid: Option<&ObjectId>,
        new_oid: Option<&ObjectId>,
    ) -> anyhow::Result<TreeDiff<'_>> {
        let mut tree_diff = TreeDiff::new(self);
        tree_diff.compare_oids(old_oid, new_oid, Path::new(""))?;
        Ok(tree_diff)
    }

    /// Every file below a tree (or commit), keyed by path
    pub fn flatten_tree(&self, oid: Option<&ObjectId>) -> anyhow::Result<BTreeMap<PathBuf, DatabaseEntry>> {
        let mut files = BTreeMap::new();
        if let Some(oid) = oid {
            let tree_oid = self.peel_to_tree(oid)?;
            self.flatten_into(&tree_oid, Path::new(""), &mut files)?;
        }
        Ok(files)
    }

    fn flatten_into(
        &self,
        tree_oid: &ObjectId,
        prefix: &Path,
        files: &mut BTreeMap<PathBuf, DatabaseEntry>,
    ) -> anyhow::Result<()> {
        for (name, entry) in self.load_tree(tree_oid)?.into_entries() {
            let path = prefix.join(name);
            if entry.is_tree() {
                self.flatten_into(&entry.oid, &path, files)?;
            } else {
                files.insert(path, entry);
            }
        }
        Ok(())
    }

    /// Tree ID for a commit or tree ID
    pub fn peel_to_tree(&self, oid: &ObjectId) -> anyhow::Result<ObjectId> {
        match self.parse_object(oid)? {
            ObjectBox::Commit(commit) => Ok(commit.tree_oid().clone()),
            ObjectBox::Tree(_) => Ok(oid.clone()),
            ObjectBox::Tag(tag) => self.peel_to_tree(tag.target()),
            ObjectBox::Blob(_) => Err(RepositoryError::InvalidObject(format!("{oid} is a blob, not a tree")).into()),
        }
    }

    /// Commit ID behind a commit or (annotated) tag ID
    pub fn peel_to_commit(&self, oid: &ObjectId) -> anyhow::Result<ObjectId> {
        match self.parse_object(oid)? {
            ObjectBox::Commit(_) => Ok(oid.clone()),
            ObjectBox::Tag(tag) => self.peel_to_commit(tag.target()),
            other => Err(RepositoryError::InvalidObject(format!(
                "{oid} is a {}, not a commit",
                other.object_type()
            ))
            .into()),
        }
    }

    pub fn parse_object(&self, object_id: &ObjectId) -> anyhow::Result<ObjectBox> {
        let (object_type, content) = self.get(object_id)?;
        ObjectBox::parse(object_type, &content)
    }

    pub fn parse_object_as_blob(&self, object_id: &ObjectId) -> anyhow::Result<Option<Blob>> {
        match self.get(object_id)? {
            (ObjectType::Blob, content) => Ok(Some(Blob::deserialize(Cursor::new(content))?)),
            _ => Ok(None),
        }
    }

    pub fn parse_object_as_tree(&self, object_id: &ObjectId) -> anyhow::Result<Option<Tree>> {
        match self.get(object_id)? {
            (ObjectType::Tree, content) => Ok(Some(Tree::deserialize(Cursor::new(content))?)),
            _ => Ok(None),
        }
    }

    pub fn parse_object_as_commit(&self, object_id: &ObjectId) -> anyhow::Result<Option<Commit>> {
        match self.get(object_id)? {
            (ObjectType::Commit, content) => Ok(Some(Commit::deserialize(Cursor::new(content))?)),
            _ => Ok(None),
        }
    }

    pub fn parse_object_as_tag(&self, object_id: &ObjectId) -> anyhow::Result<Option<Tag>> {
        match self.get(object_id)? {
            (ObjectType::Tag, content) => Ok(Some(Tag::deserialize(Cursor::new(content))?)),
            _ => Ok(None),
        }
    }

    pub fn load_blob(&self, object_id: &ObjectId) -> anyhow::Result<Blob> {
        self.parse_object_as_blob(object_id)?
            .ok_or_else(|| Self::wrong_type(object_id, ObjectType::Blob))
    }

    pub fn load_tree(&self, object_id: &ObjectId) -> anyhow::Result<Tree> {
        self.parse_object_as_tree(object_id)?
            .ok_or_else(|| Self::wrong_type(object_id, ObjectType::Tree))
    }

    pub fn load_commit(&self, object_id: &ObjectId) -> anyhow::Result<Commit> {
        self.parse_object_as_commit(object_id)?
            .ok_or_else(|| Self::wrong_type(object_id, ObjectType::Commit))
    }

    pub fn get_object_type(&self, object_id: &ObjectId) -> anyhow::Result<ObjectType> {
        Ok(self.get(object_id)?.0)
    }

    /// Find all objects whose ID starts with the given prefix.
    ///
    /// Used to resolve abbreviated IDs. Several matches mean the prefix is ambiguous.
    pub fn find_objects_by_prefix(&self, prefix: &str) -> anyhow::Result<Vec<ObjectId>> {
        let prefix = prefix.to_ascii_lowercase();
        let mut matches = Vec::new();

        if prefix.len() >= 2 {
            let dir_name = &prefix[..2];
            let dir_path = self.path.join(dir_name);

            if dir_path.is_dir() {
                for entry in std::fs::read_dir(&dir_path)? {
                    let file_name = entry?.file_name().to_string_lossy().to_string();
                    let full_oid = format!("{dir_name}{file_name}");
                    if full_oid.starts_with(&prefix)
                        && let Ok(oid) = ObjectId::try_parse(full_oid)
                    {
                        matches.push(oid);
                    }
                }
            }
        } else {
            matches.extend(
                self.loose_objects()?
                    .into_iter()
                    .filter(|oid| oid.as_ref().starts_with(&prefix)),
            );
        }

        for pack in self.installed_packs(false)? {
            matches.extend(
                pack.index
                    .oids()
                    .filter(|oid| oid.as_ref().starts_with(&prefix))
                    .cloned(),
            );
        }

        matches.sort();
        matches.dedup();
        Ok(matches)
    }

    fn wrong_type(object_id: &ObjectId, expected: ObjectType) -> anyhow::Error {
        RepositoryError::InvalidObject(format!("{object_id} is not a {expected}")).into()
    }

    fn verified(&self, oid: &ObjectId, (object_type, content): (ObjectType, Bytes)) -> anyhow::Result<(ObjectType, Bytes)> {
        if &hash_object(object_type, &content) != oid {
            tracing::warn!(oid = %oid, "object failed digest verification");
            return Err(RepositoryError::ObjectCorrupt {
                oid: oid.clone(),
                reason: "content does not match digest".into(),
            }
            .into());
        }
        Ok((object_type, content))
    }

    fn check_same_object(&self, oid: &ObjectId, object_type: ObjectType, content: &[u8]) -> anyhow::Result<()> {
        let (stored_type, stored_content) = self.get(oid)?;
        if stored_type != object_type || stored_content != content {
            tracing::error!(oid = %oid, "digest collision");
            return Err(RepositoryError::DigestCollision(oid.clone()).into());
        }
        Ok(())
    }

    fn read_loose(&self, oid: &ObjectId) -> anyhow::Result<Option<(ObjectType, Bytes)>> {
        let object_path = self.path.join(oid.to_path());
        let compressed = match std::fs::read(&object_path) {
            Ok(compressed) => compressed,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(None),
            Err(error) => {
                return Err(error).with_context(|| format!("Unable to read object file {}", object_path.display()));
            }
        };

        let corrupt = |reason: String| RepositoryError::ObjectCorrupt {
            oid: oid.clone(),
            reason,
        };

        let framed = Self::decompress(&compressed).map_err(|error| corrupt(error.to_string()))?;
        let mut reader = Cursor::new(&framed[..]);
        let (object_type, size) =
            ObjectType::parse_header(&mut reader).map_err(|error| corrupt(error.to_string()))?;
        let content = Bytes::copy_from_slice(&framed[reader.position() as usize..]);

        if content.len() != size {
            return Err(corrupt(format!("header declares {size} bytes, found {}", content.len())).into());
        }

        Ok(Some((object_type, content)))
    }

    fn read_packed(&self, oid: &ObjectId, refresh: bool) -> anyhow::Result<Option<(ObjectType, Bytes)>> {
        for pack in self.installed_packs(refresh)? {
            if let Some(offset) = pack.index.lookup(oid) {
                let object = pack
                    .pack
                    .read_at(offset, &mut |base: &ObjectId| self.get(base))
                    .with_context(|| format!("reading {oid} from pack {}", pack.index.pack_checksum()))?;
                return Ok(Some(object));
            }
        }
        Ok(None)
    }

    fn installed_packs(&self, refresh: bool) -> anyhow::Result<Vec<Arc<InstalledPack>>> {
        let mut packs = self.packs.lock().unwrap_or_else(PoisonError::into_inner);

        if refresh || packs.is_none() {
            *packs = Some(self.load_packs()?);
        }

        Ok(packs.clone().unwrap_or_default())
    }

    fn load_packs(&self) -> anyhow::Result<Vec<Arc<InstalledPack>>> {
        let pack_dir = self.pack_path();
        if !pack_dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut packs = Vec::new();
        for entry in std::fs::read_dir(&pack_dir)? {
            let index_path = entry?.path();
            if index_path.extension().is_none_or(|extension| extension != "idx") {
                continue;
            }

            let index = PackIndex::deserialize(&std::fs::read(&index_path)?)
                .with_context(|| format!("loading pack index {}", index_path.display()))?;
            let pack = Packfile::from_bytes(std::fs::read(index_path.with_extension("pack"))?);
            if &pack.checksum() != index.pack_checksum() {
                return Err(RepositoryError::ObjectCorrupt {
                    oid: pack.checksum(),
                    reason: format!("pack does not match index {}", index_path.display()),
                }
                .into());
            }

            packs.push(Arc::new(InstalledPack { pack, index }));
        }

        Ok(packs)
    }

    fn install_pack(&self, packfile: &Packfile, index: &PackIndex) -> anyhow::Result<()> {
        let pack_dir = self.pack_path();
        std::fs::create_dir_all(&pack_dir)?;

        let base_name = format!("pack-{}", packfile.checksum());
        // the index goes last: packs are discovered through their index
        for (extension, content) in [("pack", packfile.data().clone()), ("idx", index.serialize()?)] {
            let target = pack_dir.join(format!("{base_name}.{extension}"));
            let temp = pack_dir.join(Self::generate_temp_name());
            std::fs::write(&temp, &content)?;
            std::fs::rename(&temp, &target)
                .with_context(|| format!("Unable to install {}", target.display()))?;
        }

        self.installed_packs(true)?;
        tracing::debug!(pack = %packfile.checksum(), objects = index.len(), "installed pack");
        Ok(())
    }

    fn compress(data: &[u8]) -> anyhow::Result<Vec<u8>> {
        let mut encoder =
            flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        encoder
            .write_all(data)
            .context("Unable to compress object content")?;

        encoder
            .finish()
            .context("Unable to finish compressing object content")
    }

    fn decompress(data: &[u8]) -> anyhow::Result<Vec<u8>> {
        let mut decoder = flate2::read::ZlibDecoder::new(data);
        let mut decompressed_content = Vec::new();
        decoder
            .read_to_end(&mut decompressed_content)
            .context("Unable to decompress object content")?;

        Ok(decompressed_content)
    }

    fn generate_temp_name() -> String {
        format!("tmp-obj-{}", rand::random::<u32>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::TempDir;
    use pretty_assertions::assert_eq;
    use rstest::{fixture, rstest};

    #[fixture]
    fn database() -> (TempDir, Database) {
        let dir = TempDir::new().unwrap();
        let database = Database::new(dir.path().join("objects").into_boxed_path());
        std::fs::create_dir_all(database.objects_path()).unwrap();
        (dir, database)
    }

    #[rstest]
    fn put_is_idempotent(database: (TempDir, Database)) {
        let (_dir, database) = database;

        let first = database.put(ObjectType::Blob, Bytes::from_static(b"hello")).unwrap();
        let second = database.put(ObjectType::Blob, Bytes::from_static(b"hello")).unwrap();

        assert_eq!(first, second);
        assert_eq!(database.loose_objects().unwrap(), vec![first.clone()]);
        assert_eq!(
            database.get(&first).unwrap(),
            (ObjectType::Blob, Bytes::from_static(b"hello"))
        );
    }

    #[rstest]
    fn missing_object_is_not_found(database: (TempDir, Database)) {
        let (_dir, database) = database;
        let error = database.get(&ObjectId::digest(b"nothing")).unwrap_err();

        assert!(matches!(
            error.downcast_ref::<RepositoryError>(),
            Some(RepositoryError::ObjectNotFound(_))
        ));
    }

    #[rstest]
    fn tampered_object_is_corrupt(database: (TempDir, Database)) {
        let (_dir, database) = database;
        let oid = database.put(ObjectType::Blob, Bytes::from_static(b"original")).unwrap();

        let path = database.objects_path().join(oid.to_path());
        let forged = Database::compress(&frame(ObjectType::Blob, b"tampered")).unwrap();
        std::fs::write(&path, forged).unwrap();

        let error = database.get(&oid).unwrap_err();
        assert!(matches!(
            error.downcast_ref::<RepositoryError>(),
            Some(RepositoryError::ObjectCorrupt { .. })
        ));
    }

    #[rstest]
    fn repack_keeps_objects_readable(database: (TempDir, Database)) {
        let (_dir, database) = database;
        let oids = (0..20)
            .map(|i| {
                database
                    .put(ObjectType::Blob, Bytes::from(format!("shared prefix for every blob, number {i}\n").repeat(8)))
                    .unwrap()
            })
            .collect::<Vec<_>>();

        assert!(database.repack().unwrap().is_some());
        assert!(database.loose_objects().unwrap().is_empty());

        for oid in &oids {
            assert!(database.contains(oid));
            assert_eq!(database.get(oid).unwrap().0, ObjectType::Blob);
        }
        assert_eq!(database.find_objects_by_prefix(&oids[0].as_ref()[..6]).unwrap(), vec![oids[0].clone()]);
    }

    #[rstest]
    fn unpack_into_fresh_store_reproduces_objects(database: (TempDir, Database)) {
        let (_dir, source) = database;
        let target_dir = TempDir::new().unwrap();
        let target = Database::new(target_dir.path().join("objects").into_boxed_path());

        let oids = [
            source.put(ObjectType::Blob, Bytes::new()).unwrap(),
            source.put(ObjectType::Blob, Bytes::from(vec![7u8; 1 << 20])).unwrap(),
            source.put(ObjectType::Blob, Bytes::from_static(b"small")).unwrap(),
        ];

        let pack = source.compact(&oids).unwrap();
        target.unpack(&pack, 100).unwrap();

        for oid in &oids {
            assert_eq!(target.get(oid).unwrap(), source.get(oid).unwrap());
        }
    }
}
