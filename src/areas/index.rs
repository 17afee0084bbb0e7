//! Index (staging area)
//!
//! The index holds the snapshot the next commit will record: one stage-0
//! entry per tracked path, or up to three conflict stages for a path left
//! unmerged by a merge.
//!
//! ## Data Structures
//!
//! - `entries`: entries keyed by (path, stage), so a path's stages sit next
//!   to each other in file order
//! - `children`: directory path to the tracked paths below it, used to drop
//!   a directory's contents when a file replaces it

use crate::artifacts::database::database_entry::DatabaseEntry;
use crate::artifacts::index::checksum::Checksum;
use crate::artifacts::index::entry_mode::EntryMode;
use crate::artifacts::index::index_entry::{ENTRY_BLOCK, ENTRY_MIN_SIZE, IndexEntry, Stage};
use crate::artifacts::index::index_header::IndexHeader;
use crate::artifacts::objects::object::{Packable, Unpackable};
use std::collections::{BTreeMap, BTreeSet};
use std::io::Read;
use std::ops::DerefMut;
use std::path::{Path, PathBuf};

type EntryKey = (PathBuf, Stage);

#[derive(Debug, Clone)]
pub struct Index {
    /// `.knot/index`, or `index` inside a bare repository
    path: Box<Path>,
    entries: BTreeMap<EntryKey, IndexEntry>,
    children: BTreeMap<PathBuf, BTreeSet<PathBuf>>,
    /// Modified since it was loaded
    changed: bool,
}

impl Index {
    pub fn new(path: Box<Path>) -> Self {
        Index {
            path,
            entries: BTreeMap::new(),
            children: BTreeMap::new(),
            changed: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn has_changed(&self) -> bool {
        self.changed
    }

    /// The merged (stage 0) entry for `path`
    pub fn entry_by_path(&self, path: &Path) -> Option<&IndexEntry> {
        self.entries.get(&(path.to_path_buf(), Stage::Merged))
    }

    pub fn entry_by_stage(&self, path: &Path, stage: Stage) -> Option<&IndexEntry> {
        self.entries.get(&(path.to_path_buf(), stage))
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.children.clear();
        self.changed = false;
    }

    /// Load the index from disk, replacing whatever is in memory
    ///
    /// A missing or empty file is an empty index. The trailing checksum is
    /// verified.
    pub fn rehydrate(&mut self) -> anyhow::Result<()> {
        self.clear();

        if !self.path().exists() {
            return Ok(());
        }

        let mut index_file = std::fs::OpenOptions::new().read(true).open(self.path())?;
        let mut lock = file_guard::lock(&mut index_file, file_guard::Lock::Shared, 0, 1)?;

        if lock.deref_mut().metadata()?.len() == 0 {
            return Ok(());
        }

        let mut reader = Checksum::new(lock.deref_mut());
        let entries_count = self.parse_header(&mut reader)?;
        self.parse_entries(entries_count, &mut reader)?;

        reader.verify()
    }

    /// Whether `path` is a tracked file or a directory containing tracked files
    pub fn is_directly_tracked(&self, path: &Path) -> bool {
        self.is_tracked_file(path) || self.children.contains_key(path)
    }

    /// Whether `path` has an entry at any stage
    pub fn is_tracked_file(&self, path: &Path) -> bool {
        self.stages_of(path).next().is_some()
    }

    fn stages_of<'i>(&'i self, path: &'i Path) -> impl Iterator<Item = &'i IndexEntry> + 'i {
        [Stage::Merged, Stage::Base, Stage::Ours, Stage::Theirs]
            .into_iter()
            .filter_map(move |stage| self.entries.get(&(path.to_path_buf(), stage)))
    }

    fn parse_header(&self, reader: &mut Checksum<impl Read>) -> anyhow::Result<u32> {
        let header_bytes = reader.read(crate::artifacts::index::HEADER_SIZE)?;
        let header = IndexHeader::deserialize(std::io::Cursor::new(header_bytes))?;
        Ok(header.entries_count)
    }

    /// Entries are variable-length and padded to 8 bytes; the last byte of
    /// every entry is a NUL
    fn parse_entries(&mut self, entries_count: u32, reader: &mut Checksum<impl Read>) -> anyhow::Result<()> {
        for _ in 0..entries_count {
            let mut entry_bytes = reader.read(ENTRY_MIN_SIZE)?.to_vec();

            while entry_bytes[entry_bytes.len() - 1] != 0 {
                entry_bytes.extend_from_slice(&reader.read(ENTRY_BLOCK)?);
            }

            let entry = IndexEntry::deserialize(std::io::Cursor::new(entry_bytes))?;
            self.store_entry(entry);
        }

        Ok(())
    }

    /// Drop entries that would clash with `path` becoming a file: files at
    /// its parent directories and anything below it
    fn discard_conflicts(&mut self, path: &Path) {
        let parents = path
            .ancestors()
            .skip(1)
            .filter(|dir| !dir.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .collect::<Vec<_>>();

        for parent in parents {
            self.remove_entry(&parent);
        }
        self.remove_children(path);
    }

    fn store_entry(&mut self, entry: IndexEntry) {
        for parent in entry.parent_dirs() {
            self.children
                .entry(parent.to_path_buf())
                .or_default()
                .insert(entry.name.clone());
        }

        self.entries
            .insert((entry.name.clone(), entry.stage), entry);
    }

    fn remove_children(&mut self, path: &Path) {
        if let Some(children) = self.children.remove(path) {
            for child in children {
                self.remove_entry(&child);
            }
        }
    }

    /// Remove every stage of `path`
    fn remove_entry(&mut self, path: &Path) {
        let mut removed = None;
        for stage in [Stage::Merged, Stage::Base, Stage::Ours, Stage::Theirs] {
            if let Some(entry) = self.entries.remove(&(path.to_path_buf(), stage)) {
                removed = Some(entry);
            }
        }

        let Some(entry) = removed else {
            return;
        };

        for parent in entry.parent_dirs() {
            if let Some(children) = self.children.get_mut(parent) {
                children.remove(path);
                if children.is_empty() {
                    self.children.remove(parent);
                }
            }
        }
    }

    /// Stage `entry` at stage 0, resolving any conflict on its path
    pub fn add(&mut self, mut entry: IndexEntry) {
        entry.stage = Stage::Merged;
        let path = entry.name.clone();

        self.discard_conflicts(&path);
        self.remove_entry(&path);
        self.store_entry(entry);

        self.changed = true;
    }

    /// Record an unmerged path: its base, our and their versions, any of
    /// which may be absent
    pub fn add_conflict_set(&mut self, path: &Path, versions: [Option<DatabaseEntry>; 3]) {
        self.remove_entry(path);

        for (stage, version) in Stage::CONFLICT_STAGES.into_iter().zip(versions) {
            if let Some(version) = version {
                self.store_entry(IndexEntry::conflicted(
                    path.to_path_buf(),
                    version.oid,
                    version.mode,
                    stage,
                ));
            }
        }

        self.changed = true;
    }

    /// Untrack `path` (a file or a directory of files)
    pub fn remove(&mut self, path: &Path) {
        self.remove_entry(path);
        self.remove_children(path);

        self.changed = true;
    }

    /// Replace the whole index with the entries of a flattened tree
    pub fn reset_to(&mut self, entries: impl IntoIterator<Item = IndexEntry>) {
        self.entries.clear();
        self.children.clear();
        for entry in entries {
            self.store_entry(entry);
        }

        self.changed = true;
    }

    pub fn write_updates(&mut self) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut index_file = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(self.path())?;
        let mut lock = file_guard::lock(&mut index_file, file_guard::Lock::Exclusive, 0, 1)?;

        let mut writer = Checksum::new(lock.deref_mut());

        writer.write(&IndexHeader::for_entries(self.entries.len())?.serialize()?)?;

        for entry in self.entries.values() {
            writer.write(&entry.serialize()?)?;
        }

        writer.write_checksum()?;
        self.changed = false;

        Ok(())
    }

    pub fn update_entry_stat(&mut self, path: &Path, stat: crate::artifacts::index::index_entry::EntryMetadata) {
        if let Some(existing_entry) = self.entries.get_mut(&(path.to_path_buf(), Stage::Merged)) {
            existing_entry.metadata = stat;
            self.changed = true;
        }
    }

    /// All entries in (path, stage) order
    pub fn entries(&self) -> impl Iterator<Item = &IndexEntry> {
        self.entries.values()
    }

    /// Stage-0 entries only
    pub fn merged_entries(&self) -> impl Iterator<Item = &IndexEntry> {
        self.entries
            .values()
            .filter(|entry| entry.stage == Stage::Merged)
    }

    pub fn is_conflicted(&self) -> bool {
        self.entries.values().any(IndexEntry::is_conflicted)
    }

    pub fn conflicted_paths(&self) -> BTreeSet<PathBuf> {
        self.entries
            .values()
            .filter(|entry| entry.is_conflicted())
            .map(|entry| entry.name.clone())
            .collect()
    }

    /// Stage-0 entries as tree entries, ready for `Tree::build`
    pub fn tree_entries(&self) -> Vec<(PathBuf, DatabaseEntry)> {
        self.merged_entries()
            .map(|entry| (entry.name.clone(), DatabaseEntry::new(entry.oid.clone(), entry.mode())))
            .collect()
    }

    /// Tracked paths equal to or below `path`; `.` selects everything
    pub fn entries_under_path(&self, path: &Path) -> Vec<PathBuf> {
        self.entries
            .keys()
            .map(|(entry_path, _)| entry_path)
            .filter(|entry_path| path == Path::new(".") || entry_path.starts_with(path))
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::index::entry_mode::FileMode;
    use crate::artifacts::index::index_entry::EntryMetadata;
    use crate::artifacts::objects::object_id::ObjectId;
    use assert_fs::TempDir;
    use pretty_assertions::assert_eq;
    use rstest::{fixture, rstest};

    struct Fixture {
        _dir: TempDir,
        index: Index,
    }

    #[fixture]
    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let index = Index::new(dir.path().join("index").into_boxed_path());
        Fixture { _dir: dir, index }
    }

    fn entry(path: &str) -> IndexEntry {
        IndexEntry::new(
            PathBuf::from(path),
            ObjectId::digest(path.as_bytes()),
            EntryMetadata {
                mode: EntryMode::File(FileMode::Regular),
                ..Default::default()
            },
        )
    }

    fn paths(index: &Index) -> Vec<String> {
        index
            .entries()
            .map(|entry| entry.name.to_string_lossy().to_string())
            .collect()
    }

    #[rstest]
    fn file_replaces_directory_of_same_name(mut fixture: Fixture) {
        fixture.index.add(entry("alice.txt"));
        fixture.index.add(entry("nested/bob.txt"));
        fixture.index.add(entry("nested/inner/claire.txt"));

        fixture.index.add(entry("nested"));

        assert_eq!(paths(&fixture.index), vec!["alice.txt", "nested"]);
    }

    #[rstest]
    fn directory_replaces_file_of_same_name(mut fixture: Fixture) {
        fixture.index.add(entry("alice.txt"));
        fixture.index.add(entry("bob.txt"));

        fixture.index.add(entry("alice.txt/nested.txt"));

        assert_eq!(paths(&fixture.index), vec!["alice.txt/nested.txt", "bob.txt"]);
    }

    #[rstest]
    fn staging_a_path_resolves_its_conflict(mut fixture: Fixture) {
        let base = DatabaseEntry::new(ObjectId::digest(b"base"), EntryMode::File(FileMode::Regular));
        let ours = DatabaseEntry::new(ObjectId::digest(b"ours"), EntryMode::File(FileMode::Regular));
        fixture.index.add(entry("f.txt"));
        fixture
            .index
            .add_conflict_set(Path::new("f.txt"), [Some(base), Some(ours), None]);

        assert!(fixture.index.is_conflicted());
        assert!(fixture.index.entry_by_path(Path::new("f.txt")).is_none());
        assert_eq!(fixture.index.len(), 2);
        assert!(fixture.index.tree_entries().is_empty());

        fixture.index.add(entry("f.txt"));

        assert!(!fixture.index.is_conflicted());
        assert_eq!(fixture.index.len(), 1);
    }

    #[rstest]
    fn removing_a_directory_untracks_its_files(mut fixture: Fixture) {
        fixture.index.add(entry("a/b.txt"));
        fixture.index.add(entry("a/c/d.txt"));
        fixture.index.add(entry("e.txt"));

        fixture.index.remove(Path::new("a"));

        assert_eq!(paths(&fixture.index), vec!["e.txt"]);
        assert!(!fixture.index.is_directly_tracked(Path::new("a")));
    }

    #[rstest]
    fn written_index_reloads_with_stages(mut fixture: Fixture) {
        let ours = DatabaseEntry::new(ObjectId::digest(b"ours"), EntryMode::File(FileMode::Regular));
        let theirs = DatabaseEntry::new(ObjectId::digest(b"theirs"), EntryMode::File(FileMode::Executable));
        fixture.index.add(entry("a/b.txt"));
        fixture
            .index
            .add_conflict_set(Path::new("c.txt"), [None, Some(ours), Some(theirs)]);
        fixture.index.write_updates().unwrap();

        let mut reloaded = Index::new(fixture.index.path().to_path_buf().into_boxed_path());
        reloaded.rehydrate().unwrap();

        assert_eq!(reloaded.len(), 3);
        assert_eq!(
            reloaded.conflicted_paths(),
            BTreeSet::from([PathBuf::from("c.txt")])
        );
        assert_eq!(
            reloaded
                .entry_by_stage(Path::new("c.txt"), Stage::Theirs)
                .map(IndexEntry::mode),
            Some(EntryMode::File(FileMode::Executable))
        );
        assert!(reloaded.is_directly_tracked(Path::new("a")));
    }

    #[rstest]
    fn corrupted_index_fails_checksum(mut fixture: Fixture) {
        fixture.index.add(entry("a.txt"));
        fixture.index.write_updates().unwrap();

        let mut bytes = std::fs::read(fixture.index.path()).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        std::fs::write(fixture.index.path(), bytes).unwrap();

        assert!(fixture.index.rehydrate().is_err());
    }
}
