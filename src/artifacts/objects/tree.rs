//! Tree object
//!
//! Trees represent directory snapshots. They contain entries for files (blobs)
//! and subdirectories (other trees), along with their names and modes.
//!
//! ## Format
//!
//! On disk: `tree <size>\0<entries>`
//! Each entry: `<mode> <name>\0<20-byte-sha1>`
//!
//! ## Canonical order
//!
//! Entries are kept in a `BTreeMap` keyed by name, with directories keyed as
//! `name/`. Serialization walks the map in order, so two trees holding the
//! same entries always serialize, and therefore hash, identically.
//!
//! ## Tree Building
//!
//! [`Tree::build`] turns a flat list of `(path, entry)` pairs (from the index
//! or from a merge result) into nested trees. Subtree IDs are computed while
//! building, and the subtrees are kept so [`Tree::traverse`] can store them
//! children first.

use crate::artifacts::database::database_entry::DatabaseEntry;
use crate::artifacts::index::entry_mode::EntryMode;
use crate::artifacts::objects::object::Unpackable;
use crate::artifacts::objects::object::{Object, Packable};
use crate::artifacts::objects::object_id::ObjectId;
use crate::artifacts::objects::object_type::ObjectType;
use crate::errors::RepositoryError;
use anyhow::Context;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::io::{BufRead, Write};
use std::path::{Component, Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tree {
    /// Entries by sort key (`name` for blobs, `name/` for trees)
    entries: BTreeMap<String, DatabaseEntry>,
    /// Subtrees produced by `build`, by plain name; empty for trees read from the database
    subtrees: BTreeMap<String, Tree>,
}

/// Directory node while a tree is being assembled from flat paths
#[derive(Default)]
struct PendingDirectory {
    files: BTreeMap<String, DatabaseEntry>,
    directories: BTreeMap<String, PendingDirectory>,
}

impl PendingDirectory {
    fn insert(&mut self, components: &[String], entry: DatabaseEntry) -> anyhow::Result<()> {
        match components {
            [] => Err(anyhow::anyhow!("empty path in tree")),
            [name] => {
                if self.directories.contains_key(name) {
                    return Err(RepositoryError::InvalidObject(format!(
                        "{name} is both a file and a directory"
                    ))
                    .into());
                }
                self.files.insert(name.clone(), entry);
                Ok(())
            }
            [directory, rest @ ..] => {
                if self.files.contains_key(directory) {
                    return Err(RepositoryError::InvalidObject(format!(
                        "{directory} is both a file and a directory"
                    ))
                    .into());
                }
                self.directories
                    .entry(directory.clone())
                    .or_default()
                    .insert(rest, entry)
            }
        }
    }

    fn finish(self) -> anyhow::Result<Tree> {
        let mut tree = Tree::default();

        for (name, entry) in self.files {
            tree.entries.insert(name, entry);
        }
        for (name, directory) in self.directories {
            let subtree = directory.finish()?;
            let oid = subtree.object_id()?;
            tree.entries
                .insert(format!("{name}/"), DatabaseEntry::new(oid, EntryMode::Directory));
            tree.subtrees.insert(name, subtree);
        }

        Ok(tree)
    }
}

impl Tree {
    /// Build nested trees from flat `(path, entry)` pairs
    ///
    /// Fails when a path would be both a file and a directory.
    pub fn build(entries: impl IntoIterator<Item = (PathBuf, DatabaseEntry)>) -> anyhow::Result<Self> {
        let mut root = PendingDirectory::default();

        for (path, entry) in entries {
            root.insert(&path_components(&path)?, entry)?;
        }

        root.finish()
    }

    /// A single-level tree from `(name, entry)` pairs
    pub fn from_entries(entries: impl IntoIterator<Item = (String, DatabaseEntry)>) -> Self {
        let entries = entries
            .into_iter()
            .map(|(name, entry)| (sort_key(&name, &entry), entry))
            .collect();

        Self {
            entries,
            subtrees: BTreeMap::new(),
        }
    }

    /// Visit built subtrees depth-first, children before parents
    ///
    /// Child IDs must be stored before the parent that references them.
    pub fn traverse<F>(&self, func: &mut F) -> anyhow::Result<()>
    where
        F: FnMut(&Tree) -> anyhow::Result<()>,
    {
        for subtree in self.subtrees.values() {
            subtree.traverse(func)?;
        }
        func(self)
    }

    /// Entries in canonical order, by plain name
    pub fn entries(&self) -> impl Iterator<Item = (&str, &DatabaseEntry)> {
        self.entries
            .iter()
            .map(|(key, entry)| (key.trim_end_matches('/'), entry))
    }

    pub fn into_entries(self) -> impl Iterator<Item = (String, DatabaseEntry)> {
        self.entries.into_iter().map(|(mut key, entry)| {
            if key.ends_with('/') {
                key.pop();
            }
            (key, entry)
        })
    }

    pub fn entry(&self, name: &str) -> Option<&DatabaseEntry> {
        self.entries
            .get(name)
            .or_else(|| self.entries.get(&format!("{name}/")))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

fn sort_key(name: &str, entry: &DatabaseEntry) -> String {
    if entry.is_tree() {
        format!("{name}/")
    } else {
        name.to_string()
    }
}

fn path_components(path: &Path) -> anyhow::Result<Vec<String>> {
    path.components()
        .filter(|component| !matches!(component, Component::CurDir))
        .map(|component| match component {
            Component::Normal(name) => name
                .to_str()
                .map(str::to_string)
                .with_context(|| format!("non UTF-8 path {}", path.display())),
            _ => Err(anyhow::anyhow!("invalid path in tree: {}", path.display())),
        })
        .collect()
}

impl Packable for Tree {
    fn serialize(&self) -> anyhow::Result<Bytes> {
        let mut content = Vec::new();

        for (key, entry) in &self.entries {
            let name = key.trim_end_matches('/');
            write!(content, "{:o} {}", entry.mode.as_u32(), name)?;
            content.push(0);
            entry.oid.write_h40_to(&mut content)?;
        }

        Ok(Bytes::from(content))
    }
}

impl Unpackable for Tree {
    fn deserialize(mut reader: impl BufRead) -> anyhow::Result<Self> {
        let mut entries = BTreeMap::new();

        // Reuse scratch buffers to reduce allocs
        let mut mode_bytes = Vec::new();
        let mut name_bytes = Vec::new();

        loop {
            mode_bytes.clear();
            let n = reader.read_until(b' ', &mut mode_bytes)?;
            if n == 0 {
                break;
            }
            if mode_bytes.pop() != Some(b' ') {
                return Err(RepositoryError::InvalidObject("unexpected EOF in tree mode".into()).into());
            }
            let mode = EntryMode::from_octal_str(std::str::from_utf8(&mode_bytes)?)?;

            name_bytes.clear();
            reader.read_until(b'\0', &mut name_bytes)?;
            if name_bytes.pop() != Some(b'\0') {
                return Err(RepositoryError::InvalidObject("unexpected EOF in tree name".into()).into());
            }
            let name = std::str::from_utf8(&name_bytes)?.to_owned();

            let oid =
                ObjectId::read_h40_from(&mut reader).context("unexpected EOF in object id")?;
            let entry = DatabaseEntry::new(oid, mode);

            entries.insert(sort_key(&name, &entry), entry);
        }

        Ok(Tree {
            entries,
            subtrees: BTreeMap::new(),
        })
    }
}

impl Object for Tree {
    fn object_type(&self) -> ObjectType {
        ObjectType::Tree
    }

    fn display(&self) -> String {
        self.entries()
            .map(|(name, entry)| format!("{entry}\t{name}"))
            .collect::<Vec<String>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::index::entry_mode::FileMode;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn blob_entry(seed: &str) -> DatabaseEntry {
        DatabaseEntry::new(
            ObjectId::digest(seed.as_bytes()),
            EntryMode::File(FileMode::Regular),
        )
    }

    #[test]
    fn build_nests_directories() {
        let tree = Tree::build([
            (PathBuf::from("a/b/c.txt"), blob_entry("c")),
            (PathBuf::from("a/d.txt"), blob_entry("d")),
            (PathBuf::from("e.txt"), blob_entry("e")),
        ])
        .unwrap();

        let names = tree.entries().map(|(name, _)| name).collect::<Vec<_>>();
        assert_eq!(names, vec!["a", "e.txt"]);
        assert!(tree.entry("a").unwrap().is_tree());

        let mut visited = Vec::new();
        tree.traverse(&mut |subtree| {
            visited.push(subtree.len());
            Ok(())
        })
        .unwrap();
        assert_eq!(visited, vec![1, 2, 2]);
    }

    #[test]
    fn build_rejects_file_directory_clash() {
        let result = Tree::build([
            (PathBuf::from("a"), blob_entry("a")),
            (PathBuf::from("a/b"), blob_entry("b")),
        ]);

        assert!(result.is_err());
    }

    #[test]
    fn deserialize_reads_back_serialized_entries() {
        let tree = Tree::build([
            (PathBuf::from("dir/x"), blob_entry("x")),
            (PathBuf::from("dir.txt"), blob_entry("y")),
        ])
        .unwrap();

        let bytes = tree.serialize().unwrap();
        let parsed = Tree::deserialize(&bytes[..]).unwrap();

        assert_eq!(parsed.object_id().unwrap(), tree.object_id().unwrap());
        assert_eq!(
            parsed.entries().map(|(name, _)| name).collect::<Vec<_>>(),
            vec!["dir.txt", "dir"]
        );
    }

    proptest! {
        #[test]
        fn digest_ignores_insertion_order(names in proptest::collection::btree_set("[a-z]{1,8}", 1..12)) {
            let forward = names
                .iter()
                .map(|name| (PathBuf::from(name), blob_entry(name)))
                .collect::<Vec<_>>();
            let mut backward = forward.clone();
            backward.reverse();

            let left = Tree::build(forward).unwrap();
            let right = Tree::build(backward).unwrap();

            prop_assert_eq!(left.object_id().unwrap(), right.object_id().unwrap());
        }
    }
}
