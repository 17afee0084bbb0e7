//! Structural tree comparison
//!
//! Both trees are walked together over the union of their names. A
//! subtree is opened only when its oid differs on the two sides.

use crate::areas::database::Database;
use crate::artifacts::database::database_entry::DatabaseEntry;
use crate::artifacts::index::entry_mode::{EntryMode, FileMode};
use crate::artifacts::objects::object_id::ObjectId;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeChangeType {
    Added(DatabaseEntry),
    Deleted(DatabaseEntry),
    Modified {
        old: DatabaseEntry,
        new: DatabaseEntry,
    },
    /// Same path, different kind of file (symlink vs regular file)
    TypeChanged {
        old: DatabaseEntry,
        new: DatabaseEntry,
    },
}

impl TreeChangeType {
    pub fn from_entries(old: Option<DatabaseEntry>, new: Option<DatabaseEntry>) -> Option<Self> {
        match (old, new) {
            (None, Some(new)) => Some(TreeChangeType::Added(new)),
            (Some(old), None) => Some(TreeChangeType::Deleted(old)),
            (Some(old), Some(new)) if is_symlink(&old.mode) != is_symlink(&new.mode) => {
                Some(TreeChangeType::TypeChanged { old, new })
            }
            (Some(old), Some(new)) if old != new => Some(TreeChangeType::Modified { old, new }),
            _ => None,
        }
    }

    pub fn old_entry(&self) -> Option<&DatabaseEntry> {
        match self {
            TreeChangeType::Deleted(entry) => Some(entry),
            TreeChangeType::Modified { old, .. } | TreeChangeType::TypeChanged { old, .. } => Some(old),
            TreeChangeType::Added(_) => None,
        }
    }

    pub fn new_entry(&self) -> Option<&DatabaseEntry> {
        match self {
            TreeChangeType::Added(entry) => Some(entry),
            TreeChangeType::Modified { new, .. } | TreeChangeType::TypeChanged { new, .. } => Some(new),
            TreeChangeType::Deleted(_) => None,
        }
    }

    pub fn status_char(&self) -> char {
        match self {
            TreeChangeType::Added(_) => 'A',
            TreeChangeType::Deleted(_) => 'D',
            TreeChangeType::Modified { .. } => 'M',
            TreeChangeType::TypeChanged { .. } => 'T',
        }
    }
}

fn is_symlink(mode: &EntryMode) -> bool {
    matches!(mode, EntryMode::File(FileMode::Symlink))
}

pub type ChangeSet = BTreeMap<PathBuf, TreeChangeType>;
pub type TreeEntryMap = BTreeMap<String, DatabaseEntry>;

#[derive(Debug)]
pub struct TreeDiff<'r> {
    database: &'r Database,
    change_set: ChangeSet,
}

impl<'r> TreeDiff<'r> {
    pub fn new(database: &'r Database) -> Self {
        TreeDiff {
            database,
            change_set: ChangeSet::new(),
        }
    }

    pub fn changes(&self) -> &ChangeSet {
        &self.change_set
    }

    pub fn into_changes(self) -> ChangeSet {
        self.change_set
    }

    /// Compare two trees (or commits, which are peeled to their trees)
    pub fn compare_oids(
        &mut self,
        old: Option<&ObjectId>,
        new: Option<&ObjectId>,
        prefix: &Path,
    ) -> anyhow::Result<()> {
        if old == new {
            return Ok(());
        }

        let old = self.entries_of(old)?;
        let new = self.entries_of(new)?;
        let names = old.keys().chain(new.keys()).collect::<BTreeSet<_>>();

        for name in names {
            let (before, after) = (old.get(name), new.get(name));
            if before == after {
                continue;
            }

            // a path may hold a tree on one side and a blob on the other;
            // each half is compared on its own
            let path = prefix.join(name);
            self.compare_oids(subtree(before), subtree(after), &path)?;

            if let Some(change) = TreeChangeType::from_entries(blob(before), blob(after)) {
                self.change_set.insert(path, change);
            }
        }

        Ok(())
    }

    fn entries_of(&self, oid: Option<&ObjectId>) -> anyhow::Result<TreeEntryMap> {
        let Some(oid) = oid else {
            return Ok(TreeEntryMap::new());
        };
        let tree = self.database.load_tree(&self.database.peel_to_tree(oid)?)?;
        Ok(tree.into_entries().collect())
    }
}

fn subtree(entry: Option<&DatabaseEntry>) -> Option<&ObjectId> {
    entry.filter(|entry| entry.is_tree()).map(|entry| &entry.oid)
}

fn blob(entry: Option<&DatabaseEntry>) -> Option<DatabaseEntry> {
    entry.filter(|entry| !entry.is_tree()).cloned()
}

/// Changes between two already-flattened trees
pub fn diff_flat_trees(
    old: &BTreeMap<PathBuf, DatabaseEntry>,
    new: &BTreeMap<PathBuf, DatabaseEntry>,
) -> ChangeSet {
    let paths = old.keys().chain(new.keys()).collect::<BTreeSet<_>>();

    paths
        .into_iter()
        .filter_map(|path| {
            TreeChangeType::from_entries(old.get(path).cloned(), new.get(path).cloned())
                .map(|change| (path.clone(), change))
        })
        .collect()
}
