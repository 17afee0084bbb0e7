//! Three-way merge of flattened trees
//!
//! Each path is compared across base, ours and theirs:
//!
//! | base | ours | theirs | result                  |
//! |------|------|--------|-------------------------|
//! | any  | X    | X      | X                       |
//! | X    | X    | Y      | Y                       |
//! | X    | Y    | X      | Y                       |
//! | X    | Y    | Z      | line merge or conflict  |
//!
//! Paths that end up as a file on one side and a directory on the other
//! are conflicts too: the directory wins its place and the file is moved
//! aside to `<path>~<label>` in the working tree.

use crate::areas::database::Database;
use crate::artifacts::database::database_entry::DatabaseEntry;
use crate::artifacts::index::entry_mode::EntryMode;
use crate::artifacts::merge::diff3::{self, MergeLabels};
use crate::artifacts::objects::blob::Blob;
use crate::artifacts::objects::object_id::ObjectId;
use crate::artifacts::objects::object_type::ObjectType;
use bytes::Bytes;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};

pub type FlatTree = BTreeMap<PathBuf, DatabaseEntry>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConflictKind {
    /// Both sides changed the same lines
    Content,
    /// Both sides added different content at a path the base lacks
    AddAdd,
    /// One side changed what the other deleted
    ModifyDelete,
    /// A file on one side where the other side has a directory
    DirectoryFile,
    /// Both sides changed the file mode differently
    Mode,
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConflictKind::Content => "content",
            ConflictKind::AddAdd => "add/add",
            ConflictKind::ModifyDelete => "modify/delete",
            ConflictKind::DirectoryFile => "file/directory",
            ConflictKind::Mode => "mode",
        };
        write!(f, "{label}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathConflict {
    pub kind: ConflictKind,
    pub base: Option<DatabaseEntry>,
    pub ours: Option<DatabaseEntry>,
    pub theirs: Option<DatabaseEntry>,
    /// What the working tree holds for this path after the merge, and where
    pub workspace: Option<(PathBuf, DatabaseEntry)>,
}

impl PathConflict {
    pub fn stages(&self) -> [Option<DatabaseEntry>; 3] {
        [self.base.clone(), self.ours.clone(), self.theirs.clone()]
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeMergeResult {
    /// Resolved entries
    pub merged: FlatTree,
    pub conflicts: BTreeMap<PathBuf, PathConflict>,
}

impl TreeMergeResult {
    pub fn is_clean(&self) -> bool {
        self.conflicts.is_empty()
    }

    /// Resolved entries plus the working tree version of every conflict
    pub fn workspace_tree(&self) -> FlatTree {
        let mut tree = self.merged.clone();
        for conflict in self.conflicts.values() {
            if let Some((path, entry)) = &conflict.workspace {
                tree.insert(path.clone(), entry.clone());
            }
        }
        tree
    }

    /// A tree standing in for the result, conflicts included: used as a
    /// virtual merge base
    pub fn virtual_tree(&self) -> FlatTree {
        let mut tree = self.merged.clone();
        for (path, conflict) in &self.conflicts {
            if conflict.kind == ConflictKind::DirectoryFile {
                continue;
            }
            if let Some((_, entry)) = &conflict.workspace {
                tree.insert(path.clone(), entry.clone());
            }
        }
        tree
    }
}

pub struct TreeMerge<'r> {
    database: &'r Database,
    labels: MergeLabels,
}

impl<'r> TreeMerge<'r> {
    pub fn new(database: &'r Database, labels: MergeLabels) -> Self {
        Self { database, labels }
    }

    pub fn merge(&self, base: &FlatTree, ours: &FlatTree, theirs: &FlatTree) -> anyhow::Result<TreeMergeResult> {
        let paths = base
            .keys()
            .chain(ours.keys())
            .chain(theirs.keys())
            .cloned()
            .collect::<BTreeSet<_>>();
        let mut result = TreeMergeResult::default();

        for path in paths {
            let base_entry = base.get(&path);
            let ours_entry = ours.get(&path);
            let theirs_entry = theirs.get(&path);

            if ours_entry == theirs_entry || base_entry == theirs_entry {
                if let Some(entry) = ours_entry {
                    result.merged.insert(path, entry.clone());
                }
            } else if base_entry == ours_entry {
                if let Some(entry) = theirs_entry {
                    result.merged.insert(path, entry.clone());
                }
            } else {
                self.merge_path(&path, base_entry, ours_entry, theirs_entry, &mut result)?;
            }
        }

        self.resolve_directory_file(ours, theirs, &mut result);

        tracing::debug!(
            merged = result.merged.len(),
            conflicts = result.conflicts.len(),
            "trees merged"
        );
        Ok(result)
    }

    fn merge_path(
        &self,
        path: &Path,
        base: Option<&DatabaseEntry>,
        ours: Option<&DatabaseEntry>,
        theirs: Option<&DatabaseEntry>,
        result: &mut TreeMergeResult,
    ) -> anyhow::Result<()> {
        let conflict = |kind, workspace: Option<DatabaseEntry>| PathConflict {
            kind,
            base: base.cloned(),
            ours: ours.cloned(),
            theirs: theirs.cloned(),
            workspace: workspace.map(|entry| (path.to_path_buf(), entry)),
        };

        let (Some(ours), Some(theirs)) = (ours, theirs) else {
            let survivor = ours.or(theirs).cloned();
            result
                .conflicts
                .insert(path.to_path_buf(), conflict(ConflictKind::ModifyDelete, survivor));
            return Ok(());
        };

        let (mode, mode_conflict) = merge_modes(base.map(|entry| entry.mode), ours.mode, theirs.mode);
        let (content, content_conflict) = self.merge_content(path, base, ours, theirs)?;
        let entry = DatabaseEntry::new(content, mode);

        if content_conflict {
            let kind = if base.is_some() {
                ConflictKind::Content
            } else {
                ConflictKind::AddAdd
            };
            result.conflicts.insert(path.to_path_buf(), conflict(kind, Some(entry)));
        } else if mode_conflict {
            result
                .conflicts
                .insert(path.to_path_buf(), conflict(ConflictKind::Mode, Some(entry)));
        } else {
            result.merged.insert(path.to_path_buf(), entry);
        }

        Ok(())
    }

    /// Merged blob ID and whether it holds conflict markers; binary files
    /// are not line-merged and keep our version
    fn merge_content(
        &self,
        path: &Path,
        base: Option<&DatabaseEntry>,
        ours: &DatabaseEntry,
        theirs: &DatabaseEntry,
    ) -> anyhow::Result<(ObjectId, bool)> {
        if ours.oid == theirs.oid {
            return Ok((ours.oid.clone(), false));
        }
        if let Some(base) = base {
            if base.oid == ours.oid {
                return Ok((theirs.oid.clone(), false));
            }
            if base.oid == theirs.oid {
                return Ok((ours.oid.clone(), false));
            }
        }

        let base_blob = match base {
            Some(base) => self.database.load_blob(&base.oid)?,
            None => Blob::new(Bytes::new()),
        };
        let ours_blob = self.database.load_blob(&ours.oid)?;
        let theirs_blob = self.database.load_blob(&theirs.oid)?;

        if base_blob.is_binary() || ours_blob.is_binary() || theirs_blob.is_binary() {
            tracing::debug!(path = %path.display(), "binary conflict keeps ours");
            return Ok((ours.oid.clone(), true));
        }

        let merged = diff3::merge(base_blob.content(), ours_blob.content(), theirs_blob.content());
        let oid = self
            .database
            .put(ObjectType::Blob, Bytes::from(merged.to_bytes(&self.labels)))?;

        Ok((oid, !merged.is_clean()))
    }

    /// Move files that block a directory out of the way
    fn resolve_directory_file(&self, ours: &FlatTree, theirs: &FlatTree, result: &mut TreeMergeResult) {
        let directories = result
            .workspace_tree()
            .keys()
            .flat_map(|path| {
                path.ancestors()
                    .skip(1)
                    .filter(|dir| !dir.as_os_str().is_empty())
                    .map(Path::to_path_buf)
                    .collect::<Vec<_>>()
            })
            .collect::<BTreeSet<_>>();

        let blocked = result
            .workspace_tree()
            .into_keys()
            .filter(|path| directories.contains(path))
            .collect::<Vec<_>>();

        for path in blocked {
            let (label, entry) = if ours.contains_key(&path) && !has_children(ours, &path) {
                (&self.labels.ours, ours.get(&path))
            } else {
                (&self.labels.theirs, theirs.get(&path))
            };
            let Some(entry) = entry.cloned().or_else(|| result.merged.get(&path).cloned()) else {
                continue;
            };
            let aside = PathBuf::from(format!("{}~{}", path.display(), sanitize_label(label)));

            result.merged.remove(&path);
            let previous = result.conflicts.remove(&path);
            result.conflicts.insert(
                path.clone(),
                PathConflict {
                    kind: ConflictKind::DirectoryFile,
                    base: previous.as_ref().and_then(|conflict| conflict.base.clone()),
                    ours: ours.get(&path).cloned(),
                    theirs: theirs.get(&path).cloned(),
                    workspace: Some((aside, entry)),
                },
            );
        }
    }
}

fn has_children(tree: &FlatTree, path: &Path) -> bool {
    tree.keys().any(|other| other != path && other.starts_with(path))
}

fn sanitize_label(label: &str) -> String {
    label.replace(['/', '\\'], "_")
}

/// Merged mode and whether both sides changed it differently
fn merge_modes(base: Option<EntryMode>, ours: EntryMode, theirs: EntryMode) -> (EntryMode, bool) {
    if ours == theirs || base == Some(theirs) {
        (ours, false)
    } else if base == Some(ours) {
        (theirs, false)
    } else {
        (ours, true)
    }
}
