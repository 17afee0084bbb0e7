use crate::areas::index::Index;
use crate::areas::repository::Repository;
use crate::artifacts::database::database_entry::DatabaseEntry;
use crate::artifacts::index::index_entry::{EntryMetadata, IndexEntry};
use crate::artifacts::objects::object::hash_object;
use crate::artifacts::objects::object_type::ObjectType;
use crate::artifacts::status::file_change::{IndexChangeType, WorkspaceChangeType};
use derive_new::new;
use std::path::Path;

/// Per-path change detection shared by status and checkout
#[derive(new)]
pub struct Inspector<'r> {
    repository: &'r Repository,
}

impl Inspector<'_> {
    /// Whether `path` is, or holds somewhere below it, a file the index
    /// does not track; empty directories hold nothing worth tracking
    pub fn is_trackable(&self, path: &Path, stat: &EntryMetadata, index: &Index) -> anyhow::Result<bool> {
        if !stat.mode.is_tree() {
            return Ok(!index.is_tracked_file(path));
        }

        let mut children = self.repository.workspace().list_dir(Some(path))?.into_iter().collect::<Vec<_>>();
        // files first: they answer without descending
        children.sort_by_key(|(_, child)| child.mode.is_tree());

        for (child, child_stat) in &children {
            if self.is_trackable(child, child_stat, index)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Compare a tracked entry with the file on disk
    ///
    /// Size or mode differences settle it; matching timestamps mean
    /// unchanged. Anything else is decided by hashing the content.
    pub fn check_index_against_workspace(
        &self,
        entry: Option<&IndexEntry>,
        stat: Option<&EntryMetadata>,
    ) -> anyhow::Result<WorkspaceChangeType> {
        let (entry, stat) = match (entry, stat) {
            (None, _) => return Ok(WorkspaceChangeType::Untracked),
            (Some(_), None) => return Ok(WorkspaceChangeType::Deleted),
            (Some(entry), Some(stat)) => (entry, stat),
        };

        let changed = if !entry.stat_match(stat) {
            true
        } else if entry.times_match(stat) {
            false
        } else {
            let content = self.repository.workspace().read_file(&entry.name)?;
            hash_object(ObjectType::Blob, &content) != entry.oid
        };

        Ok(if changed {
            WorkspaceChangeType::Modified
        } else {
            WorkspaceChangeType::None
        })
    }

    pub fn check_index_against_head_tree(
        &self,
        index_entry: Option<&IndexEntry>,
        head_entry: Option<&DatabaseEntry>,
    ) -> IndexChangeType {
        match (index_entry, head_entry) {
            (None, None) => IndexChangeType::None,
            (Some(_), None) => IndexChangeType::Added,
            (None, Some(_)) => IndexChangeType::Deleted,
            (Some(staged), Some(committed)) => {
                if (committed.mode, &committed.oid) == (staged.mode(), &staged.oid) {
                    IndexChangeType::None
                } else {
                    IndexChangeType::Modified
                }
            }
        }
    }
}
