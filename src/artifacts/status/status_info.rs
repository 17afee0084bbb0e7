use crate::areas::index::Index;
use crate::areas::repository::Repository;
use crate::artifacts::database::database_entry::DatabaseEntry;
use crate::artifacts::index::index_entry::{EntryMetadata, IndexEntry, Stage};
use crate::artifacts::status::file_change::{
    FileChange, FileChangeType, IndexChangeType, UnmergedType, WorkspaceChangeType,
};
use crate::artifacts::status::inspector::Inspector;
use derive_new::new;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

pub type FileStatSet = BTreeMap<PathBuf, EntryMetadata>;
pub type ChangeSet = BTreeMap<PathBuf, FileChangeType>;
pub type FileSet = BTreeSet<PathBuf>;
pub type HeadTree = BTreeMap<PathBuf, DatabaseEntry>;

/// Three-way comparison of HEAD, index and working tree
#[derive(Debug, Clone, Default)]
pub struct StatusInfo {
    pub(crate) file_stats: FileStatSet,
    /// Untracked files, and untracked directories as `dir/`
    pub untracked_files: FileSet,
    pub changed_files: BTreeMap<PathBuf, FileChange>,
    pub unmerged_files: BTreeMap<PathBuf, UnmergedType>,
    pub head_tree: HeadTree,
}

impl StatusInfo {
    pub fn workspace_changeset(&self) -> ChangeSet {
        self.changed_files
            .iter()
            .filter(|(_, change)| change.workspace_change != WorkspaceChangeType::None)
            .map(|(file, change)| (file.clone(), FileChangeType::Workspace(change.workspace_change.clone())))
            .collect()
    }

    pub fn index_changeset(&self) -> ChangeSet {
        self.changed_files
            .iter()
            .filter(|(_, change)| change.index_change != IndexChangeType::None)
            .map(|(file, change)| (file.clone(), FileChangeType::Index(change.index_change.clone())))
            .collect()
    }

    pub fn has_staged_changes(&self) -> bool {
        self.changed_files
            .values()
            .any(|change| change.index_change != IndexChangeType::None)
    }

    pub fn is_clean(&self) -> bool {
        self.changed_files.is_empty() && self.unmerged_files.is_empty() && self.untracked_files.is_empty()
    }
}

#[derive(new)]
pub struct Status<'r> {
    repository: &'r Repository,
}

impl<'r> Status<'r> {
    /// Stat data refreshed along the way is written back into `index`;
    /// the caller decides whether to persist it
    pub fn initialize(&self, index: &mut Index) -> anyhow::Result<StatusInfo> {
        let inspector = Inspector::new(self.repository);
        let mut info = StatusInfo::default();

        self.scan_workspace(None, &mut info, index, &inspector)?;
        info.head_tree = self.load_head_tree()?;

        self.check_index_entries(&mut info, index, &inspector)?;
        self.collect_deleted_head_files(&mut info, index);
        self.collect_unmerged_files(&mut info, index);

        Ok(info)
    }

    fn scan_workspace(
        &self,
        prefix_path: Option<&Path>,
        info: &mut StatusInfo,
        index: &Index,
        inspector: &Inspector<'_>,
    ) -> anyhow::Result<()> {
        let entries = self.repository.workspace().list_dir(prefix_path)?;

        for (path, stat) in entries {
            if index.is_directly_tracked(&path) {
                if stat.mode.is_tree() {
                    self.scan_workspace(Some(&path), info, index, inspector)?;
                } else {
                    info.file_stats.insert(path, stat);
                }
            } else if inspector.is_trackable(&path, &stat, index)? {
                // untracked directories are reported once, with a separator
                let path = if stat.mode.is_tree() { path.join("") } else { path };
                info.untracked_files.insert(path);
            }
        }

        Ok(())
    }

    fn load_head_tree(&self) -> anyhow::Result<HeadTree> {
        let head = self.repository.refs().read_head()?;
        self.repository.database().flatten_tree(head.as_ref())
    }

    fn check_index_entries(
        &self,
        info: &mut StatusInfo,
        index: &mut Index,
        inspector: &Inspector<'_>,
    ) -> anyhow::Result<()> {
        let index_entries = index.merged_entries().cloned().collect::<Vec<IndexEntry>>();

        for entry in index_entries {
            let stat = info.file_stats.get(&entry.name).cloned();
            let change = inspector.check_index_against_workspace(Some(&entry), stat.as_ref())?;

            if change != WorkspaceChangeType::None {
                info.changed_files.entry(entry.name.clone()).or_default().workspace_change = change;
            } else if let Some(stat) = stat {
                index.update_entry_stat(&entry.name, stat);
            }

            let change = inspector.check_index_against_head_tree(Some(&entry), info.head_tree.get(&entry.name));
            if change != IndexChangeType::None {
                info.changed_files.entry(entry.name.clone()).or_default().index_change = change;
            }
        }

        Ok(())
    }

    fn collect_deleted_head_files(&self, info: &mut StatusInfo, index: &Index) {
        for path in info.head_tree.keys() {
            if !index.is_tracked_file(path) {
                info.changed_files.entry(path.clone()).or_default().index_change = IndexChangeType::Deleted;
            }
        }
    }

    fn collect_unmerged_files(&self, info: &mut StatusInfo, index: &Index) {
        for path in index.conflicted_paths() {
            let stages = Stage::CONFLICT_STAGES
                .into_iter()
                .filter(|stage| index.entry_by_stage(&path, *stage).is_some())
                .collect::<Vec<_>>();

            if let Some(kind) = UnmergedType::from_stages(&stages) {
                info.changed_files.remove(&path);
                info.unmerged_files.insert(path, kind);
            }
        }
    }
}
