//! Working tree migration
//!
//! Moves the working tree and index from one tree to another, given the
//! changes between them. Used by checkout, fast-forward and merge.
//!
//! Every change is checked before anything is touched. The migration
//! refuses to run when it would:
//! - overwrite a file whose index or working copy differs from both trees
//! - replace a directory holding untracked files
//! - overwrite or remove an untracked file

use crate::areas::index::Index;
use crate::areas::repository::Repository;
use crate::artifacts::checkout::conflict::ConflictType;
use crate::artifacts::database::database_entry::DatabaseEntry;
use crate::artifacts::diff::tree_diff::{ChangeSet, TreeChangeType};
use crate::artifacts::index::index_entry::IndexEntry;
use crate::artifacts::objects::object_id::ObjectId;
use crate::artifacts::status::file_change::{IndexChangeType, WorkspaceChangeType};
use crate::artifacts::status::inspector::Inspector;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ActionType {
    Add,
    Delete,
    Modify,
}

pub type ActionsSet = BTreeMap<ActionType, Vec<(PathBuf, Option<DatabaseEntry>)>>;

pub type ConflictsSet = BTreeMap<ConflictType, Vec<PathBuf>>;

pub struct Migration<'r> {
    repository: &'r Repository,
    changes: ChangeSet,
    index: &'r mut Index,
    inspector: Inspector<'r>,
    actions: ActionsSet,
    conflicts: ConflictsSet,
}

impl<'r> Migration<'r> {
    pub fn new(repository: &'r Repository, index: &'r mut Index, changes: ChangeSet) -> Self {
        Self {
            repository,
            index,
            changes,
            inspector: Inspector::new(repository),
            actions: BTreeMap::new(),
            conflicts: BTreeMap::new(),
        }
    }

    pub fn actions_of(&self, action: ActionType) -> &[(PathBuf, Option<DatabaseEntry>)] {
        self.actions.get(&action).map(Vec::as_slice).unwrap_or_default()
    }

    /// Plan, check, then update the working tree and the index
    pub fn apply_changes(&mut self) -> anyhow::Result<()> {
        self.plan_changes()?;
        self.repository.workspace().apply_migration(self)?;
        self.update_index()?;

        tracing::debug!(changes = self.changes.len(), "migrated working tree");
        Ok(())
    }

    fn plan_changes(&mut self) -> anyhow::Result<()> {
        let changes = std::mem::take(&mut self.changes);

        for (path, change) in &changes {
            self.check_for_conflict(path, change)?;
            self.record_change(path, change);
        }
        self.changes = changes;

        let errors = self.collect_errors();
        if !errors.is_empty() {
            let errors = errors
                .iter()
                .map(|error| format!("error: {error}"))
                .collect::<Vec<_>>()
                .join("\n\n");
            anyhow::bail!("{errors}\n\nAborting");
        }

        Ok(())
    }

    fn collect_errors(&self) -> Vec<String> {
        self.conflicts
            .iter()
            .filter(|(_, paths)| !paths.is_empty())
            .map(|(conflict_type, paths)| conflict_type.report(paths))
            .collect()
    }

    fn check_for_conflict(&mut self, path: &Path, change: &TreeChangeType) -> anyhow::Result<()> {
        let entry = self.index.entry_by_path(path).cloned();
        let entry = entry.as_ref();
        let old_entry = change.old_entry();
        let new_entry = change.new_entry();

        if self.index_differs_from_trees(entry, old_entry, new_entry) {
            self.conflicts.entry(ConflictType::StaleFile).or_default().push(path.into());
            return Ok(());
        }

        let stat = self.repository.workspace().stat_file(path).ok();
        let conflict_type = ConflictType::classify(
            entry.is_some(),
            stat.as_ref().is_some_and(|stat| stat.mode.is_tree()),
            new_entry.is_some(),
        );

        match stat {
            Some(stat) if stat.mode.is_tree() => {
                if self.inspector.is_trackable(path, &stat, self.index)? {
                    self.conflicts.entry(conflict_type).or_default().push(path.into());
                }
            }
            Some(stat) => {
                if self.inspector.check_index_against_workspace(entry, Some(&stat))?
                    != WorkspaceChangeType::None
                {
                    self.conflicts.entry(conflict_type).or_default().push(path.into());
                }
            }
            None => {
                if let Some(parent) = self.untracked_parent(path)? {
                    let reported = if entry.is_some() { path.to_path_buf() } else { parent };
                    self.conflicts.entry(conflict_type).or_default().push(reported);
                }
            }
        }

        Ok(())
    }

    /// An untracked file sitting where one of `path`'s directories must go
    fn untracked_parent(&self, path: &Path) -> anyhow::Result<Option<PathBuf>> {
        for parent in path.ancestors().skip(1) {
            if parent.as_os_str().is_empty() {
                break;
            }

            if let Ok(stat) = self.repository.workspace().stat_file(parent)
                && !stat.mode.is_tree()
                && self.inspector.is_trackable(parent, &stat, self.index)?
            {
                return Ok(Some(parent.to_path_buf()));
            }
        }

        Ok(None)
    }

    fn index_differs_from_trees(
        &self,
        index_entry: Option<&IndexEntry>,
        old_entry: Option<&DatabaseEntry>,
        new_entry: Option<&DatabaseEntry>,
    ) -> bool {
        self.inspector.check_index_against_head_tree(index_entry, old_entry) != IndexChangeType::None
            && self.inspector.check_index_against_head_tree(index_entry, new_entry) != IndexChangeType::None
    }

    fn record_change(&mut self, path: &Path, change: &TreeChangeType) {
        let (action, entry) = match change {
            TreeChangeType::Added(new_entry) => (ActionType::Add, Some(new_entry.clone())),
            TreeChangeType::Deleted(_) => (ActionType::Delete, None),
            TreeChangeType::Modified { new, .. } | TreeChangeType::TypeChanged { new, .. } => {
                (ActionType::Modify, Some(new.clone()))
            }
        };

        self.actions.entry(action).or_default().push((path.into(), entry));
    }

    fn update_index(&mut self) -> anyhow::Result<()> {
        for (file_path, _) in self.actions_of(ActionType::Delete).to_vec() {
            self.index.remove(&file_path);
        }

        for action in [ActionType::Add, ActionType::Modify] {
            for (file_path, entry) in self.actions_of(action).to_vec() {
                let Some(entry) = entry else {
                    anyhow::bail!("Entry must be provided for {action:?} actions");
                };
                let stat = self.repository.workspace().stat_file(&file_path)?;
                self.index.add(IndexEntry::new(file_path, entry.oid, stat));
            }
        }

        Ok(())
    }

    pub fn load_blob_data(&self, object_id: &ObjectId) -> anyhow::Result<Bytes> {
        Ok(self.repository.database().load_blob(object_id)?.into_content())
    }
}
