use crate::areas::index::Index;
use crate::areas::repository::Repository;
use crate::artifacts::branch::branch_name::RefName;
use crate::artifacts::branch::revision::Revision;
use crate::artifacts::checkout::migration::Migration;
use crate::artifacts::diff::tree_diff::diff_flat_trees;
use crate::artifacts::merge::diff3::MergeLabels;
use crate::artifacts::merge::recursive::{RecursiveMerge, store_flat_tree};
use crate::artifacts::merge::tree_merge::TreeMergeResult;
use crate::artifacts::merge::{MERGE_MSG_FILE, MergeOutcome, MergeState};
use crate::artifacts::objects::object_id::ObjectId;
use crate::errors::RepositoryError;
use std::io::Write;

impl Repository {
    /// Merge `target` into the current branch
    ///
    /// Ends already up to date, fast-forwarded, with a merge commit, or
    /// with unmerged paths in the index and `MERGE_HEAD` recorded for the
    /// commit that concludes the merge.
    pub async fn merge(&self, target: &str, message: Option<&str>) -> anyhow::Result<MergeOutcome> {
        self.require_work_tree("merge")?;

        if self.refs().exists(&RefName::merge_head())? {
            anyhow::bail!("you have not concluded your merge (MERGE_HEAD exists)\nPlease commit your changes before you merge.");
        }

        let head = self
            .refs()
            .read_head()?
            .ok_or_else(|| anyhow::anyhow!("cannot merge into '{}': it has no commits yet", self.head_label()))?;
        let theirs = Revision::try_parse(target)?.resolve(self)?;
        let history = self.history()?;

        if head == theirs || history.is_ancestor(&theirs, &head)? {
            writeln!(self.writer(), "Already up to date.")?;
            return Ok(MergeOutcome::AlreadyUpToDate);
        }

        let index = self.index();
        let mut index = index.lock().await;
        index.rehydrate()?;

        if index.is_conflicted() {
            return Err(RepositoryError::UnmergedIndex(index.conflicted_paths().into_iter().collect()).into());
        }
        let status = self.inspect_status().initialize(&mut index)?;
        if status.has_staged_changes() {
            anyhow::bail!("your local changes to the index would be overwritten by merge\nPlease commit them before you merge.");
        }

        self.refs().set_detached(&RefName::orig_head(), &head)?;
        let state = MergeState::Clean.transition(MergeState::Merging)?;

        if history.is_ancestor(&head, &theirs)? {
            let changes = self.database().tree_diff(Some(&head), Some(&theirs))?.into_changes();
            Migration::new(self, &mut index, changes).apply_changes()?;
            index.write_updates()?;
            self.refs().update(&RefName::head(), Some(&head), Some(&theirs))?;

            state.transition(MergeState::Resolved)?.transition(MergeState::Clean)?;
            writeln!(self.writer(), "Updating {}..{}", head.to_short_oid(), theirs.to_short_oid())?;
            writeln!(self.writer(), "Fast-forward")?;
            return Ok(MergeOutcome::FastForward { from: head, to: theirs });
        }

        let labels = MergeLabels {
            ours: "HEAD".to_string(),
            theirs: target.to_string(),
        };
        let (result, base) = RecursiveMerge::new(&history).merge_commits(&head, &theirs, labels)?;
        tracing::info!(
            ours = %head,
            theirs = %theirs,
            base = ?base,
            conflicts = result.conflicts.len(),
            "trees merged"
        );

        self.apply_merge_result(&mut index, &head, &result)?;

        let message = message
            .map(str::to_string)
            .unwrap_or_else(|| format!("Merge branch '{target}' into {}", self.head_label()));

        if result.is_clean() {
            let tree_oid = store_flat_tree(self.database(), &result.merged)?;
            let commit = self.write_commit(vec![head.clone(), theirs], tree_oid, message, Some(&head))?;

            state.transition(MergeState::Resolved)?.transition(MergeState::Clean)?;
            writeln!(self.writer(), "Merge made by the 'recursive' strategy.")?;
            return Ok(MergeOutcome::Resolved { commit });
        }

        let conflicts = result
            .conflicts
            .iter()
            .map(|(path, conflict)| (path.clone(), conflict.kind))
            .collect::<std::collections::BTreeMap<_, _>>();

        self.refs().set_detached(&RefName::merge_head(), &theirs)?;
        let mut merge_message = format!("{message}\n\n# Conflicts:\n");
        for path in conflicts.keys() {
            merge_message.push_str(&format!("#\t{}\n", path.display()));
        }
        std::fs::write(self.knot_dir().join(MERGE_MSG_FILE), merge_message)?;

        state.transition(MergeState::Conflicted)?;
        {
            let mut writer = self.writer();
            for (path, kind) in &conflicts {
                writeln!(writer, "CONFLICT ({kind}): Merge conflict in {}", path.display())?;
            }
            writeln!(writer, "Automatic merge failed; fix conflicts and then commit the result.")?;
        }

        Ok(MergeOutcome::Conflicted { conflicts })
    }

    /// Bring the working tree to the merged state and stage the conflicts
    fn apply_merge_result(&self, index: &mut Index, head: &ObjectId, result: &TreeMergeResult) -> anyhow::Result<()> {
        let head_tree = self.database().flatten_tree(Some(head))?;
        let changes = diff_flat_trees(&head_tree, &result.workspace_tree());
        Migration::new(self, index, changes).apply_changes()?;

        for (path, conflict) in &result.conflicts {
            if let Some((aside, _)) = &conflict.workspace
                && aside != path
            {
                index.remove(aside);
            }
            index.add_conflict_set(path, conflict.stages());
        }

        index.write_updates()
    }
}
