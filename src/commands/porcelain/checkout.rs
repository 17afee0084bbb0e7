use crate::areas::repository::Repository;
use crate::artifacts::branch::branch_name::{BranchName, RefName};
use crate::artifacts::branch::revision::Revision;
use crate::artifacts::checkout::migration::Migration;
use crate::artifacts::objects::object_id::ObjectId;
use std::io::Write;

const DETACHMENT_NOTICE: &str = r#"
You are in 'detached HEAD' state. You can look around, make experimental
changes and commit them, and you can discard any commits you make in this
state without impacting any branches by performing another checkout.

If you want to create a new branch to retain commits you create, you may
do so (now or later) by using the branch command. Example:

    knot branch <new-branch-name>
"#;

impl Repository {
    /// Switch to a branch, or detach `HEAD` at any other revision
    pub async fn checkout(&self, target: &str) -> anyhow::Result<ObjectId> {
        self.require_work_tree("checkout")?;

        let current_branch = self.refs().current_branch()?;
        let current_oid = self.refs().read_head()?;

        let target_oid = Revision::try_parse(target)?.resolve(self)?;
        let target_branch = BranchName::try_parse(target)
            .ok()
            .map(|branch| branch.to_ref_name())
            .filter(|name| self.refs().exists(name).unwrap_or(false));

        self.migrate_to(current_oid.as_ref(), &target_oid).await?;

        match &target_branch {
            Some(branch) => self.refs().set_symbolic(&RefName::head(), branch)?,
            None => self.refs().set_detached(&RefName::head(), &target_oid)?,
        }
        tracing::info!(target, oid = %target_oid, detached = target_branch.is_none(), "checked out");

        if current_branch.is_none()
            && let Some(current_oid) = &current_oid
            && current_oid != &target_oid
        {
            self.print_head_position("Previous HEAD position was", current_oid)?;
        }

        match (&current_branch, &target_branch) {
            (_, None) => {
                if current_branch.is_some() {
                    writeln!(self.writer(), "Note: switching to '{target}'.\n{DETACHMENT_NOTICE}")?;
                }
                self.print_head_position("HEAD is now at", &target_oid)?;
            }
            (Some(current), Some(branch)) if current == branch => {
                writeln!(self.writer(), "Already on '{}'", branch.short_name())?;
            }
            (_, Some(branch)) => {
                writeln!(self.writer(), "Switched to branch '{}'", branch.short_name())?;
            }
        }

        Ok(target_oid)
    }

    /// Create a branch at `start_point` (or `HEAD`) and switch to it
    pub async fn checkout_new_branch(&self, name: &str, start_point: Option<&str>) -> anyhow::Result<ObjectId> {
        self.require_work_tree("checkout")?;

        let current_oid = self.refs().read_head()?;
        let branch = BranchName::try_parse(name)?;
        let target_oid = self.create_branch(name, start_point).await?;

        self.migrate_to(current_oid.as_ref(), &target_oid).await?;
        self.refs().set_symbolic(&RefName::head(), &branch.to_ref_name())?;

        writeln!(self.writer(), "Switched to a new branch '{branch}'")?;
        Ok(target_oid)
    }

    /// Move the working tree and index from `current` to `target`
    pub(crate) async fn migrate_to(&self, current: Option<&ObjectId>, target: &ObjectId) -> anyhow::Result<()> {
        let index = self.index();
        let mut index = index.lock().await;
        index.rehydrate()?;

        let changes = self.database().tree_diff(current, Some(target))?.into_changes();
        Migration::new(self, &mut index, changes).apply_changes()?;

        index.write_updates()
    }

    fn print_head_position(&self, message: &str, oid: &ObjectId) -> anyhow::Result<()> {
        let commit = self.database().load_commit(oid)?;
        writeln!(self.writer(), "{message} {} {}", oid.to_short_oid(), commit.short_message())?;
        Ok(())
    }
}
