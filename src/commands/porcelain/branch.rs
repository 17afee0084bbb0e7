use crate::areas::repository::Repository;
use crate::artifacts::branch::HEADS_PREFIX;
use crate::artifacts::branch::branch_name::BranchName;
use crate::artifacts::branch::revision::Revision;
use crate::artifacts::objects::object_id::ObjectId;
use colored::Colorize;
use std::io::Write;

impl Repository {
    /// Create `name` at `start_point`, or at `HEAD` when none is given
    pub async fn create_branch(&self, name: &str, start_point: Option<&str>) -> anyhow::Result<ObjectId> {
        let branch = BranchName::try_parse(name)?;

        let start_oid = match start_point {
            Some(revision) => Revision::try_parse(revision)?.resolve(self)?,
            None => self
                .refs()
                .read_head()?
                .ok_or_else(|| anyhow::anyhow!("not a valid object name: '{}'", self.head_label()))?,
        };

        let ref_name = branch.to_ref_name();
        if self.refs().exists(&ref_name)? {
            anyhow::bail!("a branch named '{branch}' already exists");
        }
        self.refs().create(&ref_name, &start_oid)?;

        tracing::info!(branch = %branch, oid = %start_oid, "branch created");
        Ok(start_oid)
    }

    /// Delete `name`; without `force` it must be merged into `HEAD`
    pub async fn delete_branch(&self, name: &str, force: bool) -> anyhow::Result<()> {
        let branch = BranchName::try_parse(name)?;
        let ref_name = branch.to_ref_name();

        if self.refs().current_branch()?.as_ref() == Some(&ref_name) {
            anyhow::bail!("cannot delete branch '{branch}' checked out at '{}'", self.path().display());
        }
        let oid = self
            .refs()
            .read_oid(&ref_name)?
            .ok_or_else(|| anyhow::anyhow!("branch '{branch}' not found"))?;

        if !force {
            let merged = match self.refs().read_head()? {
                Some(head) => self.history()?.is_fast_forward(&oid, &head)?,
                None => false,
            };
            if !merged {
                anyhow::bail!(
                    "the branch '{branch}' is not fully merged\nIf you are sure you want to delete it, run 'knot branch -D {branch}'"
                );
            }
        }

        self.refs().delete(&ref_name, &oid)?;
        writeln!(self.writer(), "Deleted branch {branch} (was {}).", oid.to_short_oid())?;
        Ok(())
    }

    pub async fn rename_branch(&self, old: &str, new: &str) -> anyhow::Result<()> {
        let old = BranchName::try_parse(old)?;
        let new = BranchName::try_parse(new)?;

        if !self.refs().exists(&old.to_ref_name())? {
            anyhow::bail!("no branch named '{old}'");
        }
        if self.refs().exists(&new.to_ref_name())? {
            anyhow::bail!("a branch named '{new}' already exists");
        }

        let oid = self.refs().rename(&old.to_ref_name(), &new.to_ref_name())?;
        tracing::info!(from = %old, to = %new, oid = %oid, "branch renamed");
        Ok(())
    }

    pub async fn list_branches(&self, verbose: bool) -> anyhow::Result<Vec<BranchName>> {
        let current = self.refs().current_branch()?;
        let branches = self.refs().list(HEADS_PREFIX)?;

        let mut writer = self.writer();
        let mut names = Vec::with_capacity(branches.len());
        for (ref_name, oid) in branches {
            let branch = BranchName::try_from_ref_name(&ref_name)?;
            let line = if current.as_ref() == Some(&ref_name) {
                format!("* {}", branch.to_string().green())
            } else {
                format!("  {branch}")
            };

            if verbose {
                let commit = self.database().load_commit(&oid)?;
                writeln!(writer, "{line} {} {}", oid.to_short_oid(), commit.short_message())?;
            } else {
                writeln!(writer, "{line}")?;
            }
            names.push(branch);
        }

        Ok(names)
    }

    /// Short name of the current branch, or `HEAD` when detached
    pub fn head_label(&self) -> String {
        match self.refs().current_branch() {
            Ok(Some(branch)) => branch.short_name().to_string(),
            _ => "HEAD".to_string(),
        }
    }
}
