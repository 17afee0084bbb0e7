use crate::areas::repository::Repository;
use crate::artifacts::branch::branch_name::RefName;
use crate::artifacts::merge::MergeOutcome;
use crate::artifacts::objects::object_id::ObjectId;
use std::io::Write;

impl Repository {
    /// Fetch `remote`, then merge its copy of `branch` (the current branch
    /// by default) into `HEAD`
    pub async fn pull(&self, remote: &str, branch: Option<&str>) -> anyhow::Result<MergeOutcome> {
        self.require_work_tree("pull")?;

        let branch = match branch {
            Some(branch) => branch.to_string(),
            None => self
                .refs()
                .current_branch()?
                .map(|name| name.short_name().to_string())
                .ok_or_else(|| anyhow::anyhow!("you are not currently on a branch; name the branch to pull"))?,
        };

        self.fetch(remote, None).await?;

        let tracking = RefName::remote_tracking(remote, &branch)?;
        let theirs = self
            .refs()
            .read_oid(&tracking)?
            .ok_or_else(|| anyhow::anyhow!("couldn't find remote ref {branch}"))?;

        if self.refs().read_head()?.is_none() {
            self.migrate_to(None, &theirs).await?;
            self.refs().update(&RefName::head(), None, Some(&theirs))?;
            writeln!(self.writer(), "Fast-forward to {}", theirs.to_short_oid())?;
            return Ok(MergeOutcome::FastForward {
                from: ObjectId::zero(),
                to: theirs,
            });
        }

        let url = self.config().remote(remote)?.url.clone();
        let message = format!("Merge branch '{branch}' of {url}");
        self.merge(tracking.as_ref(), Some(&message)).await
    }
}
