use crate::areas::repository::Repository;
use crate::artifacts::branch::branch_name::{BranchName, RefName};
use anyhow::Context;
use std::fs;
use std::io::Write;

impl Repository {
    /// Lay out an empty repository; running it again only reports
    pub async fn init(&self, initial_branch: Option<&str>) -> anyhow::Result<()> {
        let existed = self.create_layout(initial_branch)?;

        let kind = if self.is_bare() { "bare " } else { "" };
        let verb = if existed { "Reinitialized existing" } else { "Initialized empty" };
        writeln!(
            self.writer(),
            "{verb} {kind}Knot repository in {}",
            self.knot_dir().display()
        )?;

        Ok(())
    }

    /// Create the data directory, config and `HEAD`; returns whether a
    /// repository was already there
    pub(crate) fn create_layout(&self, initial_branch: Option<&str>) -> anyhow::Result<bool> {
        let existed = self.knot_dir().join("HEAD").exists();

        fs::create_dir_all(self.database().pack_path())
            .with_context(|| format!("failed to create {:?}", self.database().pack_path()))?;
        fs::create_dir_all(self.refs().heads_path()).context("failed to create refs/heads")?;
        fs::create_dir_all(self.refs().tags_path()).context("failed to create refs/tags")?;

        if !existed {
            let branch = match initial_branch {
                Some(branch) => BranchName::try_parse(branch)?,
                None => BranchName::try_parse(self.config().core.default_branch.as_str())?,
            };
            let bare = self.is_bare();
            self.update_config(|config| {
                config.core.bare = bare;
                config.core.default_branch = branch.to_string();
                Ok(())
            })?;
            self.refs()
                .set_symbolic(&RefName::head(), &branch.to_ref_name())
                .context("failed to create initial HEAD reference")?;

            tracing::info!(path = %self.knot_dir().display(), bare, "repository initialized");
        }

        Ok(existed)
    }
}
