use crate::areas::config::RemoteConfig;
use crate::areas::repository::Repository;
use crate::artifacts::branch::HEADS_PREFIX;
use crate::artifacts::branch::branch_name::{BranchName, RefName};
use crate::artifacts::transfer::refspec::Refspec;
use std::io::Write;
use std::path::Path;

pub const DEFAULT_REMOTE: &str = "origin";

#[derive(Debug, Clone, Default)]
pub struct CloneOptions {
    pub bare: bool,
    /// Branch to check out instead of the remote's `HEAD`
    pub branch: Option<String>,
    /// Fetch only this many commits of history
    pub depth: Option<usize>,
}

impl Repository {
    /// Create a repository at `destination` holding a copy of `url`
    ///
    /// Missing parent directories are created. A destination that already
    /// exists must be an empty directory; on failure anything this call
    /// created is removed again.
    pub async fn clone_repository(
        url: &str,
        destination: &Path,
        options: &CloneOptions,
        writer: Box<dyn Write + Send>,
    ) -> anyhow::Result<Self> {
        if destination.exists() && destination.read_dir()?.next().is_some() {
            anyhow::bail!(
                "destination path '{}' already exists and is not an empty directory",
                destination.display()
            );
        }
        let created = !destination.exists();

        let repository = if options.bare {
            Repository::new_bare(destination, writer)?
        } else {
            Repository::new(destination, writer)?
        };

        match repository.populate_clone(url, options).await {
            Ok(()) => Ok(repository),
            Err(error) => {
                let cleanup = if created {
                    std::fs::remove_dir_all(repository.path())
                } else {
                    std::fs::remove_dir_all(repository.knot_dir())
                };
                if let Err(cleanup_error) = cleanup {
                    tracing::warn!(%cleanup_error, "failed to clean up after clone");
                }
                Err(error)
            }
        }
    }

    async fn populate_clone(&self, url: &str, options: &CloneOptions) -> anyhow::Result<()> {
        writeln!(self.writer(), "Cloning into '{}'...", self.path().display())?;
        self.create_layout(None)?;

        let remote = if self.is_bare() {
            RemoteConfig {
                url: url.to_string(),
                fetch: vec![format!("+{HEADS_PREFIX}*:{HEADS_PREFIX}*")],
            }
        } else {
            RemoteConfig::with_default_fetch(DEFAULT_REMOTE, url)
        };
        let refspecs = remote
            .fetch
            .iter()
            .map(|refspec| refspec.parse::<Refspec>())
            .collect::<anyhow::Result<Vec<_>>>()?;
        self.update_config(|config| {
            config.remotes.insert(DEFAULT_REMOTE.to_string(), remote);
            Ok(())
        })?;

        let outcome = self.fetch_url(DEFAULT_REMOTE, url, refspecs, options.depth).await?;
        let has_branch = |name: &str| {
            outcome
                .advertised
                .iter()
                .any(|(advertised, _)| advertised == &format!("{HEADS_PREFIX}{name}"))
        };

        let branch = match &options.branch {
            Some(branch) if has_branch(branch.as_str()) => branch.clone(),
            Some(branch) => anyhow::bail!("remote branch {branch} not found in upstream {DEFAULT_REMOTE}"),
            None => match outcome
                .head_target
                .as_deref()
                .and_then(|target| target.strip_prefix(HEADS_PREFIX))
            {
                Some(branch) => branch.to_string(),
                None => match outcome
                    .advertised
                    .iter()
                    .find_map(|(name, _)| name.strip_prefix(HEADS_PREFIX))
                {
                    Some(branch) => branch.to_string(),
                    None => {
                        writeln!(self.writer(), "warning: You appear to have cloned an empty repository.")?;
                        return Ok(());
                    }
                },
            },
        };

        let branch = BranchName::try_parse(branch)?;
        self.refs().set_symbolic(&RefName::head(), &branch.to_ref_name())?;
        self.update_config(|config| {
            config.core.default_branch = branch.to_string();
            Ok(())
        })?;

        if !self.is_bare() {
            let tracking = RefName::remote_tracking(DEFAULT_REMOTE, branch.as_ref())?;
            let oid = self.refs().resolve(&tracking)?;

            self.migrate_to(None, &oid).await?;
            self.refs().update(&branch.to_ref_name(), None, Some(&oid))?;
        }

        tracing::info!(url, branch = %branch, bare = self.is_bare(), depth = ?options.depth, "clone finished");
        Ok(())
    }
}
