use crate::areas::config::RemoteConfig;
use crate::areas::repository::Repository;
use crate::artifacts::branch::REMOTES_PREFIX;
use crate::artifacts::branch::branch_name::RefName;
use std::io::Write;

impl Repository {
    pub async fn add_remote(&self, name: &str, url: &str) -> anyhow::Result<()> {
        // the name has to work as a tracking ref prefix
        RefName::remote_tracking(name, "HEAD")?;

        self.update_config(|config| {
            if config.remotes.contains_key(name) {
                anyhow::bail!("remote {name} already exists.");
            }
            config
                .remotes
                .insert(name.to_string(), RemoteConfig::with_default_fetch(name, url));
            Ok(())
        })?;

        tracing::info!(remote = name, url, "remote added");
        Ok(())
    }

    /// Forget `name` and every tracking ref fetched from it
    pub async fn remove_remote(&self, name: &str) -> anyhow::Result<()> {
        self.update_config(|config| match config.remotes.remove(name) {
            Some(_) => Ok(()),
            None => anyhow::bail!("no such remote: '{name}'"),
        })?;

        let prefix = format!("{REMOTES_PREFIX}{name}/");
        self.refs().remove(&RefName::remote_tracking(name, "HEAD")?)?;
        for (ref_name, oid) in self.refs().list(&prefix)? {
            self.refs().delete(&ref_name, &oid)?;
        }

        tracing::info!(remote = name, "remote removed");
        Ok(())
    }

    /// Rename `old` to `new`, moving its tracking refs and refspecs along
    pub async fn rename_remote(&self, old: &str, new: &str) -> anyhow::Result<()> {
        RefName::remote_tracking(new, "HEAD")?;

        let old_prefix = format!("{REMOTES_PREFIX}{old}/");
        let new_prefix = format!("{REMOTES_PREFIX}{new}/");

        self.update_config(|config| {
            if config.remotes.contains_key(new) {
                anyhow::bail!("remote {new} already exists.");
            }
            let mut remote = config
                .remotes
                .remove(old)
                .ok_or_else(|| anyhow::anyhow!("no such remote: '{old}'"))?;
            for refspec in remote.fetch.iter_mut() {
                *refspec = refspec.replace(&old_prefix, &new_prefix);
            }
            config.remotes.insert(new.to_string(), remote);
            Ok(())
        })?;

        let old_head = RefName::remote_tracking(old, "HEAD")?;
        let head_target = self.refs().read_symbolic(&old_head)?;
        self.refs().remove(&old_head)?;

        for (ref_name, _) in self.refs().list(&old_prefix)? {
            let suffix = ref_name.as_ref().trim_start_matches(old_prefix.as_str());
            self.refs().rename(&ref_name, &RefName::try_parse(format!("{new_prefix}{suffix}"))?)?;
        }

        if let Some(target) = head_target {
            let suffix = target.as_ref().trim_start_matches(old_prefix.as_str());
            self.refs().set_symbolic(
                &RefName::remote_tracking(new, "HEAD")?,
                &RefName::try_parse(format!("{new_prefix}{suffix}"))?,
            )?;
        }

        tracing::info!(from = old, to = new, "remote renamed");
        Ok(())
    }

    pub async fn set_remote_url(&self, name: &str, url: &str) -> anyhow::Result<()> {
        self.update_config(|config| match config.remotes.get_mut(name) {
            Some(remote) => {
                remote.url = url.to_string();
                Ok(())
            }
            None => anyhow::bail!("no such remote '{name}'"),
        })
    }

    pub async fn list_remotes(&self, verbose: bool) -> anyhow::Result<Vec<String>> {
        let remotes = self.config().remotes.clone();

        let mut writer = self.writer();
        for (name, remote) in &remotes {
            if verbose {
                writeln!(writer, "{name}\t{} (fetch)", remote.url)?;
                writeln!(writer, "{name}\t{} (push)", remote.url)?;
            } else {
                writeln!(writer, "{name}")?;
            }
        }

        Ok(remotes.into_keys().collect())
    }
}
