//! Repository configuration
//!
//! Stored as TOML at `<knot-dir>/config.toml`. A missing file, table or key
//! falls back to its default, so a fresh repository needs no config at all.
//!
//! ```toml
//! [core]
//! bare = false
//! default_branch = "main"
//!
//! [user]
//! name = "Ada"
//! email = "ada@example.com"
//!
//! [remotes.origin]
//! url = "/srv/repos/project.knot"
//! fetch = ["+refs/heads/*:refs/remotes/origin/*"]
//!
//! [transfer]
//! max_negotiation_rounds = 16
//! haves_per_round = 32
//! retries = 2
//! ref_update_retries = 5
//! unpack_limit = 100
//!
//! [receive]
//! deny_non_fast_forwards = false
//! deny_deletes = false
//! deny_current_branch = true
//! ```

use crate::areas::refs::write_atomically;
use crate::artifacts::core::lockfile::LockFile;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::Path;

pub const CONFIG_FILE_NAME: &str = "config.toml";

mod defaults {
    pub fn default_branch() -> String {
        "main".to_string()
    }

    pub fn max_negotiation_rounds() -> usize {
        16
    }

    pub fn haves_per_round() -> usize {
        32
    }

    pub fn retries() -> usize {
        2
    }

    pub fn ref_update_retries() -> usize {
        5
    }

    pub fn unpack_limit() -> usize {
        100
    }

    pub fn enabled() -> bool {
        true
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub core: CoreConfig,
    #[serde(default)]
    pub user: UserConfig,
    #[serde(default)]
    pub remotes: BTreeMap<String, RemoteConfig>,
    #[serde(default)]
    pub transfer: TransferConfig,
    #[serde(default)]
    pub receive: ReceiveConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoreConfig {
    #[serde(default)]
    pub bare: bool,
    #[serde(default = "defaults::default_branch")]
    pub default_branch: String,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            bare: false,
            default_branch: defaults::default_branch(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub url: String,
    #[serde(default)]
    pub fetch: Vec<String>,
}

impl RemoteConfig {
    /// Remote with the standard tracking refspec
    pub fn with_default_fetch(name: &str, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            fetch: vec![format!("+refs/heads/*:refs/remotes/{name}/*")],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Upper bound on have/ACK rounds before the client sends `done`
    #[serde(default = "defaults::max_negotiation_rounds")]
    pub max_negotiation_rounds: usize,
    #[serde(default = "defaults::haves_per_round")]
    pub haves_per_round: usize,
    /// Fresh attempts after a transport failure
    #[serde(default = "defaults::retries")]
    pub retries: usize,
    /// Compare-and-swap attempts for a single reference
    #[serde(default = "defaults::ref_update_retries")]
    pub ref_update_retries: usize,
    /// Received packs with more objects than this are kept as packs
    #[serde(default = "defaults::unpack_limit")]
    pub unpack_limit: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            max_negotiation_rounds: defaults::max_negotiation_rounds(),
            haves_per_round: defaults::haves_per_round(),
            retries: defaults::retries(),
            ref_update_retries: defaults::ref_update_retries(),
            unpack_limit: defaults::unpack_limit(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveConfig {
    /// Refuse history rewrites even when the pusher forces them
    #[serde(default)]
    pub deny_non_fast_forwards: bool,
    #[serde(default)]
    pub deny_deletes: bool,
    /// Reject pushes to the branch checked out in a non-bare repository
    #[serde(default = "defaults::enabled")]
    pub deny_current_branch: bool,
}

impl Default for ReceiveConfig {
    fn default() -> Self {
        Self {
            deny_non_fast_forwards: false,
            deny_deletes: false,
            deny_current_branch: true,
        }
    }
}

impl Config {
    /// Load from `<knot-dir>/config.toml`, defaults when absent
    pub fn load(knot_dir: &Path) -> anyhow::Result<Self> {
        let path = knot_dir.join(CONFIG_FILE_NAME);
        match std::fs::read_to_string(&path) {
            Ok(contents) => toml::from_str(&contents)
                .with_context(|| format!("failed to parse config file {path:?}")),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(err).with_context(|| format!("failed to read config file {path:?}")),
        }
    }

    pub fn save(&self, knot_dir: &Path) -> anyhow::Result<()> {
        let path = knot_dir.join(CONFIG_FILE_NAME);
        let _lock = LockFile::acquire(&knot_dir.join("locks").join("config.lock"))?;

        let contents = toml::to_string_pretty(self).context("failed to serialize config")?;
        write_atomically(&path, contents.as_bytes())
            .with_context(|| format!("failed to write config file {path:?}"))
    }

    pub fn remote(&self, name: &str) -> anyhow::Result<&RemoteConfig> {
        self.remotes
            .get(name)
            .with_context(|| format!("no such remote '{name}'"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::TempDir;
    use pretty_assertions::assert_eq;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let config = Config::load(dir.path()).unwrap();

        assert_eq!(config, Config::default());
        assert_eq!(config.core.default_branch, "main");
        assert_eq!(config.transfer.unpack_limit, 100);
        assert!(!config.receive.deny_non_fast_forwards);
    }

    #[test]
    fn partial_tables_keep_other_defaults() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            "[transfer]\nretries = 7\n\n[remotes.origin]\nurl = \"/tmp/x\"\n",
        )
        .unwrap();

        let config = Config::load(dir.path()).unwrap();

        assert_eq!(config.transfer.retries, 7);
        assert_eq!(config.transfer.haves_per_round, 32);
        assert_eq!(config.remote("origin").unwrap().url, "/tmp/x");
        assert!(config.remote("upstream").is_err());
    }

    #[test]
    fn save_then_load_preserves_values() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.user.name = Some("Ada".to_string());
        config.core.bare = true;
        config
            .remotes
            .insert("origin".to_string(), RemoteConfig::with_default_fetch("origin", "/srv/a"));

        config.save(dir.path()).unwrap();

        assert_eq!(Config::load(dir.path()).unwrap(), config);
    }
}
