//! Refspecs
//!
//! `[+]<source>:<destination>` maps references on one side of a transfer to
//! references on the other. Either both sides carry exactly one `*`, which
//! matches any run of characters, or neither does. A leading `+` allows
//! updates that are not fast-forwards.
//!
//! An empty source (`:refs/heads/topic`) names a deletion when pushing.

use crate::artifacts::branch::{HEADS_PREFIX, TAGS_PREFIX};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Refspec {
    pub force: bool,
    pub source: String,
    pub destination: String,
}

impl Refspec {
    /// `+refs/heads/*:refs/remotes/<remote>/*`
    pub fn default_fetch(remote: &str) -> Self {
        Self {
            force: true,
            source: format!("{HEADS_PREFIX}*"),
            destination: format!("refs/remotes/{remote}/*"),
        }
    }

    /// Tags are fetched as-is and never moved once present
    pub fn tags() -> Self {
        Self {
            force: false,
            source: format!("{TAGS_PREFIX}*"),
            destination: format!("{TAGS_PREFIX}*"),
        }
    }

    /// Expand a command-line push argument: `main`, `+main`, `main:other`,
    /// `:gone` or a full `refs/...` name
    pub fn parse_push(argument: &str) -> anyhow::Result<Self> {
        let (force, rest) = match argument.strip_prefix('+') {
            Some(rest) => (true, rest),
            None => (false, argument),
        };
        let (source, destination) = rest.split_once(':').unwrap_or((rest, rest));

        let refspec = Self {
            force,
            source: qualify(source),
            destination: qualify(destination),
        };
        refspec.validate()?;
        Ok(refspec)
    }

    pub fn is_glob(&self) -> bool {
        self.source.contains('*')
    }

    pub fn is_deletion(&self) -> bool {
        self.source.is_empty()
    }

    /// Destination for `name`, `None` when the source side does not match
    pub fn map(&self, name: &str) -> Option<String> {
        match self.source.split_once('*') {
            Some((prefix, suffix)) => {
                let middle = name.strip_prefix(prefix)?.strip_suffix(suffix)?;
                if middle.is_empty() {
                    return None;
                }
                Some(self.destination.replacen('*', middle, 1))
            }
            None => (self.source == name).then(|| self.destination.clone()),
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        let source_globs = self.source.matches('*').count();
        let destination_globs = self.destination.matches('*').count();

        if source_globs > 1 || source_globs != destination_globs {
            anyhow::bail!("invalid refspec '{self}': '*' must appear once on both sides or not at all");
        }
        if self.destination.is_empty() {
            anyhow::bail!("invalid refspec '{self}': missing destination");
        }
        Ok(())
    }
}

/// Short branch names become `refs/heads/<name>`
fn qualify(name: &str) -> String {
    if name.is_empty() || name.starts_with("refs/") || name == "HEAD" {
        name.to_string()
    } else {
        format!("{HEADS_PREFIX}{name}")
    }
}

impl FromStr for Refspec {
    type Err = anyhow::Error;

    fn from_str(text: &str) -> anyhow::Result<Self> {
        let (force, rest) = match text.strip_prefix('+') {
            Some(rest) => (true, rest),
            None => (false, text),
        };
        let (source, destination) = rest
            .split_once(':')
            .ok_or_else(|| anyhow::anyhow!("invalid refspec '{text}': expected <source>:<destination>"))?;

        let refspec = Self {
            force,
            source: source.to_string(),
            destination: destination.to_string(),
        };
        refspec.validate()?;
        Ok(refspec)
    }
}

impl fmt::Display for Refspec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let force = if self.force { "+" } else { "" };
        write!(f, "{force}{}:{}", self.source, self.destination)
    }
}
