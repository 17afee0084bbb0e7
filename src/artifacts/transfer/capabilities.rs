//! Protocol capabilities
//!
//! Capabilities ride on the first advertised reference line after a NUL
//! byte, and on the client's first `want` or update command after a space
//! or NUL. Each is a bare word or `name=value`.

use std::collections::BTreeMap;
use std::fmt;

pub const REPORT_STATUS: &str = "report-status";
pub const DELETE_REFS: &str = "delete-refs";
pub const SHALLOW: &str = "shallow";
pub const REF_DELTA: &str = "ref-delta";
pub const SIDE_BAND_FREE: &str = "side-band-free";
pub const AGENT: &str = "agent";
pub const SYMREF: &str = "symref";

/// Every capability this implementation understands
pub const KNOWN_CAPABILITIES: phf::Set<&'static str> = phf::phf_set! {
    "report-status",
    "delete-refs",
    "shallow",
    "ref-delta",
    "side-band-free",
    "agent",
    "symref",
};

pub fn agent() -> String {
    format!("knot/{}", env!("CARGO_PKG_VERSION"))
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    entries: BTreeMap<String, Option<String>>,
}

impl Capabilities {
    /// What upload-pack offers; `head` is the branch `HEAD` points at
    pub fn upload_pack(head: Option<&str>) -> Self {
        let mut capabilities = Self::default()
            .with(SHALLOW, None)
            .with(REF_DELTA, None)
            .with(SIDE_BAND_FREE, None)
            .with(AGENT, Some(agent()));
        if let Some(head) = head {
            capabilities = capabilities.with(SYMREF, Some(format!("HEAD:{head}")));
        }
        capabilities
    }

    pub fn receive_pack() -> Self {
        Self::default()
            .with(REPORT_STATUS, None)
            .with(DELETE_REFS, None)
            .with(REF_DELTA, None)
            .with(AGENT, Some(agent()))
    }

    pub fn with(mut self, name: &str, value: Option<String>) -> Self {
        self.entries.insert(name.to_string(), value);
        self
    }

    /// Parse a space separated list, dropping capabilities we do not know
    pub fn parse(text: &str) -> Self {
        let entries = text
            .split_whitespace()
            .filter_map(|word| {
                let (name, value) = match word.split_once('=') {
                    Some((name, value)) => (name, Some(value.to_string())),
                    None => (word, None),
                };
                if !KNOWN_CAPABILITIES.contains(name) {
                    tracing::trace!(capability = name, "ignoring unknown capability");
                    return None;
                }
                Some((name.to_string(), value))
            })
            .collect();

        Self { entries }
    }

    pub fn has(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn value(&self, name: &str) -> Option<&str> {
        self.entries.get(name).and_then(|value| value.as_deref())
    }

    /// Target of the `symref=HEAD:<target>` capability
    pub fn head_target(&self) -> Option<&str> {
        self.value(SYMREF)?.strip_prefix("HEAD:")
    }

    /// The subset of `self` that `other` also supports, to echo back
    pub fn common_with(&self, other: &Capabilities) -> Capabilities {
        let entries = self
            .entries
            .iter()
            .filter(|(name, _)| other.has(name) && name.as_str() != SYMREF)
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();

        Self { entries }
    }
}

impl fmt::Display for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let words = self
            .entries
            .iter()
            .map(|(name, value)| match value {
                Some(value) => format!("{name}={value}"),
                None => name.clone(),
            })
            .collect::<Vec<_>>();
        write!(f, "{}", words.join(" "))
    }
}
