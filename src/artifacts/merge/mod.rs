//! Merge engine
//!
//! - `bca_finder`: best common ancestors of two commits
//! - `diff3`: line-level three-way merge with conflict markers
//! - `tree_merge`: per-path three-way merge of whole trees
//! - `recursive`: commit merges, with a virtual base for criss-cross histories
//!
//! A merge moves through [`MergeState`]: `Clean` before it starts,
//! `Merging` while trees are combined and applied, then either `Resolved`
//! (all paths merged, a merge commit can be written) or `Conflicted` (the
//! index holds unmerged stages until the user re-stages and commits).

pub mod bca_finder;
pub mod diff3;
pub mod recursive;
pub mod tree_merge;

use crate::artifacts::merge::tree_merge::ConflictKind;
use crate::artifacts::objects::object_id::ObjectId;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

pub const MERGE_MSG_FILE: &str = "MERGE_MSG";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeState {
    Clean,
    Merging,
    Resolved,
    Conflicted,
}

impl MergeState {
    /// Whether `next` may follow `self`
    pub fn can_transition_to(self, next: MergeState) -> bool {
        matches!(
            (self, next),
            (MergeState::Clean, MergeState::Merging)
                | (MergeState::Merging, MergeState::Resolved)
                | (MergeState::Merging, MergeState::Conflicted)
                | (MergeState::Conflicted, MergeState::Resolved)
                | (MergeState::Resolved, MergeState::Clean)
        )
    }

    pub fn transition(self, next: MergeState) -> anyhow::Result<MergeState> {
        if !self.can_transition_to(next) {
            anyhow::bail!("invalid merge transition from {self} to {next}");
        }

        tracing::debug!(from = %self, to = %next, "merge state changed");
        Ok(next)
    }
}

impl fmt::Display for MergeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            MergeState::Clean => "clean",
            MergeState::Merging => "merging",
            MergeState::Resolved => "resolved",
            MergeState::Conflicted => "conflicted",
        };
        write!(f, "{label}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The target is already part of our history
    AlreadyUpToDate,
    /// Our branch moved forward to the target without a merge commit
    FastForward { from: ObjectId, to: ObjectId },
    /// A merge commit was written
    Resolved { commit: ObjectId },
    /// Unmerged paths are left in the index for the user
    Conflicted { conflicts: BTreeMap<PathBuf, ConflictKind> },
}

impl MergeOutcome {
    pub fn is_conflicted(&self) -> bool {
        matches!(self, MergeOutcome::Conflicted { .. })
    }

    pub fn final_state(&self) -> MergeState {
        match self {
            MergeOutcome::Conflicted { .. } => MergeState::Conflicted,
            _ => MergeState::Clean,
        }
    }
}
