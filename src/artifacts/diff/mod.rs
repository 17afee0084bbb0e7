//! Comparisons the merge engine and status reporting are built on
//!
//! [`tree_diff`] walks two trees in lockstep and yields the paths that
//! were added, deleted or modified. [`diff_algorithm`] aligns the lines of
//! two blobs; the three-way content merge consumes its edit script.

pub mod diff_algorithm;
pub mod tree_diff;
