//! Command implementations
//!
//! Every command is an `impl Repository` block in its own file, split the
//! way the user sees them:
//!
//! - `plumbing`: low-level access to objects and history (cat-file,
//!   hash-object, diff-tree, merge-base, repack)
//! - `porcelain`: everyday workflows, local (add, commit, merge, ...) and
//!   remote (fetch, push, pull, clone, ...)
//!
//! Output goes through [`Repository::writer`](crate::areas::repository::Repository::writer).

pub mod plumbing;
pub mod porcelain;
