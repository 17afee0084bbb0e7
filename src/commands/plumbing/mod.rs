//! Plumbing commands
//!
//! - `cat-file`: show an object's type, size or content
//! - `hash-object`: digest a file as a blob, optionally storing it
//! - `diff-tree`: paths changed between two trees
//! - `merge-base`: best common ancestors, and ancestry checks
//! - `repack`: move loose objects into a pack
//! - `write_commit`: tree and commit writing shared by porcelain commands

pub mod cat_file;
pub mod diff_tree;
pub mod hash_object;
pub mod merge_base;
pub mod repack;
pub mod write_commit;
