//! Core repository components
//!
//! - `config`: Per-repository settings, remotes and transfer limits
//! - `database`: Content-addressed object store, loose and packed
//! - `index`: Staging area, including unmerged conflict stages
//! - `refs`: References with compare-and-swap updates
//! - `repository`: Opening repositories and tying the areas together
//! - `workspace`: Working tree file system operations

pub mod config;
pub mod database;
pub mod index;
pub mod refs;
pub mod repository;
pub mod workspace;
