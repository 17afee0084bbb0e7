//! knot: a distributed version control system
//!
//! - `areas`: The parts of a repository on disk
//! - `artifacts`: Objects, history, merging and transfer
//! - `commands`: One method on [`areas::repository::Repository`] per command
//! - `errors`: Failures callers need to tell apart

pub mod areas;
pub mod artifacts;
pub mod commands;
pub mod errors;
