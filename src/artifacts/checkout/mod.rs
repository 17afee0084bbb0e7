//! Safe working tree updates
//!
//! Checkout, fast-forward and the clean part of a merge all move the
//! working tree between two trees through a [`migration::Migration`],
//! which detects every conflict with local changes before writing.

pub mod conflict;
pub mod migration;
