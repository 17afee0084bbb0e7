//! Data structures and algorithms
//!
//! - `branch`: Reference names and revision parsing
//! - `checkout`: Working tree migrations and the conflicts that block them
//! - `core`: File locking
//! - `database`: Tree entries as stored in the object database
//! - `diff`: Line diffs and tree comparison
//! - `history`: Ancestry queries and revision walks over the commit graph
//! - `index`: Index file format
//! - `merge`: Three-way merges of files, trees and commits
//! - `objects`: Blobs, trees, commits and tags
//! - `pack`: Packfile format with delta compression
//! - `status`: Working tree status inspection
//! - `transfer`: Fetch and push protocol between repositories

pub mod branch;
pub mod checkout;
pub mod core;
pub mod database;
pub mod diff;
pub mod history;
pub mod index;
pub mod merge;
pub mod objects;
pub mod pack;
pub mod status;
pub mod transfer;
