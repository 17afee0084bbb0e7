//! Where the work tree, the index and HEAD disagree
//!
//! [`status_info`] runs the scan, [`inspector`] decides single paths and
//! [`file_change`] names the outcomes, unmerged paths included.

pub mod file_change;
pub mod inspector;
pub mod status_info;
