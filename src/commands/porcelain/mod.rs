//! Porcelain commands
//!
//! ## Local
//!
//! - `init`: create a repository
//! - `add`, `rm`: stage files and stop tracking them
//! - `reset`: unstage files back to their HEAD version
//! - `commit`: record the index, concluding a pending merge
//! - `status`: compare HEAD, index and working tree
//! - `log`: walk history
//! - `branch`, `tag`: manage references
//! - `checkout`: switch branches or detach HEAD
//! - `merge`: fast-forward, three-way merge or stop with conflicts
//!
//! ## Remote
//!
//! - `remote`: the remote table
//! - `ls_remote`, `fetch`, `push`, `pull`, `clone`

pub mod add;
pub mod branch;
pub mod checkout;
pub mod clone;
pub mod commit;
pub mod fetch;
pub mod init;
pub mod log;
pub mod ls_remote;
pub mod merge;
pub mod pull;
pub mod push;
pub mod remote;
pub mod reset;
pub mod rm;
pub mod status;
pub mod tag;
