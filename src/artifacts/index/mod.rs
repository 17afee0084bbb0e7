//! On-disk staging area
//!
//! The file is a fixed header, the entries sorted by path and stage, and a
//! trailing digest:
//!
//! ```text
//! "DIRC" | version u32 | entry count u32
//! entry*        fixed stat fields, oid, flags, path, NUL padding to 8 bytes
//! sha1 of all bytes above
//! ```
//!
//! Integers are big-endian. A merge in progress stores up to three entries
//! for one path, distinguished by the stage bits in the flags.

pub mod checksum;
pub mod entry_mode;
pub mod index_entry;
pub mod index_header;

pub const CHECKSUM_SIZE: usize = 20;

/// Signature, version and entry count
pub const HEADER_SIZE: usize = 12;

pub const SIGNATURE: &str = "DIRC";

pub const VERSION: u32 = 2;
