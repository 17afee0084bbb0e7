//! Packfiles: delta-compressed, checksummed archives of objects
//!
//! Packs are used both on the wire (fetch/push) and on disk
//! (`objects/pack/pack-<checksum>.pack` with its `.idx`).

pub mod delta;
pub mod pack_index;
pub mod packfile;

pub const PACK_SIGNATURE: &[u8; 4] = b"PACK";
pub const PACK_VERSION: u32 = 2;
pub const PACK_HEADER_SIZE: usize = 12;
pub const PACK_INDEX_SIGNATURE: &[u8; 4] = b"KIDX";
pub const PACK_INDEX_VERSION: u32 = 1;

/// Upper bound on buffer space reserved from sizes a pack declares; larger
/// buffers grow as bytes actually arrive
pub const MAX_PREALLOC: usize = 1 << 20;

/// Entry type code for a delta against a base named by digest
pub const REF_DELTA_CODE: u8 = 7;
