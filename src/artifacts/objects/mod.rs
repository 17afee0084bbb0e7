//! The four object kinds and their serialized forms
//!
//! An object is named by the SHA-1 of `<type> <size>\0<content>`. Blobs are
//! opaque bytes, trees list named entries, commits tie a tree to its
//! parents, and tags point an annotated name at another object.

pub mod blob;
pub mod commit;
pub mod object;
pub mod object_id;
pub mod object_type;
pub mod tag;
pub mod tree;

/// Hex digits in a printed object ID
pub const OBJECT_ID_LENGTH: usize = 40;

pub const RAW_OBJECT_ID_LENGTH: usize = 20;
