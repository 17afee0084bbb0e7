//! Index entry representation
//!
//! Each entry records a path, the blob it is staged as, the stat data used
//! for fast change detection, and a merge stage:
//!
//! - stage 0: normal, merged entry
//! - stage 1: common ancestor version of a conflicted path
//! - stage 2: our version
//! - stage 3: their version
//!
//! The stage lives in bits 12-13 of the 16-bit flags field; the low 12 bits
//! hold the path length.

use crate::artifacts::index::entry_mode::{EntryMode, FileMode};
use crate::artifacts::objects::object::{Packable, Unpackable};
use crate::artifacts::objects::object_id::ObjectId;
use anyhow::Context;
use byteorder::{NetworkEndian, ReadBytesExt, WriteBytesExt};
use bytes::Bytes;
use derive_new::new;
use is_executable::IsExecutable;
use std::cmp::min;
use std::fs::Metadata;
use std::io::{BufRead, Write};
use std::os::unix::prelude::MetadataExt;
use std::path::{Path, PathBuf};

/// Path lengths at or above this are stored as the maximum
const MAX_PATH_SIZE: usize = 0xfff;

const STAGE_SHIFT: u16 = 12;
const STAGE_MASK: u16 = 0x3000;

/// Stat fields stored ahead of the oid, four bytes each
const STAT_WORDS: usize = 10;

pub const ENTRY_BLOCK: usize = 8;

/// Stat words, oid, flags and the shortest padded path
pub const ENTRY_MIN_SIZE: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Stage {
    #[default]
    Merged = 0,
    Base = 1,
    Ours = 2,
    Theirs = 3,
}

impl Stage {
    pub const CONFLICT_STAGES: [Stage; 3] = [Stage::Base, Stage::Ours, Stage::Theirs];

    fn from_flags(flags: u16) -> Self {
        match (flags & STAGE_MASK) >> STAGE_SHIFT {
            1 => Stage::Base,
            2 => Stage::Ours,
            3 => Stage::Theirs,
            _ => Stage::Merged,
        }
    }
}

#[derive(Debug, Clone, Default, new)]
pub struct IndexEntry {
    /// Relative to the work tree root
    pub name: PathBuf,
    pub oid: ObjectId,
    pub metadata: EntryMetadata,
    #[new(default)]
    pub stage: Stage,
}

impl IndexEntry {
    /// Entry for one side of a conflicted path; it carries no stat data
    pub fn conflicted(name: PathBuf, oid: ObjectId, mode: EntryMode, stage: Stage) -> Self {
        IndexEntry {
            name,
            oid,
            metadata: EntryMetadata {
                mode,
                ..Default::default()
            },
            stage,
        }
    }

    pub fn mode(&self) -> EntryMode {
        self.metadata.mode
    }

    pub fn is_conflicted(&self) -> bool {
        self.stage != Stage::Merged
    }

    pub fn basename(&self) -> anyhow::Result<&str> {
        self.name
            .file_name()
            .and_then(|name| name.to_str())
            .with_context(|| format!("index entry {} has no file name", self.name.display()))
    }

    /// Every proper ancestor directory, outermost first
    pub fn parent_dirs(&self) -> Vec<&Path> {
        let mut dirs = self
            .name
            .ancestors()
            .skip(1)
            .filter(|dir| !dir.as_os_str().is_empty())
            .collect::<Vec<_>>();
        dirs.reverse();
        dirs
    }

    /// Size and mode agree; a stored size of zero is never trusted
    pub fn stat_match(&self, other: &EntryMetadata) -> bool {
        let size_agrees = self.metadata.size == 0 || self.metadata.size == other.size;
        size_agrees && self.metadata.mode == other.mode
    }

    pub fn times_match(&self, other: &EntryMetadata) -> bool {
        let ours = &self.metadata;
        (ours.ctime, ours.ctime_nsec, ours.mtime, ours.mtime_nsec)
            == (other.ctime, other.ctime_nsec, other.mtime, other.mtime_nsec)
    }
}

impl PartialEq for IndexEntry {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.stage == other.stage
    }
}

impl Eq for IndexEntry {}

impl PartialOrd for IndexEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for IndexEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.name
            .cmp(&other.name)
            .then_with(|| self.stage.cmp(&other.stage))
    }
}

/// Stat data cached per entry
///
/// A file whose size, mode and timestamps all match its entry is assumed
/// unchanged without rehashing its content.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryMetadata {
    pub ctime: i64,
    pub ctime_nsec: i64,
    pub mtime: i64,
    pub mtime_nsec: i64,
    pub dev: u64,
    pub ino: u64,
    pub mode: EntryMode,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
}

impl EntryMetadata {
    /// The ten stat words in on-disk order, truncated to 32 bits
    fn to_words(&self) -> [u32; STAT_WORDS] {
        [
            self.ctime as u32,
            self.ctime_nsec as u32,
            self.mtime as u32,
            self.mtime_nsec as u32,
            self.dev as u32,
            self.ino as u32,
            self.mode.as_u32(),
            self.uid,
            self.gid,
            self.size as u32,
        ]
    }

    fn from_words(words: [u32; STAT_WORDS]) -> anyhow::Result<Self> {
        let [ctime, ctime_nsec, mtime, mtime_nsec, dev, ino, mode, uid, gid, size] = words;

        Ok(EntryMetadata {
            ctime: ctime.into(),
            ctime_nsec: ctime_nsec.into(),
            mtime: mtime.into(),
            mtime_nsec: mtime_nsec.into(),
            dev: dev.into(),
            ino: ino.into(),
            mode: EntryMode::try_from(mode)?,
            uid,
            gid,
            size: size.into(),
        })
    }
}

impl Packable for IndexEntry {
    fn serialize(&self) -> anyhow::Result<Bytes> {
        let path = self.name.to_str().context("index entry path is not valid UTF-8")?;
        let flags = ((self.stage as u16) << STAGE_SHIFT) | min(path.len(), MAX_PATH_SIZE) as u16;

        let padded = (ENTRY_MIN_SIZE - 2 + path.len() + ENTRY_BLOCK) / ENTRY_BLOCK * ENTRY_BLOCK;
        let mut out = Vec::with_capacity(padded);
        for word in self.metadata.to_words() {
            out.write_u32::<NetworkEndian>(word)?;
        }
        self.oid.write_h40_to(&mut out)?;
        out.write_u16::<NetworkEndian>(flags)?;
        out.write_all(path.as_bytes())?;

        // at least one NUL after the path
        out.resize(padded, 0);
        Ok(Bytes::from(out))
    }
}

impl Unpackable for IndexEntry {
    fn deserialize(mut reader: impl BufRead) -> anyhow::Result<Self> {
        let mut words = [0u32; STAT_WORDS];
        reader
            .read_u32_into::<NetworkEndian>(&mut words)
            .context("index entry is truncated")?;
        let metadata = EntryMetadata::from_words(words)?;
        let oid = ObjectId::read_h40_from(&mut reader)?;
        let flags = reader.read_u16::<NetworkEndian>()?;

        let mut path = Vec::new();
        reader.read_until(0, &mut path)?;
        if path.pop() != Some(0) {
            anyhow::bail!("index entry path is not terminated");
        }
        let path = String::from_utf8(path).context("index entry path is not valid UTF-8")?;

        Ok(IndexEntry {
            name: PathBuf::from(path),
            oid,
            metadata,
            stage: Stage::from_flags(flags),
        })
    }
}

impl TryFrom<(&Path, Metadata)> for EntryMetadata {
    type Error = anyhow::Error;

    /// `metadata` must come from `symlink_metadata` so links are seen as links
    fn try_from((file_path, metadata): (&Path, Metadata)) -> Result<Self, Self::Error> {
        let mode = if metadata.is_dir() {
            EntryMode::Directory
        } else if metadata.file_type().is_symlink() {
            EntryMode::File(FileMode::Symlink)
        } else if file_path.is_executable() {
            EntryMode::File(FileMode::Executable)
        } else {
            EntryMode::File(FileMode::Regular)
        };

        Ok(Self {
            ctime: metadata.ctime(),
            ctime_nsec: metadata.ctime_nsec(),
            mtime: metadata.mtime(),
            mtime_nsec: metadata.mtime_nsec(),
            dev: metadata.dev(),
            ino: metadata.ino(),
            mode,
            uid: metadata.uid(),
            gid: metadata.gid(),
            size: metadata.size(),
        })
    }
}
