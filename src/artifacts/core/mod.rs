//! Shared building blocks for the on-disk areas

pub mod lockfile;
