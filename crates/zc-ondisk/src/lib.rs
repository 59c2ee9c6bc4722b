#![forbid(unsafe_code)]
//! On-disk format for zodcache component devices.
//!
//! Pure crate, no I/O: encodes and decodes the fixed 128-byte v0 superblock,
//! computes its checksum, and validates it against the per-role extent
//! rules.

pub mod check;
pub mod superblock;

pub use check::{ExtentField, Issue, role_extents};
pub use superblock::{Endian, Superblock};
