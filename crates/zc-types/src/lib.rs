#![forbid(unsafe_code)]
//! Shared vocabulary for zodcache: on-disk constants, the cache-set
//! identifier, device roles, cache modes, and the parse-layer error.

use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Sentinel stored in the first word of every zodcache superblock.
pub const ZC_SB_MAGIC: u64 = 0x20DC_AC8E_8EAC_DC20;

/// The only superblock format version this build understands.
pub const ZC_SB_VERSION: u64 = 0;

/// Number of 64-bit words in a v0 superblock.
pub const ZC_SB_WORDS: usize = 16;

/// Size of a v0 superblock in bytes.
pub const ZC_SB_SIZE: usize = ZC_SB_WORDS * 8;

/// Word index of the checksum field.
pub const ZC_SB_CKSUM_WORD: usize = 1;

/// Bytes reserved for the superblock at the start of each component device.
pub const ZC_SB_RESERVED_SIZE: u64 = 4096;

/// Sector unit used by device-mapper tables.
pub const SECTOR_SIZE: u64 = 512;

pub const MIN_BLOCK_SIZE: u64 = 32 * 1024;
pub const MAX_BLOCK_SIZE: u64 = 1024 * 1024 * 1024;
/// Block sizes must be a multiple of this granularity.
pub const BLOCK_SIZE_GRANULARITY: u64 = 32 * 1024;

// ── Set identifier ──────────────────────────────────────────────────────────

/// 128-bit identifier shared by every device of one cache set.
///
/// On disk the 16 identifier bytes occupy the `uuid_lo` and `uuid_hi`
/// words, each read little-endian, so the raw bytes appear unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct SetId(Uuid);

impl SetId {
    pub const NIL: Self = Self(Uuid::nil());

    #[must_use]
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }

    #[must_use]
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    /// Rebuild the identifier from its host-order `(uuid_lo, uuid_hi)` words.
    #[must_use]
    pub fn from_words(lo: u64, hi: u64) -> Self {
        let mut bytes = [0_u8; 16];
        bytes[..8].copy_from_slice(&lo.to_le_bytes());
        bytes[8..].copy_from_slice(&hi.to_le_bytes());
        Self::from_bytes(bytes)
    }

    /// Split into host-order `(uuid_lo, uuid_hi)` words.
    #[must_use]
    pub fn to_words(self) -> (u64, u64) {
        let bytes = self.0.as_bytes();
        let mut lo = [0_u8; 8];
        let mut hi = [0_u8; 8];
        lo.copy_from_slice(&bytes[..8]);
        hi.copy_from_slice(&bytes[8..]);
        (u64::from_le_bytes(lo), u64::from_le_bytes(hi))
    }
}

impl fmt::Display for SetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for SetId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| ParseError::InvalidField {
                field: "set_id",
                reason: "not a canonical UUID",
            })
    }
}

// ── Device roles ────────────────────────────────────────────────────────────

/// Which extent(s) of a physical device a superblock describes.
///
/// The discriminants are the on-disk `type` word values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Origin = 0,
    Cache = 1,
    Metadata = 2,
    Combined = 3,
}

impl Role {
    pub const ALL: [Self; 4] = [Self::Origin, Self::Cache, Self::Metadata, Self::Combined];

    #[must_use]
    pub fn from_code(code: u64) -> Option<Self> {
        Self::ALL.into_iter().find(|role| role.code() == code)
    }

    #[must_use]
    pub const fn code(self) -> u64 {
        self as u64
    }

    /// Human-readable role name as shown by the dump tool.
    #[must_use]
    pub const fn describe(self) -> &'static str {
        match self {
            Self::Origin => "origin",
            Self::Cache => "cache (non-combined)",
            Self::Metadata => "metadata",
            Self::Combined => "combined",
        }
    }

    /// Noun used in validation messages ("... for combined cache device").
    #[must_use]
    pub const fn device_noun(self) -> &'static str {
        match self {
            Self::Origin => "origin device",
            Self::Cache => "(non-combined) cache device",
            Self::Metadata => "(non-combined) metadata device",
            Self::Combined => "combined cache device",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

/// Role of a materialized component node. A combined device yields two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentRole {
    Origin,
    Cache,
    Metadata,
}

impl ComponentRole {
    pub const ALL: [Self; 3] = [Self::Origin, Self::Cache, Self::Metadata];

    /// Name fragment used in device node paths.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Origin => "origin",
            Self::Cache => "cache",
            Self::Metadata => "metadata",
        }
    }
}

impl fmt::Display for ComponentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Cache modes ─────────────────────────────────────────────────────────────

/// dm-cache write policy. Discriminants are the on-disk `cache_mode` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheMode {
    Writeback = 0,
    Writethrough = 1,
    Passthrough = 2,
}

impl CacheMode {
    pub const ALL: [Self; 3] = [Self::Writeback, Self::Writethrough, Self::Passthrough];

    #[must_use]
    pub fn from_code(code: u64) -> Option<Self> {
        Self::ALL.into_iter().find(|mode| mode.code() == code)
    }

    #[must_use]
    pub const fn code(self) -> u64 {
        self as u64
    }

    /// Canonical name, also the dm-cache feature argument.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Writeback => "writeback",
            Self::Writethrough => "writethrough",
            Self::Passthrough => "passthrough",
        }
    }
}

impl fmt::Display for CacheMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Byte extents ────────────────────────────────────────────────────────────

/// `[offset, offset + size)` in bytes on a physical device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Extent {
    pub offset: u64,
    pub size: u64,
}

impl Extent {
    pub const ZERO: Self = Self { offset: 0, size: 0 };

    #[must_use]
    pub const fn new(offset: u64, size: u64) -> Self {
        Self { offset, size }
    }

    /// Exclusive end offset, `None` on overflow.
    #[must_use]
    pub fn end(self) -> Option<u64> {
        self.offset.checked_add(self.size)
    }
}

/// Convert a byte count to 512-byte sectors (truncating).
#[must_use]
pub const fn bytes_to_sectors(bytes: u64) -> u64 {
    bytes / SECTOR_SIZE
}

// ── Parse errors ────────────────────────────────────────────────────────────

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("insufficient data: need {needed} bytes at offset {offset}, got {actual}")]
    InsufficientData {
        needed: usize,
        offset: usize,
        actual: usize,
    },
    #[error("invalid field: {field} ({reason})")]
    InvalidField {
        field: &'static str,
        reason: &'static str,
    },
}

#[inline]
pub fn ensure_slice(data: &[u8], offset: usize, len: usize) -> Result<&[u8], ParseError> {
    let Some(end) = offset.checked_add(len) else {
        return Err(ParseError::InvalidField {
            field: "offset",
            reason: "overflow",
        });
    };

    if end > data.len() {
        return Err(ParseError::InsufficientData {
            needed: len,
            offset,
            actual: data.len().saturating_sub(offset),
        });
    }

    Ok(&data[offset..end])
}
