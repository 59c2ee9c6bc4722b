#![forbid(unsafe_code)]

use std::fmt;
use std::path::{Path, PathBuf};
use zc_types::{CacheMode, Extent, bytes_to_sectors};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Expose `[offset, offset + length)` of `device` unchanged.
    Linear { device: PathBuf, offset_sectors: u64 },
    /// dm-cache over three component nodes, one policy argument set.
    Cache {
        metadata: PathBuf,
        cache: PathBuf,
        origin: PathBuf,
        block_sectors: u64,
        mode: CacheMode,
    },
}

/// A single-target device-mapper table starting at sector zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DmTable {
    pub length_sectors: u64,
    pub target: Target,
}

impl DmTable {
    /// Linear mapping over `extent` (bytes) of `device`.
    #[must_use]
    pub fn linear(device: impl Into<PathBuf>, extent: Extent) -> Self {
        Self {
            length_sectors: bytes_to_sectors(extent.size),
            target: Target::Linear {
                device: device.into(),
                offset_sectors: bytes_to_sectors(extent.offset),
            },
        }
    }

    /// Composite cache mapping covering `origin_len` bytes of the origin.
    #[must_use]
    pub fn cache(
        origin_len: u64,
        metadata: &Path,
        cache: &Path,
        origin: &Path,
        block_size: u64,
        mode: CacheMode,
    ) -> Self {
        Self {
            length_sectors: bytes_to_sectors(origin_len),
            target: Target::Cache {
                metadata: metadata.to_path_buf(),
                cache: cache.to_path_buf(),
                origin: origin.to_path_buf(),
                block_sectors: bytes_to_sectors(block_size),
                mode,
            },
        }
    }

    #[must_use]
    pub fn length_bytes(&self) -> u64 {
        self.length_sectors * zc_types::SECTOR_SIZE
    }
}

impl fmt::Display for DmTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.target {
            Target::Linear {
                device,
                offset_sectors,
            } => write!(
                f,
                "0 {} linear {} {offset_sectors}",
                self.length_sectors,
                device.display()
            ),
            Target::Cache {
                metadata,
                cache,
                origin,
                block_sectors,
                mode,
            } => write!(
                f,
                "0 {} cache {} {} {} {block_sectors} 1 {mode} default 0",
                self.length_sectors,
                metadata.display(),
                cache.display(),
                origin.display()
            ),
        }
    }
}
