#![forbid(unsafe_code)]
//! Writing a fresh set of superblocks to new cache-set devices.
//!
//! [`plan_layout`] is pure: it turns device sizes into sealed records.
//! [`format_devices`] does the I/O around it.

use std::path::{Path, PathBuf};
use tracing::info;
use zc_block::ComponentDevice;
use zc_error::{Result, ZcError};
use zc_lexicon::{LexiconError, block_size_issues, format_size};
use zc_ondisk::Superblock;
use zc_types::{CacheMode, ComponentRole, Extent, Role, SetId, ZC_SB_RESERVED_SIZE};

/// Fixed part of dm-cache metadata.
pub const METADATA_BASE_SIZE: u64 = 4 * 1024 * 1024;
/// Metadata bytes needed per cache block.
pub const METADATA_PER_BLOCK: u64 = 16;

pub const DEFAULT_BLOCK_SIZE: u64 = 256 * 1024;
pub const DEFAULT_ALIGNMENT: u64 = 4096;

/// Map a rejected user token into the runtime error.
#[must_use]
pub fn lexicon_error_to_zc(e: &LexiconError) -> ZcError {
    ZcError::Parse(e.to_string())
}

/// Settings for one formatting run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatConfig {
    pub block_size: u64,
    pub cache_mode: CacheMode,
    /// Start of every data extent. Power of two, at least 4096.
    pub alignment: u64,
    /// Refuse anything that is not a block device.
    pub require_block_device: bool,
}

impl Default for FormatConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            cache_mode: CacheMode::Writeback,
            alignment: DEFAULT_ALIGNMENT,
            require_block_device: true,
        }
    }
}

impl FormatConfig {
    pub fn validate(&self) -> Result<()> {
        if let Some(issue) = block_size_issues(self.block_size).next() {
            return Err(ZcError::Parse(format!(
                "invalid block size: {}: {issue}",
                self.block_size
            )));
        }
        if self.alignment < ZC_SB_RESERVED_SIZE {
            return Err(ZcError::Parse(format!(
                "invalid alignment: {}: must be at least {ZC_SB_RESERVED_SIZE}",
                self.alignment
            )));
        }
        if !self.alignment.is_power_of_two() {
            return Err(ZcError::Parse(format!(
                "invalid alignment: {}: not a power of 2",
                self.alignment
            )));
        }
        Ok(())
    }
}

/// An opened device about to be formatted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatTarget {
    pub path: PathBuf,
    pub size: u64,
    pub major: u64,
}

/// The sealed superblocks for one new cache set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    pub set_id: SetId,
    pub origin: Superblock,
    /// Cache record; role Combined when there is no metadata device.
    pub cache: Superblock,
    pub metadata: Option<Superblock>,
}

/// Cache bytes that fit in `available` alongside their own metadata.
///
/// Solves `cache + 4 MiB + 16 * (cache / block_size) <= available` and
/// rounds down to whole blocks.
pub fn combined_cache_size(available: u64, block_size: u64) -> Result<u64> {
    let minimum = METADATA_BASE_SIZE + METADATA_PER_BLOCK + block_size;
    if available < minimum {
        return Err(ZcError::Layout(format!(
            "cache device too small: {} available, need at least {}",
            format_size(available, true),
            format_size(minimum, true)
        )));
    }

    let cache = (available - METADATA_BASE_SIZE)
        .checked_mul(block_size)
        .ok_or_else(|| {
            ZcError::Layout(format!(
                "cache device too large for block size {}",
                format_size(block_size, true)
            ))
        })?
        / (block_size + METADATA_PER_BLOCK);

    Ok(cache / block_size * block_size)
}

fn usable(target: &FormatTarget, alignment: u64, what: &str) -> Result<u64> {
    target
        .size
        .checked_sub(alignment)
        .filter(|&size| size > 0)
        .ok_or_else(|| {
            ZcError::Layout(format!(
                "{}: {what} device smaller than alignment ({})",
                target.path.display(),
                format_size(alignment, true)
            ))
        })
}

/// Compute sealed superblocks for a new set.
pub fn plan_layout(
    config: &FormatConfig,
    set_id: SetId,
    origin: &FormatTarget,
    cache: &FormatTarget,
    metadata: Option<&FormatTarget>,
) -> Result<Layout> {
    config.validate()?;
    let FormatConfig {
        block_size,
        cache_mode,
        alignment,
        ..
    } = *config;

    let origin_size = usable(origin, alignment, "origin")?;
    let origin_sb = Superblock::new(Role::Origin, set_id, origin.major, block_size, cache_mode)
        .with_extent(ComponentRole::Origin, Extent::new(alignment, origin_size))
        .sealed();

    let cache_usable = usable(cache, alignment, "cache")?;

    let (cache_sb, metadata_sb) = match metadata {
        None => {
            let cache_size = combined_cache_size(cache_usable, block_size)?;
            let md = Extent::new(alignment, cache_usable - cache_size);
            let sb = Superblock::new(Role::Combined, set_id, cache.major, block_size, cache_mode)
                .with_extent(ComponentRole::Metadata, md)
                .with_extent(
                    ComponentRole::Cache,
                    Extent::new(md.offset + md.size, cache_size),
                )
                .sealed();
            (sb, None)
        }
        Some(metadata) => {
            let md_usable = usable(metadata, alignment, "metadata")?;
            let nr_blocks = cache_usable / block_size;
            let needed = METADATA_BASE_SIZE + METADATA_PER_BLOCK * nr_blocks;
            if md_usable < needed {
                return Err(ZcError::Layout(format!(
                    "{}: metadata device too small: {} usable, need {}",
                    metadata.path.display(),
                    format_size(md_usable, true),
                    format_size(needed, true)
                )));
            }
            let cache_sb = Superblock::new(Role::Cache, set_id, cache.major, block_size, cache_mode)
                .with_extent(ComponentRole::Cache, Extent::new(alignment, cache_usable))
                .sealed();
            let md_sb =
                Superblock::new(Role::Metadata, set_id, metadata.major, block_size, cache_mode)
                    .with_extent(ComponentRole::Metadata, Extent::new(alignment, md_usable))
                    .sealed();
            (cache_sb, Some(md_sb))
        }
    };

    Ok(Layout {
        set_id,
        origin: origin_sb,
        cache: cache_sb,
        metadata: metadata_sb,
    })
}

fn open_target(path: &Path, config: &FormatConfig) -> Result<(ComponentDevice, FormatTarget)> {
    let device = ComponentDevice::open_exclusive(path)?;
    let identity = if config.require_block_device {
        device.require_block_device()?
    } else {
        device.identity()?
    };
    let target = FormatTarget {
        path: path.to_path_buf(),
        size: device.size()?,
        major: identity.major,
    };
    Ok((device, target))
}

/// Format a new cache set and return its identifier.
///
/// Every device is opened exclusively before anything is written, and
/// nothing is written unless the whole layout fits.
pub fn format_devices(
    config: &FormatConfig,
    origin: &Path,
    cache: &Path,
    metadata: Option<&Path>,
) -> Result<SetId> {
    config.validate()?;

    let (origin_dev, origin_target) = open_target(origin, config)?;
    let (cache_dev, cache_target) = open_target(cache, config)?;
    let metadata = metadata
        .map(|path| open_target(path, config))
        .transpose()?;

    let set_id = SetId::new_random();
    let layout = plan_layout(
        config,
        set_id,
        &origin_target,
        &cache_target,
        metadata.as_ref().map(|(_, target)| target),
    )?;

    origin_dev.write_superblock(&layout.origin)?;
    cache_dev.write_superblock(&layout.cache)?;
    if let (Some((dev, _)), Some(sb)) = (&metadata, &layout.metadata) {
        dev.write_superblock(sb)?;
    }

    info!(
        set_id = %set_id,
        block_size = config.block_size,
        mode = %config.cache_mode,
        combined = layout.metadata.is_none(),
        "cache set formatted"
    );
    Ok(set_id)
}
