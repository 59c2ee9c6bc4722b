#![forbid(unsafe_code)]
//! Human-readable rendering of a superblock and everything wrong with it.

use serde::Serialize;
use std::fmt;
use std::path::Path;
use zc_error::Result;
use zc_lexicon::format_size;
use zc_ondisk::Superblock;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DumpReport {
    pub magic: String,
    pub checksum: u64,
    pub version: u64,
    pub size: u64,
    pub role: String,
    pub device_major: u64,
    pub set_id: String,
    pub block_size: String,
    pub cache_mode: String,
    pub origin_offset: String,
    pub origin_size: String,
    pub cache_offset: String,
    pub cache_size: String,
    pub metadata_offset: String,
    pub metadata_size: String,
    /// Every validation issue, in evaluation order. Empty when valid.
    pub problems: Vec<String>,
}

impl DumpReport {
    #[must_use]
    pub fn from_superblock(sb: &Superblock) -> Self {
        let size = |bytes| format_size(bytes, true);
        Self {
            magic: format!("{:016X}", sb.magic),
            checksum: sb.checksum,
            version: sb.version,
            size: sb.size,
            role: sb.role().map_or_else(
                || format!("invalid ({})", sb.role),
                |role| role.describe().to_owned(),
            ),
            device_major: sb.device_major,
            set_id: sb.set_id.to_string(),
            block_size: size(sb.block_size),
            cache_mode: sb.cache_mode().map_or_else(
                || format!("invalid ({})", sb.cache_mode),
                |mode| mode.as_str().to_owned(),
            ),
            origin_offset: size(sb.origin.offset),
            origin_size: size(sb.origin.size),
            cache_offset: size(sb.cache.offset),
            cache_size: size(sb.cache.size),
            metadata_offset: size(sb.metadata.offset),
            metadata_size: size(sb.metadata.size),
            problems: sb.issues().map(|issue| issue.to_string()).collect(),
        }
    }

    /// Read the superblock of `path` and build its report.
    pub fn from_device(path: impl AsRef<Path>) -> Result<Self> {
        zc_block::read_superblock(path).map(|sb| Self::from_superblock(&sb))
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.problems.is_empty()
    }
}

impl fmt::Display for DumpReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rows: [(&str, &dyn fmt::Display); 15] = [
            ("magic", &self.magic),
            ("checksum", &self.checksum),
            ("version", &self.version),
            ("size", &self.size),
            ("type", &self.role),
            ("dev_major", &self.device_major),
            ("uuid", &self.set_id),
            ("block_size", &self.block_size),
            ("cache_mode", &self.cache_mode),
            ("o_offset", &self.origin_offset),
            ("o_size", &self.origin_size),
            ("c_offset", &self.cache_offset),
            ("c_size", &self.cache_size),
            ("md_offset", &self.metadata_offset),
            ("md_size", &self.metadata_size),
        ];
        for (label, value) in rows {
            writeln!(f, "{:<12}{value}", format!("{label}:"))?;
        }
        if !self.problems.is_empty() {
            writeln!(f, "\nProblems:")?;
            for problem in &self.problems {
                writeln!(f, "\t{problem}")?;
            }
        }
        Ok(())
    }
}
