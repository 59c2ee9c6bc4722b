#![forbid(unsafe_code)]
//! zodcache core: assembly coordinator, formatting workflow and dump report.

pub mod assemble;
pub mod dump;
pub mod format;

pub use assemble::{
    AssembleOptions, Assembler, DEFAULT_LOCK_DIR, DEFAULT_POLL_INTERVAL, InvocationMode, Outcome,
    required_siblings,
};
pub use dump::DumpReport;
pub use format::{
    FormatConfig, FormatTarget, Layout, combined_cache_size, format_devices, lexicon_error_to_zc,
    plan_layout,
};

pub use zc_dm::{DeviceLocator, DeviceMapper, DmTable, Dmsetup};
pub use zc_error::{Result, ZcError};
pub use zc_lexicon::{LexiconError, format_size, parse_block_size, parse_cache_mode, parse_size};
pub use zc_ondisk::{Issue, Superblock};
pub use zc_types::{CacheMode, ComponentRole, Role, SetId};
