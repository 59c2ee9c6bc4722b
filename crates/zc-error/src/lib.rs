#![forbid(unsafe_code)]
//! Error types for zodcache.
//!
//! # Error Taxonomy
//!
//! | Layer | Type | Crate | Purpose |
//! |-------|------|-------|---------|
//! | Parsing | `ParseError` | `zc-types` | Superblock byte-level decode failures |
//! | Lexicon | `LexiconError` | `zc-lexicon` | Malformed user-supplied sizes and mode names |
//! | Runtime | `ZcError` | `zc-error` (this crate) | Everything surfaced to the CLI |
//!
//! `zc-error` does not depend on the other crates. `zc-block` converts
//! `ParseError` and `zc-core` converts `LexiconError` at their boundaries.
//!
//! ## Coordinator classification
//!
//! | Variant | Automatic (udev) mode | Manual mode |
//! |---------|-----------------------|-------------|
//! | `InvalidSuperblock` | device skipped, exit 0 | failure |
//! | `StaleSuperblock` | device skipped, exit 0 | failure |
//! | `Exists` | lost race, logged and ignored | lost race, logged and ignored |
//! | any other | failure | failure |

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ZcError {
    /// Operating system I/O error without further context.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// I/O error attributed to a specific device or node path.
    #[error("{}: {source}", path.display())]
    DeviceIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A superblock transfer moved fewer bytes than the record size.
    #[error("failed to {op} component device superblock: incorrect {op} size ({actual} bytes; expected {expected})")]
    ShortTransfer {
        op: &'static str,
        actual: usize,
        expected: usize,
    },

    /// Superblock bytes could not be decoded at all.
    #[error("invalid on-disk format: {0}")]
    Format(String),

    /// User-supplied size or cache-mode token was rejected.
    #[error("parse error: {0}")]
    Parse(String),

    /// Superblock decoded but violates one or more validation rules.
    #[error("{}: invalid superblock ({})", path.display(), issues.join("; "))]
    InvalidSuperblock { path: PathBuf, issues: Vec<String> },

    /// Superblock was written to a device with a different major number.
    #[error("{}: device major number mismatch (superblock records {recorded}, device is {actual})", path.display())]
    StaleSuperblock {
        path: PathBuf,
        recorded: u64,
        actual: u64,
    },

    #[error("{}: not a block device", .0.display())]
    NotBlockDevice(PathBuf),

    /// Devices are too small (or too large) for the requested layout.
    #[error("invalid layout: {0}")]
    Layout(String),

    /// A mapping with this name already exists.
    #[error("device already exists: {0}")]
    Exists(String),

    /// The device-mapper layer rejected or failed to confirm a mapping.
    #[error("device-mapper failure for {name}: {detail}")]
    Mapper { name: String, detail: String },
}

impl ZcError {
    /// True for the duplicate-name rejection produced when two racing
    /// invocations create the same mapping.
    #[must_use]
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Exists(_))
    }

    /// True for the two outcomes that mean "this device does not take part",
    /// which automatic invocations treat as success.
    #[must_use]
    pub fn is_not_participant(&self) -> bool {
        matches!(
            self,
            Self::InvalidSuperblock { .. } | Self::StaleSuperblock { .. }
        )
    }

    pub fn device_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::DeviceIo {
            path: path.into(),
            source,
        }
    }
}

/// Result alias using `ZcError`.
pub type Result<T> = std::result::Result<T, ZcError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_formatting() {
        let short = ZcError::ShortTransfer {
            op: "read",
            actual: 64,
            expected: 128,
        };
        assert_eq!(
            short.to_string(),
            "failed to read component device superblock: incorrect read size (64 bytes; expected 128)"
        );

        let invalid = ZcError::InvalidSuperblock {
            path: PathBuf::from("/dev/sdb"),
            issues: vec!["incorrect magic number".into(), "invalid cache mode".into()],
        };
        assert_eq!(
            invalid.to_string(),
            "/dev/sdb: invalid superblock (incorrect magic number; invalid cache mode)"
        );

        let stale = ZcError::StaleSuperblock {
            path: PathBuf::from("/dev/sdc"),
            recorded: 8,
            actual: 259,
        };
        assert!(stale.to_string().contains("major number mismatch"));

        let io = ZcError::device_io("/dev/sdd", std::io::Error::other("boom"));
        assert_eq!(io.to_string(), "/dev/sdd: boom");
    }

    #[test]
    fn classification_helpers() {
        assert!(ZcError::Exists("zodcache-x".into()).is_duplicate());
        assert!(
            !ZcError::Mapper {
                name: "zodcache-x".into(),
                detail: "ioctl failed".into(),
            }
            .is_duplicate()
        );

        let stale = ZcError::StaleSuperblock {
            path: PathBuf::from("/dev/sdc"),
            recorded: 8,
            actual: 9,
        };
        assert!(stale.is_not_participant());
        assert!(!ZcError::Format("bad".into()).is_not_participant());
    }
}
