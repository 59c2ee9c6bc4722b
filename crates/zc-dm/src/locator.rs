#![forbid(unsafe_code)]

use std::path::PathBuf;
use zc_types::{ComponentRole, SetId};

pub const DEFAULT_MAPPER_DIR: &str = "/dev/mapper";
pub const DEFAULT_PREFIX: &str = "zodcache";

/// Derives mapping names and node paths for a cache set.
///
/// Composite: `<prefix>-<set_id>`. Component: `<prefix>-<set_id>-<role>`.
/// Nodes live under `dir`. Nothing here touches the filesystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceLocator {
    dir: PathBuf,
    prefix: String,
}

impl Default for DeviceLocator {
    fn default() -> Self {
        Self::new(DEFAULT_MAPPER_DIR, DEFAULT_PREFIX)
    }
}

impl DeviceLocator {
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
        }
    }

    #[must_use]
    pub fn composite_name(&self, set_id: SetId) -> String {
        format!("{}-{set_id}", self.prefix)
    }

    #[must_use]
    pub fn component_name(&self, set_id: SetId, role: ComponentRole) -> String {
        format!("{}-{set_id}-{role}", self.prefix)
    }

    #[must_use]
    pub fn composite_path(&self, set_id: SetId) -> PathBuf {
        self.dir.join(self.composite_name(set_id))
    }

    #[must_use]
    pub fn component_path(&self, set_id: SetId, role: ComponentRole) -> PathBuf {
        self.dir.join(self.component_name(set_id, role))
    }
}
