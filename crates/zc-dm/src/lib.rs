#![forbid(unsafe_code)]
//! Device node naming and device-mapper materialization.
//!
//! [`DeviceLocator`] predicts where a cache set's nodes appear.
//! [`materialize_component`] and [`create_composite`] build the tables and
//! hand them to a [`DeviceMapper`] backend, which confirms each mapping
//! before returning.

pub mod locator;
pub mod mapper;
pub mod table;

pub use locator::{DEFAULT_MAPPER_DIR, DEFAULT_PREFIX, DeviceLocator};
pub use mapper::{DeviceMapper, Dmsetup, classify_failure};
pub use table::{DmTable, Target};

use std::path::{Path, PathBuf};
use tracing::info;
use zc_error::Result;
use zc_types::{CacheMode, ComponentRole, Extent, SetId};

/// Expose `extent` of `device` as the `role` node of `set_id`.
///
/// Returns the node path the locator predicts. Any mapper failure,
/// including a taken name, is returned unchanged.
pub fn materialize_component<M: DeviceMapper + ?Sized>(
    mapper: &M,
    locator: &DeviceLocator,
    set_id: SetId,
    role: ComponentRole,
    device: &Path,
    extent: Extent,
) -> Result<PathBuf> {
    let name = locator.component_name(set_id, role);
    let table = DmTable::linear(device, extent);
    mapper.create(&name, &table)?;
    info!(
        set_id = %set_id,
        role = %role,
        device = %device.display(),
        "component materialized"
    );
    Ok(locator.component_path(set_id, role))
}

/// Parameters of the composite cached device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompositeSpec {
    pub set_id: SetId,
    /// Logical length in bytes, the full origin extent.
    pub origin_len: u64,
    pub block_size: u64,
    pub mode: CacheMode,
}

/// Create the composite over the set's three component nodes.
pub fn create_composite<M: DeviceMapper + ?Sized>(
    mapper: &M,
    locator: &DeviceLocator,
    spec: &CompositeSpec,
) -> Result<PathBuf> {
    let node = |role| locator.component_path(spec.set_id, role);
    let table = DmTable::cache(
        spec.origin_len,
        &node(ComponentRole::Metadata),
        &node(ComponentRole::Cache),
        &node(ComponentRole::Origin),
        spec.block_size,
        spec.mode,
    );
    mapper.create(&locator.composite_name(spec.set_id), &table)?;
    info!(set_id = %spec.set_id, mode = %spec.mode, "composite device created");
    Ok(locator.composite_path(spec.set_id))
}
