#![forbid(unsafe_code)]
//! Event-driven assembly of a cache set, one physical device per run.
//!
//! A run identifies the triggering device from its superblock, waits for
//! the device to be released, materializes the component node(s) for its
//! role, then builds the composite device once every sibling node exists.
//! Runs share nothing in memory. The steps from materialization through
//! composite creation are serialized per cache set by an advisory lock
//! file, so concurrent runs for sibling devices create the composite once.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};
use zc_block::ComponentDevice;
use zc_dm::{CompositeSpec, DeviceLocator, DeviceMapper, create_composite, materialize_component};
use zc_error::{Result, ZcError};
use zc_ondisk::{Issue, Superblock, role_extents};
use zc_types::{ComponentRole, Role, SetId};

pub const DEFAULT_LOCK_DIR: &str = "/run/lock/zodcache";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How the coordinator was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationMode {
    /// Device event: devices that do not belong to a valid set are skipped.
    Automatic,
    /// Operator request: any reason not to assemble is an error.
    Manual,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembleOptions {
    /// Directory the mapper creates nodes in.
    pub mapper_dir: PathBuf,
    /// Name prefix of every node of every set.
    pub prefix: String,
    /// Directory holding the per-set lock files.
    pub lock_dir: PathBuf,
    /// Delay between exclusive-open attempts while the device is busy.
    pub poll_interval: Duration,
    pub require_block_device: bool,
}

impl Default for AssembleOptions {
    fn default() -> Self {
        Self {
            mapper_dir: PathBuf::from(zc_dm::DEFAULT_MAPPER_DIR),
            prefix: zc_dm::DEFAULT_PREFIX.to_owned(),
            lock_dir: PathBuf::from(DEFAULT_LOCK_DIR),
            poll_interval: DEFAULT_POLL_INTERVAL,
            require_block_device: true,
        }
    }
}

impl AssembleOptions {
    #[must_use]
    pub fn locator(&self) -> DeviceLocator {
        DeviceLocator::new(&self.mapper_dir, self.prefix.clone())
    }

    #[must_use]
    pub fn lock_path(&self, set_id: SetId) -> PathBuf {
        self.lock_dir.join(format!("{}-{set_id}.lock", self.prefix))
    }
}

/// Result of one successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// No valid superblock (automatic mode only).
    NotParticipant,
    /// Superblock records a different major number (automatic mode only).
    Stale,
    /// Own components are up; these siblings have not appeared yet.
    Partial { missing: Vec<ComponentRole> },
    /// This run created the composite device.
    Assembled { composite: PathBuf },
    /// Another run (or an earlier one) already created it.
    AlreadyAssembled { composite: PathBuf },
}

/// Component nodes that must exist before a device of `role` can assemble.
#[must_use]
pub fn required_siblings(role: Role) -> Vec<ComponentRole> {
    let own = role_extents(role);
    ComponentRole::ALL
        .into_iter()
        .filter(|component| !own.contains(component))
        .collect()
}

/// Held for the critical section of one cache set; released on drop.
#[derive(Debug)]
struct SetLock {
    _file: File,
}

impl SetLock {
    fn acquire(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|e| ZcError::device_io(dir, e))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
            .map_err(|e| ZcError::device_io(path, e))?;
        file.lock().map_err(|e| ZcError::device_io(path, e))?;
        debug!(target: "zc::assemble", event = "set_lock_acquired", path = %path.display());
        Ok(Self { _file: file })
    }
}

pub struct Assembler<M> {
    mapper: M,
    options: AssembleOptions,
    locator: DeviceLocator,
}

impl<M: DeviceMapper> Assembler<M> {
    pub fn new(mapper: M, options: AssembleOptions) -> Self {
        let locator = options.locator();
        Self {
            mapper,
            options,
            locator,
        }
    }

    #[must_use]
    pub fn mapper(&self) -> &M {
        &self.mapper
    }

    #[must_use]
    pub fn options(&self) -> &AssembleOptions {
        &self.options
    }

    #[must_use]
    pub fn locator(&self) -> &DeviceLocator {
        &self.locator
    }

    /// Run the coordinator for the device at `path`.
    pub fn run(&self, path: impl AsRef<Path>, mode: InvocationMode) -> Result<Outcome> {
        let path = path.as_ref();

        let (sb, role, major) = match self.identify(path, mode)? {
            Identified::Member { sb, role, major } => (sb, role, major),
            Identified::Skip(outcome) => return Ok(outcome),
        };

        // Authenticate.
        if sb.device_major != major {
            let err = ZcError::StaleSuperblock {
                path: path.to_path_buf(),
                recorded: sb.device_major,
                actual: major,
            };
            return match mode {
                InvocationMode::Automatic => {
                    info!(
                        target: "zc::assemble",
                        event = "stale_superblock",
                        path = %path.display(),
                        recorded = sb.device_major,
                        actual = major,
                        "{err}"
                    );
                    Ok(Outcome::Stale)
                }
                InvocationMode::Manual => Err(err),
            };
        }

        // Quiesce.
        zc_block::wait_for_exclusive(path, self.options.poll_interval)?;

        let set_id = sb.set_id;
        let _lock = SetLock::acquire(&self.options.lock_path(set_id))?;

        for &component in role_extents(role) {
            self.ensure_component(&sb, component, path)?;
        }

        let missing: Vec<ComponentRole> = required_siblings(role)
            .into_iter()
            .filter(|&sibling| !self.locator.component_path(set_id, sibling).exists())
            .collect();
        if !missing.is_empty() {
            info!(
                target: "zc::assemble",
                event = "siblings_missing",
                set_id = %set_id,
                role = %role,
                missing = ?missing
            );
            return Ok(Outcome::Partial { missing });
        }

        self.assemble(&sb, role)
    }

    fn identify(&self, path: &Path, mode: InvocationMode) -> Result<Identified> {
        let device = ComponentDevice::open(path)?;
        let identity = if self.options.require_block_device {
            device.require_block_device()?
        } else {
            device.identity()?
        };
        let sb = device.read_superblock()?;
        drop(device);

        let issues: Vec<Issue> = sb.issues().collect();
        let role = match (issues.is_empty(), sb.role()) {
            (true, Some(role)) => role,
            _ => {
                let err = ZcError::InvalidSuperblock {
                    path: path.to_path_buf(),
                    issues: issues.iter().map(ToString::to_string).collect(),
                };
                return match mode {
                    InvocationMode::Manual => Err(err),
                    InvocationMode::Automatic if issues.first() == Some(&Issue::Magic) => {
                        debug!(
                            target: "zc::assemble",
                            event = "not_zodcache",
                            path = %path.display()
                        );
                        Ok(Identified::Skip(Outcome::NotParticipant))
                    }
                    InvocationMode::Automatic => {
                        info!(
                            target: "zc::assemble",
                            event = "invalid_superblock",
                            path = %path.display(),
                            "{err} (run `zc dump {}` for details)",
                            path.display()
                        );
                        Ok(Identified::Skip(Outcome::NotParticipant))
                    }
                };
            }
        };

        Ok(Identified::Member {
            sb,
            role,
            major: identity.major,
        })
    }

    /// Create one of this device's component nodes unless it already exists.
    fn ensure_component(
        &self,
        sb: &Superblock,
        component: ComponentRole,
        device: &Path,
    ) -> Result<()> {
        let node = self.locator.component_path(sb.set_id, component);
        if node.exists() {
            info!(
                target: "zc::assemble",
                event = "component_present",
                set_id = %sb.set_id,
                role = %component,
                node = %node.display()
            );
            return Ok(());
        }

        match materialize_component(
            &self.mapper,
            &self.locator,
            sb.set_id,
            component,
            device,
            sb.extent(component),
        ) {
            Ok(_) => Ok(()),
            Err(e) if e.is_duplicate() => {
                confirm_node(&node, &e)?;
                warn!(
                    target: "zc::assemble",
                    event = "component_race_lost",
                    set_id = %sb.set_id,
                    role = %component,
                    "{e}"
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn assemble(&self, sb: &Superblock, role: Role) -> Result<Outcome> {
        let set_id = sb.set_id;
        let composite = self.locator.composite_path(set_id);
        if composite.exists() {
            info!(
                target: "zc::assemble",
                event = "already_assembled",
                set_id = %set_id,
                node = %composite.display()
            );
            return Ok(Outcome::AlreadyAssembled { composite });
        }

        let origin_len = if role == Role::Origin {
            sb.origin.size
        } else {
            zc_block::device_size(self.locator.component_path(set_id, ComponentRole::Origin))?
        };

        let spec = CompositeSpec {
            set_id,
            origin_len,
            block_size: sb.block_size,
            mode: sb
                .cache_mode()
                .ok_or_else(|| ZcError::Format(format!("invalid cache mode {}", sb.cache_mode)))?,
        };

        match create_composite(&self.mapper, &self.locator, &spec) {
            Ok(composite) => Ok(Outcome::Assembled { composite }),
            Err(e) if e.is_duplicate() => {
                confirm_node(&composite, &e)?;
                warn!(
                    target: "zc::assemble",
                    event = "composite_race_lost",
                    set_id = %set_id,
                    "{e}"
                );
                Ok(Outcome::AlreadyAssembled { composite })
            }
            Err(e) => Err(e),
        }
    }
}

/// A duplicate name only counts as a lost race if the winner's node is there.
fn confirm_node(node: &Path, duplicate: &ZcError) -> Result<()> {
    if node.exists() {
        return Ok(());
    }
    Err(ZcError::Mapper {
        name: node
            .file_name()
            .map_or_else(|| node.display().to_string(), |n| n.to_string_lossy().into_owned()),
        detail: format!("{duplicate}, but {} does not exist", node.display()),
    })
}

enum Identified {
    Member { sb: Superblock, role: Role, major: u64 },
    Skip(Outcome),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sibling_table() {
        use ComponentRole::{Cache, Metadata, Origin};
        assert_eq!(required_siblings(Role::Origin), vec![Cache, Metadata]);
        assert_eq!(required_siblings(Role::Cache), vec![Origin, Metadata]);
        assert_eq!(required_siblings(Role::Metadata), vec![Origin, Cache]);
        assert_eq!(required_siblings(Role::Combined), vec![Origin]);
    }

    #[test]
    fn default_options() {
        let options = AssembleOptions::default();
        assert_eq!(options.mapper_dir, PathBuf::from("/dev/mapper"));
        assert_eq!(options.poll_interval, Duration::from_millis(100));
        assert!(options.require_block_device);

        let id = SetId::from_bytes([0; 16]);
        assert_eq!(
            options.lock_path(id),
            PathBuf::from("/run/lock/zodcache/zodcache-00000000-0000-0000-0000-000000000000.lock")
        );
    }

    #[test]
    fn lock_is_released_on_drop() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested/set.lock");
        let first = SetLock::acquire(&path).expect("first");
        drop(first);
        let second = SetLock::acquire(&path).expect("second");
        drop(second);
        assert!(path.exists());
    }
}
