#![forbid(unsafe_code)]

use std::ffi::OsString;
use std::process::Command;
use tracing::{debug, info};
use zc_error::{Result, ZcError};

use crate::table::DmTable;

/// Creates named device-mapper mappings.
///
/// `create` returns only after the mapping is live and the device event
/// for it has been fully processed, so the node is usable by the time the
/// call returns. A name that is already taken must surface as
/// [`ZcError::Exists`]; every other rejection is [`ZcError::Mapper`].
pub trait DeviceMapper {
    fn create(&self, name: &str, table: &DmTable) -> Result<()>;
}

impl<M: DeviceMapper + ?Sized> DeviceMapper for &M {
    fn create(&self, name: &str, table: &DmTable) -> Result<()> {
        (**self).create(name, table)
    }
}

/// `dmsetup`-backed mapper.
///
/// dmsetup's udev synchronization (on by default) holds `create` until
/// udev has finished with the new node.
#[derive(Debug, Clone)]
pub struct Dmsetup {
    program: OsString,
}

impl Default for Dmsetup {
    fn default() -> Self {
        Self::with_program("dmsetup")
    }
}

impl Dmsetup {
    pub fn with_program(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl DeviceMapper for Dmsetup {
    fn create(&self, name: &str, table: &DmTable) -> Result<()> {
        let table = table.to_string();
        debug!(mapping = name, table = %table, "creating mapping");

        let output = Command::new(&self.program)
            .args(["create", name, "--table", &table])
            .output()
            .map_err(|e| ZcError::Mapper {
                name: name.to_owned(),
                detail: format!("failed to run {}: {e}", self.program.to_string_lossy()),
            })?;

        if output.status.success() {
            info!(mapping = name, "mapping created");
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(classify_failure(name, stderr.trim(), output.status.code()))
    }
}

/// Turn a failed `dmsetup create` into an error, separating a taken name
/// from everything else.
///
/// A taken name is refused by the create ioctl itself. `EBUSY` from any
/// later step (a table reload refused because the underlying device is
/// held) is a real failure.
#[must_use]
pub fn classify_failure(name: &str, stderr: &str, code: Option<i32>) -> ZcError {
    if stderr.lines().any(is_duplicate_line) {
        return ZcError::Exists(name.to_owned());
    }

    let detail = match (stderr.is_empty(), code) {
        (false, _) => stderr.to_owned(),
        (true, Some(code)) => format!("dmsetup exited with status {code}"),
        (true, None) => "dmsetup terminated by signal".to_owned(),
    };
    ZcError::Mapper {
        name: name.to_owned(),
        detail,
    }
}

fn is_duplicate_line(line: &str) -> bool {
    const NAME_TAKEN: [&str; 2] = ["File exists", "Device or resource busy"];

    line.contains("already exists")
        || (line.contains("create ioctl") && NAME_TAKEN.iter().any(|m| line.contains(m)))
}
