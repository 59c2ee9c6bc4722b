#![forbid(unsafe_code)]
//! Component device I/O.
//!
//! Superblock transfers go through `pread`/`pwrite` style calls at offset
//! zero and must move the whole record in one call; a short count is an
//! error, never retried. Identity (block-device check, major number) and
//! size come from the open descriptor, so a path that is replaced between
//! steps cannot mix two devices' answers.

use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom};
use std::os::unix::fs::{FileExt, FileTypeExt, MetadataExt, OpenOptionsExt};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use tracing::{debug, trace};
use zc_error::{Result, ZcError};
use zc_ondisk::Superblock;
use zc_types::{ParseError, ZC_SB_SIZE};

/// Map a decode failure into the runtime error. A region too small for
/// the record means the read came up short.
fn parse_error_to_zc(e: &ParseError) -> ZcError {
    match *e {
        ParseError::InsufficientData { needed, actual, .. } => ZcError::ShortTransfer {
            op: "read",
            actual,
            expected: needed,
        },
        ParseError::InvalidField { .. } => ZcError::Format(e.to_string()),
    }
}

/// What the kernel says a device node is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub is_block_device: bool,
    /// Major number of the device the node refers to; zero for regular files.
    pub major: u64,
}

/// An opened physical device (or, in tests, an image file).
#[derive(Debug)]
pub struct ComponentDevice {
    file: File,
    path: PathBuf,
    writable: bool,
}

impl ComponentDevice {
    /// Open read-only.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .open(path)
            .map_err(|e| ZcError::device_io(path, e))?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
            writable: false,
        })
    }

    /// Open read-write with `O_EXCL`, which for a block device fails with
    /// `EBUSY` while anything else (a mounted filesystem, a mapping) holds it.
    pub fn open_exclusive(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_EXCL)
            .open(path)
            .map_err(|e| ZcError::device_io(path, e))?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
            writable: true,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn identity(&self) -> Result<DeviceIdentity> {
        let metadata = self
            .file
            .metadata()
            .map_err(|e| ZcError::device_io(&self.path, e))?;
        Ok(DeviceIdentity {
            is_block_device: metadata.file_type().is_block_device(),
            major: u64::from(libc::major(metadata.rdev())),
        })
    }

    /// Fail with `NotBlockDevice` unless the node is a block special file.
    pub fn require_block_device(&self) -> Result<DeviceIdentity> {
        let identity = self.identity()?;
        if identity.is_block_device {
            Ok(identity)
        } else {
            Err(ZcError::NotBlockDevice(self.path.clone()))
        }
    }

    /// Size in bytes. Block devices report zero in `st_size`, so this seeks
    /// to the end instead.
    pub fn size(&self) -> Result<u64> {
        (&self.file)
            .seek(SeekFrom::End(0))
            .map_err(|e| ZcError::device_io(&self.path, e))
    }

    /// Read and decode the record at offset zero. No validation is done.
    pub fn read_superblock(&self) -> Result<Superblock> {
        let mut image = [0_u8; ZC_SB_SIZE];
        let n = self
            .file
            .read_at(&mut image, 0)
            .map_err(|e| ZcError::device_io(&self.path, e))?;
        let sb = Superblock::parse_region(&image[..n]).map_err(|e| parse_error_to_zc(&e))?;
        trace!(path = %self.path.display(), "read superblock");
        Ok(sb)
    }

    /// Encode `sb` and write it at offset zero, then flush to stable storage.
    pub fn write_superblock(&self, sb: &Superblock) -> Result<()> {
        if !self.writable {
            return Err(ZcError::device_io(
                &self.path,
                io::Error::from(io::ErrorKind::PermissionDenied),
            ));
        }
        let image = sb.encode();
        let n = self
            .file
            .write_at(&image, 0)
            .map_err(|e| ZcError::device_io(&self.path, e))?;
        if n != ZC_SB_SIZE {
            return Err(ZcError::ShortTransfer {
                op: "write",
                actual: n,
                expected: ZC_SB_SIZE,
            });
        }
        self.file
            .sync_all()
            .map_err(|e| ZcError::device_io(&self.path, e))?;
        debug!(path = %self.path.display(), "wrote superblock");
        Ok(())
    }
}

/// Read and decode the superblock region of the device at `path`.
pub fn read_superblock(path: impl AsRef<Path>) -> Result<Superblock> {
    ComponentDevice::open(path)?.read_superblock()
}

/// Size of the device or file at `path`.
pub fn device_size(path: impl AsRef<Path>) -> Result<u64> {
    ComponentDevice::open(path)?.size()
}

/// Block until `path` can be opened exclusively, polling every `interval`.
///
/// Only `EBUSY` is waited out. Any other open failure is returned at once.
/// There is no deadline.
pub fn wait_for_exclusive(path: impl AsRef<Path>, interval: Duration) -> Result<()> {
    let path = path.as_ref();
    poll_exclusive(path, interval, || {
        OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_EXCL)
            .open(path)
    })
}

fn poll_exclusive<T>(
    path: &Path,
    interval: Duration,
    mut open: impl FnMut() -> io::Result<T>,
) -> Result<()> {
    let mut attempts: u64 = 0;
    loop {
        match open() {
            Ok(handle) => {
                drop(handle);
                if attempts > 0 {
                    debug!(path = %path.display(), attempts, "device released");
                }
                return Ok(());
            }
            Err(e) if e.raw_os_error() == Some(libc::EBUSY) => {
                attempts += 1;
                if attempts == 1 {
                    debug!(path = %path.display(), "device busy, waiting");
                }
                thread::sleep(interval);
            }
            Err(e) => return Err(ZcError::device_io(path, e)),
        }
    }
}
