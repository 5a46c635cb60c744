//! Backend contract.
//!
//! A backend comes in two halves:
//!
//! - [`FsDriver`] is the registered descriptor: type tag, name, whether it
//!   can run without a block device, and `probe`.
//! - [`FsVolume`] is what a successful probe returns: the mounted
//!   filesystem with one method per operation slot.
//!
//! Every `FsVolume` method has a default that reports
//! [`FsError::Unsupported`], so a backend only writes the operations it
//! has and the dispatch layer can call any slot unconditionally.

use std::any::Any;
use std::io::Write;
use tracing::error;

use super::error::{FsError, FsResult};
use super::types::{FsDirent, FsType, Listing};
use crate::blk::{BlockDev, Partition};

/// Opaque per-backend directory iteration state.
pub type DirState = Box<dyn Any + Send>;

/// Registered filesystem backend descriptor.
pub trait FsDriver: Send + Sync {
    /// Type tag this backend registers under.
    fn fs_type(&self) -> FsType;

    /// Human-readable name, e.g. `"cpio"`.
    fn name(&self) -> &str;

    /// Returns true if the backend can operate without a block device.
    fn null_dev_ok(&self) -> bool {
        false
    }

    /// How `ls` is carried out for this backend.
    fn listing(&self) -> Listing {
        Listing::Native
    }

    /// Check the media and mount it.
    ///
    /// `dev` is `None` only for backends that return true from
    /// [`FsDriver::null_dev_ok`].
    fn probe(&self, dev: Option<&BlockDev>, part: &Partition) -> FsResult<Box<dyn FsVolume>>;
}

/// A mounted filesystem: the operation slots of one backend.
#[allow(unused_variables)]
pub trait FsVolume: Send {
    /// Print a listing of `dir` to `out`.
    fn ls(&mut self, dir: &str, out: &mut dyn Write) -> FsResult<()> {
        Err(FsError::Unsupported)
    }

    /// Returns true if `path` exists.
    fn exists(&mut self, path: &str) -> bool {
        false
    }

    /// Size of the file at `path` in bytes.
    fn size(&mut self, path: &str) -> FsResult<u64> {
        Err(FsError::Unsupported)
    }

    /// Read from `path` at `offset` into `buf`.
    ///
    /// Returns the number of bytes read, short only at end of file.
    fn read(&mut self, path: &str, offset: u64, buf: &mut [u8]) -> FsResult<u64> {
        Err(FsError::Unsupported)
    }

    /// Write `data` to `path` at `offset`, creating the file if needed.
    ///
    /// Returns the number of bytes written.
    fn write(&mut self, path: &str, offset: u64, data: &[u8]) -> FsResult<u64> {
        Err(FsError::Unsupported)
    }

    /// Filesystem UUID or serial, in the backend's preferred text form.
    fn uuid(&mut self) -> FsResult<String> {
        Err(FsError::Unsupported)
    }

    /// Start iterating `path`.
    fn opendir(&mut self, path: &str) -> FsResult<DirState> {
        Err(FsError::Unsupported)
    }

    /// Next entry of an open directory; `Ok(None)` at the end.
    fn readdir(&mut self, dir: &mut DirState) -> FsResult<Option<FsDirent>> {
        Err(FsError::Unsupported)
    }

    /// Release an open directory.
    fn closedir(&mut self, dir: DirState) {}

    /// Remove a file or empty directory.
    fn unlink(&mut self, path: &str) -> FsResult<()> {
        Err(FsError::Unsupported)
    }

    /// Create a directory.
    fn mkdir(&mut self, path: &str) -> FsResult<()> {
        Err(FsError::Unsupported)
    }

    /// Create a symbolic link at `path` pointing to `target`.
    fn ln(&mut self, path: &str, target: &str) -> FsResult<()> {
        Err(FsError::Unsupported)
    }

    /// Rename `from` to exactly `to`.
    fn rename(&mut self, from: &str, to: &str) -> FsResult<()> {
        Err(FsError::Unsupported)
    }

    /// Tear down the mount. Called once when the session closes.
    fn close(&mut self) {}
}

/// Sentinel backend: matches no media and supports no operation.
///
/// It terminates every backend table and stands in as the mounted volume
/// whenever no session is bound.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unsupported;

impl FsDriver for Unsupported {
    fn fs_type(&self) -> FsType {
        FsType::Any
    }

    fn name(&self) -> &str {
        "unsupported"
    }

    fn null_dev_ok(&self) -> bool {
        true
    }

    fn probe(&self, _dev: Option<&BlockDev>, _part: &Partition) -> FsResult<Box<dyn FsVolume>> {
        error!("** Unrecognized filesystem type **");
        Err(FsError::Unrecognized)
    }
}

impl FsVolume for Unsupported {}
