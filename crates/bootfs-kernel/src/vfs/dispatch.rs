//! Session binding and operation dispatch.
//!
//! [`Fs`] owns the backend table and the single active session: which
//! device and partition are bound and which backend mounted them. Every
//! operation forwards to the mounted volume and then closes the session,
//! so callers bind before each call:
//!
//! ```ignore
//! fs.set_blk_dev("mmc", Some("0:1"), FsType::Any)?;
//! let size = fs.size("/boot/Image")?;
//! fs.set_blk_dev("mmc", Some("0:1"), FsType::Any)?;
//! let n = fs.read("/boot/Image", &mut mem, 0x4200_0000, 0, 0)?;
//! ```

use std::fmt;
use std::io::Write;
use std::sync::Arc;
use tracing::{debug, error};

use super::backend::{DirState, FsDriver, FsVolume, Unsupported};
use super::error::{FsError, FsResult};
use super::generic::{check_load_region, transfer_len};
use super::table::FsTable;
use super::types::{FsDirent, FsType, Listing};
use crate::blk::{BlockDev, Partition, PartitionResolver};
use crate::lmb::ReservedRegions;
use crate::sysmem::AddressSpace;

/// An open directory iteration.
///
/// Carries the device and partition that were bound when it was opened,
/// so each step can re-bind them no matter what other filesystem calls
/// happened in between.
pub struct DirStream {
    dev: Option<BlockDev>,
    part_no: i32,
    state: Option<DirState>,
}

impl DirStream {
    /// Partition number the stream was opened on.
    pub fn part_no(&self) -> i32 {
        self.part_no
    }
}

impl fmt::Debug for DirStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirStream")
            .field("dev", &self.dev.as_ref().map(|d| d.label().to_string()))
            .field("part_no", &self.part_no)
            .field("open", &self.state.is_some())
            .finish()
    }
}

/// Filesystem dispatch context.
pub struct Fs {
    table: FsTable,
    resolver: Arc<dyn PartitionResolver>,
    dev: Option<BlockDev>,
    part: Partition,
    part_no: i32,
    fs_type: FsType,
    active: Option<usize>,
    volume: Box<dyn FsVolume>,
    errno: i32,
}

impl fmt::Debug for Fs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fs")
            .field("table", &self.table)
            .field("dev", &self.dev.as_ref().map(|d| d.label().to_string()))
            .field("part_no", &self.part_no)
            .field("fs_type", &self.fs_type)
            .field("backend", &self.get_type_name())
            .finish()
    }
}

impl Fs {
    /// Create a context with nothing bound.
    pub fn new(table: FsTable, resolver: impl PartitionResolver + 'static) -> Self {
        Self::with_resolver(table, Arc::new(resolver))
    }

    /// Create a context around a shared resolver.
    pub fn with_resolver(table: FsTable, resolver: Arc<dyn PartitionResolver>) -> Self {
        Self {
            table,
            resolver,
            dev: None,
            part: Partition::default(),
            part_no: 0,
            fs_type: FsType::Any,
            active: None,
            volume: Box::new(Unsupported),
            errno: 0,
        }
    }

    /// The backend table.
    pub fn table(&self) -> &FsTable {
        &self.table
    }

    /// The partition resolver.
    pub fn resolver(&self) -> &dyn PartitionResolver {
        self.resolver.as_ref()
    }

    /// Partition of the current (or most recent) binding.
    pub fn partition(&self) -> &Partition {
        &self.part
    }

    /// Partition number of the current (or most recent) binding.
    pub fn part_no(&self) -> i32 {
        self.part_no
    }

    /// Last error recorded by `opendir`/`readdir`, as a positive errno.
    pub fn errno(&self) -> i32 {
        self.errno
    }

    // ========================================================================
    // Binding
    // ========================================================================

    /// Bind `<ifname> <dev_part>` and detect its filesystem.
    ///
    /// Backends are probed in table order; with `fstype` other than
    /// [`FsType::Any`] only backends of that type (or wildcard backends)
    /// are tried. The first backend that accepts the media is mounted.
    pub fn set_blk_dev(
        &mut self,
        ifname: &str,
        dev_part: Option<&str>,
        fstype: FsType,
    ) -> FsResult<()> {
        let resolved = self.resolver.resolve(ifname, dev_part)?;
        self.dev = resolved.dev;
        self.part = resolved.part;
        self.probe(fstype, resolved.part_no)
    }

    /// Bind an already-resolved device and partition number.
    ///
    /// `part_no >= 1` selects that partition, anything else the whole
    /// device. All backend types are candidates.
    pub fn set_blk_dev_with_part(&mut self, dev: Option<BlockDev>, part_no: i32) -> FsResult<()> {
        self.part = match &dev {
            Some(d) => self.resolver.part_info(d, part_no)?,
            None => Partition::host(),
        };
        self.dev = dev;
        self.part_no = part_no;
        self.probe(FsType::Any, part_no)
    }

    fn probe(&mut self, requested: FsType, part_no: i32) -> FsResult<()> {
        self.close();

        for (idx, driver) in self.table.iter().enumerate() {
            let tag = driver.fs_type();
            if requested != FsType::Any && tag != FsType::Any && requested != tag {
                continue;
            }
            if self.dev.is_none() && !driver.null_dev_ok() {
                continue;
            }
            match driver.probe(self.dev.as_ref(), &self.part) {
                Ok(volume) => {
                    debug!(backend = driver.name(), part_no, "mounted");
                    self.volume = volume;
                    self.fs_type = tag;
                    self.active = Some(idx);
                    self.part_no = part_no;
                    return Ok(());
                }
                Err(e) => debug!(backend = driver.name(), "probe rejected media: {e}"),
            }
        }

        match self.table.sentinel().probe(self.dev.as_ref(), &self.part) {
            Ok(_) => Err(FsError::Unrecognized),
            Err(e) => Err(e),
        }
    }

    /// Close the session. Safe to call when nothing is bound.
    pub fn close(&mut self) {
        if self.active.take().is_some() {
            self.volume.close();
            self.volume = Box::new(Unsupported);
        }
        self.fs_type = FsType::Any;
    }

    /// Type tag of the current session ([`FsType::Any`] when unbound).
    pub fn get_type(&self) -> FsType {
        self.fs_type
    }

    /// Name of the backend that mounted the current session.
    pub fn get_type_name(&self) -> &str {
        self.active_driver().name()
    }

    fn active_driver(&self) -> &dyn FsDriver {
        self.active
            .and_then(|idx| self.table.get(idx))
            .unwrap_or_else(|| self.table.sentinel())
    }

    fn dispatch<T>(&mut self, op: impl FnOnce(&mut dyn FsVolume) -> FsResult<T>) -> FsResult<T> {
        let ret = op(self.volume.as_mut());
        self.close();
        ret
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    /// Print a listing of `dirname` to `out`.
    pub fn ls(&mut self, dirname: &str, out: &mut dyn Write) -> FsResult<()> {
        let ret = match self.active_driver().listing() {
            Listing::Generic => self.ls_generic(dirname, out),
            Listing::Native => self.volume.ls(dirname, out),
        };
        self.close();
        ret
    }

    /// Returns true if `filename` exists.
    pub fn exists(&mut self, filename: &str) -> bool {
        let found = self.volume.exists(filename);
        self.close();
        found
    }

    /// Size of `filename` in bytes.
    pub fn size(&mut self, filename: &str) -> FsResult<u64> {
        self.dispatch(|vol| vol.size(filename))
    }

    /// Filesystem UUID of the bound media.
    pub fn uuid(&mut self) -> FsResult<String> {
        self.dispatch(|vol| vol.uuid())
    }

    /// Load `filename` to `addr`.
    ///
    /// Reads `len` bytes from `offset`, or the rest of the file when `len`
    /// is 0. Returns the number of bytes read, which is short (and not an
    /// error) when the file ends before `offset + len`.
    pub fn read(
        &mut self,
        filename: &str,
        mem: &mut dyn AddressSpace,
        addr: u64,
        offset: u64,
        len: u64,
    ) -> FsResult<u64> {
        let ret = self.transfer_in(filename, mem, None, addr, offset, len);
        self.close();
        ret
    }

    /// [`Fs::read`] guarded by a reserved-memory check.
    ///
    /// Fails with [`FsError::ReservedMemory`] before any byte moves if the
    /// bytes that would be read overlap a reserved region.
    pub fn read_checked(
        &mut self,
        filename: &str,
        mem: &mut dyn AddressSpace,
        reserved: &dyn ReservedRegions,
        addr: u64,
        offset: u64,
        len: u64,
    ) -> FsResult<u64> {
        let ret = self.transfer_in(filename, mem, Some(reserved), addr, offset, len);
        self.close();
        ret
    }

    fn transfer_in(
        &mut self,
        filename: &str,
        mem: &mut dyn AddressSpace,
        reserved: Option<&dyn ReservedRegions>,
        addr: u64,
        offset: u64,
        len: u64,
    ) -> FsResult<u64> {
        let vol = self.volume.as_mut();
        let read_len = transfer_len(vol, filename, offset, len)?;
        if let Some(reserved) = reserved {
            check_load_region(reserved, addr, read_len)?;
        }

        let actread = if read_len == 0 {
            vol.read(filename, offset, &mut [])?
        } else {
            let buf = mem.map(addr, read_len)?;
            vol.read(filename, offset, buf)?
        };

        if len > 0 && actread != len {
            debug!(
                filename,
                requested = len,
                actread,
                "** file shorter than offset + len **"
            );
        }
        Ok(actread)
    }

    /// Save `len` bytes at `addr` into `filename` at `offset`.
    pub fn write(
        &mut self,
        filename: &str,
        mem: &dyn AddressSpace,
        addr: u64,
        offset: u64,
        len: u64,
    ) -> FsResult<u64> {
        let ret = match mem.map_ro(addr, len) {
            Ok(buf) => self.volume.write(filename, offset, buf).map_err(|e| {
                error!("** Unable to write file {filename} **: {e}");
                FsError::failed(format!("unable to write file {filename}: {e}"))
            }),
            Err(e) => Err(e),
        };
        self.close();
        ret
    }

    /// Open `dirname` for iteration.
    ///
    /// On failure the backend error is also recorded in [`Fs::errno`].
    pub fn opendir(&mut self, dirname: &str) -> FsResult<DirStream> {
        let ret = self.volume.opendir(dirname);
        self.close();
        match ret {
            Ok(state) => Ok(DirStream {
                dev: self.dev.clone(),
                part_no: self.part_no,
                state: Some(state),
            }),
            Err(e) => {
                self.errno = -e.errno();
                Err(e)
            }
        }
    }

    fn rebind(&mut self, dirs: &DirStream) {
        if let Err(e) = self.set_blk_dev_with_part(dirs.dev.clone(), dirs.part_no) {
            debug!(part_no = dirs.part_no, "cannot re-bind directory stream: {e}");
        }
    }

    /// Next entry of `dirs`; `Ok(None)` once the directory is exhausted.
    pub fn readdir(&mut self, dirs: &mut DirStream) -> FsResult<Option<FsDirent>> {
        if dirs.state.is_none() {
            return Ok(None);
        }
        self.rebind(dirs);
        let Some(state) = dirs.state.as_mut() else {
            return Ok(None);
        };
        let ret = self.dispatch(|vol| vol.readdir(state));
        if let Err(e) = &ret {
            self.errno = -e.errno();
        }
        ret
    }

    /// Release `dirs`.
    pub fn closedir(&mut self, mut dirs: DirStream) {
        let Some(state) = dirs.state.take() else {
            return;
        };
        self.rebind(&dirs);
        self.volume.closedir(state);
        self.close();
    }

    /// Remove `filename`.
    pub fn unlink(&mut self, filename: &str) -> FsResult<()> {
        self.dispatch(|vol| vol.unlink(filename))
    }

    /// Create directory `dirname`.
    pub fn mkdir(&mut self, dirname: &str) -> FsResult<()> {
        self.dispatch(|vol| vol.mkdir(dirname))
    }

    /// Create symlink `fname` pointing to `target`.
    pub fn ln(&mut self, fname: &str, target: &str) -> FsResult<()> {
        let ret = self.volume.ln(fname, target);
        self.close();
        ret.map_err(|e| {
            error!("** Unable to create link {fname} -> {target} **: {e}");
            FsError::failed(format!("unable to create link {fname} -> {target}"))
        })
    }

    /// Rename `old_path` to exactly `new_path`.
    pub fn rename(&mut self, old_path: &str, new_path: &str) -> FsResult<()> {
        let ret = self.volume.rename(old_path, new_path);
        self.close();
        ret.map_err(|e| {
            debug!("Unable to rename {old_path} -> {new_path}: {e}");
            FsError::failed(format!("unable to rename {old_path} -> {new_path}: {e}"))
        })
    }

    // ========================================================================
    // Whole-file helpers
    // ========================================================================

    /// Read the first `size` bytes of `fname` into a new buffer.
    ///
    /// Fails with [`FsError::ShortRead`] if the file holds fewer bytes.
    pub fn read_alloc(&mut self, fname: &str, size: u64) -> FsResult<Vec<u8>> {
        let mut buf = vec![0u8; size as usize];
        let got = self.dispatch(|vol| vol.read(fname, 0, &mut buf))?;
        if got != size {
            return Err(FsError::ShortRead { wanted: size, got });
        }
        Ok(buf)
    }
}
