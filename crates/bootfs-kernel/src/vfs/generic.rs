//! Operations composed from the backend slots.

use std::io::Write;
use tracing::{debug, error};

use super::backend::FsVolume;
use super::dispatch::{DirStream, Fs};
use super::error::{FsError, FsResult};
use super::types::FsType;
use crate::lmb::ReservedRegions;

/// Size limit applied by [`Fs::load_alloc`] when the caller passes 0.
pub const DEFAULT_LOAD_LIMIT: u64 = 1 << 30;

/// Number of bytes a read of `filename` at `offset` will transfer.
///
/// Nothing when `offset` is at or past the end of the file, otherwise `len`
/// bytes (or the rest of the file if `len` is 0 or larger than what
/// remains).
pub(crate) fn transfer_len(
    vol: &mut dyn FsVolume,
    filename: &str,
    offset: u64,
    len: u64,
) -> FsResult<u64> {
    let remaining = vol.size(filename)?.saturating_sub(offset);
    Ok(if len == 0 || len > remaining {
        remaining
    } else {
        len
    })
}

/// Refuse a load of `read_len` bytes whose destination overlaps reserved
/// memory.
pub(crate) fn check_load_region(
    reserved: &dyn ReservedRegions,
    addr: u64,
    read_len: u64,
) -> FsResult<()> {
    if read_len == 0 || reserved.is_free(addr, read_len) {
        return Ok(());
    }
    error!("** Reading file would overwrite reserved memory **");
    Err(FsError::ReservedMemory)
}

/// Final path for moving `src` into the directory `dst_dir`.
///
/// The last component of `src` is appended to `dst_dir`, inserting a
/// separator unless `dst_dir` already ends with one.
pub fn move_target(src: &str, dst_dir: &str) -> String {
    let name = src.rsplit_once('/').map_or(src, |(_, name)| name);
    if dst_dir.ends_with('/') {
        format!("{dst_dir}{name}")
    } else {
        format!("{dst_dir}/{name}")
    }
}

impl Fs {
    /// Directory listing built from opendir/readdir/closedir.
    ///
    /// Used for backends without a native listing. Symlinks are counted as
    /// files.
    pub fn ls_generic(&mut self, dirname: &str, out: &mut dyn Write) -> FsResult<()> {
        let mut dirs = self.opendir(dirname)?;
        let listed = self.print_entries(&mut dirs, out);
        self.closedir(dirs);
        let (nfiles, ndirs) = listed?;

        write!(out, "\n{nfiles} file(s), {ndirs} dir(s)\n\n")?;
        Ok(())
    }

    fn print_entries(
        &mut self,
        dirs: &mut DirStream,
        out: &mut dyn Write,
    ) -> FsResult<(usize, usize)> {
        let (mut nfiles, mut ndirs) = (0, 0);
        loop {
            let dent = match self.readdir(dirs) {
                Ok(Some(dent)) => dent,
                Ok(None) => break,
                Err(e) => {
                    debug!("readdir stopped early: {e}");
                    break;
                }
            };

            if dent.kind.is_dir() {
                writeln!(out, "            {}/", dent.name)?;
                ndirs += 1;
            } else if dent.kind.is_symlink() {
                writeln!(out, "    <SYM>   {}", dent.name)?;
                nfiles += 1;
            } else {
                writeln!(out, " {:8}   {}", dent.size, dent.name)?;
                nfiles += 1;
            }
        }
        Ok((nfiles, ndirs))
    }

    /// Move or rename `src` to `dst`.
    ///
    /// When `dst` opens as a directory, `src` is moved into it under its
    /// own name; otherwise `dst` is taken as the new path. The interface,
    /// device and type arguments are the same as for
    /// [`Fs::set_blk_dev`].
    pub fn mv(
        &mut self,
        ifname: &str,
        dev_part: Option<&str>,
        fstype: FsType,
        src: &str,
        dst: &str,
    ) -> FsResult<()> {
        self.set_blk_dev(ifname, dev_part, fstype)?;

        let target = match self.opendir(dst) {
            Ok(dirs) => {
                self.closedir(dirs);
                move_target(src, dst)
            }
            Err(_) => dst.to_string(),
        };

        self.set_blk_dev(ifname, dev_part, fstype)?;
        self.rename(src, &target)
    }

    /// Bind, size-check and read a whole file into a new buffer.
    ///
    /// `max_size` of 0 means [`DEFAULT_LOAD_LIMIT`]. Files at or above the
    /// limit are refused.
    pub fn load_alloc(
        &mut self,
        ifname: &str,
        dev_part: Option<&str>,
        fname: &str,
        max_size: u64,
    ) -> FsResult<Vec<u8>> {
        let bind = |fs: &mut Fs| {
            fs.set_blk_dev(ifname, dev_part, FsType::Any)
                .map_err(|e| FsError::NoMedium(format!("{ifname} {}: {e}", dev_part.unwrap_or(""))))
        };

        bind(self)?;
        let size = self
            .size(fname)
            .map_err(|_| FsError::not_found(fname))?;

        let limit = if max_size == 0 { DEFAULT_LOAD_LIMIT } else { max_size };
        if size >= limit {
            return Err(FsError::TooBig { size, limit });
        }

        bind(self)?;
        self.read_alloc(fname, size)
    }
}
