//! Host filesystem backend.
//!
//! Passes operations through to a directory on the host. It needs no
//! block device: it binds only on interfaces that resolve to no device.
//!
//! Path security is enforced: `..` cannot climb above the root.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

use super::components;
use crate::blk::{BlockDev, Partition};
use crate::vfs::backend::{DirState, FsDriver, FsVolume};
use crate::vfs::error::{FsError, FsResult};
use crate::vfs::types::{FileType, FsDirent, FsType};

/// Host directory passthrough driver.
///
/// All paths are relative to `root`. For example, if `root` is
/// `/srv/tftp`, then reading `/boot/Image` reads `/srv/tftp/boot/Image`.
#[derive(Debug, Clone)]
pub struct HostFs {
    root: PathBuf,
    read_only: bool,
    id: Uuid,
}

impl HostFs {
    /// Create a writable host backend rooted at `root`.
    ///
    /// The root is canonicalized when possible so that symlinked roots
    /// (e.g. macOS `/tmp`) compare correctly.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root: PathBuf = root.into();
        let root = root.canonicalize().unwrap_or(root);
        Self {
            root,
            read_only: false,
            id: Uuid::new_v4(),
        }
    }

    /// Create a read-only host backend.
    pub fn read_only(root: impl Into<PathBuf>) -> Self {
        Self {
            read_only: true,
            ..Self::new(root)
        }
    }

    /// Get the root path.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Volume id reported by `uuid`, fixed for the life of the driver.
    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl FsDriver for HostFs {
    fn fs_type(&self) -> FsType {
        FsType::Sandbox
    }

    fn name(&self) -> &str {
        "sandbox"
    }

    fn null_dev_ok(&self) -> bool {
        true
    }

    fn probe(&self, dev: Option<&BlockDev>, _part: &Partition) -> FsResult<Box<dyn FsVolume>> {
        if dev.is_some() {
            return Err(FsError::Unrecognized);
        }
        if !self.root.is_dir() {
            return Err(FsError::NoMedium(format!(
                "host root {} is not a directory",
                self.root.display()
            )));
        }
        Ok(Box::new(HostVolume {
            root: self.root.clone(),
            read_only: self.read_only,
            id: self.id,
        }))
    }
}

/// A mounted host directory.
#[derive(Debug)]
pub struct HostVolume {
    root: PathBuf,
    read_only: bool,
    id: Uuid,
}

struct HostDir {
    entries: std::vec::IntoIter<FsDirent>,
}

fn kind_of(meta: &fs::Metadata) -> FileType {
    let ft = meta.file_type();
    if ft.is_dir() {
        FileType::Directory
    } else if ft.is_symlink() {
        FileType::Symlink
    } else {
        FileType::File
    }
}

fn not_found(path: &str) -> impl FnOnce(std::io::Error) -> FsError + '_ {
    move |e| match e.kind() {
        std::io::ErrorKind::NotFound => FsError::not_found(path),
        _ => FsError::Io(e),
    }
}

impl HostVolume {
    /// Resolve a volume path to a host path inside the root.
    ///
    /// Resolution is lexical so that symlinks themselves can be removed or
    /// renamed rather than their targets. Operations that open the target
    /// use [`HostVolume::resolve_target`].
    fn resolve(&self, path: &str) -> FsResult<PathBuf> {
        let mut full = self.root.clone();
        for comp in components(path)? {
            full.push(comp);
        }
        Ok(full)
    }

    /// Resolve a path whose target will be opened, following symlinks.
    ///
    /// The result must stay under the root once symlinks are followed. A
    /// dangling symlink is not followed.
    fn resolve_target(&self, path: &str) -> FsResult<PathBuf> {
        let full = self.resolve(path)?;
        let canonical = match full.canonicalize() {
            Ok(canonical) => canonical,
            Err(_) if fs::symlink_metadata(&full).is_ok() => {
                return Err(FsError::not_found(path));
            }
            Err(_) => match (full.parent(), full.file_name()) {
                (Some(parent), Some(name)) if parent.exists() => parent.canonicalize()?.join(name),
                // Missing parent: the operation itself reports it
                _ => full,
            },
        };

        if !canonical.starts_with(&self.root) {
            return Err(FsError::path_escapes_root(format!(
                "{} is not under {}",
                canonical.display(),
                self.root.display()
            )));
        }
        Ok(canonical)
    }

    fn check_writable(&self) -> FsResult<()> {
        if self.read_only {
            Err(FsError::ReadOnly)
        } else {
            Ok(())
        }
    }

    fn list(&self, path: &str) -> FsResult<Vec<FsDirent>> {
        let full = self.resolve_target(path)?;
        let meta = fs::metadata(&full).map_err(not_found(path))?;
        if !meta.is_dir() {
            return Err(FsError::not_a_directory(path));
        }

        let mut entries = Vec::new();
        for entry in fs::read_dir(&full)? {
            let entry = entry?;
            let meta = fs::symlink_metadata(entry.path())?;
            let kind = kind_of(&meta);
            let size = if kind.is_dir() { 0 } else { meta.len() };
            entries.push(FsDirent::new(
                entry.file_name().to_string_lossy().into_owned(),
                size,
                kind,
            ));
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }
}

impl FsVolume for HostVolume {
    fn ls(&mut self, dir: &str, out: &mut dyn Write) -> FsResult<()> {
        for dent in self.list(dir)? {
            let tag = match dent.kind {
                FileType::File => "   ",
                FileType::Directory => "DIR",
                FileType::Symlink => "LNK",
            };
            writeln!(out, "{tag} {:10} {}", dent.size, dent.name)?;
        }
        Ok(())
    }

    fn exists(&mut self, path: &str) -> bool {
        self.resolve(path)
            .map(|p| fs::symlink_metadata(p).is_ok())
            .unwrap_or(false)
    }

    fn size(&mut self, path: &str) -> FsResult<u64> {
        let meta = fs::metadata(self.resolve_target(path)?).map_err(not_found(path))?;
        if meta.is_dir() {
            return Err(FsError::is_a_directory(path));
        }
        Ok(meta.len())
    }

    fn uuid(&mut self) -> FsResult<String> {
        Ok(self.id.to_string())
    }

    fn read(&mut self, path: &str, offset: u64, buf: &mut [u8]) -> FsResult<u64> {
        let mut file = File::open(self.resolve_target(path)?).map_err(not_found(path))?;
        if file.metadata()?.is_dir() {
            return Err(FsError::is_a_directory(path));
        }
        file.seek(SeekFrom::Start(offset))?;

        let mut total = 0;
        while total < buf.len() {
            match file.read(&mut buf[total..])? {
                0 => break,
                n => total += n,
            }
        }
        Ok(total as u64)
    }

    fn write(&mut self, path: &str, offset: u64, data: &[u8]) -> FsResult<u64> {
        self.check_writable()?;
        let full = self.resolve_target(path)?;
        // Writing from the start replaces the whole file.
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(offset == 0)
            .open(&full)
            .map_err(not_found(path))?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        debug!(path, offset, len = data.len(), "hostfs: wrote");
        Ok(data.len() as u64)
    }

    fn opendir(&mut self, path: &str) -> FsResult<DirState> {
        let entries = self.list(path)?;
        Ok(Box::new(HostDir {
            entries: entries.into_iter(),
        }))
    }

    fn readdir(&mut self, dir: &mut DirState) -> FsResult<Option<FsDirent>> {
        let dir = dir
            .downcast_mut::<HostDir>()
            .ok_or_else(|| FsError::other("hostfs: foreign directory stream"))?;
        Ok(dir.entries.next())
    }

    fn unlink(&mut self, path: &str) -> FsResult<()> {
        self.check_writable()?;
        let full = self.resolve(path)?;
        if full == self.root {
            return Err(FsError::invalid_path(path));
        }
        let meta = fs::symlink_metadata(&full).map_err(not_found(path))?;
        if meta.is_dir() {
            if fs::read_dir(&full)?.next().is_some() {
                return Err(FsError::directory_not_empty(path));
            }
            fs::remove_dir(&full)?;
        } else {
            fs::remove_file(&full)?;
        }
        Ok(())
    }

    fn mkdir(&mut self, path: &str) -> FsResult<()> {
        self.check_writable()?;
        let full = self.resolve(path)?;
        if fs::symlink_metadata(&full).is_ok() {
            return Err(FsError::already_exists(path));
        }
        fs::create_dir(&full).map_err(not_found(path))?;
        Ok(())
    }

    #[cfg(unix)]
    fn ln(&mut self, path: &str, target: &str) -> FsResult<()> {
        self.check_writable()?;
        let full = self.resolve(path)?;
        if fs::symlink_metadata(&full).is_ok() {
            return Err(FsError::already_exists(path));
        }
        std::os::unix::fs::symlink(target, &full)?;
        Ok(())
    }

    fn rename(&mut self, from: &str, to: &str) -> FsResult<()> {
        self.check_writable()?;
        let src = self.resolve(from)?;
        let dst = self.resolve(to)?;
        fs::symlink_metadata(&src).map_err(not_found(from))?;
        fs::rename(&src, &dst)?;
        Ok(())
    }
}
