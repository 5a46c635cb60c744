//! Test doubles and image builders.
//!
//! Enabled for this crate's own tests and, through the `test-mock`
//! feature, for dependent crates.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::blk::dos::{self, DosEntry};
use crate::blk::{BlockDev, PartReader, Partition};
use crate::vfs::backends::components;
use crate::vfs::{DirState, FileType, FsDirent, FsDriver, FsError, FsResult, FsType, FsVolume, Listing};

/// Entry in the memory filesystem.
#[derive(Debug, Clone)]
enum Entry {
    File(Vec<u8>),
    Directory,
    Symlink(String),
}

type Tree = Arc<RwLock<HashMap<String, Entry>>>;

fn key(path: &str) -> FsResult<String> {
    Ok(components(path)?.join("/"))
}

fn parent(key: &str) -> &str {
    key.rsplit_once('/').map_or("", |(p, _)| p)
}

/// Scriptable in-memory backend.
///
/// Clones share the same tree and counters, so a test can keep a handle
/// after registering the driver in a table.
#[derive(Debug, Clone)]
pub struct MemFsDriver {
    tag: FsType,
    name: String,
    magic: Option<Vec<u8>>,
    null_dev_ok: bool,
    listing: Listing,
    uuid: Option<String>,
    tree: Tree,
    probes: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
}

impl MemFsDriver {
    /// Create a driver that accepts any block device.
    pub fn new(tag: FsType, name: impl Into<String>) -> Self {
        let mut entries = HashMap::new();
        // Root directory always exists
        entries.insert(String::new(), Entry::Directory);
        Self {
            tag,
            name: name.into(),
            magic: None,
            null_dev_ok: false,
            listing: Listing::Native,
            uuid: None,
            tree: Arc::new(RwLock::new(entries)),
            probes: Arc::new(AtomicUsize::new(0)),
            closes: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Only accept media whose partition starts with `magic`.
    pub fn with_magic(mut self, magic: &[u8]) -> Self {
        self.magic = Some(magic.to_vec());
        self
    }

    /// Accept binding without a block device.
    pub fn null_dev(mut self) -> Self {
        self.null_dev_ok = true;
        self
    }

    /// List through the generic opendir/readdir path.
    pub fn generic_listing(mut self) -> Self {
        self.listing = Listing::Generic;
        self
    }

    /// Report `uuid` from the uuid slot.
    pub fn with_uuid(mut self, uuid: impl Into<String>) -> Self {
        self.uuid = Some(uuid.into());
        self
    }

    /// Add a file, creating missing parent directories.
    pub fn with_file(self, path: &str, data: &[u8]) -> Self {
        self.insert(path, Entry::File(data.to_vec()));
        self
    }

    /// Add a directory, creating missing parents.
    pub fn with_dir(self, path: &str) -> Self {
        self.insert(path, Entry::Directory);
        self
    }

    /// Add a symlink.
    pub fn with_symlink(self, path: &str, target: &str) -> Self {
        self.insert(path, Entry::Symlink(target.to_string()));
        self
    }

    fn insert(&self, path: &str, entry: Entry) {
        let Ok(k) = key(path) else {
            return;
        };
        let mut tree = self.tree.write();
        let mut end = 0;
        while let Some(pos) = k[end..].find('/') {
            end += pos;
            tree.entry(k[..end].to_string()).or_insert(Entry::Directory);
            end += 1;
        }
        tree.insert(k, entry);
    }

    /// Contents of the file at `path`, if it is one.
    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        match self.tree.read().get(&key(path).ok()?) {
            Some(Entry::File(data)) => Some(data.clone()),
            _ => None,
        }
    }

    /// Returns true if anything exists at `path`.
    pub fn contains(&self, path: &str) -> bool {
        key(path).is_ok_and(|k| self.tree.read().contains_key(&k))
    }

    /// Number of times `probe` was called.
    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    /// Number of mounts torn down.
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

impl FsDriver for MemFsDriver {
    fn fs_type(&self) -> FsType {
        self.tag
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn null_dev_ok(&self) -> bool {
        self.null_dev_ok
    }

    fn listing(&self) -> Listing {
        self.listing
    }

    fn probe(&self, dev: Option<&BlockDev>, part: &Partition) -> FsResult<Box<dyn FsVolume>> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        if let Some(magic) = &self.magic {
            let dev = dev.ok_or(FsError::Unrecognized)?;
            let reader = PartReader::new(dev.clone(), part.clone());
            let mut head = vec![0u8; magic.len()];
            if reader.read_at(0, &mut head)? != magic.len() || &head != magic {
                return Err(FsError::Unrecognized);
            }
        }
        Ok(Box::new(MemVolume {
            tree: self.tree.clone(),
            uuid: self.uuid.clone(),
            closes: self.closes.clone(),
        }))
    }
}

struct MemVolume {
    tree: Tree,
    uuid: Option<String>,
    closes: Arc<AtomicUsize>,
}

struct MemDir(std::vec::IntoIter<FsDirent>);

impl MemVolume {
    fn children(&self, path: &str) -> FsResult<Vec<FsDirent>> {
        let dir = key(path)?;
        let tree = self.tree.read();
        match tree.get(&dir) {
            Some(Entry::Directory) => {}
            Some(_) => return Err(FsError::not_a_directory(path)),
            None => return Err(FsError::not_found(path)),
        }

        let mut out: Vec<FsDirent> = tree
            .iter()
            .filter(|(k, _)| !k.is_empty() && parent(k) == dir)
            .map(|(k, e)| {
                let name = k.rsplit_once('/').map_or(k.as_str(), |(_, n)| n);
                match e {
                    Entry::File(data) => FsDirent::file(name, data.len() as u64),
                    Entry::Directory => FsDirent::directory(name),
                    Entry::Symlink(_) => FsDirent::symlink(name),
                }
            })
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    fn require_parent_dir(&self, k: &str, path: &str) -> FsResult<()> {
        match self.tree.read().get(parent(k)) {
            Some(Entry::Directory) => Ok(()),
            Some(_) => Err(FsError::not_a_directory(path)),
            None => Err(FsError::not_found(path)),
        }
    }
}

impl FsVolume for MemVolume {
    fn ls(&mut self, dir: &str, out: &mut dyn Write) -> FsResult<()> {
        for dent in self.children(dir)? {
            let kind = match dent.kind {
                FileType::File => 'f',
                FileType::Directory => 'd',
                FileType::Symlink => 'l',
            };
            writeln!(out, "{kind} {} {}", dent.size, dent.name)?;
        }
        Ok(())
    }

    fn exists(&mut self, path: &str) -> bool {
        key(path).is_ok_and(|k| self.tree.read().contains_key(&k))
    }

    fn size(&mut self, path: &str) -> FsResult<u64> {
        match self.tree.read().get(&key(path)?) {
            Some(Entry::File(data)) => Ok(data.len() as u64),
            Some(Entry::Symlink(target)) => Ok(target.len() as u64),
            Some(Entry::Directory) => Err(FsError::is_a_directory(path)),
            None => Err(FsError::not_found(path)),
        }
    }

    fn read(&mut self, path: &str, offset: u64, buf: &mut [u8]) -> FsResult<u64> {
        let tree = self.tree.read();
        let data = match tree.get(&key(path)?) {
            Some(Entry::File(data)) => data,
            Some(_) => return Err(FsError::is_a_directory(path)),
            None => return Err(FsError::not_found(path)),
        };
        let start = (offset as usize).min(data.len());
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        Ok(n as u64)
    }

    fn write(&mut self, path: &str, offset: u64, data: &[u8]) -> FsResult<u64> {
        let k = key(path)?;
        self.require_parent_dir(&k, path)?;
        let mut tree = self.tree.write();
        let entry = tree.entry(k).or_insert_with(|| Entry::File(Vec::new()));
        let Entry::File(contents) = entry else {
            return Err(FsError::is_a_directory(path));
        };
        let end = offset as usize + data.len();
        if contents.len() < end {
            contents.resize(end, 0);
        }
        contents[offset as usize..end].copy_from_slice(data);
        Ok(data.len() as u64)
    }

    fn uuid(&mut self) -> FsResult<String> {
        self.uuid.clone().ok_or(FsError::Unsupported)
    }

    fn opendir(&mut self, path: &str) -> FsResult<DirState> {
        Ok(Box::new(MemDir(self.children(path)?.into_iter())))
    }

    fn readdir(&mut self, dir: &mut DirState) -> FsResult<Option<FsDirent>> {
        let dir = dir
            .downcast_mut::<MemDir>()
            .ok_or_else(|| FsError::other("memfs: foreign directory stream"))?;
        Ok(dir.0.next())
    }

    fn unlink(&mut self, path: &str) -> FsResult<()> {
        let k = key(path)?;
        if k.is_empty() {
            return Err(FsError::invalid_path(path));
        }
        let has_children = self.tree.read().keys().any(|c| !c.is_empty() && parent(c) == k);
        let mut tree = self.tree.write();
        match tree.get(&k) {
            None => Err(FsError::not_found(path)),
            Some(Entry::Directory) if has_children => Err(FsError::directory_not_empty(path)),
            Some(_) => {
                tree.remove(&k);
                Ok(())
            }
        }
    }

    fn mkdir(&mut self, path: &str) -> FsResult<()> {
        let k = key(path)?;
        self.require_parent_dir(&k, path)?;
        let mut tree = self.tree.write();
        if tree.contains_key(&k) {
            return Err(FsError::already_exists(path));
        }
        tree.insert(k, Entry::Directory);
        Ok(())
    }

    fn ln(&mut self, path: &str, target: &str) -> FsResult<()> {
        let k = key(path)?;
        self.require_parent_dir(&k, path)?;
        let mut tree = self.tree.write();
        if tree.contains_key(&k) {
            return Err(FsError::already_exists(path));
        }
        tree.insert(k, Entry::Symlink(target.to_string()));
        Ok(())
    }

    fn rename(&mut self, from: &str, to: &str) -> FsResult<()> {
        let (src, dst) = (key(from)?, key(to)?);
        self.require_parent_dir(&dst, to)?;
        let mut tree = self.tree.write();
        if !tree.contains_key(&src) {
            return Err(FsError::not_found(from));
        }

        // Move the entry and everything below it.
        let prefix = format!("{src}/");
        let moved: Vec<String> = tree
            .keys()
            .filter(|k| **k == src || k.starts_with(&prefix))
            .cloned()
            .collect();
        for old in moved {
            if let Some(entry) = tree.remove(&old) {
                let new = format!("{dst}{}", &old[src.len()..]);
                tree.insert(new, entry);
            }
        }
        Ok(())
    }

    fn close(&mut self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

// ============================================================================
// Image builders
// ============================================================================

const S_IFDIR: u32 = 0o040000;
const S_IFREG: u32 = 0o100000;
const S_IFLNK: u32 = 0o120000;

/// Builds newc cpio archives.
#[derive(Debug, Default)]
pub struct CpioBuilder {
    members: Vec<(String, u32, Vec<u8>)>,
}

impl CpioBuilder {
    /// Start an empty archive.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a directory.
    pub fn dir(mut self, name: &str) -> Self {
        self.members.push((name.to_string(), S_IFDIR | 0o755, Vec::new()));
        self
    }

    /// Add a regular file.
    pub fn file(mut self, name: &str, data: &[u8]) -> Self {
        self.members.push((name.to_string(), S_IFREG | 0o644, data.to_vec()));
        self
    }

    /// Add a symlink.
    pub fn symlink(mut self, name: &str, target: &str) -> Self {
        self.members
            .push((name.to_string(), S_IFLNK | 0o777, target.as_bytes().to_vec()));
        self
    }

    /// Serialize, appending the trailer.
    pub fn build(self) -> Vec<u8> {
        let mut out = Vec::new();
        for (ino, (name, mode, data)) in self.members.iter().enumerate() {
            push_member(&mut out, ino as u32 + 1, name, *mode, data);
        }
        push_member(&mut out, 0, "TRAILER!!!", 0, &[]);
        out
    }
}

fn pad4(out: &mut Vec<u8>) {
    while out.len() % 4 != 0 {
        out.push(0);
    }
}

fn push_member(out: &mut Vec<u8>, ino: u32, name: &str, mode: u32, data: &[u8]) {
    let fields = [
        ino,
        mode,
        0,
        0,
        1,
        0,
        data.len() as u32,
        0,
        0,
        0,
        0,
        name.len() as u32 + 1,
        0,
    ];
    out.extend_from_slice(b"070701");
    for f in fields {
        out.extend_from_slice(format!("{f:08X}").as_bytes());
    }
    out.extend_from_slice(name.as_bytes());
    out.push(0);
    pad4(out);
    out.extend_from_slice(data);
    pad4(out);
}

/// Build a disk image with a DOS partition table.
///
/// Each partition's payload is copied to its start sector. The image is
/// `blocks` 512-byte sectors long.
pub fn dos_disk(blocks: u64, parts: &[(DosEntry, &[u8])]) -> Vec<u8> {
    let entries: Vec<DosEntry> = parts.iter().map(|(e, _)| *e).collect();
    let mut image = dos::build(&entries);
    image.resize((blocks * 512) as usize, 0);
    for (entry, payload) in parts {
        let at = entry.start as usize * 512;
        let len = payload.len().min(entry.sectors as usize * 512);
        image[at..at + len].copy_from_slice(&payload[..len]);
    }
    image
}
