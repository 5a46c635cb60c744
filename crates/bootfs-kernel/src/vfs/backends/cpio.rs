//! Read-only newc cpio archive backend.
//!
//! The archive sits at the start of the bound partition. Probing walks
//! the headers once and keeps an index of where each member's data
//! lives. File contents are read from the device on demand.
//!
//! Each member is a 110-byte header of ASCII hex fields, the NUL
//! terminated name, padding to a 4-byte boundary, the data, and padding
//! again. A member named `TRAILER!!!` ends the archive.

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use super::components;
use crate::blk::{BlockDev, Partition, PartReader};
use crate::vfs::backend::{DirState, FsDriver, FsVolume};
use crate::vfs::error::{FsError, FsResult};
use crate::vfs::types::{FileType, FsDirent, FsType, Listing};

/// Magic of the newc format.
pub const MAGIC: &[u8; 6] = b"070701";
/// Name of the end-of-archive member.
pub const TRAILER: &str = "TRAILER!!!";

const HEADER_LEN: u64 = 110;
const MODE_TYPE_MASK: u32 = 0o170000;
const MODE_DIR: u32 = 0o040000;
const MODE_FILE: u32 = 0o100000;
const MODE_LINK: u32 = 0o120000;
const MAX_SYMLINK_HOPS: usize = 8;

fn align4(n: u64) -> u64 {
    (n + 3) & !3
}

fn hex_field(header: &[u8], at: usize) -> FsResult<u32> {
    let raw = &header[at..at + 8];
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| u32::from_str_radix(s, 16).ok())
        .ok_or_else(|| FsError::corrupt(format!("cpio: bad header field at byte {at}")))
}

#[derive(Debug, Clone)]
struct Node {
    kind: FileType,
    size: u64,
    data: u64,
}

impl Node {
    fn dir() -> Self {
        Self {
            kind: FileType::Directory,
            size: 0,
            data: 0,
        }
    }
}

/// Archive index keyed by slash-joined path ("" is the root).
type Index = BTreeMap<String, Node>;

fn insert_with_parents(index: &mut Index, path: &str, node: Node) {
    let mut end = 0;
    while let Some(pos) = path[end..].find('/') {
        end += pos;
        index.entry(path[..end].to_string()).or_insert_with(Node::dir);
        end += 1;
    }
    index.insert(path.to_string(), node);
}

fn scan(reader: &PartReader) -> FsResult<Index> {
    let mut index = Index::new();
    index.insert(String::new(), Node::dir());

    let limit = reader.partition().byte_len();
    let mut pos = 0u64;
    let mut header = [0u8; HEADER_LEN as usize];
    loop {
        reader.read_exact_at(pos, &mut header)?;
        if &header[..6] != MAGIC {
            return Err(FsError::corrupt(format!("cpio: bad magic at offset {pos:#x}")));
        }
        let mode = hex_field(&header, 14)?;
        let file_size = hex_field(&header, 54)? as u64;
        let name_size = hex_field(&header, 94)? as u64;
        if name_size == 0 {
            return Err(FsError::corrupt(format!("cpio: empty name at offset {pos:#x}")));
        }

        let data = align4(pos + HEADER_LEN + name_size);
        if data.saturating_add(file_size) > limit {
            return Err(FsError::corrupt(format!(
                "cpio: member at offset {pos:#x} runs past the end of the partition"
            )));
        }

        let mut raw_name = vec![0u8; name_size as usize];
        reader.read_exact_at(pos + HEADER_LEN, &mut raw_name)?;
        let name = raw_name
            .split(|&b| b == 0)
            .next()
            .and_then(|n| std::str::from_utf8(n).ok())
            .ok_or_else(|| FsError::corrupt("cpio: member name is not valid UTF-8"))?
            .to_string();

        if name == TRAILER {
            break;
        }

        let kind = match mode & MODE_TYPE_MASK {
            MODE_DIR => Some(FileType::Directory),
            MODE_FILE => Some(FileType::File),
            MODE_LINK => Some(FileType::Symlink),
            _ => None,
        };
        match (kind, components(&name)) {
            (Some(kind), Ok(parts)) if !parts.is_empty() => {
                let size = if kind.is_dir() { 0 } else { file_size };
                insert_with_parents(&mut index, &parts.join("/"), Node { kind, size, data });
            }
            _ => debug!(name, mode, "cpio: skipping member"),
        }

        pos = align4(data + file_size);
    }
    debug!(entries = index.len(), "cpio: indexed archive");
    Ok(index)
}

/// Driver for newc cpio archives.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpioDriver;

impl FsDriver for CpioDriver {
    fn fs_type(&self) -> FsType {
        FsType::Cpio
    }

    fn name(&self) -> &str {
        "cpio"
    }

    fn listing(&self) -> Listing {
        Listing::Generic
    }

    fn probe(&self, dev: Option<&BlockDev>, part: &Partition) -> FsResult<Box<dyn FsVolume>> {
        let dev = dev.ok_or(FsError::Unrecognized)?;
        let reader = PartReader::new(dev.clone(), part.clone());

        let mut magic = [0u8; 6];
        if reader.read_at(0, &mut magic)? != magic.len() || &magic != MAGIC {
            return Err(FsError::Unrecognized);
        }

        let index = scan(&reader)?;
        Ok(Box::new(CpioVolume {
            reader,
            index: Arc::new(index),
        }))
    }
}

/// A mounted cpio archive.
pub struct CpioVolume {
    reader: PartReader,
    index: Arc<Index>,
}

struct CpioDir {
    entries: Vec<FsDirent>,
    next: usize,
}

impl CpioVolume {
    fn target(&self, link: &str, node: &Node) -> FsResult<String> {
        let mut raw = vec![0u8; node.size as usize];
        self.reader.read_exact_at(node.data, &mut raw)?;
        let target = String::from_utf8(raw)
            .map_err(|_| FsError::corrupt(format!("cpio: bad link target for {link}")))?;
        if target.starts_with('/') {
            return Ok(target);
        }
        let parent = link.rsplit_once('/').map_or("", |(p, _)| p);
        Ok(format!("{parent}/{target}"))
    }

    /// Find `path`, following symlinks.
    fn lookup(&self, path: &str) -> FsResult<(String, &Node)> {
        let mut key = components(path)?.join("/");
        for _ in 0..MAX_SYMLINK_HOPS {
            let node = self
                .index
                .get(&key)
                .ok_or_else(|| FsError::not_found(path))?;
            if !node.kind.is_symlink() {
                return Ok((key, node));
            }
            let next = self.target(&key, node)?;
            key = components(&next)?.join("/");
        }
        Err(FsError::corrupt(format!("cpio: too many symlinks resolving {path}")))
    }

    fn file(&self, path: &str) -> FsResult<&Node> {
        let (_, node) = self.lookup(path)?;
        if node.kind.is_dir() {
            return Err(FsError::is_a_directory(path));
        }
        Ok(node)
    }
}

impl FsVolume for CpioVolume {
    fn exists(&mut self, path: &str) -> bool {
        self.lookup(path).is_ok()
    }

    fn size(&mut self, path: &str) -> FsResult<u64> {
        Ok(self.file(path)?.size)
    }

    fn read(&mut self, path: &str, offset: u64, buf: &mut [u8]) -> FsResult<u64> {
        let node = self.file(path)?;
        if offset >= node.size {
            return Ok(0);
        }
        let want = (buf.len() as u64).min(node.size - offset) as usize;
        let n = self.reader.read_at(node.data + offset, &mut buf[..want])?;
        Ok(n as u64)
    }

    fn opendir(&mut self, path: &str) -> FsResult<DirState> {
        let (key, node) = self.lookup(path)?;
        if !node.kind.is_dir() {
            return Err(FsError::not_a_directory(path));
        }

        let prefix = if key.is_empty() { String::new() } else { format!("{key}/") };
        let entries = self
            .index
            .range(prefix.clone()..)
            .skip_while(|(k, _)| k.is_empty())
            .take_while(|(k, _)| k.starts_with(&prefix))
            .filter_map(|(k, n)| {
                let name = &k[prefix.len()..];
                (!name.contains('/')).then(|| FsDirent::new(name, n.size, n.kind))
            })
            .collect();

        Ok(Box::new(CpioDir { entries, next: 0 }))
    }

    fn readdir(&mut self, dir: &mut DirState) -> FsResult<Option<FsDirent>> {
        let dir = dir
            .downcast_mut::<CpioDir>()
            .ok_or_else(|| FsError::other("cpio: foreign directory stream"))?;
        let dent = dir.entries.get(dir.next).cloned();
        if dent.is_some() {
            dir.next += 1;
        }
        Ok(dent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blk::MemDisk;
    use crate::testing::CpioBuilder;

    fn mount(archive: Vec<u8>) -> FsResult<Box<dyn FsVolume>> {
        let dev: BlockDev = Arc::new(MemDisk::from_bytes("cpio0", 512, archive));
        let part = Partition::whole_disk(dev.as_ref());
        CpioDriver.probe(Some(&dev), &part)
    }

    fn sample() -> Vec<u8> {
        CpioBuilder::new()
            .dir("boot")
            .file("boot/Image", b"kernel-image-bytes")
            .file("./etc/motd", b"hello")
            .symlink("vmlinuz", "boot/Image")
            .build()
    }

    #[test]
    fn test_probe_rejects_other_media() {
        assert!(matches!(mount(vec![0u8; 1024]), Err(FsError::Unrecognized)));
        let dev: BlockDev = Arc::new(MemDisk::from_bytes("x", 512, sample()));
        let part = Partition::whole_disk(dev.as_ref());
        assert!(matches!(CpioDriver.probe(None, &part), Err(FsError::Unrecognized)));
    }

    #[test]
    fn test_oversized_header_fields_rejected() {
        let mut archive = sample();
        archive[94..102].copy_from_slice(b"FFFFFFFF");
        assert!(matches!(mount(archive), Err(FsError::Corrupt(_))));

        let mut archive = sample();
        archive[54..62].copy_from_slice(b"7FFFFFFF");
        assert!(matches!(mount(archive), Err(FsError::Corrupt(_))));
    }

    #[test]
    fn test_read_and_size() {
        let mut vol = mount(sample()).unwrap();
        assert_eq!(vol.size("/boot/Image").unwrap(), 18);

        let mut buf = [0u8; 6];
        assert_eq!(vol.read("/boot/Image", 7, &mut buf).unwrap(), 6);
        assert_eq!(&buf, b"-image");

        let mut tail = [0u8; 32];
        assert_eq!(vol.read("/boot/Image", 13, &mut tail).unwrap(), 5);
        assert_eq!(vol.read("/boot/Image", 18, &mut tail).unwrap(), 0);
        assert!(matches!(vol.size("/boot"), Err(FsError::IsADirectory(_))));
        assert!(matches!(vol.size("/nope"), Err(FsError::NotFound(_))));
    }

    #[test]
    fn test_symlink_followed() {
        let mut vol = mount(sample()).unwrap();
        assert_eq!(vol.size("vmlinuz").unwrap(), 18);
        assert!(vol.exists("/vmlinuz"));
    }

    #[test]
    fn test_parents_synthesized() {
        let mut vol = mount(sample()).unwrap();
        assert!(vol.exists("/etc"));

        let mut dir = vol.opendir("/").unwrap();
        let mut names = Vec::new();
        while let Some(d) = vol.readdir(&mut dir).unwrap() {
            names.push((d.name, d.kind));
        }
        assert_eq!(
            names,
            vec![
                ("boot".to_string(), FileType::Directory),
                ("etc".to_string(), FileType::Directory),
                ("vmlinuz".to_string(), FileType::Symlink),
            ]
        );
    }

    #[test]
    fn test_read_only() {
        let mut vol = mount(sample()).unwrap();
        assert!(matches!(vol.write("/new", 0, b"x"), Err(FsError::Unsupported)));
        assert!(matches!(vol.unlink("/etc/motd"), Err(FsError::Unsupported)));
        assert!(matches!(vol.opendir("/etc/motd"), Err(FsError::NotADirectory(_))));
    }
}
