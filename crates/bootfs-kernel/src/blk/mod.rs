//! Block devices and partitions.
//!
//! The dispatch layer never touches sectors itself. It hands a
//! [`BlockDev`] and a [`Partition`] to whichever backend probes, and
//! backends read through a [`PartReader`].

pub mod dos;
mod part;

pub use part::{DeviceRegistry, PartitionResolver, Resolved};

use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;

use crate::vfs::{FsError, FsResult};

/// Default sector size.
pub const DEFAULT_BLOCK_SIZE: u32 = 512;

/// A block device: fixed-size blocks addressed by LBA.
pub trait BlockDevice: Send + Sync + fmt::Debug {
    /// Human-readable device label, e.g. `mmc0`.
    fn label(&self) -> &str;

    /// Block size in bytes.
    fn block_size(&self) -> u32;

    /// Number of blocks.
    fn block_count(&self) -> u64;

    /// Read whole blocks starting at `lba` into `buf`.
    ///
    /// `buf.len()` must be a multiple of the block size.
    fn read_blocks(&self, lba: u64, buf: &mut [u8]) -> FsResult<()>;

    /// Write whole blocks starting at `lba`.
    fn write_blocks(&self, lba: u64, buf: &[u8]) -> FsResult<()>;
}

/// Shared block device handle.
pub type BlockDev = Arc<dyn BlockDevice>;

fn check_io(dev: &dyn BlockDevice, lba: u64, len: usize) -> FsResult<()> {
    let bs = dev.block_size() as usize;
    if len % bs != 0 {
        return Err(FsError::other(format!(
            "{}: transfer of {len} bytes is not block aligned",
            dev.label()
        )));
    }
    let blocks = (len / bs) as u64;
    if lba.checked_add(blocks).is_none_or(|end| end > dev.block_count()) {
        return Err(FsError::Io(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("{}: blocks {lba}+{blocks} past end of device", dev.label()),
        )));
    }
    Ok(())
}

/// RAM-backed block device.
pub struct MemDisk {
    label: String,
    block_size: u32,
    data: RwLock<Vec<u8>>,
}

impl MemDisk {
    /// Create a zero-filled disk of `blocks` blocks.
    pub fn new(label: impl Into<String>, block_size: u32, blocks: u64) -> Self {
        Self {
            label: label.into(),
            block_size,
            data: RwLock::new(vec![0u8; (blocks * block_size as u64) as usize]),
        }
    }

    /// Create a disk holding `image`, padded up to a whole block.
    pub fn from_bytes(label: impl Into<String>, block_size: u32, mut image: Vec<u8>) -> Self {
        let bs = block_size as usize;
        let padded = image.len().div_ceil(bs) * bs;
        image.resize(padded, 0);
        Self {
            label: label.into(),
            block_size,
            data: RwLock::new(image),
        }
    }

    /// Copy of the current disk contents.
    pub fn contents(&self) -> Vec<u8> {
        self.data.read().clone()
    }
}

impl fmt::Debug for MemDisk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemDisk")
            .field("label", &self.label)
            .field("block_size", &self.block_size)
            .field("blocks", &self.block_count())
            .finish()
    }
}

impl BlockDevice for MemDisk {
    fn label(&self) -> &str {
        &self.label
    }

    fn block_size(&self) -> u32 {
        self.block_size
    }

    fn block_count(&self) -> u64 {
        (self.data.read().len() / self.block_size as usize) as u64
    }

    fn read_blocks(&self, lba: u64, buf: &mut [u8]) -> FsResult<()> {
        check_io(self, lba, buf.len())?;
        let start = (lba * self.block_size as u64) as usize;
        let data = self.data.read();
        buf.copy_from_slice(&data[start..start + buf.len()]);
        Ok(())
    }

    fn write_blocks(&self, lba: u64, buf: &[u8]) -> FsResult<()> {
        check_io(self, lba, buf.len())?;
        let start = (lba * self.block_size as u64) as usize;
        let mut data = self.data.write();
        data[start..start + buf.len()].copy_from_slice(buf);
        Ok(())
    }
}

/// Block device backed by a host image file.
#[derive(Debug)]
pub struct FileDisk {
    label: String,
    block_size: u32,
    blocks: u64,
    read_only: bool,
    file: Mutex<File>,
}

impl FileDisk {
    /// Open an image file. Trailing bytes past the last whole block are ignored.
    pub fn open(
        label: impl Into<String>,
        path: impl AsRef<Path>,
        block_size: u32,
        read_only: bool,
    ) -> FsResult<Self> {
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(!read_only)
            .open(path.as_ref())?;
        let len = file.metadata()?.len();
        Ok(Self {
            label: label.into(),
            block_size,
            blocks: len / block_size as u64,
            read_only,
            file: Mutex::new(file),
        })
    }
}

impl BlockDevice for FileDisk {
    fn label(&self) -> &str {
        &self.label
    }

    fn block_size(&self) -> u32 {
        self.block_size
    }

    fn block_count(&self) -> u64 {
        self.blocks
    }

    fn read_blocks(&self, lba: u64, buf: &mut [u8]) -> FsResult<()> {
        check_io(self, lba, buf.len())?;
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(lba * self.block_size as u64))?;
        file.read_exact(buf)?;
        Ok(())
    }

    fn write_blocks(&self, lba: u64, buf: &[u8]) -> FsResult<()> {
        if self.read_only {
            return Err(FsError::ReadOnly);
        }
        check_io(self, lba, buf.len())?;
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(lba * self.block_size as u64))?;
        file.write_all(buf)?;
        Ok(())
    }
}

/// Partition descriptor: where a filesystem lives on its device.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Partition {
    /// First block.
    pub start: u64,
    /// Length in blocks.
    pub size: u64,
    /// Block size in bytes.
    pub blksz: u32,
    /// Partition name.
    pub name: String,
    /// Partition type, e.g. `0x0c` for a DOS FAT32 entry.
    pub type_name: String,
    /// Bootable flag.
    pub bootable: bool,
}

impl Partition {
    /// Descriptor covering the whole device.
    pub fn whole_disk(dev: &dyn BlockDevice) -> Self {
        Self {
            start: 0,
            size: dev.block_count(),
            blksz: dev.block_size(),
            name: "Whole Disk".to_string(),
            type_name: "U-Boot".to_string(),
            bootable: false,
        }
    }

    /// Descriptor for a device-less (virtual) filesystem.
    pub fn host() -> Self {
        Self {
            name: "Host filesystem".to_string(),
            type_name: "U-Boot".to_string(),
            ..Self::default()
        }
    }

    /// Byte offset of the partition on its device.
    pub fn byte_offset(&self) -> u64 {
        self.start * self.blksz as u64
    }

    /// Length of the partition in bytes.
    pub fn byte_len(&self) -> u64 {
        self.size * self.blksz as u64
    }
}

/// Byte-granular reader over one partition.
///
/// Reads are clamped to the partition; unaligned requests are served by
/// bouncing through a block-sized buffer.
pub struct PartReader {
    dev: BlockDev,
    part: Partition,
    pos: u64,
}

impl PartReader {
    /// Create a reader positioned at the start of the partition.
    pub fn new(dev: BlockDev, part: Partition) -> Self {
        Self { dev, part, pos: 0 }
    }

    /// Read up to `buf.len()` bytes at partition-relative `offset`.
    ///
    /// Returns the number of bytes read; short only at the partition end.
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> FsResult<usize> {
        let len = self.part.byte_len();
        if offset >= len {
            return Ok(0);
        }
        let want = (buf.len() as u64).min(len - offset) as usize;
        let bs = self.dev.block_size() as u64;
        let abs = self.part.byte_offset() + offset;

        let first_lba = abs / bs;
        let last_lba = (abs + want as u64).div_ceil(bs);
        let skip = (abs - first_lba * bs) as usize;

        let mut bounce = vec![0u8; ((last_lba - first_lba) * bs) as usize];
        self.dev.read_blocks(first_lba, &mut bounce)?;
        buf[..want].copy_from_slice(&bounce[skip..skip + want]);
        Ok(want)
    }

    /// Read exactly `buf.len()` bytes at `offset`.
    pub fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> FsResult<()> {
        let n = self.read_at(offset, buf)?;
        if n != buf.len() {
            return Err(FsError::corrupt(format!(
                "{}: read past partition end at offset {offset}",
                self.dev.label()
            )));
        }
        Ok(())
    }

    /// The partition this reader covers.
    pub fn partition(&self) -> &Partition {
        &self.part
    }
}

impl Read for PartReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.read_at(self.pos, buf)?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl Seek for PartReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let next = match pos {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::End(d) => self.part.byte_len().checked_add_signed(d),
            SeekFrom::Current(d) => self.pos.checked_add_signed(d),
        };
        self.pos = next.ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "seek before start of partition")
        })?;
        Ok(self.pos)
    }
}
