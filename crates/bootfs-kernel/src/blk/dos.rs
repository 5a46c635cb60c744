//! DOS (MBR) partition table.
//!
//! Only the four primary entries are decoded. Extended partitions are
//! reported as-is and not walked.

use super::{BlockDevice, Partition};
use crate::vfs::FsResult;

const TABLE_OFFSET: usize = 0x1be;
const ENTRY_SIZE: usize = 16;
const SIGNATURE_OFFSET: usize = 510;
const SIGNATURE: [u8; 2] = [0x55, 0xaa];
const BOOTABLE: u8 = 0x80;

/// Number of primary entries in an MBR.
pub const MAX_PRIMARY: usize = 4;

/// One primary partition entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DosEntry {
    /// Boot indicator set.
    pub bootable: bool,
    /// System ID byte, e.g. `0x0c` for FAT32 LBA.
    pub sys_ind: u8,
    /// First sector.
    pub start: u32,
    /// Number of sectors.
    pub sectors: u32,
}

impl DosEntry {
    /// Create an entry.
    pub fn new(sys_ind: u8, start: u32, sectors: u32) -> Self {
        Self {
            bootable: false,
            sys_ind,
            start,
            sectors,
        }
    }

    /// Mark the entry bootable.
    pub fn bootable(mut self) -> Self {
        self.bootable = true;
        self
    }

    fn decode(raw: &[u8]) -> Option<Self> {
        let sys_ind = raw[4];
        let start = u32::from_le_bytes([raw[8], raw[9], raw[10], raw[11]]);
        let sectors = u32::from_le_bytes([raw[12], raw[13], raw[14], raw[15]]);
        if sys_ind == 0 || sectors == 0 {
            return None;
        }
        Some(Self {
            bootable: raw[0] == BOOTABLE,
            sys_ind,
            start,
            sectors,
        })
    }

    fn encode(&self, raw: &mut [u8]) {
        raw[0] = if self.bootable { BOOTABLE } else { 0 };
        raw[4] = self.sys_ind;
        raw[8..12].copy_from_slice(&self.start.to_le_bytes());
        raw[12..16].copy_from_slice(&self.sectors.to_le_bytes());
    }
}

/// Decode the primary entries of a sector-0 buffer.
///
/// Returns `None` when the buffer carries no MBR signature. Empty slots
/// are returned as `None` so that entry numbers stay 1-based and stable.
pub fn parse(sector0: &[u8]) -> Option<[Option<DosEntry>; MAX_PRIMARY]> {
    if sector0.len() < 512 || sector0[SIGNATURE_OFFSET..SIGNATURE_OFFSET + 2] != SIGNATURE {
        return None;
    }
    let mut entries = [None; MAX_PRIMARY];
    for (i, slot) in entries.iter_mut().enumerate() {
        let off = TABLE_OFFSET + i * ENTRY_SIZE;
        *slot = DosEntry::decode(&sector0[off..off + ENTRY_SIZE]);
    }
    Some(entries)
}

/// Build a sector-0 image holding `entries`.
pub fn build(entries: &[DosEntry]) -> Vec<u8> {
    let mut sector = vec![0u8; 512];
    for (i, entry) in entries.iter().take(MAX_PRIMARY).enumerate() {
        let off = TABLE_OFFSET + i * ENTRY_SIZE;
        entry.encode(&mut sector[off..off + ENTRY_SIZE]);
    }
    sector[SIGNATURE_OFFSET..SIGNATURE_OFFSET + 2].copy_from_slice(&SIGNATURE);
    sector
}

fn read_table(dev: &dyn BlockDevice) -> FsResult<Option<[Option<DosEntry>; MAX_PRIMARY]>> {
    if dev.block_count() == 0 {
        return Ok(None);
    }
    let mut sector = vec![0u8; dev.block_size() as usize];
    dev.read_blocks(0, &mut sector)?;
    Ok(parse(&sector))
}

/// Returns true if the device carries a DOS partition table.
pub fn has_table(dev: &dyn BlockDevice) -> FsResult<bool> {
    Ok(read_table(dev)?.is_some())
}

/// Look up partition `part` (1-based) on `dev`.
///
/// Returns `Ok(None)` when the device has no table or the slot is empty.
pub fn part_info(dev: &dyn BlockDevice, part: usize) -> FsResult<Option<Partition>> {
    if part == 0 || part > MAX_PRIMARY {
        return Ok(None);
    }
    let Some(table) = read_table(dev)? else {
        return Ok(None);
    };
    Ok(table[part - 1].map(|entry| Partition {
        start: entry.start as u64,
        size: entry.sectors as u64,
        blksz: dev.block_size(),
        name: format!("{}{}", dev.label(), part),
        type_name: format!("{:#04x}", entry.sys_ind),
        bootable: entry.bootable,
    }))
}
