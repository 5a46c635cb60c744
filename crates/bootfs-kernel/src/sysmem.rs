//! Address-space mapping.
//!
//! Loads and saves name their buffers by numeric address. An
//! [`AddressSpace`] turns such an address range into a slice the backend
//! can fill or drain.

use crate::vfs::{FsError, FsResult};

/// Maps numeric addresses to byte slices.
pub trait AddressSpace {
    /// Map `[addr, addr + len)` for writing.
    fn map(&mut self, addr: u64, len: u64) -> FsResult<&mut [u8]>;

    /// Map `[addr, addr + len)` for reading.
    fn map_ro(&self, addr: u64, len: u64) -> FsResult<&[u8]>;
}

/// Simulated RAM: one contiguous bank at a fixed base address.
#[derive(Debug, Clone)]
pub struct SysMem {
    base: u64,
    ram: Vec<u8>,
}

impl SysMem {
    /// Create a zero-filled bank of `size` bytes at `base`.
    pub fn new(base: u64, size: u64) -> Self {
        Self {
            base,
            ram: vec![0u8; size as usize],
        }
    }

    /// First address of the bank.
    pub fn base(&self) -> u64 {
        self.base
    }

    /// Bank size in bytes.
    pub fn size(&self) -> u64 {
        self.ram.len() as u64
    }

    /// Returns true if `[addr, addr + len)` lies inside the bank.
    pub fn contains(&self, addr: u64, len: u64) -> bool {
        self.offset_of(addr, len).is_some()
    }

    fn offset_of(&self, addr: u64, len: u64) -> Option<usize> {
        let off = addr.checked_sub(self.base)?;
        let end = off.checked_add(len)?;
        (end <= self.size()).then_some(off as usize)
    }
}

impl AddressSpace for SysMem {
    fn map(&mut self, addr: u64, len: u64) -> FsResult<&mut [u8]> {
        let off = self
            .offset_of(addr, len)
            .ok_or(FsError::BadAddress { addr, len })?;
        Ok(&mut self.ram[off..off + len as usize])
    }

    fn map_ro(&self, addr: u64, len: u64) -> FsResult<&[u8]> {
        let off = self
            .offset_of(addr, len)
            .ok_or(FsError::BadAddress { addr, len })?;
        Ok(&self.ram[off..off + len as usize])
    }
}
