//! Logical memory blocks: available RAM and the regions reserved inside it.
//!
//! Only used by the pre-flight check that runs before a file is loaded to
//! a caller-chosen address.

use serde::{Deserialize, Serialize};

/// A `[base, base + size)` memory range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub base: u64,
    pub size: u64,
}

impl Region {
    /// Create a region.
    pub fn new(base: u64, size: u64) -> Self {
        Self { base, size }
    }

    /// One past the last address (saturating).
    pub fn end(&self) -> u64 {
        self.base.saturating_add(self.size)
    }

    /// Returns true if the two ranges share at least one byte.
    pub fn overlaps(&self, other: &Region) -> bool {
        self.size > 0 && other.size > 0 && self.base < other.end() && other.base < self.end()
    }

    /// Returns true if `other` lies entirely inside this region.
    pub fn contains(&self, other: &Region) -> bool {
        other.base >= self.base && other.end() <= self.end()
    }
}

/// Answers whether a destination range may be written by a load.
pub trait ReservedRegions {
    /// Returns true if `[base, base + size)` is usable memory outside every
    /// reserved region.
    fn is_free(&self, base: u64, size: u64) -> bool;
}

/// Memory banks plus reservations.
#[derive(Debug, Clone, Default)]
pub struct Lmb {
    memory: Vec<Region>,
    reserved: Vec<Region>,
}

fn insert_merged(list: &mut Vec<Region>, region: Region) {
    if region.size == 0 {
        return;
    }
    list.push(region);
    list.sort_by_key(|r| r.base);

    let mut merged: Vec<Region> = Vec::with_capacity(list.len());
    for r in list.drain(..) {
        match merged.last_mut() {
            // adjacent or overlapping
            Some(last) if r.base <= last.end() => {
                let end = last.end().max(r.end());
                last.size = end - last.base;
            }
            _ => merged.push(r),
        }
    }
    *list = merged;
}

impl Lmb {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a bank of usable memory.
    pub fn add_memory(&mut self, base: u64, size: u64) {
        insert_merged(&mut self.memory, Region::new(base, size));
    }

    /// Reserve a range. Overlapping and adjacent reservations coalesce.
    pub fn reserve(&mut self, base: u64, size: u64) {
        insert_merged(&mut self.reserved, Region::new(base, size));
    }

    /// Usable memory banks, sorted by base.
    pub fn memory(&self) -> &[Region] {
        &self.memory
    }

    /// Reserved regions, sorted by base.
    pub fn reserved(&self) -> &[Region] {
        &self.reserved
    }

    /// Returns true if `addr` lies inside a reserved region.
    pub fn is_reserved(&self, addr: u64) -> bool {
        self.reserved
            .iter()
            .any(|r| addr >= r.base && addr < r.end())
    }

    /// Returns true if the range touches any reserved region.
    pub fn overlaps_reserved(&self, base: u64, size: u64) -> bool {
        let want = Region::new(base, size);
        self.reserved.iter().any(|r| r.overlaps(&want))
    }
}

impl ReservedRegions for Lmb {
    fn is_free(&self, base: u64, size: u64) -> bool {
        let want = Region::new(base, size);
        if base.checked_add(size).is_none() {
            return false;
        }
        self.memory.iter().any(|m| m.contains(&want)) && !self.overlaps_reserved(base, size)
    }
}
