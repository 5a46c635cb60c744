//! Interface/device/partition resolution.

use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use super::{BlockDev, Partition, dos};
use crate::vfs::{FsError, FsResult};

/// Outcome of resolving an `<interface> <dev[:part]>` pair.
#[derive(Debug, Clone)]
pub struct Resolved {
    /// Block device, or `None` for a device-less interface.
    pub dev: Option<BlockDev>,
    /// Partition descriptor (whole disk when `part_no` is 0).
    pub part: Partition,
    /// Partition number, 0 meaning the whole device.
    pub part_no: i32,
}

/// Turns textual device specifications into block devices and partitions.
pub trait PartitionResolver: Send + Sync {
    /// Resolve `dev_part` (`"<dev>[:<part>]"`, hex numbers) on `ifname`.
    fn resolve(&self, ifname: &str, dev_part: Option<&str>) -> FsResult<Resolved>;

    /// Descriptor for partition `part` of `dev`.
    ///
    /// `part >= 1` selects that partition; anything else is the whole disk.
    fn part_info(&self, dev: &BlockDev, part: i32) -> FsResult<Partition> {
        if part >= 1 {
            dos::part_info(dev.as_ref(), part as usize)?.ok_or_else(|| {
                FsError::BadPartition(format!("invalid partition {part} on {}", dev.label()))
            })
        } else {
            Ok(Partition::whole_disk(dev.as_ref()))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PartSelect {
    Unspecified,
    Auto,
    Number(u32),
}

fn parse_hex(s: &str) -> Option<u32> {
    let s = s.trim();
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    u32::from_str_radix(digits, 16).ok()
}

/// Registry of block devices grouped by interface name.
///
/// Devices are numbered in registration order per interface. Interfaces
/// marked virtual resolve to no device at all.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    interfaces: BTreeMap<String, Vec<BlockDev>>,
    virtual_ifs: BTreeSet<String>,
}

impl DeviceRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a device; returns its number on the interface.
    pub fn add_device(&mut self, ifname: impl Into<String>, dev: BlockDev) -> u32 {
        let devs = self.interfaces.entry(ifname.into()).or_default();
        devs.push(dev);
        (devs.len() - 1) as u32
    }

    /// Mark an interface as device-less.
    pub fn add_virtual(&mut self, ifname: impl Into<String>) {
        self.virtual_ifs.insert(ifname.into());
    }

    /// Look up device `num` on `ifname`.
    pub fn device(&self, ifname: &str, num: u32) -> Option<&BlockDev> {
        self.interfaces.get(ifname)?.get(num as usize)
    }

    /// Iterate over `(interface, number, device)`.
    pub fn devices(&self) -> impl Iterator<Item = (&str, u32, &BlockDev)> {
        self.interfaces.iter().flat_map(|(name, devs)| {
            devs.iter()
                .enumerate()
                .map(move |(i, dev)| (name.as_str(), i as u32, dev))
        })
    }

    fn pick_auto(&self, dev: &BlockDev) -> FsResult<(Partition, i32)> {
        let mut first: Option<(Partition, i32)> = None;
        for p in 1..=dos::MAX_PRIMARY as i32 {
            let Ok(info) = self.part_info(dev, p) else {
                continue;
            };
            if info.bootable {
                return Ok((info, p));
            }
            if first.is_none() {
                first = Some((info, p));
            }
        }
        first.ok_or_else(|| {
            FsError::BadPartition(format!("no valid partitions found on {}", dev.label()))
        })
    }
}

impl PartitionResolver for DeviceRegistry {
    fn resolve(&self, ifname: &str, dev_part: Option<&str>) -> FsResult<Resolved> {
        if self.virtual_ifs.contains(ifname) {
            return Ok(Resolved {
                dev: None,
                part: Partition::host(),
                part_no: 0,
            });
        }

        let spec = dev_part
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| FsError::NoDevice(format!("{ifname}: no device specified")))?;

        let (dev_str, part_str) = match spec.split_once(':') {
            Some((d, p)) => (d, Some(p)),
            None => (spec, None),
        };

        let num = parse_hex(dev_str)
            .ok_or_else(|| FsError::NoDevice(format!("bad device specification {ifname} {spec}")))?;
        let dev = self
            .device(ifname, num)
            .cloned()
            .ok_or_else(|| FsError::NoDevice(format!("{ifname} {num:x} not found")))?;

        let select = match part_str.map(str::trim) {
            None | Some("") => PartSelect::Unspecified,
            Some("auto") => PartSelect::Auto,
            Some(s) => PartSelect::Number(parse_hex(s).ok_or_else(|| {
                FsError::BadPartition(format!("bad partition specification {ifname} {spec}"))
            })?),
        };

        // No partition table, or the whole device was asked for.
        if !dos::has_table(dev.as_ref())? || select == PartSelect::Number(0) {
            if dev.block_count() == 0 {
                return Err(FsError::NoMedium(format!("bad device size - {ifname} {spec}")));
            }
            if matches!(select, PartSelect::Number(n) if n > 0) {
                return Err(FsError::BadPartition(format!(
                    "no partition table - {ifname} {spec}"
                )));
            }
            debug!(ifname, spec, "resolved to whole disk");
            return Ok(Resolved {
                part: Partition::whole_disk(dev.as_ref()),
                dev: Some(dev),
                part_no: 0,
            });
        }

        let (part, part_no) = match select {
            PartSelect::Auto => self.pick_auto(&dev)?,
            PartSelect::Unspecified => (self.part_info(&dev, 1)?, 1),
            PartSelect::Number(n) => {
                let part_no = i32::try_from(n).map_err(|_| {
                    FsError::BadPartition(format!("invalid partition {n:#x} on {}", dev.label()))
                })?;
                (self.part_info(&dev, part_no)?, part_no)
            }
        };

        debug!(ifname, spec, part_no, start = part.start, size = part.size, "resolved partition");
        Ok(Resolved {
            dev: Some(dev),
            part,
            part_no,
        })
    }
}
