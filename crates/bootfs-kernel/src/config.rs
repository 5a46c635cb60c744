//! Configuration for a bootfs environment.
//!
//! A TOML file describes the simulated RAM, the block devices and the
//! backends to register. Every field has a default, so an empty file (or
//! no file at all) yields a working setup with a host directory backend
//! rooted at the current directory.
//!
//! ```toml
//! backends = ["cpio", "hostfs"]
//!
//! [memory]
//! base = 0x40000000
//! size = 0x4000000
//! load_addr = 0x42000000
//! reserved = [{ base = 0x43f00000, size = 0x100000 }]
//!
//! [hostfs]
//! root = "~/tftpboot"
//!
//! [[devices]]
//! interface = "mmc"
//! image = "~/images/sdcard.img"
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::blk::{BlockDev, DEFAULT_BLOCK_SIZE, DeviceRegistry, FileDisk, MemDisk};
use crate::lmb::{Lmb, Region};
use crate::sysmem::SysMem;
use crate::vfs::FsTable;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Reading the config file failed.
    #[error("cannot read config: {0}")]
    Io(#[from] std::io::Error),

    /// The file is not valid TOML for this schema.
    #[error("cannot parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// The values are inconsistent.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Expand `~` and environment variables in a configured path.
pub fn expand_path(path: &str) -> PathBuf {
    match shellexpand::full(path) {
        Ok(expanded) => PathBuf::from(expanded.as_ref()),
        Err(_) => PathBuf::from(shellexpand::tilde(path).as_ref()),
    }
}

/// Simulated RAM and its reservations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// First RAM address.
    pub base: u64,
    /// RAM size in bytes.
    pub size: u64,
    /// Load address used when neither the command nor `loadaddr` names one.
    pub load_addr: u64,
    /// Regions a load must not overwrite.
    pub reserved: Vec<Region>,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            base: 0x4000_0000,
            size: 0x0400_0000,
            load_addr: 0x4200_0000,
            reserved: Vec::new(),
        }
    }
}

/// Host directory backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostfsConfig {
    /// Directory exposed as the filesystem root.
    pub root: String,
    /// Refuse every modifying operation.
    pub read_only: bool,
}

impl Default for HostfsConfig {
    fn default() -> Self {
        Self {
            root: ".".to_string(),
            read_only: false,
        }
    }
}

/// One block device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Interface the device is attached to, e.g. `mmc`.
    pub interface: String,

    /// Host image file backing the device.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Size in bytes of a blank RAM disk (instead of `image`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,

    /// Sector size.
    #[serde(default = "default_block_size")]
    pub block_size: u32,

    /// Open the image read-only.
    #[serde(default)]
    pub read_only: bool,
}

fn default_block_size() -> u32 {
    DEFAULT_BLOCK_SIZE
}

impl DeviceConfig {
    /// Device backed by a host image file.
    pub fn image(interface: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
            image: Some(path.into()),
            size: None,
            block_size: DEFAULT_BLOCK_SIZE,
            read_only: false,
        }
    }

    /// Blank RAM disk of `size` bytes.
    pub fn ram(interface: impl Into<String>, size: u64) -> Self {
        Self {
            interface: interface.into(),
            image: None,
            size: Some(size),
            block_size: DEFAULT_BLOCK_SIZE,
            read_only: false,
        }
    }

    /// Open the image read-only.
    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    fn open(&self, label: String) -> Result<BlockDev, ConfigError> {
        let bs = self.block_size;
        match (&self.image, self.size) {
            (Some(path), None) => {
                let path = expand_path(path);
                let disk = FileDisk::open(label, &path, bs, self.read_only).map_err(|e| {
                    ConfigError::Invalid(format!("cannot open image {}: {e}", path.display()))
                })?;
                Ok(Arc::new(disk))
            }
            (None, Some(size)) => Ok(Arc::new(MemDisk::new(label, bs, size / bs as u64))),
            _ => Err(ConfigError::Invalid(format!(
                "device on {} needs exactly one of `image` or `size`",
                self.interface
            ))),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BootfsConfig {
    /// Backends to register, in probe order.
    pub backends: Vec<String>,
    /// Interfaces that resolve to no block device.
    pub virtual_interfaces: Vec<String>,
    pub memory: MemoryConfig,
    pub hostfs: HostfsConfig,
    pub devices: Vec<DeviceConfig>,
}

impl Default for BootfsConfig {
    fn default() -> Self {
        Self {
            backends: vec!["cpio".to_string(), "hostfs".to_string()],
            virtual_interfaces: vec!["hostfs".to_string()],
            memory: MemoryConfig::default(),
            hostfs: HostfsConfig::default(),
            devices: Vec::new(),
        }
    }
}

impl BootfsConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        debug!(path = %path.as_ref().display(), "loading config");
        Self::from_toml(&text)
    }

    /// Set the backend list.
    pub fn with_backends<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.backends = names.into_iter().map(Into::into).collect();
        self
    }

    /// Set the host backend root.
    pub fn with_hostfs_root(mut self, root: impl Into<String>) -> Self {
        self.hostfs.root = root.into();
        self
    }

    /// Add a block device.
    pub fn with_device(mut self, device: DeviceConfig) -> Self {
        self.devices.push(device);
        self
    }

    /// Set the RAM bank.
    pub fn with_memory(mut self, base: u64, size: u64) -> Self {
        self.memory.base = base;
        self.memory.size = size;
        self
    }

    /// Set the default load address.
    pub fn with_load_addr(mut self, addr: u64) -> Self {
        self.memory.load_addr = addr;
        self
    }

    /// Add a reserved region.
    pub fn with_reserved(mut self, base: u64, size: u64) -> Self {
        self.memory.reserved.push(Region::new(base, size));
        self
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mem = &self.memory;
        if mem.size == 0 {
            return Err(ConfigError::Invalid("memory.size must be non-zero".into()));
        }
        if mem.base.checked_add(mem.size).is_none() {
            return Err(ConfigError::Invalid("memory range overflows".into()));
        }
        for dev in &self.devices {
            if dev.block_size == 0 || !dev.block_size.is_power_of_two() {
                return Err(ConfigError::Invalid(format!(
                    "block_size {} on {} is not a power of two",
                    dev.block_size, dev.interface
                )));
            }
            if dev.image.is_some() == dev.size.is_some() {
                return Err(ConfigError::Invalid(format!(
                    "device on {} needs exactly one of `image` or `size`",
                    dev.interface
                )));
            }
        }
        Ok(())
    }

    /// Build the backend table in the configured order.
    pub fn build_table(&self) -> Result<FsTable, ConfigError> {
        let mut table = FsTable::new();
        for name in &self.backends {
            let registered = match name.as_str() {
                #[cfg(feature = "cpio")]
                "cpio" => table.register(crate::vfs::backends::CpioDriver),
                #[cfg(feature = "hostfs")]
                "hostfs" | "sandbox" => {
                    let root = expand_path(&self.hostfs.root);
                    if self.hostfs.read_only {
                        table.register(crate::vfs::backends::HostFs::read_only(root))
                    } else {
                        table.register(crate::vfs::backends::HostFs::new(root))
                    }
                }
                other => {
                    return Err(ConfigError::Invalid(format!(
                        "unknown backend `{other}` (available: {})",
                        crate::vfs::backends::available().join(", ")
                    )));
                }
            };
            registered.map_err(|e| ConfigError::Invalid(e.to_string()))?;
        }
        Ok(table)
    }

    /// Open the configured devices and mark virtual interfaces.
    pub fn build_registry(&self) -> Result<DeviceRegistry, ConfigError> {
        let mut registry = DeviceRegistry::new();
        for name in &self.virtual_interfaces {
            registry.add_virtual(name.clone());
        }

        let mut counts: HashMap<&str, u32> = HashMap::new();
        for dev in &self.devices {
            let num = counts.entry(dev.interface.as_str()).or_default();
            let label = format!("{}{}", dev.interface, num);
            *num += 1;
            registry.add_device(dev.interface.clone(), dev.open(label)?);
        }
        Ok(registry)
    }

    /// Simulated RAM.
    pub fn build_memory(&self) -> SysMem {
        SysMem::new(self.memory.base, self.memory.size)
    }

    /// Memory map with the configured reservations.
    pub fn build_lmb(&self) -> Lmb {
        let mut lmb = Lmb::new();
        lmb.add_memory(self.memory.base, self.memory.size);
        for r in &self.memory.reserved {
            lmb.reserve(r.base, r.size);
        }
        lmb
    }
}
