//! bootfs kernel: a filesystem dispatch layer for boot-time environments.
//!
//! The kernel owns:
//! - **vfs**: backend table, session binding and operation dispatch
//! - **blk**: block devices, DOS partition tables and `<dev[:part]>` resolution
//! - **sysmem**: mapping numeric load addresses to memory
//! - **lmb**: memory banks and reservations checked before loads
//! - **config**: TOML configuration that assembles all of the above

pub mod blk;
pub mod config;
pub mod lmb;
pub mod sysmem;
pub mod vfs;

#[cfg(any(test, feature = "test-mock"))]
pub mod testing;

pub use blk::{BlockDev, BlockDevice, DeviceRegistry, MemDisk, Partition, PartitionResolver};
pub use config::{BootfsConfig, ConfigError};
pub use lmb::{Lmb, ReservedRegions};
pub use sysmem::{AddressSpace, SysMem};
pub use vfs::{DirStream, Fs, FsDirent, FsDriver, FsError, FsResult, FsTable, FsType, FsVolume};
