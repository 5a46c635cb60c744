//! Filesystem dispatch layer.
//!
//! A table of backends ([`FsTable`]), a session context that binds one
//! device/partition to the first backend that recognizes it ([`Fs`]), and
//! the generic operations built on top of the backend slots.
//!
//! # Architecture
//!
//! ```text
//! commands ──▶ Fs ──▶ FsTable ──▶ FsDriver::probe ──▶ Box<dyn FsVolume>
//!               │                                          │
//!               └── PartitionResolver ──▶ BlockDev ◀────────┘
//! ```

mod backend;
pub mod backends;
mod dispatch;
mod error;
mod generic;
mod table;
mod types;

pub use backend::{DirState, FsDriver, FsVolume, Unsupported};
pub use dispatch::{DirStream, Fs};
pub use error::{FsError, FsResult};
pub use generic::{DEFAULT_LOAD_LIMIT, move_target};
pub use table::FsTable;
pub use types::{FileType, FsDirent, FsType, Listing};

#[cfg(test)]
mod tests;
