//! Core filesystem dispatch types.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Filesystem type tag.
///
/// Each backend registers under one tag. [`FsType::Any`] is the wildcard:
/// as a request it matches every backend, and as a registration it lets a
/// backend answer any request.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum FsType {
    /// Wildcard / no type detected.
    #[default]
    Any,
    Fat,
    Ext4,
    /// Host filesystem passthrough.
    #[strum(serialize = "sandbox", serialize = "hostfs")]
    Sandbox,
    Ubifs,
    Btrfs,
    Squashfs,
    Erofs,
    Semihosting,
    Exfat,
    /// newc cpio archive.
    Cpio,
}

/// Directory entry type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileType {
    /// Regular file.
    File,
    /// Directory.
    Directory,
    /// Symbolic link.
    Symlink,
}

impl FileType {
    /// Returns true if this is a regular file.
    pub fn is_file(&self) -> bool {
        matches!(self, FileType::File)
    }

    /// Returns true if this is a directory.
    pub fn is_dir(&self) -> bool {
        matches!(self, FileType::Directory)
    }

    /// Returns true if this is a symbolic link.
    pub fn is_symlink(&self) -> bool {
        matches!(self, FileType::Symlink)
    }
}

/// One directory iteration result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FsDirent {
    /// Entry name (not full path).
    pub name: String,
    /// Size in bytes (0 for directories).
    pub size: u64,
    /// Entry type.
    pub kind: FileType,
}

impl FsDirent {
    /// Create a new directory entry.
    pub fn new(name: impl Into<String>, size: u64, kind: FileType) -> Self {
        Self {
            name: name.into(),
            size,
            kind,
        }
    }

    /// Create a regular file entry.
    pub fn file(name: impl Into<String>, size: u64) -> Self {
        Self::new(name, size, FileType::File)
    }

    /// Create a directory entry.
    pub fn directory(name: impl Into<String>) -> Self {
        Self::new(name, 0, FileType::Directory)
    }

    /// Create a symlink entry.
    pub fn symlink(name: impl Into<String>) -> Self {
        Self::new(name, 0, FileType::Symlink)
    }
}

/// How `ls` is carried out for a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Listing {
    /// The backend prints its own listing.
    #[default]
    Native,
    /// Listing is built from opendir/readdir/closedir.
    Generic,
}
