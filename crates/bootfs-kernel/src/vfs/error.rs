//! Filesystem dispatch error types.

use std::io;
use thiserror::Error;

/// Filesystem error type.
///
/// Backends report their own failures through these variants and the
/// dispatch layer passes them through untouched. A few variants are owned
/// by the dispatch layer itself: [`FsError::Unsupported`] (a stub slot was
/// hit), [`FsError::Unrecognized`] (no backend accepted the media) and
/// [`FsError::ReservedMemory`] (the pre-flight load check failed).
#[derive(Debug, Error)]
pub enum FsError {
    /// The active backend does not implement this operation.
    #[error("operation not supported by this filesystem")]
    Unsupported,

    /// No registered backend recognized the media.
    #[error("unrecognized filesystem type")]
    Unrecognized,

    /// File or directory not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Path already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Expected a directory.
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// Expected a file.
    #[error("is a directory: {0}")]
    IsADirectory(String),

    /// Directory not empty.
    #[error("directory not empty: {0}")]
    DirectoryNotEmpty(String),

    /// Filesystem is read-only.
    #[error("filesystem is read-only")]
    ReadOnly,

    /// Path escapes the backend root.
    #[error("path escapes root: {0}")]
    PathEscapesRoot(String),

    /// Invalid path.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// No usable medium behind the interface/device specification.
    #[error("no medium: {0}")]
    NoMedium(String),

    /// Interface or device number does not exist.
    #[error("no such device: {0}")]
    NoDevice(String),

    /// Partition specification is malformed or names a missing partition.
    #[error("bad partition: {0}")]
    BadPartition(String),

    /// Address range is not backed by memory.
    #[error("bad address range {addr:#x}+{len:#x}")]
    BadAddress { addr: u64, len: u64 },

    /// Loading would overwrite a reserved memory region.
    #[error("reading file would overwrite reserved memory")]
    ReservedMemory,

    /// File exceeds the caller's size limit.
    #[error("file too big: {size} bytes (limit {limit})")]
    TooBig { size: u64, limit: u64 },

    /// Fewer bytes were transferred than required.
    #[error("short read: wanted {wanted} bytes, got {got}")]
    ShortRead { wanted: u64, got: u64 },

    /// On-media metadata is malformed.
    #[error("corrupt filesystem: {0}")]
    Corrupt(String),

    /// Generic failure of a logged operation.
    #[error("{0}")]
    Failed(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

// Linux errno values, used for the negative status codes.
const EPERM: i32 = 1;
const ENOENT: i32 = 2;
const EIO: i32 = 5;
const E2BIG: i32 = 7;
const ENODEV: i32 = 19;
const EEXIST: i32 = 17;
const EFAULT: i32 = 14;
const ENOTDIR: i32 = 20;
const EISDIR: i32 = 21;
const EINVAL: i32 = 22;
const ENOSPC: i32 = 28;
const EROFS: i32 = 30;
const ENOSYS: i32 = 38;
const ENOTEMPTY: i32 = 39;
const ENOMEDIUM: i32 = 123;
const EUCLEAN: i32 = 117;

impl FsError {
    /// Create a NotFound error.
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound(path.into())
    }

    /// Create an AlreadyExists error.
    pub fn already_exists(path: impl Into<String>) -> Self {
        Self::AlreadyExists(path.into())
    }

    /// Create a NotADirectory error.
    pub fn not_a_directory(path: impl Into<String>) -> Self {
        Self::NotADirectory(path.into())
    }

    /// Create an IsADirectory error.
    pub fn is_a_directory(path: impl Into<String>) -> Self {
        Self::IsADirectory(path.into())
    }

    /// Create a DirectoryNotEmpty error.
    pub fn directory_not_empty(path: impl Into<String>) -> Self {
        Self::DirectoryNotEmpty(path.into())
    }

    /// Create a PathEscapesRoot error.
    pub fn path_escapes_root(path: impl Into<String>) -> Self {
        Self::PathEscapesRoot(path.into())
    }

    /// Create an InvalidPath error.
    pub fn invalid_path(path: impl Into<String>) -> Self {
        Self::InvalidPath(path.into())
    }

    /// Create a Corrupt error.
    pub fn corrupt(msg: impl Into<String>) -> Self {
        Self::Corrupt(msg.into())
    }

    /// Create a Failed error.
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }

    /// Create an Other error.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Negative status code for this error, as a boot-time caller would see it.
    pub fn errno(&self) -> i32 {
        let code = match self {
            FsError::Unsupported => ENOSYS,
            FsError::Unrecognized => EINVAL,
            FsError::NotFound(_) => ENOENT,
            FsError::AlreadyExists(_) => EEXIST,
            FsError::NotADirectory(_) => ENOTDIR,
            FsError::IsADirectory(_) => EISDIR,
            FsError::DirectoryNotEmpty(_) => ENOTEMPTY,
            FsError::ReadOnly => EROFS,
            FsError::PathEscapesRoot(_) => EPERM,
            FsError::InvalidPath(_) => EINVAL,
            FsError::NoMedium(_) => ENOMEDIUM,
            FsError::NoDevice(_) => ENODEV,
            FsError::BadPartition(_) => EINVAL,
            FsError::BadAddress { .. } => EFAULT,
            FsError::ReservedMemory => ENOSPC,
            FsError::TooBig { .. } => E2BIG,
            FsError::ShortRead { .. } => EIO,
            FsError::Corrupt(_) => EUCLEAN,
            FsError::Failed(_) => EPERM,
            FsError::Io(e) => e.raw_os_error().unwrap_or(EIO),
            FsError::Other(_) => EIO,
        };
        -code
    }
}

/// Convert FsError to std::io::Error for compatibility.
impl From<FsError> for io::Error {
    fn from(e: FsError) -> Self {
        match e {
            FsError::NotFound(msg) => io::Error::new(io::ErrorKind::NotFound, msg),
            FsError::AlreadyExists(msg) => io::Error::new(io::ErrorKind::AlreadyExists, msg),
            FsError::NotADirectory(msg) => io::Error::new(io::ErrorKind::NotADirectory, msg),
            FsError::IsADirectory(msg) => io::Error::new(io::ErrorKind::IsADirectory, msg),
            FsError::DirectoryNotEmpty(msg) => {
                io::Error::new(io::ErrorKind::DirectoryNotEmpty, msg)
            }
            FsError::ReadOnly => {
                io::Error::new(io::ErrorKind::ReadOnlyFilesystem, "filesystem is read-only")
            }
            FsError::PathEscapesRoot(msg) => {
                io::Error::new(io::ErrorKind::PermissionDenied, msg)
            }
            FsError::InvalidPath(msg) => io::Error::new(io::ErrorKind::InvalidInput, msg),
            FsError::Unsupported => {
                io::Error::new(io::ErrorKind::Unsupported, "operation not supported")
            }
            FsError::Io(e) => e,
            other => io::Error::other(other.to_string()),
        }
    }
}

/// Filesystem result type.
pub type FsResult<T> = Result<T, FsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_is_negative() {
        assert_eq!(FsError::not_found("x").errno(), -ENOENT);
        assert_eq!(FsError::ReservedMemory.errno(), -ENOSPC);
        assert_eq!(FsError::Unsupported.errno(), -ENOSYS);
        assert!(FsError::failed("rename").errno() < 0);
    }

    #[test]
    fn test_io_errno_passthrough() {
        let e = FsError::from(io::Error::from_raw_os_error(ENOENT));
        assert_eq!(e.errno(), -ENOENT);
    }

    #[test]
    fn test_into_io_error() {
        let e: io::Error = FsError::is_a_directory("/boot").into();
        assert_eq!(e.kind(), io::ErrorKind::IsADirectory);
    }
}
