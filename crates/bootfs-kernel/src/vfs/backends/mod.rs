//! Built-in filesystem backends.

#[cfg(feature = "cpio")]
pub mod cpio;
#[cfg(feature = "hostfs")]
pub mod hostfs;

#[cfg(feature = "cpio")]
pub use cpio::CpioDriver;
#[cfg(feature = "hostfs")]
pub use hostfs::HostFs;

use super::error::{FsError, FsResult};

/// Names of the backends compiled into this build, in default probe order.
pub fn available() -> Vec<&'static str> {
    let mut names = Vec::new();
    #[cfg(feature = "cpio")]
    names.push("cpio");
    #[cfg(feature = "hostfs")]
    names.push("hostfs");
    names
}

/// Split `path` into normal components, resolving `.` and `..`.
///
/// Leading and repeated separators are ignored. `..` above the root is
/// rejected.
pub(crate) fn components(path: &str) -> FsResult<Vec<&str>> {
    let mut parts: Vec<&str> = Vec::new();
    for comp in path.split('/') {
        match comp {
            "" | "." => {}
            ".." => {
                if parts.pop().is_none() {
                    return Err(FsError::path_escapes_root(path));
                }
            }
            name => parts.push(name),
        }
    }
    Ok(parts)
}
