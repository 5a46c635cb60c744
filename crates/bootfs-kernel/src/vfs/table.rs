//! Backend descriptor table.

use std::fmt;
use std::sync::Arc;

use super::backend::{FsDriver, Unsupported};
use super::error::{FsError, FsResult};
use super::types::FsType;

/// Ordered list of registered backends, terminated by the
/// [`Unsupported`] sentinel.
///
/// Order matters: binding probes backends front to back and the first
/// one that accepts the media wins.
#[derive(Clone)]
pub struct FsTable {
    drivers: Vec<Arc<dyn FsDriver>>,
    sentinel: Arc<dyn FsDriver>,
}

impl fmt::Debug for FsTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FsTable")
            .field("drivers", &self.names())
            .finish()
    }
}

impl Default for FsTable {
    fn default() -> Self {
        Self::new()
    }
}

impl FsTable {
    /// Create a table holding only the sentinel.
    pub fn new() -> Self {
        Self {
            drivers: Vec::new(),
            sentinel: Arc::new(Unsupported),
        }
    }

    /// Append a backend.
    ///
    /// Fails if another backend already holds the same concrete tag.
    /// Backends registered under [`FsType::Any`] may repeat.
    pub fn register(&mut self, driver: impl FsDriver + 'static) -> FsResult<()> {
        self.register_arc(Arc::new(driver))
    }

    /// Append a backend (already wrapped in Arc).
    pub fn register_arc(&mut self, driver: Arc<dyn FsDriver>) -> FsResult<()> {
        let tag = driver.fs_type();
        if tag != FsType::Any && self.drivers.iter().any(|d| d.fs_type() == tag) {
            return Err(FsError::already_exists(format!(
                "backend for {tag} ({})",
                driver.name()
            )));
        }
        self.drivers.push(driver);
        Ok(())
    }

    /// Builder-style [`FsTable::register`].
    pub fn with(mut self, driver: impl FsDriver + 'static) -> FsResult<Self> {
        self.register(driver)?;
        Ok(self)
    }

    /// Descriptor for `fs_type`, or the sentinel when nothing matches.
    ///
    /// Never fails: tags whose backend was not compiled in or not
    /// registered get the sentinel, whose operations all report
    /// unsupported.
    pub fn get_info(&self, fs_type: FsType) -> &dyn FsDriver {
        self.drivers
            .iter()
            .find(|d| d.fs_type() == fs_type)
            .unwrap_or(&self.sentinel)
            .as_ref()
    }

    /// The sentinel descriptor.
    pub fn sentinel(&self) -> &dyn FsDriver {
        self.sentinel.as_ref()
    }

    /// Backend by table position.
    pub fn get(&self, index: usize) -> Option<&dyn FsDriver> {
        self.drivers.get(index).map(|d| d.as_ref())
    }

    /// Registered backends in probe order (sentinel excluded).
    pub fn iter(&self) -> impl Iterator<Item = &dyn FsDriver> {
        self.drivers.iter().map(|d| d.as_ref())
    }

    /// Names of registered backends in probe order.
    pub fn names(&self) -> Vec<String> {
        self.drivers.iter().map(|d| d.name().to_string()).collect()
    }

    /// Number of registered backends (sentinel excluded).
    pub fn len(&self) -> usize {
        self.drivers.len()
    }

    /// Returns true if only the sentinel is present.
    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty()
    }
}
