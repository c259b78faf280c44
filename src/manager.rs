//! High-level API for opening mappings.
//!
//! Provides convenience functions that wrap [`MapOptions`] for the common cases.

use std::path::Path;

use crate::errors::Result;
use crate::mapping::Mapping;
use crate::options::MapOptions;

/// Open an existing, non-empty file read-only.
///
/// # Errors
///
/// Returns errors from [`Mapping::open`].
pub fn open_ro<P: AsRef<Path>>(path: P) -> Result<Mapping> {
    MapOptions::new().open(path)
}

/// Open a file read-write, creating it if needed. A new or empty file is
/// sized to one page.
///
/// # Errors
///
/// Returns errors from [`Mapping::open`].
pub fn open_rw<P: AsRef<Path>>(path: P) -> Result<Mapping> {
    MapOptions::new().write(true).create(true).open(path)
}

/// Create or reset a file to one zeroed page and open it read-write.
///
/// # Errors
///
/// Returns errors from [`Mapping::open`].
pub fn create<P: AsRef<Path>>(path: P) -> Result<Mapping> {
    MapOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
}
