//! Open options for a [`Mapping`](crate::Mapping).
//!
//! Mirrors the shape of `std::fs::OpenOptions`, restricted to the flag
//! combinations a shared file mapping can honor.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;

use crate::errors::{MmapError, Result};
use crate::mapping::Mapping;
use crate::utils::page_size;

/// File access requested when opening a mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Read-only mapping.
    ReadOnly,
    /// Read-write mapping.
    ReadWrite,
    /// Write-only access. Always rejected: a mapping must be readable.
    WriteOnly,
}

/// Builder for opening a [`Mapping`].
///
/// # Examples
///
/// ```no_run
/// use mmap_handles::MapOptions;
///
/// let map = MapOptions::new()
///     .write(true)
///     .create(true)
///     .open("data.bin")?;
/// assert!(map.is_writable());
/// # Ok::<(), mmap_handles::MmapError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapOptions {
    access: Access,
    append: bool,
    create: bool,
    create_new: bool,
    sync: bool,
    truncate: bool,
    mode: u32,
    page_size: Option<usize>,
}

impl Default for MapOptions {
    fn default() -> Self {
        Self {
            access: Access::ReadOnly,
            append: false,
            create: false,
            create_new: false,
            sync: false,
            truncate: false,
            mode: 0o666,
            page_size: None,
        }
    }
}

impl MapOptions {
    /// Read-only options with no other flags set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse raw `O_*` open flags.
    ///
    /// Unknown bits are ignored; `O_WRONLY` and `O_APPEND` are kept so that
    /// [`open`](Self::open) can reject them.
    #[cfg(unix)]
    #[must_use]
    pub fn from_flags(flags: libc::c_int, mode: u32) -> Self {
        let access = match flags & libc::O_ACCMODE {
            libc::O_WRONLY => Access::WriteOnly,
            libc::O_RDWR => Access::ReadWrite,
            _ => Access::ReadOnly,
        };
        let has = |bit: libc::c_int| flags & bit == bit;
        Self {
            access,
            append: has(libc::O_APPEND),
            create: has(libc::O_CREAT),
            create_new: has(libc::O_EXCL),
            sync: has(libc::O_SYNC),
            truncate: has(libc::O_TRUNC),
            mode,
            page_size: None,
        }
    }

    /// Set the access mode explicitly.
    #[must_use]
    pub fn access(mut self, access: Access) -> Self {
        self.access = access;
        self
    }

    /// Open read-only.
    #[must_use]
    pub fn read_only(self) -> Self {
        self.access(Access::ReadOnly)
    }

    /// Open read-write when `true`, read-only otherwise.
    #[must_use]
    pub fn write(self, write: bool) -> Self {
        self.access(if write { Access::ReadWrite } else { Access::ReadOnly })
    }

    /// Request write-only access (rejected at open). `false` only clears a
    /// previous write-only request.
    #[must_use]
    pub fn write_only(self, write_only: bool) -> Self {
        match (write_only, self.access) {
            (true, _) => self.access(Access::WriteOnly),
            (false, Access::WriteOnly) => self.read_only(),
            (false, _) => self,
        }
    }

    /// Request append mode (rejected at open).
    #[must_use]
    pub fn append(mut self, append: bool) -> Self {
        self.append = append;
        self
    }

    /// Create the file if it does not exist. Requires write access.
    #[must_use]
    pub fn create(mut self, create: bool) -> Self {
        self.create = create;
        self
    }

    /// Fail if the file already exists. Requires `create`.
    #[must_use]
    pub fn create_new(mut self, create_new: bool) -> Self {
        self.create_new = create_new;
        self
    }

    /// Flush the whole region synchronously after every cursor write.
    /// Requires write access.
    #[must_use]
    pub fn sync(mut self, sync: bool) -> Self {
        self.sync = sync;
        self
    }

    /// Reset the file to one zeroed page on open. Requires write access.
    #[must_use]
    pub fn truncate(mut self, truncate: bool) -> Self {
        self.truncate = truncate;
        self
    }

    /// Permission bits used when the file is created (Unix only).
    #[must_use]
    pub fn mode(mut self, mode: u32) -> Self {
        self.mode = mode;
        self
    }

    /// Override the page size used for sizing new files and page arithmetic.
    #[must_use]
    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = Some(page_size);
        self
    }

    /// Open `path` as a mapping with these options.
    ///
    /// # Errors
    ///
    /// See [`Mapping::open`].
    pub fn open<P: AsRef<Path>>(&self, path: P) -> Result<Mapping> {
        Mapping::open(path, self)
    }

    pub(crate) fn is_writable(&self) -> bool {
        self.access == Access::ReadWrite
    }

    pub(crate) fn is_sync(&self) -> bool {
        self.sync
    }

    pub(crate) fn is_truncate(&self) -> bool {
        self.truncate
    }

    pub(crate) fn resolved_page_size(&self) -> usize {
        match self.page_size {
            Some(size) if size > 0 => size,
            _ => page_size(),
        }
    }

    /// Reject flag combinations a mapping cannot honor.
    pub(crate) fn validate(&self) -> Result<()> {
        if self.access == Access::WriteOnly {
            return Err(MmapError::UnsupportedFlag("write-only access"));
        }
        if self.append {
            return Err(MmapError::UnsupportedFlag("append"));
        }
        let write = self.is_writable();
        if self.create && !write {
            return Err(MmapError::InvalidFlags("create requires read-write access"));
        }
        if self.create_new && !self.create {
            return Err(MmapError::InvalidFlags("exclusive create requires create"));
        }
        if self.sync && !write {
            return Err(MmapError::InvalidFlags("sync requires read-write access"));
        }
        if self.truncate && !write {
            return Err(MmapError::InvalidFlags("truncate requires read-write access"));
        }
        Ok(())
    }

    pub(crate) fn open_file(&self, path: &Path) -> io::Result<File> {
        let mut opts = OpenOptions::new();
        opts.read(true)
            .write(self.is_writable())
            .create(self.create)
            .create_new(self.create_new)
            .truncate(self.truncate);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            opts.mode(self.mode);
            if self.sync {
                opts.custom_flags(libc::O_SYNC);
            }
        }
        opts.open(path)
    }
}
