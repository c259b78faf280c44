//! Platform mapping primitive: establish, flush, and tear down a shared file mapping.

use std::fs::File;
use std::io;

use memmap2::{MmapOptions, MmapRaw};

/// A shared mapping over the first `len` bytes of a file.
///
/// Protection is fixed at map time; a read-only region never hands out
/// mutable bytes.
///
/// Slices are built from the raw base pointer. The owner guarantees that a
/// mutable slice never overlaps another live slice: cursor writes take the
/// region lock exclusively, and direct view borrows are checked for overlap
/// while cursors are shut out.
pub(crate) struct Region {
    raw: MmapRaw,
    writable: bool,
}

impl Region {
    /// Map `len` bytes of `file` with the requested protection.
    ///
    /// The file handle may be dropped afterwards; the kernel keeps the mapping
    /// tied to the file until it is unmapped.
    pub(crate) fn map(file: &File, len: usize, writable: bool) -> io::Result<Self> {
        if len == 0 {
            return Err(io::Error::from(io::ErrorKind::InvalidInput));
        }
        let mut opts = MmapOptions::new();
        opts.len(len);
        let raw = if writable {
            opts.map_raw(file)?
        } else {
            opts.map_raw_read_only(file)?
        };
        Ok(Self { raw, writable })
    }

    pub(crate) fn len(&self) -> usize {
        self.raw.len()
    }

    pub(crate) fn as_slice(&self) -> &[u8] {
        // SAFETY: the pointer covers `len` mapped bytes for the life of `self`,
        // and no mutable slice overlaps while `&self` is shared (see above).
        unsafe { std::slice::from_raw_parts(self.raw.as_ptr(), self.raw.len()) }
    }

    pub(crate) fn as_mut_slice(&mut self) -> Option<&mut [u8]> {
        if !self.writable {
            return None;
        }
        // SAFETY: exclusive access to the region, writable mapping.
        Some(unsafe { std::slice::from_raw_parts_mut(self.raw.as_mut_ptr(), self.raw.len()) })
    }

    /// Base pointer for view borrows. Writing through it requires a writable
    /// region and a range no other live slice overlaps.
    pub(crate) fn base_ptr(&self) -> *mut u8 {
        self.raw.as_mut_ptr()
    }

    /// Flush dirty pages to the backing file. `wait` selects a synchronous
    /// flush; otherwise the flush is only scheduled. No-op for read-only regions.
    pub(crate) fn sync(&self, wait: bool) -> io::Result<()> {
        match (self.writable, wait) {
            (false, _) => Ok(()),
            (true, true) => self.raw.flush(),
            (true, false) => self.raw.flush_async(),
        }
    }

    /// Release the mapping.
    pub(crate) fn unmap(self) -> io::Result<()> {
        // memmap2 unmaps on drop and swallows munmap failures.
        drop(self);
        Ok(())
    }
}
