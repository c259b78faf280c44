//! The owning side of a mapped file: region lifecycle and handle bookkeeping.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, warn};
use parking_lot::{Mutex, RwLock};

use crate::direct::ViewBorrows;
use crate::errors::{MmapError, Result};
use crate::options::MapOptions;
use crate::reader::Handle;
use crate::region::Region;
use crate::utils::{addressable, whole_pages};

/// Handle tables and counters.
pub(crate) struct Book {
    /// Cursor ids. Restarts at 0 after a resize.
    pub(crate) next_id: u64,
    /// Direct view tokens. Never restarts, so a stale view cannot alias a new one.
    pub(crate) next_token: u64,
    pub(crate) directs: HashMap<u64, ViewBorrows>,
    pub(crate) readers: HashMap<u64, Arc<Handle>>,
    pub(crate) writers: HashMap<u64, Arc<Handle>>,
}

impl Book {
    fn new() -> Self {
        Self {
            next_id: 0,
            next_token: 0,
            directs: HashMap::new(),
            readers: HashMap::new(),
            writers: HashMap::new(),
        }
    }

    pub(crate) fn has_cursors(&self) -> bool {
        !self.readers.is_empty() || !self.writers.is_empty()
    }

    /// Release every direct view, then writers, then readers.
    ///
    /// Cursors are closed through their atomic flag only; this never waits on a
    /// handle lock.
    fn release_handles(&mut self) {
        debug!(
            "releasing {} direct views, {} writers, {} readers",
            self.directs.len(),
            self.writers.len(),
            self.readers.len()
        );
        self.directs.clear();
        for (_, handle) in self.writers.drain() {
            handle.mark_closed();
        }
        for (_, handle) in self.readers.drain() {
            handle.mark_closed();
        }
    }
}

/// State shared by a mapping and all of its handles.
///
/// Lock order is cursor handle, then `region`, then `book`. `book` is only
/// ever held for table updates, never while user code runs.
pub(crate) struct Shared {
    pub(crate) name: PathBuf,
    pub(crate) page_size: usize,
    pub(crate) writable: bool,
    pub(crate) write_sync: bool,
    /// `None` once the mapping is closed (or a resize failed after unmapping).
    /// Held shared by cursor reads and view guards; exclusively by cursor
    /// writes, close and resize.
    pub(crate) region: RwLock<Option<Region>>,
    pub(crate) book: Mutex<Book>,
}

impl Shared {
    pub(crate) fn sync_region(&self, region: Option<&Region>, wait: bool) -> Result<()> {
        region
            .ok_or(MmapError::Closed)?
            .sync(wait)
            .map_err(|e| MmapError::io(&self.name, "error syncing map", e))
    }

    fn unmap(&self, slot: &mut Option<Region>) -> Result<()> {
        match slot.take() {
            Some(region) => region
                .unmap()
                .map_err(|e| MmapError::io(&self.name, "error unmapping memory", e)),
            None => Ok(()),
        }
    }

    /// Close every handle and restart cursor ids. Callers hold `region` exclusively.
    fn release_handles(&self) {
        let mut book = self.book.lock();
        book.release_handles();
        book.next_id = 0;
    }

    /// Flush, unmap, resize the backing file to `size`, and map it again.
    ///
    /// Handles must already be released. A failure after the unmap leaves the
    /// region absent, i.e. the mapping closed.
    fn remap(&self, slot: &mut Option<Region>, size: u64) -> Result<()> {
        let len = addressable(size)?;
        let name = &self.name;

        self.sync_region(slot.as_ref(), true)?;
        self.unmap(slot)?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(name)
            .map_err(|e| MmapError::io(name, "error opening file for truncate", e))?;
        file.set_len(size)
            .map_err(|e| MmapError::io(name, "error truncating file", e))?;
        let region = Region::map(&file, len, true)
            .map_err(|e| MmapError::io(name, "could not mmap file after truncate", e))?;

        *slot = Some(region);
        debug!("remapped {} at {} bytes", name.display(), len);
        Ok(())
    }
}

/// A memory-mapped file and the handles that access it.
///
/// The mapping owns the region. Access goes through one of two kinds of
/// handles, which never coexist:
///
/// - [`Direct`](crate::Direct) views, zero-copy windows over the bytes;
/// - [`Reader`](crate::Reader) and [`Writer`](crate::Writer) cursors.
///
/// [`close`](Self::close), [`truncate`](Self::truncate) and
/// [`add_pages`](Self::add_pages) close every outstanding handle first.
///
/// # Examples
///
/// ```no_run
/// use mmap_handles::Mapping;
///
/// let map = Mapping::options().write(true).create(true).open("data.bin")?;
///
/// let writer = map.writer()?;
/// writer.write_at(&[1, 2, 3, 4], 0)?;
/// writer.close();
///
/// let reader = map.reader()?;
/// let mut buf = [0u8; 4];
/// reader.read_at(&mut buf, 0)?;
/// assert_eq!(buf, [1, 2, 3, 4]);
///
/// map.close()?;
/// # Ok::<(), mmap_handles::MmapError>(())
/// ```
pub struct Mapping {
    pub(crate) shared: Arc<Shared>,
}

impl std::fmt::Debug for Mapping {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (directs, readers, writers) = self.open_handles();
        f.debug_struct("Mapping")
            .field("path", &self.shared.name)
            .field("len", &self.len())
            .field("writable", &self.shared.writable)
            .field("directs", &directs)
            .field("readers", &readers)
            .field("writers", &writers)
            .finish()
    }
}

impl Mapping {
    /// Default (read-only) options for opening a mapping.
    #[must_use]
    pub fn options() -> MapOptions {
        MapOptions::new()
    }

    /// Open `path` as a mapping.
    ///
    /// A writable open of an empty file, or any open with `truncate`, sizes the
    /// file to exactly one page. With `truncate` the mapped bytes are then
    /// zeroed and flushed.
    ///
    /// # Errors
    ///
    /// Returns `MmapError::UnsupportedFlag` or `MmapError::InvalidFlags` for bad flag combinations.
    /// Returns `MmapError::EmptyFile` when opening a zero-length file read-only.
    /// Returns `MmapError::TooLarge` if the file does not fit the address space.
    /// Returns `MmapError::Io` if opening, resizing, or mapping the file fails.
    pub fn open<P: AsRef<Path>>(path: P, options: &MapOptions) -> Result<Self> {
        options.validate()?;
        let name = path.as_ref();
        let write = options.is_writable();
        let trunc = options.is_truncate();
        let page_size = options.resolved_page_size();

        let file = options
            .open_file(name)
            .map_err(|e| MmapError::io(name, "could not open file", e))?;
        let mut len = file
            .metadata()
            .map_err(|e| MmapError::io(name, "could not stat file", e))?
            .len();

        if len < 1 && !write {
            return Err(MmapError::EmptyFile(name.to_path_buf()));
        }

        if write && (len < 1 || trunc) {
            let requested = page_size as u64;
            let context = if trunc {
                "could not truncate file"
            } else {
                "could not resize new or empty file"
            };
            file.set_len(requested)
                .map_err(|e| MmapError::io(name, context, e))?;
            len = file
                .metadata()
                .map_err(|e| MmapError::io(name, "could not stat after resize", e))?
                .len();
            if len != requested {
                return Err(MmapError::SizeMismatch {
                    requested,
                    actual: len,
                });
            }
        }

        let size = addressable(len)?;
        let mut region = Region::map(&file, size, write)
            .map_err(|e| MmapError::io(name, "could not mmap file", e))?;

        if trunc {
            if let Some(bytes) = region.as_mut_slice() {
                bytes.fill(0);
            }
            region
                .sync(true)
                .map_err(|e| MmapError::io(name, "error syncing mmap after truncate", e))?;
        }

        debug!(
            "opened {} ({} bytes, writable={}, sync={})",
            name.display(),
            size,
            write,
            options.is_sync()
        );

        Ok(Self {
            shared: Arc::new(Shared {
                name: name.to_path_buf(),
                page_size,
                writable: write,
                write_sync: options.is_sync(),
                region: RwLock::new(Some(region)),
                book: Mutex::new(Book::new()),
            }),
        })
    }

    /// Close every handle and unmap the region. Closing twice is a no-op.
    ///
    /// Waits for outstanding direct view guards to drop.
    ///
    /// # Errors
    ///
    /// Returns `MmapError::Io` if unmapping fails. Handles are closed regardless.
    pub fn close(&self) -> Result<()> {
        let mut region = self.shared.region.write();
        if region.is_none() {
            return Ok(());
        }
        self.shared.book.lock().release_handles();
        self.shared.unmap(&mut region)?;
        debug!("closed {}", self.shared.name.display());
        Ok(())
    }

    /// Resize the backing file and the mapping to `size` bytes.
    ///
    /// Every open handle is closed first. Bytes below the old length are kept;
    /// growth reads as zero. Cursor ids restart at 0. Waits for outstanding
    /// direct view guards to drop.
    ///
    /// If this fails after the old region was unmapped, the mapping stays
    /// closed and must not be resized again.
    ///
    /// # Errors
    ///
    /// Returns `MmapError::ReadOnly` for read-only mappings.
    /// Returns `MmapError::InvalidSize` if `size` is zero.
    /// Returns `MmapError::TooLarge` if `size` does not fit the address space.
    /// Returns `MmapError::Closed` if the mapping is closed.
    /// Returns `MmapError::Io` if flushing, unmapping, resizing, or remapping fails.
    pub fn truncate(&self, size: u64) -> Result<()> {
        let mut region = self.shared.region.write();
        if !self.shared.writable {
            return Err(MmapError::ReadOnly);
        }
        if size < 1 {
            return Err(MmapError::InvalidSize(size));
        }
        addressable(size)?;
        if region.is_none() {
            return Err(MmapError::Closed);
        }
        debug!("truncating {} to {} bytes", self.shared.name.display(), size);
        self.shared.release_handles();
        self.shared.remap(&mut region, size)
    }

    /// Grow the mapping by `count` pages.
    ///
    /// The current length is rounded down to whole pages before adding, so
    /// trailing bytes past the last full page are dropped from the count.
    /// Every open handle is closed, as with [`truncate`](Self::truncate).
    ///
    /// # Errors
    ///
    /// Returns `MmapError::InvalidCount` if `count` is zero.
    /// Returns `MmapError::TooLarge` carrying the requested size if it does
    /// not fit the address space. Otherwise the errors of
    /// [`truncate`](Self::truncate).
    pub fn add_pages(&self, count: usize) -> Result<()> {
        if count == 0 {
            return Err(MmapError::InvalidCount(count));
        }
        let mut region = self.shared.region.write();
        if !self.shared.writable {
            return Err(MmapError::ReadOnly);
        }
        let len = region.as_ref().ok_or(MmapError::Closed)?.len();
        let page_size = self.shared.page_size;
        let (pages, _) = whole_pages(len, page_size);
        let wanted = (pages as u128 + count as u128).checked_mul(page_size as u128);
        let size = wanted
            .and_then(|w| u64::try_from(w).ok())
            .ok_or_else(|| {
                MmapError::TooLarge(wanted.map_or(i128::MAX, |w| {
                    i128::try_from(w).unwrap_or(i128::MAX)
                }))
            })?;
        addressable(size)?;
        debug!(
            "adding {} pages to {} ({} -> {} bytes)",
            count,
            self.shared.name.display(),
            len,
            size
        );
        self.shared.release_handles();
        self.shared.remap(&mut region, size)
    }

    /// Flush the region to the backing file; `wait` selects a synchronous flush.
    ///
    /// # Errors
    ///
    /// Returns `MmapError::ReadOnly` for read-only mappings.
    /// Returns `MmapError::Closed` if the mapping is closed.
    /// Returns `MmapError::Io` if the flush fails.
    pub fn sync(&self, wait: bool) -> Result<()> {
        if !self.shared.writable {
            return Err(MmapError::ReadOnly);
        }
        let region = self.shared.region.read_recursive();
        self.shared.sync_region(region.as_ref(), wait)
    }

    /// Length of the mapped region in bytes, or 0 once closed.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared
            .region
            .read_recursive()
            .as_ref()
            .map_or(0, Region::len)
    }

    /// Whether the mapped region is empty (only when closed).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the region has been unmapped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.region.read_recursive().is_none()
    }

    /// Whether the mapping was opened read-write.
    #[must_use]
    pub fn is_writable(&self) -> bool {
        self.shared.writable
    }

    /// Whether cursor writes flush synchronously.
    #[must_use]
    pub fn is_write_sync(&self) -> bool {
        self.shared.write_sync
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.shared.name
    }

    /// Page size this mapping sizes files with.
    #[must_use]
    pub fn page_size(&self) -> usize {
        self.shared.page_size
    }

    /// Whole pages in the region and the bytes past the last whole page.
    #[must_use]
    pub fn page_count(&self) -> (usize, usize) {
        whole_pages(self.len(), self.shared.page_size)
    }

    /// Number of open direct views, readers, and writers.
    #[must_use]
    pub fn open_handles(&self) -> (usize, usize, usize) {
        let book = self.shared.book.lock();
        (book.directs.len(), book.readers.len(), book.writers.len())
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!("failed to close {}: {}", self.shared.name.display(), err);
        }
    }
}
