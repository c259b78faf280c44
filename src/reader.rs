//! Read cursors: offset-tracking, independently closable accessors.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::trace;
use parking_lot::RwLock;

use crate::errors::{MmapError, Result};
use crate::mapping::{Mapping, Shared};
use crate::utils::{ensure_offset, whole_pages};

/// Per-cursor state behind the handle-level lock.
///
/// The closed flag lives outside the lock so the mapping's cascade can close
/// a cursor without waiting on it. Lock order is always handle, then mapping.
pub(crate) struct Handle {
    closed: AtomicBool,
    offset: RwLock<usize>,
}

impl Handle {
    fn new() -> Self {
        Self {
            closed: AtomicBool::new(false),
            offset: RwLock::new(0),
        }
    }

    pub(crate) fn mark_closed(&self) {
        self.closed.store(true, Ordering::Release);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Table {
    Readers,
    Writers,
}

/// Origin for [`Reader::seek`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    /// Relative to the start of the region.
    Start,
    /// Relative to the cursor's current offset.
    Current,
    /// Relative to the end of the region.
    End,
}

impl TryFrom<i32> for Whence {
    type Error = MmapError;

    /// `0`, `1` and `2` select start, current and end, as in `lseek`.
    fn try_from(whence: i32) -> Result<Self> {
        match whence {
            0 => Ok(Whence::Start),
            1 => Ok(Whence::Current),
            2 => Ok(Whence::End),
            other => Err(MmapError::InvalidWhence(other)),
        }
    }
}

/// A read cursor over a [`Mapping`].
///
/// Each reader keeps its own offset, starting at 0. Readers can be shared
/// across threads; every call re-checks that both the reader and the mapping
/// are still open before touching the bytes.
///
/// Dropping a reader closes it.
pub struct Reader {
    shared: Arc<Shared>,
    handle: Arc<Handle>,
    id: u64,
    table: Table,
}

impl std::fmt::Debug for Reader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reader")
            .field("path", &self.shared.name)
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Mapping {
    /// Open a read cursor.
    ///
    /// # Errors
    ///
    /// Returns `MmapError::Closed` if the mapping is closed.
    /// Returns `MmapError::DirectOpen` while any direct view is open.
    pub fn reader(&self) -> Result<Reader> {
        Reader::register(&self.shared, Table::Readers)
    }
}

impl Reader {
    pub(crate) fn register(shared: &Arc<Shared>, table: Table) -> Result<Self> {
        let region = shared.region.read_recursive();
        if region.is_none() {
            return Err(MmapError::Closed);
        }
        if table == Table::Writers && !shared.writable {
            return Err(MmapError::ReadOnly);
        }
        let mut book = shared.book.lock();
        if !book.directs.is_empty() {
            return Err(MmapError::DirectOpen);
        }

        let id = book.next_id;
        book.next_id += 1;
        let handle = Arc::new(Handle::new());
        match table {
            Table::Readers => book.readers.insert(id, Arc::clone(&handle)),
            Table::Writers => book.writers.insert(id, Arc::clone(&handle)),
        };
        trace!("{}: opened {:?} cursor {}", shared.name.display(), table, id);

        Ok(Self {
            shared: Arc::clone(shared),
            handle,
            id,
            table,
        })
    }

    /// Cursor id, unique among the mapping's open cursors.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Whether this cursor has been closed, directly or by the mapping.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.handle.is_closed()
    }

    /// Current sequential offset.
    #[must_use]
    pub fn offset(&self) -> usize {
        *self.handle.offset.read()
    }

    /// Length of the mapped region.
    ///
    /// # Errors
    ///
    /// Returns `MmapError::Closed` if the cursor or the mapping is closed.
    pub fn len(&self) -> Result<usize> {
        let _offset = self.handle.offset.read();
        self.with_bytes(|bytes| Ok(bytes.len()))
    }

    /// Whole pages in the region and the bytes past the last whole page.
    ///
    /// # Errors
    ///
    /// Returns `MmapError::Closed` if the cursor or the mapping is closed.
    pub fn page_count(&self) -> Result<(usize, usize)> {
        Ok(whole_pages(self.len()?, self.shared.page_size))
    }

    /// Read the byte at `offset` without moving the cursor.
    ///
    /// # Errors
    ///
    /// Returns `MmapError::Closed` if the cursor or the mapping is closed.
    /// Returns `MmapError::OutOfRange` if `offset` is past the region.
    pub fn peek(&self, offset: usize) -> Result<u8> {
        let _offset = self.handle.offset.read();
        self.with_bytes(|bytes| {
            ensure_offset(offset, bytes.len())?;
            Ok(bytes[offset])
        })
    }

    /// Read into `buf` from the current offset, advancing by the bytes copied.
    ///
    /// A short copy near the end is a success. An empty `buf` returns `Ok(0)`.
    ///
    /// # Errors
    ///
    /// Returns `MmapError::EndOfStream` if the offset is already at the end.
    /// Returns `MmapError::Closed` if the cursor or the mapping is closed.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let mut offset = self.handle.offset.write();
        let n = self.with_bytes(|bytes| {
            if buf.is_empty() {
                return Ok(0);
            }
            let start = *offset;
            if start >= bytes.len() {
                return Err(MmapError::EndOfStream { transferred: 0 });
            }
            let n = buf.len().min(bytes.len() - start);
            buf[..n].copy_from_slice(&bytes[start..start + n]);
            Ok(n)
        })?;
        *offset += n;
        Ok(n)
    }

    /// Read into `buf` from the absolute `offset` without moving the cursor.
    ///
    /// Unlike [`read`](Self::read), a copy shorter than `buf` is reported as
    /// `MmapError::EndOfStream` carrying the count that was copied.
    ///
    /// # Errors
    ///
    /// Returns `MmapError::OutOfRange` if `offset` is past the region.
    /// Returns `MmapError::EndOfStream` on a short copy.
    /// Returns `MmapError::Closed` if the cursor or the mapping is closed.
    pub fn read_at(&self, buf: &mut [u8], offset: usize) -> Result<usize> {
        let _offset = self.handle.offset.read();
        self.with_bytes(|bytes| {
            ensure_offset(offset, bytes.len())?;
            let n = buf.len().min(bytes.len() - offset);
            buf[..n].copy_from_slice(&bytes[offset..offset + n]);
            if n < buf.len() {
                return Err(MmapError::EndOfStream { transferred: n });
            }
            Ok(n)
        })
    }

    /// Read one byte at the current offset and advance by one.
    ///
    /// # Errors
    ///
    /// Returns `MmapError::EndOfStream` at the end of the region.
    /// Returns `MmapError::Closed` if the cursor or the mapping is closed.
    pub fn read_byte(&self) -> Result<u8> {
        let mut offset = self.handle.offset.write();
        let value = self.with_bytes(|bytes| {
            bytes
                .get(*offset)
                .copied()
                .ok_or(MmapError::EndOfStream { transferred: 0 })
        })?;
        *offset += 1;
        Ok(value)
    }

    /// Move the cursor to `offset` relative to `whence` and return the new
    /// absolute position. The end of the region is a valid position.
    ///
    /// # Errors
    ///
    /// Returns `MmapError::InvalidPosition` if the target is negative or past the end.
    /// Returns `MmapError::TooLarge` if the target does not fit the address space.
    /// Returns `MmapError::Closed` if the cursor or the mapping is closed.
    pub fn seek(&self, offset: i64, whence: Whence) -> Result<usize> {
        let mut current = self.handle.offset.write();
        let target = self.with_bytes(|bytes| {
            let len = bytes.len();
            let base = match whence {
                Whence::Start => 0,
                Whence::Current => *current as i128,
                Whence::End => len as i128,
            };
            let position = base + i128::from(offset);
            if position < 0 {
                return Err(MmapError::InvalidPosition { position, len });
            }
            let target = usize::try_from(position).map_err(|_| MmapError::TooLarge(position))?;
            if target > len {
                return Err(MmapError::InvalidPosition { position, len });
            }
            Ok(target)
        })?;
        *current = target;
        Ok(target)
    }

    /// Close the cursor and deregister it from the mapping. Idempotent.
    pub fn close(&self) {
        let _offset = self.handle.offset.write();
        if self.handle.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut book = self.shared.book.lock();
        let table = match self.table {
            Table::Readers => &mut book.readers,
            Table::Writers => &mut book.writers,
        };
        // After a resize ids restart, so only remove the entry if it is ours.
        if table
            .get(&self.id)
            .is_some_and(|h| Arc::ptr_eq(h, &self.handle))
        {
            table.remove(&self.id);
        }
        trace!(
            "{}: closed {:?} cursor {}",
            self.shared.name.display(),
            self.table,
            self.id
        );
    }

    /// Run `f` over the mapped bytes with the region lock held shared.
    /// Callers hold the handle lock.
    ///
    /// The closed flag is checked under the region lock, since the cascade
    /// sets it while holding that lock exclusively.
    fn with_bytes<T>(&self, f: impl FnOnce(&[u8]) -> Result<T>) -> Result<T> {
        let region = self.shared.region.read_recursive();
        if self.handle.is_closed() {
            return Err(MmapError::Closed);
        }
        f(region.as_ref().ok_or(MmapError::Closed)?.as_slice())
    }

    /// Run `f` over the mapped bytes with the region lock held exclusively,
    /// then flush synchronously if the mapping was opened with `sync` and `f`
    /// wrote anything. Callers hold the handle lock.
    pub(crate) fn with_bytes_mut<T>(&self, f: impl FnOnce(&mut [u8]) -> Result<T>) -> Result<T> {
        let mut region = self.shared.region.write();
        if self.handle.is_closed() {
            return Err(MmapError::Closed);
        }
        let bytes = region
            .as_mut()
            .ok_or(MmapError::Closed)?
            .as_mut_slice()
            .ok_or(MmapError::ReadOnly)?;
        let out = f(bytes);
        let wrote = match &out {
            Ok(_) => true,
            Err(err) => err.transferred() > 0,
        };
        if wrote && self.shared.write_sync {
            self.shared.sync_region(region.as_ref(), true)?;
        }
        out
    }

    /// Synchronously flush the whole region.
    pub(crate) fn sync_region(&self) -> Result<()> {
        let region = self.shared.region.read_recursive();
        if self.handle.is_closed() {
            return Err(MmapError::Closed);
        }
        self.shared.sync_region(region.as_ref(), true)
    }

    pub(crate) fn lock_offset(&self) -> parking_lot::RwLockWriteGuard<'_, usize> {
        self.handle.offset.write()
    }

    pub(crate) fn lock_offset_shared(&self) -> parking_lot::RwLockReadGuard<'_, usize> {
        self.handle.offset.read()
    }
}

impl Drop for Reader {
    fn drop(&mut self) {
        self.close();
    }
}

pub(crate) fn read_or_eof(result: Result<usize>) -> io::Result<usize> {
    match result {
        Err(MmapError::EndOfStream { transferred }) => Ok(transferred),
        other => other.map_err(Into::into),
    }
}

pub(crate) fn seek_from(reader: &Reader, pos: io::SeekFrom) -> io::Result<u64> {
    let (offset, whence) = match pos {
        io::SeekFrom::Start(n) => (
            i64::try_from(n).map_err(|_| MmapError::TooLarge(i128::from(n)))?,
            Whence::Start,
        ),
        io::SeekFrom::Current(n) => (n, Whence::Current),
        io::SeekFrom::End(n) => (n, Whence::End),
    };
    let position = reader.seek(offset, whence)?;
    Ok(position as u64)
}

impl io::Read for Reader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        read_or_eof(Reader::read(self, buf))
    }
}

impl io::Read for &Reader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        read_or_eof(Reader::read(*self, buf))
    }
}

impl io::Seek for Reader {
    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
        seek_from(self, pos)
    }
}

impl io::Seek for &Reader {
    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
        seek_from(*self, pos)
    }
}
