//! Write cursors: a read cursor plus mutation.

use std::io;

use crate::errors::{MmapError, Result};
use crate::mapping::Mapping;
use crate::reader::{read_or_eof, seek_from, Reader, Table, Whence};
use crate::utils::ensure_offset;

/// A write cursor over a writable [`Mapping`].
///
/// Wraps a [`Reader`] (sharing its id, offset, and closed flag) and adds
/// writes. If the mapping was opened with `sync`, every write is followed by
/// a synchronous flush of the whole region.
///
/// Dropping a writer closes it.
#[derive(Debug)]
pub struct Writer {
    reader: Reader,
}

impl Mapping {
    /// Open a write cursor.
    ///
    /// # Errors
    ///
    /// Returns `MmapError::Closed` if the mapping is closed.
    /// Returns `MmapError::ReadOnly` if the mapping is not writable.
    /// Returns `MmapError::DirectOpen` while any direct view is open.
    pub fn writer(&self) -> Result<Writer> {
        Ok(Writer {
            reader: Reader::register(&self.shared, Table::Writers)?,
        })
    }
}

impl Writer {
    /// The underlying read cursor.
    #[must_use]
    pub fn as_reader(&self) -> &Reader {
        &self.reader
    }

    /// Cursor id, unique among the mapping's open cursors.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.reader.id()
    }

    /// Whether this cursor has been closed, directly or by the mapping.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.reader.is_closed()
    }

    /// Current sequential offset.
    #[must_use]
    pub fn offset(&self) -> usize {
        self.reader.offset()
    }

    /// See [`Reader::len`].
    ///
    /// # Errors
    ///
    /// Returns `MmapError::Closed` if the cursor or the mapping is closed.
    pub fn len(&self) -> Result<usize> {
        self.reader.len()
    }

    /// See [`Reader::page_count`].
    ///
    /// # Errors
    ///
    /// Returns `MmapError::Closed` if the cursor or the mapping is closed.
    pub fn page_count(&self) -> Result<(usize, usize)> {
        self.reader.page_count()
    }

    /// See [`Reader::peek`].
    ///
    /// # Errors
    ///
    /// As [`Reader::peek`].
    pub fn peek(&self, offset: usize) -> Result<u8> {
        self.reader.peek(offset)
    }

    /// See [`Reader::read`].
    ///
    /// # Errors
    ///
    /// As [`Reader::read`].
    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        self.reader.read(buf)
    }

    /// See [`Reader::read_at`].
    ///
    /// # Errors
    ///
    /// As [`Reader::read_at`].
    pub fn read_at(&self, buf: &mut [u8], offset: usize) -> Result<usize> {
        self.reader.read_at(buf, offset)
    }

    /// See [`Reader::read_byte`].
    ///
    /// # Errors
    ///
    /// As [`Reader::read_byte`].
    pub fn read_byte(&self) -> Result<u8> {
        self.reader.read_byte()
    }

    /// See [`Reader::seek`].
    ///
    /// # Errors
    ///
    /// As [`Reader::seek`].
    pub fn seek(&self, offset: i64, whence: Whence) -> Result<usize> {
        self.reader.seek(offset, whence)
    }

    /// Write `value` at `offset` without moving the cursor.
    ///
    /// # Errors
    ///
    /// Returns `MmapError::Closed` if the cursor or the mapping is closed.
    /// Returns `MmapError::OutOfRange` if `offset` is past the region.
    /// Returns `MmapError::Io` if the flush-on-write fails.
    pub fn poke(&self, value: u8, offset: usize) -> Result<()> {
        let _offset = self.reader.lock_offset_shared();
        self.reader.with_bytes_mut(|bytes| {
            ensure_offset(offset, bytes.len())?;
            bytes[offset] = value;
            Ok(())
        })
    }

    /// Write `buf` at the current offset, advancing by the bytes written.
    ///
    /// An empty `buf` returns `Ok(0)`.
    ///
    /// # Errors
    ///
    /// Returns `MmapError::EndOfStream` if the offset is already at the end.
    /// Returns `MmapError::ShortWrite` if `buf` did not fit; the offset still
    /// advances by what was written.
    /// Returns `MmapError::Closed` if the cursor or the mapping is closed.
    /// Returns `MmapError::Io` if the flush-on-write fails.
    pub fn write(&self, buf: &[u8]) -> Result<usize> {
        let mut offset = self.reader.lock_offset();
        let start = *offset;
        let mut written = 0;
        let result = self.reader.with_bytes_mut(|bytes| {
            let copied = copy_into(bytes, start, buf, false);
            written = match &copied {
                Ok(n) => *n,
                Err(err) => err.transferred(),
            };
            copied
        });
        // Advance even if the flush-on-write failed; the bytes are in the region.
        *offset += written;
        result
    }

    /// Write `buf` at the absolute `offset` without moving the cursor.
    ///
    /// # Errors
    ///
    /// Returns `MmapError::OutOfRange` if `offset` is past the region.
    /// Returns `MmapError::ShortWrite` if `buf` did not fit.
    /// Returns `MmapError::Closed` if the cursor or the mapping is closed.
    /// Returns `MmapError::Io` if the flush-on-write fails.
    pub fn write_at(&self, buf: &[u8], offset: usize) -> Result<usize> {
        let _offset = self.reader.lock_offset_shared();
        self.reader.with_bytes_mut(|bytes| copy_into(bytes, offset, buf, true))
    }

    /// Write the UTF-8 bytes of `s`, as [`write`](Self::write).
    ///
    /// # Errors
    ///
    /// As [`write`](Self::write).
    pub fn write_str(&self, s: &str) -> Result<usize> {
        self.write(s.as_bytes())
    }

    /// Write one byte at the current offset and advance by one.
    ///
    /// # Errors
    ///
    /// Returns `MmapError::EndOfStream` at the end of the region.
    /// Returns `MmapError::Closed` if the cursor or the mapping is closed.
    /// Returns `MmapError::Io` if the flush-on-write fails.
    pub fn write_byte(&self, value: u8) -> Result<()> {
        let mut offset = self.reader.lock_offset();
        let at = *offset;
        let mut wrote = false;
        let result = self.reader.with_bytes_mut(|bytes| {
            let slot = bytes
                .get_mut(at)
                .ok_or(MmapError::EndOfStream { transferred: 0 })?;
            *slot = value;
            wrote = true;
            Ok(())
        });
        if wrote {
            *offset += 1;
        }
        result
    }

    /// Close the cursor and deregister it from the mapping. Idempotent.
    pub fn close(&self) {
        self.reader.close();
    }
}

/// Copy as much of `buf` as fits at `at`.
///
/// `positional` selects the out-of-range rule: absolute writes reject an
/// offset past the region, sequential writes report end of stream.
fn copy_into(bytes: &mut [u8], at: usize, buf: &[u8], positional: bool) -> Result<usize> {
    if positional {
        ensure_offset(at, bytes.len())?;
    }
    if buf.is_empty() {
        return Ok(0);
    }
    if at >= bytes.len() {
        return Err(MmapError::EndOfStream { transferred: 0 });
    }
    let n = buf.len().min(bytes.len() - at);
    bytes[at..at + n].copy_from_slice(&buf[..n]);
    if n < buf.len() {
        return Err(MmapError::ShortWrite {
            written: n,
            requested: buf.len(),
        });
    }
    Ok(n)
}

fn write_partial(result: Result<usize>) -> io::Result<usize> {
    match result {
        Err(MmapError::ShortWrite { written, .. }) => Ok(written),
        Err(MmapError::EndOfStream { .. }) => Ok(0),
        other => other.map_err(Into::into),
    }
}

impl io::Read for Writer {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        read_or_eof(self.reader.read(buf))
    }
}

impl io::Seek for Writer {
    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
        seek_from(&self.reader, pos)
    }
}

impl io::Write for Writer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        write_partial(Writer::write(self, buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.reader.sync_region().map_err(Into::into)
    }
}

impl io::Write for &Writer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        write_partial(Writer::write(*self, buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.reader.sync_region().map_err(Into::into)
    }
}
