//! Zero-copy direct views over a mapping.

use std::ops::{Deref, DerefMut, Range};
use std::sync::Arc;

use log::trace;
use parking_lot::RwLockReadGuard;

use crate::errors::{MmapError, Result};
use crate::mapping::{Mapping, Shared};
use crate::region::Region;
use crate::utils::window;

/// Live byte borrows of one registered view.
pub(crate) struct ViewBorrows {
    range: Range<usize>,
    shared: usize,
    exclusive: bool,
}

impl ViewBorrows {
    fn new(range: Range<usize>) -> Self {
        Self {
            range,
            shared: 0,
            exclusive: false,
        }
    }

    fn overlaps(&self, range: &Range<usize>) -> bool {
        self.range.start < range.end && range.start < self.range.end
    }
}

/// A window over the whole mapped region or a sub-range of it.
///
/// Direct views and cursors never coexist on one mapping. A view is
/// move-only: it cannot be cloned, so there is exactly one owner of each
/// registration. It stops working once freed, or once the mapping is closed
/// or resized.
///
/// Byte access is borrow-checked across views at runtime: guards over
/// overlapping ranges may all be shared, or one may be mutable. Guards over
/// disjoint ranges never conflict. A conflicting request fails with
/// `MmapError::Borrowed` instead of waiting.
///
/// Dropping a view frees it.
///
/// # Examples
///
/// ```no_run
/// use mmap_handles::Mapping;
///
/// let map = Mapping::options().write(true).create(true).open("data.bin")?;
/// let src = map.direct_at(0, 4)?;
/// let mut dst = map.direct_at(16, 4)?;
/// dst.bytes_mut()?.copy_from_slice(&src.bytes()?);
/// assert_eq!(&*dst.bytes()?, &*src.bytes()?);
/// # Ok::<(), mmap_handles::MmapError>(())
/// ```
pub struct Direct {
    shared: Arc<Shared>,
    token: u64,
    range: Range<usize>,
    released: bool,
}

impl std::fmt::Debug for Direct {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Direct")
            .field("path", &self.shared.name)
            .field("token", &self.token)
            .field("range", &self.range)
            .field("released", &self.released)
            .finish()
    }
}

/// Shared access to a direct view's bytes.
///
/// Holds the region lock shared, so close and resize wait until it drops.
/// Do not close or resize the mapping on the thread holding the guard.
pub struct DirectRef<'a> {
    bytes: &'a [u8],
    shared: &'a Shared,
    token: u64,
    _region: RwLockReadGuard<'a, Option<Region>>,
}

/// Mutable access to a direct view's bytes.
///
/// Holds the region lock shared, so close and resize wait until it drops.
/// Do not close or resize the mapping on the thread holding the guard.
pub struct DirectMut<'a> {
    bytes: &'a mut [u8],
    shared: &'a Shared,
    token: u64,
    _region: RwLockReadGuard<'a, Option<Region>>,
}

impl Mapping {
    /// Create a direct view over the entire region.
    ///
    /// # Errors
    ///
    /// Returns `MmapError::Closed` if the mapping is closed.
    /// Returns `MmapError::HandlesOpen` while any reader or writer is open.
    pub fn direct(&self) -> Result<Direct> {
        self.mint_direct(None)
    }

    /// Create a direct view over `[offset, offset + size)`.
    ///
    /// # Errors
    ///
    /// Returns `MmapError::Closed` if the mapping is closed.
    /// Returns `MmapError::HandlesOpen` while any reader or writer is open.
    /// Returns `MmapError::OutOfRange` naming the bound that falls outside the region.
    /// Returns `MmapError::InvalidSize` if `size` is zero.
    pub fn direct_at(&self, offset: usize, size: usize) -> Result<Direct> {
        self.mint_direct(Some((offset, size)))
    }

    /// Release a direct view.
    ///
    /// Freeing a view twice, or a view the mapping already released by closing
    /// or resizing, is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `MmapError::InvalidHandle` if `view` belongs to another mapping.
    pub fn free(&self, view: &mut Direct) -> Result<()> {
        if view.released {
            return Ok(());
        }
        if !Arc::ptr_eq(&view.shared, &self.shared) {
            return Err(MmapError::InvalidHandle);
        }
        view.detach();
        Ok(())
    }

    fn mint_direct(&self, request: Option<(usize, usize)>) -> Result<Direct> {
        let region = self.shared.region.read_recursive();
        let len = region.as_ref().ok_or(MmapError::Closed)?.len();
        let mut book = self.shared.book.lock();
        if book.has_cursors() {
            return Err(MmapError::HandlesOpen);
        }
        let range = match request {
            None => 0..len,
            Some((offset, size)) => window(offset, size, len)?,
        };

        let token = book.next_token;
        book.next_token += 1;
        book.directs.insert(token, ViewBorrows::new(range.clone()));
        trace!(
            "{}: opened direct view {} over {:?}",
            self.shared.name.display(),
            token,
            range
        );

        Ok(Direct {
            shared: Arc::clone(&self.shared),
            token,
            range,
            released: false,
        })
    }
}

impl Direct {
    /// Offset of the view within the region.
    #[must_use]
    pub fn offset(&self) -> usize {
        self.range.start
    }

    /// Length of the view in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.range.len()
    }

    /// Whether the view covers no bytes. Views are never created empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }

    /// Whether the view can no longer reach the region.
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.released || !self.shared.book.lock().directs.contains_key(&self.token)
    }

    /// Borrow the view's bytes.
    ///
    /// # Errors
    ///
    /// Returns `MmapError::Closed` if the view was freed or released by the mapping.
    /// Returns `MmapError::Borrowed` while an overlapping view is borrowed mutably.
    pub fn bytes(&self) -> Result<DirectRef<'_>> {
        if self.released {
            return Err(MmapError::Closed);
        }
        let region = self.shared.region.read_recursive();
        let base = region.as_ref().ok_or(MmapError::Closed)?.base_ptr();
        {
            let mut book = self.shared.book.lock();
            if !book.directs.contains_key(&self.token) {
                return Err(MmapError::Closed);
            }
            if book
                .directs
                .values()
                .any(|b| b.exclusive && b.overlaps(&self.range))
            {
                return Err(MmapError::Borrowed);
            }
            if let Some(own) = book.directs.get_mut(&self.token) {
                own.shared += 1;
            }
        }
        // SAFETY: the range was validated against this region at mint time and
        // the token is still registered, so the region has not been remapped.
        // No mutable borrow overlaps it, and the read guard keeps it mapped.
        let bytes = unsafe { std::slice::from_raw_parts(base.add(self.range.start), self.range.len()) };
        Ok(DirectRef {
            bytes,
            shared: &self.shared,
            token: self.token,
            _region: region,
        })
    }

    /// Mutably borrow the view's bytes.
    ///
    /// # Errors
    ///
    /// Returns `MmapError::Closed` if the view was freed or released by the mapping.
    /// Returns `MmapError::ReadOnly` if the mapping is not writable.
    /// Returns `MmapError::Borrowed` while an overlapping view is borrowed.
    pub fn bytes_mut(&mut self) -> Result<DirectMut<'_>> {
        if self.released {
            return Err(MmapError::Closed);
        }
        let region = self.shared.region.read_recursive();
        let base = region.as_ref().ok_or(MmapError::Closed)?.base_ptr();
        {
            let mut book = self.shared.book.lock();
            if !book.directs.contains_key(&self.token) {
                return Err(MmapError::Closed);
            }
            if !self.shared.writable {
                return Err(MmapError::ReadOnly);
            }
            if book
                .directs
                .values()
                .any(|b| (b.exclusive || b.shared > 0) && b.overlaps(&self.range))
            {
                return Err(MmapError::Borrowed);
            }
            if let Some(own) = book.directs.get_mut(&self.token) {
                own.exclusive = true;
            }
        }
        // SAFETY: as in `bytes`, and additionally no other borrow overlaps the
        // range and the region is writable.
        let bytes =
            unsafe { std::slice::from_raw_parts_mut(base.add(self.range.start), self.range.len()) };
        Ok(DirectMut {
            bytes,
            shared: &self.shared,
            token: self.token,
            _region: region,
        })
    }

    /// Free the view, consuming it.
    pub fn release(self) {
        drop(self);
    }

    fn detach(&mut self) {
        self.released = true;
        if self.shared.book.lock().directs.remove(&self.token).is_some() {
            trace!(
                "{}: freed direct view {}",
                self.shared.name.display(),
                self.token
            );
        }
    }
}

impl Drop for Direct {
    fn drop(&mut self) {
        if !self.released {
            self.detach();
        }
    }
}

impl Deref for DirectRef<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.bytes
    }
}

impl Drop for DirectRef<'_> {
    fn drop(&mut self) {
        if let Some(own) = self.shared.book.lock().directs.get_mut(&self.token) {
            own.shared = own.shared.saturating_sub(1);
        }
    }
}

impl std::fmt::Debug for DirectRef<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectRef")
            .field("token", &self.token)
            .field("len", &self.bytes.len())
            .finish()
    }
}

impl Deref for DirectMut<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &*self.bytes
    }
}

impl DerefMut for DirectMut<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut *self.bytes
    }
}

impl Drop for DirectMut<'_> {
    fn drop(&mut self) {
        if let Some(own) = self.shared.book.lock().directs.get_mut(&self.token) {
            own.exclusive = false;
        }
    }
}

impl std::fmt::Debug for DirectMut<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectMut")
            .field("token", &self.token)
            .field("len", &self.bytes.len())
            .finish()
    }
}
