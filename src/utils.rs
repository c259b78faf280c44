//! Utility helpers for page size, whole-page arithmetic, and bounds checks.

use std::sync::OnceLock;

use crate::errors::{MmapError, Result};

/// Get the system page size in bytes.
///
/// Queried once per process and cached; the value never changes afterwards.
#[must_use]
pub fn page_size() -> usize {
    static PAGE_SIZE: OnceLock<usize> = OnceLock::new();
    *PAGE_SIZE.get_or_init(|| {
        cfg_if::cfg_if! {
            if #[cfg(target_os = "windows")] {
                windows_page_size()
            } else {
                unix_page_size()
            }
        }
    })
}

#[cfg(target_os = "windows")]
fn windows_page_size() -> usize {
    use std::mem::MaybeUninit;
    #[allow(non_snake_case)]
    #[repr(C)]
    struct SYSTEM_INFO {
        wProcessorArchitecture: u16,
        wReserved: u16,
        dwPageSize: u32,
        lpMinimumApplicationAddress: *mut core::ffi::c_void,
        lpMaximumApplicationAddress: *mut core::ffi::c_void,
        dwActiveProcessorMask: usize,
        dwNumberOfProcessors: u32,
        dwProcessorType: u32,
        dwAllocationGranularity: u32,
        wProcessorLevel: u16,
        wProcessorRevision: u16,
    }
    extern "system" {
        fn GetSystemInfo(lpSystemInfo: *mut SYSTEM_INFO);
    }
    let mut sysinfo = MaybeUninit::<SYSTEM_INFO>::uninit();
    // SAFETY: GetSystemInfo fully initializes the struct it is given.
    unsafe {
        GetSystemInfo(sysinfo.as_mut_ptr());
        let s = sysinfo.assume_init();
        s.dwPageSize as usize
    }
}

#[cfg(not(target_os = "windows"))]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn unix_page_size() -> usize {
    // SAFETY: sysconf with _SC_PAGESIZE is safe to call.
    let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    // sysconf reports -1 on failure; fall back to the common 4 KiB page.
    if page_size <= 0 {
        4096
    } else {
        page_size as usize
    }
}

/// Split a byte length into whole pages and the trailing remainder.
///
/// Returns `(0, len)` when `page_size` is zero.
#[must_use]
pub fn whole_pages(len: usize, page_size: usize) -> (usize, usize) {
    if page_size == 0 {
        return (0, len);
    }
    (len / page_size, len % page_size)
}

/// Ensure `offset` addresses a byte inside a region of `len` bytes.
///
/// # Errors
///
/// Returns `MmapError::OutOfRange` if `offset >= len`.
pub fn ensure_offset(offset: usize, len: usize) -> Result<()> {
    if offset >= len {
        return Err(MmapError::OutOfRange {
            what: "offset",
            value: offset,
            limit: len,
        });
    }
    Ok(())
}

/// Validate a `[offset, offset+size)` window against a region of `len` bytes
/// and return it as a range.
///
/// # Errors
///
/// Returns `MmapError::OutOfRange` naming the bound that failed, or
/// `MmapError::InvalidSize` if `size` is zero.
pub fn window(offset: usize, size: usize, len: usize) -> Result<std::ops::Range<usize>> {
    ensure_offset(offset, len)?;
    if size < 1 {
        return Err(MmapError::InvalidSize(0));
    }
    let end = offset.saturating_add(size);
    if end > len {
        return Err(MmapError::OutOfRange {
            what: "end",
            value: end,
            limit: len,
        });
    }
    Ok(offset..end)
}

/// Convert a file length to an addressable size.
///
/// A slice can span at most `isize::MAX` bytes, so that is the limit.
///
/// # Errors
///
/// Returns `MmapError::TooLarge` if `len` exceeds the limit.
pub fn addressable(len: u64) -> Result<usize> {
    match usize::try_from(len) {
        Ok(size) if isize::try_from(size).is_ok() => Ok(size),
        _ => Err(MmapError::TooLarge(i128::from(len))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_size_is_stable_power_of_two() {
        let ps = page_size();
        assert!(ps > 0);
        assert!(ps.is_power_of_two());
        assert_eq!(ps, page_size());
    }

    #[test]
    fn whole_pages_rounds_down() {
        assert_eq!(whole_pages(4096, 4096), (1, 0));
        assert_eq!(whole_pages(4100, 4096), (1, 4));
        assert_eq!(whole_pages(100, 4096), (0, 100));
        assert_eq!(whole_pages(8192, 4096), (2, 0));
        assert_eq!(whole_pages(10, 0), (0, 10));
    }

    #[test]
    fn window_names_offending_bound() {
        assert_eq!(window(0, 100, 100).expect("full"), 0..100);
        assert_eq!(window(50, 25, 100).expect("inner"), 50..75);

        match window(100, 1, 100) {
            Err(MmapError::OutOfRange { what, value, limit }) => {
                assert_eq!((what, value, limit), ("offset", 100, 100));
            }
            other => panic!("expected offset error, got {other:?}"),
        }
        match window(50, 51, 100) {
            Err(MmapError::OutOfRange { what, value, limit }) => {
                assert_eq!((what, value, limit), ("end", 101, 100));
            }
            other => panic!("expected end error, got {other:?}"),
        }
        assert!(matches!(window(10, 0, 100), Err(MmapError::InvalidSize(0))));
        assert!(matches!(
            window(10, usize::MAX, 100),
            Err(MmapError::OutOfRange { what: "end", .. })
        ));
    }

    #[test]
    fn addressable_rejects_oversized() {
        assert_eq!(addressable(4096).expect("fits"), 4096);
        assert!(matches!(addressable(u64::MAX), Err(MmapError::TooLarge(_))));
        assert!(matches!(
            addressable(isize::MAX as u64 + 1),
            Err(MmapError::TooLarge(_))
        ));
    }
}
