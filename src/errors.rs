//! Crate-specific error types for mmap-handles.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result alias for mmap-handles operations.
pub type Result<T> = std::result::Result<T, MmapError>;

/// Error type covering open flags, platform failures, bounds, and handle lifecycle.
#[derive(Debug, Error)]
pub enum MmapError {
    /// A platform call failed. Carries the mapping's path and the failing step.
    #[error("{context} ({}): {source}", .name.display())]
    Io {
        /// Path of the backing file.
        name: PathBuf,
        /// The step that failed, e.g. "could not open file".
        context: &'static str,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },

    /// The open request used a flag a mapping cannot honor (write-only, append).
    #[error("unsupported open flag: {0}")]
    UnsupportedFlag(&'static str),

    /// The open request combined flags inconsistently.
    #[error("invalid open flags: {0}")]
    InvalidFlags(&'static str),

    /// A zero-length file cannot be mapped read-only.
    #[error("cannot map empty file: {}", .0.display())]
    EmptyFile(PathBuf),

    /// The backing file did not take the size it was resized to.
    #[error("incorrect size of resized file: requested={requested}, actual={actual}")]
    SizeMismatch {
        /// Size passed to the resize.
        requested: u64,
        /// Size reported afterwards.
        actual: u64,
    },

    /// A size or position does not fit the platform's address space.
    #[error("value too large for address space: {0}")]
    TooLarge(i128),

    /// The mapping or the handle has been closed.
    #[error("mapping or handle is closed")]
    Closed,

    /// A write-side operation was attempted on a read-only mapping.
    #[error("mapping is read-only")]
    ReadOnly,

    /// A direct view was requested while readers or writers are open.
    #[error("mapping has open readers and/or writers")]
    HandlesOpen,

    /// A reader or writer was requested while direct views are open.
    #[error("mapping has open direct views")]
    DirectOpen,

    /// An offset or range bound falls outside the mapped region.
    #[error("{what} out of range: {value} (limit {limit})")]
    OutOfRange {
        /// Which bound was violated ("offset" or "end").
        what: &'static str,
        /// Offending value.
        value: usize,
        /// Length of the mapped region.
        limit: usize,
    },

    /// A size argument must be at least one byte.
    #[error("size must be greater than zero: {0}")]
    InvalidSize(u64),

    /// A page count argument must be at least one.
    #[error("page count must be greater than zero: {0}")]
    InvalidCount(usize),

    /// An unrecognized seek origin.
    #[error("invalid whence: {0}")]
    InvalidWhence(i32),

    /// A seek computed a position outside `[0, len]`.
    #[error("invalid seek position {position} for length {len}")]
    InvalidPosition {
        /// Computed absolute position.
        position: i128,
        /// Length of the mapped region.
        len: usize,
    },

    /// A sequential or positional transfer ran off the end of the region.
    #[error("end of stream after {transferred} bytes")]
    EndOfStream {
        /// Bytes copied before the end was reached.
        transferred: usize,
    },

    /// Fewer bytes were written than requested.
    #[error("short write: wrote {written} of {requested} bytes")]
    ShortWrite {
        /// Bytes actually written.
        written: usize,
        /// Bytes the caller asked to write.
        requested: usize,
    },

    /// The direct view was not minted by this mapping.
    #[error("invalid direct view")]
    InvalidHandle,

    /// An overlapping direct view holds a conflicting byte borrow.
    #[error("direct view range is already borrowed")]
    Borrowed,
}

impl MmapError {
    pub(crate) fn io(name: impl Into<PathBuf>, context: &'static str, source: io::Error) -> Self {
        MmapError::Io {
            name: name.into(),
            context,
            source,
        }
    }

    /// Bytes transferred before this error was raised, for `EndOfStream` and `ShortWrite`.
    #[must_use]
    pub fn transferred(&self) -> usize {
        match self {
            MmapError::EndOfStream { transferred } => *transferred,
            MmapError::ShortWrite { written, .. } => *written,
            _ => 0,
        }
    }

    /// Whether this is the end-of-stream signal rather than a failure.
    #[must_use]
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, MmapError::EndOfStream { .. })
    }
}

impl From<MmapError> for io::Error {
    fn from(err: MmapError) -> Self {
        let kind = match &err {
            MmapError::Io { source, .. } => source.kind(),
            MmapError::EndOfStream { .. } => io::ErrorKind::UnexpectedEof,
            MmapError::ShortWrite { .. } => io::ErrorKind::WriteZero,
            MmapError::Closed => io::ErrorKind::NotConnected,
            MmapError::ReadOnly => io::ErrorKind::PermissionDenied,
            MmapError::HandlesOpen | MmapError::DirectOpen | MmapError::Borrowed => {
                io::ErrorKind::WouldBlock
            }
            MmapError::TooLarge(_) => io::ErrorKind::OutOfMemory,
            _ => io::ErrorKind::InvalidInput,
        };
        io::Error::new(kind, err)
    }
}
