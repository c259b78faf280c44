//! # mmap-handles: managed handles over memory-mapped files
//!
//! This crate maps a file into memory and shares the region between many
//! logical clients in one process through handles whose lifetimes the
//! [`Mapping`] tracks.
//!
//! ## Handles
//!
//! - [`Direct`]: a zero-copy window over the whole region or a sub-range
//! - [`Reader`]: an offset-tracking read cursor
//! - [`Writer`]: a read cursor that can also write
//!
//! Direct views and cursors are mutually exclusive: a mapping hands out one
//! kind or the other, never both at once. Closing or resizing the mapping
//! closes every outstanding handle first; handles that outlive it report
//! [`MmapError::Closed`].
//!
//! ## Quick Start
//!
//! ```no_run
//! use mmap_handles::{Mapping, Whence};
//!
//! // One zeroed page, created if missing
//! let map = Mapping::options()
//!     .write(true)
//!     .create(true)
//!     .truncate(true)
//!     .open("data.bin")?;
//!
//! let writer = map.writer()?;
//! writer.write(b"hello")?;
//! writer.seek(0, Whence::Start)?;
//! assert_eq!(writer.read_byte()?, b'h');
//! writer.close();
//!
//! map.sync(true)?;
//! map.close()?;
//! # Ok::<(), mmap_handles::MmapError>(())
//! ```
//!
//! ## Modules
//!
//! - [`errors`]: Error type for all operations
//! - [`utils`]: Page size and bounds helpers
//! - [`options`]: Open flags
//! - [`mapping`]: The owning [`Mapping`]
//! - [`direct`]: Direct views
//! - [`reader`] / [`writer`]: Cursors
//! - [`manager`]: Convenience constructors

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![deny(missing_docs)]

pub mod errors;
pub mod utils;
pub mod options;
pub mod mapping;
pub mod direct;
pub mod reader;
pub mod writer;
pub mod manager;

mod region;

pub use direct::{Direct, DirectMut, DirectRef};
pub use errors::{MmapError, Result};
pub use manager::{create, open_ro, open_rw};
pub use mapping::Mapping;
pub use options::{Access, MapOptions};
pub use reader::{Reader, Whence};
pub use writer::Writer;
