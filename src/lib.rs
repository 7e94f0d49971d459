//! iobufrs
//!
//! Zero-copy chained byte buffers for Rust.
//!
//! `iobufrs` provides [`IoBuf`]: a chain of byte segments over
//! reference-counted storage, built for network and I/O code that needs to:
//!
//! - reserve headroom for protocol headers and tailroom for appends
//! - share one region between many views without copying
//! - splice chains together and apart in constant time
//! - coalesce only when contiguous bytes are actually needed
//!
//! The crate intentionally:
//! - does NOT do I/O itself
//! - does NOT synchronize writers (mutation needs `&mut` and an unshared region)
//! - does NOT install a logging subscriber
//!
//! # Example
//!
//! ```
//! use iobufrs::{IoBuf, IoBufError};
//!
//! fn main() -> Result<(), IoBufError> {
//!     let mut header = IoBuf::create(64)?;
//!     header.extend_from_slice(b"HDR:")?;
//!
//!     let body = IoBuf::from(b"payload".to_vec());
//!     header.append_to_chain(body);
//!     assert_eq!(header.count_chain_elements(), 2);
//!
//!     let shared = header.clone();
//!     assert!(shared.is_shared());
//!
//!     assert_eq!(header.coalesce()?, b"HDR:payload");
//!     assert_eq!(shared, header);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_op_in_unsafe_fn)]

mod alloc;
mod buf;
mod config;
mod cursor;
mod error;
mod hash;
mod storage;

//
// Public surface
//

pub use alloc::{
    AllocHooks, Allocator, MAX_BUFFER_SIZE, SystemAllocator, clear_alloc_hooks,
    install_alloc_hooks,
};
pub use buf::{IoBuf, Segment, Segments, SegmentsMut};
pub use config::{BufConfig, CombinedOption, DEFAULT_COMBINED_THRESHOLD, MAX_COMBINED_THRESHOLD};
pub use cursor::{Cursor, Spans};
pub use error::IoBufError;
pub use storage::{FreeFn, ReleaseEvent, StorageKind, StorageObserver};

#[cfg(feature = "hash-blake3")]
pub use hash::{ContentHash, ContentHasher};
