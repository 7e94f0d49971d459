//! Error types for iobufrs.

use thiserror::Error;

/// Errors that can occur while creating, resizing or traversing buffers.
///
/// Contract breaches (writing through shared storage, reserving on shared
/// storage) are not represented here: they panic. Detected storage
/// corruption aborts the process.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IoBufError {
    /// The allocator returned nothing, or the requested size exceeds
    /// [`MAX_BUFFER_SIZE`](crate::MAX_BUFFER_SIZE) or overflowed while
    /// being computed.
    #[error("out of memory: cannot allocate {requested} bytes")]
    OutOfMemory {
        /// The size that was requested (`usize::MAX` when the computation overflowed).
        requested: usize,
    },

    /// A boundary move or cursor skip would leave the valid range.
    #[error("{op}: {requested} bytes requested but only {available} available")]
    OutOfBounds {
        /// The operation that was attempted.
        op: &'static str,
        /// The number of bytes asked for.
        requested: usize,
        /// The number of bytes that were available.
        available: usize,
    },

    /// Coalescing asked for more bytes than the chain holds.
    #[error("attempted to coalesce {requested} bytes but only {available} are available")]
    CoalesceOverflow {
        /// The number of bytes asked for.
        requested: usize,
        /// The number of bytes the chain holds.
        available: usize,
    },

    /// Invalid configuration parameter.
    #[error("invalid config: {message}")]
    InvalidConfig {
        /// Description of what was invalid.
        message: &'static str,
    },

    /// Buffer contents are not valid UTF-8.
    #[error("buffer is not valid utf-8 (valid up to byte {valid_up_to})")]
    InvalidUtf8 {
        /// Length of the longest valid UTF-8 prefix.
        valid_up_to: usize,
    },
}

impl IoBufError {
    pub(crate) const fn oom(requested: usize) -> Self {
        IoBufError::OutOfMemory { requested }
    }

    /// Fails with [`IoBufError::OutOfBounds`] when `requested > available`.
    pub(crate) fn check_bounds(
        op: &'static str,
        requested: usize,
        available: usize,
    ) -> Result<(), IoBufError> {
        if requested > available {
            return Err(IoBufError::OutOfBounds {
                op,
                requested,
                available,
            });
        }
        Ok(())
    }
}
