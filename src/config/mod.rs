//! Configuration for buffer allocation.
//!
//! This module provides types to configure how buffers are allocated:
//!
//! - [`BufConfig`] - Controls the combined-allocation threshold and the allocator
//! - [`CombinedOption`] - Selects the layout assumed by [`IoBuf::good_size`](crate::IoBuf::good_size)
//!
//! # Example
//!
//! ```
//! use iobufrs::{BufConfig, IoBuf, StorageKind};
//!
//! // Only very small buffers share an allocation with their node
//! let config = BufConfig::new(256)?;
//! let buf = IoBuf::create_with(512, &config)?;
//! assert_eq!(buf.storage_kind(), StorageKind::Embedded);
//!
//! # Ok::<(), iobufrs::IoBufError>(())
//! ```

use std::sync::Arc;

use crate::alloc::{AllocRef, Allocator};
use crate::error::IoBufError;

/// Default largest capacity served by a combined allocation (1 KiB).
pub const DEFAULT_COMBINED_THRESHOLD: usize = 1024;

/// Largest accepted combined-allocation threshold (64 KiB).
pub const MAX_COMBINED_THRESHOLD: usize = 64 * 1024;

/// Configuration for buffer creation.
///
/// `BufConfig` controls which storage layout [`IoBuf::create_with`](crate::IoBuf::create_with)
/// picks and which allocator backs the regions:
///
/// - Combined threshold (`combined_threshold`) - capacities up to this size
///   get node, metadata and data in a single allocation
/// - Allocator (`with_allocator`) - source of every block; the global
///   allocator unless replaced
///
/// # Example
///
/// ```
/// use iobufrs::BufConfig;
///
/// // Use default configuration
/// let config = BufConfig::default();
/// assert_eq!(config.combined_threshold(), 1024);
///
/// // Builder pattern
/// let config = BufConfig::default().with_combined_threshold(4096);
/// assert!(config.validate().is_ok());
/// # Ok::<(), iobufrs::IoBufError>(())
/// ```
#[derive(Debug, Clone)]
pub struct BufConfig {
    /// Largest capacity served by a combined allocation.
    combined_threshold: usize,

    /// Allocator for nodes and data blocks.
    allocator: AllocRef,
}

impl BufConfig {
    /// Creates a configuration with the given combined-allocation threshold.
    ///
    /// # Errors
    ///
    /// Returns [`IoBufError::InvalidConfig`] if `combined_threshold` exceeds
    /// [`MAX_COMBINED_THRESHOLD`].
    ///
    /// # Example
    ///
    /// ```
    /// use iobufrs::BufConfig;
    ///
    /// let config = BufConfig::new(512)?;
    /// assert_eq!(config.combined_threshold(), 512);
    /// assert!(BufConfig::new(1 << 20).is_err());
    /// # Ok::<(), iobufrs::IoBufError>(())
    /// ```
    pub fn new(combined_threshold: usize) -> Result<Self, IoBufError> {
        let config = Self {
            combined_threshold,
            allocator: AllocRef::System,
        };
        config.validate()?;
        Ok(config)
    }

    /// Sets the combined-allocation threshold. Zero disables combined
    /// allocations for non-empty buffers.
    ///
    /// Note: This does not validate the configuration. Use [`BufConfig::validate`]
    /// to check if the configuration is valid.
    pub fn with_combined_threshold(mut self, threshold: usize) -> Self {
        self.combined_threshold = threshold;
        self
    }

    /// Sets the allocator every node and region is taken from.
    ///
    /// # Example
    ///
    /// ```
    /// use std::sync::Arc;
    /// use iobufrs::{BufConfig, IoBuf, SystemAllocator};
    ///
    /// let config = BufConfig::default().with_allocator(Arc::new(SystemAllocator));
    /// let buf = IoBuf::create_with(64, &config)?;
    /// assert!(buf.capacity() >= 64);
    /// # Ok::<(), iobufrs::IoBufError>(())
    /// ```
    pub fn with_allocator(mut self, allocator: Arc<dyn Allocator>) -> Self {
        self.allocator = AllocRef::Custom(allocator);
        self
    }

    /// Returns the combined-allocation threshold.
    pub fn combined_threshold(&self) -> usize {
        self.combined_threshold
    }

    pub(crate) fn alloc_ref(&self) -> &AllocRef {
        &self.allocator
    }

    /// Validates the current configuration.
    ///
    /// # Example
    ///
    /// ```
    /// use iobufrs::{BufConfig, MAX_COMBINED_THRESHOLD};
    ///
    /// let config = BufConfig::default().with_combined_threshold(MAX_COMBINED_THRESHOLD + 1);
    /// assert!(config.validate().is_err());
    /// ```
    pub fn validate(&self) -> Result<(), IoBufError> {
        if self.combined_threshold > MAX_COMBINED_THRESHOLD {
            return Err(IoBufError::InvalidConfig {
                message: "combined_threshold cannot exceed MAX_COMBINED_THRESHOLD",
            });
        }
        Ok(())
    }
}

impl Default for BufConfig {
    fn default() -> Self {
        Self {
            combined_threshold: DEFAULT_COMBINED_THRESHOLD,
            allocator: AllocRef::System,
        }
    }
}

/// Storage layout assumed when sizing a buffer ahead of creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum CombinedOption {
    /// Whatever [`IoBuf::create`](crate::IoBuf::create) would pick.
    #[default]
    Default,
    /// Node, metadata and data in one allocation.
    Combined,
    /// Data in its own allocation.
    Separate,
}
