//! Buffer nodes and the owning chain handle.
//!
//! An [`IoBuf`] owns a circular chain of heap-allocated nodes. Each node
//! carries a [`Segment`]: a view (headroom, data, tailroom) over a region
//! plus an optional reference to the region's shared storage. The handle
//! dereferences to the head segment, so single-node buffers read like a
//! plain byte container.
//!
//! - [`IoBuf`] - chain owner, constructors, clone and chain operations
//! - [`Segment`] - per-node view and mutation
//! - [`Segments`] / [`SegmentsMut`] - iteration over a chain

mod chain;
mod compare;
mod growth;
mod interop;
mod segment;

pub use chain::{Segments, SegmentsMut};
pub use segment::Segment;

use std::alloc::handle_alloc_error;
use std::fmt;
use std::marker::PhantomData;
use std::mem::ManuallyDrop;
use std::ops::{Deref, DerefMut};
use std::ptr::{self, NonNull};

use crate::alloc::{AllocRef, MAX_BUFFER_SIZE};
use crate::config::{BufConfig, CombinedOption};
use crate::error::IoBufError;
use crate::storage::layout;
use crate::storage::{self, Release, Rollback};

/// A chain link. Lives inside a node block or a combined block and is only
/// ever reached through raw pointers.
pub(crate) struct Node {
    pub(crate) seg: Segment,
    pub(crate) next: NonNull<Node>,
    pub(crate) prev: NonNull<Node>,
}

impl Node {
    /// Writes a self-linked node at `at`.
    ///
    /// # Safety
    ///
    /// `at` must be valid for writes and suitably aligned for `Node`.
    pub(crate) unsafe fn init_at(at: *mut Node, seg: Segment) -> NonNull<Node> {
        // SAFETY: `at` points into a live block.
        let node = unsafe { NonNull::new_unchecked(at) };
        // SAFETY: caller contract.
        unsafe {
            ptr::write(
                at,
                Node {
                    seg,
                    next: node,
                    prev: node,
                },
            )
        };
        node
    }
}

/// Releases a node's storage reference and its block.
///
/// # Safety
///
/// `node` must be live and unreachable from any other chain afterwards.
pub(crate) unsafe fn destroy_node(node: NonNull<Node>) {
    // SAFETY: caller contract.
    unsafe {
        (*node.as_ptr()).seg.release_storage();
        layout::free_node(node);
    }
}

/// A chain of byte segments with shared, reference-counted storage.
///
/// # Example
///
/// ```
/// use iobufrs::IoBuf;
///
/// let mut buf = IoBuf::create(100)?;
/// buf.advance(10)?;
/// buf.extend_from_slice(b"hello")?;
/// assert_eq!(buf.headroom(), 10);
/// assert_eq!(buf.data(), b"hello");
///
/// let copy = buf.clone();
/// assert!(buf.is_shared());
/// assert_eq!(copy, buf);
/// # Ok::<(), iobufrs::IoBufError>(())
/// ```
pub struct IoBuf {
    head: NonNull<Node>,
    _owns: PhantomData<Node>,
}

// SAFETY: the chain is owned exclusively by this handle; shared storage is
// reference counted atomically and only written through a verified count of
// one; observer lists are behind a mutex and release functions are `Send + Sync`.
unsafe impl Send for IoBuf {}
// SAFETY: `&IoBuf` only permits reads of the chain and atomic refcount updates.
unsafe impl Sync for IoBuf {}

impl IoBuf {
    pub(crate) fn from_raw(head: NonNull<Node>) -> Self {
        Self {
            head,
            _owns: PhantomData,
        }
    }

    pub(crate) fn into_raw(self) -> NonNull<Node> {
        ManuallyDrop::new(self).head
    }

    pub(crate) fn head_ptr(&self) -> NonNull<Node> {
        self.head
    }

    fn head_node(&self) -> &Node {
        // SAFETY: the head is live for as long as the handle.
        unsafe { self.head.as_ref() }
    }

    /// Creates an empty buffer with no capacity and no storage.
    pub fn new() -> Self {
        match layout::alloc_node(&AllocRef::System) {
            Ok(node) => Self::from_raw(node),
            Err(_) => handle_alloc_error(layout::node_layout()),
        }
    }

    /// Creates a buffer with at least `capacity` bytes, using the default
    /// configuration.
    ///
    /// Small capacities (up to 1 KiB) get a single allocation holding node,
    /// metadata and data; larger ones get a separate data block.
    ///
    /// # Errors
    ///
    /// Returns [`IoBufError::OutOfMemory`] when `capacity` exceeds
    /// [`MAX_BUFFER_SIZE`] or allocation fails.
    pub fn create(capacity: usize) -> Result<Self, IoBufError> {
        Self::create_with(capacity, &BufConfig::default())
    }

    /// Creates a buffer with at least `capacity` bytes under `config`.
    pub fn create_with(capacity: usize, config: &BufConfig) -> Result<Self, IoBufError> {
        config.validate()?;
        if capacity > MAX_BUFFER_SIZE {
            return Err(IoBufError::oom(capacity));
        }
        let alloc = config.alloc_ref();
        if capacity <= config.combined_threshold() {
            tracing::trace!(capacity, strategy = "combined", "creating buffer");
            return Self::create_combined_in(alloc, capacity);
        }
        if let Some(block_size) = alloc.get().size_class(capacity) {
            if !layout::embedded_fits(block_size, capacity) {
                tracing::trace!(capacity, block_size, strategy = "separate", "creating buffer");
                let region = alloc.allocate_zeroed(layout::data_layout(block_size)?)?;
                let release = Release::Allocator {
                    alloc: alloc.clone(),
                    size: block_size,
                };
                return Self::adopt(alloc, region, block_size, 0, 0, release, true);
            }
        }
        tracing::trace!(capacity, strategy = "embedded", "creating buffer");
        Self::create_separate_in(alloc, capacity)
    }

    /// Creates a buffer whose node, metadata and data share one allocation.
    pub fn create_combined(capacity: usize) -> Result<Self, IoBufError> {
        Self::create_combined_in(&AllocRef::System, capacity)
    }

    /// Creates a buffer whose data lives in its own allocation, so it can
    /// outlive the node.
    pub fn create_separate(capacity: usize) -> Result<Self, IoBufError> {
        Self::create_separate_in(&AllocRef::System, capacity)
    }

    pub(crate) fn create_combined_in(alloc: &AllocRef, capacity: usize) -> Result<Self, IoBufError> {
        if capacity > MAX_BUFFER_SIZE {
            return Err(IoBufError::oom(capacity));
        }
        Ok(Self::from_raw(layout::alloc_full_block(alloc, capacity)?.into_combined()))
    }

    pub(crate) fn create_separate_in(alloc: &AllocRef, capacity: usize) -> Result<Self, IoBufError> {
        let ext = layout::alloc_ext(alloc, capacity)?;
        let node = match layout::alloc_node(alloc) {
            Ok(node) => node,
            Err(err) => {
                // SAFETY: the fresh storage has a single reference, ours.
                unsafe { storage::release(ext.info) };
                return Err(err);
            }
        };
        // SAFETY: the node is fresh and holds no storage.
        unsafe { (*node.as_ptr()).seg.install(ext, 0) };
        Ok(Self::from_raw(node))
    }

    /// Creates a chain with at least `total_capacity` bytes, no node larger
    /// than `max_per_node`.
    pub fn create_chain(total_capacity: usize, max_per_node: usize) -> Result<Self, IoBufError> {
        if max_per_node == 0 && total_capacity > 0 {
            return Err(IoBufError::InvalidConfig {
                message: "max_per_node must be non-zero",
            });
        }
        let mut chain = Self::create(total_capacity.min(max_per_node))?;
        let mut allocated = chain.capacity();
        while allocated < total_capacity {
            let next = Self::create((total_capacity - allocated).min(max_per_node))?;
            allocated += next.capacity();
            chain.append_to_chain(next);
        }
        Ok(chain)
    }

    /// The capacity [`create`](IoBuf::create) would actually hand out for a
    /// request of `min_capacity` bytes. Never less than `min_capacity`.
    pub fn good_size(min_capacity: usize, combined: CombinedOption) -> Result<usize, IoBufError> {
        Self::good_size_with(min_capacity, combined, &BufConfig::default())
    }

    /// [`good_size`](IoBuf::good_size) under `config`.
    pub fn good_size_with(
        min_capacity: usize,
        combined: CombinedOption,
        config: &BufConfig,
    ) -> Result<usize, IoBufError> {
        if min_capacity > MAX_BUFFER_SIZE {
            return Err(IoBufError::oom(min_capacity));
        }
        let alloc = config.alloc_ref().get();
        let use_combined = match combined {
            CombinedOption::Default => min_capacity <= config.combined_threshold(),
            CombinedOption::Combined => true,
            CombinedOption::Separate => false,
        };
        if use_combined {
            let overhead = layout::combined_overhead();
            let total = min_capacity + overhead;
            Ok(alloc.good_size(total).max(total) - overhead)
        } else {
            let total = layout::good_ext_size(config.alloc_ref(), min_capacity)?;
            Ok(total - layout::ext_overhead())
        }
    }

    /// Copies `data` into a new buffer with `headroom` bytes in front and at
    /// least `min_tailroom` bytes behind.
    pub fn copy_buffer(data: &[u8], headroom: usize, min_tailroom: usize) -> Result<Self, IoBufError> {
        let capacity = data
            .len()
            .checked_add(headroom)
            .and_then(|n| n.checked_add(min_tailroom))
            .ok_or(IoBufError::oom(usize::MAX))?;
        let mut buf = Self::create_separate(capacity)?;
        buf.advance(headroom)?;
        buf.extend_from_slice(data)?;
        Ok(buf)
    }

    /// Copies `data` into a new buffer with no headroom.
    pub fn copy_from_slice(data: &[u8]) -> Result<Self, IoBufError> {
        Self::copy_buffer(data, 0, 0)
    }

    /// Views static memory without copying. The result is never writable;
    /// [`unshare`](IoBuf::unshare) copies it into owned storage.
    pub fn wrap_static(data: &'static [u8]) -> Self {
        // SAFETY: static data outlives every clone.
        unsafe { Self::wrap_buffer(data) }
    }

    /// Views caller memory without copying or taking ownership.
    ///
    /// # Safety
    ///
    /// `data` must stay valid and unmodified for as long as this buffer or
    /// any clone of it views it.
    pub unsafe fn wrap_buffer(data: &[u8]) -> Self {
        let mut buf = Self::new();
        buf.seg_mut_raw().wrap(NonNull::from(data).cast(), data.len());
        buf
    }

    /// Adopts caller memory without copying. `free` runs exactly once, with
    /// `ptr` and `capacity`, when the last reference drops.
    ///
    /// When construction fails and `free_on_error` is set, `free` runs
    /// before the error is returned; otherwise the caller keeps ownership.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads and writes of `capacity` initialized
    /// bytes until `free` runs, and nothing else may access that memory
    /// meanwhile.
    ///
    /// # Errors
    ///
    /// [`IoBufError::OutOfMemory`] when `capacity` exceeds
    /// [`MAX_BUFFER_SIZE`] or the metadata cannot be allocated;
    /// [`IoBufError::OutOfBounds`] when `offset + length > capacity`.
    pub unsafe fn take_ownership<F>(
        ptr: NonNull<u8>,
        capacity: usize,
        offset: usize,
        length: usize,
        free: F,
        free_on_error: bool,
    ) -> Result<Self, IoBufError>
    where
        F: FnOnce(NonNull<u8>, usize) + Send + Sync + 'static,
    {
        let release = Release::Custom {
            free: Box::new(free),
            size: capacity,
        };
        Self::adopt(&AllocRef::System, ptr, capacity, offset, length, release, free_on_error)
    }

    /// Adopts caller memory the engine never releases. Unlike
    /// [`wrap_buffer`](IoBuf::wrap_buffer), the storage is reference counted
    /// and writable while unshared.
    ///
    /// # Safety
    ///
    /// As for [`take_ownership`](IoBuf::take_ownership), for as long as any
    /// clone lives.
    pub unsafe fn take_ownership_unmanaged(
        ptr: NonNull<u8>,
        capacity: usize,
        offset: usize,
        length: usize,
    ) -> Result<Self, IoBufError> {
        Self::adopt(&AllocRef::System, ptr, capacity, offset, length, Release::Unmanaged, false)
    }

    pub(crate) fn adopt(
        alloc: &AllocRef,
        region: NonNull<u8>,
        capacity: usize,
        offset: usize,
        length: usize,
        release: Release,
        release_on_error: bool,
    ) -> Result<Self, IoBufError> {
        let rollback = Rollback::new(region, release, release_on_error);
        if capacity > MAX_BUFFER_SIZE {
            return Err(IoBufError::oom(capacity));
        }
        IoBufError::check_bounds("take_ownership", offset.saturating_add(length), capacity)?;
        let block = layout::alloc_full_block(alloc, 0)?;
        let release = rollback.dismiss();
        // SAFETY: bounds were checked; validity is the caller's contract.
        let node = unsafe { block.into_adopting(region, capacity, offset, length, release) };
        Ok(Self::from_raw(node))
    }

    /// Moves the chain out, leaving an empty buffer behind.
    pub fn take(&mut self) -> Self {
        std::mem::take(self)
    }

    /// Shallow clone of the head node only: the result views the same
    /// region and shares its storage.
    pub fn try_clone_one(&self) -> Result<Self, IoBufError> {
        let node = layout::alloc_node(&AllocRef::System)?;
        let seg = self.head_node().seg.share();
        // SAFETY: fresh node with an empty segment.
        unsafe { (*node.as_ptr()).seg = seg };
        Ok(Self::from_raw(node))
    }

    /// [`try_clone_one`](IoBuf::try_clone_one), aborting on allocation failure.
    pub fn clone_one(&self) -> Self {
        match self.try_clone_one() {
            Ok(buf) => buf,
            Err(_) => handle_alloc_error(layout::node_layout()),
        }
    }

    /// Shallow clone of the whole chain.
    pub fn try_clone(&self) -> Result<Self, IoBufError> {
        let mut out = self.try_clone_one()?;
        for seg in self.segments().skip(1) {
            let node = layout::alloc_node(&AllocRef::System)?;
            // SAFETY: fresh node with an empty segment.
            unsafe { (*node.as_ptr()).seg = seg.share() };
            out.append_to_chain(Self::from_raw(node));
        }
        Ok(out)
    }

    /// Hands the head's tailroom to a new, empty buffer.
    ///
    /// The returned buffer is unshared and writable over exactly the bytes
    /// that were the head's tailroom; the head gives them up as if by
    /// [`trim_writable_tail`](Segment::trim_writable_tail). The new buffer
    /// keeps the head's storage alive, so the head reports itself shared
    /// until it is dropped.
    ///
    /// Returns `Ok(None)` when the head's storage is shared or the head has
    /// no storage.
    ///
    /// # Errors
    ///
    /// [`IoBufError::OutOfMemory`] when a node cannot be allocated; the head
    /// is left untouched.
    pub fn split_tail(&mut self) -> Result<Option<IoBuf>, IoBufError> {
        if self.is_shared_one() || self.info().is_none() {
            return Ok(None);
        }
        let size = self.tailroom();
        // SAFETY: headroom + length <= capacity, so this stays in the region.
        let tail = unsafe { self.region_ptr().add(self.headroom() + self.length()) };
        let keeper = self.try_clone_one()?;
        // SAFETY: the tailroom is initialized, exclusively ours and about to
        // be trimmed from the head; `keeper` holds the storage until `free`.
        let split = unsafe {
            IoBuf::take_ownership(tail, size, 0, 0, move |_, _| drop(keeper), true)?
        };
        self.trim_writable_tail(size)?;
        tracing::trace!(size, "split tailroom into its own buffer");
        Ok(Some(split))
    }

    fn seg_mut_raw(&mut self) -> &mut Segment {
        // SAFETY: the head is live and exclusively borrowed.
        unsafe { &mut (*self.head.as_ptr()).seg }
    }
}

impl Default for IoBuf {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for IoBuf {
    fn clone(&self) -> Self {
        match self.try_clone() {
            Ok(buf) => buf,
            Err(_) => handle_alloc_error(layout::node_layout()),
        }
    }
}

impl Drop for IoBuf {
    fn drop(&mut self) {
        let head = self.head;
        // SAFETY: every node of the chain is owned by this handle and freed once.
        unsafe {
            let mut cur = (*head.as_ptr()).next;
            while cur != head {
                let next = (*cur.as_ptr()).next;
                destroy_node(cur);
                cur = next;
            }
            destroy_node(head);
        }
    }
}

impl Deref for IoBuf {
    type Target = Segment;

    fn deref(&self) -> &Segment {
        &self.head_node().seg
    }
}

impl DerefMut for IoBuf {
    fn deref_mut(&mut self) -> &mut Segment {
        self.seg_mut_raw()
    }
}

impl fmt::Debug for IoBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IoBuf")
            .field("segments", &self.count_chain_elements())
            .field("length", &self.compute_chain_data_length())
            .field("head", &**self)
            .finish()
    }
}
