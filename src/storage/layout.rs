//! Manual block layouts.
//!
//! All raw layout arithmetic of the crate lives here:
//!
//! - node block: `[prefix | node]`
//! - combined block: `[prefix | node | metadata | data ...]`
//! - data block with embedded metadata: `[data ... | metadata]`
//!
//! Node and combined blocks start with a [`HeapPrefix`] whose count tracks
//! the node and, for combined blocks, the metadata stored next to it. The
//! block is freed when both are gone.

use std::alloc::Layout;
use std::mem::{align_of, offset_of, size_of};
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicU8, Ordering};

use crate::alloc::{AllocRef, MAX_BUFFER_SIZE};
use crate::buf::{Node, Segment};
use crate::error::IoBufError;

use super::{Placement, Release, SharedInfo, StorageObserver};

const HEAP_MAGIC: u16 = 0xa5a5;

#[repr(C)]
struct HeapPrefix {
    magic: u16,
    refcount: AtomicU8,
    size: usize,
    alloc: AllocRef,
}

#[repr(C)]
struct NodeBlock {
    prefix: HeapPrefix,
    node: Node,
}

#[repr(C)]
struct CombinedBlock {
    prefix: HeapPrefix,
    node: Node,
    shared: SharedInfo,
}

const NODE_OFFSET: usize = offset_of!(NodeBlock, node);
const INFO_OFFSET: usize = offset_of!(CombinedBlock, shared);
const _: () = assert!(offset_of!(CombinedBlock, node) == NODE_OFFSET);

const BLOCK_ALIGN: usize = if align_of::<CombinedBlock>() > align_of::<NodeBlock>() {
    align_of::<CombinedBlock>()
} else {
    align_of::<NodeBlock>()
};

const NODE_LAYOUT: Layout = match Layout::from_size_align(size_of::<NodeBlock>(), BLOCK_ALIGN) {
    Ok(layout) => layout,
    Err(_) => panic!("node block layout"),
};

const INFO_SIZE: usize = size_of::<SharedInfo>();
const INFO_ALIGN: usize = align_of::<SharedInfo>();

/// Layout of a plain node block; reported to the OOM handler by
/// infallible constructors.
pub(crate) const fn node_layout() -> Layout {
    NODE_LAYOUT
}

/// Bytes a combined block spends before its data.
pub(crate) const fn combined_overhead() -> usize {
    size_of::<CombinedBlock>()
}

/// Worst-case bytes an embedded-metadata data block spends past its data.
pub(crate) const fn ext_overhead() -> usize {
    INFO_SIZE + INFO_ALIGN - 1
}

/// Whether a data block of `block_size` bytes has room for `capacity` bytes
/// plus embedded metadata.
pub(crate) const fn embedded_fits(block_size: usize, capacity: usize) -> bool {
    block_size >= capacity.next_multiple_of(8) + INFO_SIZE
}

pub(crate) fn data_layout(size: usize) -> Result<Layout, IoBufError> {
    Layout::from_size_align(size, 1).map_err(|_| IoBufError::oom(size))
}

/// # Safety
///
/// `size` must not exceed `isize::MAX`.
pub(crate) const unsafe fn data_layout_unchecked(size: usize) -> Layout {
    // SAFETY: alignment 1 is a power of two; size bound is the caller's.
    unsafe { Layout::from_size_align_unchecked(size, 1) }
}

impl HeapPrefix {
    fn new(refcount: u8, size: usize, alloc: AllocRef) -> Self {
        Self {
            magic: HEAP_MAGIC,
            refcount: AtomicU8::new(refcount),
            size,
            alloc,
        }
    }
}

/// Allocates a node block holding an empty, self-linked node.
pub(crate) fn alloc_node(alloc: &AllocRef) -> Result<NonNull<Node>, IoBufError> {
    let block = alloc.allocate(NODE_LAYOUT)?.cast::<NodeBlock>().as_ptr();
    // SAFETY: `block` is a fresh allocation with NodeBlock's size and alignment.
    unsafe {
        ptr::write(
            &raw mut (*block).prefix,
            HeapPrefix::new(1, NODE_LAYOUT.size(), alloc.clone()),
        );
        Ok(Node::init_at(&raw mut (*block).node, Segment::empty()))
    }
}

/// A combined block whose prefix is initialized; the node and metadata are
/// written by one of the `into_*` methods.
pub(crate) struct FullBlock {
    block: NonNull<CombinedBlock>,
    trailing: usize,
}

/// Allocates a combined block with at least `trailing` bytes of data after
/// the metadata. The data area is zero-filled.
pub(crate) fn alloc_full_block(alloc: &AllocRef, trailing: usize) -> Result<FullBlock, IoBufError> {
    let header = size_of::<CombinedBlock>();
    let min = header
        .checked_add(trailing)
        .filter(|&n| n <= MAX_BUFFER_SIZE)
        .ok_or(IoBufError::oom(trailing))?;
    let size = if trailing == 0 {
        min
    } else {
        alloc.get().good_size(min).max(min)
    };
    let layout = Layout::from_size_align(size, BLOCK_ALIGN).map_err(|_| IoBufError::oom(size))?;
    let block = alloc.allocate_zeroed(layout)?.cast::<CombinedBlock>();
    // SAFETY: fresh allocation with CombinedBlock's alignment and at least its size.
    unsafe {
        ptr::write(
            &raw mut (*block.as_ptr()).prefix,
            HeapPrefix::new(2, size, alloc.clone()),
        )
    };
    Ok(FullBlock {
        block,
        trailing: size - header,
    })
}

impl FullBlock {
    /// Node whose storage is the data area trailing the block.
    pub(crate) fn into_combined(self) -> NonNull<Node> {
        let block = self.block.as_ptr();
        // SAFETY: the node and metadata slots are uninitialized parts of the
        // block; the data area starts right after the header.
        unsafe {
            let data = NonNull::new_unchecked(block.cast::<u8>().add(size_of::<CombinedBlock>()));
            let info = &raw mut (*block).shared;
            ptr::write(
                info,
                SharedInfo::new(Placement::NodeBlock, data, Release::Inline, Vec::new()),
            );
            let seg = Segment::with_storage(data, self.trailing, 0, 0, NonNull::new_unchecked(info));
            Node::init_at(&raw mut (*block).node, seg)
        }
    }

    /// Node viewing a caller region released according to `release`.
    ///
    /// # Safety
    ///
    /// `region` must be valid for `capacity` bytes until `release` runs and
    /// `offset + length <= capacity`.
    pub(crate) unsafe fn into_adopting(
        self,
        region: NonNull<u8>,
        capacity: usize,
        offset: usize,
        length: usize,
        release: Release,
    ) -> NonNull<Node> {
        let block = self.block.as_ptr();
        // SAFETY: the node and metadata slots are uninitialized parts of the block.
        unsafe {
            let info = &raw mut (*block).shared;
            ptr::write(
                info,
                SharedInfo::new(Placement::NodeBlock, region, release, Vec::new()),
            );
            let seg = Segment::with_storage(region, capacity, offset, length, NonNull::new_unchecked(info));
            Node::init_at(&raw mut (*block).node, seg)
        }
    }
}

/// Drops the node's claim on its block.
///
/// # Safety
///
/// `node` must have been produced by this module, its segment must hold no
/// storage reference, and it must not be used afterwards.
pub(crate) unsafe fn free_node(node: NonNull<Node>) {
    // SAFETY: every node sits at NODE_OFFSET inside a block with a prefix.
    unsafe { release_block(node.as_ptr().byte_sub(NODE_OFFSET).cast()) }
}

/// Drops the metadata's claim on its combined block.
///
/// # Safety
///
/// `info` must be metadata placed in a combined block that has been moved
/// out and is not used afterwards.
pub(crate) unsafe fn release_info_block(info: NonNull<SharedInfo>) {
    // SAFETY: combined-block metadata sits at INFO_OFFSET.
    unsafe { release_block(info.as_ptr().byte_sub(INFO_OFFSET).cast()) }
}

unsafe fn release_block(prefix: *mut HeapPrefix) {
    // SAFETY: caller guarantees `prefix` heads a live block.
    let head = unsafe { &*prefix };
    if head.magic != HEAP_MAGIC {
        tracing::error!(magic = head.magic, "heap block sentinel mismatch, storage is corrupted");
        std::process::abort();
    }
    if head.refcount.load(Ordering::Acquire) != 1
        && head.refcount.fetch_sub(1, Ordering::AcqRel) != 1
    {
        return;
    }
    let size = head.size;
    // SAFETY: last claim on the block; the allocator handle is moved out
    // before the memory goes away.
    unsafe {
        let alloc = ptr::read(&raw const (*prefix).alloc);
        (&raw mut (*prefix).magic).write(0);
        alloc.deallocate(
            NonNull::new_unchecked(prefix.cast()),
            Layout::from_size_align_unchecked(size, BLOCK_ALIGN),
        );
    }
}

/// A data block with its metadata embedded past the data.
pub(crate) struct ExtBuffer {
    pub(crate) buf: NonNull<u8>,
    pub(crate) capacity: usize,
    pub(crate) info: NonNull<SharedInfo>,
}

/// Block size needed for `min_capacity` data bytes plus embedded metadata.
pub(crate) fn good_ext_size(alloc: &AllocRef, min_capacity: usize) -> Result<usize, IoBufError> {
    if min_capacity > MAX_BUFFER_SIZE {
        return Err(IoBufError::oom(min_capacity));
    }
    let min = min_capacity + ext_overhead();
    Ok(alloc.get().good_size(min).max(min))
}

/// Allocates a zero-filled data block with at least `min_capacity` bytes of
/// data and embedded metadata (refcount 1).
pub(crate) fn alloc_ext(alloc: &AllocRef, min_capacity: usize) -> Result<ExtBuffer, IoBufError> {
    let size = good_ext_size(alloc, min_capacity)?;
    let buf = alloc.allocate_zeroed(data_layout(size)?)?;
    // SAFETY: `buf` is a fresh block of `size` bytes from `alloc`.
    Ok(unsafe { init_ext(buf, size, alloc.clone(), Vec::new()) })
}

/// Writes metadata into the tail of a data block.
///
/// # Safety
///
/// `buf` must be a block of `size >= ext_overhead()` bytes allocated by
/// `alloc` with alignment 1, with no live metadata in its tail.
pub(crate) unsafe fn init_ext(
    buf: NonNull<u8>,
    size: usize,
    alloc: AllocRef,
    observers: Vec<Box<dyn StorageObserver>>,
) -> ExtBuffer {
    let base = buf.as_ptr().addr();
    let slot = (base + size - INFO_SIZE) & !(INFO_ALIGN - 1);
    let capacity = slot - base;
    // SAFETY: `slot` lies inside the block with INFO_SIZE bytes after it.
    unsafe {
        let info = buf.as_ptr().add(capacity).cast::<SharedInfo>();
        ptr::write(
            info,
            SharedInfo::new(
                Placement::DataBlock,
                buf,
                Release::Allocator { alloc, size },
                observers,
            ),
        );
        ExtBuffer {
            buf,
            capacity,
            info: NonNull::new_unchecked(info),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{self, StorageKind};

    #[test]
    fn test_ext_placement() {
        let alloc = AllocRef::System;
        for requested in [0, 1, 7, 100, 4096] {
            let ext = alloc_ext(&alloc, requested).unwrap();
            assert!(ext.capacity >= requested);
            assert_eq!(ext.info.as_ptr().addr() % INFO_ALIGN, 0);

            let info = unsafe { ext.info.as_ref() };
            assert_eq!(info.kind(), StorageKind::Embedded);
            let (_, size) = info.allocator_block().unwrap();
            assert!(ext.capacity + INFO_SIZE <= size);

            unsafe { storage::release(ext.info) };
        }
    }

    #[test]
    fn test_ext_refuses_oversized() {
        assert!(matches!(
            alloc_ext(&AllocRef::System, MAX_BUFFER_SIZE + 1),
            Err(IoBufError::OutOfMemory { .. })
        ));
    }

    #[test]
    fn test_combined_block() {
        let block = alloc_full_block(&AllocRef::System, 100).unwrap();
        let node = block.into_combined();
        let seg = unsafe { &node.as_ref().seg };
        assert!(seg.capacity() >= 100);
        assert_eq!(seg.storage_kind(), StorageKind::Combined);
        assert!(seg.buffer().iter().all(|&b| b == 0));

        unsafe {
            (*node.as_ptr()).seg.release_storage();
            free_node(node);
        }
    }

    #[test]
    fn test_node_block() {
        let node = alloc_node(&AllocRef::System).unwrap();
        let n = unsafe { node.as_ref() };
        assert_eq!(n.next, node);
        assert_eq!(n.prev, node);
        assert_eq!(n.seg.capacity(), 0);
        unsafe { free_node(node) };
    }

    #[test]
    fn test_embedded_fits() {
        assert!(embedded_fits(4096, 1000));
        assert!(!embedded_fits(1024, 1024));
    }
}
