//! Allocator boundary.
//!
//! Every block the engine owns (node blocks, combined blocks, data blocks)
//! is obtained through an [`Allocator`]. The default is [`SystemAllocator`],
//! which forwards to the global allocator. A custom allocator is supplied
//! per call through [`BufConfig::with_allocator`](crate::BufConfig::with_allocator).
//!
//! - [`Allocator`] - the capability set the growth policy relies on
//! - [`SystemAllocator`] - the global allocator
//! - [`AllocHooks`] - process-wide accounting callbacks

mod hooks;

pub use hooks::{AllocHooks, clear_alloc_hooks, install_alloc_hooks};
pub(crate) use hooks::{notify_alloc, notify_free};

use std::alloc::Layout;
use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;

use crate::error::IoBufError;

/// Largest region the engine will allocate or adopt: half the address space.
pub const MAX_BUFFER_SIZE: usize = usize::MAX >> 1;

/// Size classes of [`SystemAllocator`].
const SYSTEM_SIZE_CLASS: usize = 16;

/// A memory source for buffer storage.
///
/// Only `allocate` and `deallocate` are required. The remaining methods
/// describe optional capabilities that [`reserve`](crate::Segment::reserve)
/// and [`IoBuf::create`](crate::IoBuf::create) take advantage of when present.
///
/// # Safety
///
/// Implementors must return blocks valid for reads and writes of
/// `layout.size()` bytes at `layout.align()` alignment, and must accept every
/// block they returned back in `deallocate` with the same layout. A block
/// grown by `grow_in_place` or returned by `resize` must be deallocatable
/// with the new size.
pub unsafe trait Allocator: Send + Sync {
    /// Allocates a block. Returns `None` on exhaustion.
    fn allocate(&self, layout: Layout) -> Option<NonNull<u8>>;

    /// Allocates a zero-filled block.
    fn allocate_zeroed(&self, layout: Layout) -> Option<NonNull<u8>> {
        let ptr = self.allocate(layout)?;
        // SAFETY: `allocate` returned a block of `layout.size()` writable bytes.
        unsafe { ptr.as_ptr().write_bytes(0, layout.size()) };
        Some(ptr)
    }

    /// Releases a block previously returned by this allocator.
    ///
    /// # Safety
    ///
    /// `ptr` must come from this allocator and `layout` must be the layout it
    /// is currently allocated with.
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout);

    /// The size a request of `size` bytes is actually served with.
    ///
    /// Must never return less than `size`.
    fn good_size(&self, size: usize) -> usize {
        size
    }

    /// Size-class query: the real size of the block a request of `size`
    /// bytes would receive, if the allocator can answer without allocating.
    fn size_class(&self, _size: usize) -> Option<usize> {
        None
    }

    /// Whether [`grow_in_place`](Allocator::grow_in_place) can ever succeed.
    fn can_grow_in_place(&self) -> bool {
        false
    }

    /// Smallest block for which in-place growth is worth attempting.
    fn min_in_place_expandable(&self) -> usize {
        0
    }

    /// Tries to extend a block to `new_size` bytes without moving it.
    ///
    /// # Safety
    ///
    /// `ptr` must come from this allocator with layout `old`.
    unsafe fn grow_in_place(&self, _ptr: NonNull<u8>, _old: Layout, _new_size: usize) -> bool {
        false
    }

    /// Resizes a block, moving it if needed and preserving its contents up
    /// to the smaller of both sizes. On `None` the original block is intact.
    ///
    /// # Safety
    ///
    /// `ptr` must come from this allocator with layout `old`.
    unsafe fn resize(&self, _ptr: NonNull<u8>, _old: Layout, _new_size: usize) -> Option<NonNull<u8>> {
        None
    }
}

/// The global allocator, with 16-byte size classes and realloc support.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemAllocator;

unsafe impl Allocator for SystemAllocator {
    fn allocate(&self, layout: Layout) -> Option<NonNull<u8>> {
        if layout.size() == 0 {
            return None;
        }
        // SAFETY: the layout has a non-zero size.
        NonNull::new(unsafe { std::alloc::alloc(layout) })
    }

    fn allocate_zeroed(&self, layout: Layout) -> Option<NonNull<u8>> {
        if layout.size() == 0 {
            return None;
        }
        // SAFETY: the layout has a non-zero size.
        NonNull::new(unsafe { std::alloc::alloc_zeroed(layout) })
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        // SAFETY: forwarded caller contract.
        unsafe { std::alloc::dealloc(ptr.as_ptr(), layout) }
    }

    fn good_size(&self, size: usize) -> usize {
        size.checked_next_multiple_of(SYSTEM_SIZE_CLASS)
            .unwrap_or(size)
    }

    unsafe fn resize(&self, ptr: NonNull<u8>, old: Layout, new_size: usize) -> Option<NonNull<u8>> {
        if new_size == 0 || new_size > MAX_BUFFER_SIZE {
            return None;
        }
        // SAFETY: forwarded caller contract; `new_size` is non-zero and fits isize.
        NonNull::new(unsafe { std::alloc::realloc(ptr.as_ptr(), old, new_size) })
    }
}

/// Handle to the allocator a block came from.
///
/// The system variant carries no reference count and is what zero-copy
/// hand-off to `Vec<u8>` checks for.
#[derive(Clone, Default)]
pub(crate) enum AllocRef {
    #[default]
    System,
    Custom(Arc<dyn Allocator>),
}

impl AllocRef {
    pub(crate) fn get(&self) -> &dyn Allocator {
        match self {
            AllocRef::System => &SystemAllocator,
            AllocRef::Custom(alloc) => alloc.as_ref(),
        }
    }

    pub(crate) fn is_system(&self) -> bool {
        matches!(self, AllocRef::System)
    }

    pub(crate) fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, IoBufError> {
        let ptr = self
            .get()
            .allocate(layout)
            .ok_or(IoBufError::oom(layout.size()))?;
        hooks::notify_alloc(ptr.as_ptr(), layout.size());
        Ok(ptr)
    }

    pub(crate) fn allocate_zeroed(&self, layout: Layout) -> Result<NonNull<u8>, IoBufError> {
        let ptr = self
            .get()
            .allocate_zeroed(layout)
            .ok_or(IoBufError::oom(layout.size()))?;
        hooks::notify_alloc(ptr.as_ptr(), layout.size());
        Ok(ptr)
    }

    /// # Safety
    ///
    /// See [`Allocator::deallocate`].
    pub(crate) unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        hooks::notify_free(ptr.as_ptr(), layout.size());
        // SAFETY: forwarded caller contract.
        unsafe { self.get().deallocate(ptr, layout) }
    }

    /// Grows in place and zero-fills the new tail.
    ///
    /// # Safety
    ///
    /// See [`Allocator::grow_in_place`].
    pub(crate) unsafe fn grow_in_place(&self, ptr: NonNull<u8>, old: Layout, new_size: usize) -> bool {
        // SAFETY: forwarded caller contract.
        if !unsafe { self.get().grow_in_place(ptr, old, new_size) } {
            return false;
        }
        // SAFETY: the block now spans `new_size` bytes.
        unsafe {
            ptr.as_ptr()
                .add(old.size())
                .write_bytes(0, new_size - old.size())
        };
        hooks::notify_free(ptr.as_ptr(), old.size());
        hooks::notify_alloc(ptr.as_ptr(), new_size);
        true
    }

    /// Resizes and zero-fills the new tail.
    ///
    /// # Safety
    ///
    /// See [`Allocator::resize`].
    pub(crate) unsafe fn resize(&self, ptr: NonNull<u8>, old: Layout, new_size: usize) -> Option<NonNull<u8>> {
        // SAFETY: forwarded caller contract.
        let moved = unsafe { self.get().resize(ptr, old, new_size) }?;
        if new_size > old.size() {
            // SAFETY: the block now spans `new_size` bytes.
            unsafe {
                moved
                    .as_ptr()
                    .add(old.size())
                    .write_bytes(0, new_size - old.size())
            };
        }
        hooks::notify_free(ptr.as_ptr(), old.size());
        hooks::notify_alloc(moved.as_ptr(), new_size);
        Some(moved)
    }
}

impl fmt::Debug for AllocRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllocRef::System => f.write_str("System"),
            AllocRef::Custom(_) => f.write_str("Custom"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_good_size() {
        let alloc = SystemAllocator;
        assert_eq!(alloc.good_size(1), 16);
        assert_eq!(alloc.good_size(16), 16);
        assert_eq!(alloc.good_size(17), 32);
        assert_eq!(alloc.good_size(usize::MAX), usize::MAX);
    }

    #[test]
    fn test_system_zero_size_is_refused() {
        let layout = Layout::from_size_align(0, 1).unwrap();
        assert!(SystemAllocator.allocate(layout).is_none());
        assert!(SystemAllocator.allocate_zeroed(layout).is_none());
    }

    #[test]
    fn test_resize_zero_fills_tail() {
        let alloc = AllocRef::System;
        let old = Layout::from_size_align(8, 1).unwrap();
        let ptr = alloc.allocate_zeroed(old).unwrap();
        unsafe { ptr.as_ptr().write_bytes(0xAB, 8) };

        let moved = unsafe { alloc.resize(ptr, old, 64) }.unwrap();
        let bytes = unsafe { std::slice::from_raw_parts(moved.as_ptr(), 64) };
        assert!(bytes[..8].iter().all(|&b| b == 0xAB));
        assert!(bytes[8..].iter().all(|&b| b == 0));

        unsafe { alloc.deallocate(moved, Layout::from_size_align(64, 1).unwrap()) };
    }

    #[test]
    fn test_default_capabilities() {
        assert!(!SystemAllocator.can_grow_in_place());
        assert_eq!(SystemAllocator.size_class(100), None);
        assert!(AllocRef::default().is_system());
    }
}
