//! Backing storage shared between buffer nodes.
//!
//! A region of bytes is described by one [`SharedInfo`] record holding the
//! atomic reference count, the externally-shared flag, the observer list and
//! the release discipline. Nodes that view the same region point at the same
//! record; the region is released exactly once, when the count drops from 1.
//!
//! - [`StorageKind`] - public view of where metadata lives and who frees the region
//! - [`StorageObserver`] - lifecycle callbacks attached to a region
//! - [`FreeFn`] - custom release function for adopted memory

pub(crate) mod layout;

use std::mem::{ManuallyDrop, size_of};
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use parking_lot::Mutex;

use crate::alloc::AllocRef;

const MAX_REFCOUNT: u32 = i32::MAX as u32;

/// Release function for adopted memory: receives the region pointer and the
/// capacity it was adopted with. Called exactly once. Must not panic.
pub type FreeFn = Box<dyn FnOnce(NonNull<u8>, usize) + Send + Sync>;

/// How a region left the engine's hands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseEvent {
    /// The region was freed (or handed to its release function).
    Freed,
    /// The region was handed to the caller without being freed, e.g. by
    /// [`IoBuf::into_vec`](crate::IoBuf::into_vec).
    Released,
}

/// Callback attached to a region, fired once when the region is let go.
///
/// Any `FnOnce(ReleaseEvent) + Send` closure is an observer.
pub trait StorageObserver: Send {
    /// Consumes the observer with the event that ended the region's life.
    fn notify(self: Box<Self>, event: ReleaseEvent);
}

impl<F> StorageObserver for F
where
    F: FnOnce(ReleaseEvent) + Send,
{
    fn notify(self: Box<Self>, event: ReleaseEvent) {
        (*self)(event)
    }
}

/// Where a region's metadata lives and how the region is released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageKind {
    /// No backing storage: an empty node or wrapped caller memory.
    None,
    /// Node, metadata and data share one allocation.
    Combined,
    /// Metadata sits past the end of the data inside the data allocation.
    Embedded,
    /// A standalone data allocation released through its allocator.
    Separate,
    /// Caller memory released through a custom release function.
    Custom,
    /// Caller memory the engine never releases.
    Unmanaged,
}

/// How the region is given back once the last reference drops.
///
/// Each variant is its own release discipline; memory adopted with a custom
/// function can never reach the sized allocator path.
pub(crate) enum Release {
    /// Standalone block from `alloc`, released with a sized free.
    Allocator { alloc: AllocRef, size: usize },
    /// Caller memory with its own release function.
    Custom { free: FreeFn, size: usize },
    /// Data trails the metadata inside a combined block.
    Inline,
    /// Caller keeps managing the memory.
    Unmanaged,
}

impl Release {
    /// # Safety
    ///
    /// `region` must be the region this discipline was recorded for, and no
    /// reference to it may outlive this call.
    pub(crate) unsafe fn run(self, region: NonNull<u8>) {
        match self {
            Release::Allocator { alloc, size } => {
                // SAFETY: the region was allocated by `alloc` with this data layout.
                unsafe { alloc.deallocate(region, layout::data_layout_unchecked(size)) }
            }
            Release::Custom { free, size } => free(region, size),
            Release::Inline | Release::Unmanaged => {}
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Placement {
    /// Inside the combined block of the node that created the storage.
    NodeBlock,
    /// At the tail of the data block.
    DataBlock,
}

pub(crate) struct SharedInfo {
    refcount: AtomicU32,
    externally_shared: AtomicBool,
    placement: Placement,
    region: NonNull<u8>,
    release: Release,
    observers: Mutex<Vec<Box<dyn StorageObserver>>>,
}

impl SharedInfo {
    pub(crate) fn new(
        placement: Placement,
        region: NonNull<u8>,
        release: Release,
        observers: Vec<Box<dyn StorageObserver>>,
    ) -> Self {
        Self {
            refcount: AtomicU32::new(1),
            externally_shared: AtomicBool::new(false),
            placement,
            region,
            release,
            observers: Mutex::new(observers),
        }
    }

    pub(crate) fn increment(&self) {
        let previous = self.refcount.fetch_add(1, Ordering::Relaxed);
        if previous > MAX_REFCOUNT {
            tracing::error!(previous, "storage reference count overflow");
            std::process::abort();
        }
    }

    /// Drops one reference. Returns `true` when it was the last one.
    ///
    /// A count observed at 1 cannot be raised by anyone else, so the
    /// read-modify-write is skipped.
    pub(crate) fn decrement(&self) -> bool {
        if self.refcount.load(Ordering::Acquire) == 1 {
            return true;
        }
        self.refcount.fetch_sub(1, Ordering::AcqRel) == 1
    }

    pub(crate) fn refcount(&self) -> u32 {
        self.refcount.load(Ordering::Acquire)
    }

    pub(crate) fn is_shared(&self) -> bool {
        self.externally_shared.load(Ordering::Acquire) || self.refcount() > 1
    }

    pub(crate) fn mark_externally_shared(&self) {
        self.externally_shared.store(true, Ordering::Release);
    }

    pub(crate) fn kind(&self) -> StorageKind {
        match (self.placement, &self.release) {
            (Placement::DataBlock, _) => StorageKind::Embedded,
            (_, Release::Inline) => StorageKind::Combined,
            (_, Release::Allocator { .. }) => StorageKind::Separate,
            (_, Release::Custom { .. }) => StorageKind::Custom,
            (_, Release::Unmanaged) => StorageKind::Unmanaged,
        }
    }

    /// The allocator and block size, when the region is a standalone
    /// allocator block (embedded or separate storage).
    pub(crate) fn allocator_block(&self) -> Option<(&AllocRef, usize)> {
        match &self.release {
            Release::Allocator { alloc, size } => Some((alloc, *size)),
            _ => None,
        }
    }

    pub(crate) fn add_observer(&self, observer: Box<dyn StorageObserver>) {
        self.observers.lock().push(observer);
    }
}

/// Drops one reference to `info`; the last one releases the region, notifies
/// the observers and frees the metadata.
///
/// # Safety
///
/// The caller must own one reference to `info` and must not use it afterwards.
pub(crate) unsafe fn release(info: NonNull<SharedInfo>) {
    // SAFETY: the caller's reference keeps the metadata alive.
    if !unsafe { info.as_ref() }.decrement() {
        return;
    }
    // SAFETY: this was the last reference; the record is moved out and the
    // slot is never read again.
    let SharedInfo {
        placement,
        region,
        release,
        observers,
        ..
    } = unsafe { ptr::read(info.as_ptr()) };

    // SAFETY: no node views the region any more.
    unsafe { release.run(region) };
    for observer in observers.into_inner() {
        observer.notify(ReleaseEvent::Freed);
    }
    if placement == Placement::NodeBlock {
        // SAFETY: the record lived inside a combined block that counts it.
        unsafe { layout::release_info_block(info) };
    }
}

/// Metadata lifted out of its slot while the region it describes is
/// resized or handed off.
#[must_use]
pub(crate) struct Parked(SharedInfo);

/// Metadata permanently detached from a region the caller now owns.
pub(crate) struct Detached {
    pub(crate) release: Release,
    pub(crate) observers: Vec<Box<dyn StorageObserver>>,
}

/// Moves the metadata out of its slot. A slot inside the data block is
/// zero-filled so the region stays fully initialized.
///
/// # Safety
///
/// `info` must be live with a count of 1 and must not be touched until the
/// returned value is restored or retired.
pub(crate) unsafe fn park(info: NonNull<SharedInfo>) -> Parked {
    // SAFETY: exclusive live record per the caller contract.
    let owned = unsafe { ptr::read(info.as_ptr()) };
    if owned.placement == Placement::DataBlock {
        // SAFETY: the slot is `size_of::<SharedInfo>()` writable bytes of the data block.
        unsafe {
            info.as_ptr()
                .cast::<u8>()
                .write_bytes(0, size_of::<SharedInfo>())
        };
    }
    Parked(owned)
}

impl Parked {
    /// Puts the metadata back where it was.
    ///
    /// # Safety
    ///
    /// The slot `info` must still be valid memory of the same block.
    pub(crate) unsafe fn restore(self, info: NonNull<SharedInfo>) {
        // SAFETY: caller contract.
        unsafe { ptr::write(info.as_ptr(), self.0) }
    }

    /// Finishes detaching: the region stays allocated and belongs to the
    /// caller along with its release discipline.
    ///
    /// # Safety
    ///
    /// `info` must be the slot this record was parked from.
    pub(crate) unsafe fn retire(self, info: NonNull<SharedInfo>) -> Detached {
        let SharedInfo {
            placement,
            release,
            observers,
            ..
        } = self.0;
        if placement == Placement::NodeBlock {
            // SAFETY: the record lived inside a combined block that counts it.
            unsafe { layout::release_info_block(info) };
        }
        Detached {
            release,
            observers: observers.into_inner(),
        }
    }
}

/// Releases adopted memory unless construction completes.
///
/// Armed only when the caller asked for release-on-error; a disarmed guard
/// drops the release discipline without running it.
pub(crate) struct Rollback {
    region: NonNull<u8>,
    release: ManuallyDrop<Release>,
    armed: bool,
}

impl Rollback {
    pub(crate) fn new(region: NonNull<u8>, release: Release, armed: bool) -> Self {
        Self {
            region,
            release: ManuallyDrop::new(release),
            armed,
        }
    }

    /// Construction succeeded: hands the release discipline to the storage.
    pub(crate) fn dismiss(self) -> Release {
        let mut this = ManuallyDrop::new(self);
        // SAFETY: `this` is never dropped, so the release is moved out once.
        unsafe { ManuallyDrop::take(&mut this.release) }
    }
}

impl Drop for Rollback {
    fn drop(&mut self) {
        // SAFETY: drop runs once and `dismiss` bypasses it.
        let release = unsafe { ManuallyDrop::take(&mut self.release) };
        if self.armed {
            tracing::debug!("construction failed; releasing adopted region");
            // SAFETY: construction failed, so nothing else views the region.
            unsafe { release.run(self.region) };
        }
    }
}
