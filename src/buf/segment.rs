//! Per-node view: headroom, data and tailroom over a region.

use std::fmt;
use std::ptr::{self, NonNull};
use std::slice;

use crate::alloc::AllocRef;
use crate::error::IoBufError;
use crate::storage::layout::{self, ExtBuffer};
use crate::storage::{self, SharedInfo, StorageKind, StorageObserver};

/// One node's view of its region.
///
/// ```text
/// buffer(): |<-------------------- capacity --------------------->|
///           | headroom |<----- data (length) ----->| tailroom  |
/// ```
///
/// Reading is always allowed. Writing requires the storage to be unshared;
/// the writable accessors panic otherwise. Call
/// [`unshare_one`](Segment::unshare_one) first when in doubt.
///
/// Segments only exist inside an [`IoBuf`](crate::IoBuf) chain.
pub struct Segment {
    buf: NonNull<u8>,
    capacity: usize,
    offset: usize,
    length: usize,
    shared: Option<NonNull<SharedInfo>>,
}

// SAFETY: a segment is plain view data plus a pointer to atomically counted
// storage; see the `IoBuf` impls.
unsafe impl Send for Segment {}
// SAFETY: as above.
unsafe impl Sync for Segment {}

impl Segment {
    pub(crate) const fn empty() -> Self {
        Self {
            buf: NonNull::dangling(),
            capacity: 0,
            offset: 0,
            length: 0,
            shared: None,
        }
    }

    pub(crate) fn with_storage(
        buf: NonNull<u8>,
        capacity: usize,
        offset: usize,
        length: usize,
        info: NonNull<SharedInfo>,
    ) -> Self {
        Self {
            buf,
            capacity,
            offset,
            length,
            shared: Some(info),
        }
    }

    /// Turns an empty segment into a view of unowned memory.
    pub(crate) fn wrap(&mut self, buf: NonNull<u8>, len: usize) {
        debug_assert!(self.shared.is_none());
        self.buf = buf;
        self.capacity = len;
        self.offset = 0;
        self.length = len;
    }

    /// A copy of this view holding its own storage reference.
    pub(crate) fn share(&self) -> Self {
        if let Some(info) = self.shared {
            // SAFETY: our reference keeps the metadata alive.
            unsafe { info.as_ref() }.increment();
        }
        Self { ..*self }
    }

    /// Drops the storage reference, leaving the view fields in place.
    pub(crate) fn release_storage(&mut self) {
        if let Some(info) = self.shared.take() {
            // SAFETY: the reference was ours and is no longer reachable.
            unsafe { storage::release(info) };
        }
    }

    /// Forgets the storage reference without releasing it; used once the
    /// metadata has been detached from the region.
    pub(crate) fn take_storage(&mut self) -> Option<NonNull<SharedInfo>> {
        self.shared.take()
    }

    /// Points the segment at fresh storage. The old storage must already be
    /// released; the data length is kept.
    pub(crate) fn install(&mut self, ext: ExtBuffer, offset: usize) {
        debug_assert!(self.shared.is_none());
        self.buf = ext.buf;
        self.capacity = ext.capacity;
        self.offset = offset;
        self.shared = Some(ext.info);
    }

    /// Resets to the canonical empty state without touching storage.
    pub(crate) fn reset(&mut self) {
        debug_assert!(self.shared.is_none());
        *self = Self::empty();
    }

    pub(crate) fn info(&self) -> Option<&SharedInfo> {
        // SAFETY: our reference keeps the metadata alive.
        self.shared.map(|info| unsafe { &*info.as_ptr() })
    }

    pub(crate) fn info_ptr(&self) -> Option<NonNull<SharedInfo>> {
        self.shared
    }

    pub(crate) fn region_ptr(&self) -> NonNull<u8> {
        self.buf
    }

    pub(crate) fn set_length(&mut self, length: usize) {
        debug_assert!(self.offset + length <= self.capacity);
        self.length = length;
    }

    pub(crate) fn set_offset(&mut self, offset: usize) {
        debug_assert!(offset + self.length <= self.capacity);
        self.offset = offset;
    }

    /// Allocator replacement storage should come from: the region's own
    /// allocator when it has one, the system allocator otherwise.
    pub(crate) fn alloc_ref(&self) -> AllocRef {
        self.info()
            .and_then(|info| info.allocator_block())
            .map_or(AllocRef::System, |(alloc, _)| alloc.clone())
    }

    pub(crate) fn data_ptr(&self) -> *mut u8 {
        // SAFETY: offset <= capacity, so the result stays within the region.
        unsafe { self.buf.as_ptr().add(self.offset) }
    }

    /// Total bytes of the region.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes of data.
    pub fn length(&self) -> usize {
        self.length
    }

    /// Bytes before the data.
    pub fn headroom(&self) -> usize {
        self.offset
    }

    /// Bytes after the data.
    pub fn tailroom(&self) -> usize {
        self.capacity - self.offset - self.length
    }

    /// The data bytes.
    pub fn data(&self) -> &[u8] {
        // SAFETY: [offset, offset + length) is initialized region memory.
        unsafe { slice::from_raw_parts(self.data_ptr(), self.length) }
    }

    /// The whole region, headroom and tailroom included.
    pub fn buffer(&self) -> &[u8] {
        // SAFETY: the region is fully initialized.
        unsafe { slice::from_raw_parts(self.buf.as_ptr(), self.capacity) }
    }

    /// The data bytes, writable.
    ///
    /// # Panics
    ///
    /// Panics if the storage is shared.
    pub fn writable_data(&mut self) -> &mut [u8] {
        self.assert_writable("writable_data");
        // SAFETY: the storage is exclusively ours and the range is initialized.
        unsafe { slice::from_raw_parts_mut(self.data_ptr(), self.length) }
    }

    /// The tailroom, writable. Follow with [`append`](Segment::append) to
    /// take written bytes into the data.
    ///
    /// # Panics
    ///
    /// Panics if the storage is shared.
    pub fn writable_tail(&mut self) -> &mut [u8] {
        self.assert_writable("writable_tail");
        let tailroom = self.tailroom();
        // SAFETY: the storage is exclusively ours and the range is initialized.
        unsafe { slice::from_raw_parts_mut(self.data_ptr().add(self.length), tailroom) }
    }

    /// The headroom, writable. Follow with [`prepend`](Segment::prepend).
    ///
    /// # Panics
    ///
    /// Panics if the storage is shared.
    pub fn writable_head(&mut self) -> &mut [u8] {
        self.assert_writable("writable_head");
        // SAFETY: the storage is exclusively ours and the range is initialized.
        unsafe { slice::from_raw_parts_mut(self.buf.as_ptr(), self.offset) }
    }

    /// The whole region, writable.
    ///
    /// # Panics
    ///
    /// Panics if the storage is shared.
    pub fn writable_buffer(&mut self) -> &mut [u8] {
        self.assert_writable("writable_buffer");
        // SAFETY: the storage is exclusively ours and the region is initialized.
        unsafe { slice::from_raw_parts_mut(self.buf.as_ptr(), self.capacity) }
    }

    /// Copies `src` into the tailroom and appends it to the data.
    ///
    /// Never grows the region; see [`reserve`](Segment::reserve).
    ///
    /// # Errors
    ///
    /// [`IoBufError::OutOfBounds`] when the tailroom is too small.
    ///
    /// # Panics
    ///
    /// Panics if the storage is shared.
    pub fn extend_from_slice(&mut self, src: &[u8]) -> Result<(), IoBufError> {
        IoBufError::check_bounds("extend_from_slice", src.len(), self.tailroom())?;
        self.writable_tail()[..src.len()].copy_from_slice(src);
        self.length += src.len();
        Ok(())
    }

    /// Shifts the data `n` bytes toward the end, growing headroom.
    ///
    /// # Panics
    ///
    /// Panics if data must be moved and the storage is shared.
    pub fn advance(&mut self, n: usize) -> Result<(), IoBufError> {
        IoBufError::check_bounds("advance", n, self.tailroom())?;
        if self.length > 0 && n > 0 {
            self.assert_writable("advance");
            // SAFETY: both ranges lie in the exclusively owned region.
            unsafe { ptr::copy(self.data_ptr(), self.data_ptr().add(n), self.length) };
        }
        self.offset += n;
        Ok(())
    }

    /// Shifts the data `n` bytes toward the start, growing tailroom.
    ///
    /// # Panics
    ///
    /// Panics if data must be moved and the storage is shared.
    pub fn retreat(&mut self, n: usize) -> Result<(), IoBufError> {
        IoBufError::check_bounds("retreat", n, self.headroom())?;
        if self.length > 0 && n > 0 {
            self.assert_writable("retreat");
            // SAFETY: both ranges lie in the exclusively owned region.
            unsafe { ptr::copy(self.data_ptr(), self.data_ptr().sub(n), self.length) };
        }
        self.offset -= n;
        Ok(())
    }

    /// Extends the data `n` bytes into the headroom.
    pub fn prepend(&mut self, n: usize) -> Result<(), IoBufError> {
        IoBufError::check_bounds("prepend", n, self.headroom())?;
        self.offset -= n;
        self.length += n;
        Ok(())
    }

    /// Extends the data `n` bytes into the tailroom.
    pub fn append(&mut self, n: usize) -> Result<(), IoBufError> {
        IoBufError::check_bounds("append", n, self.tailroom())?;
        self.length += n;
        Ok(())
    }

    /// Drops `n` bytes from the front of the data into the headroom.
    pub fn trim_start(&mut self, n: usize) -> Result<(), IoBufError> {
        IoBufError::check_bounds("trim_start", n, self.length)?;
        self.offset += n;
        self.length -= n;
        Ok(())
    }

    /// Drops `n` bytes from the end of the data into the tailroom.
    pub fn trim_end(&mut self, n: usize) -> Result<(), IoBufError> {
        IoBufError::check_bounds("trim_end", n, self.length)?;
        self.length -= n;
        Ok(())
    }

    /// Gives up `n` bytes of tailroom for good.
    pub fn trim_writable_tail(&mut self, n: usize) -> Result<(), IoBufError> {
        IoBufError::check_bounds("trim_writable_tail", n, self.tailroom())?;
        self.capacity -= n;
        Ok(())
    }

    /// Empties the data and moves it to the start of the region.
    pub fn clear(&mut self) {
        self.offset = 0;
        self.length = 0;
    }

    /// Whether another view (or an external party) may read this region.
    ///
    /// Wrapped memory with a non-zero size always counts as shared.
    pub fn is_shared_one(&self) -> bool {
        match self.info() {
            Some(info) => info.is_shared(),
            None => self.capacity != 0,
        }
    }

    /// Number of views of this region. Racy by nature; 1 for unmanaged views.
    pub fn approximate_share_count_one(&self) -> usize {
        self.info().map_or(1, |info| info.refcount() as usize)
    }

    /// Whether the region has reference-counted storage (is not wrapped).
    pub fn is_managed_one(&self) -> bool {
        self.shared.is_some() || self.capacity == 0
    }

    /// Marks the region as visible outside the engine: it stays shared for
    /// the rest of its life and is never written in place.
    pub fn mark_externally_shared_one(&mut self) {
        if let Some(info) = self.info() {
            info.mark_externally_shared();
        }
    }

    /// Where this region's metadata lives and how it is released.
    pub fn storage_kind(&self) -> StorageKind {
        self.info().map_or(StorageKind::None, SharedInfo::kind)
    }

    /// Attaches an observer notified once when the region is freed or
    /// handed off. Returns `false` for views without storage.
    pub fn add_observer<O>(&self, observer: O) -> bool
    where
        O: StorageObserver + 'static,
    {
        match self.info() {
            Some(info) => {
                info.add_observer(Box::new(observer));
                true
            }
            None => false,
        }
    }

    /// Ensures exclusive storage, copying the region if it is shared.
    /// Headroom and data offsets are preserved.
    pub fn unshare_one(&mut self) -> Result<(), IoBufError> {
        if self.is_shared_one() {
            self.unshare_one_slow()?;
        }
        Ok(())
    }

    /// Copies wrapped memory into owned storage; a no-op when managed.
    pub fn make_managed_one(&mut self) -> Result<(), IoBufError> {
        if !self.is_managed_one() {
            self.unshare_one_slow()?;
        }
        Ok(())
    }

    fn unshare_one_slow(&mut self) -> Result<(), IoBufError> {
        let ext = layout::alloc_ext(&self.alloc_ref(), self.capacity)?;
        let headroom = self.headroom();
        // SAFETY: the fresh block holds at least `capacity` bytes.
        unsafe {
            ptr::copy_nonoverlapping(self.data_ptr(), ext.buf.as_ptr().add(headroom), self.length)
        };
        tracing::trace!(capacity = self.capacity, length = self.length, "unsharing segment");
        self.release_storage();
        self.install(ext, headroom);
        Ok(())
    }

    /// Guarantees at least `min_headroom` bytes before and `min_tailroom`
    /// bytes after the data, moving or reallocating the region if needed.
    ///
    /// # Errors
    ///
    /// [`IoBufError::OutOfMemory`] when the new size overflows, exceeds
    /// [`MAX_BUFFER_SIZE`](crate::MAX_BUFFER_SIZE) or cannot be allocated.
    ///
    /// # Panics
    ///
    /// Panics if the storage is shared.
    pub fn reserve(&mut self, min_headroom: usize, min_tailroom: usize) -> Result<(), IoBufError> {
        if self.headroom() >= min_headroom && self.tailroom() >= min_tailroom {
            return Ok(());
        }
        self.reserve_slow(min_headroom, min_tailroom)
    }

    pub(crate) fn assert_writable(&self, op: &str) {
        assert!(
            !self.is_shared_one(),
            "{op} on shared storage; call unshare() first"
        );
    }
}

impl fmt::Debug for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Segment")
            .field("headroom", &self.headroom())
            .field("length", &self.length)
            .field("tailroom", &self.tailroom())
            .field("kind", &self.storage_kind())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::{IoBuf, IoBufError, ReleaseEvent, StorageKind};
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[test]
    fn test_boundary_moves() {
        let mut buf = IoBuf::create(64).unwrap();
        let cap = buf.capacity();

        buf.advance(16).unwrap();
        buf.append(8).unwrap();
        assert_eq!((buf.headroom(), buf.length(), buf.tailroom()), (16, 8, cap - 24));

        buf.prepend(4).unwrap();
        assert_eq!((buf.headroom(), buf.length()), (12, 12));

        buf.trim_start(2).unwrap();
        buf.trim_end(3).unwrap();
        assert_eq!((buf.headroom(), buf.length()), (14, 7));

        buf.clear();
        assert_eq!((buf.headroom(), buf.length(), buf.tailroom()), (0, 0, cap));
    }

    #[test]
    fn test_bounds_errors() {
        let mut buf = IoBuf::create(16).unwrap();
        let cap = buf.capacity();
        assert!(matches!(
            buf.append(cap + 1),
            Err(IoBufError::OutOfBounds { op: "append", .. })
        ));
        assert!(buf.prepend(1).is_err());
        assert!(buf.trim_start(1).is_err());
        assert!(buf.trim_end(1).is_err());
        assert!(buf.retreat(1).is_err());
        assert!(buf.advance(cap + 1).is_err());
        assert!(buf.extend_from_slice(&vec![0; cap + 1]).is_err());

        // failed moves leave the view untouched
        assert_eq!((buf.headroom(), buf.length()), (0, 0));
    }

    #[test]
    fn test_advance_retreat_move_data() {
        let mut buf = IoBuf::create(32).unwrap();
        buf.extend_from_slice(b"abcd").unwrap();
        buf.advance(5).unwrap();
        assert_eq!(buf.headroom(), 5);
        assert_eq!(buf.data(), b"abcd");

        buf.retreat(3).unwrap();
        assert_eq!(buf.headroom(), 2);
        assert_eq!(buf.data(), b"abcd");
    }

    #[test]
    fn test_writable_data() {
        let mut buf = IoBuf::copy_from_slice(b"hello").unwrap();
        buf.writable_data()[0] = b'j';
        assert_eq!(buf.data(), b"jello");
    }

    #[test]
    #[should_panic(expected = "shared storage")]
    fn test_write_through_shared_panics() {
        let mut buf = IoBuf::copy_from_slice(b"hello").unwrap();
        let _copy = buf.clone_one();
        buf.writable_data()[0] = b'j';
    }

    #[test]
    #[should_panic(expected = "shared storage")]
    fn test_write_through_wrapped_panics() {
        let mut buf = IoBuf::wrap_static(b"static");
        buf.writable_data();
    }

    #[test]
    fn test_unshare_one_scenario() {
        let mut a = IoBuf::copy_from_slice(b"abc").unwrap();
        let mut b = a.clone_one();
        assert!(a.is_shared_one() && b.is_shared_one());

        b.unshare_one().unwrap();
        assert!(!a.is_shared_one());
        assert!(!b.is_shared_one());
        assert_eq!(b.data(), b"abc");
        assert_ne!(a.data().as_ptr(), b.data().as_ptr());

        b.writable_data()[0] = b'x';
        assert_eq!(a.data(), b"abc");
        assert_eq!(b.data(), b"xbc");
    }

    #[test]
    fn test_unshare_preserves_headroom() {
        let a = IoBuf::copy_buffer(b"data", 12, 4).unwrap();
        let mut b = a.clone_one();
        b.unshare_one().unwrap();
        assert_eq!(b.headroom(), 12);
        assert!(b.tailroom() >= 4);
        assert_eq!(b.data(), b"data");
    }

    #[test]
    fn test_make_managed() {
        let mut buf = IoBuf::wrap_static(b"wrapped");
        buf.make_managed_one().unwrap();
        assert!(buf.is_managed_one());
        assert!(!buf.is_shared_one());
        assert_eq!(buf.storage_kind(), StorageKind::Embedded);
        assert_eq!(buf.data(), b"wrapped");
    }

    #[test]
    fn test_externally_shared() {
        let mut buf = IoBuf::copy_from_slice(b"x").unwrap();
        buf.mark_externally_shared_one();
        assert!(buf.is_shared_one());
        assert_eq!(buf.approximate_share_count_one(), 1);

        buf.unshare_one().unwrap();
        assert!(!buf.is_shared_one());
    }

    #[test]
    fn test_trim_writable_tail() {
        let mut buf = IoBuf::create(64).unwrap();
        let cap = buf.capacity();
        buf.trim_writable_tail(10).unwrap();
        assert_eq!(buf.capacity(), cap - 10);
        assert_eq!(buf.tailroom(), cap - 10);
    }

    #[test]
    fn test_observer_fires_once_on_free() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let buf = IoBuf::create(4096).unwrap();
        assert!(buf.add_observer(move |event| sink.lock().push(event)));

        let copy = buf.clone_one();
        drop(buf);
        assert!(events.lock().is_empty());
        drop(copy);
        assert_eq!(*events.lock(), vec![ReleaseEvent::Freed]);
    }

    #[test]
    fn test_observer_needs_storage() {
        let buf = IoBuf::wrap_static(b"x");
        assert!(!buf.add_observer(|_| {}));
    }
}
