//! Conversions between chains and std / `bytes` containers.

use std::alloc::handle_alloc_error;
use std::io::{IoSlice, IoSliceMut};
use std::mem::{ManuallyDrop, MaybeUninit};
use std::ptr::NonNull;

use bytes::{Bytes, BytesMut};

use crate::alloc::{AllocRef, notify_alloc, notify_free};
use crate::error::IoBufError;
use crate::storage::layout;
use crate::storage::{self, Release, ReleaseEvent};

use super::IoBuf;

impl IoBuf {
    /// Adopts a vector's allocation without copying. Spare capacity becomes
    /// tailroom.
    pub fn from_vec(vec: Vec<u8>) -> Self {
        if vec.capacity() == 0 {
            return Self::new();
        }
        let mut vec = ManuallyDrop::new(vec);
        vec.spare_capacity_mut().fill(MaybeUninit::new(0));
        let capacity = vec.capacity();
        let length = vec.len();
        // SAFETY: a vector with non-zero capacity has a non-null buffer.
        let region = unsafe { NonNull::new_unchecked(vec.as_mut_ptr()) };
        notify_alloc(region.as_ptr(), capacity);

        // global allocator, alignment 1
        let release = Release::Allocator {
            alloc: AllocRef::System,
            size: capacity,
        };
        match Self::adopt(&AllocRef::System, region, capacity, 0, length, release, true) {
            Ok(buf) => buf,
            Err(_) => handle_alloc_error(layout::node_layout()),
        }
    }

    /// Whether the head region can become a `Vec<u8>` as is.
    fn is_vec_compatible(&self) -> bool {
        !self.is_chained()
            && self.headroom() == 0
            && !self.is_shared_one()
            && self
                .info()
                .and_then(|info| info.allocator_block())
                .is_some_and(|(alloc, _)| alloc.is_system())
    }

    /// Turns the chain into a vector, handing the region over without
    /// copying when it is unshared, unchained, has no headroom and came from
    /// the system allocator. Otherwise the data is coalesced first.
    ///
    /// Observers of a handed-over region see [`ReleaseEvent::Released`].
    pub fn into_vec(mut self) -> Result<Vec<u8>, IoBufError> {
        if self.compute_chain_data_length() == 0 {
            return Ok(Vec::new());
        }
        if !self.is_vec_compatible() {
            let length = self.compute_chain_data_length();
            let head = self.head_ptr();
            self.coalesce_and_reallocate(&AllocRef::System, 0, length, head, 0)?;
        }

        let seg = &mut *self;
        let length = seg.length();
        let region = seg.region_ptr();
        let Some(info) = seg.take_storage() else {
            return Err(IoBufError::oom(length));
        };
        // SAFETY: the storage is exclusively ours, so the count is 1.
        let detached = unsafe { storage::park(info).retire(info) };
        let size = match detached.release {
            Release::Allocator { size, .. } => size,
            _ => unreachable!("vec-compatible storage is an allocator block"),
        };
        seg.reset();
        for observer in detached.observers {
            observer.notify(ReleaseEvent::Released);
        }
        notify_free(region.as_ptr(), size);
        tracing::trace!(length, size, "handing region over to a vector");
        // SAFETY: the region is a global-allocator block of `size` bytes with
        // alignment 1, fully initialized, and no longer referenced.
        Ok(unsafe { Vec::from_raw_parts(region.as_ptr(), length, size) })
    }

    /// [`into_vec`](IoBuf::into_vec), checked as UTF-8.
    ///
    /// # Errors
    ///
    /// [`IoBufError::InvalidUtf8`] when the content is not UTF-8.
    pub fn into_string(self) -> Result<String, IoBufError> {
        String::from_utf8(self.into_vec()?).map_err(|e| IoBufError::InvalidUtf8 {
            valid_up_to: e.utf8_error().valid_up_to(),
        })
    }

    /// [`into_vec`](IoBuf::into_vec) as [`Bytes`].
    pub fn into_bytes(self) -> Result<Bytes, IoBufError> {
        self.into_vec().map(Bytes::from)
    }

    /// One slice per non-empty segment.
    pub fn to_io_slices(&self) -> Vec<IoSlice<'_>> {
        self.segments()
            .filter(|seg| seg.length() > 0)
            .map(|seg| IoSlice::new(seg.data()))
            .collect()
    }

    /// Fills `dst` with one slice per non-empty segment and returns the
    /// number of slices and total bytes, or `None` if `dst` is too short.
    pub fn fill_io_slices<'a>(&'a self, dst: &mut [IoSlice<'a>]) -> Option<(usize, usize)> {
        let mut count = 0;
        let mut total = 0;
        for seg in self.segments().filter(|seg| seg.length() > 0) {
            *dst.get_mut(count)? = IoSlice::new(seg.data());
            count += 1;
            total += seg.length();
        }
        Some((count, total))
    }

    /// A chain of wrapped views, one per non-empty slice.
    ///
    /// # Safety
    ///
    /// As for [`wrap_buffer`](IoBuf::wrap_buffer), for every slice.
    pub unsafe fn wrap_io_slices(slices: &[IoSlice<'_>]) -> Self {
        let mut parts = slices
            .iter()
            .filter(|slice| !slice.is_empty())
            // SAFETY: caller contract.
            .map(|slice| unsafe { Self::wrap_buffer(slice) });
        let Some(mut chain) = parts.next() else {
            return Self::new();
        };
        for part in parts {
            chain.append_to_chain(part);
        }
        chain
    }

    /// A chain viewing static slices, one node per non-empty slice.
    pub fn wrap_static_slices(slices: &[&'static [u8]]) -> Self {
        let mut parts = slices
            .iter()
            .filter(|slice| !slice.is_empty())
            .map(|&slice| Self::wrap_static(slice));
        let Some(mut chain) = parts.next() else {
            return Self::new();
        };
        for part in parts {
            chain.append_to_chain(part);
        }
        chain
    }

    /// Adopts every non-empty slice as one node of a chain; `free` runs
    /// once per region with its pointer and length.
    ///
    /// On failure, regions adopted so far are released through `free` as
    /// the partial chain drops. The failing and remaining regions are
    /// released only when `free_on_error` is set.
    ///
    /// # Safety
    ///
    /// As for [`take_ownership`](IoBuf::take_ownership), for every slice.
    pub unsafe fn take_ownership_io_slices<F>(
        slices: &mut [IoSliceMut<'_>],
        free: F,
        free_on_error: bool,
    ) -> Result<Self, IoBufError>
    where
        F: Fn(NonNull<u8>, usize) + Clone + Send + Sync + 'static,
    {
        let regions: Vec<(NonNull<u8>, usize)> = slices
            .iter_mut()
            .filter(|slice| !slice.is_empty())
            .map(|slice| (NonNull::from(&mut **slice).cast::<u8>(), slice.len()))
            .collect();

        let mut chain: Option<IoBuf> = None;
        for (i, &(region, len)) in regions.iter().enumerate() {
            // SAFETY: caller contract.
            let part = unsafe { Self::take_ownership(region, len, 0, len, free.clone(), free_on_error) };
            match part {
                Ok(part) => match chain.as_mut() {
                    Some(chain) => chain.append_to_chain(part),
                    None => chain = Some(part),
                },
                Err(err) => {
                    if free_on_error {
                        for &(rest, rest_len) in &regions[i + 1..] {
                            free(rest, rest_len);
                        }
                    }
                    return Err(err);
                }
            }
        }
        Ok(chain.unwrap_or_default())
    }
}

impl From<Vec<u8>> for IoBuf {
    fn from(vec: Vec<u8>) -> Self {
        Self::from_vec(vec)
    }
}

impl From<String> for IoBuf {
    fn from(s: String) -> Self {
        Self::from_vec(s.into_bytes())
    }
}

impl From<&'static [u8]> for IoBuf {
    fn from(data: &'static [u8]) -> Self {
        Self::wrap_static(data)
    }
}

impl From<Bytes> for IoBuf {
    /// Adopts the bytes without copying. The region is marked externally
    /// shared, since other `Bytes` handles may view it.
    fn from(bytes: Bytes) -> Self {
        if bytes.is_empty() {
            return Self::new();
        }
        let region = NonNull::from(&*bytes).cast::<u8>();
        let len = bytes.len();
        // SAFETY: `bytes` keeps the region alive until the release runs, and
        // externally shared storage is never written.
        let adopted = unsafe { Self::take_ownership(region, len, 0, len, move |_, _| drop(bytes), true) };
        match adopted {
            Ok(mut buf) => {
                buf.mark_externally_shared_one();
                buf
            }
            Err(_) => handle_alloc_error(layout::node_layout()),
        }
    }
}

impl From<BytesMut> for IoBuf {
    /// Adopts the buffer without copying; spare capacity becomes tailroom.
    fn from(mut bytes: BytesMut) -> Self {
        let capacity = bytes.capacity();
        if capacity == 0 {
            return Self::new();
        }
        let length = bytes.len();
        bytes.resize(capacity, 0);
        bytes.truncate(length);
        // SAFETY: a BytesMut with non-zero capacity has a non-null buffer.
        let region = unsafe { NonNull::new_unchecked(bytes.as_mut_ptr()) };
        // SAFETY: the whole capacity is initialized and uniquely owned by
        // `bytes`, which lives until the release runs.
        let adopted =
            unsafe { Self::take_ownership(region, capacity, 0, length, move |_, _| drop(bytes), true) };
        match adopted {
            Ok(buf) => buf,
            Err(_) => handle_alloc_error(layout::node_layout()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StorageKind;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_from_vec_is_zero_copy() {
        let mut vec = Vec::with_capacity(64);
        vec.extend_from_slice(b"abc");
        let ptr = vec.as_ptr();
        let cap = vec.capacity();

        let buf = IoBuf::from(vec);
        assert_eq!(buf.data().as_ptr(), ptr);
        assert_eq!(buf.data(), b"abc");
        assert_eq!(buf.capacity(), cap);
        assert_eq!(buf.tailroom(), cap - 3);
        assert_eq!(buf.storage_kind(), StorageKind::Separate);
        assert!(!buf.is_shared());
    }

    #[test]
    fn test_from_empty_vec() {
        let buf = IoBuf::from(Vec::new());
        assert_eq!(buf.capacity(), 0);
        assert_eq!(buf.storage_kind(), StorageKind::None);
    }

    #[test]
    fn test_into_vec_hands_over_region() {
        let vec = b"round trip".to_vec();
        let ptr = vec.as_ptr();
        let out = IoBuf::from_vec(vec).into_vec().unwrap();
        assert_eq!(out.as_ptr(), ptr);
        assert_eq!(out, b"round trip");
    }

    #[test]
    fn test_into_vec_from_embedded() {
        let mut buf = IoBuf::create(4096).unwrap();
        buf.extend_from_slice(b"embedded").unwrap();
        let ptr = buf.data().as_ptr();
        let out = buf.into_vec().unwrap();
        assert_eq!(out.as_ptr(), ptr);
        assert_eq!(out, b"embedded");
        assert!(out.capacity() >= 4096);
    }

    #[test]
    fn test_into_vec_copies_when_ineligible() {
        let with_headroom = IoBuf::copy_buffer(b"abc", 4, 0).unwrap();
        assert_eq!(with_headroom.into_vec().unwrap(), b"abc");

        let combined = IoBuf::copy_from_slice(b"xyz").unwrap();
        let shared = combined.clone();
        assert_eq!(combined.into_vec().unwrap(), b"xyz");
        assert_eq!(shared.data(), b"xyz");

        let mut chain = IoBuf::copy_from_slice(b"ab").unwrap();
        chain.append_to_chain(IoBuf::copy_from_slice(b"cd").unwrap());
        assert_eq!(chain.into_vec().unwrap(), b"abcd");
    }

    #[test]
    fn test_into_vec_notifies_released() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let mut buf = IoBuf::create(2048).unwrap();
        buf.extend_from_slice(b"x").unwrap();
        buf.add_observer(move |event| sink.lock().push(event));

        let out = buf.into_vec().unwrap();
        assert_eq!(*events.lock(), vec![ReleaseEvent::Released]);
        drop(out);
        assert_eq!(events.lock().len(), 1);
    }

    #[test]
    fn test_into_string() {
        let buf = IoBuf::from(String::from("héllo"));
        assert_eq!(buf.into_string().unwrap(), "héllo");

        let bad = IoBuf::copy_from_slice(&[b'o', b'k', 0xff]).unwrap();
        assert_eq!(
            bad.into_string(),
            Err(IoBufError::InvalidUtf8 { valid_up_to: 2 })
        );
    }

    #[test]
    fn test_into_bytes() {
        let bytes = IoBuf::copy_from_slice(b"bytes").unwrap().into_bytes().unwrap();
        assert_eq!(&bytes[..], b"bytes");
    }

    #[test]
    fn test_from_bytes_is_externally_shared() {
        let bytes = Bytes::from_static(b"shared view");
        let ptr = bytes.as_ptr();
        let mut buf = IoBuf::from(bytes.clone());
        assert_eq!(buf.data().as_ptr(), ptr);
        assert!(buf.is_shared_one());
        assert_eq!(buf.storage_kind(), StorageKind::Custom);

        buf.unshare_one().unwrap();
        assert_ne!(buf.data().as_ptr(), ptr);
        assert_eq!(buf.data(), &bytes[..]);
    }

    #[test]
    fn test_from_bytes_mut() {
        let mut bytes = BytesMut::with_capacity(32);
        bytes.extend_from_slice(b"mutable");
        let ptr = bytes.as_ptr();
        let mut buf = IoBuf::from(bytes);
        assert_eq!(buf.data().as_ptr(), ptr);
        assert!(buf.tailroom() >= 25);
        assert!(!buf.is_shared_one());
        buf.extend_from_slice(b"!").unwrap();
        assert_eq!(buf.data(), b"mutable!");
    }

    #[test]
    fn test_io_slices_skip_empty() {
        let mut chain = IoBuf::copy_from_slice(b"ab").unwrap();
        chain.append_to_chain(IoBuf::new());
        chain.append_to_chain(IoBuf::copy_from_slice(b"cde").unwrap());

        let slices = chain.to_io_slices();
        assert_eq!(slices.len(), 2);
        assert_eq!(&*slices[1], b"cde");

        let mut dst = [IoSlice::new(&[]); 2];
        assert_eq!(chain.fill_io_slices(&mut dst), Some((2, 5)));
        let mut short = [IoSlice::new(&[]); 1];
        assert_eq!(chain.fill_io_slices(&mut short), None);
    }

    #[test]
    fn test_wrap_static_slices() {
        let chain = IoBuf::wrap_static_slices(&[&b"one"[..], &b""[..], &b"two"[..]]);
        assert_eq!(chain.count_chain_elements(), 2);
        assert_eq!(chain.compute_chain_data_length(), 6);
        assert!(chain.is_shared());

        let empty = IoBuf::wrap_static_slices(&[&b""[..], &b""[..]]);
        assert!(empty.is_empty());
        assert!(!empty.is_chained());
    }

    #[test]
    fn test_wrap_io_slices() {
        let a = b"left".to_vec();
        let b = b"right".to_vec();
        let chain = unsafe { IoBuf::wrap_io_slices(&[IoSlice::new(&a), IoSlice::new(&b)]) };
        assert_eq!(chain.count_chain_elements(), 2);
        assert_eq!(chain.data(), b"left");
        assert!(!chain.is_managed());
    }

    #[test]
    fn test_take_ownership_io_slices() {
        let freed = Arc::new(AtomicUsize::new(0));
        let counter = freed.clone();
        let mut a = vec![1u8; 8];
        let mut b = vec![2u8; 4];
        let mut empty: Vec<u8> = Vec::new();
        {
            let mut slices = [
                IoSliceMut::new(&mut a),
                IoSliceMut::new(&mut empty),
                IoSliceMut::new(&mut b),
            ];
            let chain = unsafe {
                IoBuf::take_ownership_io_slices(
                    &mut slices,
                    move |_, len| {
                        counter.fetch_add(len, Ordering::SeqCst);
                    },
                    true,
                )
            }
            .unwrap();
            assert_eq!(chain.count_chain_elements(), 2);
            assert_eq!(chain.compute_chain_data_length(), 12);
            drop(chain);
        }
        assert_eq!(freed.load(Ordering::SeqCst), 12);
    }
}
