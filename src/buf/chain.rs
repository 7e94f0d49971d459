//! Chain operations.
//!
//! Splicing and unlinking relink pointers in O(1) and never copy bytes.
//! Coalescing and unsharing always copy.

use std::iter::FusedIterator;
use std::marker::PhantomData;
use std::ops::RangeInclusive;
use std::ptr::{self, NonNull};

use crate::alloc::AllocRef;
use crate::error::IoBufError;
use crate::storage::layout;

use super::{IoBuf, Node, Segment};

/// Splices the chain starting at `other` in front of `at`, i.e. after
/// `at`'s predecessor.
///
/// # Safety
///
/// Both must be live heads of disjoint chains.
unsafe fn splice_before(at: NonNull<Node>, other: NonNull<Node>) {
    // SAFETY: caller contract; all four nodes are live.
    unsafe {
        let at_prev = (*at.as_ptr()).prev;
        let other_tail = (*other.as_ptr()).prev;
        (*at_prev.as_ptr()).next = other;
        (*other.as_ptr()).prev = at_prev;
        (*other_tail.as_ptr()).next = at;
        (*at.as_ptr()).prev = other_tail;
    }
}

/// Cuts `first..=last` out of its chain into a chain of its own.
///
/// # Safety
///
/// `first..=last` must be a forward run of one live chain that does not
/// wrap around.
unsafe fn detach_range(first: NonNull<Node>, last: NonNull<Node>) {
    // SAFETY: caller contract.
    unsafe {
        let before = (*first.as_ptr()).prev;
        let after = (*last.as_ptr()).next;
        (*before.as_ptr()).next = after;
        (*after.as_ptr()).prev = before;
        (*last.as_ptr()).next = first;
        (*first.as_ptr()).prev = last;
    }
}

impl IoBuf {
    fn nth_node(&self, index: usize) -> Option<NonNull<Node>> {
        let mut cur = self.head_ptr();
        for _ in 0..index {
            // SAFETY: nodes of our chain are live.
            cur = unsafe { cur.as_ref() }.next;
            if cur == self.head_ptr() {
                return None;
            }
        }
        Some(cur)
    }

    fn tail_ptr(&self) -> NonNull<Node> {
        // SAFETY: the head is live.
        unsafe { self.head_ptr().as_ref() }.prev
    }

    /// Whether the chain has more than one node.
    pub fn is_chained(&self) -> bool {
        self.tail_ptr() != self.head_ptr()
    }

    /// Number of nodes in the chain.
    pub fn count_chain_elements(&self) -> usize {
        self.segments().count()
    }

    /// Total data bytes across the chain.
    pub fn compute_chain_data_length(&self) -> usize {
        self.segments().map(Segment::length).sum()
    }

    /// Total region bytes across the chain.
    pub fn compute_chain_capacity(&self) -> usize {
        self.segments().map(Segment::capacity).sum()
    }

    /// Whether every node of the chain holds zero data bytes.
    pub fn is_empty(&self) -> bool {
        self.segments().all(|seg| seg.length() == 0)
    }

    /// Whether any node of the chain shares its storage.
    pub fn is_shared(&self) -> bool {
        self.segments().any(Segment::is_shared_one)
    }

    /// Whether every node of the chain has reference-counted storage.
    pub fn is_managed(&self) -> bool {
        self.segments().all(Segment::is_managed_one)
    }

    /// Iterates the segments, head first.
    pub fn segments(&self) -> Segments<'_> {
        Segments {
            head: self.head_ptr(),
            next: Some(self.head_ptr()),
            _chain: PhantomData,
        }
    }

    /// Iterates the segments mutably, head first.
    pub fn segments_mut(&mut self) -> SegmentsMut<'_> {
        SegmentsMut {
            head: self.head_ptr(),
            next: Some(self.head_ptr()),
            _chain: PhantomData,
        }
    }

    /// The last segment of the chain (the head when unchained).
    pub fn tail(&self) -> &Segment {
        // SAFETY: the tail is live for the borrow of `self`.
        unsafe { &(*self.tail_ptr().as_ptr()).seg }
    }

    /// The last segment of the chain, mutably.
    pub fn tail_mut(&mut self) -> &mut Segment {
        // SAFETY: the tail is live and exclusively borrowed through `self`.
        unsafe { &mut (*self.tail_ptr().as_ptr()).seg }
    }

    /// Moves `other`'s whole chain to the end of this one. O(1).
    pub fn append_to_chain(&mut self, other: IoBuf) {
        let other = other.into_raw();
        // SAFETY: both heads are live and the chains are disjoint.
        unsafe { splice_before(self.head_ptr(), other) };
    }

    /// Moves `other`'s whole chain to the front of this one. O(1).
    pub fn prepend_chain(&mut self, other: IoBuf) {
        let other = other.into_raw();
        // SAFETY: both heads are live and the chains are disjoint.
        unsafe { splice_before(self.head_ptr(), other) };
        self.head = other;
    }

    /// Detaches everything after the head and returns it; the head stays
    /// as a single node. `None` when unchained.
    pub fn pop(&mut self) -> Option<IoBuf> {
        if !self.is_chained() {
            return None;
        }
        // SAFETY: the head is live.
        let first = unsafe { self.head_ptr().as_ref() }.next;
        let last = self.tail_ptr();
        // SAFETY: first..=last is the chain minus the head.
        unsafe { detach_range(first, last) };
        Some(IoBuf::from_raw(first))
    }

    /// Detaches the node at `index` as a standalone buffer. When the head is
    /// removed, the next node becomes the head. `None` when `index` is out
    /// of range or the chain has a single node.
    pub fn unlink(&mut self, index: usize) -> Option<IoBuf> {
        if !self.is_chained() {
            return None;
        }
        let node = self.nth_node(index)?;
        if index == 0 {
            // SAFETY: the head is live.
            let next = unsafe { node.as_ref() }.next;
            let rest = IoBuf::from_raw(next);
            let head = std::mem::replace(self, rest);
            // SAFETY: a single-node run inside our chain.
            unsafe { detach_range(head.head_ptr(), head.head_ptr()) };
            return Some(head);
        }
        // SAFETY: a single non-head node of our chain.
        unsafe { detach_range(node, node) };
        Some(IoBuf::from_raw(node))
    }

    /// Detaches the last node. O(1). `None` when unchained.
    pub fn unlink_tail(&mut self) -> Option<IoBuf> {
        if !self.is_chained() {
            return None;
        }
        let tail = self.tail_ptr();
        // SAFETY: the tail is a non-head node of our chain.
        unsafe { detach_range(tail, tail) };
        Some(IoBuf::from_raw(tail))
    }

    /// Detaches nodes `range` (inclusive, by position) as their own chain.
    /// The head cannot be part of the range.
    ///
    /// Finding the range walks `range.end()` nodes; the relinking itself is
    /// O(1).
    ///
    /// # Errors
    ///
    /// [`IoBufError::OutOfBounds`] when the range is empty, starts at the
    /// head, or runs past the chain.
    pub fn separate_chain(&mut self, range: RangeInclusive<usize>) -> Result<IoBuf, IoBufError> {
        let (start, end) = range.into_inner();
        let Some((first, last)) = self.locate_range(start, end) else {
            return Err(IoBufError::OutOfBounds {
                op: "separate_chain",
                requested: end.saturating_add(1),
                available: self.count_chain_elements(),
            });
        };
        // SAFETY: 1 <= start <= end and `last` was reached before wrapping,
        // so first..=last is a forward run that excludes the head.
        unsafe { detach_range(first, last) };
        Ok(IoBuf::from_raw(first))
    }

    /// Splits the chain at node position `at`: nodes `at..` are returned.
    ///
    /// Walks `at` nodes.
    ///
    /// # Errors
    ///
    /// [`IoBufError::OutOfBounds`] unless `1 <= at < count_chain_elements()`.
    pub fn split_off(&mut self, at: usize) -> Result<IoBuf, IoBufError> {
        let first = match at {
            0 => None,
            _ => self.nth_node(at),
        };
        let Some(first) = first else {
            return Err(IoBufError::OutOfBounds {
                op: "split_off",
                requested: at,
                available: self.count_chain_elements().saturating_sub(1),
            });
        };
        // SAFETY: `first` is a non-head node, so first..=tail excludes the head.
        unsafe { detach_range(first, self.tail_ptr()) };
        Ok(IoBuf::from_raw(first))
    }

    /// Nodes at positions `start` and `end`, found in one walk. `None` when
    /// the range is empty, includes the head, or runs past the tail.
    fn locate_range(&self, start: usize, end: usize) -> Option<(NonNull<Node>, NonNull<Node>)> {
        if start == 0 || start > end {
            return None;
        }
        let head = self.head_ptr();
        let mut cur = head;
        let mut first = None;
        for index in 1..=end {
            // SAFETY: nodes of our chain are live.
            cur = unsafe { cur.as_ref() }.next;
            if cur == head {
                return None;
            }
            if index == start {
                first = Some(cur);
            }
        }
        first.map(|first| (first, cur))
    }

    /// Coalesces the whole chain into the head and returns its data.
    ///
    /// Keeps the head's headroom and the tail's tailroom. A no-op when
    /// unchained.
    pub fn coalesce(&mut self) -> Result<&[u8], IoBufError> {
        if self.is_chained() {
            self.coalesce_slow()?;
        }
        Ok(self.data())
    }

    /// Coalesces the whole chain into one node with exactly the requested
    /// headroom and at least the requested tailroom.
    pub fn coalesce_with_headroom_tailroom(
        &mut self,
        headroom: usize,
        tailroom: usize,
    ) -> Result<&[u8], IoBufError> {
        let length = self.compute_chain_data_length();
        let alloc = self.alloc_ref();
        self.coalesce_and_reallocate(&alloc, headroom, length, self.head_ptr(), tailroom)?;
        Ok(self.data())
    }

    /// Ensures the head holds at least `max_length` contiguous bytes by
    /// coalescing as few leading nodes as needed.
    ///
    /// # Errors
    ///
    /// [`IoBufError::CoalesceOverflow`] when the chain holds fewer bytes.
    pub fn gather(&mut self, max_length: usize) -> Result<&[u8], IoBufError> {
        if self.length() >= max_length {
            return Ok(self.data());
        }
        let head = self.head_ptr();
        let mut new_length = 0;
        let mut end = head;
        loop {
            // SAFETY: nodes of our chain are live.
            let node = unsafe { end.as_ref() };
            new_length += node.seg.length();
            end = node.next;
            if new_length >= max_length {
                break;
            }
            if end == head {
                return Err(IoBufError::CoalesceOverflow {
                    requested: max_length,
                    available: new_length,
                });
            }
        }
        let headroom = self.headroom();
        // SAFETY: `end` is live; its predecessor is the last consumed node.
        let tailroom = unsafe { end.as_ref().prev.as_ref() }.seg.tailroom();
        let alloc = self.alloc_ref();
        self.coalesce_and_reallocate(&alloc, headroom, new_length, end, tailroom)?;
        Ok(self.data())
    }

    pub(crate) fn coalesce_slow(&mut self) -> Result<(), IoBufError> {
        let length = self.compute_chain_data_length();
        let headroom = self.headroom();
        let tailroom = self.tail().tailroom();
        let alloc = self.alloc_ref();
        self.coalesce_and_reallocate(&alloc, headroom, length, self.head_ptr(), tailroom)
    }

    /// Copies the data of nodes `head..end` (at least the head; `end ==
    /// head` means the whole chain) into one fresh region owned by the head
    /// and drops the other consumed nodes.
    pub(crate) fn coalesce_and_reallocate(
        &mut self,
        alloc: &AllocRef,
        headroom: usize,
        length: usize,
        end: NonNull<Node>,
        tailroom: usize,
    ) -> Result<(), IoBufError> {
        let capacity = length
            .checked_add(headroom)
            .and_then(|n| n.checked_add(tailroom))
            .ok_or(IoBufError::oom(usize::MAX))?;
        let ext = layout::alloc_ext(alloc, capacity)?;
        let head = self.head_ptr();

        let mut copied = 0;
        let mut cur = head;
        loop {
            // SAFETY: nodes of our chain are live; the fresh block holds
            // headroom + length bytes and the consumed nodes hold `length`.
            unsafe {
                let seg = &(*cur.as_ptr()).seg;
                ptr::copy_nonoverlapping(
                    seg.data_ptr(),
                    ext.buf.as_ptr().add(headroom + copied),
                    seg.length(),
                );
                copied += seg.length();
                cur = (*cur.as_ptr()).next;
            }
            if cur == end {
                break;
            }
        }
        debug_assert_eq!(copied, length);
        tracing::debug!(length, headroom, tailroom, "coalesced chain");

        let seg = &mut **self;
        seg.release_storage();
        seg.install(ext, headroom);
        seg.set_length(length);

        // SAFETY: the head is live.
        let first = unsafe { head.as_ref() }.next;
        if first != end {
            // SAFETY: `end` is live; first..=last are the consumed non-head nodes.
            let last = unsafe { end.as_ref() }.prev;
            unsafe { detach_range(first, last) };
            drop(IoBuf::from_raw(first));
        }
        Ok(())
    }

    /// Makes every node of the chain exclusively owned. A chain with any
    /// shared node is coalesced into one fresh region.
    pub fn unshare(&mut self) -> Result<(), IoBufError> {
        if !self.is_chained() {
            return self.unshare_one();
        }
        if self.is_shared() {
            self.coalesce_slow()?;
        }
        Ok(())
    }

    /// Copies every wrapped node into owned storage.
    pub fn make_managed(&mut self) -> Result<(), IoBufError> {
        for seg in self.segments_mut() {
            seg.make_managed_one()?;
        }
        Ok(())
    }

    /// Marks every node's storage as externally shared.
    pub fn mark_externally_shared(&mut self) {
        for seg in self.segments_mut() {
            seg.mark_externally_shared_one();
        }
    }

    /// A single-node copy of the chain's data keeping the head's headroom
    /// and the tail's tailroom.
    pub fn clone_coalesced(&self) -> Result<IoBuf, IoBufError> {
        self.clone_coalesced_with_headroom_tailroom(self.headroom(), self.tail().tailroom())
    }

    /// A single-node copy of the chain's data with the given headroom and
    /// at least the given tailroom. An unchained buffer whose geometry
    /// already fits is shared instead of copied.
    pub fn clone_coalesced_with_headroom_tailroom(
        &self,
        headroom: usize,
        tailroom: usize,
    ) -> Result<IoBuf, IoBufError> {
        if !self.is_chained() && headroom == self.headroom() {
            if tailroom == self.tailroom() {
                return self.try_clone_one();
            }
            if tailroom < self.tailroom() {
                let wanted = self
                    .length()
                    .checked_add(headroom)
                    .and_then(|n| n.checked_add(tailroom))
                    .ok_or(IoBufError::oom(usize::MAX))?;
                let fresh = layout::good_ext_size(&AllocRef::System, wanted)? - layout::ext_overhead();
                if self.tailroom() <= fresh - headroom - self.length() {
                    return self.try_clone_one();
                }
            }
        }

        let length = self.compute_chain_data_length();
        let capacity = length
            .checked_add(headroom)
            .and_then(|n| n.checked_add(tailroom))
            .ok_or(IoBufError::oom(usize::MAX))?;
        let mut out = IoBuf::create_separate(capacity)?;
        out.advance(headroom)?;
        for seg in self.segments() {
            out.extend_from_slice(seg.data())?;
        }
        Ok(out)
    }
}

/// Iterator over the segments of a chain.
pub struct Segments<'a> {
    head: NonNull<Node>,
    next: Option<NonNull<Node>>,
    _chain: PhantomData<&'a IoBuf>,
}

impl<'a> Iterator for Segments<'a> {
    type Item = &'a Segment;

    fn next(&mut self) -> Option<&'a Segment> {
        let cur = self.next?;
        // SAFETY: the chain is borrowed for 'a, so every node is live.
        let node = unsafe { &*cur.as_ptr() };
        self.next = (node.next != self.head).then_some(node.next);
        Some(&node.seg)
    }
}

impl FusedIterator for Segments<'_> {}

/// Mutable iterator over the segments of a chain.
pub struct SegmentsMut<'a> {
    head: NonNull<Node>,
    next: Option<NonNull<Node>>,
    _chain: PhantomData<&'a mut IoBuf>,
}

impl<'a> Iterator for SegmentsMut<'a> {
    type Item = &'a mut Segment;

    fn next(&mut self) -> Option<&'a mut Segment> {
        let cur = self.next?;
        // SAFETY: the chain is exclusively borrowed for 'a and each node is
        // yielded once.
        let node = unsafe { &mut *cur.as_ptr() };
        self.next = (node.next != self.head).then_some(node.next);
        Some(&mut node.seg)
    }
}

impl FusedIterator for SegmentsMut<'_> {}

#[cfg(test)]
mod tests {
    use crate::{IoBuf, IoBufError};

    fn chain_of(parts: &[&[u8]]) -> IoBuf {
        let mut iter = parts.iter();
        let mut chain = IoBuf::copy_from_slice(iter.next().unwrap()).unwrap();
        for part in iter {
            chain.append_to_chain(IoBuf::copy_from_slice(part).unwrap());
        }
        chain
    }

    fn contents(buf: &IoBuf) -> Vec<u8> {
        buf.segments().flat_map(|seg| seg.data().to_vec()).collect()
    }

    #[test]
    fn test_append_scenario() {
        let mut a = IoBuf::copy_from_slice(b"12345").unwrap();
        let mut b = IoBuf::copy_from_slice(b"67890").unwrap();
        b.append_to_chain(IoBuf::copy_from_slice(b"abcde").unwrap());
        a.append_to_chain(b);

        assert_eq!(a.count_chain_elements(), 3);
        assert_eq!(a.compute_chain_data_length(), 15);
        assert_eq!(contents(&a), b"1234567890abcde");
    }

    #[test]
    fn test_prepend_chain() {
        let mut a = chain_of(&[b"cd", b"ef"]);
        a.prepend_chain(chain_of(&[b"ab"]));
        assert_eq!(a.count_chain_elements(), 3);
        assert_eq!(a.data(), b"ab");
        assert_eq!(contents(&a), b"abcdef");
    }

    #[test]
    fn test_pop() {
        let mut chain = chain_of(&[b"a", b"b", b"c"]);
        let rest = chain.pop().unwrap();
        assert!(!chain.is_chained());
        assert_eq!(contents(&rest), b"bc");
        assert!(chain.pop().is_none());
    }

    #[test]
    fn test_unlink() {
        let mut chain = chain_of(&[b"a", b"b", b"c", b"d"]);
        let b = chain.unlink(1).unwrap();
        assert_eq!(b.data(), b"b");
        assert!(!b.is_chained());
        assert_eq!(contents(&chain), b"acd");

        let head = chain.unlink(0).unwrap();
        assert_eq!(head.data(), b"a");
        assert_eq!(contents(&chain), b"cd");

        let tail = chain.unlink_tail().unwrap();
        assert_eq!(tail.data(), b"d");
        assert_eq!(contents(&chain), b"c");

        assert!(chain.unlink(0).is_none());
        assert!(chain.unlink_tail().is_none());
    }

    #[test]
    fn test_unlink_out_of_range() {
        let mut chain = chain_of(&[b"a", b"b"]);
        assert!(chain.unlink(2).is_none());
        assert_eq!(chain.count_chain_elements(), 2);
    }

    #[test]
    fn test_separate_chain() {
        let mut chain = chain_of(&[b"a", b"b", b"c", b"d", b"e"]);
        let middle = chain.separate_chain(1..=3).unwrap();
        assert_eq!(contents(&middle), b"bcd");
        assert_eq!(contents(&chain), b"ae");

        assert!(matches!(
            chain.separate_chain(0..=1),
            Err(IoBufError::OutOfBounds { .. })
        ));
        assert!(chain.separate_chain(1..=2).is_err());
    }

    #[test]
    fn test_separate_chain_bounds() {
        let mut chain = chain_of(&[b"a", b"b", b"c", b"d"]);

        // reversed and past-the-tail ranges leave the chain intact
        #[allow(clippy::reversed_empty_ranges)]
        let reversed = chain.separate_chain(3..=2);
        assert!(reversed.is_err());
        assert!(matches!(
            chain.separate_chain(2..=4),
            Err(IoBufError::OutOfBounds {
                requested: 5,
                available: 4,
                ..
            })
        ));
        assert_eq!(contents(&chain), b"abcd");

        // a single node, then a range ending at the tail
        let c = chain.separate_chain(2..=2).unwrap();
        assert_eq!(contents(&c), b"c");
        let rest = chain.separate_chain(1..=2).unwrap();
        assert_eq!(contents(&rest), b"bd");
        assert_eq!(contents(&chain), b"a");
        assert!(!chain.is_chained());
    }

    #[test]
    fn test_split_off_bounds() {
        let mut chain = chain_of(&[b"a", b"b", b"c"]);
        assert!(matches!(
            chain.split_off(3),
            Err(IoBufError::OutOfBounds {
                requested: 3,
                available: 2,
                ..
            })
        ));
        let tail = chain.split_off(1).unwrap();
        assert_eq!(contents(&tail), b"bc");
        assert_eq!(tail.count_chain_elements(), 2);
        assert_eq!(contents(&chain), b"a");
    }

    #[test]
    fn test_split_off() {
        let mut chain = chain_of(&[b"a", b"b", b"c"]);
        let tail = chain.split_off(2).unwrap();
        assert_eq!(contents(&chain), b"ab");
        assert_eq!(contents(&tail), b"c");
        assert!(chain.split_off(0).is_err());
        assert!(chain.split_off(2).is_err());
    }

    #[test]
    fn test_coalesce() {
        let mut chain = chain_of(&[b"12345", b"67890", b"abcde"]);
        let before = chain.compute_chain_data_length();
        assert_eq!(chain.coalesce().unwrap(), b"1234567890abcde");
        assert!(!chain.is_chained());
        assert_eq!(chain.compute_chain_data_length(), before);
    }

    #[test]
    fn test_coalesce_keeps_geometry() {
        let mut chain = IoBuf::copy_buffer(b"ab", 6, 0).unwrap();
        chain.append_to_chain(IoBuf::copy_buffer(b"cd", 0, 9).unwrap());
        let tailroom = chain.tail().tailroom();
        chain.coalesce().unwrap();
        assert_eq!(chain.headroom(), 6);
        assert!(chain.tailroom() >= tailroom);
        assert_eq!(chain.data(), b"abcd");
    }

    #[test]
    fn test_gather() {
        let mut chain = chain_of(&[b"12345", b"67890", b"abcde"]);
        assert_eq!(chain.gather(7).unwrap(), b"1234567890");
        assert_eq!(chain.count_chain_elements(), 2);
        assert_eq!(contents(&chain), b"1234567890abcde");

        assert_eq!(chain.gather(3).unwrap(), b"1234567890");
    }

    #[test]
    fn test_gather_whole_chain() {
        let mut chain = chain_of(&[b"12345", b"67890", b"abcde"]);
        assert_eq!(chain.gather(15).unwrap(), b"1234567890abcde");
        assert!(!chain.is_chained());
    }

    #[test]
    fn test_gather_overflow() {
        let mut chain = chain_of(&[b"12345", b"67890", b"abcde"]);
        assert_eq!(
            chain.gather(20).unwrap_err(),
            IoBufError::CoalesceOverflow {
                requested: 20,
                available: 15
            }
        );
        assert_eq!(chain.count_chain_elements(), 3);
    }

    #[test]
    fn test_coalesce_with_headroom_tailroom() {
        let mut chain = chain_of(&[b"ab", b"cd"]);
        chain.coalesce_with_headroom_tailroom(3, 5).unwrap();
        assert_eq!(chain.headroom(), 3);
        assert!(chain.tailroom() >= 5);
        assert_eq!(chain.data(), b"abcd");
    }

    #[test]
    fn test_clone_shares_every_node() {
        let chain = chain_of(&[b"ab", b"cd"]);
        let copy = chain.clone();
        assert_eq!(copy.count_chain_elements(), 2);
        assert!(chain.segments().all(|seg| seg.is_shared_one()));
        assert_eq!(contents(&copy), b"abcd");
        drop(copy);
        assert!(!chain.is_shared());
    }

    #[test]
    fn test_unshare_chain_coalesces_when_shared() {
        let mut chain = chain_of(&[b"ab", b"cd"]);
        let copy = chain.clone();
        chain.unshare().unwrap();
        assert!(!chain.is_chained());
        assert!(!chain.is_shared());
        assert_eq!(chain.data(), b"abcd");
        assert_eq!(contents(&copy), b"abcd");
    }

    #[test]
    fn test_unshare_chain_noop_when_exclusive() {
        let mut chain = chain_of(&[b"ab", b"cd"]);
        chain.unshare().unwrap();
        assert!(chain.is_chained());
    }

    #[test]
    fn test_clone_coalesced() {
        let chain = chain_of(&[b"ab", b"cd", b"ef"]);
        let flat = chain.clone_coalesced().unwrap();
        assert!(!flat.is_chained());
        assert_eq!(flat.data(), b"abcdef");
        assert!(!chain.is_shared());

        let single = IoBuf::copy_from_slice(b"xyz").unwrap();
        let shared = single.clone_coalesced().unwrap();
        assert!(single.is_shared_one());
        assert_eq!(shared.data(), b"xyz");

        let roomy = chain
            .clone_coalesced_with_headroom_tailroom(4, 100)
            .unwrap();
        assert_eq!(roomy.headroom(), 4);
        assert!(roomy.tailroom() >= 100);
    }

    #[test]
    fn test_is_empty_is_chain_wide() {
        let mut chain = IoBuf::create(8).unwrap();
        chain.append_to_chain(IoBuf::create(8).unwrap());
        assert!(chain.is_empty());
        chain.tail_mut().extend_from_slice(b"x").unwrap();
        assert!(!chain.is_empty());
        assert_eq!(chain.length(), 0);
    }

    #[test]
    fn test_segments_mut() {
        let mut chain = chain_of(&[b"ab", b"cd"]);
        for seg in chain.segments_mut() {
            seg.writable_data()[0] = b'z';
        }
        assert_eq!(contents(&chain), b"zbzd");
    }

    #[test]
    fn test_make_managed_chain() {
        let mut chain = IoBuf::wrap_static(b"ab");
        chain.append_to_chain(IoBuf::wrap_static(b"cd"));
        assert!(!chain.is_managed());
        chain.make_managed().unwrap();
        assert!(chain.is_managed());
        assert_eq!(contents(&chain), b"abcd");
    }
}
