//! Reserve policy.
//!
//! Strategies, cheapest first:
//!
//! 1. shift the data inside the current region
//! 2. grow the allocator block in place
//! 3. resize (realloc) the allocator block
//! 4. allocate a new region, copy, release the old one
//!
//! Strategies 2 and 3 only apply to regions the engine allocated itself
//! (embedded or separate storage) that already hold data and already have
//! enough headroom; whichever of the two the allocator supports is tried.

use std::ptr;

use crate::alloc::MAX_BUFFER_SIZE;
use crate::error::IoBufError;
use crate::storage::layout;
use crate::storage;

use super::Segment;

impl Segment {
    pub(crate) fn reserve_slow(&mut self, min_headroom: usize, min_tailroom: usize) -> Result<(), IoBufError> {
        let new_capacity = self
            .length()
            .checked_add(min_headroom)
            .and_then(|n| n.checked_add(min_tailroom))
            .filter(|&n| n <= MAX_BUFFER_SIZE)
            .ok_or(IoBufError::oom(usize::MAX))?;

        self.assert_writable("reserve");

        if self.headroom() + self.tailroom() >= min_headroom + min_tailroom {
            tracing::trace!(min_headroom, min_tailroom, strategy = "shift", "reserving");
            // SAFETY: source and destination lie in the exclusively owned region.
            unsafe {
                ptr::copy(
                    self.data_ptr(),
                    self.region_ptr().as_ptr().add(min_headroom),
                    self.length(),
                )
            };
            self.set_offset(min_headroom);
            return Ok(());
        }

        if self.try_grow_block(new_capacity, min_headroom)? {
            return Ok(());
        }

        tracing::trace!(new_capacity, strategy = "copy", "reserving");
        let ext = layout::alloc_ext(&self.alloc_ref(), new_capacity)?;
        // SAFETY: the fresh block holds at least `new_capacity` bytes.
        unsafe {
            ptr::copy_nonoverlapping(
                self.data_ptr(),
                ext.buf.as_ptr().add(min_headroom),
                self.length(),
            )
        };
        self.release_storage();
        self.install(ext, min_headroom);
        Ok(())
    }

    /// Strategies 2 and 3. `Ok(false)` when neither applies or the
    /// allocator declined to grow or resize the block.
    fn try_grow_block(&mut self, new_capacity: usize, min_headroom: usize) -> Result<bool, IoBufError> {
        let Some(info_ptr) = self.info_ptr() else {
            return Ok(false);
        };
        let Some((alloc, old_size)) = self.info().and_then(|info| info.allocator_block()) else {
            return Ok(false);
        };
        let alloc = alloc.clone();
        let old_headroom = self.headroom();
        if self.length() == 0 || old_headroom < min_headroom {
            return Ok(false);
        }

        let head_slack = old_headroom - min_headroom;
        let target = layout::good_ext_size(&alloc, new_capacity + head_slack)?;
        if target <= old_size {
            return Ok(false);
        }
        let region = self.region_ptr();
        // SAFETY: `old_size` is the size the block was allocated with.
        let old_layout = unsafe { layout::data_layout_unchecked(old_size) };

        if alloc.get().can_grow_in_place() {
            if head_slack * 4 > new_capacity || old_size < alloc.get().min_in_place_expandable() {
                return Ok(false);
            }
            // SAFETY: the region is this allocator's block of `old_size` bytes.
            if !unsafe { alloc.grow_in_place(region, old_layout, target) } {
                return Ok(false);
            }
            tracing::trace!(old_size, target, strategy = "grow_in_place", "reserving");
            // SAFETY: count is 1; the old slot is still inside the (grown) block.
            let detached = unsafe { storage::park(info_ptr).retire(info_ptr) };
            // SAFETY: the block now spans `target` bytes with no live metadata.
            let ext = unsafe { layout::init_ext(region, target, alloc, detached.observers) };
            self.take_storage();
            self.install(ext, old_headroom);
            return Ok(true);
        }

        let copy_slack = self.capacity() - self.length();
        if copy_slack * 2 > self.length() {
            return Ok(false);
        }
        // SAFETY: count is 1; nothing touches the slot until restore/retire.
        let parked = unsafe { storage::park(info_ptr) };
        // SAFETY: the region is this allocator's block of `old_size` bytes.
        let Some(moved) = (unsafe { alloc.resize(region, old_layout, target) }) else {
            // SAFETY: the block is unchanged, so the slot is still valid.
            unsafe { parked.restore(info_ptr) };
            tracing::trace!(old_size, target, "resize declined");
            return Ok(false);
        };
        tracing::trace!(old_size, target, strategy = "resize", "reserving");
        // SAFETY: the old slot is gone with the old block or was zeroed in it.
        let detached = unsafe { parked.retire(info_ptr) };
        // SAFETY: `moved` spans `target` bytes with no live metadata.
        let ext = unsafe { layout::init_ext(moved, target, alloc, detached.observers) };
        self.take_storage();
        self.install(ext, old_headroom);
        Ok(true)
    }
}
