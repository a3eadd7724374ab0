// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! RAII grain write access for safe zero-copy writing.

use std::sync::atomic::{Ordering, fence};

use crate::{
    Error, Result,
    flow::writer::WriterCore,
    layout::{SLOT_CANCELLED, SLOT_COMMITTED, SlotRecord},
    time::{self, Timepoint},
};

/// RAII-protected grain writing session.
///
/// Provides mutable access to a grain's payload cell for zero-copy writing.
/// While the slot's generation is odd readers stay away; every publication
/// ([`Self::commit`], [`Self::commit_partial`], [`Self::cancel`]) closes the
/// generation with a release store so the payload written so far
/// happens-before visibility. A session that is dropped without commit is
/// canceled, ensuring the flow remains consistent even if the operation is
/// aborted.
///
/// The lifetime `'a` is tied to the [`crate::GrainWriter`] that created
/// this session.
///
/// # Examples
///
/// ```no_run
/// # use mxl_core::GrainWriter;
/// # fn example(writer: GrainWriter) -> Result<(), mxl_core::Error> {
/// let mut access = writer.open_grain(100)?;
///
/// // Fill grain with data
/// access.payload_mut().fill(42);
///
/// // Commit all slices
/// let total = access.total_slices();
/// access.commit(total)?;
/// # Ok(())
/// # }
/// ```
pub struct GrainWriteAccess<'a> {
    writer: &'a WriterCore,
    slot: &'a SlotRecord,
    payload: *mut u8,
    payload_capacity: usize,
    index: u64,
    total_slices: u16,
    /// The slot's generation as last written by this session: odd while a
    /// metadata window is open, even after a publication.
    current_generation: u64,
    /// Tracks whether the grain has been committed or canceled to prevent
    /// auto-cancel on drop.
    committed_or_canceled: bool,
}

impl<'a> GrainWriteAccess<'a> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        writer: &'a WriterCore,
        slot: &'a SlotRecord,
        payload: *mut u8,
        payload_capacity: usize,
        index: u64,
        total_slices: u16,
        open_generation: u64,
    ) -> Self {
        debug_assert!(open_generation % 2 == 1);
        Self {
            writer,
            slot,
            payload,
            payload_capacity,
            index,
            total_slices,
            current_generation: open_generation,
            committed_or_canceled: false,
        }
    }

    /// Returns mutable access to the grain's payload cell.
    ///
    /// This provides zero-copy write access to the shared-memory arena.
    /// Modifications become visible to readers once the grain is committed.
    /// After a [`Self::commit_partial`], only bytes beyond the published
    /// slices may still be written.
    pub fn payload_mut(&mut self) -> &mut [u8] {
        // Safety: the pointer/capacity pair addresses this slot's cell in a
        // read-write mapping; visibility is gated by the slot's generation
        // and valid-slice count.
        unsafe { std::slice::from_raw_parts_mut(self.payload, self.payload_capacity) }
    }

    /// Returns the grain index this session writes.
    pub fn index(&self) -> u64 {
        self.index
    }

    /// Returns the maximum size of the grain payload in bytes.
    pub fn max_size(&self) -> usize {
        self.payload_capacity
    }

    /// Returns the total number of slices in this grain.
    ///
    /// Pass this to [`Self::commit`] for a complete grain.
    pub fn total_slices(&self) -> u16 {
        self.total_slices
    }

    /// Publishes the slot with the given validity and status.
    ///
    /// If an earlier publication already closed the generation, a brief
    /// odd/even metadata window is cycled around the field stores. The
    /// head index is advanced before the closing generation store, so a
    /// reader that accepts the slot also observes `headIndex >= index`;
    /// the closing store has release ordering, so everything written
    /// before it happens-before the slot becoming readable.
    fn publish(&mut self, valid_slices: u16, status: u8, now: Timepoint, advance_head: bool) {
        if self.current_generation % 2 == 0 {
            self.current_generation += 1;
            self.slot
                .generation
                .store(self.current_generation, Ordering::Release);
            fence(Ordering::Release);
        }
        self.slot.valid_slices.store(valid_slices, Ordering::Relaxed);
        self.slot.commit_timestamp.store(now, Ordering::Relaxed);
        self.slot.status.store(status, Ordering::Relaxed);
        if advance_head {
            self.writer.publish_head(self.index, now);
        }
        self.current_generation += 1;
        self.slot
            .generation
            .store(self.current_generation, Ordering::Release);
    }

    /// Publishes the grain with `valid_slices` valid while keeping the
    /// session open for further slices.
    ///
    /// This is the slice-level visibility path: readers waiting with a
    /// `min_valid_slices` at or below `valid_slices` are released while the
    /// writer keeps filling the rest of the grain. The caller must only
    /// touch payload bytes beyond the slices it has already published.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BadArg`] if `valid_slices` exceeds
    /// [`Self::total_slices`].
    pub fn commit_partial(&mut self, valid_slices: u16) -> Result<()> {
        if valid_slices > self.total_slices {
            return Err(Error::BadArg);
        }
        self.publish(valid_slices, SLOT_COMMITTED, time::current_time(), true);
        Ok(())
    }

    /// Commits the grain, making it visible to readers.
    ///
    /// This consumes the write session, publishes the slot fields and the
    /// payload with a release fence, and advances the flow's head index.
    ///
    /// # Arguments
    ///
    /// * `valid_slices` - Number of complete slices (typically
    ///   [`Self::total_slices`] for a fully written grain)
    ///
    /// # Errors
    ///
    /// Returns [`Error::BadArg`] if `valid_slices` exceeds
    /// [`Self::total_slices`].
    pub fn commit(mut self, valid_slices: u16) -> Result<()> {
        if valid_slices > self.total_slices {
            return Err(Error::BadArg);
        }
        self.committed_or_canceled = true;
        self.publish(valid_slices, SLOT_COMMITTED, time::current_time(), true);
        Ok(())
    }

    /// Cancels the grain write operation without committing.
    ///
    /// The slot is marked cancelled and the flow's head index is not
    /// advanced for this grain. The cell's previous payload is gone: a
    /// reader asking for any index this slot has carried gets
    /// [`Error::NotReady`] until the slot is committed again.
    pub fn cancel(mut self) {
        self.committed_or_canceled = true;
        self.publish(0, SLOT_CANCELLED, time::current_time(), false);
    }
}

impl Drop for GrainWriteAccess<'_> {
    /// Automatically cancels uncommitted grains on drop.
    ///
    /// This ensures that if a write session is abandoned (e.g., due to
    /// panic or early return), the slot does not stay under an open write
    /// generation forever.
    fn drop(&mut self) {
        if !self.committed_or_canceled {
            self.publish(0, SLOT_CANCELLED, time::current_time(), false);
        }
        self.writer.session_open.store(false, Ordering::Release);
    }
}
