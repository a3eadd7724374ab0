// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Grain writer implementation for discrete media flows.

use std::sync::atomic::Ordering;

use super::write_access::GrainWriteAccess;

use crate::{
    Error, Result,
    flow::writer::WriterCore,
    layout::{SLOT_COMMITTED, SLOT_EMPTY},
    time::UNDEFINED_INDEX,
};

/// Writer for discrete media grains (video frames, data packets).
///
/// Provides zero-copy write access to grains in the flow's ring. Each grain
/// is opened at a specific index, written via [`GrainWriteAccess`], and then
/// committed to make it visible to readers. The writer never blocks for a
/// reader and tolerates any number of them, including zero.
///
/// # Thread Safety
///
/// `GrainWriter` is `Send` but not `Sync`. Each writer should be used by
/// only one thread at a time, but can be transferred between threads.
///
/// # Examples
///
/// ```no_run
/// # use mxl_core::{Instance, GrainWriter, Rational};
/// # fn example(instance: Instance, writer: GrainWriter) -> Result<(), mxl_core::Error> {
/// // Open a grain for writing at the current index
/// let rate = Rational::new(60, 1);
/// let index = instance.get_current_index(&rate);
///
/// let mut access = writer.open_grain(index)?;
/// access.payload_mut().fill(0xFF); // Write data
/// let total = access.total_slices();
/// access.commit(total)?; // Commit
/// # Ok(())
/// # }
/// ```
pub struct GrainWriter {
    core: WriterCore,
    _not_sync: std::marker::PhantomData<*mut ()>,
}

// Safety: shared-memory mutation goes through atomics under the
// single-writer protocol; the handle itself is single-threaded.
unsafe impl Send for GrainWriter {}

impl GrainWriter {
    pub(crate) fn new(core: WriterCore) -> Self {
        Self {
            core,
            _not_sync: std::marker::PhantomData,
        }
    }

    /// Explicitly destroys this writer, releasing the flow's exclusive lock
    /// immediately.
    ///
    /// Normally the writer is destroyed automatically when dropped.
    pub fn destroy(self) -> Result<()> {
        drop(self);
        Ok(())
    }

    /// Opens a grain for writing at the specified index.
    ///
    /// Begins a write generation on the slot `index mod N`: the generation
    /// is bumped to odd with release ordering, so concurrent readers of the
    /// same slot retry (or time out) until the grain is committed.
    ///
    /// Returns a [`GrainWriteAccess`] session that provides mutable access
    /// to the grain's payload cell. The session must be committed or
    /// canceled; dropping it cancels.
    ///
    /// At most one write session may be outstanding per writer; a second
    /// `open_grain` before the first session commits or cancels is refused.
    ///
    /// # Errors
    ///
    /// - [`Error::Stale`] if `index` is not newer than the grain the slot
    ///   already holds (rewriting just-published history is refused)
    /// - [`Error::BadArg`] if `index` is the undefined sentinel or another
    ///   write session is still open
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use mxl_core::GrainWriter;
    /// # fn example(writer: GrainWriter) -> Result<(), mxl_core::Error> {
    /// let mut access = writer.open_grain(100)?;
    /// let payload = access.payload_mut();
    ///
    /// for (i, byte) in payload.iter_mut().enumerate() {
    ///     *byte = (i % 256) as u8;
    /// }
    ///
    /// let total = access.total_slices();
    /// access.commit(total)?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn open_grain(&self, index: u64) -> Result<GrainWriteAccess<'_>> {
        if index == UNDEFINED_INDEX {
            return Err(Error::BadArg);
        }
        let header = self.core.arena.header();
        let slot_index = index & (header.history_depth - 1);
        let slot = self.core.arena.slot(slot_index);

        let generation = slot.generation.load(Ordering::Acquire);
        if generation % 2 == 0 {
            let committed = slot.index.load(Ordering::Relaxed);
            if committed != UNDEFINED_INDEX
                && index <= committed
                && slot.status.load(Ordering::Relaxed) == SLOT_COMMITTED
            {
                return Err(Error::Stale);
            }
        }
        if self.core.session_open.swap(true, Ordering::Acquire) {
            return Err(Error::BadArg);
        }
        let open_generation = if generation % 2 == 0 {
            slot.generation.store(generation + 1, Ordering::Release);
            generation + 1
        } else {
            // A writer died mid-commit and left the generation odd; adopt
            // the open generation and overwrite the slot.
            tracing::warn!(
                flow = %header.flow_id,
                slot = slot_index,
                "recovering slot left under write by a previous writer"
            );
            generation
        };
        std::sync::atomic::fence(Ordering::Release);

        let cell_offset = self.core.arena.cell_offset(slot_index);
        slot.index.store(index, Ordering::Relaxed);
        slot.status.store(SLOT_EMPTY, Ordering::Relaxed);
        slot.total_slices
            .store(self.core.total_slices, Ordering::Relaxed);
        slot.valid_slices.store(0, Ordering::Relaxed);
        slot.payload_offset.store(cell_offset, Ordering::Relaxed);
        slot.payload_len.store(header.cell_size, Ordering::Relaxed);

        // Safety: the cell offset/size come from the validated header; the
        // mapping is read-write and the slot's odd generation fences
        // readers away from the cell until commit.
        let payload =
            unsafe { (self.core.arena.base() as *mut u8).add(cell_offset as usize) };

        Ok(GrainWriteAccess::new(
            &self.core,
            slot,
            payload,
            header.cell_size as usize,
            index,
            self.core.total_slices,
            open_generation,
        ))
    }
}
