// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Sample writer implementation for continuous media flows.

use std::sync::atomic::Ordering;

use crate::{
    Error, Result, SamplesWriteAccess,
    flow::writer::WriterCore,
    samples::data::fragment_layout,
    time::UNDEFINED_INDEX,
};

/// Writer for continuous audio sample streams.
///
/// Provides zero-copy write access to multi-channel audio buffers in the
/// flow's ring. Samples are written in batches at specific indices via
/// [`SamplesWriteAccess`] sessions; committing a batch publishes it by
/// advancing the flow's head index with release ordering.
///
/// # Thread Safety
///
/// `SamplesWriter` is `Send` but not `Sync`. Each writer should be used by
/// only one thread at a time, but can be transferred between threads.
///
/// # Examples
///
/// ```no_run
/// # use mxl_core::{Instance, Rational, SamplesWriter};
/// # fn example(instance: Instance, writer: SamplesWriter) -> Result<(), mxl_core::Error> {
/// let rate = Rational::new(48000, 1);
/// let index = instance.get_current_index(&rate);
///
/// // Open a batch of 480 samples (10ms at 48kHz)
/// let mut access = writer.open_samples(index, 480)?;
///
/// for ch in 0..access.channels() {
///     let (frag1, frag2) = access.channel_data_mut(ch)?;
///     frag1.fill(0x00);
///     frag2.fill(0x00);
/// }
///
/// access.commit()?;
/// # Ok(())
/// # }
/// ```
pub struct SamplesWriter {
    core: WriterCore,
    _not_sync: std::marker::PhantomData<*mut ()>,
}

// Safety: shared-memory mutation goes through atomics under the
// single-writer protocol; the handle itself is single-threaded.
unsafe impl Send for SamplesWriter {}

impl SamplesWriter {
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

    /// Opens a batch of `count` samples starting at `start_index` for
    /// writing.
    ///
    /// Returns a [`SamplesWriteAccess`] session exposing up to two mutable
    /// fragments per channel (two when the batch crosses the ring
    /// boundary). Nothing becomes visible to readers until
    /// [`SamplesWriteAccess::commit`] advances the head index to
    /// `start_index + count - 1`.
    ///
    /// At most one write session may be outstanding per writer; a second
    /// `open_samples` before the first session commits or cancels is
    /// refused.
    ///
    /// # Errors
    ///
    /// - [`Error::BadArg`] if `count` is zero or exceeds the ring capacity,
    ///   or another write session is still open
    /// - [`Error::Stale`] if `start_index` is at or below the published
    ///   head (committed samples are never rewritten)
    pub fn open_samples(&self, start_index: u64, count: u64) -> Result<SamplesWriteAccess<'_>> {
        let header = self.core.arena.header();
        if count == 0 || count > header.history_depth || start_index == UNDEFINED_INDEX {
            return Err(Error::BadArg);
        }
        start_index.checked_add(count - 1).ok_or(Error::BadArg)?;

        let head = self
            .core
            .arena
            .ring_state()
            .head_index
            .load(Ordering::Relaxed);
        if head != UNDEFINED_INDEX && start_index <= head {
            return Err(Error::Stale);
        }
        if self.core.session_open.swap(true, Ordering::Acquire) {
            return Err(Error::BadArg);
        }

        let layout = fragment_layout(header, start_index, count);
        let base = self.core.arena.base() as *mut u8;
        // Safety: fragment offsets are derived from the validated header
        // geometry; the region past the head index has no readers.
        let fragments =
            unsafe { [(base.add(layout[0].0 as usize), layout[0].1), (base.add(layout[1].0 as usize), layout[1].1)] };

        Ok(SamplesWriteAccess::new(
            &self.core,
            fragments,
            header.cell_size as usize,
            header.channel_count as usize,
            start_index,
            count,
        ))
    }
}
