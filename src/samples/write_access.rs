// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! RAII sample write access for safe zero-copy audio writing.

use crate::{Error, Result, flow::writer::WriterCore, time};

/// RAII-protected audio sample writing session.
///
/// Provides mutable access to multi-channel audio buffers for zero-copy
/// writing. Data may be split into two fragments per channel if the batch
/// wraps the ring boundary.
///
/// Publication for continuous flows is the monotonic advance of the head
/// index: until [`Self::commit`] runs, readers cannot observe the batch, so
/// abandoning a session (drop without commit) simply publishes nothing.
///
/// The lifetime `'a` is tied to the [`crate::SamplesWriter`] that created
/// this session.
///
/// # Examples
///
/// ```no_run
/// # use mxl_core::SamplesWriter;
/// # fn example(writer: SamplesWriter) -> Result<(), mxl_core::Error> {
/// let mut access = writer.open_samples(1000, 480)?; // 10ms at 48kHz
///
/// for ch in 0..access.channels() {
///     let (frag1, frag2) = access.channel_data_mut(ch)?;
///     frag1.fill(0x42);
///     frag2.fill(0x42);
/// }
///
/// access.commit()?;
/// # Ok(())
/// # }
/// ```
pub struct SamplesWriteAccess<'a> {
    writer: &'a WriterCore,
    fragments: [(*mut u8, usize); 2],
    stride: usize,
    channels: usize,
    start_index: u64,
    count: u64,
}

impl<'a> SamplesWriteAccess<'a> {
    pub(crate) fn new(
        writer: &'a WriterCore,
        fragments: [(*mut u8, usize); 2],
        stride: usize,
        channels: usize,
        start_index: u64,
        count: u64,
    ) -> Self {
        Self {
            writer,
            fragments,
            stride,
            channels,
            start_index,
            count,
        }
    }

    /// Returns the number of audio channels.
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Returns the number of samples per channel in this batch.
    pub fn sample_count(&self) -> u64 {
        self.count
    }

    /// Returns the first sample index of this batch.
    pub fn start_index(&self) -> u64 {
        self.start_index
    }

    /// Returns mutable access to a specific channel's sample buffer.
    ///
    /// Each channel's data is returned as two mutable byte slices
    /// (fragments). If the batch does not wrap the ring boundary, the
    /// second fragment is empty.
    ///
    /// The returned slices are raw bytes; for float32 audio, cast them with
    /// a crate like `bytemuck`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BadArg`] if `channel >= channels()`.
    pub fn channel_data_mut(&mut self, channel: usize) -> Result<(&mut [u8], &mut [u8])> {
        if channel >= self.channels {
            return Err(Error::BadArg);
        }
        let offset = self.stride * channel;
        // Safety: fragments were validated against the arena bounds at
        // open; distinct channels never alias because the stride equals the
        // per-channel ring length.
        unsafe {
            let (ptr_1, size_1) = self.fragments[0];
            let (ptr_2, size_2) = self.fragments[1];
            Ok((
                std::slice::from_raw_parts_mut(ptr_1.add(offset), size_1),
                std::slice::from_raw_parts_mut(ptr_2.add(offset), size_2),
            ))
        }
    }

    /// Commits the samples, making them visible to readers.
    ///
    /// Publishes the head index `start_index + count - 1` with release
    /// ordering, so a reader that observes the new head also observes every
    /// payload byte written in this session.
    pub fn commit(self) -> Result<()> {
        self.writer
            .publish_head(self.start_index + self.count - 1, time::current_time());
        Ok(())
    }

    /// Abandons the batch without publishing.
    ///
    /// The head index is not advanced; readers never see these samples
    /// (until some later committed batch reuses the same ring region).
    pub fn cancel(self) {
        // Nothing to roll back: visibility is the head index alone.
    }
}

impl Drop for SamplesWriteAccess<'_> {
    /// Ends the write session, allowing the next `open_samples`.
    ///
    /// An uncommitted batch needs no further rollback: the head index never
    /// moved, so readers never saw it.
    fn drop(&mut self) {
        self.writer
            .session_open
            .store(false, std::sync::atomic::Ordering::Release);
    }
}
