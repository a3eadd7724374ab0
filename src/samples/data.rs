// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Sample data structures for zero-copy audio access.

use std::marker::PhantomData;

use crate::{Error, layout::FlowHeader};

/// Computes the up-to-two `(file offset, byte length)` fragments a batch of
/// `count` samples starting at `start_index` occupies within channel 0's
/// ring. Other channels sit at a fixed stride of `cell_size` bytes.
///
/// The second fragment is empty unless the batch crosses the ring boundary.
pub(crate) fn fragment_layout(
    header: &FlowHeader,
    start_index: u64,
    count: u64,
) -> [(u64, usize); 2] {
    let capacity = header.history_depth;
    let word = u64::from(header.sample_word_size);
    let position = start_index % capacity;
    let first = count.min(capacity - position);
    [
        (
            header.payload_arena_offset + position * word,
            (first * word) as usize,
        ),
        (header.payload_arena_offset, ((count - first) * word) as usize),
    ]
}

/// A resolved multi-channel buffer slice: up to two memory fragments per
/// channel, with channels separated by a fixed byte stride.
pub(crate) struct WrappedMultiBufferSlice {
    /// Channel 0's fragments as raw `(pointer, byte length)` pairs.
    pub fragments: [(*const u8, usize); 2],
    /// Byte stride between consecutive channels.
    pub stride: usize,
    /// Number of channels.
    pub count: usize,
}

/// Zero-copy view of multi-channel audio sample data.
///
/// Provides read-only access to audio samples stored in the flow's ring.
/// Each channel is strided separately, and data may be split into two
/// fragments if the batch wraps around the ring boundary.
///
/// The lifetime `'a` is tied to the [`crate::SamplesReader`] that produced
/// it.
///
/// # Examples
///
/// ```no_run
/// # use mxl_core::SamplesData;
/// # fn example(samples: SamplesData) -> Result<(), mxl_core::Error> {
/// println!("Channels: {}", samples.num_of_channels());
///
/// for ch in 0..samples.num_of_channels() {
///     let (frag1, frag2) = samples.channel_data(ch)?;
///     println!("Channel {}: {} + {} bytes", ch, frag1.len(), frag2.len());
/// }
/// # Ok(())
/// # }
/// ```
pub struct SamplesData<'a> {
    buffer_slice: WrappedMultiBufferSlice,
    sample_count: u64,
    phantom: PhantomData<&'a ()>,
}

impl<'a> SamplesData<'a> {
    pub(crate) fn new(buffer_slice: WrappedMultiBufferSlice, sample_count: u64) -> Self {
        Self {
            buffer_slice,
            sample_count,
            phantom: PhantomData,
        }
    }

    /// Returns the number of audio channels.
    pub fn num_of_channels(&self) -> usize {
        self.buffer_slice.count
    }

    /// Returns the number of samples per channel in this view.
    pub fn sample_count(&self) -> u64 {
        self.sample_count
    }

    /// Returns zero-copy access to a specific channel's sample data.
    ///
    /// Each channel's data is returned as two byte slices (fragments). If
    /// the batch does not wrap the ring boundary, the second fragment is
    /// empty.
    ///
    /// The returned slices are raw bytes; for float32 audio, cast them with
    /// a crate like `bytemuck`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BadArg`] if `channel >= num_of_channels()`.
    pub fn channel_data(&self, channel: usize) -> crate::Result<(&[u8], &[u8])> {
        if channel >= self.buffer_slice.count {
            return Err(Error::BadArg);
        }
        let offset = self.buffer_slice.stride * channel;
        // Safety: the fragments were validated against the arena bounds and
        // channel count when the window was resolved.
        unsafe {
            let (ptr_1, size_1) = self.buffer_slice.fragments[0];
            let (ptr_2, size_2) = self.buffer_slice.fragments[1];
            Ok((
                std::slice::from_raw_parts(ptr_1.add(offset), size_1),
                std::slice::from_raw_parts(ptr_2.add(offset), size_2),
            ))
        }
    }

    /// Creates an owned copy of this sample data.
    ///
    /// Allocates vectors and copies all channel data. Use this when you
    /// need to store the samples beyond the reader's lifetime.
    pub fn to_owned(&self) -> OwnedSamplesData {
        self.into()
    }
}

impl<'a> AsRef<SamplesData<'a>> for SamplesData<'a> {
    fn as_ref(&self) -> &SamplesData<'a> {
        self
    }
}

/// Owned copy of multi-channel sample data.
///
/// Unlike [`SamplesData`], this owns its data and can outlive the reader.
/// Each channel is stored as a contiguous `Vec<u8>` (fragments are joined).
pub struct OwnedSamplesData {
    /// Per-channel sample data (raw bytes), fragments concatenated.
    pub payload: Vec<Vec<u8>>,
}

impl<'a> From<&SamplesData<'a>> for OwnedSamplesData {
    fn from(value: &SamplesData<'a>) -> Self {
        let mut payload = Vec::with_capacity(value.buffer_slice.count);
        for channel in 0..value.buffer_slice.count {
            // Safe unwrap: channel index is always valid
            let (data_1, data_2) = value.channel_data(channel).unwrap();
            let mut channel_payload = Vec::with_capacity(data_1.len() + data_2.len());
            channel_payload.extend(data_1);
            channel_payload.extend(data_2);
            payload.push(channel_payload);
        }
        Self { payload }
    }
}

impl<'a> From<SamplesData<'a>> for OwnedSamplesData {
    fn from(value: SamplesData<'a>) -> Self {
        value.as_ref().into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::FlowVariant;
    use crate::time::Rational;
    use uuid::Uuid;

    fn continuous_header(capacity: u64, word: u32, channels: u32) -> FlowHeader {
        FlowHeader::for_new_flow(
            Uuid::new_v4(),
            FlowVariant::Continuous,
            Rational::new(48000, 1),
            capacity,
            capacity * u64::from(word),
            0,
            0,
            channels,
            word,
            0,
            0,
            0,
        )
    }

    #[test]
    fn contiguous_batch_has_one_fragment() {
        let header = continuous_header(12000, 4, 2);
        let [first, second] = fragment_layout(&header, 100, 256);
        assert_eq!(first.0, header.payload_arena_offset + 100 * 4);
        assert_eq!(first.1, 256 * 4);
        assert_eq!(second.1, 0);
    }

    #[test]
    fn wrapping_batch_splits_into_two_fragments() {
        let header = continuous_header(12000, 4, 2);
        // 11990 + 20 crosses the 12000-sample boundary: 10 + 10.
        let [first, second] = fragment_layout(&header, 11990, 20);
        assert_eq!(first.0, header.payload_arena_offset + 11990 * 4);
        assert_eq!(first.1, 10 * 4);
        assert_eq!(second.0, header.payload_arena_offset);
        assert_eq!(second.1, 10 * 4);
    }

    #[test]
    fn layout_is_periodic_in_the_capacity() {
        let header = continuous_header(4096, 4, 1);
        let a = fragment_layout(&header, 17, 100);
        let b = fragment_layout(&header, 17 + 4096 * 3, 100);
        assert_eq!(a, b);
    }
}
