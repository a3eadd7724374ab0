// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! On-disk layout of a flow's backing file.
//!
//! A flow is one memory-mapped file:
//!
//! ```text
//! [0]            header, fixed 256 bytes, little-endian, written once
//! [schema]       opaque schema blob (CRC-32 checked, never interpreted)
//! [indexRing]    64-byte ring state + N x 64-byte slot records (discrete)
//! [payloadArena] N x cellSize bytes (discrete) or
//!                channels x cellSize bytes (continuous), 64-byte aligned
//! ```
//!
//! The header is immutable after creation; all mutable state lives in the
//! ring state and slot records, which are accessed exclusively through
//! atomics so that concurrently mapped processes never race on plain loads
//! and stores.

use std::sync::atomic::{AtomicI64, AtomicU8, AtomicU16, AtomicU64};

use static_assertions::const_assert_eq;
use uuid::Uuid;

use crate::{
    Error, Result,
    time::{Rational, Timepoint, UNDEFINED_INDEX},
};

/// File magic, first eight bytes of every flow file.
pub(crate) const MAGIC: u64 = u64::from_le_bytes(*b"MXLFLOW1");

/// On-disk format version checked on every open.
pub(crate) const FORMAT_VERSION: u16 = 1;

/// Fixed header size in bytes.
pub(crate) const HEADER_SIZE: usize = 256;

/// Size of the mutable ring-state record at `index_ring_offset`.
pub(crate) const RING_STATE_SIZE: usize = 64;

/// Size of one slot record in the index ring.
pub(crate) const SLOT_SIZE: usize = 64;

/// Alignment of the payload arena and of the structures preceding it.
pub(crate) const ARENA_ALIGNMENT: u64 = 64;

/// Slot has never been committed (or is mid-open).
pub(crate) const SLOT_EMPTY: u8 = 0;
/// Slot holds a committed grain.
pub(crate) const SLOT_COMMITTED: u8 = 1;
/// Slot's write session was cancelled; payload content is undefined.
pub(crate) const SLOT_CANCELLED: u8 = 2;

/// Whether a flow carries discrete grains or a continuous sample stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowVariant {
    /// One payload per index (a video frame, a data packet).
    Discrete,
    /// A dense stream of fixed-width samples indexed by sample number.
    Continuous,
}

impl FlowVariant {
    fn to_wire(self) -> u8 {
        match self {
            FlowVariant::Discrete => 0,
            FlowVariant::Continuous => 1,
        }
    }

    fn from_wire(value: u8) -> Result<Self> {
        match value {
            0 => Ok(FlowVariant::Discrete),
            1 => Ok(FlowVariant::Continuous),
            _ => Err(Error::Incompatible),
        }
    }
}

/// Decoded flow header.
///
/// For discrete flows `history_depth` is the slot/cell count N (a power of
/// two) and `cell_size` the grain payload capacity. For continuous flows
/// `history_depth` is the per-channel sample capacity and `cell_size` the
/// per-channel ring length in bytes (`history_depth * sample_word_size`);
/// the stride between channels equals `cell_size`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FlowHeader {
    pub flow_id: Uuid,
    pub variant: FlowVariant,
    pub edit_rate: Rational,
    pub history_depth: u64,
    pub cell_size: u64,
    pub index_ring_offset: u64,
    pub payload_arena_offset: u64,
    pub writer_epoch: u64,
    pub created_at: Timepoint,
    pub schema_offset: u64,
    pub schema_len: u64,
    pub schema_crc: u32,
    pub channel_count: u32,
    pub sample_word_size: u32,
    pub max_commit_batch_size_hint: u32,
    pub max_sync_batch_size_hint: u32,
}

impl FlowHeader {
    /// Builds a header for a new flow, computing section offsets from the
    /// schema length and ring geometry.
    #[allow(clippy::too_many_arguments)]
    pub fn for_new_flow(
        flow_id: Uuid,
        variant: FlowVariant,
        edit_rate: Rational,
        history_depth: u64,
        cell_size: u64,
        schema_len: u64,
        schema_crc: u32,
        channel_count: u32,
        sample_word_size: u32,
        max_commit_batch_size_hint: u32,
        max_sync_batch_size_hint: u32,
        created_at: Timepoint,
    ) -> Self {
        let schema_offset = HEADER_SIZE as u64;
        let index_ring_offset = align_up(schema_offset + schema_len, ARENA_ALIGNMENT);
        let ring_len = RING_STATE_SIZE as u64
            + match variant {
                FlowVariant::Discrete => history_depth * SLOT_SIZE as u64,
                FlowVariant::Continuous => 0,
            };
        let payload_arena_offset = align_up(index_ring_offset + ring_len, ARENA_ALIGNMENT);
        Self {
            flow_id,
            variant,
            edit_rate,
            history_depth,
            cell_size,
            index_ring_offset,
            payload_arena_offset,
            writer_epoch: 0,
            created_at,
            schema_offset,
            schema_len,
            schema_crc,
            channel_count,
            sample_word_size,
            max_commit_batch_size_hint,
            max_sync_batch_size_hint,
        }
    }

    /// Size of the payload arena in bytes.
    pub fn arena_len(&self) -> u64 {
        match self.variant {
            FlowVariant::Discrete => self.history_depth * self.cell_size,
            FlowVariant::Continuous => u64::from(self.channel_count) * self.cell_size,
        }
    }

    /// Total backing file length.
    pub fn file_len(&self) -> u64 {
        self.payload_arena_offset + self.arena_len()
    }

    /// Serializes the header into its fixed 256-byte little-endian form.
    pub fn encode(&self, out: &mut [u8]) {
        assert!(out.len() >= HEADER_SIZE);
        out[..HEADER_SIZE].fill(0);
        out[0..8].copy_from_slice(&MAGIC.to_le_bytes());
        out[8..10].copy_from_slice(&FORMAT_VERSION.to_le_bytes());
        out[10] = self.variant.to_wire();
        // [11..16] reserved
        out[16..32].copy_from_slice(self.flow_id.as_bytes());
        out[32..40].copy_from_slice(&self.edit_rate.numerator.to_le_bytes());
        out[40..48].copy_from_slice(&self.edit_rate.denominator.to_le_bytes());
        out[48..56].copy_from_slice(&self.history_depth.to_le_bytes());
        out[56..64].copy_from_slice(&self.cell_size.to_le_bytes());
        out[64..72].copy_from_slice(&self.index_ring_offset.to_le_bytes());
        out[72..80].copy_from_slice(&self.payload_arena_offset.to_le_bytes());
        out[80..88].copy_from_slice(&self.writer_epoch.to_le_bytes());
        out[88..96].copy_from_slice(&self.created_at.to_le_bytes());
        out[96..104].copy_from_slice(&self.schema_offset.to_le_bytes());
        out[104..112].copy_from_slice(&self.schema_len.to_le_bytes());
        out[112..116].copy_from_slice(&self.schema_crc.to_le_bytes());
        out[116..120].copy_from_slice(&self.channel_count.to_le_bytes());
        out[120..124].copy_from_slice(&self.sample_word_size.to_le_bytes());
        out[124..128].copy_from_slice(&self.max_commit_batch_size_hint.to_le_bytes());
        out[128..132].copy_from_slice(&self.max_sync_batch_size_hint.to_le_bytes());
        // [132..256] padding
    }

    /// Decodes and validates a header read from a mapped flow file.
    ///
    /// Magic or version mismatch, an unknown variant, or internally
    /// inconsistent offsets all yield [`Error::Incompatible`].
    pub fn decode(raw: &[u8]) -> Result<Self> {
        if raw.len() < HEADER_SIZE {
            return Err(Error::Incompatible);
        }
        if u64::from_le_bytes(raw[0..8].try_into().unwrap()) != MAGIC {
            return Err(Error::Incompatible);
        }
        if u16::from_le_bytes(raw[8..10].try_into().unwrap()) != FORMAT_VERSION {
            return Err(Error::Incompatible);
        }
        let variant = FlowVariant::from_wire(raw[10])?;
        let header = Self {
            variant,
            flow_id: Uuid::from_bytes(raw[16..32].try_into().unwrap()),
            edit_rate: Rational::new(
                i64::from_le_bytes(raw[32..40].try_into().unwrap()),
                i64::from_le_bytes(raw[40..48].try_into().unwrap()),
            ),
            history_depth: u64::from_le_bytes(raw[48..56].try_into().unwrap()),
            cell_size: u64::from_le_bytes(raw[56..64].try_into().unwrap()),
            index_ring_offset: u64::from_le_bytes(raw[64..72].try_into().unwrap()),
            payload_arena_offset: u64::from_le_bytes(raw[72..80].try_into().unwrap()),
            writer_epoch: u64::from_le_bytes(raw[80..88].try_into().unwrap()),
            created_at: i64::from_le_bytes(raw[88..96].try_into().unwrap()),
            schema_offset: u64::from_le_bytes(raw[96..104].try_into().unwrap()),
            schema_len: u64::from_le_bytes(raw[104..112].try_into().unwrap()),
            schema_crc: u32::from_le_bytes(raw[112..116].try_into().unwrap()),
            channel_count: u32::from_le_bytes(raw[116..120].try_into().unwrap()),
            sample_word_size: u32::from_le_bytes(raw[120..124].try_into().unwrap()),
            max_commit_batch_size_hint: u32::from_le_bytes(raw[124..128].try_into().unwrap()),
            max_sync_batch_size_hint: u32::from_le_bytes(raw[128..132].try_into().unwrap()),
        };
        header.validate()?;
        Ok(header)
    }

    fn validate(&self) -> Result<()> {
        if !self.edit_rate.is_positive() {
            return Err(Error::Incompatible);
        }
        if self.history_depth == 0 || self.cell_size == 0 {
            return Err(Error::Incompatible);
        }
        match self.variant {
            FlowVariant::Discrete => {
                if !self.history_depth.is_power_of_two() {
                    return Err(Error::Incompatible);
                }
            }
            FlowVariant::Continuous => {
                if self.channel_count == 0
                    || self.sample_word_size == 0
                    || self.cell_size != self.history_depth * u64::from(self.sample_word_size)
                {
                    return Err(Error::Incompatible);
                }
            }
        }
        // Offsets must match what we would compute for this geometry.
        let expected = Self::for_new_flow(
            self.flow_id,
            self.variant,
            self.edit_rate,
            self.history_depth,
            self.cell_size,
            self.schema_len,
            self.schema_crc,
            self.channel_count,
            self.sample_word_size,
            self.max_commit_batch_size_hint,
            self.max_sync_batch_size_hint,
            self.created_at,
        );
        if self.schema_offset != expected.schema_offset
            || self.index_ring_offset != expected.index_ring_offset
            || self.payload_arena_offset != expected.payload_arena_offset
        {
            return Err(Error::Incompatible);
        }
        Ok(())
    }
}

/// Mutable per-flow state, first record of the index ring region.
///
/// `head_index` is the highest committed index, [`UNDEFINED_INDEX`] while
/// the flow is empty. The writer publishes it with release ordering after
/// the payload stores; readers load it with acquire ordering.
#[repr(C)]
pub(crate) struct RingState {
    pub head_index: AtomicU64,
    pub last_write_time: AtomicI64,
    _pad: [u8; RING_STATE_SIZE - 16],
}

const_assert_eq!(std::mem::size_of::<RingState>(), RING_STATE_SIZE);

/// One slot record in the index ring of a discrete flow.
///
/// Publication follows the seqlock protocol: `generation` is bumped to odd
/// before any field or payload mutation and back to even after, both with
/// release ordering. A slot is readable iff its generation is even, stable
/// across the read, its `status` is [`SLOT_COMMITTED`], and its `index`
/// equals the requested index.
#[repr(C)]
pub(crate) struct SlotRecord {
    pub index: AtomicU64,
    pub generation: AtomicU64,
    pub commit_timestamp: AtomicI64,
    pub payload_offset: AtomicU64,
    pub payload_len: AtomicU64,
    pub total_slices: AtomicU16,
    pub valid_slices: AtomicU16,
    pub status: AtomicU8,
    _pad: [u8; SLOT_SIZE - 45],
}

const_assert_eq!(std::mem::size_of::<SlotRecord>(), SLOT_SIZE);

/// Rounds `value` up to the next multiple of `alignment` (a power of two).
pub(crate) const fn align_up(value: u64, alignment: u64) -> u64 {
    (value + alignment - 1) & !(alignment - 1)
}

/// Byte offsets of the runtime fields that must be pre-initialized to a
/// non-zero pattern before the header becomes visible.
pub(crate) mod raw {
    /// `RingState::head_index` offset within the ring state record.
    pub const RING_HEAD_INDEX: usize = 0;
    /// `SlotRecord::index` offset within a slot record.
    pub const SLOT_INDEX: usize = 0;
}

/// Writes the initial runtime state (empty head, undefined slot indices)
/// into a freshly created, still-private mapping using plain stores.
///
/// Must only be called before the header is written, while no reader can
/// have located the ring region.
pub(crate) fn init_runtime_region(buf: &mut [u8], header: &FlowHeader) {
    let ring = header.index_ring_offset as usize;
    buf[ring + raw::RING_HEAD_INDEX..ring + raw::RING_HEAD_INDEX + 8]
        .copy_from_slice(&UNDEFINED_INDEX.to_ne_bytes());
    if header.variant == FlowVariant::Discrete {
        for slot in 0..header.history_depth as usize {
            let base = ring + RING_STATE_SIZE + slot * SLOT_SIZE;
            buf[base + raw::SLOT_INDEX..base + raw::SLOT_INDEX + 8]
                .copy_from_slice(&UNDEFINED_INDEX.to_ne_bytes());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn discrete_header() -> FlowHeader {
        FlowHeader::for_new_flow(
            Uuid::new_v4(),
            FlowVariant::Discrete,
            Rational::new(25, 1),
            8,
            4096,
            100,
            0xDEAD_BEEF,
            0,
            0,
            0,
            0,
            1_234_567_890,
        )
    }

    #[test]
    fn header_roundtrip() {
        let header = discrete_header();
        let mut raw = [0u8; HEADER_SIZE];
        header.encode(&mut raw);
        let decoded = FlowHeader::decode(&raw).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn offsets_are_aligned_and_ordered() {
        let header = discrete_header();
        assert_eq!(header.schema_offset, HEADER_SIZE as u64);
        assert_eq!(header.index_ring_offset % ARENA_ALIGNMENT, 0);
        assert_eq!(header.payload_arena_offset % ARENA_ALIGNMENT, 0);
        assert!(header.index_ring_offset >= header.schema_offset + header.schema_len);
        assert!(
            header.payload_arena_offset
                >= header.index_ring_offset + RING_STATE_SIZE as u64 + 8 * SLOT_SIZE as u64
        );
        assert_eq!(header.file_len(), header.payload_arena_offset + 8 * 4096);
    }

    #[test]
    fn bad_magic_and_version_are_incompatible() {
        let header = discrete_header();
        let mut raw = [0u8; HEADER_SIZE];
        header.encode(&mut raw);

        let mut corrupt = raw;
        corrupt[0] ^= 0xFF;
        assert!(matches!(
            FlowHeader::decode(&corrupt),
            Err(Error::Incompatible)
        ));

        let mut corrupt = raw;
        corrupt[8] = 0xFF;
        assert!(matches!(
            FlowHeader::decode(&corrupt),
            Err(Error::Incompatible)
        ));

        let mut corrupt = raw;
        corrupt[10] = 7; // unknown variant
        assert!(matches!(
            FlowHeader::decode(&corrupt),
            Err(Error::Incompatible)
        ));
    }

    #[test]
    fn non_power_of_two_discrete_history_is_rejected() {
        let mut header = discrete_header();
        header.history_depth = 6;
        let mut raw = [0u8; HEADER_SIZE];
        header.encode(&mut raw);
        assert!(matches!(FlowHeader::decode(&raw), Err(Error::Incompatible)));
    }

    #[test]
    fn continuous_header_geometry() {
        let header = FlowHeader::for_new_flow(
            Uuid::new_v4(),
            FlowVariant::Continuous,
            Rational::new(48000, 1),
            12000,
            48000,
            0,
            0,
            2,
            4,
            1024,
            512,
            0,
        );
        let mut raw = [0u8; HEADER_SIZE];
        header.encode(&mut raw);
        let decoded = FlowHeader::decode(&raw).unwrap();
        assert_eq!(decoded.arena_len(), 2 * 48000);
        // Continuous ring region carries only the ring state record.
        assert_eq!(
            decoded.payload_arena_offset,
            align_up(
                decoded.index_ring_offset + RING_STATE_SIZE as u64,
                ARENA_ALIGNMENT
            )
        );
    }

    #[test]
    fn init_runtime_region_marks_everything_undefined() {
        let header = discrete_header();
        let mut buf = vec![0u8; header.file_len() as usize];
        init_runtime_region(&mut buf, &header);
        let ring = header.index_ring_offset as usize;
        assert_eq!(
            buf[ring..ring + 8],
            UNDEFINED_INDEX.to_ne_bytes(),
            "head index"
        );
        let slot0 = ring + RING_STATE_SIZE;
        assert_eq!(buf[slot0..slot0 + 8], UNDEFINED_INDEX.to_ne_bytes());
    }
}
