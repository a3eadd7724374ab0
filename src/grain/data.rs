// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Grain data structures for zero-copy media access.

use crate::time::Timepoint;

/// Metadata of one committed grain, as recorded in its index slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GrainInfo {
    /// The grain's index.
    pub index: u64,
    /// Number of slices the grain is divided into.
    pub total_slices: u16,
    /// Number of slices that were valid at commit time.
    pub valid_slices: u16,
    /// TAI timestamp of the commit.
    pub commit_timestamp: Timepoint,
    /// Payload length in bytes.
    pub payload_len: u64,
}

impl GrainInfo {
    /// Returns `true` if every slice of the grain is valid.
    pub fn is_complete(&self) -> bool {
        self.valid_slices == self.total_slices
    }
}

/// Zero-copy view of a grain's payload data.
///
/// Provides read-only access to a grain stored in the flow's payload arena.
/// The lifetime `'a` is tied to the [`crate::GrainReader`] that produced it.
///
/// The bytes were fully written before the publishing fence that made the
/// grain visible; a later wrap-around of the ring may however reuse the
/// cell. Copy with [`Self::to_owned`] when the data must outlive the ring's
/// history window.
pub struct GrainData<'a> {
    /// The grain payload bytes.
    pub payload: &'a [u8],
    /// The grain's slot metadata at the time of the read.
    pub info: GrainInfo,
}

impl<'a> GrainData<'a> {
    /// Creates an owned copy of this grain's payload.
    ///
    /// Allocates a `Vec` and copies the payload bytes. Use this when you
    /// need to store the grain data beyond the reader's lifetime.
    pub fn to_owned(&self) -> OwnedGrainData {
        self.into()
    }
}

impl<'a> AsRef<GrainData<'a>> for GrainData<'a> {
    fn as_ref(&self) -> &GrainData<'a> {
        self
    }
}

/// Owned copy of grain payload data.
///
/// Unlike [`GrainData`], this owns its data and can outlive the reader.
pub struct OwnedGrainData {
    /// Owned copy of the grain payload bytes.
    pub payload: Vec<u8>,
    /// The grain's slot metadata at the time of the read.
    pub info: GrainInfo,
}

impl<'a> From<&GrainData<'a>> for OwnedGrainData {
    fn from(value: &GrainData<'a>) -> Self {
        Self {
            payload: value.payload.to_vec(),
            info: value.info,
        }
    }
}

impl<'a> From<GrainData<'a>> for OwnedGrainData {
    fn from(value: GrainData<'a>) -> Self {
        value.as_ref().into()
    }
}
