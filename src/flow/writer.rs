// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Generic flow writer implementation.
//!
//! Provides [`FlowWriter`], a type-erased writer that can be converted to
//! either [`crate::GrainWriter`] or [`crate::SamplesWriter`] based on the
//! flow variant.

use std::sync::atomic::{AtomicBool, Ordering};

use uuid::Uuid;

use crate::{
    Error, GrainWriter, Result, SamplesWriter,
    arena::{Arena, WriterLock},
    layout::FlowVariant,
    time::{Timepoint, UNDEFINED_INDEX},
};

/// Write-side state for one flow: the read-write mapping plus the exclusive
/// advisory lock that enforces the single-writer rule.
pub(crate) struct WriterCore {
    pub(crate) arena: Arena,
    /// Slice count each opened grain advertises (discrete flows).
    pub(crate) total_slices: u16,
    /// Guards against a second write session while one is outstanding.
    pub(crate) session_open: AtomicBool,
    _lock: WriterLock,
}

impl WriterCore {
    pub fn new(arena: Arena, total_slices: u16, lock: WriterLock) -> Self {
        Self {
            arena,
            total_slices,
            session_open: AtomicBool::new(false),
            _lock: lock,
        }
    }

    /// Publishes a new head index with release ordering, never moving it
    /// backwards, and records the commit time.
    pub fn publish_head(&self, index: u64, now: Timepoint) {
        let ring = self.arena.ring_state();
        let head = ring.head_index.load(Ordering::Relaxed);
        if head == UNDEFINED_INDEX || index > head {
            ring.head_index.store(index, Ordering::Release);
        }
        ring.last_write_time.store(now, Ordering::Relaxed);
    }
}

/// Generic flow writer handle.
///
/// This is the initial writer type returned by
/// [`crate::Instance::create_flow_writer`]. It must be converted to a typed
/// writer ([`GrainWriter`] or [`SamplesWriter`]) matching the flow variant.
///
/// The writer owns the flow's exclusive lock for its lifetime; dropping it
/// (or the typed writer derived from it) releases the flow for a successor.
///
/// # Examples
///
/// ```no_run
/// # use mxl_core::Instance;
/// # fn example(instance: Instance, config: mxl_core::FlowConfig) -> Result<(), mxl_core::Error> {
/// let (writer, info, _was_created) = instance.create_flow_writer(&config)?;
///
/// if info.is_discrete_flow() {
///     let grain_writer = writer.to_grain_writer()?;
///     // Use grain_writer for video/data
/// } else {
///     let samples_writer = writer.to_samples_writer()?;
///     // Use samples_writer for audio
/// }
/// # Ok(())
/// # }
/// ```
pub struct FlowWriter {
    core: WriterCore,
    id: Uuid,
    // Writers are Send but deliberately not Sync: the seqlock write side
    // assumes one mutating thread.
    _not_sync: std::marker::PhantomData<*mut ()>,
}

// Safety: the handle owns its mapping and lock; shared-memory mutation goes
// through atomics under the single-writer protocol.
unsafe impl Send for FlowWriter {}

impl FlowWriter {
    pub(crate) fn new(core: WriterCore, id: Uuid) -> Self {
        Self {
            core,
            id,
            _not_sync: std::marker::PhantomData,
        }
    }

    /// Returns the identifier of the flow this writer owns.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Converts this generic writer into a [`GrainWriter`] for discrete
    /// flows.
    ///
    /// # Errors
    ///
    /// Returns an error if the flow is continuous (audio).
    pub fn to_grain_writer(self) -> Result<GrainWriter> {
        if self.core.arena.header().variant != FlowVariant::Discrete {
            return Err(Error::Other(
                "Cannot convert FlowWriter to GrainWriter for a continuous flow.".to_string(),
            ));
        }
        Ok(GrainWriter::new(self.core))
    }

    /// Converts this generic writer into a [`SamplesWriter`] for continuous
    /// flows.
    ///
    /// # Errors
    ///
    /// Returns an error if the flow is discrete (video/data).
    pub fn to_samples_writer(self) -> Result<SamplesWriter> {
        if self.core.arena.header().variant != FlowVariant::Continuous {
            return Err(Error::Other(
                "Cannot convert FlowWriter to SamplesWriter for a discrete flow.".to_string(),
            ));
        }
        Ok(SamplesWriter::new(self.core))
    }
}
