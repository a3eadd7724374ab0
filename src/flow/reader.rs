// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Generic flow reader implementation.
//!
//! Provides [`FlowReader`], a type-erased reader that can be converted to
//! either [`crate::GrainReader`] or [`crate::SamplesReader`] based on the
//! flow variant, and the shared read-side protocol both typed readers and
//! the synchronization group drive.

use std::sync::{Arc, atomic::Ordering};

use crate::{
    Error, FlowConfigInfo, FlowInfo, FlowRuntimeInfo, GrainReader, Result, SamplesReader,
    arena::Arena,
    grain::data::GrainInfo,
    layout::{FlowVariant, SLOT_COMMITTED},
    samples::data::fragment_layout,
    time::{self, UNDEFINED_INDEX},
};

/// Bounded number of seqlock retries before a persistently odd generation
/// is reported as [`Error::UnderWrite`].
const SEQLOCK_SPIN_BUDGET: u32 = 4096;

/// Smallest sleep issued by the adaptive polls, so a passed-but-missing
/// index does not degenerate into a busy loop.
const MIN_POLL_NS: u64 = 100_000;

/// A validated snapshot of one committed grain slot.
pub(crate) struct GrainSnapshot {
    pub info: GrainInfo,
    pub payload_offset: u64,
    pub payload_len: usize,
}

/// Shared read-side state for one flow handle.
///
/// Every typed reader owns an `Arc<ReaderCore>`; the synchronization group
/// holds `Weak` references to the same allocation, which is what gives
/// reader handles their identity and lets the group detect destroyed
/// readers.
pub(crate) struct ReaderCore {
    pub(crate) arena: Arc<Arena>,
}

impl ReaderCore {
    pub fn new(arena: Arc<Arena>) -> Self {
        Self { arena }
    }

    /// Lock-free snapshot of the flow's runtime state.
    pub fn runtime_info(&self) -> FlowRuntimeInfo {
        let header = self.arena.header();
        let ring = self.arena.ring_state();
        FlowRuntimeInfo {
            head_index: ring.head_index.load(Ordering::Acquire),
            edit_rate: header.edit_rate,
            variant: header.variant,
            history_depth: header.history_depth,
            last_write_time: ring.last_write_time.load(Ordering::Relaxed),
        }
    }

    pub fn config_info(&self) -> FlowConfigInfo {
        FlowConfigInfo::from_header(self.arena.header())
    }

    /// Reads the slot for `index` under the seqlock protocol.
    ///
    /// A snapshot is accepted iff the generation was even and unchanged
    /// across the field reads, the slot is committed, and its recorded
    /// index equals the request. A newer recorded index means the request
    /// wrapped out of history ([`Error::Stale`]); an older or undefined one
    /// means it has not been written yet ([`Error::NotReady`]).
    pub fn grain_snapshot(&self, index: u64) -> Result<GrainSnapshot> {
        if index == UNDEFINED_INDEX {
            return Err(Error::BadArg);
        }
        let header = self.arena.header();
        debug_assert_eq!(header.variant, FlowVariant::Discrete);
        let slot = self.arena.slot(index & (header.history_depth - 1));

        let mut spins = 0u32;
        loop {
            let gen_before = slot.generation.load(Ordering::Acquire);
            if gen_before % 2 == 1 {
                spins += 1;
                if spins > SEQLOCK_SPIN_BUDGET {
                    return Err(Error::UnderWrite);
                }
                std::hint::spin_loop();
                continue;
            }

            let slot_index = slot.index.load(Ordering::Relaxed);
            let status = slot.status.load(Ordering::Relaxed);
            let total_slices = slot.total_slices.load(Ordering::Relaxed);
            let valid_slices = slot.valid_slices.load(Ordering::Relaxed);
            let commit_timestamp = slot.commit_timestamp.load(Ordering::Relaxed);
            let payload_offset = slot.payload_offset.load(Ordering::Relaxed);
            let payload_len = slot.payload_len.load(Ordering::Relaxed);

            // The fence keeps the field reads above from drifting past the
            // generation re-check below.
            std::sync::atomic::fence(Ordering::Acquire);
            let gen_after = slot.generation.load(Ordering::Acquire);
            if gen_before != gen_after {
                spins += 1;
                if spins > SEQLOCK_SPIN_BUDGET {
                    return Err(Error::UnderWrite);
                }
                std::hint::spin_loop();
                continue;
            }

            return if slot_index == index && status == SLOT_COMMITTED {
                Ok(GrainSnapshot {
                    info: GrainInfo {
                        index,
                        total_slices,
                        valid_slices,
                        commit_timestamp,
                        payload_len: payload_len as u64,
                    },
                    payload_offset,
                    payload_len: payload_len as usize,
                })
            } else if slot_index != UNDEFINED_INDEX && slot_index > index {
                Err(Error::Stale)
            } else {
                Err(Error::NotReady { available: 0 })
            };
        }
    }

    /// Blocks until the grain at `index` is committed with at least
    /// `min_valid_slices` valid slices, or `deadline` (absolute TAI) passes.
    ///
    /// Implemented as a bounded adaptive poll: a snapshot attempt, then a
    /// sleep sized by the rate-derived time until the index is due. No
    /// futex lives in the shared region.
    ///
    /// A slot still under an open write generation keeps the wait alive (a
    /// live writer may simply be filling the payload); only a deadline that
    /// expires in that state reports [`Error::UnderWrite`], the signature
    /// of a writer that died mid-commit.
    pub fn wait_for_grain(
        &self,
        index: u64,
        min_valid_slices: u16,
        deadline: time::Timepoint,
    ) -> Result<()> {
        let rate = self.arena.header().edit_rate;
        let mut under_write = false;
        loop {
            match self.grain_snapshot(index) {
                Ok(snapshot) if snapshot.info.valid_slices >= min_valid_slices => return Ok(()),
                Ok(_) | Err(Error::NotReady { .. }) => under_write = false,
                Err(Error::UnderWrite) => under_write = true,
                Err(error) => return Err(error),
            }
            sleep_until_retry(index, rate, deadline).map_err(|error| {
                if under_write && matches!(error, Error::Timeout) {
                    Error::UnderWrite
                } else {
                    error
                }
            })?;
        }
    }

    /// Computes the committed fragment window for `count` samples starting
    /// at `start_index`.
    pub fn sample_window(&self, start_index: u64, count: u64) -> Result<SampleWindow> {
        let header = self.arena.header();
        debug_assert_eq!(header.variant, FlowVariant::Continuous);
        let capacity = header.history_depth;
        if count == 0 || count > capacity || start_index == UNDEFINED_INDEX {
            return Err(Error::BadArg);
        }
        let last = start_index.checked_add(count - 1).ok_or(Error::BadArg)?;

        let head = self.arena.ring_state().head_index.load(Ordering::Acquire);
        if head == UNDEFINED_INDEX {
            return Err(Error::NotReady { available: 0 });
        }
        if last > head {
            let available = if head >= start_index {
                head - start_index + 1
            } else {
                0
            };
            return Err(Error::NotReady { available });
        }
        let oldest = (head + 1).saturating_sub(capacity);
        if start_index < oldest {
            return Err(Error::Stale);
        }

        Ok(SampleWindow {
            fragments: fragment_layout(header, start_index, count),
            stride: header.cell_size as usize,
            channels: header.channel_count as usize,
        })
    }

    /// Blocks until `head_index >= index` or `deadline` passes.
    pub fn wait_for_samples(&self, index: u64, deadline: time::Timepoint) -> Result<()> {
        if index == UNDEFINED_INDEX {
            return Err(Error::BadArg);
        }
        let rate = self.arena.header().edit_rate;
        loop {
            let head = self.arena.ring_state().head_index.load(Ordering::Acquire);
            if head != UNDEFINED_INDEX && head >= index {
                return Ok(());
            }
            sleep_until_retry(index, rate, deadline)?;
        }
    }

    /// Variant-dispatched wait used by the synchronization group.
    pub fn wait_for_data(
        &self,
        index: u64,
        min_valid_slices: u16,
        deadline: time::Timepoint,
    ) -> Result<()> {
        match self.arena.header().variant {
            FlowVariant::Discrete => self.wait_for_grain(index, min_valid_slices, deadline),
            FlowVariant::Continuous => self.wait_for_samples(index, deadline),
        }
    }

    /// Borrows `len` payload bytes at absolute file offset `offset`.
    ///
    /// Safety: the offset/len pair must come from a validated snapshot or
    /// window, which keeps it inside the payload arena.
    pub fn payload_slice(&self, offset: u64, len: usize) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.arena.base().add(offset as usize), len) }
    }
}

/// Per-channel fragment window inside the continuous arena.
pub(crate) struct SampleWindow {
    /// Up to two `(file offset, byte length)` fragments for channel 0.
    pub fragments: [(u64, usize); 2],
    /// Byte stride between consecutive channels.
    pub stride: usize,
    /// Number of channels.
    pub channels: usize,
}

/// One adaptive-poll pause: checks the deadline, then sleeps the
/// rate-derived time until `index` is due, clamped to the deadline.
fn sleep_until_retry(index: u64, rate: crate::Rational, deadline: time::Timepoint) -> Result<()> {
    let now = time::current_time();
    if now >= deadline {
        return Err(Error::Timeout);
    }
    let remaining = (deadline - now) as u64;
    let until_due = match time::ns_until_index(index, rate) {
        u64::MAX => MIN_POLL_NS,
        ns => ns,
    };
    time::sleep_for_ns(until_due.max(MIN_POLL_NS).min(remaining));
    Ok(())
}

/// Generic flow reader handle.
///
/// This is the initial reader type returned by
/// [`crate::Instance::create_flow_reader`]. It must be converted to a typed
/// reader ([`GrainReader`] or [`SamplesReader`]) matching the flow variant.
///
/// # Examples
///
/// ```no_run
/// # use mxl_core::Instance;
/// # fn example(instance: Instance) -> Result<(), mxl_core::Error> {
/// let reader = instance.create_flow_reader("6b1e6d24-9d35-4b62-8e8e-0123456789ab")?;
///
/// if reader.get_info().config.is_discrete_flow() {
///     let grain_reader = reader.to_grain_reader()?;
///     // Use grain_reader for video/data
/// } else {
///     let samples_reader = reader.to_samples_reader()?;
///     // Use samples_reader for audio
/// }
/// # Ok(())
/// # }
/// ```
pub struct FlowReader {
    core: Arc<ReaderCore>,
    // Readers are Send but deliberately not Sync: each handle belongs to
    // one thread at a time.
    _not_sync: std::marker::PhantomData<*mut ()>,
}

// Safety: all shared state behind the handle is atomics over a shared
// mapping; only the handle itself is single-threaded.
unsafe impl Send for FlowReader {}

impl FlowReader {
    pub(crate) fn new(core: Arc<ReaderCore>) -> Self {
        Self {
            core,
            _not_sync: std::marker::PhantomData,
        }
    }

    /// Retrieves complete flow information (config + runtime).
    pub fn get_info(&self) -> FlowInfo {
        FlowInfo {
            config: self.core.config_info(),
            runtime: self.core.runtime_info(),
        }
    }

    /// Converts this generic reader into a [`GrainReader`] for discrete
    /// flows.
    ///
    /// # Errors
    ///
    /// Returns an error if the flow is continuous (audio). Check the flow
    /// variant with [`Self::get_info`] first if unsure.
    pub fn to_grain_reader(self) -> Result<GrainReader> {
        if self.core.arena.header().variant != FlowVariant::Discrete {
            return Err(Error::Other(
                "Cannot convert FlowReader to GrainReader for a continuous flow.".to_string(),
            ));
        }
        Ok(GrainReader::new(self.core))
    }

    /// Converts this generic reader into a [`SamplesReader`] for continuous
    /// flows.
    ///
    /// # Errors
    ///
    /// Returns an error if the flow is discrete (video/data). Check the
    /// flow variant with [`Self::get_info`] first if unsure.
    pub fn to_samples_reader(self) -> Result<SamplesReader> {
        if self.core.arena.header().variant != FlowVariant::Continuous {
            return Err(Error::Other(
                "Cannot convert FlowReader to SamplesReader for a discrete flow.".to_string(),
            ));
        }
        Ok(SamplesReader::new(self.core))
    }
}
