// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Grain reader implementation for discrete media flows.

use std::{sync::Arc, time::Duration};

use crate::{
    Error, FlowConfigInfo, FlowInfo, FlowRuntimeInfo, GrainData, Result,
    flow::reader::ReaderCore,
    time::{self, Timepoint},
};

/// Reader for discrete media grains (video frames, data packets).
///
/// Provides zero-copy access to grains stored in the flow's ring. Grains
/// are accessed by index; reads are validated by the per-slot seqlock, so a
/// successfully returned payload was written entirely before the publishing
/// fence. Blocking reads use a rate-aware adaptive poll.
///
/// # Thread Safety
///
/// `GrainReader` is `Send` but not `Sync`. Each reader should be used by
/// only one thread at a time, but can be transferred between threads.
///
/// # Examples
///
/// ```no_run
/// # use mxl_core::{Instance, GrainReader};
/// # use std::time::Duration;
/// # fn example(instance: Instance, reader: GrainReader) -> Result<(), mxl_core::Error> {
/// let info = reader.get_config_info();
/// let rate = info.grain_rate()?;
/// let index = instance.get_current_index(&rate);
///
/// // Blocking read with 5-second timeout
/// let grain = reader.get_complete_grain(index, Duration::from_secs(5))?;
/// println!("Read {} bytes", grain.payload.len());
/// # Ok(())
/// # }
/// ```
pub struct GrainReader {
    pub(crate) core: Arc<ReaderCore>,
    _not_sync: std::marker::PhantomData<*mut ()>,
}

// Safety: readers only perform atomic loads on the shared mapping; the
// handle itself is single-threaded.
unsafe impl Send for GrainReader {}

impl GrainReader {
    pub(crate) fn new(core: Arc<ReaderCore>) -> Self {
        Self {
            core,
            _not_sync: std::marker::PhantomData,
        }
    }

    /// Explicitly destroys this reader, releasing its mapping reference
    /// immediately.
    ///
    /// Normally the reader is destroyed automatically when dropped.
    pub fn destroy(self) -> Result<()> {
        drop(self);
        Ok(())
    }

    /// Retrieves complete flow information (config + runtime).
    pub fn get_info(&self) -> FlowInfo {
        FlowInfo {
            config: self.core.config_info(),
            runtime: self.core.runtime_info(),
        }
    }

    /// Retrieves flow configuration (variant, rate, ring geometry).
    pub fn get_config_info(&self) -> FlowConfigInfo {
        self.core.config_info()
    }

    /// Retrieves flow runtime state (head index, last write time).
    ///
    /// A lock-free snapshot taken with acquire ordering; useful for
    /// checking how much data is available before reading.
    pub fn get_runtime_info(&self) -> FlowRuntimeInfo {
        self.core.runtime_info()
    }

    /// Reads the grain at `index` without blocking.
    ///
    /// Returns immediately with a zero-copy view of whatever the slot holds
    /// for that index, which may be a partially valid grain (check
    /// [`crate::GrainInfo::is_complete`]).
    ///
    /// # Errors
    ///
    /// - [`Error::NotReady`] if the grain has not been committed yet
    /// - [`Error::Stale`] if the grain has been overwritten by a wrap-ahead
    /// - [`Error::UnderWrite`] if the slot stayed under an active write
    ///   generation past the bounded spin budget
    pub fn get_grain(&self, index: u64) -> Result<GrainData<'_>> {
        let snapshot = self.core.grain_snapshot(index)?;
        Ok(GrainData {
            payload: self
                .core
                .payload_slice(snapshot.payload_offset, snapshot.payload_len),
            info: snapshot.info,
        })
    }

    /// Blocks until the grain at `index` carries at least
    /// `min_valid_slices` valid slices, or `deadline` (absolute TAI
    /// nanoseconds) passes.
    ///
    /// # Errors
    ///
    /// - [`Error::Timeout`] when the deadline expires
    /// - [`Error::Stale`] if the grain wrapped out of history while waiting
    /// - [`Error::UnderWrite`] if the writer is gone or torn mid-commit
    pub fn wait_for_grain(
        &self,
        index: u64,
        min_valid_slices: u16,
        deadline: Timepoint,
    ) -> Result<()> {
        self.core.wait_for_grain(index, min_valid_slices, deadline)
    }

    /// Reads a complete grain, blocking with a relative timeout.
    ///
    /// Waits for the grain at `index` to be committed with all slices
    /// valid, retrying if partial data is encountered.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use mxl_core::GrainReader;
    /// # use std::time::Duration;
    /// # fn example(reader: GrainReader) -> Result<(), mxl_core::Error> {
    /// let grain = reader.get_complete_grain(100, Duration::from_secs(5))?;
    /// println!("Grain size: {} bytes", grain.payload.len());
    /// # Ok(())
    /// # }
    /// ```
    pub fn get_complete_grain(&self, index: u64, timeout: Duration) -> Result<GrainData<'_>> {
        let deadline = time::current_time().saturating_add(timeout.as_nanos() as i64);
        loop {
            match self.get_grain(index) {
                Ok(grain) if grain.info.is_complete() => return Ok(grain),
                Ok(partial) => {
                    // Partially committed: wait for the remaining slices.
                    let total = partial.info.total_slices;
                    self.core.wait_for_grain(index, total, deadline)?;
                }
                Err(Error::NotReady { .. }) | Err(Error::UnderWrite) => {
                    // Not committed (or still being written): wait for any
                    // commit, then re-check completeness.
                    self.core.wait_for_grain(index, 0, deadline)?;
                }
                Err(error) => return Err(error),
            }
        }
    }
}
