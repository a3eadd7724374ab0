// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Sample reader implementation for continuous media flows.

use std::{sync::Arc, time::Duration};

use crate::{
    FlowConfigInfo, FlowInfo, FlowRuntimeInfo, Result, SamplesData,
    flow::reader::ReaderCore,
    samples::data::WrappedMultiBufferSlice,
    time::{self, Timepoint},
};

/// Reader for continuous audio sample streams.
///
/// Provides zero-copy access to multi-channel audio samples stored in the
/// flow's ring. Readers see only committed prefixes: a sample span is
/// readable once the writer's head index has advanced past its last sample.
///
/// # Thread Safety
///
/// `SamplesReader` is `Send` but not `Sync`. Each reader should be used by
/// only one thread at a time, but can be transferred between threads.
///
/// # Examples
///
/// ```no_run
/// # use mxl_core::{Instance, SamplesReader};
/// # fn example(instance: Instance, reader: SamplesReader) -> Result<(), mxl_core::Error> {
/// let info = reader.get_runtime_info();
///
/// if info.has_data() {
///     // Read the most recent 480 samples (10ms at 48kHz)
///     let start = info.head_index.saturating_sub(479);
///     let samples = reader.get_samples(start, 480)?;
///     println!("Read {} channels", samples.num_of_channels());
/// }
/// # Ok(())
/// # }
/// ```
pub struct SamplesReader {
    pub(crate) core: Arc<ReaderCore>,
    _not_sync: std::marker::PhantomData<*mut ()>,
}

// Safety: readers only perform atomic loads on the shared mapping; the
// handle itself is single-threaded.
unsafe impl Send for SamplesReader {}

impl SamplesReader {
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

    /// Retrieves flow configuration (rate, channel count, ring geometry).
    pub fn get_config_info(&self) -> FlowConfigInfo {
        self.core.config_info()
    }

    /// Retrieves flow runtime state (head index, last write time).
    pub fn get_runtime_info(&self) -> FlowRuntimeInfo {
        self.core.runtime_info()
    }

    /// Reads `count` samples starting at `start_index` without blocking.
    ///
    /// The span may straddle the ring boundary, in which case each
    /// channel's data comes back as two fragments.
    ///
    /// # Errors
    ///
    /// - [`Error::NotReady`](crate::Error::NotReady) if part of the span is
    ///   not committed yet; the error carries the number of samples that
    ///   *are* available from `start_index`
    /// - [`Error::Stale`](crate::Error::Stale) if the span has been
    ///   overwritten by newer data
    /// - [`Error::BadArg`](crate::Error::BadArg) if `count` is zero or
    ///   exceeds the ring capacity
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use mxl_core::{Error, SamplesReader};
    /// # fn example(reader: SamplesReader) -> Result<(), mxl_core::Error> {
    /// match reader.get_samples(500, 1024) {
    ///     Ok(samples) => println!("Got {} channels", samples.num_of_channels()),
    ///     Err(Error::NotReady { available }) => {
    ///         println!("Only {available} samples committed so far")
    ///     }
    ///     Err(other) => return Err(other),
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub fn get_samples(&self, start_index: u64, count: u64) -> Result<SamplesData<'_>> {
        let window = self.core.sample_window(start_index, count)?;
        let base = self.core.arena.base();
        // Safety: the window offsets were validated against the arena.
        let fragments = unsafe {
            [
                (base.add(window.fragments[0].0 as usize), window.fragments[0].1),
                (base.add(window.fragments[1].0 as usize), window.fragments[1].1),
            ]
        };
        Ok(SamplesData::new(
            WrappedMultiBufferSlice {
                fragments,
                stride: window.stride,
                count: window.channels,
            },
            count,
        ))
    }

    /// Blocks until the head index reaches `index` or `deadline` (absolute
    /// TAI nanoseconds) passes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`](crate::Error::Timeout) when the deadline
    /// expires first.
    pub fn wait_for_samples(&self, index: u64, deadline: Timepoint) -> Result<()> {
        self.core.wait_for_samples(index, deadline)
    }

    /// Reads `count` samples starting at `start_index`, blocking with a
    /// relative timeout until the whole span is committed.
    pub fn get_samples_blocking(
        &self,
        start_index: u64,
        count: u64,
        timeout: Duration,
    ) -> Result<SamplesData<'_>> {
        let deadline = time::current_time().saturating_add(timeout.as_nanos() as i64);
        let last = start_index.saturating_add(count.saturating_sub(1));
        self.core.wait_for_samples(last, deadline)?;
        self.get_samples(start_index, count)
    }
}
