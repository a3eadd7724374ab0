// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Multi-flow synchronization.
//!
//! A [`SynchronizationGroup`] is a set of weak references to flow readers
//! that can be used to wait for data availability on all flows of the group
//! at once, anchored to a common origin timepoint.
//!
//! The group never owns its readers: entries hold weak handles, and a
//! destroyed reader surfaces as [`Error::ReaderGone`] on the next wait
//! rather than undefined behavior.

use std::sync::Weak;

use crate::{
    Error, GrainReader, Result, SamplesReader,
    flow::reader::ReaderCore,
    time::{self, Rational, Timepoint, UNDEFINED_INDEX},
};

/// Per-entry wait policy, a tagged sum dispatched at the wait call site.
#[derive(Debug, Clone, Copy)]
enum Policy {
    /// Discrete reader: admit grains with at least this many valid slices.
    Discrete { min_valid_slices: u16 },
    /// Continuous reader: head index alone gates admission.
    Continuous,
}

struct Entry {
    /// Weak handle to the reader's shared core; dereferenced per-operation.
    reader: Weak<ReaderCore>,
    policy: Policy,
    /// Cached copy of the flow's grain/sample rate for localized access.
    grain_rate: Rational,
    /// The maximum source delay opportunistically observed for this flow.
    max_observed_source_delay: i64,
}

/// A set of weak references to flow readers that can be checked for data
/// availability at a shared timepoint.
///
/// # Adaptive ordering
///
/// [`Self::wait_for_data_at`] visits entries in list order. Whenever a
/// blocking wait succeeds and the observed source delay of that flow
/// exceeds every delay previously observed for the flow at the head of the
/// list, the entry is moved to the front. Pre-blocking on the slowest
/// source first amortizes the wait across the remaining flows, which are
/// then very likely already satisfied when polled.
///
/// # Examples
///
/// ```no_run
/// # use mxl_core::{Instance, SynchronizationGroup};
/// # fn example(instance: Instance) -> Result<(), mxl_core::Error> {
/// let video = instance
///     .create_flow_reader("6b1e6d24-9d35-4b62-8e8e-0123456789ab")?
///     .to_grain_reader()?;
/// let audio = instance
///     .create_flow_reader("f00dfeed-9d35-4b62-8e8e-0123456789ab")?
///     .to_samples_reader()?;
///
/// let mut group = SynchronizationGroup::new();
/// group.add_grain_reader(&video, video.get_config_info().history_depth() as u16);
/// group.add_samples_reader(&audio);
///
/// let origin = instance.get_time();
/// group.wait_for_data_at(origin, origin + 100_000_000)?; // 100 ms budget
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct SynchronizationGroup {
    entries: Vec<Entry>,
}

impl SynchronizationGroup {
    /// Creates an empty group.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of enrolled readers.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no readers are enrolled.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Enrolls a discrete reader.
    ///
    /// Idempotent by reader identity: re-adding an enrolled reader only
    /// updates its `min_valid_slices` policy.
    pub fn add_grain_reader(&mut self, reader: &GrainReader, min_valid_slices: u16) {
        self.add_entry(
            &reader.core,
            Policy::Discrete { min_valid_slices },
        );
    }

    /// Enrolls a continuous reader. Idempotent by reader identity.
    pub fn add_samples_reader(&mut self, reader: &SamplesReader) {
        self.add_entry(&reader.core, Policy::Continuous);
    }

    fn add_entry(&mut self, core: &std::sync::Arc<ReaderCore>, policy: Policy) {
        let weak = std::sync::Arc::downgrade(core);
        if let Some(entry) = self
            .entries
            .iter_mut()
            .find(|entry| Weak::ptr_eq(&entry.reader, &weak))
        {
            entry.policy = policy;
            return;
        }
        self.entries.push(Entry {
            reader: weak,
            policy,
            grain_rate: core.arena.header().edit_rate,
            max_observed_source_delay: 0,
        });
    }

    /// Removes a discrete reader. A no-op if the reader is not enrolled.
    pub fn remove_grain_reader(&mut self, reader: &GrainReader) {
        self.remove_entry(&std::sync::Arc::downgrade(&reader.core));
    }

    /// Removes a continuous reader. A no-op if the reader is not enrolled.
    pub fn remove_samples_reader(&mut self, reader: &SamplesReader) {
        self.remove_entry(&std::sync::Arc::downgrade(&reader.core));
    }

    fn remove_entry(&mut self, weak: &Weak<ReaderCore>) {
        self.entries
            .retain(|entry| !Weak::ptr_eq(&entry.reader, weak));
    }

    /// Waits until every enrolled flow has data for the index expected at
    /// `origin_time`, or until `deadline` (absolute TAI nanoseconds).
    ///
    /// For each entry in list order:
    ///
    /// 1. The expected index is computed from the entry's cached rate.
    /// 2. If the flow's head index already covers it, the entry is skipped.
    /// 3. Otherwise the entry's reader blocks (grain- or sample-wise per
    ///    its policy) with the common deadline.
    /// 4. On success the flow's source delay updates the adaptive ordering.
    /// 5. The first non-OK result is returned immediately.
    ///
    /// # Errors
    ///
    /// - [`Error::ReaderGone`] if an enrolled reader has been destroyed;
    ///   the dead entry is purged before returning
    /// - [`Error::Timeout`] and the other wait errors, propagated from the
    ///   first entry that fails
    pub fn wait_for_data_at(&mut self, origin_time: Timepoint, deadline: Timepoint) -> Result<()> {
        let mut position = 0;
        while position < self.entries.len() {
            let Some(core) = self.entries[position].reader.upgrade() else {
                self.entries.remove(position);
                return Err(Error::ReaderGone);
            };
            let grain_rate = self.entries[position].grain_rate;
            let expected_index = time::timestamp_to_index(grain_rate, origin_time);
            if expected_index == UNDEFINED_INDEX {
                return Err(Error::BadArg);
            }

            let runtime = core.runtime_info();
            if runtime.head_index == UNDEFINED_INDEX || expected_index > runtime.head_index {
                let min_valid_slices = match self.entries[position].policy {
                    Policy::Discrete { min_valid_slices } => min_valid_slices,
                    Policy::Continuous => 0,
                };
                core.wait_for_data(expected_index, min_valid_slices, deadline)?;

                // If the source delay of this flow exceeds any previously
                // observed delay of this flow, update the cached maximum;
                // if the new maximum also beats the head entry's, move this
                // flow to the front so future waits block on it first.
                let expected_arrival = time::index_to_timestamp(grain_rate, expected_index);
                let now = time::current_time();
                if now > expected_arrival {
                    let source_delay = now - expected_arrival;
                    if source_delay > self.entries[position].max_observed_source_delay {
                        self.entries[position].max_observed_source_delay = source_delay;
                        if position > 0
                            && source_delay > self.entries[0].max_observed_source_delay
                        {
                            let entry = self.entries.remove(position);
                            tracing::trace!(
                                source_delay,
                                "promoting slowest flow to the front of the group"
                            );
                            self.entries.insert(0, entry);
                        }
                    }
                }
            }
            position += 1;
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn front_is(&self, reader: &GrainReader) -> bool {
        self.entries
            .first()
            .is_some_and(|entry| Weak::ptr_eq(&entry.reader, &std::sync::Arc::downgrade(&reader.core)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        DiscreteConfig, FlowConfig, Instance, VariantConfig,
        time::{current_time, index_to_timestamp},
    };
    use uuid::Uuid;

    fn discrete_config(rate: Rational) -> FlowConfig {
        FlowConfig {
            id: Uuid::new_v4(),
            edit_rate: rate,
            schema: br#"{"format":"urn:x-nmos:format:video"}"#.to_vec(),
            variant: VariantConfig::Discrete(DiscreteConfig {
                grain_payload_size: 64,
                history_depth: 8,
                total_slices: 1,
            }),
        }
    }

    fn test_instance(tag: &str) -> (Instance, tempfile::TempDir) {
        let dir = tempfile::Builder::new()
            .prefix(&format!("mxl_sync_{tag}_"))
            .tempdir()
            .unwrap();
        (Instance::new(dir.path()).unwrap(), dir)
    }

    #[test]
    fn add_reader_is_idempotent_by_identity() {
        let (instance, _dir) = test_instance("idempotent");
        let config = discrete_config(Rational::new(25, 1));
        let (writer, info, _) = instance.create_flow_writer(&config).unwrap();
        let reader_a = instance
            .create_flow_reader(&info.id().to_string())
            .unwrap()
            .to_grain_reader()
            .unwrap();
        let reader_b = instance
            .create_flow_reader(&info.id().to_string())
            .unwrap()
            .to_grain_reader()
            .unwrap();

        let mut group = SynchronizationGroup::new();
        group.add_grain_reader(&reader_a, 1);
        group.add_grain_reader(&reader_a, 4); // re-add updates, no duplicate
        assert_eq!(group.len(), 1);
        assert!(matches!(
            group.entries[0].policy,
            Policy::Discrete {
                min_valid_slices: 4
            }
        ));

        // A second reader of the same flow is a distinct identity.
        group.add_grain_reader(&reader_b, 1);
        assert_eq!(group.len(), 2);

        group.remove_grain_reader(&reader_b);
        group.remove_grain_reader(&reader_b); // idempotent
        assert_eq!(group.len(), 1);
        drop(writer);
    }

    #[test]
    fn destroyed_reader_is_reported_and_purged() {
        let (instance, _dir) = test_instance("gone");
        let config = discrete_config(Rational::new(25, 1));
        let (_writer, info, _) = instance.create_flow_writer(&config).unwrap();
        let reader = instance
            .create_flow_reader(&info.id().to_string())
            .unwrap()
            .to_grain_reader()
            .unwrap();

        let mut group = SynchronizationGroup::new();
        group.add_grain_reader(&reader, 1);
        reader.destroy().unwrap();

        let now = current_time();
        let result = group.wait_for_data_at(now, now + 10_000_000);
        assert!(matches!(result, Err(Error::ReaderGone)));
        assert!(group.is_empty());
    }

    #[test]
    fn slow_source_is_promoted_to_the_front() {
        let (instance, _dir) = test_instance("reorder");
        let rate = Rational::new(50, 1);

        let fast_config = discrete_config(rate);
        let slow_config = discrete_config(rate);
        let (fast_writer, fast_info, _) = instance.create_flow_writer(&fast_config).unwrap();
        let (slow_writer, slow_info, _) = instance.create_flow_writer(&slow_config).unwrap();
        let fast_writer = fast_writer.to_grain_writer().unwrap();
        let slow_writer = slow_writer.to_grain_writer().unwrap();

        let fast_reader = instance
            .create_flow_reader(&fast_info.id().to_string())
            .unwrap()
            .to_grain_reader()
            .unwrap();
        let slow_reader = instance
            .create_flow_reader(&slow_info.id().to_string())
            .unwrap()
            .to_grain_reader()
            .unwrap();

        let mut group = SynchronizationGroup::new();
        group.add_grain_reader(&fast_reader, 1);
        group.add_grain_reader(&slow_reader, 1);
        assert!(group.front_is(&fast_reader));

        // Pick an origin in the recent past so the expected index is due.
        let origin = current_time() - 40_000_000;
        let expected = time::timestamp_to_index(rate, origin);

        // Fast flow is already satisfied; slow flow commits from another
        // thread after a delay, forcing the group to block on it.
        let access = fast_writer.open_grain(expected).unwrap();
        access.commit(1).unwrap();

        let blocker = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(50));
            let access = slow_writer.open_grain(expected).unwrap();
            access.commit(1).unwrap();
            slow_writer
        });

        let deadline = current_time() + 2_000_000_000;
        group.wait_for_data_at(origin, deadline).unwrap();
        let slow_writer = blocker.join().unwrap();

        // The blocking source now observed a delay larger than the front
        // entry's and must occupy the head of the list.
        assert!(group.front_is(&slow_reader));

        // The recorded delay must be at least the wall-clock lag between
        // the expected arrival and now.
        assert!(group.entries[0].max_observed_source_delay > 0);
        let arrival = index_to_timestamp(rate, expected);
        assert!(current_time() - arrival >= group.entries[0].max_observed_source_delay);

        drop(slow_writer);
        drop(fast_writer);
    }

    #[test]
    fn satisfied_group_returns_ok_without_blocking() {
        let (instance, _dir) = test_instance("satisfied");
        let rate = Rational::new(50, 1);
        let config = discrete_config(rate);
        let (writer, info, _) = instance.create_flow_writer(&config).unwrap();
        let writer = writer.to_grain_writer().unwrap();
        let reader = instance
            .create_flow_reader(&info.id().to_string())
            .unwrap()
            .to_grain_reader()
            .unwrap();

        let origin = current_time() - 40_000_000;
        let expected = time::timestamp_to_index(rate, origin);
        writer.open_grain(expected).unwrap().commit(1).unwrap();

        let mut group = SynchronizationGroup::new();
        group.add_grain_reader(&reader, 1);

        let before = current_time();
        group.wait_for_data_at(origin, before + 1_000_000_000).unwrap();
        // Data was present: the call must not have burned the deadline.
        assert!(current_time() - before < 500_000_000);
    }

    #[test]
    fn group_timeout_propagates() {
        let (instance, _dir) = test_instance("timeout");
        let rate = Rational::new(50, 1);
        let config = discrete_config(rate);
        let (_writer, info, _) = instance.create_flow_writer(&config).unwrap();
        let reader = instance
            .create_flow_reader(&info.id().to_string())
            .unwrap()
            .to_grain_reader()
            .unwrap();

        let mut group = SynchronizationGroup::new();
        group.add_grain_reader(&reader, 1);

        // Nothing is ever written: the wait must end at the deadline.
        let origin = current_time();
        let result = group.wait_for_data_at(origin, origin + 20_000_000);
        assert!(matches!(result, Err(Error::Timeout)));
    }
}
