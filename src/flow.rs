// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Flow types and metadata structures.
//!
//! This module defines data types for working with MXL flows, including:
//! - Flow readers and writers ([`reader`], [`writer`])
//! - Flow definitions ([`flowdef`])
//! - Creation parameters ([`FlowConfig`], [`FlowOptions`])
//! - Configuration and runtime metadata ([`FlowConfigInfo`], [`FlowRuntimeInfo`])

pub mod flowdef;
pub mod reader;
pub mod writer;

use uuid::Uuid;

use crate::{
    Error, Result,
    layout::{FlowHeader, FlowVariant},
    time::{Rational, Timepoint},
};

/// Default sample capacity floor for continuous flows when only batch size
/// hints are given.
const MIN_CONTINUOUS_CAPACITY: u64 = 4096;

/// Everything the core needs to create a flow.
///
/// The schema blob is opaque to the core: it is stored verbatim in the
/// backing file, protected by a CRC-32, and returned unchanged by
/// [`crate::Instance::get_flow_def`]. The [`flowdef`] module can build a
/// `FlowConfig` from an NMOS-style JSON flow definition, but nothing in the
/// core requires JSON.
#[derive(Debug, Clone)]
pub struct FlowConfig {
    /// Flow identifier (canonical UUID).
    pub id: Uuid,
    /// Grains per second (discrete) or samples per second (continuous).
    pub edit_rate: Rational,
    /// Opaque schema blob stored alongside the flow.
    pub schema: Vec<u8>,
    /// Variant-specific geometry.
    pub variant: VariantConfig,
}

/// Variant-specific flow creation parameters.
///
/// Modeled as a tagged sum rather than a class hierarchy; dispatch happens
/// at the call sites that care.
#[derive(Debug, Clone)]
pub enum VariantConfig {
    /// Discrete (grain-based) flow parameters.
    Discrete(DiscreteConfig),
    /// Continuous (sample-based) flow parameters.
    Continuous(ContinuousConfig),
}

/// Creation parameters for a discrete flow.
#[derive(Debug, Clone)]
pub struct DiscreteConfig {
    /// Payload capacity of one grain cell in bytes.
    pub grain_payload_size: u64,
    /// Number of ring slots/cells. Must be a power of two.
    pub history_depth: u64,
    /// Number of slices each grain is divided into for partial commits.
    pub total_slices: u16,
}

/// Creation parameters for a continuous flow.
#[derive(Debug, Clone)]
pub struct ContinuousConfig {
    /// Number of interleaved channels (strided per channel in the arena).
    pub channel_count: u32,
    /// Bytes per sample word (e.g. 4 for 32-bit float audio).
    pub sample_word_size: u32,
    /// Per-channel ring length in bytes. Zero lets the batch size hints in
    /// `options` pick the length.
    pub buffer_len: u64,
    /// Batch size hints, persisted in the flow header for readers.
    pub options: FlowOptions,
}

/// Batch size hints supplied when creating a continuous flow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlowOptions {
    /// Largest sample batch the writer intends to commit at once.
    pub max_commit_batch_size_hint: u32,
    /// Optimal batch size for synchronized read operations.
    pub max_sync_batch_size_hint: u32,
}

impl FlowConfig {
    /// Validates the configuration and resolves the derived ring geometry.
    ///
    /// Returns `(history_depth, cell_size, channel_count, sample_word_size,
    /// options)` as they will be persisted in the header.
    pub(crate) fn resolve_geometry(&self) -> Result<(u64, u64, u32, u32, FlowOptions)> {
        if !self.edit_rate.is_positive() {
            return Err(Error::BadArg);
        }
        match &self.variant {
            VariantConfig::Discrete(discrete) => {
                if discrete.grain_payload_size == 0
                    || discrete.total_slices == 0
                    || discrete.history_depth < 2
                    || !discrete.history_depth.is_power_of_two()
                {
                    return Err(Error::BadArg);
                }
                Ok((
                    discrete.history_depth,
                    discrete.grain_payload_size,
                    0,
                    0,
                    FlowOptions::default(),
                ))
            }
            VariantConfig::Continuous(continuous) => {
                if continuous.channel_count == 0 || continuous.sample_word_size == 0 {
                    return Err(Error::BadArg);
                }
                let word = u64::from(continuous.sample_word_size);
                let capacity = if continuous.buffer_len > 0 {
                    if continuous.buffer_len % word != 0 {
                        return Err(Error::BadArg);
                    }
                    continuous.buffer_len / word
                } else {
                    let batch = u64::from(
                        continuous
                            .options
                            .max_commit_batch_size_hint
                            .max(continuous.options.max_sync_batch_size_hint)
                            .max(1),
                    );
                    (4 * batch).next_power_of_two().max(MIN_CONTINUOUS_CAPACITY)
                };
                if capacity == 0 {
                    return Err(Error::BadArg);
                }
                Ok((
                    capacity,
                    capacity * word,
                    continuous.channel_count,
                    continuous.sample_word_size,
                    continuous.options,
                ))
            }
        }
    }

    pub(crate) fn flow_variant(&self) -> FlowVariant {
        match self.variant {
            VariantConfig::Discrete(_) => FlowVariant::Discrete,
            VariantConfig::Continuous(_) => FlowVariant::Continuous,
        }
    }
}

/// Complete flow information including configuration and runtime state.
pub struct FlowInfo {
    /// Static flow configuration.
    pub config: FlowConfigInfo,
    /// Dynamic runtime state.
    pub runtime: FlowRuntimeInfo,
}

/// Flow configuration metadata.
///
/// Contains static information about a flow's variant, rate, and ring
/// geometry. This is set when the flow is created and does not change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowConfigInfo {
    id: Uuid,
    variant: FlowVariant,
    edit_rate: Rational,
    history_depth: u64,
    cell_size: u64,
    channel_count: u32,
    sample_word_size: u32,
    options: FlowOptions,
    created_at: Timepoint,
}

impl FlowConfigInfo {
    pub(crate) fn from_header(header: &FlowHeader) -> Self {
        Self {
            id: header.flow_id,
            variant: header.variant,
            edit_rate: header.edit_rate,
            history_depth: header.history_depth,
            cell_size: header.cell_size,
            channel_count: header.channel_count,
            sample_word_size: header.sample_word_size,
            options: FlowOptions {
                max_commit_batch_size_hint: header.max_commit_batch_size_hint,
                max_sync_batch_size_hint: header.max_sync_batch_size_hint,
            },
            created_at: header.created_at,
        }
    }

    /// Returns the flow's unique identifier (UUID).
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Returns the flow variant (discrete or continuous).
    pub fn variant(&self) -> FlowVariant {
        self.variant
    }

    /// Returns `true` if this is a discrete (grain-based) flow.
    pub fn is_discrete_flow(&self) -> bool {
        self.variant == FlowVariant::Discrete
    }

    /// Returns the rate as a rational number (grain rate or sample rate).
    ///
    /// Use [`Self::grain_rate`] or [`Self::sample_rate`] for type-checked
    /// access.
    pub fn grain_or_sample_rate(&self) -> Rational {
        self.edit_rate
    }

    /// Returns the grain rate for discrete flows.
    ///
    /// # Errors
    ///
    /// Returns an error if this flow is continuous.
    pub fn grain_rate(&self) -> Result<Rational> {
        if self.variant != FlowVariant::Discrete {
            return Err(Error::Other(format!(
                "Flow {} is continuous, grain rate is only relevant for discrete flows.",
                self.id
            )));
        }
        Ok(self.edit_rate)
    }

    /// Returns the sample rate for continuous flows.
    ///
    /// # Errors
    ///
    /// Returns an error if this flow is discrete.
    pub fn sample_rate(&self) -> Result<Rational> {
        if self.variant != FlowVariant::Continuous {
            return Err(Error::Other(format!(
                "Flow {} is discrete, sample rate is only relevant for continuous flows.",
                self.id
            )));
        }
        Ok(self.edit_rate)
    }

    /// Returns the ring history depth: slot count for discrete flows,
    /// per-channel sample capacity for continuous flows.
    pub fn history_depth(&self) -> u64 {
        self.history_depth
    }

    /// Returns the payload cell size in bytes (grain capacity for discrete
    /// flows, per-channel ring length for continuous flows).
    pub fn cell_size(&self) -> u64 {
        self.cell_size
    }

    /// Returns the channel count (zero for discrete flows).
    pub fn channel_count(&self) -> u32 {
        self.channel_count
    }

    /// Returns the bytes per sample word (zero for discrete flows).
    pub fn sample_word_size(&self) -> u32 {
        self.sample_word_size
    }

    /// Returns the maximum commit batch size hint from the writer.
    pub fn max_commit_batch_size_hint(&self) -> u32 {
        self.options.max_commit_batch_size_hint
    }

    /// Returns the maximum synchronization batch size hint.
    pub fn max_sync_batch_size_hint(&self) -> u32 {
        self.options.max_sync_batch_size_hint
    }

    /// Returns the TAI timestamp at which the flow was created.
    pub fn created_at(&self) -> Timepoint {
        self.created_at
    }
}

/// Dynamic runtime information about a flow.
///
/// A lock-free snapshot taken with acquire ordering; see
/// [`crate::GrainReader::get_runtime_info`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowRuntimeInfo {
    /// Highest committed index, [`crate::UNDEFINED_INDEX`] while the flow
    /// is empty.
    pub head_index: u64,
    /// The flow's edit rate.
    pub edit_rate: Rational,
    /// The flow variant.
    pub variant: FlowVariant,
    /// The ring history depth.
    pub history_depth: u64,
    /// TAI timestamp of the last commit, zero if none.
    pub last_write_time: Timepoint,
}

impl FlowRuntimeInfo {
    /// Returns `true` once at least one grain or sample batch has been
    /// committed.
    pub fn has_data(&self) -> bool {
        self.head_index != crate::time::UNDEFINED_INDEX
    }
}
