// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! # MXL - Media eXchange Layer core
//!
//! A shared-memory fabric that lets independent processes on one host
//! exchange timed media — video frames, audio samples, ancillary data — as
//! a sequence of indexed, timestamped payloads called *grains*, with
//! zero-copy access and without any kernel-mediated data copy.
//!
//! ## Overview
//!
//! MXL enables inter-process media exchange using memory-mapped ring
//! buffers on tmpfs. A producer writes grains (or sample batches) to a
//! *flow*; any number of consumers read them out-of-process with bounded
//! latency. Publication is lock-free: a per-slot seqlock for discrete
//! flows, a monotonic head index for continuous flows.
//!
//! ### Key Concepts
//!
//! - **Domain**: A tmpfs directory containing shared memory for media flows
//! - **Instance**: A connection to an MXL domain ([`Instance`])
//! - **Flow**: A single-writer/multi-reader ring buffer for media data,
//!   either discrete or continuous
//! - **Grain**: A discrete unit of media (video frame, data packet)
//!   accessed via [`GrainReader`]/[`GrainWriter`]
//! - **Samples**: Continuous media data (audio) accessed via
//!   [`SamplesReader`]/[`SamplesWriter`]
//!
//! ### Flow Types
//!
//! MXL supports two media flow patterns:
//!
//! - **Discrete (grain-based)**: Video frames and data packets delivered as
//!   complete units
//! - **Continuous (sample-based)**: Audio streams delivered as strided
//!   channel samples
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐
//! │ Instance │  (bound to a domain)
//! └────┬─────┘
//!      │
//!      ├─► FlowWriter ──► GrainWriter   (video/data)
//!      │              └─► SamplesWriter  (audio)
//!      │
//!      └─► FlowReader ──► GrainReader   (video/data)
//!                     └─► SamplesReader  (audio)
//! ```
//!
//! ## Examples
//!
//! ### Creating an MXL instance and writing video grains
//!
//! ```no_run
//! use mxl_core::{DiscreteConfig, FlowConfig, Instance, Rational, VariantConfig};
//! use uuid::Uuid;
//!
//! # fn main() -> Result<(), mxl_core::Error> {
//! // Create an instance bound to a tmpfs domain
//! let instance = Instance::new("/dev/shm/my_domain")?;
//!
//! // Create a flow writer from structured parameters
//! let config = FlowConfig {
//!     id: Uuid::new_v4(),
//!     edit_rate: Rational::new(50, 1),
//!     schema: br#"{"format": "urn:x-nmos:format:video"}"#.to_vec(),
//!     variant: VariantConfig::Discrete(DiscreteConfig {
//!         grain_payload_size: 1920 * 1080 * 2,
//!         history_depth: 32,
//!         total_slices: 8,
//!     }),
//! };
//! let (writer, info, _was_created) = instance.create_flow_writer(&config)?;
//!
//! // Convert to grain writer for discrete video data
//! let grain_writer = writer.to_grain_writer()?;
//!
//! // Write a grain at the current index
//! let rate = info.grain_rate()?;
//! let index = instance.get_current_index(&rate);
//! let mut access = grain_writer.open_grain(index)?;
//! access.payload_mut().fill(42); // Fill with test data
//! let total = access.total_slices();
//! access.commit(total)?; // Commit all slices
//! # Ok(())
//! # }
//! ```
//!
//! ### Reading audio samples
//!
//! ```no_run
//! use mxl_core::Instance;
//! use std::time::Duration;
//!
//! # fn main() -> Result<(), mxl_core::Error> {
//! let instance = Instance::new("/dev/shm/my_domain")?;
//!
//! // Connect to an existing audio flow
//! let reader = instance.create_flow_reader("b3bb5be7-9fe9-4324-a5bb-4c70e1084449")?;
//! let samples_reader = reader.to_samples_reader()?;
//!
//! // Read 480 samples (10ms at 48kHz) with a 5-second timeout
//! let head = samples_reader.get_runtime_info().head_index;
//! let start = head.saturating_sub(479);
//! let samples = samples_reader.get_samples_blocking(start, 480, Duration::from_secs(5))?;
//!
//! // Access per-channel data (may wrap at ring boundary)
//! for ch in 0..samples.num_of_channels() {
//!     let (fragment1, fragment2) = samples.channel_data(ch)?;
//!     println!("Channel {}: {} + {} bytes", ch, fragment1.len(), fragment2.len());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Timing and Synchronization
//!
//! MXL uses TAI timestamps (nanoseconds since the SMPTE ST 2059 epoch,
//! 1970-01-01 00:00:00 TAI):
//!
//! - [`Instance::get_time`] returns current TAI time
//! - [`Instance::index_to_timestamp`] / [`Instance::timestamp_to_index`]
//!   convert between indices and timestamps at a rational edit rate
//! - [`SynchronizationGroup`] waits for a common timepoint across many
//!   flows, adaptively blocking on the slowest source first
//!
//! ## Thread Safety
//!
//! - [`Instance`] is `Send + Sync` and can be shared across threads
//! - Readers and writers are `Send` but not `Sync`; each thread should have
//!   its own reader/writer handles
//! - One writer exists per flow at a time (enforced with an OS-level
//!   advisory lock); readers are unbounded

mod arena;
mod domain;
mod error;
mod flow;
mod grain;
mod instance;
mod layout;
mod samples;
mod sync;
pub mod time;

pub use error::{Error, Result, Status};
pub use flow::{
    ContinuousConfig, DiscreteConfig, FlowConfig, FlowConfigInfo, FlowInfo, FlowOptions,
    FlowRuntimeInfo, VariantConfig, flowdef, reader::FlowReader, writer::FlowWriter,
};
pub use grain::{
    data::{GrainData, GrainInfo, OwnedGrainData},
    reader::GrainReader,
    write_access::GrainWriteAccess,
    writer::GrainWriter,
};
pub use instance::Instance;
pub use layout::FlowVariant;
pub use samples::{
    data::{OwnedSamplesData, SamplesData},
    reader::SamplesReader,
    write_access::SamplesWriteAccess,
    writer::SamplesWriter,
};
pub use sync::SynchronizationGroup;
pub use time::{Rational, Timepoint, UNDEFINED_INDEX};
