// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! MXL instance management and core domain operations.
//!
//! This module provides [`Instance`], the main entry point for interacting
//! with an MXL domain. An instance represents a connection to a shared
//! memory domain and provides methods to create readers/writers, destroy
//! flows, and work with TAI timing.

use std::{
    collections::HashMap,
    fs::{File, OpenOptions},
    path::{Path, PathBuf},
    sync::{Arc, Mutex, Weak},
};

use uuid::Uuid;

use crate::{
    Error, FlowConfig, FlowConfigInfo, FlowReader, FlowWriter, Result,
    arena::{Arena, WriterLock},
    domain,
    flow::{VariantConfig, reader::ReaderCore, writer::WriterCore},
    layout::FlowHeader,
    time::{self, Rational, Timepoint, UNDEFINED_INDEX},
};

/// Internal shared context for an MXL instance.
///
/// Separated from [`Instance`] so that it can be cloned for shared
/// ownership across threads. The flow catalog keeps weak references to the
/// read-only mappings so that all readers of one flow in this process share
/// a single mapping, and so that [`Instance::destroy_flow`] can detect live
/// in-process readers.
pub(crate) struct InstanceContext {
    domain: PathBuf,
    flows: Mutex<HashMap<Uuid, Weak<Arena>>>,
}

impl InstanceContext {
    /// Returns the shared read-only mapping for a flow, opening (and
    /// cataloging) it on first use.
    fn reader_arena(&self, flow_id: Uuid) -> Result<Arc<Arena>> {
        let mut flows = self.flows.lock().expect("flow catalog poisoned");
        if let Some(existing) = flows.get(&flow_id).and_then(Weak::upgrade) {
            return Ok(existing);
        }
        let path = domain::flow_data_path(&self.domain, flow_id);
        let file = File::open(&path).map_err(|error| {
            if error.kind() == std::io::ErrorKind::NotFound {
                Error::NoSuchFlow
            } else {
                Error::Io(error)
            }
        })?;
        let arena = Arc::new(Arena::open_ro(&file)?);
        if arena.header().flow_id != flow_id {
            return Err(Error::Incompatible);
        }
        flows.retain(|_, weak| weak.strong_count() > 0);
        flows.insert(flow_id, Arc::downgrade(&arena));
        Ok(arena)
    }

    /// Returns `true` if some reader created through this instance still
    /// holds the flow's mapping.
    fn has_live_readers(&self, flow_id: Uuid) -> bool {
        self.flows
            .lock()
            .expect("flow catalog poisoned")
            .get(&flow_id)
            .is_some_and(|weak| weak.strong_count() > 0)
    }

    fn forget(&self, flow_id: Uuid) {
        self.flows
            .lock()
            .expect("flow catalog poisoned")
            .remove(&flow_id);
    }
}

/// Main entry point for interacting with an MXL domain.
///
/// An `Instance` represents a connection to a shared memory domain
/// (typically a tmpfs directory like `/dev/shm/my_domain`). It provides
/// methods to:
///
/// - Create flow readers and writers
/// - Destroy flows
/// - Query and manipulate timing (TAI timestamps and indices)
///
/// The instance is cheaply cloneable and thread-safe (`Send + Sync`), but
/// readers and writers created from it are not thread-safe and should not
/// be shared between threads.
///
/// # Examples
///
/// ```no_run
/// use mxl_core::Instance;
///
/// # fn main() -> Result<(), mxl_core::Error> {
/// let instance = Instance::new("/dev/shm/my_domain")?;
///
/// // Create a flow reader
/// let reader = instance.create_flow_reader("6b1e6d24-9d35-4b62-8e8e-0123456789ab")?;
///
/// // Query current time
/// let tai_ns = instance.get_time();
/// println!("Current TAI: {}", tai_ns);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Instance {
    context: Arc<InstanceContext>,
}

impl Instance {
    /// Creates a new MXL instance bound to the specified domain directory.
    ///
    /// The directory is created if it does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the domain directory cannot be created.
    pub fn new(domain: impl AsRef<Path>) -> Result<Self> {
        let domain = domain.as_ref().to_path_buf();
        std::fs::create_dir_all(&domain)?;
        Ok(Self {
            context: Arc::new(InstanceContext {
                domain,
                flows: Mutex::new(HashMap::new()),
            }),
        })
    }

    /// Returns the domain directory this instance is bound to.
    pub fn domain(&self) -> &Path {
        &self.context.domain
    }

    /// Creates a flow reader for an existing flow in the domain.
    ///
    /// This connects to a flow that was previously created by a writer. The
    /// returned [`FlowReader`] is a generic reader that must be converted
    /// to either a [`crate::GrainReader`] (discrete flows) or
    /// [`crate::SamplesReader`] (continuous flows).
    ///
    /// # Arguments
    ///
    /// * `flow_id` - Canonical UUID string identifying the flow
    ///
    /// # Errors
    ///
    /// - [`Error::NoSuchFlow`] if no flow with the given ID exists
    /// - [`Error::BadArg`] if `flow_id` is not a valid UUID string
    /// - [`Error::Incompatible`] if the flow file fails validation
    pub fn create_flow_reader(&self, flow_id: &str) -> Result<FlowReader> {
        let id = domain::parse_flow_id(flow_id)?;
        let arena = self.context.reader_arena(id)?;
        Ok(FlowReader::new(Arc::new(ReaderCore::new(arena))))
    }

    /// Creates a flow writer, creating the flow itself if necessary.
    ///
    /// Creation is idempotent by flow identifier: if the flow already
    /// exists and its stored schema matches the supplied one, the existing
    /// flow is reused and `was_created` is `false`.
    ///
    /// The returned [`FlowWriter`] is generic and must be converted to
    /// either [`crate::GrainWriter`] or [`crate::SamplesWriter`] based on
    /// the flow variant.
    ///
    /// # Returns
    ///
    /// A tuple containing:
    /// - `FlowWriter`: Generic writer handle, holding the flow's exclusive
    ///   lock
    /// - `FlowConfigInfo`: Flow configuration metadata
    /// - `bool`: `true` if a new flow was created, `false` if reusing an
    ///   existing flow
    ///
    /// # Errors
    ///
    /// - [`Error::BadArg`] if the configuration is invalid (zero rate
    ///   terms, non-power-of-two history depth, ...)
    /// - [`Error::FlowBusy`] if another writer holds the flow
    /// - [`Error::SchemaMismatch`] if the flow exists with a different
    ///   schema or geometry
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use mxl_core::Instance;
    /// # fn example(instance: Instance, config: mxl_core::FlowConfig) -> Result<(), mxl_core::Error> {
    /// let (writer, info, was_created) = instance.create_flow_writer(&config)?;
    ///
    /// if was_created {
    ///     println!("Created new flow {}", info.id());
    /// } else {
    ///     println!("Reusing existing flow {}", info.id());
    /// }
    ///
    /// let grain_writer = writer.to_grain_writer()?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn create_flow_writer(
        &self,
        config: &FlowConfig,
    ) -> Result<(FlowWriter, FlowConfigInfo, bool)> {
        let (history_depth, cell_size, channel_count, sample_word_size, options) =
            config.resolve_geometry()?;
        let total_slices = match &config.variant {
            VariantConfig::Discrete(discrete) => discrete.total_slices,
            VariantConfig::Continuous(_) => 0,
        };

        let path = domain::flow_data_path(&self.context.domain, config.id);
        domain::create_flow_dir(&self.context.domain, config.id)?;

        let mut open_options = OpenOptions::new();
        open_options.read(true).write(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            open_options.mode(0o664);
        }

        let (file, was_created) = match open_options.clone().create_new(true).open(&path) {
            Ok(file) => (file, true),
            Err(error) if error.kind() == std::io::ErrorKind::AlreadyExists => {
                (open_options.open(&path)?, false)
            }
            Err(error) => return Err(Error::Io(error)),
        };

        // The exclusive lock is taken before any byte is written, so a
        // second writer (or a destroy) contends here instead of racing the
        // initialization.
        let lock = WriterLock::acquire(file)?;

        let arena = if was_created {
            let header = FlowHeader::for_new_flow(
                config.id,
                config.flow_variant(),
                config.edit_rate,
                history_depth,
                cell_size,
                config.schema.len() as u64,
                crc32c::crc32c(&config.schema),
                channel_count,
                sample_word_size,
                options.max_commit_batch_size_hint,
                options.max_sync_batch_size_hint,
                time::current_time(),
            );
            Arena::create(lock.file(), header, &config.schema)?
        } else {
            let arena = Arena::open_rw(lock.file())?;
            let header = arena.header();
            if header.flow_id != config.id {
                return Err(Error::Incompatible);
            }
            if header.schema_len != config.schema.len() as u64
                || header.schema_crc != crc32c::crc32c(&config.schema)
            {
                return Err(Error::SchemaMismatch);
            }
            if header.variant != config.flow_variant()
                || header.edit_rate != config.edit_rate
                || header.history_depth != history_depth
                || header.cell_size != cell_size
                || header.channel_count != channel_count
                || header.sample_word_size != sample_word_size
            {
                return Err(Error::SchemaMismatch);
            }
            arena
        };

        let info = FlowConfigInfo::from_header(arena.header());
        let writer = FlowWriter::new(WriterCore::new(arena, total_slices, lock), config.id);
        Ok((writer, info, was_created))
    }

    /// Creates a flow writer from a JSON flow definition.
    ///
    /// Convenience layer over [`Self::create_flow_writer`]: parses an
    /// NMOS-style flow definition (see [`crate::flowdef`]), derives the
    /// structured creation parameters, and stores the definition text
    /// verbatim as the flow's schema blob, so [`Self::get_flow_def`]
    /// round-trips it byte for byte.
    ///
    /// # Errors
    ///
    /// - [`Error::Other`] if the definition fails to parse
    /// - Everything [`Self::create_flow_writer`] can return
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use mxl_core::Instance;
    /// # fn example(instance: Instance, flow_def: &str) -> Result<(), mxl_core::Error> {
    /// let (writer, info, was_created) = instance.create_flow_writer_from_def(flow_def)?;
    /// if info.is_discrete_flow() {
    ///     let grain_writer = writer.to_grain_writer()?;
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub fn create_flow_writer_from_def(
        &self,
        flow_def: &str,
    ) -> Result<(FlowWriter, FlowConfigInfo, bool)> {
        let parsed: crate::flowdef::FlowDef = serde_json::from_str(flow_def)
            .map_err(|error| Error::Other(format!("Invalid flow definition: {error}")))?;
        let config = parsed.to_flow_config_with_schema(flow_def.as_bytes().to_vec())?;
        self.create_flow_writer(&config)
    }

    /// Retrieves the schema blob of an existing flow, verbatim as supplied
    /// at creation.
    ///
    /// # Errors
    ///
    /// - [`Error::NoSuchFlow`] if the flow does not exist
    /// - [`Error::Incompatible`] if the stored blob fails its CRC check
    pub fn get_flow_def(&self, flow_id: &str) -> Result<Vec<u8>> {
        let id = domain::parse_flow_id(flow_id)?;
        let arena = self.context.reader_arena(id)?;
        Ok(arena.schema().to_vec())
    }

    /// Destroys a flow, deleting its backing files.
    ///
    /// A flow can only be destroyed while no writer holds its lock and no
    /// reader created through this instance still maps it.
    ///
    /// # Errors
    ///
    /// - [`Error::NoSuchFlow`] if the flow does not exist
    /// - [`Error::FlowBusy`] if a writer or an in-process reader is alive
    pub fn destroy_flow(&self, flow_id: &str) -> Result<()> {
        let id = domain::parse_flow_id(flow_id)?;
        if self.context.has_live_readers(id) {
            return Err(Error::FlowBusy);
        }
        let path = domain::flow_data_path(&self.context.domain, id);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|error| {
                if error.kind() == std::io::ErrorKind::NotFound {
                    Error::NoSuchFlow
                } else {
                    Error::Io(error)
                }
            })?;
        // Taking the writer lock proves no writer is alive; it is held
        // until the files are gone so no successor can attach mid-delete.
        let _lock = WriterLock::acquire(file)?;
        std::fs::remove_dir_all(domain::flow_dir(&self.context.domain, id))?;
        self.context.forget(id);
        Ok(())
    }

    /// Returns the current media index for a given rate.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use mxl_core::{Instance, Rational};
    /// # fn example(instance: Instance) {
    /// let rate = Rational::new(30000, 1001); // 29.97 fps
    /// let index = instance.get_current_index(&rate);
    /// println!("Current frame index: {}", index);
    /// # }
    /// ```
    pub fn get_current_index(&self, rate: &Rational) -> u64 {
        time::current_index(*rate)
    }

    /// Calculates the duration until a future index is reached.
    ///
    /// Useful for pacing writers to avoid writing too far ahead.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BadArg`] if the rate has a zero term.
    pub fn get_duration_until_index(
        &self,
        index: u64,
        rate: &Rational,
    ) -> Result<std::time::Duration> {
        match time::ns_until_index(index, *rate) {
            u64::MAX => Err(Error::BadArg),
            ns => Ok(std::time::Duration::from_nanos(ns)),
        }
    }

    /// Converts a TAI timestamp to a media index.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BadArg`] if the rate has a zero term.
    pub fn timestamp_to_index(&self, timestamp: Timepoint, rate: &Rational) -> Result<u64> {
        match time::timestamp_to_index(*rate, timestamp) {
            UNDEFINED_INDEX => Err(Error::BadArg),
            index => Ok(index),
        }
    }

    /// Converts a media index to a TAI timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BadArg`] if the rate has a zero term.
    pub fn index_to_timestamp(&self, index: u64, rate: &Rational) -> Result<Timepoint> {
        if !rate.is_valid() {
            return Err(Error::BadArg);
        }
        Ok(time::index_to_timestamp(*rate, index))
    }

    /// Sleeps for the specified duration against a monotonic clock.
    pub fn sleep_for(&self, duration: std::time::Duration) {
        time::sleep_for_ns(duration.as_nanos() as u64)
    }

    /// Returns the current TAI time in nanoseconds.
    ///
    /// TAI (International Atomic Time) follows SMPTE ST 2059; unlike UTC it
    /// has no leap seconds. The epoch is 1970-01-01 00:00:00 TAI.
    pub fn get_time(&self) -> Timepoint {
        time::current_time()
    }

    /// Forces immediate destruction of the instance, consuming `self`.
    ///
    /// Normally the instance is destroyed automatically when all clones are
    /// dropped; this method is useful for testing or explicit cleanup.
    ///
    /// # Errors
    ///
    /// Returns an error if other clones of the instance are still alive.
    pub fn destroy(self) -> Result<()> {
        Arc::into_inner(self.context)
            .map(drop)
            .ok_or_else(|| Error::Other("Instance is still in use.".to_string()))
    }
}
