// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Memory-mapped payload arena.
//!
//! An [`Arena`] is one flow's backing file mapped into the current process:
//! read-write for the (single) writer, read-only for readers. All mutable
//! state inside the mapping is reached through atomic references derived
//! from the raw base pointer; the header and schema blob are immutable
//! after creation.

use std::fs::File;

use memmap2::{Mmap, MmapMut, MmapOptions};

use crate::{
    Error, Result,
    layout::{
        FlowHeader, HEADER_SIZE, RING_STATE_SIZE, RingState, SLOT_SIZE, SlotRecord,
        init_runtime_region,
    },
};

enum ArenaMap {
    ReadWrite(MmapMut),
    ReadOnly(Mmap),
}

impl ArenaMap {
    fn as_slice(&self) -> &[u8] {
        match self {
            ArenaMap::ReadWrite(map) => map,
            ArenaMap::ReadOnly(map) => map,
        }
    }
}

/// A mapped flow backing file plus its decoded header.
pub(crate) struct Arena {
    map: ArenaMap,
    header: FlowHeader,
}

// Safety: the mapping is shared memory accessed via atomics (ring state,
// slot records) or immutable bytes (header, schema). Payload regions are
// handed out as raw pointers; the seqlock / head-index protocols make the
// concurrent accesses well defined.
unsafe impl Send for Arena {}
unsafe impl Sync for Arena {}

impl Arena {
    /// Creates and initializes a new flow backing file.
    ///
    /// The caller has already created the file (exclusively) and must hold
    /// the writer lock. Runtime state is initialized before the header is
    /// written, so a racing reader either sees a fully valid file or fails
    /// the magic check.
    pub fn create(file: &File, header: FlowHeader, schema: &[u8]) -> Result<Self> {
        debug_assert_eq!(schema.len() as u64, header.schema_len);
        file.set_len(header.file_len())?;
        let mut map = unsafe { MmapOptions::new().map_mut(file)? };
        if map.len() as u64 != header.file_len() {
            return Err(Error::Incompatible);
        }
        let schema_start = header.schema_offset as usize;
        map[schema_start..schema_start + schema.len()].copy_from_slice(schema);
        init_runtime_region(&mut map, &header);
        header.encode(&mut map[..HEADER_SIZE]);
        map.flush()?;
        Ok(Self {
            map: ArenaMap::ReadWrite(map),
            header,
        })
    }

    /// Maps an existing flow file read-write (writer side).
    pub fn open_rw(file: &File) -> Result<Self> {
        let map = unsafe { MmapOptions::new().map_mut(file)? };
        let header = Self::validate(&map)?;
        Ok(Self {
            map: ArenaMap::ReadWrite(map),
            header,
        })
    }

    /// Maps an existing flow file read-only (reader side).
    pub fn open_ro(file: &File) -> Result<Self> {
        let map = unsafe { MmapOptions::new().map(file)? };
        let header = Self::validate(&map)?;
        Ok(Self {
            map: ArenaMap::ReadOnly(map),
            header,
        })
    }

    /// Decodes the header and checks the mapping against it: total length,
    /// schema bounds, and the schema blob's CRC-32.
    fn validate(raw: &[u8]) -> Result<FlowHeader> {
        let header = FlowHeader::decode(raw)?;
        if raw.len() as u64 != header.file_len() {
            return Err(Error::Incompatible);
        }
        let start = header.schema_offset as usize;
        let end = start + header.schema_len as usize;
        if end > raw.len() {
            return Err(Error::Incompatible);
        }
        if crc32c::crc32c(&raw[start..end]) != header.schema_crc {
            return Err(Error::Incompatible);
        }
        Ok(header)
    }

    pub fn header(&self) -> &FlowHeader {
        &self.header
    }

    /// The schema blob, verbatim as supplied at creation.
    pub fn schema(&self) -> &[u8] {
        let start = self.header.schema_offset as usize;
        &self.map.as_slice()[start..start + self.header.schema_len as usize]
    }

    /// Base pointer of the mapping.
    pub fn base(&self) -> *const u8 {
        self.map.as_slice().as_ptr()
    }

    /// The mutable ring state record.
    pub fn ring_state(&self) -> &RingState {
        // Safety: the offset is validated against the mapping length, the
        // region is 64-byte aligned, and RingState contains only atomics
        // plus padding.
        unsafe { &*(self.base().add(self.header.index_ring_offset as usize) as *const RingState) }
    }

    /// Slot record `slot` of a discrete flow's index ring.
    pub fn slot(&self, slot: u64) -> &SlotRecord {
        debug_assert!(slot < self.header.history_depth);
        let offset =
            self.header.index_ring_offset as usize + RING_STATE_SIZE + slot as usize * SLOT_SIZE;
        // Safety: same argument as ring_state(); the slot index is bounded
        // by the history depth validated at open.
        unsafe { &*(self.base().add(offset) as *const SlotRecord) }
    }

    /// Absolute file offset of discrete cell `slot`.
    pub fn cell_offset(&self, slot: u64) -> u64 {
        self.header.payload_arena_offset + slot * self.header.cell_size
    }
}

/// Holds the writer's exclusive advisory lock on the flow backing file.
///
/// The lock is released when dropped (or implicitly when the owning process
/// dies), which is what lets a crashed writer be replaced.
pub(crate) struct WriterLock {
    #[cfg(unix)]
    _lock: nix::fcntl::Flock<File>,
    #[cfg(not(unix))]
    _file: File,
}

impl WriterLock {
    /// Attempts to take the exclusive writer lock without blocking.
    ///
    /// Contention surfaces as [`Error::FlowBusy`].
    pub fn acquire(file: File) -> Result<Self> {
        #[cfg(unix)]
        {
            use nix::fcntl::{Flock, FlockArg};
            let lock =
                Flock::lock(file, FlockArg::LockExclusiveNonblock).map_err(|(_, errno)| {
                    if errno == nix::errno::Errno::EWOULDBLOCK {
                        Error::FlowBusy
                    } else {
                        Error::Io(std::io::Error::from_raw_os_error(errno as i32))
                    }
                })?;
            Ok(Self { _lock: lock })
        }
        #[cfg(not(unix))]
        {
            Ok(Self { _file: file })
        }
    }

    /// Borrows the locked file for mapping.
    pub fn file(&self) -> &File {
        #[cfg(unix)]
        {
            &self._lock
        }
        #[cfg(not(unix))]
        {
            &self._file
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::FlowVariant;
    use crate::time::Rational;
    use uuid::Uuid;

    fn scratch_flow(schema: &[u8]) -> (tempfile::TempDir, std::path::PathBuf, FlowHeader) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flow.data");
        let header = FlowHeader::for_new_flow(
            Uuid::new_v4(),
            FlowVariant::Discrete,
            Rational::new(25, 1),
            8,
            64,
            schema.len() as u64,
            crc32c::crc32c(schema),
            0,
            0,
            0,
            0,
            42,
        );
        (dir, path, header)
    }

    #[test]
    fn create_then_open_both_ways() {
        let schema = br#"{"format":"video"}"#;
        let (_dir, path, header) = scratch_flow(schema);
        let file = File::options()
            .create_new(true)
            .read(true)
            .write(true)
            .open(&path)
            .unwrap();
        let arena = Arena::create(&file, header.clone(), schema).unwrap();
        assert_eq!(arena.schema(), schema);

        let ro = Arena::open_ro(&File::open(&path).unwrap()).unwrap();
        assert_eq!(ro.header(), &header);
        assert_eq!(ro.schema(), schema);
        assert_eq!(
            ro.ring_state()
                .head_index
                .load(std::sync::atomic::Ordering::Acquire),
            crate::time::UNDEFINED_INDEX
        );

        let rw = Arena::open_rw(&File::options().read(true).write(true).open(&path).unwrap());
        assert!(rw.is_ok());
    }

    #[test]
    fn corrupted_schema_fails_crc_validation() {
        let schema = b"opaque-schema-bytes";
        let (_dir, path, header) = scratch_flow(schema);
        let file = File::options()
            .create_new(true)
            .read(true)
            .write(true)
            .open(&path)
            .unwrap();
        let schema_offset = header.schema_offset;
        Arena::create(&file, header, schema).unwrap();
        drop(file);

        // Flip one schema byte on disk.
        use std::io::{Seek, SeekFrom, Write};
        let mut file = File::options().read(true).write(true).open(&path).unwrap();
        file.seek(SeekFrom::Start(schema_offset)).unwrap();
        file.write_all(b"X").unwrap();
        drop(file);

        let result = Arena::open_ro(&File::open(&path).unwrap());
        assert!(matches!(result, Err(Error::Incompatible)));
    }

    #[test]
    fn truncated_file_is_incompatible() {
        let schema = b"s";
        let (_dir, path, header) = scratch_flow(schema);
        let file = File::options()
            .create_new(true)
            .read(true)
            .write(true)
            .open(&path)
            .unwrap();
        let full_len = header.file_len();
        Arena::create(&file, header, schema).unwrap();
        file.set_len(full_len - 64).unwrap();
        drop(file);
        let result = Arena::open_ro(&File::open(&path).unwrap());
        assert!(matches!(result, Err(Error::Incompatible)));
    }

    #[cfg(unix)]
    #[test]
    fn second_writer_lock_is_rejected() {
        let schema = b"s";
        let (_dir, path, header) = scratch_flow(schema);
        let file = File::options()
            .create_new(true)
            .read(true)
            .write(true)
            .open(&path)
            .unwrap();
        Arena::create(&file, header, schema).unwrap();

        let _held = WriterLock::acquire(file).unwrap();
        let second = File::options().read(true).write(true).open(&path).unwrap();
        assert!(matches!(
            WriterLock::acquire(second),
            Err(Error::FlowBusy)
        ));
    }
}
