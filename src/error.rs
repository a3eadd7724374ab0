// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Error types for MXL operations.
//!
//! This module defines the status codes reported by the flow data plane and
//! the idiomatic Rust error enum built on top of them. Errors are enumerated,
//! not thrown: every fallible core operation returns [`Result`], and callers
//! decide policy (the core itself never logs an error path).

/// Convenience result type using [`Error`] as the error variant.
pub type Result<T> = core::result::Result<T, Error>;

/// Numeric status codes for the flow data plane.
///
/// These are the wire-level codes external collaborators see. [`Error`]
/// variants map onto them via [`Error::status`]; the reverse mapping is
/// [`Error::from_status`].
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// Operation completed.
    Ok = 0,
    /// An unclassified failure.
    Unknown = 1,
    /// A blocking operation reached its deadline.
    Timeout = 2,
    /// The requested data has not been committed yet.
    NotReady = 3,
    /// The requested data has been overwritten by newer data.
    Stale = 4,
    /// The slot stayed in a write generation past the spin budget.
    UnderWrite = 5,
    /// The flow file does not carry a compatible magic/version.
    Incompatible = 6,
    /// Another writer holds the flow, or live handles block a destroy.
    FlowBusy = 7,
    /// The flow exists but was created with a different schema.
    SchemaMismatch = 8,
    /// A synchronization group entry refers to a destroyed reader.
    ReaderGone = 9,
    /// No flow with the requested identifier exists in the domain.
    NoSuchFlow = 10,
    /// An argument violated the API contract.
    BadArg = 11,
    /// An operating system level I/O failure.
    Io = 12,
}

/// Errors that can occur when using the MXL core.
///
/// The taxonomy follows the status codes: contract errors (caller bug,
/// non-retriable), transient errors (retry with a new deadline), environment
/// errors (surfaced up), and lifecycle errors (the caller reconstructs
/// state).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An unclassified failure.
    #[error("Unknown error")]
    Unknown,

    /// A blocking operation timed out before completing.
    #[error("Timeout")]
    Timeout,

    /// The requested grain or sample span is not committed yet.
    ///
    /// For continuous flows, `available` carries the number of samples that
    /// *are* readable from the requested start index, so callers can consume
    /// a committed prefix instead of retrying blind. Discrete paths report
    /// zero.
    #[error("Not ready ({available} available)")]
    NotReady {
        /// Committed items available from the requested start index.
        available: u64,
    },

    /// The requested data has already been overwritten in the ring.
    #[error("Out of range - too late")]
    Stale,

    /// The slot stayed under an active write generation past the bounded
    /// spin budget (writer torn or gone mid-commit).
    #[error("Slot under write")]
    UnderWrite,

    /// The flow file failed the magic/version/layout validation.
    #[error("Incompatible flow file")]
    Incompatible,

    /// Another writer holds the flow's exclusive lock, or live handles
    /// prevent a destroy.
    #[error("Flow busy")]
    FlowBusy,

    /// The flow already exists with a different schema blob.
    #[error("Schema mismatch")]
    SchemaMismatch,

    /// A reader enrolled in a synchronization group has been destroyed.
    #[error("Reader gone")]
    ReaderGone,

    /// The requested flow ID does not exist in the domain.
    #[error("Flow not found")]
    NoSuchFlow,

    /// An argument passed to an MXL function was invalid.
    #[error("Invalid argument")]
    BadArg,

    /// An operating system level I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A generic error for failures not directly mapped to a status code
    /// (e.g., flow definition parsing, type mismatches).
    #[error("Other error: {0}")]
    Other(String),
}

impl Error {
    /// Returns the numeric status code for this error.
    pub fn status(&self) -> Status {
        match self {
            Error::Unknown => Status::Unknown,
            Error::Timeout => Status::Timeout,
            Error::NotReady { .. } => Status::NotReady,
            Error::Stale => Status::Stale,
            Error::UnderWrite => Status::UnderWrite,
            Error::Incompatible => Status::Incompatible,
            Error::FlowBusy => Status::FlowBusy,
            Error::SchemaMismatch => Status::SchemaMismatch,
            Error::ReaderGone => Status::ReaderGone,
            Error::NoSuchFlow => Status::NoSuchFlow,
            Error::BadArg => Status::BadArg,
            Error::Io(_) => Status::Io,
            Error::Other(_) => Status::Unknown,
        }
    }

    /// Converts a numeric status code to a [`Result`].
    ///
    /// Status codes that carry payload in their error variant ([`Status::Io`],
    /// [`Status::NotReady`]) map to variants with empty/zero detail.
    pub fn from_status(status: Status) -> Result<()> {
        match status {
            Status::Ok => Ok(()),
            Status::Unknown => Err(Error::Unknown),
            Status::Timeout => Err(Error::Timeout),
            Status::NotReady => Err(Error::NotReady { available: 0 }),
            Status::Stale => Err(Error::Stale),
            Status::UnderWrite => Err(Error::UnderWrite),
            Status::Incompatible => Err(Error::Incompatible),
            Status::FlowBusy => Err(Error::FlowBusy),
            Status::SchemaMismatch => Err(Error::SchemaMismatch),
            Status::ReaderGone => Err(Error::ReaderGone),
            Status::NoSuchFlow => Err(Error::NoSuchFlow),
            Status::BadArg => Err(Error::BadArg),
            Status::Io => Err(Error::Io(std::io::Error::other("I/O error"))),
        }
    }
}
