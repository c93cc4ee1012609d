//! Errors raised by the storage backends.

use std::{error::Error, fmt, io};

use snafu::{Backtrace, prelude::*};

/// Errors produced by a storage backend implementation.
///
/// Backend-specific failures are wrapped in this enum so higher layers can map
/// them into [`StorageError`] variants with additional path context.
#[derive(Debug)]
pub enum BackendError {
    /// A local filesystem I/O error.
    Local(io::Error),
    /// A failure reported by the in-memory backend.
    Memory(String),
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendError::Local(e) => write!(f, "local I/O error: {e}"),
            BackendError::Memory(msg) => write!(f, "memory backend error: {msg}"),
        }
    }
}

impl Error for BackendError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            BackendError::Local(e) => Some(e),
            BackendError::Memory(_) => None,
        }
    }
}

/// Errors that can occur during storage operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StorageError {
    /// The specified path was not found.
    #[snafu(display("Path not found: {path}"))]
    NotFound {
        /// The path that was not found.
        path: String,
        /// Underlying backend error that caused the failure.
        source: BackendError,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },

    /// The specified path already exists when creation was requested with
    /// create-new semantics.
    #[snafu(display("Path already exists: {path}"))]
    AlreadyExists {
        /// The path that was found to already exist.
        path: String,
        /// Underlying backend error that indicates the existing resource.
        source: BackendError,
        /// The backtrace captured when the error occurred.
        backtrace: Backtrace,
    },

    /// Any other backend failure.
    #[snafu(display("Storage I/O error at {path}: {source}"))]
    OtherIo {
        /// The path where the I/O error occurred.
        path: String,
        /// Underlying backend error with platform-specific details.
        source: BackendError,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },

    /// A location string could not be turned into a storage location.
    #[snafu(display("Invalid storage location {spec:?}: {reason}"))]
    InvalidLocation {
        /// The user-supplied location string.
        spec: String,
        /// Why it was rejected.
        reason: String,
    },
}

impl StorageError {
    /// Returns true when the error reports a missing object.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound { .. })
    }

    /// Returns true when a create-new write lost against an existing object.
    pub fn is_already_exists(&self) -> bool {
        matches!(self, StorageError::AlreadyExists { .. })
    }
}
