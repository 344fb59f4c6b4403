//! Error types for quarry-db operations.
//!
//! Errors are surfaced structurally: every variant carries a kind, a
//! human-readable message, and whatever operation context (array path,
//! expected/actual values) is available at the failure site. Nothing in the
//! core retries; retry policy belongs to the caller.

use std::io;
use thiserror::Error;

/// Result type alias using [`QuarryDbError`].
pub type Result<T> = std::result::Result<T, QuarryDbError>;

/// Errors that can occur during quarry-db operations.
#[derive(Error, Debug)]
pub enum QuarryDbError {
    /// Invalid or incompatible configuration, detected at construction.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Stored array schema does not match what the caller requested.
    #[error("schema mismatch for {path}: expected {expected}, got {actual}")]
    SchemaMismatch {
        /// Path of the offending array.
        path: String,
        /// What the caller asked for.
        expected: String,
        /// What the array actually holds.
        actual: String,
    },

    /// Persisted index data violates a structural invariant.
    #[error("data integrity: {0}")]
    DataIntegrity(String),

    /// A store read or write failed or returned an incomplete result.
    #[error("store I/O on {path}: {message}")]
    StoreIo {
        /// Path of the array being accessed.
        path: String,
        /// What went wrong.
        message: String,
    },

    /// Vector dimensions do not match the expected dimension.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Expected vector dimension.
        expected: usize,
        /// Actual vector dimension provided.
        actual: usize,
    },

    /// Insufficient vectors for the requested operation.
    #[error("insufficient vectors: required {required}, got {actual}")]
    InsufficientVectors {
        /// Minimum number of vectors required.
        required: usize,
        /// Actual number of vectors provided.
        actual: usize,
    },

    /// I/O error during file operations.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Error during serialization or deserialization.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Stored file has an invalid or unrecognized format.
    #[error("invalid file format: {0}")]
    InvalidFormat(String),

    /// Checksum verification failed during loading.
    #[error("checksum mismatch: file may be corrupted")]
    ChecksumMismatch,
}

impl QuarryDbError {
    /// Creates a new `Config` error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Creates a new `SchemaMismatch` error.
    pub fn schema_mismatch(
        path: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::SchemaMismatch {
            path: path.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Creates a new `DataIntegrity` error.
    pub fn data_integrity(msg: impl Into<String>) -> Self {
        Self::DataIntegrity(msg.into())
    }

    /// Creates a new `StoreIo` error.
    pub fn store_io(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::StoreIo {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a new `DimensionMismatch` error.
    pub fn dimension_mismatch(expected: usize, actual: usize) -> Self {
        Self::DimensionMismatch { expected, actual }
    }

    /// Creates a new `InsufficientVectors` error.
    pub fn insufficient_vectors(required: usize, actual: usize) -> Self {
        Self::InsufficientVectors { required, actual }
    }

    /// Creates a new `Serialization` error.
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Creates a new `InvalidFormat` error.
    pub fn invalid_format(msg: impl Into<String>) -> Self {
        Self::InvalidFormat(msg.into())
    }
}

impl From<bincode::Error> for QuarryDbError {
    fn from(err: bincode::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
