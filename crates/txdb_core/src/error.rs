//! Error types for the transaction store.

use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in transaction store operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] txdb_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The transaction log is corrupted or malformed.
    #[error("log corruption: {message}")]
    LogCorruption {
        /// Description of the corruption.
        message: String,
    },

    /// Checksum mismatch detected while reading a log record.
    #[error("checksum mismatch at offset {offset}: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Offset of the record.
        offset: u64,
        /// Stored checksum.
        expected: u32,
        /// Computed checksum.
        actual: u32,
    },

    /// Another process holds the store directory.
    #[error("store locked: another process has exclusive access")]
    DatabaseLocked,

    /// Invalid store layout or format.
    #[error("invalid store format: {message}")]
    InvalidFormat {
        /// Description of the format issue.
        message: String,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },

    /// A payload does not fit the log's 32-bit length field.
    #[error("payload of {size} bytes exceeds the {max} byte limit")]
    PayloadTooLarge {
        /// Offending payload size.
        size: usize,
        /// Largest accepted payload.
        max: usize,
    },

    /// The background writer is no longer running.
    #[error("background writer has stopped")]
    WorkerStopped,
}

impl CoreError {
    /// Creates a log corruption error.
    pub fn log_corruption(message: impl Into<String>) -> Self {
        Self::LogCorruption {
            message: message.into(),
        }
    }

    /// Creates an invalid format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Returns true for errors that describe damaged log contents rather
    /// than a failed operation.
    #[must_use]
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::LogCorruption { .. } | Self::ChecksumMismatch { .. }
        )
    }
}
