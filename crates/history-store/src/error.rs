//! Error types for the history store
//!
//! Errors are split by where they originate so that callers can decide
//! whether to retry, skip a record or give up:
//!
//! - **I/O errors** - the backing file system failed, usually transient
//! - **Format errors** - a stored segment or metadata file could not be decoded
//! - **Usage errors** - the caller passed an invalid id or too many values

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for history store operations
pub type StoreResult<T> = Result<T, HistoryStoreError>;

/// Errors raised by history storage, readers and writers
#[derive(Error, Debug)]
pub enum HistoryStoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed history data in {path}: {reason}")]
    Format { path: PathBuf, reason: String },

    #[error("Invalid history id: {reason}")]
    InvalidHistoryId { reason: String },

    #[error("Record for history {history_id} has {actual} values but the structure defines {expected}")]
    StructureMismatch {
        history_id: String,
        expected: usize,
        actual: usize,
    },

    #[error("Segment {index} does not exist in history {history_id}")]
    SegmentOutOfRange { history_id: String, index: usize },

    #[error("Invalid store configuration: {field} - {reason}")]
    InvalidConfiguration { field: String, reason: String },
}

impl HistoryStoreError {
    /// Create an I/O error bound to the path that failed
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a format error for undecodable stored data
    pub fn format(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Format {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid history id error
    pub fn invalid_id(reason: impl Into<String>) -> Self {
        Self::InvalidHistoryId {
            reason: reason.into(),
        }
    }

    /// Create an invalid configuration error
    pub fn invalid_configuration(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Check if retrying the operation may succeed
    pub fn is_recoverable(&self) -> bool {
        matches!(self, HistoryStoreError::Io { .. })
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            HistoryStoreError::Io { .. } => "io",
            HistoryStoreError::Format { .. } => "format",
            HistoryStoreError::InvalidHistoryId { .. }
            | HistoryStoreError::StructureMismatch { .. }
            | HistoryStoreError::SegmentOutOfRange { .. } => "usage",
            HistoryStoreError::InvalidConfiguration { .. } => "configuration",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let io = HistoryStoreError::io(
            "/tmp/history",
            std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
        );
        assert!(io.is_recoverable());
        assert_eq!(io.category(), "io");

        let id = HistoryStoreError::invalid_id("empty");
        assert!(!id.is_recoverable());
        assert_eq!(id.category(), "usage");
        assert_eq!(id.to_string(), "Invalid history id: empty");
    }
}
