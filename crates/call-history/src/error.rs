//! Error types for call history
//!
//! Most failures in this crate never reach a caller: writes triggered by call
//! teardown and store errors during queries are logged and swallowed. The
//! variants below are what remains visible through the public API.

use thiserror::Error;

use rvoip_history_store::HistoryStoreError;

/// Result type for call history operations
pub type CallHistoryResult<T> = Result<T, CallHistoryError>;

/// Errors that can occur in call history
#[derive(Debug, Error)]
pub enum CallHistoryError {
    /// Underlying history store error
    #[error("History store error: {0}")]
    Store(#[from] HistoryStoreError),

    /// Query shape that this service does not support
    #[error("Feature not implemented: {feature}")]
    NotImplemented { feature: String },

    /// A call record could not be encoded or decoded
    #[error("Invalid call record: {reason}")]
    InvalidRecord { reason: String },

    /// Configuration error
    #[error("Configuration error: {field} - {reason}")]
    InvalidConfiguration { field: String, reason: String },

    /// Logging could not be initialised
    #[error("Logging setup failed: {message}")]
    Logging { message: String },
}

impl CallHistoryError {
    /// Create a not implemented error
    pub fn not_implemented(feature: impl Into<String>) -> Self {
        Self::NotImplemented {
            feature: feature.into(),
        }
    }

    /// Create an invalid record error
    pub fn invalid_record(reason: impl Into<String>) -> Self {
        Self::InvalidRecord {
            reason: reason.into(),
        }
    }

    /// Create a configuration error
    pub fn config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a logging error
    pub fn logging(message: impl Into<String>) -> Self {
        Self::Logging {
            message: message.into(),
        }
    }

    /// Check if retrying the operation may succeed
    pub fn is_recoverable(&self) -> bool {
        match self {
            CallHistoryError::Store(e) => e.is_recoverable(),
            _ => false,
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            CallHistoryError::Store(e) => e.category(),
            CallHistoryError::NotImplemented { .. } => "unsupported",
            CallHistoryError::InvalidRecord { .. } => "record",
            CallHistoryError::InvalidConfiguration { .. } => "configuration",
            CallHistoryError::Logging { .. } => "logging",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_implemented_is_distinct_from_store_errors() {
        let err = CallHistoryError::not_implemented("meta contact queries");
        assert_eq!(err.category(), "unsupported");
        assert!(!err.is_recoverable());
        assert_eq!(err.to_string(), "Feature not implemented: meta contact queries");

        let io = CallHistoryError::from(HistoryStoreError::io(
            "/tmp/history",
            std::io::Error::new(std::io::ErrorKind::Other, "gone"),
        ));
        assert_eq!(io.category(), "io");
        assert!(io.is_recoverable());
    }
}
