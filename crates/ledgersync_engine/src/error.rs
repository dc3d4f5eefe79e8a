//! Error types for the sync engine.

use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during a sync cycle.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// The server could not be reached.
    #[error("server unreachable: {0}")]
    Connectivity(String),

    /// A request exceeded its deadline.
    #[error("request timed out")]
    Timeout,

    /// The server answered with a non-success status.
    #[error("server error {status}: {message}")]
    Server {
        /// HTTP status code.
        status: u16,
        /// Message from the error body.
        message: String,
    },

    /// The request was rejected as invalid.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A response body could not be decoded.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Reading or writing the local dataset failed.
    #[error("local store error: {0}")]
    LocalStore(String),

    /// The server failed to persist the dataset.
    #[error("server persistence error: {0}")]
    Persistence(String),
}

impl SyncError {
    /// Maps a non-success HTTP status to an error.
    ///
    /// 400 becomes [`SyncError::Validation`] and 500 becomes
    /// [`SyncError::Persistence`]; anything else stays a server error.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            400 => SyncError::Validation(message),
            500 => SyncError::Persistence(message),
            _ => SyncError::Server { status, message },
        }
    }

    /// Creates a local store error.
    pub fn local_store(message: impl std::fmt::Display) -> Self {
        SyncError::LocalStore(message.to_string())
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Timeout
            | SyncError::Server { .. }
            | SyncError::LocalStore(_)
            | SyncError::Persistence(_) => true,
            SyncError::Connectivity(_) | SyncError::Validation(_) | SyncError::Protocol(_) => {
                false
            }
        }
    }

    /// Returns true if this error means the device is offline.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, SyncError::Connectivity(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(SyncError::Timeout.is_retryable());
        assert!(SyncError::from_status(503, "unavailable").is_retryable());
        assert!(SyncError::from_status(500, "disk full").is_retryable());
        assert!(SyncError::local_store("locked").is_retryable());
        assert!(!SyncError::Connectivity("refused".into()).is_retryable());
        assert!(!SyncError::from_status(400, "userKey is required").is_retryable());
        assert!(!SyncError::Protocol("bad json".into()).is_retryable());
    }

    #[test]
    fn status_mapping() {
        assert_eq!(
            SyncError::from_status(400, "data is required"),
            SyncError::Validation("data is required".into())
        );
        assert!(matches!(
            SyncError::from_status(500, "x"),
            SyncError::Persistence(_)
        ));
        assert!(matches!(
            SyncError::from_status(404, "endpoint not found"),
            SyncError::Server { status: 404, .. }
        ));
    }

    #[test]
    fn error_display() {
        assert_eq!(SyncError::Timeout.to_string(), "request timed out");
        let err = SyncError::from_status(502, "bad gateway");
        assert_eq!(err.to_string(), "server error 502: bad gateway");
        assert!(SyncError::Connectivity("refused".into()).is_connectivity());
    }
}
