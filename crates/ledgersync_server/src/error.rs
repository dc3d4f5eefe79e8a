//! Error types for the sync server.

use crate::store::StoreError;
use ledgersync_protocol::ProtocolError;
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the sync server.
#[derive(Error, Debug)]
pub enum ServerError {
    /// A required parameter is missing or invalid.
    #[error("{0}")]
    Validation(String),

    /// The request body is not a valid dataset.
    #[error("malformed body: {0}")]
    MalformedBody(String),

    /// The dataset store failed.
    #[error("persistence error: {0}")]
    Persistence(#[from] StoreError),

    /// Route does not exist.
    #[error("endpoint not found")]
    NotFound,

    /// Configuration could not be loaded.
    #[error("configuration error: {0}")]
    Config(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    /// Returns true if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ServerError::Validation(_) | ServerError::MalformedBody(_) | ServerError::NotFound
        )
    }

    /// Returns true if this is a server error (5xx).
    pub fn is_server_error(&self) -> bool {
        matches!(
            self,
            ServerError::Persistence(_)
                | ServerError::Config(_)
                | ServerError::Internal(_)
                | ServerError::Io(_)
        )
    }
}

impl From<ProtocolError> for ServerError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::MissingUserKey => ServerError::Validation(err.to_string()),
            ProtocolError::MalformedDataset(message) => ServerError::MalformedBody(message),
            ProtocolError::Json(e) => ServerError::MalformedBody(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_classification() {
        assert!(ServerError::Validation("userKey is required".into()).is_client_error());
        assert!(ServerError::MalformedBody("bad".into()).is_client_error());
        assert!(ServerError::NotFound.is_client_error());
        assert!(ServerError::Internal("oops".into()).is_server_error());
        assert!(ServerError::Persistence(StoreError::Locked).is_server_error());
        assert!(!ServerError::Validation("bad".into()).is_server_error());
    }

    #[test]
    fn protocol_errors_are_client_errors() {
        let err: ServerError = ProtocolError::MissingUserKey.into();
        assert!(matches!(err, ServerError::Validation(_)));
        assert_eq!(err.to_string(), "userKey is required");

        let err: ServerError = ProtocolError::malformed("not an object").into();
        assert!(matches!(err, ServerError::MalformedBody(_)));
    }
}
