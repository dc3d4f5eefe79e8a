//! Error types for the protocol crate.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while decoding or validating protocol data.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The `userKey` parameter was absent or blank.
    #[error("userKey is required")]
    MissingUserKey,

    /// The dataset body does not have the expected shape.
    #[error("malformed dataset: {0}")]
    MalformedDataset(String),

    /// JSON encoding or decoding failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ProtocolError {
    /// Creates a malformed-dataset error.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedDataset(message.into())
    }
}
