//! Request and response bodies for the replication endpoints.

use crate::dataset::Dataset;
use crate::error::{ProtocolError, ProtocolResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Query string carrying the user identity (`?userKey=...`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserKeyQuery {
    /// The user identity, if supplied.
    #[serde(rename = "userKey", default)]
    pub user_key: Option<String>,
}

impl UserKeyQuery {
    /// Creates a query for the given key.
    pub fn new(user_key: impl Into<String>) -> Self {
        Self {
            user_key: Some(user_key.into()),
        }
    }

    /// Returns the validated key.
    pub fn require(&self) -> ProtocolResult<String> {
        require_user_key(self.user_key.as_deref())
    }
}

/// Validates a user key: it must be present and not blank.
pub fn require_user_key(raw: Option<&str>) -> ProtocolResult<String> {
    match raw.map(str::trim) {
        Some(key) if !key.is_empty() => Ok(key.to_string()),
        _ => Err(ProtocolError::MissingUserKey),
    }
}

/// Response to a successful push.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushResponse {
    /// Always true for a 2xx response.
    pub success: bool,
    /// The stored version after this push.
    pub version: u64,
    /// When the stored dataset was written.
    pub updated_at: DateTime<Utc>,
    /// The reconciled dataset.
    pub merged: Dataset,
}

impl PushResponse {
    /// Creates a successful push response.
    pub fn new(version: u64, updated_at: DateTime<Utc>, merged: Dataset) -> Self {
        Self {
            success: true,
            version,
            updated_at,
            merged,
        }
    }
}

/// Liveness probe body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthResponse {
    /// `"ok"` when the server is serving requests.
    pub status: String,
    /// Server clock at the time of the probe.
    pub timestamp: DateTime<Utc>,
    /// Server version string.
    pub version: String,
}

impl HealthResponse {
    /// Creates an `ok` health response.
    pub fn ok(version: impl Into<String>) -> Self {
        Self {
            status: "ok".into(),
            timestamp: Utc::now(),
            version: version.into(),
        }
    }
}

/// Error body returned by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Human-readable error message.
    pub error: String,
    /// Diagnostic detail; omitted in production mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    /// Creates an error body without details.
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: None,
        }
    }

    /// Attaches diagnostic detail.
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// Per-user storage statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserStats {
    /// The user identity.
    pub user_key: String,
    /// Stored version counter.
    pub version: u64,
    /// Last write time.
    pub updated_at: DateTime<Utc>,
    /// Record count per collection.
    pub collections: BTreeMap<String, usize>,
}

/// Body of `GET /api/stats`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StatsResponse {
    /// One entry per stored user, most recently updated first.
    pub stats: Vec<UserStats>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn user_key_validation() {
        assert_eq!(require_user_key(Some("meg")).unwrap(), "meg");
        assert_eq!(require_user_key(Some("  meg ")).unwrap(), "meg");
        assert!(matches!(
            require_user_key(Some("   ")),
            Err(ProtocolError::MissingUserKey)
        ));
        assert!(matches!(
            require_user_key(None),
            Err(ProtocolError::MissingUserKey)
        ));
    }

    #[test]
    fn user_key_query_uses_camel_case() {
        let query: UserKeyQuery = serde_json::from_value(json!({ "userKey": "meg" })).unwrap();
        assert_eq!(query.require().unwrap(), "meg");

        let empty: UserKeyQuery = serde_json::from_value(json!({})).unwrap();
        assert!(empty.require().is_err());
    }

    #[test]
    fn push_response_shape() {
        let response = PushResponse::new(7, Utc::now(), Dataset::empty_default());
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["success"], json!(true));
        assert_eq!(value["version"], json!(7));
        assert!(value["updated_at"].is_string());
        assert!(value["merged"]["cotizaciones"].is_array());
    }

    #[test]
    fn error_details_omitted_when_absent() {
        let value = serde_json::to_value(ErrorResponse::new("boom")).unwrap();
        assert_eq!(value, json!({ "error": "boom" }));

        let value =
            serde_json::to_value(ErrorResponse::new("boom").with_details("disk full")).unwrap();
        assert_eq!(value["details"], json!("disk full"));
    }
}
