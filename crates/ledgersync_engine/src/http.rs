//! HTTP transport implementation.
//!
//! Talks JSON to the replication endpoints:
//!
//! - `HEAD /api/health`
//! - `GET  /api/sync/pull?userKey=...`
//! - `POST /api/sync/push?userKey=...`
//!
//! Every request carries the configured timeout.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::transport::SyncTransport;
use async_trait::async_trait;
use ledgersync_protocol::{Dataset, ErrorResponse, PushResponse};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

/// HTTP-based sync transport.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    /// Base URL of the sync server, without a trailing slash.
    base_url: String,
    client: Client,
    timeout: Duration,
}

impl HttpTransport {
    /// Creates a transport for `base_url` with the given request timeout.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> SyncResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::Connectivity(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            timeout,
        })
    }

    /// Creates a transport from a sync configuration.
    pub fn from_config(config: &SyncConfig) -> SyncResult<Self> {
        Self::new(config.server_url.clone(), config.timeout)
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the request timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> SyncResult<T> {
        let response = check_status(response).await?;
        let bytes = response.bytes().await.map_err(map_reqwest_error)?;
        serde_json::from_slice(&bytes)
            .map_err(|e| SyncError::Protocol(format!("failed to decode response: {}", e)))
    }
}

#[async_trait]
impl SyncTransport for HttpTransport {
    async fn health(&self) -> SyncResult<()> {
        let response = self
            .client
            .head(self.url("/api/health"))
            .send()
            .await
            .map_err(map_reqwest_error)?;
        check_status(response).await?;
        Ok(())
    }

    async fn pull(&self, user_key: &str) -> SyncResult<Dataset> {
        debug!(user_key, "pull");
        let response = self
            .client
            .get(self.url("/api/sync/pull"))
            .query(&[("userKey", user_key)])
            .send()
            .await
            .map_err(map_reqwest_error)?;
        Self::decode(response).await
    }

    async fn push(&self, user_key: &str, dataset: &Dataset) -> SyncResult<PushResponse> {
        debug!(user_key, records = dataset.record_count(), "push");
        let response = self
            .client
            .post(self.url("/api/sync/push"))
            .query(&[("userKey", user_key)])
            .json(dataset)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        Self::decode(response).await
    }
}

/// Turns a non-success response into an error, preferring the server's
/// `{ error, details }` body for the message.
async fn check_status(response: Response) -> SyncResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = match serde_json::from_str::<ErrorResponse>(&body) {
        Ok(ErrorResponse {
            error,
            details: Some(details),
        }) => format!("{}: {}", error, details),
        Ok(ErrorResponse { error, .. }) => error,
        Err(_) if body.is_empty() => status.to_string(),
        Err(_) => body,
    };
    Err(SyncError::from_status(status.as_u16(), message))
}

fn map_reqwest_error(err: reqwest::Error) -> SyncError {
    if err.is_timeout() {
        SyncError::Timeout
    } else if err.is_decode() || err.is_body() {
        SyncError::Protocol(err.to_string())
    } else {
        SyncError::Connectivity(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_slash_is_trimmed() {
        let transport = HttpTransport::new("http://localhost:3002/", Duration::from_secs(5)).unwrap();
        assert_eq!(transport.base_url(), "http://localhost:3002");
        assert_eq!(transport.url("/api/health"), "http://localhost:3002/api/health");
        assert_eq!(transport.timeout(), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn unreachable_server_is_connectivity_error() {
        // Port 9 (discard) on localhost is almost never listening.
        let transport = HttpTransport::new("http://127.0.0.1:9", Duration::from_secs(2)).unwrap();
        let err = transport.health().await.unwrap_err();
        assert!(matches!(err, SyncError::Connectivity(_) | SyncError::Timeout));
    }
}
