//! Transport layer abstraction for sync operations.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use chrono::Utc;
use ledgersync_protocol::{Dataset, PushResponse};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

/// A sync transport handles network communication with the sync server.
///
/// This trait abstracts the network layer, allowing for different
/// implementations (HTTP, in-process loopback, mock for testing).
#[async_trait]
pub trait SyncTransport: Send + Sync {
    /// Probes the server's health endpoint.
    async fn health(&self) -> SyncResult<()>;

    /// Fetches the user's canonical dataset.
    async fn pull(&self, user_key: &str) -> SyncResult<Dataset>;

    /// Sends the local dataset for merging.
    async fn push(&self, user_key: &str, dataset: &Dataset) -> SyncResult<PushResponse>;
}

/// Which transport call a scripted failure applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockCall {
    /// `health()`.
    Health,
    /// `pull()`.
    Pull,
    /// `push()`.
    Push,
}

/// A mock transport for testing.
///
/// Pushes overwrite the remote dataset (no merging) and pulls return it.
/// Failures can be scripted per call, and every call is counted.
#[derive(Debug)]
pub struct MockTransport {
    connected: AtomicBool,
    remote: Mutex<Dataset>,
    version: AtomicU64,
    failures: Mutex<VecDeque<(MockCall, SyncError)>>,
    latency: Mutex<Duration>,
    pushed: Mutex<Vec<Dataset>>,
    health_calls: AtomicUsize,
    pull_calls: AtomicUsize,
    push_calls: AtomicUsize,
}

impl MockTransport {
    /// Creates a connected mock with an empty default remote dataset.
    pub fn new() -> Self {
        Self::with_remote(Dataset::empty_default())
    }

    /// Creates a connected mock serving the given remote dataset.
    pub fn with_remote(remote: Dataset) -> Self {
        Self {
            connected: AtomicBool::new(true),
            remote: Mutex::new(remote),
            version: AtomicU64::new(0),
            failures: Mutex::new(VecDeque::new()),
            latency: Mutex::new(Duration::ZERO),
            pushed: Mutex::new(Vec::new()),
            health_calls: AtomicUsize::new(0),
            pull_calls: AtomicUsize::new(0),
            push_calls: AtomicUsize::new(0),
        }
    }

    /// Sets the connected state. A disconnected mock fails every call with
    /// [`SyncError::Connectivity`].
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Makes the next matching call fail with `error`.
    pub fn fail_next(&self, call: MockCall, error: SyncError) {
        self.failures.lock().push_back((call, error));
    }

    /// Delays every call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    /// Replaces the remote dataset.
    pub fn set_remote(&self, remote: Dataset) {
        *self.remote.lock() = remote;
    }

    /// Returns the remote dataset.
    pub fn remote(&self) -> Dataset {
        self.remote.lock().clone()
    }

    /// Returns every dataset pushed so far.
    pub fn pushed(&self) -> Vec<Dataset> {
        self.pushed.lock().clone()
    }

    /// Number of `health()` calls.
    pub fn health_calls(&self) -> usize {
        self.health_calls.load(Ordering::SeqCst)
    }

    /// Number of `pull()` calls.
    pub fn pull_calls(&self) -> usize {
        self.pull_calls.load(Ordering::SeqCst)
    }

    /// Number of `push()` calls.
    pub fn push_calls(&self) -> usize {
        self.push_calls.load(Ordering::SeqCst)
    }

    async fn enter(&self, call: MockCall) -> SyncResult<()> {
        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if !self.connected.load(Ordering::SeqCst) {
            return Err(SyncError::Connectivity("mock transport disconnected".into()));
        }
        let mut failures = self.failures.lock();
        if let Some(index) = failures.iter().position(|(c, _)| *c == call) {
            if let Some((_, error)) = failures.remove(index) {
                return Err(error);
            }
        }
        Ok(())
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SyncTransport for MockTransport {
    async fn health(&self) -> SyncResult<()> {
        self.health_calls.fetch_add(1, Ordering::SeqCst);
        self.enter(MockCall::Health).await
    }

    async fn pull(&self, _user_key: &str) -> SyncResult<Dataset> {
        self.pull_calls.fetch_add(1, Ordering::SeqCst);
        self.enter(MockCall::Pull).await?;
        Ok(self.remote())
    }

    async fn push(&self, _user_key: &str, dataset: &Dataset) -> SyncResult<PushResponse> {
        self.push_calls.fetch_add(1, Ordering::SeqCst);
        self.enter(MockCall::Push).await?;
        self.pushed.lock().push(dataset.clone());
        *self.remote.lock() = dataset.clone();
        let version = self.version.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(PushResponse::new(version, Utc::now(), dataset.clone()))
    }
}
