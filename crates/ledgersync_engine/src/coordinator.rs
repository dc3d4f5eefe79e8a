//! Sync coordinator.
//!
//! One coordinator drives replication for one `userKey`. A cycle reads the
//! local dataset, pushes it for merging, pulls the reconciled dataset and
//! overwrites local state with it.
//!
//! Background work (the periodic tick, the startup cycle, retries, reconnect
//! resyncs and the connectivity feed) runs on Tokio tasks holding a weak
//! reference, so dropping the last handle tears everything down. Scheduled
//! tasks run each cycle on a task of its own, so aborting them on `stop()`
//! never cuts a cycle short.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::events::{EventBus, SubscriptionId, SyncEvent};
use crate::local_store::LocalStore;
use crate::transport::SyncTransport;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Result of a completed cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncReport {
    /// Whether the local dataset was pushed.
    pub pushed: bool,
    /// Server version returned by the push.
    pub version: Option<u64>,
    /// Number of records in the pulled dataset.
    pub records: usize,
    /// When the cycle completed.
    pub completed_at: DateTime<Utc>,
}

/// Why `sync_now` did not run a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Another cycle is in flight.
    Busy,
    /// The server is believed unreachable.
    Offline,
}

/// What `sync_now` did.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    /// The cycle ran to completion.
    Completed(SyncReport),
    /// No cycle ran.
    Skipped(SkipReason),
    /// The cycle ran and failed.
    Failed(SyncError),
}

impl SyncOutcome {
    /// Returns true for [`SyncOutcome::Completed`].
    pub fn is_completed(&self) -> bool {
        matches!(self, SyncOutcome::Completed(_))
    }
}

/// Snapshot of a coordinator's state.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncStatus {
    /// Whether the server is believed reachable.
    pub is_online: bool,
    /// Whether a cycle is in flight.
    pub is_syncing: bool,
    /// Whether background scheduling is active.
    pub is_running: bool,
    /// When the last cycle completed.
    pub last_sync_time: Option<DateTime<Utc>>,
    /// Consecutive failed cycles.
    pub retry_count: u32,
    /// Error of the last failed cycle, cleared on success.
    pub last_error: Option<SyncError>,
    /// Server version seen on the last push.
    pub last_version: Option<u64>,
}

#[derive(Debug)]
struct State {
    is_online: bool,
    last_sync_time: Option<DateTime<Utc>>,
    retry_count: u32,
    last_error: Option<SyncError>,
    last_version: Option<u64>,
}

#[derive(Debug, Default)]
struct Tasks {
    running: bool,
    /// Set by `stop()`; no retry or reconnect is scheduled while set.
    stopped: bool,
    ticker: Option<JoinHandle<()>>,
    startup: Option<JoinHandle<()>>,
    connectivity: Option<JoinHandle<()>>,
    retry: Option<JoinHandle<()>>,
    reconnect: Option<JoinHandle<()>>,
}

impl Tasks {
    fn abort_all(&mut self) {
        for handle in [
            self.ticker.take(),
            self.startup.take(),
            self.connectivity.take(),
            self.retry.take(),
            self.reconnect.take(),
        ]
        .into_iter()
        .flatten()
        {
            handle.abort();
        }
    }
}

/// Clears the in-flight flag when a cycle ends, however it ends.
struct SyncingGuard<'a>(&'a AtomicBool);

impl Drop for SyncingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

struct Inner {
    user_key: String,
    config: SyncConfig,
    transport: Arc<dyn SyncTransport>,
    store: Arc<dyn LocalStore>,
    events: EventBus,
    state: RwLock<State>,
    syncing: AtomicBool,
    tasks: Mutex<Tasks>,
    connectivity: Mutex<Option<watch::Receiver<bool>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.tasks.get_mut().abort_all();
    }
}

/// Drives sync cycles for one user.
///
/// Cloning yields another handle to the same coordinator.
#[derive(Clone)]
pub struct SyncCoordinator {
    inner: Arc<Inner>,
}

impl SyncCoordinator {
    /// Creates a stopped coordinator. It starts out assuming it is online.
    pub fn new(
        user_key: impl Into<String>,
        config: SyncConfig,
        transport: Arc<dyn SyncTransport>,
        store: Arc<dyn LocalStore>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                user_key: user_key.into(),
                config,
                transport,
                store,
                events: EventBus::new(),
                state: RwLock::new(State {
                    is_online: true,
                    last_sync_time: None,
                    retry_count: 0,
                    last_error: None,
                    last_version: None,
                }),
                syncing: AtomicBool::new(false),
                tasks: Mutex::new(Tasks::default()),
                connectivity: Mutex::new(None),
            }),
        }
    }

    /// The user this coordinator syncs.
    pub fn user_key(&self) -> &str {
        &self.inner.user_key
    }

    /// The configuration in use.
    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    /// Attaches an OS-level connectivity feed. `true` means online.
    ///
    /// Takes effect on the next `start()`.
    pub fn set_connectivity_feed(&self, feed: watch::Receiver<bool>) {
        *self.inner.connectivity.lock() = Some(feed);
    }

    /// Starts background scheduling.
    ///
    /// Does nothing when sync is disabled or the coordinator is already
    /// running. Must be called from within a Tokio runtime.
    pub fn start(&self) {
        let inner = &self.inner;
        if !inner.config.enabled {
            info!(user_key = %inner.user_key, "sync disabled, not starting");
            return;
        }

        let mut tasks = inner.tasks.lock();
        if tasks.running {
            debug!(user_key = %inner.user_key, "coordinator already running");
            return;
        }
        tasks.running = true;
        tasks.stopped = false;

        if let Some(feed) = inner.connectivity.lock().clone() {
            tasks.connectivity = Some(tokio::spawn(watch_connectivity(
                Arc::downgrade(inner),
                feed,
            )));
        }

        let weak = Arc::downgrade(inner);
        let delay = inner.config.startup_delay;
        tasks.startup = Some(tokio::spawn(async move {
            let Some(inner) = weak.upgrade() else { return };
            tokio::join!(inner.check_connection(), time::sleep(delay));
            inner.run_detached().await;
        }));

        let period = inner.config.sync_interval;
        if period.is_zero() {
            warn!(user_key = %inner.user_key, "sync interval is zero, periodic sync disabled");
        } else {
            tasks.ticker = Some(tokio::spawn(tick(Arc::downgrade(inner), period)));
        }

        info!(
            user_key = %inner.user_key,
            interval_secs = period.as_secs(),
            "sync coordinator started"
        );
    }

    /// Cancels scheduled work. A cycle already in flight finishes but
    /// schedules no retry.
    pub fn stop(&self) {
        let mut tasks = self.inner.tasks.lock();
        if tasks.running {
            info!(user_key = %self.inner.user_key, "sync coordinator stopped");
        }
        tasks.running = false;
        tasks.stopped = true;
        tasks.abort_all();
    }

    /// Runs one cycle now.
    pub async fn sync_now(&self) -> SyncOutcome {
        self.inner.sync_now().await
    }

    /// Registers a synchronous listener for coordinator events.
    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&SyncEvent) + Send + Sync + 'static,
    {
        self.inner.events.subscribe(listener)
    }

    /// Removes a listener. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.events.unsubscribe(id)
    }

    /// Returns a receiver for events emitted from now on.
    pub fn events(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.events.receiver()
    }

    /// Current state.
    pub fn status(&self) -> SyncStatus {
        let state = self.inner.state.read();
        SyncStatus {
            is_online: state.is_online,
            is_syncing: self.inner.syncing.load(Ordering::Acquire),
            is_running: self.inner.tasks.lock().running,
            last_sync_time: state.last_sync_time,
            retry_count: state.retry_count,
            last_error: state.last_error.clone(),
            last_version: state.last_version,
        }
    }

    /// Connectivity returned. Schedules a resync after the reconnect delay.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn handle_online(&self) {
        self.inner.handle_online();
    }

    /// Connectivity was lost.
    pub fn handle_offline(&self) {
        self.inner.set_online(false);
    }

    /// Probes the server's health endpoint and updates the online state.
    pub async fn check_connection(&self) -> bool {
        self.inner.check_connection().await
    }
}

impl std::fmt::Debug for SyncCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncCoordinator")
            .field("user_key", &self.inner.user_key)
            .field("status", &self.status())
            .finish()
    }
}

impl Inner {
    async fn sync_now(self: &Arc<Self>) -> SyncOutcome {
        if self
            .syncing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(user_key = %self.user_key, "sync already in progress");
            return SyncOutcome::Skipped(SkipReason::Busy);
        }
        let guard = SyncingGuard(&self.syncing);

        if !self.is_online() {
            debug!(user_key = %self.user_key, "offline, skipping sync");
            return SyncOutcome::Skipped(SkipReason::Offline);
        }

        self.events.emit(SyncEvent::SyncStart);
        let outcome = match self.run_cycle().await {
            Ok(report) => self.on_success(report),
            Err(err) => self.on_failure(err),
        };

        drop(guard);
        self.events.emit(SyncEvent::SyncEnd);
        outcome
    }

    async fn run_cycle(&self) -> SyncResult<SyncReport> {
        let user_key = self.user_key.as_str();
        let local = self.store.read(user_key).await?;

        // An empty dataset on an installation that never synced is a fresh
        // install; pushing it would be pointless.
        let fresh = local.is_empty() && self.store.last_synced(user_key).await?.is_none();
        let version = if fresh {
            info!(user_key, "fresh installation, pulling without push");
            None
        } else {
            let response = self.transport.push(user_key, &local).await?;
            debug!(user_key, version = response.version, "push accepted");
            Some(response.version)
        };

        let remote = self.transport.pull(user_key).await?;
        self.store.write(user_key, &remote).await?;

        let completed_at = Utc::now();
        self.store.mark_synced(user_key, completed_at).await?;

        Ok(SyncReport {
            pushed: !fresh,
            version,
            records: remote.record_count(),
            completed_at,
        })
    }

    fn on_success(&self, report: SyncReport) -> SyncOutcome {
        {
            let mut state = self.state.write();
            state.last_sync_time = Some(report.completed_at);
            state.retry_count = 0;
            state.last_error = None;
            if report.version.is_some() {
                state.last_version = report.version;
            }
        }
        info!(
            user_key = %self.user_key,
            pushed = report.pushed,
            records = report.records,
            "sync completed"
        );
        self.events.emit(SyncEvent::SyncSuccess {
            at: report.completed_at,
            version: report.version,
        });
        SyncOutcome::Completed(report)
    }

    fn on_failure(self: &Arc<Self>, err: SyncError) -> SyncOutcome {
        let failures = {
            let mut state = self.state.write();
            state.retry_count = state.retry_count.saturating_add(1);
            state.last_error = Some(err.clone());
            state.retry_count
        };

        if err.is_connectivity() {
            warn!(user_key = %self.user_key, error = %err, "server unreachable");
            self.set_online(false);
        } else if err.is_retryable() && self.config.retry.allows_retry(failures) {
            warn!(
                user_key = %self.user_key,
                error = %err,
                attempt = failures,
                delay_ms = self.config.retry.retry_delay.as_millis() as u64,
                "sync failed, retry scheduled"
            );
            self.schedule(TaskSlot::Retry, self.config.retry.retry_delay);
        } else {
            warn!(user_key = %self.user_key, error = %err, "sync failed");
        }

        self.events.emit(SyncEvent::SyncError(err.clone()));
        SyncOutcome::Failed(err)
    }

    fn is_online(&self) -> bool {
        self.state.read().is_online
    }

    /// Updates the online flag, emitting an event on transitions.
    fn set_online(&self, online: bool) -> bool {
        let changed = {
            let mut state = self.state.write();
            let changed = state.is_online != online;
            state.is_online = online;
            changed
        };
        if changed {
            if online {
                info!(user_key = %self.user_key, "online");
                self.events.emit(SyncEvent::Online);
            } else {
                info!(user_key = %self.user_key, "offline");
                self.events.emit(SyncEvent::Offline);
            }
        }
        changed
    }

    fn handle_online(self: &Arc<Self>) {
        self.set_online(true);
        self.schedule(TaskSlot::Reconnect, self.config.reconnect_delay);
    }

    async fn check_connection(&self) -> bool {
        let online = match time::timeout(self.config.timeout, self.transport.health()).await {
            Ok(Ok(())) => true,
            Ok(Err(err)) => {
                debug!(user_key = %self.user_key, error = %err, "health check failed");
                false
            }
            Err(_) => {
                debug!(user_key = %self.user_key, "health check timed out");
                false
            }
        };
        self.set_online(online);
        online
    }

    /// Runs a cycle on a task of its own and waits for it. Aborting the
    /// caller leaves the cycle running to completion.
    async fn run_detached(self: Arc<Self>) {
        if let Err(e) = tokio::spawn(async move { self.sync_now().await }).await {
            warn!(error = %e, "sync cycle task failed");
        }
    }

    /// Runs a cycle after `delay`, replacing any pending task in `slot`.
    fn schedule(self: &Arc<Self>, slot: TaskSlot, delay: Duration) {
        let mut tasks = self.tasks.lock();
        if tasks.stopped {
            debug!(user_key = %self.user_key, ?slot, "coordinator stopped, not scheduling");
            return;
        }

        let weak = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                inner.run_detached().await;
            }
        });
        let previous = match slot {
            TaskSlot::Retry => tasks.retry.replace(handle),
            TaskSlot::Reconnect => tasks.reconnect.replace(handle),
        };
        if let Some(previous) = previous {
            previous.abort();
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum TaskSlot {
    Retry,
    Reconnect,
}

/// Periodic sync. While offline each tick re-probes the server first, so
/// sync resumes on its own once the server answers again.
async fn tick(weak: Weak<Inner>, period: Duration) {
    let mut interval = time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        let Some(inner) = weak.upgrade() else { break };
        if inner.syncing.load(Ordering::Acquire) {
            continue;
        }
        if !inner.is_online() && !inner.check_connection().await {
            continue;
        }
        inner.run_detached().await;
    }
}

async fn watch_connectivity(weak: Weak<Inner>, mut feed: watch::Receiver<bool>) {
    while feed.changed().await.is_ok() {
        let online = *feed.borrow_and_update();
        let Some(inner) = weak.upgrade() else { break };
        if online {
            inner.handle_online();
        } else {
            inner.set_online(false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use crate::local_store::MemoryLocalStore;
    use crate::transport::{MockCall, MockTransport};
    use ledgersync_protocol::{Dataset, Record};

    fn coordinator(transport: Arc<MockTransport>, store: Arc<MemoryLocalStore>) -> SyncCoordinator {
        let config = SyncConfig::default()
            .with_retry(RetryConfig::new(2, Duration::from_secs(5)));
        SyncCoordinator::new("meg", config, transport, store)
    }

    fn local() -> Dataset {
        Dataset::empty_default().with_record("cotizaciones", Record::new().with("numero", "A1"))
    }

    #[tokio::test]
    async fn cycle_pushes_then_pulls() {
        let transport = Arc::new(MockTransport::new());
        let store = Arc::new(MemoryLocalStore::new());
        store.insert("meg", local());
        let coordinator = coordinator(transport.clone(), store.clone());

        let SyncOutcome::Completed(report) = coordinator.sync_now().await else {
            panic!("cycle did not complete");
        };
        assert!(report.pushed);
        assert_eq!(report.version, Some(1));
        assert_eq!(transport.push_calls(), 1);
        assert_eq!(transport.pull_calls(), 1);

        let status = coordinator.status();
        assert_eq!(status.last_version, Some(1));
        assert_eq!(status.retry_count, 0);
        assert!(status.last_sync_time.is_some());
        assert!(!status.is_syncing);
    }

    #[tokio::test]
    async fn offline_skips_without_network() {
        let transport = Arc::new(MockTransport::new());
        let coordinator = coordinator(transport.clone(), Arc::new(MemoryLocalStore::new()));

        coordinator.handle_offline();
        assert_eq!(
            coordinator.sync_now().await,
            SyncOutcome::Skipped(SkipReason::Offline)
        );
        assert_eq!(transport.push_calls() + transport.pull_calls(), 0);
    }

    #[tokio::test]
    async fn connectivity_failure_goes_offline() {
        let transport = Arc::new(MockTransport::new());
        let store = Arc::new(MemoryLocalStore::new());
        store.insert("meg", local());
        let coordinator = coordinator(transport.clone(), store);
        let mut events = coordinator.events();

        transport.set_connected(false);
        let outcome = coordinator.sync_now().await;
        assert!(matches!(outcome, SyncOutcome::Failed(SyncError::Connectivity(_))));
        assert!(!coordinator.status().is_online);

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        assert_eq!(seen.first(), Some(&SyncEvent::SyncStart));
        assert!(seen.contains(&SyncEvent::Offline));
        assert_eq!(seen.last(), Some(&SyncEvent::SyncEnd));
    }

    #[tokio::test]
    async fn check_connection_tracks_transitions() {
        let transport = Arc::new(MockTransport::new());
        let coordinator = coordinator(transport.clone(), Arc::new(MemoryLocalStore::new()));

        transport.set_connected(false);
        assert!(!coordinator.check_connection().await);
        assert!(!coordinator.status().is_online);

        transport.set_connected(true);
        assert!(coordinator.check_connection().await);
        assert!(coordinator.status().is_online);
        assert_eq!(transport.health_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn validation_failure_is_not_retried() {
        let transport = Arc::new(MockTransport::new());
        let store = Arc::new(MemoryLocalStore::new());
        store.insert("meg", local());
        let coordinator = coordinator(transport.clone(), store);

        transport.fail_next(MockCall::Push, SyncError::Validation("data is required".into()));
        assert!(matches!(
            coordinator.sync_now().await,
            SyncOutcome::Failed(SyncError::Validation(_))
        ));

        time::sleep(Duration::from_secs(60)).await;
        assert_eq!(transport.push_calls(), 1);
        assert_eq!(coordinator.status().retry_count, 1);
    }

    #[tokio::test]
    async fn disabled_coordinator_does_not_start() {
        let config = SyncConfig::default().with_enabled(false);
        let coordinator = SyncCoordinator::new(
            "meg",
            config,
            Arc::new(MockTransport::new()),
            Arc::new(MemoryLocalStore::new()),
        );
        coordinator.start();
        assert!(!coordinator.status().is_running);
    }

    #[tokio::test(start_paused = true)]
    async fn ticker_recovers_after_server_returns() {
        let transport = Arc::new(MockTransport::new());
        let store = Arc::new(MemoryLocalStore::new());
        store.insert("meg", local());
        let coordinator = coordinator(transport.clone(), store);

        transport.set_connected(false);
        coordinator.start();
        time::sleep(Duration::from_secs(5)).await;
        assert!(!coordinator.status().is_online);
        assert_eq!(transport.push_calls(), 0);

        transport.set_connected(true);
        // First tick lands at 30 s.
        time::sleep(Duration::from_secs(30)).await;

        let status = coordinator.status();
        assert!(status.is_online);
        assert!(status.last_sync_time.is_some());
        assert_eq!(transport.push_calls(), 1);
        assert_eq!(transport.health_calls(), 2);
        coordinator.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn stop_lets_in_flight_cycle_finish() {
        let transport = Arc::new(MockTransport::new());
        transport.set_latency(Duration::from_secs(1));
        let store = Arc::new(MemoryLocalStore::new());
        store.insert("meg", local());
        let coordinator = coordinator(transport.clone(), store.clone());
        let mut events = coordinator.events();

        // Health probe and startup delay end at 2 s; push runs until 3 s.
        coordinator.start();
        time::sleep(Duration::from_millis(2500)).await;
        assert!(coordinator.status().is_syncing);

        coordinator.stop();
        time::sleep(Duration::from_secs(5)).await;

        let status = coordinator.status();
        assert!(!status.is_syncing);
        assert!(!status.is_running);
        assert!(status.last_sync_time.is_some());
        assert_eq!(transport.push_calls(), 1);
        assert_eq!(transport.pull_calls(), 1);
        assert_eq!(store.get("meg"), Some(transport.remote()));

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        assert_eq!(seen.first(), Some(&SyncEvent::SyncStart));
        assert!(seen.iter().any(|e| matches!(e, SyncEvent::SyncSuccess { .. })));
        assert_eq!(seen.last(), Some(&SyncEvent::SyncEnd));
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_coordinator_schedules_no_retry() {
        let transport = Arc::new(MockTransport::new());
        transport.set_latency(Duration::from_secs(1));
        transport.fail_next(MockCall::Pull, SyncError::Timeout);
        let store = Arc::new(MemoryLocalStore::new());
        store.insert("meg", local());
        let coordinator = coordinator(transport.clone(), store);

        coordinator.start();
        time::sleep(Duration::from_millis(2500)).await;
        coordinator.stop();
        time::sleep(Duration::from_secs(20)).await;

        assert_eq!(coordinator.status().last_error, Some(SyncError::Timeout));
        assert_eq!(transport.push_calls(), 1);
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let coordinator = coordinator(
            Arc::new(MockTransport::new()),
            Arc::new(MemoryLocalStore::new()),
        );
        coordinator.start();
        assert!(coordinator.status().is_running);
        coordinator.stop();
        coordinator.stop();
        assert!(!coordinator.status().is_running);
    }
}
