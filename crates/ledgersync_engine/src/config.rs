//! Configuration for the sync coordinator.

use crate::error::{SyncError, SyncResult};
use std::env;
use std::time::Duration;

/// Configuration for sync operations.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Base URL of the sync server (e.g. `http://sync.example.com:3002`).
    pub server_url: String,
    /// Whether automatic sync runs at all.
    pub enabled: bool,
    /// Interval between scheduled cycles.
    pub sync_interval: Duration,
    /// Deadline for each HTTP request.
    pub timeout: Duration,
    /// Retry configuration.
    pub retry: RetryConfig,
    /// Delay before the first cycle after `start()`.
    pub startup_delay: Duration,
    /// Delay before resyncing after connectivity returns.
    pub reconnect_delay: Duration,
}

impl SyncConfig {
    /// Creates a new sync configuration.
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            enabled: true,
            sync_interval: Duration::from_secs(30),
            timeout: Duration::from_secs(60),
            retry: RetryConfig::default(),
            startup_delay: Duration::from_secs(2),
            reconnect_delay: Duration::from_secs(1),
        }
    }

    /// Loads configuration from `LEDGERSYNC_*` environment variables.
    ///
    /// `LEDGERSYNC_SERVER_URL` is required; everything else falls back to the
    /// defaults of [`SyncConfig::new`].
    pub fn from_env() -> SyncResult<Self> {
        let url = read_var("LEDGERSYNC_SERVER_URL")
            .ok_or_else(|| SyncError::Validation("LEDGERSYNC_SERVER_URL is not set".into()))?;
        let mut config = Self::new(url);

        if let Some(enabled) = read_var("LEDGERSYNC_SYNC_ENABLED") {
            config.enabled = !matches!(enabled.to_ascii_lowercase().as_str(), "false" | "0" | "no" | "off");
        }
        if let Some(secs) = read_var("LEDGERSYNC_SYNC_INTERVAL_SECS") {
            config.sync_interval = Duration::from_secs(parse_number("LEDGERSYNC_SYNC_INTERVAL_SECS", &secs)?);
        }
        if let Some(secs) = read_var("LEDGERSYNC_TIMEOUT_SECS") {
            config.timeout = Duration::from_secs(parse_number("LEDGERSYNC_TIMEOUT_SECS", &secs)?);
        }
        if let Some(retries) = read_var("LEDGERSYNC_MAX_RETRIES") {
            config.retry.max_retries = parse_number("LEDGERSYNC_MAX_RETRIES", &retries)? as u32;
        }
        if let Some(secs) = read_var("LEDGERSYNC_RETRY_DELAY_SECS") {
            config.retry.retry_delay = Duration::from_secs(parse_number("LEDGERSYNC_RETRY_DELAY_SECS", &secs)?);
        }

        Ok(config)
    }

    /// Enables or disables automatic sync.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Sets the interval between scheduled cycles.
    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }

    /// Sets the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the delay before the first cycle.
    pub fn with_startup_delay(mut self, delay: Duration) -> Self {
        self.startup_delay = delay;
        self
    }

    /// Sets the delay before resyncing on reconnect.
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new("http://localhost:3002")
    }
}

/// Configuration for retry behavior.
///
/// Retries use a fixed delay. A failed cycle schedules another one only while
/// the consecutive failure count, including that failure, is below
/// `max_retries`. The default of 3 therefore allows three attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Consecutive failures after which no retry is scheduled.
    pub max_retries: u32,
    /// Delay before each retry.
    pub retry_delay: Duration,
}

impl RetryConfig {
    /// Creates a new retry configuration.
    pub fn new(max_retries: u32, retry_delay: Duration) -> Self {
        Self {
            max_retries,
            retry_delay,
        }
    }

    /// Creates a configuration with no retries.
    pub fn no_retry() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// Returns true if a retry may follow the given number of consecutive
    /// failures, counting the one just observed.
    pub fn allows_retry(&self, failures: u32) -> bool {
        failures < self.max_retries
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(5))
    }
}

fn read_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_number(name: &str, raw: &str) -> SyncResult<u64> {
    raw.trim()
        .parse()
        .map_err(|_| SyncError::Validation(format!("invalid {}: {}", name, raw)))
}
