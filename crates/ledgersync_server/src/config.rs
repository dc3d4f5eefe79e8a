//! Server configuration.

use crate::error::{ServerError, ServerResult};
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// Configuration for the sync server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Directory for the file store; `None` keeps datasets in memory.
    pub data_dir: Option<PathBuf>,
    /// Age after which tombstoned records are purged.
    pub retention: Duration,
    /// Interval between retention sweeps.
    pub sweep_interval: Duration,
    /// Delay before the first sweep after start.
    pub initial_sweep_delay: Duration,
    /// Hides diagnostic detail in error bodies when true.
    pub production: bool,
    /// Maximum accepted request body size.
    pub max_body_bytes: usize,
    /// Allowed CORS origins; empty allows any origin.
    pub cors_origins: Vec<String>,
    /// User keys that get an empty dataset at startup.
    pub seed_users: Vec<String>,
}

impl ServerConfig {
    /// Creates a new server configuration.
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            data_dir: None,
            retention: Duration::from_secs(30 * SECS_PER_DAY),
            sweep_interval: Duration::from_secs(SECS_PER_DAY),
            initial_sweep_delay: Duration::from_secs(10),
            production: true,
            max_body_bytes: 100 * 1024 * 1024,
            cors_origins: Vec::new(),
            seed_users: Vec::new(),
        }
    }

    /// Loads configuration from `LEDGERSYNC_*` environment variables,
    /// falling back to defaults for anything unset.
    pub fn from_env() -> ServerResult<Self> {
        let mut config = Self::default();

        if let Some(addr) = read_var("LEDGERSYNC_BIND") {
            config.bind_addr = addr
                .parse()
                .map_err(|_| ServerError::Config(format!("invalid LEDGERSYNC_BIND: {}", addr)))?;
        }
        if let Some(dir) = read_var("LEDGERSYNC_DATA_DIR") {
            config.data_dir = Some(PathBuf::from(dir));
        }
        if let Some(days) = read_var("LEDGERSYNC_RETENTION_DAYS") {
            config = config.with_retention_days(parse_number("LEDGERSYNC_RETENTION_DAYS", &days)?)?;
        }
        if let Some(secs) = read_var("LEDGERSYNC_SWEEP_INTERVAL_SECS") {
            config.sweep_interval =
                Duration::from_secs(parse_number("LEDGERSYNC_SWEEP_INTERVAL_SECS", &secs)?);
        }
        if let Some(mode) = read_var("LEDGERSYNC_ENV") {
            config.production = !mode.eq_ignore_ascii_case("development");
        }
        if let Some(bytes) = read_var("LEDGERSYNC_MAX_BODY_BYTES") {
            config.max_body_bytes = parse_number("LEDGERSYNC_MAX_BODY_BYTES", &bytes)? as usize;
        }
        if let Some(origins) = read_var("LEDGERSYNC_CORS_ORIGINS") {
            config.cors_origins = split_list(&origins);
        }
        if let Some(users) = read_var("LEDGERSYNC_SEED_USERS") {
            config.seed_users = split_list(&users);
        }

        Ok(config)
    }

    /// Uses a file store rooted at the given directory.
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    /// Sets the tombstone retention window in days.
    pub fn with_retention_days(mut self, days: u64) -> ServerResult<Self> {
        self.retention = retention_from_days(days)?;
        Ok(self)
    }

    /// Sets the sweep schedule.
    pub fn with_sweep_schedule(mut self, initial_delay: Duration, interval: Duration) -> Self {
        self.initial_sweep_delay = initial_delay;
        self.sweep_interval = interval;
        self
    }

    /// Enables or disables production mode.
    pub fn with_production(mut self, production: bool) -> Self {
        self.production = production;
        self
    }

    /// Sets the maximum request body size.
    pub fn with_max_body_bytes(mut self, bytes: usize) -> Self {
        self.max_body_bytes = bytes;
        self
    }

    /// Restricts CORS to the given origins.
    pub fn with_cors_origins(mut self, origins: Vec<String>) -> Self {
        self.cors_origins = origins;
        self
    }

    /// Seeds empty datasets for the given users at startup.
    pub fn with_seed_users(mut self, users: Vec<String>) -> Self {
        self.seed_users = users;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(SocketAddr::from(([0, 0, 0, 0], 3002)))
    }
}

/// Converts a retention window in days to a duration.
pub fn retention_from_days(days: u64) -> ServerResult<Duration> {
    days.checked_mul(SECS_PER_DAY)
        .map(Duration::from_secs)
        .ok_or_else(|| ServerError::Config(format!("retention of {} days is out of range", days)))
}

fn read_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_number(name: &str, raw: &str) -> ServerResult<u64> {
    raw.trim()
        .parse()
        .map_err(|_| ServerError::Config(format!("invalid {}: {}", name, raw)))
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
