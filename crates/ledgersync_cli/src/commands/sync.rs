//! Sync and watch command implementations.

use ledgersync_engine::{
    FileLocalStore, HttpTransport, SkipReason, SyncConfig, SyncCoordinator, SyncEvent,
    SyncOutcome, SyncResult,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Options shared by `sync` and `watch`.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Server base URL.
    pub server: String,
    /// User key.
    pub user: String,
    /// Local dataset directory.
    pub local_dir: PathBuf,
    /// Request timeout override.
    pub timeout_secs: Option<u64>,
    /// Sync interval override.
    pub interval_secs: Option<u64>,
}

impl ClientOptions {
    /// Builds the coordinator configuration, starting from the environment
    /// when it provides a server URL.
    pub fn config(&self) -> SyncResult<SyncConfig> {
        let mut config = if std::env::var_os("LEDGERSYNC_SERVER_URL").is_some() {
            SyncConfig::from_env()?
        } else {
            SyncConfig::default()
        };
        config.server_url = self.server.clone();
        if let Some(secs) = self.timeout_secs {
            config = config.with_timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = self.interval_secs {
            config = config.with_sync_interval(Duration::from_secs(secs));
        }
        Ok(config)
    }
}

async fn coordinator(options: &ClientOptions) -> Result<SyncCoordinator, Box<dyn std::error::Error>> {
    let config = options.config()?;
    let transport = Arc::new(HttpTransport::from_config(&config)?);
    let store = Arc::new(FileLocalStore::open(&options.local_dir).await?);
    Ok(SyncCoordinator::new(
        options.user.clone(),
        config,
        transport,
        store,
    ))
}

/// Runs a single cycle and reports the outcome.
pub async fn run_once(options: &ClientOptions) -> Result<(), Box<dyn std::error::Error>> {
    let coordinator = coordinator(options).await?;

    if !coordinator.check_connection().await {
        return Err(format!("server {} is unreachable", options.server).into());
    }

    match coordinator.sync_now().await {
        SyncOutcome::Completed(report) => {
            println!("Sync completed for {}", options.user);
            println!("  Pushed:  {}", if report.pushed { "yes" } else { "no (fresh install)" });
            if let Some(version) = report.version {
                println!("  Version: {}", version);
            }
            println!("  Records: {}", report.records);
            Ok(())
        }
        SyncOutcome::Skipped(SkipReason::Busy) => Err("a sync is already running".into()),
        SyncOutcome::Skipped(SkipReason::Offline) => {
            Err(format!("server {} is unreachable", options.server).into())
        }
        SyncOutcome::Failed(err) => Err(err.into()),
    }
}

/// Keeps the user in sync until Ctrl-C.
pub async fn watch(options: &ClientOptions) -> Result<(), Box<dyn std::error::Error>> {
    let coordinator = coordinator(options).await?;
    coordinator.subscribe(log_event);
    coordinator.start();
    info!(
        user_key = %options.user,
        server = %options.server,
        "watching; press Ctrl-C to stop"
    );

    tokio::signal::ctrl_c().await?;
    coordinator.stop();
    Ok(())
}

fn log_event(event: &SyncEvent) {
    match event {
        SyncEvent::Online => info!("server reachable"),
        SyncEvent::Offline => warn!("server unreachable"),
        SyncEvent::SyncSuccess { version, .. } => info!(?version, "synced"),
        SyncEvent::SyncError(err) => error!(error = %err, "sync failed"),
        SyncEvent::SyncStart | SyncEvent::SyncEnd => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_config() {
        let options = ClientOptions {
            server: "http://sync.example.com:3002".into(),
            user: "meg".into(),
            local_dir: PathBuf::from(".ledgersync"),
            timeout_secs: Some(5),
            interval_secs: Some(10),
        };
        let config = options.config().unwrap();
        assert_eq!(config.server_url, "http://sync.example.com:3002");
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.sync_interval, Duration::from_secs(10));
    }
}
