//! Serve command implementation.

use ledgersync_server::{ServerConfig, SyncServer};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::info;

/// Flag overrides for the server configuration.
#[derive(Debug, Default)]
pub struct ServeOptions {
    /// Listen address.
    pub bind: Option<SocketAddr>,
    /// Data directory.
    pub data_dir: Option<PathBuf>,
    /// Tombstone retention in days.
    pub retention_days: Option<u64>,
    /// Development mode.
    pub development: bool,
}

/// Builds the server configuration from the environment and flags.
pub fn config(options: ServeOptions) -> Result<ServerConfig, Box<dyn std::error::Error>> {
    let mut config = ServerConfig::from_env()?;
    if let Some(bind) = options.bind {
        config.bind_addr = bind;
    }
    if let Some(dir) = options.data_dir {
        config = config.with_data_dir(dir);
    }
    if let Some(days) = options.retention_days {
        config = config.with_retention_days(days)?;
    }
    if options.development {
        config = config.with_production(false);
    }
    Ok(config)
}

/// Runs the server until Ctrl-C.
pub async fn run(options: ServeOptions) -> Result<(), Box<dyn std::error::Error>> {
    let config = config(options)?;
    match &config.data_dir {
        Some(dir) => info!(data_dir = %dir.display(), "using file store"),
        None => info!("using in-memory store; data is lost on exit"),
    }

    let server = SyncServer::new(config)?;
    server
        .serve(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested");
        })
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_defaults() {
        let config = config(ServeOptions {
            bind: Some("127.0.0.1:4000".parse().unwrap()),
            data_dir: Some(PathBuf::from("/tmp/ledgersync")),
            retention_days: Some(7),
            development: true,
        })
        .unwrap();

        assert_eq!(config.bind_addr.port(), 4000);
        assert_eq!(config.data_dir, Some(PathBuf::from("/tmp/ledgersync")));
        assert_eq!(config.retention.as_secs(), 7 * 24 * 60 * 60);
        assert!(!config.production);
    }

    #[test]
    fn huge_retention_is_an_error() {
        let result = config(ServeOptions {
            bind: None,
            data_dir: None,
            retention_days: Some(u64::MAX),
            development: false,
        });
        assert!(result.is_err());
    }
}
