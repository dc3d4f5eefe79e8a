//! LedgerSync CLI
//!
//! Command-line tools for running and operating LedgerSync.
//!
//! # Commands
//!
//! - `serve` - Run the replication server
//! - `sync` - Run one sync cycle for a user
//! - `watch` - Keep a user in sync until interrupted
//! - `sweep` - Purge expired tombstones from a data directory
//! - `stats` - Show per-user dataset statistics
//!
//! Settings are read from `LEDGERSYNC_*` environment variables (a `.env`
//! file is honoured) and can be overridden by flags.

mod commands;

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// LedgerSync replication tools.
#[derive(Parser)]
#[command(name = "ledgersync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the replication server
    Serve {
        /// Address to listen on
        #[arg(short, long, env = "LEDGERSYNC_BIND")]
        bind: Option<SocketAddr>,

        /// Directory for persisted datasets (in-memory if omitted)
        #[arg(short, long, env = "LEDGERSYNC_DATA_DIR")]
        data_dir: Option<PathBuf>,

        /// Days a tombstone is kept before the sweeper removes it
        #[arg(long, env = "LEDGERSYNC_RETENTION_DAYS")]
        retention_days: Option<u64>,

        /// Include error details in responses
        #[arg(long)]
        development: bool,
    },

    /// Run one sync cycle for a user
    Sync {
        #[command(flatten)]
        client: ClientArgs,
    },

    /// Keep a user in sync until interrupted
    Watch {
        #[command(flatten)]
        client: ClientArgs,

        /// Seconds between scheduled cycles
        #[arg(short, long, env = "LEDGERSYNC_SYNC_INTERVAL_SECS")]
        interval: Option<u64>,
    },

    /// Purge expired tombstones from a data directory
    Sweep {
        /// Server data directory
        #[arg(short, long, env = "LEDGERSYNC_DATA_DIR")]
        data_dir: PathBuf,

        /// Days a tombstone is kept
        #[arg(long, env = "LEDGERSYNC_RETENTION_DAYS", default_value = "30")]
        retention_days: u64,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show per-user dataset statistics
    Stats {
        /// Server data directory
        #[arg(short, long, env = "LEDGERSYNC_DATA_DIR")]
        data_dir: PathBuf,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

/// Arguments shared by the client commands.
#[derive(clap::Args)]
struct ClientArgs {
    /// Sync server base URL
    #[arg(short, long, env = "LEDGERSYNC_SERVER_URL")]
    server: String,

    /// User key to sync
    #[arg(short, long, env = "LEDGERSYNC_USER_KEY")]
    user: String,

    /// Directory holding the local datasets
    #[arg(short, long, env = "LEDGERSYNC_LOCAL_DIR", default_value = ".ledgersync")]
    local_dir: PathBuf,

    /// Request timeout in seconds
    #[arg(short, long, env = "LEDGERSYNC_TIMEOUT_SECS")]
    timeout: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // A missing .env file is fine.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Serve {
            bind,
            data_dir,
            retention_days,
            development,
        } => {
            commands::serve::run(commands::serve::ServeOptions {
                bind,
                data_dir,
                retention_days,
                development,
            })
            .await?;
        }
        Commands::Sync { client } => {
            commands::sync::run_once(&client.into_options(None)).await?;
        }
        Commands::Watch { client, interval } => {
            commands::sync::watch(&client.into_options(interval)).await?;
        }
        Commands::Sweep {
            data_dir,
            retention_days,
            format,
        } => {
            commands::sweep::run(&data_dir, retention_days, &format)?;
        }
        Commands::Stats { data_dir, format } => {
            commands::stats::run(&data_dir, &format)?;
        }
        Commands::Version => {
            println!("LedgerSync CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("LedgerSync Server v{}", ledgersync_server::SERVER_VERSION);
        }
    }

    Ok(())
}

impl ClientArgs {
    fn into_options(self, interval: Option<u64>) -> commands::sync::ClientOptions {
        commands::sync::ClientOptions {
            server: self.server,
            user: self.user,
            local_dir: self.local_dir,
            timeout_secs: self.timeout,
            interval_secs: interval,
        }
    }
}
