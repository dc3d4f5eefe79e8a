//! Stats command implementation.

use ledgersync_protocol::StatsResponse;
use ledgersync_server::{FileStore, HandlerContext, ReplicationHandler, ServerConfig};
use std::path::Path;
use std::sync::Arc;

/// Reads per-user statistics from a data directory.
pub fn collect(path: &Path) -> Result<StatsResponse, Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err(format!("No data directory found at {:?}", path).into());
    }
    let store = Arc::new(FileStore::open(path)?);
    let context = HandlerContext::new(ServerConfig::default().with_data_dir(path), store);
    Ok(ReplicationHandler::new(Arc::new(context)).handle_stats()?)
}

/// Runs the stats command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let response = collect(path)?;

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }

    if response.stats.is_empty() {
        println!("No datasets in {}", path.display());
        return Ok(());
    }
    for user in &response.stats {
        println!("{}", user.user_key);
        println!("  Version:    {}", user.version);
        println!("  Updated at: {}", user.updated_at.to_rfc3339());
        for (collection, count) in &user.collections {
            println!("  {:<16}{}", format!("{}:", collection), count);
        }
    }
    Ok(())
}
