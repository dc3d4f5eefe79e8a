//! Sweep command implementation.

use ledgersync_server::{
    retention_from_days, FileStore, KeyedLocks, RetentionSweeper, SweepReport,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// Sweep result as printed.
#[derive(Debug, Serialize)]
pub struct SweepSummary {
    /// Data directory.
    pub path: String,
    /// Retention window in days.
    pub retention_days: u64,
    /// Datasets examined.
    pub datasets_scanned: usize,
    /// Datasets written back.
    pub datasets_changed: usize,
    /// Datasets that could not be swept.
    pub datasets_failed: usize,
    /// Records removed per collection.
    pub removed: BTreeMap<String, usize>,
}

impl SweepSummary {
    fn new(path: &Path, retention_days: u64, report: SweepReport) -> Self {
        Self {
            path: path.display().to_string(),
            retention_days,
            datasets_scanned: report.datasets_scanned,
            datasets_changed: report.datasets_changed,
            datasets_failed: report.datasets_failed,
            removed: report.removed,
        }
    }
}

/// Sweeps a data directory once.
///
/// Fails if a server currently holds the directory.
pub fn sweep(path: &Path, retention_days: u64) -> Result<SweepSummary, Box<dyn std::error::Error>> {
    let retention = retention_from_days(retention_days)?;
    let store = Arc::new(FileStore::open(path)?);
    let report = RetentionSweeper::new(store, Arc::new(KeyedLocks::new()), retention).sweep()?;
    Ok(SweepSummary::new(path, retention_days, report))
}

/// Runs the sweep command.
pub fn run(path: &Path, retention_days: u64, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let summary = sweep(path, retention_days)?;

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("Retention sweep: {}", summary.path);
    println!("  Retention:        {} days", summary.retention_days);
    println!("  Datasets scanned: {}", summary.datasets_scanned);
    println!("  Datasets changed: {}", summary.datasets_changed);
    if summary.datasets_failed > 0 {
        println!("  Datasets failed:  {}", summary.datasets_failed);
    }
    if summary.removed.is_empty() {
        println!("  Nothing to remove");
    }
    for (collection, count) in &summary.removed {
        println!("  Removed from {}: {}", collection, count);
    }
    Ok(())
}
