//! Retention sweep of old tombstones.

use crate::error::{ServerError, ServerResult};
use crate::locks::KeyedLocks;
use crate::store::DatasetStore;
use chrono::{DateTime, Utc};
use ledgersync_protocol::{Dataset, Timestamp};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Outcome of a sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Datasets examined.
    pub datasets_scanned: usize,
    /// Datasets that lost at least one record and were written back.
    pub datasets_changed: usize,
    /// Datasets skipped because loading or saving failed.
    pub datasets_failed: usize,
    /// Records removed per collection.
    pub removed: BTreeMap<String, usize>,
}

impl SweepReport {
    /// Total records removed.
    pub fn total_removed(&self) -> usize {
        self.removed.values().sum()
    }

    fn absorb(&mut self, other: SweepReport) {
        self.datasets_scanned += other.datasets_scanned;
        self.datasets_changed += other.datasets_changed;
        self.datasets_failed += other.datasets_failed;
        for (collection, count) in other.removed {
            *self.removed.entry(collection).or_default() += count;
        }
    }
}

/// Removes tombstones at or before `cutoff` from every collection.
///
/// A record is removed only when it is deleted and its effective timestamp
/// parses. Live records and tombstones without a usable timestamp stay.
pub fn sweep_dataset(dataset: &mut Dataset, cutoff: DateTime<Utc>) -> SweepReport {
    let mut report = SweepReport {
        datasets_scanned: 1,
        ..SweepReport::default()
    };

    for (name, records) in dataset.collections_mut() {
        let before = records.len();
        records.retain(|record| {
            if !record.is_deleted() {
                return true;
            }
            match record.effective_timestamp() {
                Timestamp::At(at) => at > cutoff,
                Timestamp::Missing | Timestamp::Unparseable => true,
            }
        });
        let removed = before - records.len();
        if removed > 0 {
            report.removed.insert(name.to_string(), removed);
        }
    }

    if report.total_removed() > 0 {
        report.datasets_changed = 1;
    }
    report
}

/// Periodically purges expired tombstones from every stored dataset.
#[derive(Clone)]
pub struct RetentionSweeper {
    store: Arc<dyn DatasetStore>,
    locks: Arc<KeyedLocks>,
    retention: Duration,
}

impl RetentionSweeper {
    /// Creates a sweeper over the given store.
    pub fn new(store: Arc<dyn DatasetStore>, locks: Arc<KeyedLocks>, retention: Duration) -> Self {
        Self {
            store,
            locks,
            retention,
        }
    }

    /// Sweeps every dataset using the current time.
    pub fn sweep(&self) -> ServerResult<SweepReport> {
        self.sweep_at(Utc::now())
    }

    /// Sweeps every dataset as if the current time were `now`.
    pub fn sweep_at(&self, now: DateTime<Utc>) -> ServerResult<SweepReport> {
        let retention = chrono::Duration::from_std(self.retention)
            .map_err(|e| ServerError::Config(format!("retention out of range: {}", e)))?;
        let cutoff = now - retention;
        let mut report = SweepReport::default();

        for user_key in self.store.user_keys()? {
            match self.sweep_user(&user_key, cutoff) {
                Ok(user_report) => report.absorb(user_report),
                Err(e) => {
                    error!(user_key = %user_key, error = %e, "retention sweep failed for user");
                    report.datasets_failed += 1;
                }
            }
        }

        if report.total_removed() > 0 {
            info!(
                removed = report.total_removed(),
                datasets = report.datasets_changed,
                "retention sweep removed expired tombstones"
            );
        } else {
            debug!(datasets = report.datasets_scanned, "retention sweep found nothing to remove");
        }
        Ok(report)
    }

    fn sweep_user(&self, user_key: &str, cutoff: DateTime<Utc>) -> ServerResult<SweepReport> {
        self.locks.with_lock(user_key, || {
            let Some(row) = self.store.load(user_key)? else {
                return Ok(SweepReport::default());
            };
            let mut dataset = row.dataset;
            let report = sweep_dataset(&mut dataset, cutoff);
            if report.datasets_changed > 0 {
                self.store.replace(user_key, dataset)?;
            }
            Ok(report)
        })
    }

    /// Runs the sweep after `initial_delay` and then every `interval`.
    ///
    /// Each pass runs on the blocking pool. Failures are logged and the
    /// schedule continues. Abort the returned handle to stop.
    pub fn spawn(self, initial_delay: Duration, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            tokio::time::sleep(initial_delay).await;
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let sweeper = self.clone();
                match tokio::task::spawn_blocking(move || sweeper.sweep()).await {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => error!(error = %e, "retention sweep failed"),
                    Err(e) => error!(error = %e, "retention sweep task panicked"),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::{SecondsFormat, TimeZone};
    use ledgersync_protocol::Record;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 30, 12, 0, 0).unwrap()
    }

    fn days_ago(days: i64) -> String {
        (now() - chrono::Duration::days(days)).to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    fn cutoff() -> DateTime<Utc> {
        now() - chrono::Duration::days(30)
    }

    fn numeros(dataset: &Dataset) -> Vec<String> {
        dataset
            .collection("cotizaciones")
            .unwrap()
            .iter()
            .filter_map(|r| r.key("numero"))
            .collect()
    }

    #[test]
    fn removes_only_expired_tombstones() {
        let mut dataset = Dataset::empty_default()
            .with_record(
                "cotizaciones",
                Record::new().with("numero", "OLD").with("deleted", true).with("updatedAt", days_ago(31)),
            )
            .with_record(
                "cotizaciones",
                Record::new().with("numero", "RECENT").with("deleted", true).with("updatedAt", days_ago(10)),
            )
            .with_record(
                "cotizaciones",
                Record::new().with("numero", "LIVE").with("updatedAt", days_ago(400)),
            )
            .with_record(
                "cotizaciones",
                Record::new().with("numero", "UNDATED").with("deleted", true),
            )
            .with_record(
                "cotizaciones",
                Record::new().with("numero", "GARBLED").with("deleted", true).with("updatedAt", "soon"),
            );

        let report = sweep_dataset(&mut dataset, cutoff());

        assert_eq!(numeros(&dataset), vec!["RECENT", "LIVE", "UNDATED", "GARBLED"]);
        assert_eq!(report.removed.get("cotizaciones"), Some(&1));
        assert_eq!(report.datasets_changed, 1);
    }

    #[test]
    fn boundary_is_inclusive() {
        let mut dataset = Dataset::new().with_record(
            "cotizaciones",
            Record::new().with("numero", "EDGE").with("deleted", true).with("updatedAt", days_ago(30)),
        );
        sweep_dataset(&mut dataset, cutoff());
        assert!(dataset.collection("cotizaciones").unwrap().is_empty());
    }

    #[test]
    fn falls_back_to_business_date() {
        let mut dataset = Dataset::new().with_record(
            "ordenesCompra",
            Record::new().with("numero", "P1").with("deleted", true).with("fecha", "2024-01-02"),
        );
        let report = sweep_dataset(&mut dataset, cutoff());
        assert_eq!(report.total_removed(), 1);
    }

    #[test]
    fn sweeper_keeps_version_and_skips_unchanged() {
        let store = Arc::new(MemoryStore::new());
        store
            .upsert(
                "meg",
                Dataset::empty_default().with_record(
                    "cotizaciones",
                    Record::new().with("numero", "A1").with("deleted", true).with("updatedAt", days_ago(31)),
                ),
            )
            .unwrap();
        store.upsert("myorganic", Dataset::empty_default()).unwrap();
        let before = store.load("myorganic").unwrap().unwrap();

        let sweeper = RetentionSweeper::new(
            store.clone(),
            Arc::new(KeyedLocks::new()),
            Duration::from_secs(30 * 24 * 60 * 60),
        );
        let report = sweeper.sweep_at(now()).unwrap();

        assert_eq!(report.datasets_scanned, 2);
        assert_eq!(report.datasets_changed, 1);
        assert_eq!(report.total_removed(), 1);

        let meg = store.load("meg").unwrap().unwrap();
        assert_eq!(meg.version, 1);
        assert!(meg.dataset.collection("cotizaciones").unwrap().is_empty());
        assert_eq!(store.load("myorganic").unwrap().unwrap(), before);
    }
}
