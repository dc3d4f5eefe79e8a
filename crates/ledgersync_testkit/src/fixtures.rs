//! Record fixtures and time helpers.

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use ledgersync_protocol::{Dataset, Record};
use tempfile::TempDir;

/// A fixed instant used as "now" by deterministic tests.
///
/// 2024-06-30T12:00:00Z.
pub fn reference_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 30, 12, 0, 0)
        .single()
        .unwrap_or_default()
}

/// Formats an instant the way clients stamp `updatedAt`.
pub fn iso(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Returns `updatedAt` text for `days` before `now`.
pub fn days_before(now: DateTime<Utc>, days: i64) -> String {
    iso(now - chrono::Duration::days(days))
}

/// Returns `updatedAt` text for `days` before [`reference_now`].
pub fn days_ago(days: i64) -> String {
    days_before(reference_now(), days)
}

/// A quotation keyed by `numero`.
pub fn quote(numero: &str, updated_at: &str) -> Record {
    Record::new()
        .with("numero", numero)
        .with("updatedAt", updated_at)
}

/// A provider keyed by `rut`.
pub fn provider(rut: &str, name: &str) -> Record {
    Record::new().with("rut", rut).with("nombre", name)
}

/// A purchase order keyed by `numero`, dated by its business date only.
pub fn purchase_order(numero: &str, fecha: &str) -> Record {
    Record::new().with("numero", numero).with("fecha", fecha)
}

/// A work order keyed by `numero`.
pub fn work_order(numero: &str, updated_at: &str) -> Record {
    Record::new()
        .with("numero", numero)
        .with("updatedAt", updated_at)
        .with("estado", "abierta")
}

/// Marks a record as deleted at the given `updatedAt` text.
pub fn deleted(record: Record, updated_at: &str) -> Record {
    record.with("deleted", true).with("updatedAt", updated_at)
}

/// A default dataset with the given quotations.
pub fn quotes(records: impl IntoIterator<Item = Record>) -> Dataset {
    records
        .into_iter()
        .fold(Dataset::empty_default(), |dataset, record| {
            dataset.with_record("cotizaciones", record)
        })
}

/// Returns the quotation keys of a dataset in stored order.
pub fn quote_keys(dataset: &Dataset) -> Vec<String> {
    dataset
        .collection("cotizaciones")
        .unwrap_or_default()
        .iter()
        .filter_map(|record| record.key("numero"))
        .collect()
}

/// A temporary directory removed on drop.
pub struct TestDir {
    dir: TempDir,
}

impl TestDir {
    /// Creates a new temporary directory.
    ///
    /// # Panics
    ///
    /// Panics if the directory cannot be created.
    #[allow(clippy::expect_used)]
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create temp directory"),
        }
    }

    /// Returns the directory path.
    pub fn path(&self) -> &std::path::Path {
        self.dir.path()
    }
}

impl Default for TestDir {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledgersync_protocol::Timestamp;

    #[test]
    fn relative_dates() {
        assert_eq!(iso(reference_now()), "2024-06-30T12:00:00.000Z");
        assert_eq!(days_ago(30), "2024-05-31T12:00:00.000Z");
    }

    #[test]
    fn fixtures_have_keys_and_timestamps() {
        let record = quote("A1", "2024-01-01");
        assert_eq!(record.key("numero").as_deref(), Some("A1"));
        assert!(record.effective_timestamp().is_present());

        let order = purchase_order("P1", "2024-01-01");
        assert!(matches!(order.effective_timestamp(), Timestamp::At(_)));

        assert!(deleted(provider("1-9", "MEG"), &days_ago(1)).is_deleted());
    }

    #[test]
    fn quote_dataset() {
        let dataset = quotes([quote("A1", "2024-01-01"), quote("A2", "2024-01-02")]);
        assert_eq!(quote_keys(&dataset), vec!["A1", "A2"]);
        assert_eq!(dataset.collection("clientes").map(|c| c.len()), Some(0));
    }

    #[test]
    fn test_dir_exists() {
        let dir = TestDir::new();
        assert!(dir.path().is_dir());
    }
}
