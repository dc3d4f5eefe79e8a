//! In-memory dataset store.

use super::{AuditEntry, DatasetStore, StoreError, StoreResult, StoredDataset};
use chrono::Utc;
use ledgersync_protocol::Dataset;
use parking_lot::RwLock;
use std::collections::HashMap;

/// A [`DatasetStore`] that keeps everything in process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    rows: RwLock<HashMap<String, StoredDataset>>,
    audit: RwLock<Vec<AuditEntry>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of users with a dataset.
    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    /// Returns true if no user has a dataset.
    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }
}

impl DatasetStore for MemoryStore {
    fn load(&self, user_key: &str) -> StoreResult<Option<StoredDataset>> {
        Ok(self.rows.read().get(user_key).cloned())
    }

    fn create(&self, user_key: &str, dataset: Dataset) -> StoreResult<StoredDataset> {
        let mut rows = self.rows.write();
        let row = rows
            .entry(user_key.to_string())
            .or_insert_with(|| StoredDataset::new(user_key, dataset, Utc::now()));
        Ok(row.clone())
    }

    fn upsert(&self, user_key: &str, dataset: Dataset) -> StoreResult<StoredDataset> {
        let now = Utc::now();
        let mut rows = self.rows.write();
        let row = match rows.get_mut(user_key) {
            Some(row) => {
                row.dataset = dataset;
                row.version += 1;
                row.updated_at = now;
                row.clone()
            }
            None => {
                let row = StoredDataset::new(user_key, dataset, now);
                rows.insert(user_key.to_string(), row.clone());
                row
            }
        };
        Ok(row)
    }

    fn replace(&self, user_key: &str, dataset: Dataset) -> StoreResult<StoredDataset> {
        let mut rows = self.rows.write();
        let row = rows
            .get_mut(user_key)
            .ok_or_else(|| StoreError::NotFound(user_key.to_string()))?;
        row.dataset = dataset;
        row.updated_at = Utc::now();
        Ok(row.clone())
    }

    fn list(&self) -> StoreResult<Vec<StoredDataset>> {
        let mut rows: Vec<_> = self.rows.read().values().cloned().collect();
        rows.sort_by(|a, b| a.user_key.cmp(&b.user_key));
        Ok(rows)
    }

    fn append_audit(&self, entry: AuditEntry) -> StoreResult<()> {
        self.audit.write().push(entry);
        Ok(())
    }

    fn audit_log(&self) -> StoreResult<Vec<AuditEntry>> {
        Ok(self.audit.read().clone())
    }
}
