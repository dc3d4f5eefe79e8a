//! Dataset persistence.
//!
//! The server keeps one [`StoredDataset`] per user key plus an append-only
//! audit log of pushes. Two implementations are provided:
//!
//! - [`MemoryStore`]: process-local, used by tests and ephemeral servers
//! - [`FileStore`]: one JSON document per user under a locked directory

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use chrono::{DateTime, Utc};
use ledgersync_protocol::Dataset;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by a [`DatasetStore`].
#[derive(Error, Debug)]
pub enum StoreError {
    /// Underlying I/O failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored document could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Another process holds the store directory.
    #[error("store is locked by another process")]
    Locked,

    /// No dataset exists for the user.
    #[error("no dataset for user '{0}'")]
    NotFound(String),

    /// A stored document is present but unusable.
    #[error("corrupt dataset for user '{user_key}': {reason}")]
    Corrupt {
        /// Owner of the document.
        user_key: String,
        /// What was wrong with it.
        reason: String,
    },
}

/// A user's canonical dataset with its bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredDataset {
    /// Owner.
    pub user_key: String,
    /// Canonical snapshot.
    pub dataset: Dataset,
    /// Incremented on every push.
    pub version: u64,
    /// When the row was first created.
    pub created_at: DateTime<Utc>,
    /// When the row was last written.
    pub updated_at: DateTime<Utc>,
}

impl StoredDataset {
    /// Creates a version-1 row.
    pub fn new(user_key: impl Into<String>, dataset: Dataset, now: DateTime<Utc>) -> Self {
        Self {
            user_key: user_key.into(),
            dataset,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Kind of audited operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    /// A client push.
    Push,
}

/// One line of the audit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// User the operation applied to.
    pub user_key: String,
    /// What happened.
    pub action: AuditAction,
    /// When it happened.
    pub timestamp: DateTime<Utc>,
    /// Record counts of the incoming snapshot.
    pub incoming: BTreeMap<String, usize>,
    /// Record counts after merging.
    pub merged: BTreeMap<String, usize>,
    /// Stored version after the operation.
    pub version: u64,
}

impl AuditEntry {
    /// Builds a push entry from the collection sizes before and after the
    /// merge.
    pub fn push(
        user_key: impl Into<String>,
        incoming: BTreeMap<String, usize>,
        merged: BTreeMap<String, usize>,
        version: u64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            user_key: user_key.into(),
            action: AuditAction::Push,
            timestamp,
            incoming,
            merged,
            version,
        }
    }
}

/// Storage for per-user datasets.
///
/// Implementations only need to make each call atomic on its own. Callers
/// that read, modify and write back hold the per-user lock from
/// [`crate::KeyedLocks`] around the whole sequence.
pub trait DatasetStore: Send + Sync {
    /// Loads a user's dataset.
    fn load(&self, user_key: &str) -> StoreResult<Option<StoredDataset>>;

    /// Inserts a dataset if the user has none, returning the stored row.
    fn create(&self, user_key: &str, dataset: Dataset) -> StoreResult<StoredDataset>;

    /// Writes a dataset, bumping the version (1 for a new user).
    fn upsert(&self, user_key: &str, dataset: Dataset) -> StoreResult<StoredDataset>;

    /// Overwrites an existing dataset without changing its version.
    fn replace(&self, user_key: &str, dataset: Dataset) -> StoreResult<StoredDataset>;

    /// Lists every stored dataset.
    fn list(&self) -> StoreResult<Vec<StoredDataset>>;

    /// Lists every user key with a dataset.
    fn user_keys(&self) -> StoreResult<Vec<String>> {
        Ok(self.list()?.into_iter().map(|row| row.user_key).collect())
    }

    /// Appends an audit entry.
    fn append_audit(&self, entry: AuditEntry) -> StoreResult<()>;

    /// Returns the audit log in append order.
    fn audit_log(&self) -> StoreResult<Vec<AuditEntry>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledgersync_protocol::Record;

    /// Exercises the contract shared by every store.
    pub(crate) fn check_store_contract(store: &dyn DatasetStore) {
        assert!(store.load("meg").unwrap().is_none());

        let created = store.create("meg", Dataset::empty_default()).unwrap();
        assert_eq!(created.version, 1);

        // A second create leaves the row alone.
        let again = store
            .create(
                "meg",
                Dataset::new().with_record("cotizaciones", Record::new().with("numero", "X")),
            )
            .unwrap();
        assert_eq!(again, created);

        let pushed = store
            .upsert(
                "meg",
                Dataset::empty_default().with_record("cotizaciones", Record::new().with("numero", "A1")),
            )
            .unwrap();
        assert_eq!(pushed.version, 2);
        assert_eq!(pushed.created_at, created.created_at);

        let swept = store.replace("meg", Dataset::empty_default()).unwrap();
        assert_eq!(swept.version, 2);
        assert!(store.load("meg").unwrap().unwrap().dataset.is_empty());

        assert!(matches!(
            store.replace("nobody", Dataset::new()),
            Err(StoreError::NotFound(_))
        ));

        let fresh = store.upsert("myorganic", Dataset::new()).unwrap();
        assert_eq!(fresh.version, 1);

        let mut keys = store.user_keys().unwrap();
        keys.sort();
        assert_eq!(keys, vec!["meg".to_string(), "myorganic".to_string()]);

        let entry = AuditEntry::push(
            "meg",
            Dataset::empty_default().collection_sizes(),
            pushed.dataset.collection_sizes(),
            2,
            Utc::now(),
        );
        store.append_audit(entry.clone()).unwrap();
        assert_eq!(store.audit_log().unwrap(), vec![entry]);
    }

    #[test]
    fn memory_store_contract() {
        check_store_contract(&MemoryStore::new());
    }

    #[test]
    fn file_store_contract() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        check_store_contract(&store);
    }

    #[test]
    fn audit_entry_serialization() {
        let merged = Dataset::empty_default().with_record("cotizaciones", Record::new().with("numero", "A1"));
        let entry = AuditEntry::push("meg", BTreeMap::new(), merged.collection_sizes(), 3, Utc::now());
        let json = serde_json::to_value(&entry).unwrap();

        assert_eq!(json["action"], "PUSH");
        assert_eq!(json["merged"]["cotizaciones"], 1);
        assert_eq!(json["version"], 3);
    }
}
