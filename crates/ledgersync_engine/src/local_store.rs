//! Local store adapter.
//!
//! The coordinator never touches the embedded database directly. It reads
//! and overwrites whole datasets through [`LocalStore`], and keeps a
//! per-user "last synced" marker that distinguishes a fresh installation
//! from one that emptied its data after syncing.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ledgersync_protocol::Dataset;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tokio::fs;
use tracing::debug;

/// Narrow contract for the client's local dataset storage.
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Reads the user's dataset. A user with no data gets the empty default.
    async fn read(&self, user_key: &str) -> SyncResult<Dataset>;

    /// Overwrites the user's dataset.
    async fn write(&self, user_key: &str, dataset: &Dataset) -> SyncResult<()>;

    /// When the user last completed a sync, if ever.
    async fn last_synced(&self, user_key: &str) -> SyncResult<Option<DateTime<Utc>>>;

    /// Records a completed sync.
    async fn mark_synced(&self, user_key: &str, at: DateTime<Utc>) -> SyncResult<()>;
}

/// In-memory local store, used by tests and the CLI's dry runs.
#[derive(Debug, Default)]
pub struct MemoryLocalStore {
    datasets: RwLock<HashMap<String, Dataset>>,
    synced: RwLock<HashMap<String, DateTime<Utc>>>,
    fail_reads: Mutex<Option<String>>,
}

impl MemoryLocalStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the user's dataset.
    pub fn insert(&self, user_key: impl Into<String>, dataset: Dataset) {
        self.datasets.write().insert(user_key.into(), dataset);
    }

    /// Returns the user's dataset without going through the async contract.
    pub fn get(&self, user_key: &str) -> Option<Dataset> {
        self.datasets.read().get(user_key).cloned()
    }

    /// Makes every subsequent read fail until cleared with `None`.
    pub fn set_read_failure(&self, message: Option<String>) {
        *self.fail_reads.lock() = message;
    }
}

#[async_trait]
impl LocalStore for MemoryLocalStore {
    async fn read(&self, user_key: &str) -> SyncResult<Dataset> {
        if let Some(message) = self.fail_reads.lock().clone() {
            return Err(SyncError::LocalStore(message));
        }
        Ok(self
            .datasets
            .read()
            .get(user_key)
            .cloned()
            .unwrap_or_else(Dataset::empty_default))
    }

    async fn write(&self, user_key: &str, dataset: &Dataset) -> SyncResult<()> {
        self.datasets
            .write()
            .insert(user_key.to_string(), dataset.clone());
        Ok(())
    }

    async fn last_synced(&self, user_key: &str) -> SyncResult<Option<DateTime<Utc>>> {
        Ok(self.synced.read().get(user_key).copied())
    }

    async fn mark_synced(&self, user_key: &str, at: DateTime<Utc>) -> SyncResult<()> {
        self.synced.write().insert(user_key.to_string(), at);
        Ok(())
    }
}

/// File-backed local store.
///
/// Layout under the root directory:
///
/// ```text
/// <root>/<user>.json    dataset
/// <root>/<user>.synced  RFC 3339 time of the last completed sync
/// ```
///
/// Writes go to a uniquely named temporary file in the same directory which
/// is then renamed into place.
#[derive(Debug, Clone)]
pub struct FileLocalStore {
    root: PathBuf,
}

impl FileLocalStore {
    /// Opens (and creates if needed) a store rooted at `root`.
    pub async fn open(root: impl AsRef<Path>) -> SyncResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)
            .await
            .map_err(SyncError::local_store)?;
        Ok(Self { root })
    }

    /// Returns the root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, user_key: &str, extension: &str) -> PathBuf {
        self.root
            .join(format!("{}.{}", escape_key(user_key), extension))
    }

    async fn read_optional(path: &Path) -> SyncResult<Option<Vec<u8>>> {
        match fs::read(path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SyncError::local_store(e)),
        }
    }

    async fn write_atomic(path: PathBuf, bytes: Vec<u8>) -> SyncResult<()> {
        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let dir = path.parent().unwrap_or_else(|| Path::new("."));
            let mut temp = NamedTempFile::new_in(dir)?;
            temp.write_all(&bytes)?;
            temp.as_file().sync_all()?;
            temp.persist(&path).map_err(|e| e.error)?;
            Ok(())
        })
        .await
        .map_err(SyncError::local_store)?
        .map_err(SyncError::local_store)
    }
}

#[async_trait]
impl LocalStore for FileLocalStore {
    async fn read(&self, user_key: &str) -> SyncResult<Dataset> {
        match Self::read_optional(&self.path(user_key, "json")).await? {
            Some(bytes) => Dataset::from_slice(&bytes).map_err(|e| {
                SyncError::LocalStore(format!("corrupt dataset for {}: {}", user_key, e))
            }),
            None => Ok(Dataset::empty_default()),
        }
    }

    async fn write(&self, user_key: &str, dataset: &Dataset) -> SyncResult<()> {
        let bytes = serde_json::to_vec_pretty(dataset).map_err(SyncError::local_store)?;
        Self::write_atomic(self.path(user_key, "json"), bytes).await?;
        debug!(user_key, records = dataset.record_count(), "local dataset written");
        Ok(())
    }

    async fn last_synced(&self, user_key: &str) -> SyncResult<Option<DateTime<Utc>>> {
        let Some(bytes) = Self::read_optional(&self.path(user_key, "synced")).await? else {
            return Ok(None);
        };
        let text = String::from_utf8_lossy(&bytes);
        DateTime::parse_from_rfc3339(text.trim())
            .map(|at| Some(at.with_timezone(&Utc)))
            .map_err(|e| SyncError::LocalStore(format!("corrupt sync marker for {}: {}", user_key, e)))
    }

    async fn mark_synced(&self, user_key: &str, at: DateTime<Utc>) -> SyncResult<()> {
        Self::write_atomic(self.path(user_key, "synced"), at.to_rfc3339().into_bytes()).await
    }
}

/// Maps a user key to a safe file stem.
fn escape_key(user_key: &str) -> String {
    let mut out = String::with_capacity(user_key.len());
    for byte in user_key.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{:02X}", byte));
        }
    }
    out
}
