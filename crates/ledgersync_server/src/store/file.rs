//! File-backed dataset store.
//!
//! ```text
//! <data_dir>/
//! ├─ LOCK              # Advisory lock, one server per directory
//! ├─ audit.jsonl       # One AuditEntry per line
//! └─ datasets/
//!    └─ <user>.json    # One StoredDataset per user
//! ```
//!
//! Dataset documents are replaced atomically: each write goes to a temporary
//! file in the same directory which is then renamed over the old document.

use super::{AuditEntry, DatasetStore, StoreError, StoreResult, StoredDataset};
use chrono::Utc;
use fs2::FileExt;
use ledgersync_protocol::Dataset;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

const LOCK_FILE: &str = "LOCK";
const AUDIT_FILE: &str = "audit.jsonl";
const DATASETS_DIR: &str = "datasets";

/// A [`DatasetStore`] persisted as JSON documents in a directory.
#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
    /// Serializes writers inside this process; the LOCK file keeps other
    /// processes out.
    write_lock: Mutex<()>,
    _lock_file: File,
}

impl FileStore {
    /// Opens (or creates) a store directory.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Locked`] if another process already holds the
    /// directory.
    pub fn open(root: impl AsRef<Path>) -> StoreResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join(DATASETS_DIR))?;

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(root.join(LOCK_FILE))?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(StoreError::Locked);
        }

        tracing::debug!(path = %root.display(), "opened file store");
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
            _lock_file: lock_file,
        })
    }

    /// Returns the store directory.
    pub fn path(&self) -> &Path {
        &self.root
    }

    fn dataset_path(&self, user_key: &str) -> PathBuf {
        self.root
            .join(DATASETS_DIR)
            .join(format!("{}.json", escape_key(user_key)))
    }

    fn read_row(&self, path: &Path, user_key: &str) -> StoreResult<Option<StoredDataset>> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| StoreError::Corrupt {
                user_key: user_key.to_string(),
                reason: e.to_string(),
            })
    }

    fn write_row(&self, row: &StoredDataset) -> StoreResult<()> {
        let path = self.dataset_path(&row.user_key);
        let dir = self.root.join(DATASETS_DIR);

        let mut temp = NamedTempFile::new_in(&dir)?;
        serde_json::to_writer(&mut temp, row)?;
        temp.flush()?;
        temp.as_file().sync_all()?;
        temp.persist(&path).map_err(|e| StoreError::Io(e.error))?;
        Ok(())
    }
}

impl DatasetStore for FileStore {
    fn load(&self, user_key: &str) -> StoreResult<Option<StoredDataset>> {
        self.read_row(&self.dataset_path(user_key), user_key)
    }

    fn create(&self, user_key: &str, dataset: Dataset) -> StoreResult<StoredDataset> {
        let _guard = self.write_lock.lock();
        if let Some(row) = self.load(user_key)? {
            return Ok(row);
        }
        let row = StoredDataset::new(user_key, dataset, Utc::now());
        self.write_row(&row)?;
        Ok(row)
    }

    fn upsert(&self, user_key: &str, dataset: Dataset) -> StoreResult<StoredDataset> {
        let _guard = self.write_lock.lock();
        let now = Utc::now();
        let row = match self.load(user_key)? {
            Some(mut row) => {
                row.dataset = dataset;
                row.version += 1;
                row.updated_at = now;
                row
            }
            None => StoredDataset::new(user_key, dataset, now),
        };
        self.write_row(&row)?;
        Ok(row)
    }

    fn replace(&self, user_key: &str, dataset: Dataset) -> StoreResult<StoredDataset> {
        let _guard = self.write_lock.lock();
        let mut row = self
            .load(user_key)?
            .ok_or_else(|| StoreError::NotFound(user_key.to_string()))?;
        row.dataset = dataset;
        row.updated_at = Utc::now();
        self.write_row(&row)?;
        Ok(row)
    }

    /// Skips documents that cannot be decoded, logging each one.
    fn list(&self) -> StoreResult<Vec<StoredDataset>> {
        let mut rows = Vec::new();
        for user_key in self.user_keys()? {
            match self.load(&user_key) {
                Ok(Some(row)) => rows.push(row),
                Ok(None) => {}
                Err(e) => tracing::warn!(user_key = %user_key, error = %e, "skipping unreadable dataset"),
            }
        }
        Ok(rows)
    }

    /// Derived from file names, so unreadable documents are still listed.
    fn user_keys(&self) -> StoreResult<Vec<String>> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(self.root.join(DATASETS_DIR))? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match path.file_stem().and_then(|s| s.to_str()).and_then(unescape_key) {
                Some(key) => keys.push(key),
                None => tracing::warn!(path = %path.display(), "ignoring unrecognized dataset file"),
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn append_audit(&self, entry: AuditEntry) -> StoreResult<()> {
        let _guard = self.write_lock.lock();
        let mut line = serde_json::to_vec(&entry)?;
        line.push(b'\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.root.join(AUDIT_FILE))?;
        file.write_all(&line)?;
        file.sync_data()?;
        Ok(())
    }

    fn audit_log(&self) -> StoreResult<Vec<AuditEntry>> {
        let file = match File::open(self.root.join(AUDIT_FILE)) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut entries = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            entries.push(serde_json::from_str(&line)?);
        }
        Ok(entries)
    }
}

/// Maps a user key to a file-name-safe stem.
///
/// ASCII alphanumerics, `-` and `_` pass through; every other byte becomes
/// `%XX`.
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

/// Inverse of [`escape_key`]. Returns `None` for stems it could not have
/// produced.
fn unescape_key(stem: &str) -> Option<String> {
    let bytes = stem.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = stem.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledgersync_protocol::Record;

    #[test]
    fn escape_keys() {
        assert_eq!(escape_key("meg"), "meg");
        assert_eq!(escape_key("my-org_1"), "my-org_1");
        assert_eq!(escape_key("../etc"), "%2E%2E%2Fetc");
        assert_eq!(escape_key("a b"), "a%20b");

        for key in ["meg", "org/../meg", "a b", "ñandú"] {
            assert_eq!(unescape_key(&escape_key(key)).as_deref(), Some(key));
        }
        assert_eq!(unescape_key("bad%2"), None);
        assert_eq!(unescape_key("bad%zz"), None);
    }

    #[test]
    fn second_open_is_locked() {
        let dir = tempfile::tempdir().unwrap();
        let _store = FileStore::open(dir.path()).unwrap();
        assert!(matches!(FileStore::open(dir.path()), Err(StoreError::Locked)));
    }

    #[test]
    fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FileStore::open(dir.path()).unwrap();
            store
                .upsert(
                    "meg",
                    Dataset::empty_default()
                        .with_record("cotizaciones", Record::new().with("numero", "A1")),
                )
                .unwrap();
            store.upsert("meg", Dataset::empty_default()).unwrap();
        }

        let store = FileStore::open(dir.path()).unwrap();
        let row = store.load("meg").unwrap().unwrap();
        assert_eq!(row.version, 2);
        assert!(row.dataset.collection("cotizaciones").unwrap().is_empty());
    }

    #[test]
    fn keys_with_special_characters() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        store.upsert("org/../meg", Dataset::new()).unwrap();

        assert!(store.load("org/../meg").unwrap().is_some());
        assert_eq!(store.user_keys().unwrap(), vec!["org/../meg".to_string()]);
        assert!(!dir.path().join("meg.json").exists());
    }

    #[test]
    fn corrupt_document() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        fs::write(dir.path().join(DATASETS_DIR).join("meg.json"), b"{not json").unwrap();

        assert!(matches!(store.load("meg"), Err(StoreError::Corrupt { .. })));
    }

    #[test]
    fn listing_skips_corrupt_documents() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        store.create("myorganic", Dataset::empty_default()).unwrap();
        fs::write(dir.path().join(DATASETS_DIR).join("broken.json"), b"{not json").unwrap();

        assert_eq!(
            store.user_keys().unwrap(),
            vec!["broken".to_string(), "myorganic".to_string()]
        );
        let rows = store.list().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].user_key, "myorganic");
    }
}
