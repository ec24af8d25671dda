//! Key-Value Store
//!
//! Persistence collaborator with the shape of browser local storage:
//! string keys, string values, synchronous access. The limiter only ever
//! talks to the `KvStore` trait; tests use the in-memory store and the
//! CLI uses the JSON-file-backed one.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File name of the on-disk store inside a data directory.
pub const STORE_FILE_NAME: &str = "quota_ledger.json";

/// Errors from the persistence layer
#[derive(Debug, Error)]
pub enum StoreError {
    /// Reading or writing the backing file failed
    #[error("store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// The backing file holds something other than a JSON string map
    #[error("store contents malformed: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Synchronous string key-value persistence
pub trait KvStore {
    /// Fetch the value stored under `key`, if any
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Store `value` under `key`, replacing any previous value
    fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError>;
}

/// In-memory store for tests and ephemeral use
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    values: HashMap<String, String>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the store holds no keys
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.values.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        self.values.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Store backed by a single JSON file holding a string-to-string map.
///
/// Reads load the whole map; writes rewrite the whole file. Adequate for a
/// ledger this size, and it keeps the on-disk state inspectable.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    /// Store at an explicit file path
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at the conventional file name inside `dir`
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(STORE_FILE_NAME),
        }
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_map(&self) -> Result<HashMap<String, String>, StoreError> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }
        let raw = fs::read_to_string(&self.path)?;
        if raw.trim().is_empty() {
            return Ok(HashMap::new());
        }
        Ok(serde_json::from_str(&raw)?)
    }
}

impl KvStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut map = self.read_map()?;
        Ok(map.remove(key))
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        // A malformed backing file is replaced rather than kept broken;
        // readers already treat it as empty.
        let mut map = match self.read_map() {
            Ok(map) => map,
            Err(StoreError::Malformed(err)) => {
                tracing::warn!(%err, path = %self.path.display(), "replacing malformed store file");
                HashMap::new()
            }
            Err(err) => return Err(err),
        };
        map.insert(key.to_string(), value.to_string());

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(&self.path, serde_json::to_string_pretty(&map)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_memory_store_round_trip() {
        let mut store = MemoryStore::new();
        assert_eq!(store.get("missing").unwrap(), None);

        store.set("key", "value").unwrap();
        assert_eq!(store.get("key").unwrap().as_deref(), Some("value"));

        store.set("key", "updated").unwrap();
        assert_eq!(store.get("key").unwrap().as_deref(), Some("updated"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_file_store_round_trip() {
        let dir = TempDir::new().unwrap();
        let mut store = FileStore::in_dir(dir.path());

        assert_eq!(store.get("key").unwrap(), None);

        store.set("key", "value").unwrap();
        assert_eq!(store.get("key").unwrap().as_deref(), Some("value"));

        // A fresh handle sees the persisted value.
        let reopened = FileStore::in_dir(dir.path());
        assert_eq!(reopened.get("key").unwrap().as_deref(), Some("value"));
    }

    #[test]
    fn test_file_store_missing_file_reads_empty() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::in_dir(dir.path());
        assert_eq!(store.get("anything").unwrap(), None);
    }

    #[test]
    fn test_file_store_corrupt_file_errors_on_read() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(STORE_FILE_NAME);
        fs::write(&path, "not json at all").unwrap();

        let store = FileStore::new(&path);
        assert!(matches!(
            store.get("key"),
            Err(StoreError::Malformed(_))
        ));
    }

    #[test]
    fn test_file_store_write_replaces_corrupt_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(STORE_FILE_NAME);
        fs::write(&path, "{{{").unwrap();

        let mut store = FileStore::new(&path);
        store.set("key", "value").unwrap();
        assert_eq!(store.get("key").unwrap().as_deref(), Some("value"));
    }

    #[test]
    fn test_file_store_creates_parent_dirs() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("a").join("b");
        let mut store = FileStore::in_dir(&nested);

        store.set("key", "value").unwrap();
        assert_eq!(store.get("key").unwrap().as_deref(), Some("value"));
    }
}
