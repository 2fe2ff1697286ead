//! Key/value storage substrates for the response cache.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Storage fault.
#[derive(Debug, Error)]
pub enum StorageError {
    /// IO error.
    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),

    /// The substrate refused the write.
    #[error("storage quota exceeded")]
    QuotaExceeded,
}

/// Durable string key/value substrate.
pub trait Storage: Send + Sync {
    /// Read the value stored under `key`.
    fn read_item(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Store `value` under `key`, replacing any previous value.
    fn write_item(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Remove `key`. Removing a missing key is not an error.
    fn remove_item(&self, key: &str) -> Result<(), StorageError>;

    /// All keys starting with `prefix`.
    fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError>;
}

/// In-process storage.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    items: RwLock<BTreeMap<String, String>>,
}

impl MemoryStorage {
    /// Create empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored items, including keys not owned by the cache.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    /// Whether storage is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }
}

impl Storage for MemoryStorage {
    fn read_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.items.read().get(key).cloned())
    }

    fn write_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.items.write().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        self.items.write().remove(key);
        Ok(())
    }

    fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        Ok(self
            .items
            .read()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

const FILE_EXTENSION: &str = "entry";

/// On-disk record: the logical key travels with its value.
#[derive(Debug, Serialize, Deserialize)]
struct StoredItem {
    key: String,
    value: String,
}

/// Directory-backed storage: one file per key.
///
/// File names are the hex blake3 digest of the key, so every key maps to a
/// fixed-length valid file name. Each file holds the key alongside the
/// value, which is how `list_keys` recovers the original keys.
///
/// All operations are blocking `std::fs` calls. That suits the CLI and
/// short-lived clients; a long-running async server should wrap this in
/// its own `spawn_blocking` substrate or use [`MemoryStorage`].
#[derive(Debug, Clone)]
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    /// Open (and create if needed) storage rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Directory this storage writes to.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let digest = blake3::hash(key.as_bytes());
        self.root
            .join(format!("{}.{FILE_EXTENSION}", hex::encode(digest.as_bytes())))
    }

    fn read_record(path: &Path) -> Result<Option<StoredItem>, StorageError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        // Files that are not ours read as absent.
        Ok(serde_json::from_str(&raw).ok())
    }
}

impl Storage for FileStorage {
    fn read_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(Self::read_record(&self.path_for(key))?
            .filter(|item| item.key == key)
            .map(|item| item.value))
    }

    fn write_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let record = serde_json::to_string(&StoredItem {
            key: key.to_string(),
            value: value.to_string(),
        })
        .map_err(std::io::Error::other)?;

        // Readers never observe a partially written record.
        let target = self.path_for(key);
        let staging = target.with_extension("tmp");
        std::fs::write(&staging, record)?;
        std::fs::rename(&staging, &target)?;
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        match std::fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let mut keys = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(FILE_EXTENSION) {
                continue;
            }
            let Some(item) = Self::read_record(&path)? else {
                continue;
            };
            if item.key.starts_with(prefix) {
                keys.push(item.key);
            }
        }
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn exercise(storage: &dyn Storage) {
        assert_eq!(storage.read_item("api_cache_a").unwrap(), None);

        storage.write_item("api_cache_a", "1").unwrap();
        storage.write_item("api_cache_b", "2").unwrap();
        storage.write_item("theme", "dark").unwrap();
        assert_eq!(storage.read_item("api_cache_a").unwrap(), Some("1".to_string()));

        storage.write_item("api_cache_a", "3").unwrap();
        assert_eq!(storage.read_item("api_cache_a").unwrap(), Some("3".to_string()));

        let keys = storage.list_keys("api_cache_").unwrap();
        assert_eq!(keys, vec!["api_cache_a".to_string(), "api_cache_b".to_string()]);

        storage.remove_item("api_cache_a").unwrap();
        storage.remove_item("api_cache_missing").unwrap();
        assert_eq!(storage.read_item("api_cache_a").unwrap(), None);
        assert_eq!(storage.read_item("theme").unwrap(), Some("dark".to_string()));
    }

    #[test]
    fn test_memory_storage_contract() {
        let storage = MemoryStorage::new();
        exercise(&storage);
        assert_eq!(storage.len(), 2);
    }

    #[test]
    fn test_file_storage_contract() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::open(dir.path()).unwrap();
        exercise(&storage);
    }

    #[test]
    fn test_file_storage_survives_reopen() {
        let dir = TempDir::new().unwrap();
        FileStorage::open(dir.path())
            .unwrap()
            .write_item("api_cache_/users?x=1", "{}")
            .unwrap();

        let reopened = FileStorage::open(dir.path()).unwrap();
        assert_eq!(
            reopened.read_item("api_cache_/users?x=1").unwrap(),
            Some("{}".to_string())
        );
    }

    #[test]
    fn test_file_storage_ignores_foreign_files() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("README.txt"), "hi").unwrap();
        std::fs::write(dir.path().join("not-a-record.entry"), "hi").unwrap();

        let storage = FileStorage::open(dir.path()).unwrap();
        storage.write_item("api_cache_k", "v").unwrap();

        assert_eq!(storage.list_keys("").unwrap(), vec!["api_cache_k".to_string()]);
    }

    #[test]
    fn test_file_storage_accepts_long_keys() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::open(dir.path()).unwrap();
        let key = format!("api_cache_[\"/search\",{{\"q\":\"{}\"}}]", "x".repeat(1_000));

        storage.write_item(&key, "{}").unwrap();

        assert_eq!(storage.read_item(&key).unwrap(), Some("{}".to_string()));
        assert_eq!(storage.list_keys("api_cache_").unwrap(), vec![key.clone()]);
        storage.remove_item(&key).unwrap();
        assert_eq!(storage.read_item(&key).unwrap(), None);
    }

    #[test]
    fn test_file_names_have_fixed_length() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::open(dir.path()).unwrap();

        assert_eq!(
            storage.path_for("a").file_name().map(|n| n.len()),
            storage.path_for(&"b".repeat(4_096)).file_name().map(|n| n.len())
        );
    }
}
