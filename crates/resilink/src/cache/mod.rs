//! Response cache with per-entry TTL and lazy expiry.
//!
//! Entries are JSON records stored under a reserved key prefix in an
//! injected [`Storage`]. Expiry is checked on read only: an expired entry
//! stays in storage until the next read of that exact key removes it.
//!
//! Storage faults never reach callers. [`ResponseCache::lookup`] exposes
//! them as [`CacheLookup::Fault`]; [`ResponseCache::get`] logs them and
//! reports a miss.

mod clock;
pub mod storage;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

pub use clock::{Clock, MockClock, SystemClock};
pub use storage::{FileStorage, MemoryStorage, Storage, StorageError};

/// Reserved prefix for keys owned by the cache.
pub const DEFAULT_PREFIX: &str = "api_cache_";

/// TTL applied when a caller does not choose one.
pub const DEFAULT_TTL: Duration = Duration::from_millis(3_600_000);

/// Cache fault.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The storage substrate failed.
    #[error("cache storage error: {0}")]
    Storage(#[from] StorageError),

    /// A stored record could not be decoded.
    #[error("corrupt cache record '{key}': {reason}")]
    Corrupt {
        /// Logical key of the record.
        key: String,
        /// Decoder message.
        reason: String,
    },

    /// A value could not be encoded for storage.
    #[error("cache serialization error: {0}")]
    Serialization(String),
}

/// Stored cache record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Logical key.
    pub key: String,
    /// Cached payload.
    pub payload: Value,
    /// Write time in epoch milliseconds.
    pub stored_at: u64,
    /// Lifetime in milliseconds.
    pub ttl_ms: u64,
}

impl CacheEntry {
    /// Whether the entry is still valid at `now` (epoch milliseconds).
    #[must_use]
    pub const fn is_valid_at(&self, now: u64) -> bool {
        now.saturating_sub(self.stored_at) < self.ttl_ms
    }
}

/// Outcome of a cache read.
#[derive(Debug)]
pub enum CacheLookup {
    /// A valid entry was found.
    Hit(Value),
    /// No valid entry exists (absent or just expired).
    Miss,
    /// The read failed; callers should treat it as a miss.
    Fault(CacheError),
}

/// Derive a cache key from the full request identity.
///
/// The key is the JSON encoding of `[endpoint, params]` with params in
/// sorted order, so two different requests never share a key.
#[must_use]
pub fn derive_key(endpoint: &str, params: &BTreeMap<String, String>) -> String {
    let params: Map<String, Value> = params
        .iter()
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect();
    Value::Array(vec![Value::String(endpoint.to_string()), Value::Object(params)]).to_string()
}

/// TTL cache over a [`Storage`] substrate.
#[derive(Clone)]
pub struct ResponseCache {
    storage: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
    prefix: String,
}

impl std::fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCache")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

impl ResponseCache {
    /// Create a cache over `storage` using the system clock.
    #[must_use]
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            clock: Arc::new(SystemClock),
            prefix: DEFAULT_PREFIX.to_string(),
        }
    }

    /// Create a cache backed by process memory.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStorage::new()))
    }

    /// Use a different clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Use a different reserved key prefix.
    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Reserved key prefix.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn storage_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    /// Read `key`, exposing faults explicitly.
    pub fn lookup(&self, key: &str) -> CacheLookup {
        let storage_key = self.storage_key(key);

        let raw = match self.storage.read_item(&storage_key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return CacheLookup::Miss,
            Err(e) => return CacheLookup::Fault(e.into()),
        };

        let entry: CacheEntry = match serde_json::from_str(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                if let Err(remove_err) = self.storage.remove_item(&storage_key) {
                    debug!(key, error = %remove_err, "failed to drop corrupt cache record");
                }
                return CacheLookup::Fault(CacheError::Corrupt {
                    key: key.to_string(),
                    reason: e.to_string(),
                });
            }
        };

        if entry.is_valid_at(self.clock.now_millis()) {
            return CacheLookup::Hit(entry.payload);
        }

        debug!(key, "cache entry expired");
        if let Err(e) = self.storage.remove_item(&storage_key) {
            return CacheLookup::Fault(e.into());
        }
        CacheLookup::Miss
    }

    /// Read `key`; faults degrade to `None`.
    pub fn get(&self, key: &str) -> Option<Value> {
        match self.lookup(key) {
            CacheLookup::Hit(value) => Some(value),
            CacheLookup::Miss => None,
            CacheLookup::Fault(e) => {
                warn!(key, error = %e, "cache read failed, treating as miss");
                None
            }
        }
    }

    /// Store `value` under `key`, reporting faults.
    pub fn try_set(&self, key: &str, value: &Value, ttl: Duration) -> Result<(), CacheError> {
        let entry = CacheEntry {
            key: key.to_string(),
            payload: value.clone(),
            stored_at: self.clock.now_millis(),
            ttl_ms: ttl.as_millis() as u64,
        };
        let raw = serde_json::to_string(&entry)
            .map_err(|e| CacheError::Serialization(e.to_string()))?;
        self.storage.write_item(&self.storage_key(key), &raw)?;
        Ok(())
    }

    /// Store `value` under `key`; faults are logged and dropped.
    pub fn set(&self, key: &str, value: &Value, ttl: Duration) {
        if let Err(e) = self.try_set(key, value, ttl) {
            warn!(key, error = %e, "cache write failed");
        }
    }

    /// Remove owned entries whose key contains `pattern`, or every owned
    /// entry when `pattern` is `None`. Returns the number removed.
    ///
    /// Matching is a plain substring test on the logical key.
    pub fn invalidate(&self, pattern: Option<&str>) -> usize {
        let keys = match self.storage.list_keys(&self.prefix) {
            Ok(keys) => keys,
            Err(e) => {
                warn!(error = %e, "cache invalidation could not list keys");
                return 0;
            }
        };

        let mut removed = 0;
        for storage_key in keys {
            let logical = storage_key.strip_prefix(&self.prefix).unwrap_or(&storage_key);
            if pattern.is_some_and(|p| !logical.contains(p)) {
                continue;
            }
            match self.storage.remove_item(&storage_key) {
                Ok(()) => removed += 1,
                Err(e) => warn!(key = logical, error = %e, "failed to remove cache entry"),
            }
        }

        debug!(pattern = pattern.unwrap_or("*"), removed, "cache invalidated");
        removed
    }
}
