//! Capability cache
//!
//! An expiring key/value cache persisted through a [`KeyValueStore`]. Used by
//! the provider manager for two kinds of snapshot:
//!
//! - long-lived server capability/info snapshots that survive reconnects
//! - medium-lived tool listings that avoid re-listing on every request
//!
//! Expiry is measured in wall-clock milliseconds so entries written by one
//! process run are still judged correctly by the next one. No entry is ever
//! returned past its expiry; an expired read deletes the entry as it misses.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::JoinHandle;

use crate::storage::KeyValueStore;

/// Storage namespace holding cache entries.
pub const CACHE_NAMESPACE: &str = "capability-cache";

/// One cached value with its timing metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    /// Cache key.
    pub key: String,
    /// Cached value.
    pub value: Value,
    /// When the entry was written, in milliseconds since the Unix epoch.
    pub timestamp: i64,
    /// When the entry stops being valid; `None` never expires.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

impl CacheEntry {
    /// Whether the entry is expired at `now_ms`.
    pub fn is_expired_at(&self, now_ms: i64) -> bool {
        matches!(self.expires_at, Some(expires_at) if now_ms >= expires_at)
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Expiring cache over a storage backend.
///
/// Every operation is infallible from the caller's point of view: storage
/// failures and undecodable entries are logged and treated as misses.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use std::time::Duration;
/// use toolmesh::cache::CapabilityCache;
/// use toolmesh::storage::MemoryStore;
///
/// let cache = CapabilityCache::new(Arc::new(MemoryStore::new()));
/// cache.set("server:weather", serde_json::json!({"tools": {}}), Some(Duration::from_secs(60)));
/// assert!(cache.get("server:weather").is_some());
/// ```
#[derive(Debug, Clone)]
pub struct CapabilityCache {
    store: Arc<dyn KeyValueStore>,
}

impl CapabilityCache {
    /// Create a cache persisting into `store`.
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// The storage backend behind this cache.
    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    /// Store `value` under `key`, expiring after `ttl` when given.
    pub fn set(&self, key: &str, value: Value, ttl: Option<Duration>) {
        let timestamp = now_ms();
        let entry = CacheEntry {
            key: key.to_string(),
            value,
            timestamp,
            expires_at: ttl.map(|ttl| {
                let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
                timestamp.saturating_add(ttl_ms)
            }),
        };

        let encoded = match serde_json::to_string(&entry) {
            Ok(encoded) => encoded,
            Err(e) => {
                tracing::warn!(cache.key = key, error = %e, "failed to encode cache entry");
                return;
            }
        };

        if let Err(e) = self.store.put(CACHE_NAMESPACE, key, &encoded) {
            tracing::warn!(cache.key = key, error = %e, "failed to write cache entry");
        }
    }

    /// Serialize `value` and store it.
    pub fn set_as<T: Serialize>(&self, key: &str, value: &T, ttl: Option<Duration>) {
        match serde_json::to_value(value) {
            Ok(value) => self.set(key, value, ttl),
            Err(e) => tracing::warn!(cache.key = key, error = %e, "failed to encode cache value"),
        }
    }

    /// Fresh value for `key`, or `None`.
    ///
    /// An expired or corrupt entry is deleted and reported as a miss.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.entry(key).map(|entry| entry.value)
    }

    /// Fresh value for `key` decoded as `T`.
    ///
    /// A value that no longer decodes as `T` is deleted and reported as a miss.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.get(key)?;
        match serde_json::from_value(value) {
            Ok(decoded) => Some(decoded),
            Err(e) => {
                tracing::warn!(cache.key = key, error = %e, "cached value has unexpected shape; discarding");
                self.delete(key);
                None
            }
        }
    }

    /// Fresh entry for `key`, including its timing metadata.
    pub fn entry(&self, key: &str) -> Option<CacheEntry> {
        let raw = match self.store.get(CACHE_NAMESPACE, key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(cache.key = key, error = %e, "cache read failed; treating as miss");
                return None;
            }
        };

        let entry: CacheEntry = match serde_json::from_str(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(cache.key = key, error = %e, "corrupt cache entry; discarding");
                self.delete(key);
                return None;
            }
        };

        if entry.is_expired_at(now_ms()) {
            tracing::debug!(cache.key = key, "cache entry expired");
            self.delete(key);
            return None;
        }

        Some(entry)
    }

    /// Remove `key`.
    pub fn delete(&self, key: &str) {
        if let Err(e) = self.store.remove(CACHE_NAMESPACE, key) {
            tracing::warn!(cache.key = key, error = %e, "failed to delete cache entry");
        }
    }

    /// Remove every entry. Returns how many were removed.
    pub fn clear(&self) -> usize {
        match self.store.clear(CACHE_NAMESPACE) {
            Ok(removed) => removed,
            Err(e) => {
                tracing::warn!(error = %e, "failed to clear cache");
                0
            }
        }
    }

    /// Remove every expired or corrupt entry in one pass.
    ///
    /// Returns how many entries were removed.
    pub fn cleanup(&self) -> usize {
        let keys = match self.store.keys(CACHE_NAMESPACE) {
            Ok(keys) => keys,
            Err(e) => {
                tracing::warn!(error = %e, "cache cleanup could not list keys");
                return 0;
            }
        };

        let now = now_ms();
        let mut removed = 0;
        for key in keys {
            let stale = match self.store.get(CACHE_NAMESPACE, &key) {
                Ok(Some(raw)) => serde_json::from_str::<CacheEntry>(&raw)
                    .map(|entry| entry.is_expired_at(now))
                    .unwrap_or(true),
                Ok(None) => false,
                Err(e) => {
                    tracing::warn!(cache.key = %key, error = %e, "cache cleanup read failed");
                    false
                }
            };
            if stale && self.store.remove(CACHE_NAMESPACE, &key).unwrap_or(false) {
                removed += 1;
            }
        }

        if removed > 0 {
            tracing::debug!(removed, "cache cleanup evicted entries");
        }
        removed
    }

    /// Number of stored entries, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.store
            .keys(CACHE_NAMESPACE)
            .map(|keys| keys.len())
            .unwrap_or(0)
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run `f` against this cache on Tokio's blocking pool.
    ///
    /// Async callers go through here: a native store does synchronous
    /// SQLite I/O. Returns `None` only if the blocking task itself failed.
    pub async fn blocking<T, F>(self: &Arc<Self>, f: F) -> Option<T>
    where
        T: Send + 'static,
        F: FnOnce(&CapabilityCache) -> T + Send + 'static,
    {
        let cache = Arc::clone(self);
        match tokio::task::spawn_blocking(move || f(&cache)).await {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(error = %e, "cache task failed");
                None
            }
        }
    }

    /// Run [`cleanup`](Self::cleanup) every `interval` on a background task.
    ///
    /// The first sweep happens one interval after spawning. Abort the
    /// returned handle to stop it.
    pub fn spawn_cleanup(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                cache.blocking(|c| c.cleanup()).await;
            }
        })
    }
}
