//! Storage capability
//!
//! Persistent key/value storage behind the [`KeyValueStore`] trait, with two
//! implementations:
//!
//! - [`SqliteStore`] -- native backend, one SQLite table keyed by
//!   `(namespace, key)`.
//! - [`MemoryStore`] -- simulated backend, an in-process map that lives for
//!   the lifetime of the process.
//!
//! [`StorageCapability::select`] picks one at startup. Callers only see the
//! trait, so falling back to the simulated backend is transparent to them.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Context;
use chrono::Utc;
use directories::ProjectDirs;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::config::StorageConfig;
use crate::error::{Result, ToolmeshError};

/// Which implementation backs a [`KeyValueStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// SQLite database on disk.
    #[default]
    Native,
    /// In-process map; nothing survives a restart.
    Simulated,
}

impl std::fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageBackend::Native => f.write_str("native"),
            StorageBackend::Simulated => f.write_str("simulated"),
        }
    }
}

impl std::str::FromStr for StorageBackend {
    type Err = ToolmeshError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "native" => Ok(StorageBackend::Native),
            "simulated" => Ok(StorageBackend::Simulated),
            other => Err(ToolmeshError::Config(format!(
                "unknown storage backend '{}' (expected native or simulated)",
                other
            ))),
        }
    }
}

/// Namespaced string key/value store.
///
/// Namespaces isolate independent users of one backend.
pub trait KeyValueStore: Send + Sync + std::fmt::Debug {
    /// Which implementation this is.
    fn backend(&self) -> StorageBackend;

    /// Value stored under `key`, if any.
    fn get(&self, namespace: &str, key: &str) -> Result<Option<String>>;

    /// Insert or replace `key`.
    fn put(&self, namespace: &str, key: &str, value: &str) -> Result<()>;

    /// Delete `key`. Returns whether it existed.
    fn remove(&self, namespace: &str, key: &str) -> Result<bool>;

    /// Delete every key in `namespace`. Returns how many were removed.
    fn clear(&self, namespace: &str) -> Result<usize>;

    /// All keys in `namespace`, sorted.
    fn keys(&self, namespace: &str) -> Result<Vec<String>>;
}

/// Default database location: `<platform data dir>/toolmesh.db`.
pub fn default_db_path() -> Option<PathBuf> {
    ProjectDirs::from("dev", "toolmesh", "toolmesh").map(|dirs| dirs.data_dir().join("toolmesh.db"))
}

/// SQLite-backed store.
///
/// Opens a fresh connection per operation, so the store is `Send + Sync`
/// without holding a connection across threads.
#[derive(Debug)]
pub struct SqliteStore {
    db_path: PathBuf,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `db_path`.
    ///
    /// # Errors
    ///
    /// Returns [`ToolmeshError::Storage`] if the parent directory cannot be
    /// created or the schema cannot be initialised.
    ///
    /// # Examples
    ///
    /// ```
    /// use toolmesh::storage::{KeyValueStore, SqliteStore};
    ///
    /// let dir = tempfile::tempdir().unwrap();
    /// let store = SqliteStore::new_with_path(dir.path().join("kv.db")).unwrap();
    /// store.put("ns", "k", "v").unwrap();
    /// assert_eq!(store.get("ns", "k").unwrap().as_deref(), Some("v"));
    /// ```
    pub fn new_with_path<P: Into<PathBuf>>(db_path: P) -> Result<Self> {
        let db_path = db_path.into();

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .context("Failed to create parent directory for database")
                    .map_err(|e| ToolmeshError::Storage(format!("{:#}", e)))?;
            }
        }

        let store = Self { db_path };
        store.init()?;
        Ok(store)
    }

    /// Path of the database file.
    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn open(&self) -> Result<Connection> {
        Connection::open(&self.db_path)
            .context("Failed to open database")
            .map_err(|e| ToolmeshError::Storage(format!("{:#}", e)).into())
    }

    fn init(&self) -> Result<()> {
        let conn = self.open()?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS kv_store (
                namespace TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (namespace, key)
            )",
            [],
        )
        .context("Failed to create tables")
        .map_err(|e| ToolmeshError::Storage(format!("{:#}", e)))?;
        Ok(())
    }
}

impl KeyValueStore for SqliteStore {
    fn backend(&self) -> StorageBackend {
        StorageBackend::Native
    }

    fn get(&self, namespace: &str, key: &str) -> Result<Option<String>> {
        let conn = self.open()?;
        let value = conn
            .query_row(
                "SELECT value FROM kv_store WHERE namespace = ? AND key = ?",
                params![namespace, key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    fn put(&self, namespace: &str, key: &str, value: &str) -> Result<()> {
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO kv_store (namespace, key, value, updated_at) VALUES (?, ?, ?, ?)
             ON CONFLICT(namespace, key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![namespace, key, value, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn remove(&self, namespace: &str, key: &str) -> Result<bool> {
        let conn = self.open()?;
        let removed = conn.execute(
            "DELETE FROM kv_store WHERE namespace = ? AND key = ?",
            params![namespace, key],
        )?;
        Ok(removed > 0)
    }

    fn clear(&self, namespace: &str) -> Result<usize> {
        let conn = self.open()?;
        let removed = conn.execute("DELETE FROM kv_store WHERE namespace = ?", params![namespace])?;
        Ok(removed)
    }

    fn keys(&self, namespace: &str) -> Result<Vec<String>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare("SELECT key FROM kv_store WHERE namespace = ? ORDER BY key")?;
        let keys = stmt
            .query_map(params![namespace], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(keys)
    }
}

/// In-process store used when native storage is unavailable or not wanted.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<(String, String), String>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<(String, String), String>>> {
        self.entries
            .lock()
            .map_err(|_| ToolmeshError::Storage("memory store lock poisoned".into()).into())
    }
}

impl KeyValueStore for MemoryStore {
    fn backend(&self) -> StorageBackend {
        StorageBackend::Simulated
    }

    fn get(&self, namespace: &str, key: &str) -> Result<Option<String>> {
        Ok(self
            .lock()?
            .get(&(namespace.to_string(), key.to_string()))
            .cloned())
    }

    fn put(&self, namespace: &str, key: &str, value: &str) -> Result<()> {
        self.lock()?
            .insert((namespace.to_string(), key.to_string()), value.to_string());
        Ok(())
    }

    fn remove(&self, namespace: &str, key: &str) -> Result<bool> {
        Ok(self
            .lock()?
            .remove(&(namespace.to_string(), key.to_string()))
            .is_some())
    }

    fn clear(&self, namespace: &str) -> Result<usize> {
        let mut entries = self.lock()?;
        let before = entries.len();
        entries.retain(|(ns, _), _| ns != namespace);
        Ok(before - entries.len())
    }

    fn keys(&self, namespace: &str) -> Result<Vec<String>> {
        Ok(self
            .lock()?
            .keys()
            .filter(|(ns, _)| ns == namespace)
            .map(|(_, key)| key.clone())
            .collect())
    }
}

/// Chooses the storage backend once, at startup.
pub struct StorageCapability;

impl StorageCapability {
    /// Build the store described by `config`.
    ///
    /// Native storage falls back to the simulated backend, with a warning,
    /// when no data directory can be determined or the database cannot be
    /// opened. This never fails.
    pub fn select(config: &StorageConfig) -> Arc<dyn KeyValueStore> {
        if config.backend == StorageBackend::Simulated {
            tracing::info!("using simulated in-memory storage");
            return Arc::new(MemoryStore::new());
        }

        let Some(path) = config.path.clone().or_else(default_db_path) else {
            tracing::warn!("could not determine a data directory; falling back to simulated storage");
            return Arc::new(MemoryStore::new());
        };

        match SqliteStore::new_with_path(&path) {
            Ok(store) => {
                tracing::debug!(path = %path.display(), "using native SQLite storage");
                Arc::new(store)
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "native storage unavailable; falling back to simulated storage"
                );
                Arc::new(MemoryStore::new())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_store() -> (SqliteStore, TempDir) {
        let dir = TempDir::new().expect("tempdir");
        let store = SqliteStore::new_with_path(dir.path().join("nested/kv.db")).expect("open store");
        (store, dir)
    }

    fn exercise(store: &dyn KeyValueStore) {
        assert_eq!(store.get("a", "k1").unwrap(), None);

        store.put("a", "k1", "one").unwrap();
        store.put("a", "k2", "two").unwrap();
        store.put("b", "k1", "other").unwrap();
        store.put("a", "k1", "uno").unwrap();

        assert_eq!(store.get("a", "k1").unwrap().as_deref(), Some("uno"));
        assert_eq!(store.get("b", "k1").unwrap().as_deref(), Some("other"));
        assert_eq!(store.keys("a").unwrap(), vec!["k1", "k2"]);

        assert!(store.remove("a", "k2").unwrap());
        assert!(!store.remove("a", "k2").unwrap());

        assert_eq!(store.clear("a").unwrap(), 1);
        assert!(store.keys("a").unwrap().is_empty());
        assert_eq!(store.keys("b").unwrap(), vec!["k1"]);
    }

    #[test]
    fn test_sqlite_store_contract() {
        let (store, _dir) = create_test_store();
        assert_eq!(store.backend(), StorageBackend::Native);
        exercise(&store);
    }

    #[test]
    fn test_memory_store_contract() {
        let store = MemoryStore::new();
        assert_eq!(store.backend(), StorageBackend::Simulated);
        exercise(&store);
    }

    #[test]
    fn test_sqlite_store_persists_across_instances() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("kv.db");
        SqliteStore::new_with_path(&path).unwrap().put("ns", "k", "v").unwrap();
        let reopened = SqliteStore::new_with_path(&path).unwrap();
        assert_eq!(reopened.get("ns", "k").unwrap().as_deref(), Some("v"));
    }

    #[test]
    fn test_select_simulated_when_configured() {
        let store = StorageCapability::select(&StorageConfig {
            backend: StorageBackend::Simulated,
            path: None,
        });
        assert_eq!(store.backend(), StorageBackend::Simulated);
    }

    #[test]
    fn test_select_native_with_path() {
        let dir = TempDir::new().unwrap();
        let store = StorageCapability::select(&StorageConfig {
            backend: StorageBackend::Native,
            path: Some(dir.path().join("toolmesh.db")),
        });
        assert_eq!(store.backend(), StorageBackend::Native);
    }

    #[test]
    fn test_select_falls_back_when_database_cannot_open() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"file").unwrap();

        let store = StorageCapability::select(&StorageConfig {
            backend: StorageBackend::Native,
            path: Some(blocker.join("sub/toolmesh.db")),
        });
        assert_eq!(store.backend(), StorageBackend::Simulated);
        store.put("ns", "k", "v").unwrap();
        assert_eq!(store.get("ns", "k").unwrap().as_deref(), Some("v"));
    }

    #[test]
    fn test_backend_parses_case_insensitively() {
        assert_eq!("NATIVE".parse::<StorageBackend>().unwrap(), StorageBackend::Native);
        assert_eq!("simulated".parse::<StorageBackend>().unwrap(), StorageBackend::Simulated);
        assert!("disk".parse::<StorageBackend>().is_err());
    }
}
