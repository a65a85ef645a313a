//! Key-value application state with versioned, conditional writes.

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

/// State store error types.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error("version conflict writing state key {0}")]
    Conflict(String),
    #[error("stored state is corrupt: {0}")]
    Corrupt(String),
    #[error("state store unavailable: {0}")]
    Unavailable(String),
    #[error("Not found")]
    NotFound,
}

/// A stored value together with its write version.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned {
    pub value: String,
    /// Starts at 1 and increases by one on every successful write.
    pub version: u64,
}

/// Key-value state collaborator.
///
/// `set` is conditional: with `expected_version == None` the key must not exist
/// yet, otherwise the stored version must equal `expected_version`. A failed
/// precondition returns [`StoreError::Conflict`]. On success the new version is
/// returned.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Versioned>, StoreError>;

    async fn set(
        &self,
        key: &str,
        value: &str,
        expected_version: Option<u64>,
    ) -> Result<u64, StoreError>;
}

/// SQLite-backed state store.
#[derive(Clone)]
pub struct SqliteStateStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStateStore {
    /// Open (or create) the state database at the given path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init()?;
        Ok(store)
    }

    fn init(&self) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute_batch(include_str!("../../migrations/000001_init.up.sql"))
            .map_err(|e| StoreError::Migration(format!("Migration 1 failed: {}", e)))?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Unavailable("connection mutex poisoned".to_string()))
    }
}

#[async_trait]
impl StateStore for SqliteStateStore {
    async fn get(&self, key: &str) -> Result<Option<Versioned>, StoreError> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT value, version FROM app_state WHERE key = ?1",
                params![key],
                |row| {
                    let version: i64 = row.get(1)?;
                    Ok(Versioned {
                        value: row.get(0)?,
                        version: version.max(0) as u64,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    async fn set(
        &self,
        key: &str,
        value: &str,
        expected_version: Option<u64>,
    ) -> Result<u64, StoreError> {
        let conn = self.conn()?;
        let now = Utc::now().to_rfc3339();

        match expected_version {
            None => {
                let changed = conn.execute(
                    "INSERT INTO app_state (key, value, version, updated_at) VALUES (?1, ?2, 1, ?3)
                     ON CONFLICT(key) DO NOTHING",
                    params![key, value, now],
                )?;
                if changed == 0 {
                    return Err(StoreError::Conflict(key.to_string()));
                }
                Ok(1)
            }
            Some(expected) => {
                let changed = conn.execute(
                    "UPDATE app_state SET value = ?2, version = version + 1, updated_at = ?3
                     WHERE key = ?1 AND version = ?4",
                    params![key, value, now, expected as i64],
                )?;
                if changed == 0 {
                    return Err(StoreError::Conflict(key.to_string()));
                }
                Ok(expected + 1)
            }
        }
    }
}

/// In-process state store, used when no durable backend is needed.
#[derive(Default)]
pub struct MemoryStateStore {
    entries: Mutex<HashMap<String, Versioned>>,
    #[cfg(test)]
    fail_writes: std::sync::atomic::AtomicBool,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> Result<MutexGuard<'_, HashMap<String, Versioned>>, StoreError> {
        self.entries
            .lock()
            .map_err(|_| StoreError::Unavailable("state mutex poisoned".to_string()))
    }

    /// Make every subsequent write fail.
    #[cfg(test)]
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes
            .store(fail, std::sync::atomic::Ordering::SeqCst);
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn get(&self, key: &str) -> Result<Option<Versioned>, StoreError> {
        Ok(self.entries()?.get(key).cloned())
    }

    async fn set(
        &self,
        key: &str,
        value: &str,
        expected_version: Option<u64>,
    ) -> Result<u64, StoreError> {
        #[cfg(test)]
        if self.fail_writes.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(StoreError::Unavailable("writes disabled".to_string()));
        }

        let mut entries = self.entries()?;
        let current = entries.get(key).map(|v| v.version);
        if current != expected_version {
            return Err(StoreError::Conflict(key.to_string()));
        }

        let version = current.unwrap_or(0) + 1;
        entries.insert(
            key.to_string(),
            Versioned {
                value: value.to_string(),
                version,
            },
        );
        Ok(version)
    }
}
