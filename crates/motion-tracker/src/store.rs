// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Key-value state store.
//!
//! Used to hand geometry snapshots between cooperating processes, not to
//! recover a tracker's own state after a crash.
//!
//! # Backends
//!
//! - `MemoryStateStore` -- process-local map, shared through `Arc`
//! - `SqliteStateStore` -- file-backed (or in-memory) SQLite table

use crate::config::{StateStoreConfig, StoreBackend};
use crate::message::{unix_nanos, PersistedSnapshot};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;
use thiserror::Error;

/// State store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("snapshot encoding error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("store backend error: {0}")]
    Backend(String),
}

/// Backend-agnostic get/set interface.
pub trait StateStore: Send + Sync {
    /// Value stored under `key`, if any.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Store `value` under `key`, replacing any previous value.
    fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;
}

/// Open the backend described by `config`.
pub fn open_store(config: &StateStoreConfig) -> Result<Arc<dyn StateStore>, StoreError> {
    match (config.backend, &config.path) {
        (StoreBackend::Memory, _) => Ok(Arc::new(MemoryStateStore::new())),
        (StoreBackend::Sqlite, Some(path)) => Ok(Arc::new(SqliteStateStore::open(path)?)),
        (StoreBackend::Sqlite, None) => Ok(Arc::new(SqliteStateStore::open_in_memory()?)),
    }
}

/// Process-local store.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl StateStore for MemoryStateStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.entries.lock().insert(key.to_string(), value.to_vec());
        Ok(())
    }
}

/// SQLite-backed store.
///
/// # Schema
///
/// ```sql
/// CREATE TABLE kv (
///     key TEXT PRIMARY KEY,
///     value BLOB NOT NULL,
///     updated_ns INTEGER NOT NULL
/// );
/// ```
pub struct SqliteStateStore {
    conn: Mutex<Connection>,
}

impl SqliteStateStore {
    /// Open (or create) a database file.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let store = Self {
            conn: Mutex::new(Connection::open(path)?),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Private in-memory database.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        self.conn.lock().execute(
            "CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value BLOB NOT NULL,
                updated_ns INTEGER NOT NULL
            )",
            [],
        )?;
        Ok(())
    }
}

impl StateStore for SqliteStateStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let conn = self.conn.lock();
        let value = conn
            .query_row("SELECT value FROM kv WHERE key = ?1", [key], |row| {
                row.get::<_, Vec<u8>>(0)
            })
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        // Saturate to i64::MAX (SQLite integers are signed)
        let now = unix_nanos(SystemTime::now()).min(i64::MAX as u64) as i64;
        self.conn.lock().execute(
            "INSERT INTO kv (key, value, updated_ns) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_ns = excluded.updated_ns",
            params![key, value, now],
        )?;
        Ok(())
    }
}

/// Snapshot access keyed by robot id.
#[derive(Clone)]
pub struct SnapshotStore {
    inner: Arc<dyn StateStore>,
}

impl SnapshotStore {
    pub fn new(inner: Arc<dyn StateStore>) -> Self {
        Self { inner }
    }

    /// Store key for a robot.
    pub fn key(robot_id: &str) -> String {
        format!("robot_{}", robot_id)
    }

    /// Snapshot stored for `robot_id`, if any.
    pub fn load(&self, robot_id: &str) -> Result<Option<PersistedSnapshot>, StoreError> {
        match self.inner.get(&Self::key(robot_id))? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Write the snapshot for `robot_id`.
    pub fn save(&self, robot_id: &str, snapshot: &PersistedSnapshot) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(snapshot)?;
        self.inner.set(&Self::key(robot_id), &bytes)
    }
}
