/// Persistent key-value storage for monitor state

mod repository;

pub use repository::{StateRepository, ACTIVITY_KEY, COURSES_KEY, MONITORING_STATE_KEY};

use crate::monitor::MonitorError;
use chrono::Utc;
use dashmap::DashMap;
use rusqlite::{Connection, OptionalExtension};
use serde_json::Value;
use std::sync::{Mutex, MutexGuard};

const SCHEMA_SQL: &str = include_str!("../../sql/init_store.sql");

/// Get/set of JSON documents by key. Last writer wins.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>, MonitorError>;

    fn set(&self, key: &str, value: &Value) -> Result<(), MonitorError>;
}

/// SQLite-backed store, one row per key.
pub struct StoreManager {
    db: Mutex<Connection>,
}

impl StoreManager {
    /// Opens (or creates) the database at `db_path` and initializes the schema
    pub fn new(db_path: &str) -> Result<Self, MonitorError> {
        let conn = Connection::open(db_path)?;
        conn.execute_batch(SCHEMA_SQL)?;

        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    fn db(&self) -> Result<MutexGuard<'_, Connection>, MonitorError> {
        self.db.lock().map_err(|_| MonitorError::Storage {
            message: "database connection is poisoned".to_string(),
        })
    }
}

impl KeyValueStore for StoreManager {
    fn get(&self, key: &str) -> Result<Option<Value>, MonitorError> {
        let db = self.db()?;
        let raw: Option<String> = db
            .query_row("SELECT value FROM kv_store WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()?;

        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: &Value) -> Result<(), MonitorError> {
        let raw = serde_json::to_string(value)?;
        let db = self.db()?;
        db.execute(
            "INSERT INTO kv_store (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            (key, raw, Utc::now()),
        )?;
        Ok(())
    }
}

/// In-process store, used when no database path is configured.
#[derive(Default)]
pub struct MemoryStore {
    entries: DashMap<String, Value>,
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Value>, MonitorError> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    fn set(&self, key: &str, value: &Value) -> Result<(), MonitorError> {
        self.entries.insert(key.to_string(), value.clone());
        Ok(())
    }
}
