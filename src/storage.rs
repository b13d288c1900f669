//! Client-side key-value store.
//!
//! Backs the offline queue and the last sync status with a small SQLite
//! file (`client.db`). Values are JSON documents addressed by
//! `category/key`; unreadable values read back as `Null` so a damaged entry
//! never takes the storefront down.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection};
use serde_json::Value;
use tracing::{info, warn};

use crate::db;

/// Category shared by every key the offline machinery writes.
pub const OFFLINE_CATEGORY: &str = "offline";
pub const KEY_PENDING_ORDERS: &str = "pending_orders_queue";
pub const KEY_SYNC_STATUS: &str = "sync_status";

pub struct LocalStore {
    conn: Mutex<Connection>,
}

impl LocalStore {
    /// Open (or create) `{data_dir}/client.db`.
    pub fn open(data_dir: &Path) -> Result<Self, String> {
        let path = data_dir.join("client.db");
        let conn = db::open_with_retry(&path)?;
        ensure_schema(&conn)?;
        info!(path = %path.display(), "Local store ready");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, String> {
        let conn = Connection::open_in_memory().map_err(|e| format!("sqlite open: {e}"))?;
        db::apply_pragmas(&conn)?;
        ensure_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Raw string value, if present.
    pub fn get_setting(&self, category: &str, key: &str) -> Result<Option<String>, String> {
        let conn = self.conn.lock().map_err(|e| e.to_string())?;
        Ok(conn
            .query_row(
                "SELECT setting_value FROM local_settings
                 WHERE setting_category = ?1 AND setting_key = ?2",
                params![category, key],
                |row| row.get(0),
            )
            .ok())
    }

    /// Insert or update a raw string value.
    pub fn set_setting(&self, category: &str, key: &str, value: &str) -> Result<(), String> {
        let conn = self.conn.lock().map_err(|e| e.to_string())?;
        conn.execute(
            "INSERT INTO local_settings (setting_category, setting_key, setting_value, updated_at)
             VALUES (?1, ?2, ?3, datetime('now'))
             ON CONFLICT(setting_category, setting_key) DO UPDATE SET
                setting_value = excluded.setting_value,
                updated_at = excluded.updated_at",
            params![category, key, value],
        )
        .map_err(|e| format!("set_setting: {e}"))?;
        Ok(())
    }

    /// Parsed JSON value. Missing or corrupt entries read as `Null`.
    pub fn get_json(&self, category: &str, key: &str) -> Result<Value, String> {
        let Some(raw) = self.get_setting(category, key)? else {
            return Ok(Value::Null);
        };
        match serde_json::from_str::<Value>(&raw) {
            Ok(parsed) => Ok(parsed),
            Err(e) => {
                warn!(category, key, error = %e, "Discarding unreadable local value");
                Ok(Value::Null)
            }
        }
    }

    pub fn set_json(&self, category: &str, key: &str, value: &Value) -> Result<(), String> {
        self.set_setting(category, key, &value.to_string())
    }

    pub fn remove(&self, category: &str, key: &str) -> Result<(), String> {
        let conn = self.conn.lock().map_err(|e| e.to_string())?;
        conn.execute(
            "DELETE FROM local_settings WHERE setting_category = ?1 AND setting_key = ?2",
            params![category, key],
        )
        .map_err(|e| format!("remove setting: {e}"))?;
        Ok(())
    }
}

fn ensure_schema(conn: &Connection) -> Result<(), String> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS local_settings (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            setting_category TEXT NOT NULL,
            setting_key TEXT NOT NULL,
            setting_value TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE(setting_category, setting_key)
        );",
    )
    .map_err(|e| format!("create local_settings: {e}"))
}
