//! State store
//!
//! `KeyValueStore` is the engine's only persistence seam: `save`/`load`/
//! `delete` over opaque string blobs with a TTL. `SqliteKeyValueStore` is
//! the concrete backend, grounded on the same
//! `spawn_blocking`-around-`rusqlite::Connection` pattern used for the
//! engine's task queue elsewhere in this codebase. `Checkpointer` is a
//! thin typed wrapper around it for `SessionState` specifically.

pub mod checkpoint;

pub use checkpoint::Checkpointer;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use tokio::task;

use crate::error::EngineError;

pub const DEFAULT_TTL_DAYS: i64 = 7;

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn save(&self, key: &str, value: &str, ttl_days: i64) -> Result<(), EngineError>;
    async fn load(&self, key: &str) -> Result<Option<String>, EngineError>;
    async fn delete(&self, key: &str) -> Result<(), EngineError>;
}

pub struct SqliteKeyValueStore {
    db_path: PathBuf,
}

impl SqliteKeyValueStore {
    pub async fn new(db_path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let path = db_path.as_ref().to_path_buf();
        let path_clone = path.clone();

        task::spawn_blocking(move || -> Result<(), rusqlite::Error> {
            let conn = Connection::open(&path_clone)?;
            conn.execute(
                "CREATE TABLE IF NOT EXISTS kv_store (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL,
                    expires_at TEXT NOT NULL
                )",
                [],
            )?;
            conn.execute("CREATE INDEX IF NOT EXISTS idx_expires_at ON kv_store(expires_at)", [])?;
            Ok(())
        })
        .await??;

        Ok(Self { db_path: path })
    }
}

#[async_trait]
impl KeyValueStore for SqliteKeyValueStore {
    async fn save(&self, key: &str, value: &str, ttl_days: i64) -> Result<(), EngineError> {
        let path = self.db_path.clone();
        let key = key.to_string();
        let value = value.to_string();
        let expires_at = (Utc::now() + ChronoDuration::days(ttl_days)).to_rfc3339();

        task::spawn_blocking(move || -> Result<(), rusqlite::Error> {
            let conn = Connection::open(&path)?;
            conn.execute(
                "INSERT OR REPLACE INTO kv_store (key, value, expires_at) VALUES (?1, ?2, ?3)",
                params![&key, &value, &expires_at],
            )?;
            Ok(())
        })
        .await?
        .map_err(EngineError::from)
    }

    async fn load(&self, key: &str) -> Result<Option<String>, EngineError> {
        let path = self.db_path.clone();
        let key = key.to_string();

        task::spawn_blocking(move || -> Result<Option<String>, rusqlite::Error> {
            let conn = Connection::open(&path)?;
            let row: Option<(String, String)> = conn
                .query_row("SELECT value, expires_at FROM kv_store WHERE key = ?1", params![&key], |row| {
                    Ok((row.get(0)?, row.get(1)?))
                })
                .optional()?;

            match row {
                Some((value, expires_at)) => {
                    let expired = chrono::DateTime::parse_from_rfc3339(&expires_at)
                        .map(|t| t.with_timezone(&Utc) < Utc::now())
                        .unwrap_or(false);
                    if expired {
                        conn.execute("DELETE FROM kv_store WHERE key = ?1", params![&key])?;
                        Ok(None)
                    } else {
                        Ok(Some(value))
                    }
                }
                None => Ok(None),
            }
        })
        .await?
        .map_err(EngineError::from)
    }

    async fn delete(&self, key: &str) -> Result<(), EngineError> {
        let path = self.db_path.clone();
        let key = key.to_string();

        task::spawn_blocking(move || -> Result<(), rusqlite::Error> {
            let conn = Connection::open(&path)?;
            conn.execute("DELETE FROM kv_store WHERE key = ?1", params![&key])?;
            Ok(())
        })
        .await?
        .map_err(EngineError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteKeyValueStore::new(dir.path().join("kv.sqlite3")).await.unwrap();
        store.save("checkpoint:s1", "blob-contents", DEFAULT_TTL_DAYS).await.unwrap();
        assert_eq!(store.load("checkpoint:s1").await.unwrap().as_deref(), Some("blob-contents"));
    }

    #[tokio::test]
    async fn load_missing_key_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteKeyValueStore::new(dir.path().join("kv.sqlite3")).await.unwrap();
        assert_eq!(store.load("nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn delete_removes_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteKeyValueStore::new(dir.path().join("kv.sqlite3")).await.unwrap();
        store.save("k", "v", DEFAULT_TTL_DAYS).await.unwrap();
        store.delete("k").await.unwrap();
        assert_eq!(store.load("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn already_expired_entry_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteKeyValueStore::new(dir.path().join("kv.sqlite3")).await.unwrap();
        store.save("k", "v", -1).await.unwrap();
        assert_eq!(store.load("k").await.unwrap(), None);
    }
}
