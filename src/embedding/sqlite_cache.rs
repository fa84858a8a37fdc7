use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task;

use super::EmbeddingService;
use crate::error::EngineError;

fn content_hash_hex(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Persistent embedding cache keyed on content hash, backed by the same
/// `spawn_blocking`-around-`rusqlite::Connection` pattern used for the
/// engine's state store — a `rusqlite::Connection` is not `Send` across
/// an `.await`, so every query runs to completion inside a blocking task.
pub struct SqliteEmbeddingCache {
    inner: Arc<dyn EmbeddingService>,
    db_path: PathBuf,
}

impl SqliteEmbeddingCache {
    pub async fn new(db_path: impl AsRef<Path>, inner: Arc<dyn EmbeddingService>) -> Result<Self, EngineError> {
        let path = db_path.as_ref().to_path_buf();
        let path_clone = path.clone();

        task::spawn_blocking(move || -> Result<(), rusqlite::Error> {
            let conn = Connection::open(&path_clone)?;
            conn.execute(
                "CREATE TABLE IF NOT EXISTS embeddings (
                    content_hash TEXT PRIMARY KEY,
                    vector TEXT NOT NULL
                )",
                [],
            )?;
            Ok(())
        })
        .await??;

        Ok(Self { inner, db_path: path })
    }

    async fn lookup(&self, key: &str) -> Result<Option<Vec<f32>>, EngineError> {
        let path = self.db_path.clone();
        let key = key.to_string();
        task::spawn_blocking(move || -> Result<Option<Vec<f32>>, rusqlite::Error> {
            let conn = Connection::open(&path)?;
            let raw: Option<String> = conn
                .query_row("SELECT vector FROM embeddings WHERE content_hash = ?1", params![&key], |row| row.get(0))
                .optional()?;
            Ok(raw.and_then(|json| serde_json::from_str(&json).ok()))
        })
        .await?
        .map_err(EngineError::from)
    }

    async fn store(&self, key: &str, vector: &[f32]) -> Result<(), EngineError> {
        let path = self.db_path.clone();
        let key = key.to_string();
        let json = serde_json::to_string(vector)?;
        task::spawn_blocking(move || -> Result<(), rusqlite::Error> {
            let conn = Connection::open(&path)?;
            conn.execute(
                "INSERT OR REPLACE INTO embeddings (content_hash, vector) VALUES (?1, ?2)",
                params![&key, &json],
            )?;
            Ok(())
        })
        .await?
        .map_err(EngineError::from)
    }
}

#[async_trait]
impl EmbeddingService for SqliteEmbeddingCache {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EngineError> {
        let key = content_hash_hex(text);
        if let Some(vector) = self.lookup(&key).await? {
            return Ok(vector);
        }
        let vector = self.inner.embed(text).await?;
        self.store(&key, &vector).await?;
        Ok(vector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingService {
        calls: AtomicU32,
    }

    #[async_trait]
    impl EmbeddingService for CountingService {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, EngineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![text.len() as f32, 1.0, 2.0])
        }
    }

    #[tokio::test]
    async fn cache_persists_across_lookups() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("embeddings.sqlite3");
        let inner = Arc::new(CountingService { calls: AtomicU32::new(0) });
        let cache = SqliteEmbeddingCache::new(&db_path, inner.clone()).await.unwrap();

        let v1 = cache.embed("hello world").await.unwrap();
        let v2 = cache.embed("hello world").await.unwrap();
        assert_eq!(v1, v2);
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn distinct_text_produces_distinct_rows() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("embeddings.sqlite3");
        let inner = Arc::new(CountingService { calls: AtomicU32::new(0) });
        let cache = SqliteEmbeddingCache::new(&db_path, inner.clone()).await.unwrap();

        cache.embed("a").await.unwrap();
        cache.embed("bb").await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }
}
