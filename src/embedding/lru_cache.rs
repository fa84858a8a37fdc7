use async_trait::async_trait;
use lru::LruCache;
use sha2::{Digest, Sha256};
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::EmbeddingService;
use crate::error::EngineError;

const DEFAULT_CAPACITY: usize = 2048;

fn content_hash(text: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hasher.finalize().into()
}

/// In-memory LRU tier in front of an inner `EmbeddingService`. Keyed on
/// content hash so callers can pass arbitrarily long text without the
/// cache itself growing unbounded.
pub struct LruEmbeddingCache {
    inner: Arc<dyn EmbeddingService>,
    cache: Mutex<LruCache<[u8; 32], Vec<f32>>>,
}

impl LruEmbeddingCache {
    pub fn new(inner: Arc<dyn EmbeddingService>) -> Self {
        Self::with_capacity(inner, DEFAULT_CAPACITY)
    }

    pub fn with_capacity(inner: Arc<dyn EmbeddingService>, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("nonzero by construction");
        Self { inner, cache: Mutex::new(LruCache::new(capacity)) }
    }
}

#[async_trait]
impl EmbeddingService for LruEmbeddingCache {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EngineError> {
        let key = content_hash(text);
        if let Some(vector) = self.cache.lock().await.get(&key) {
            return Ok(vector.clone());
        }
        let vector = self.inner.embed(text).await?;
        self.cache.lock().await.put(key, vector.clone());
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
            Ok(vec![text.len() as f32])
        }
    }

    #[tokio::test]
    async fn repeated_embed_hits_cache() {
        let inner = Arc::new(CountingService { calls: AtomicU32::new(0) });
        let cache = LruEmbeddingCache::new(inner.clone());
        cache.embed("hello").await.unwrap();
        cache.embed("hello").await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn distinct_text_misses_cache() {
        let inner = Arc::new(CountingService { calls: AtomicU32::new(0) });
        let cache = LruEmbeddingCache::new(inner.clone());
        cache.embed("hello").await.unwrap();
        cache.embed("world").await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }
}
