//! Embedding service
//!
//! `EmbeddingService` is the seam the convergence detector and context
//! composer use to turn text into vectors. `BrokerEmbeddingService`
//! delegates to an `LLMBroker`; `LruEmbeddingCache` and
//! `SqliteEmbeddingCache` are optional wrapping tiers, composable as
//! `Sqlite(Lru(Broker))` to avoid recomputing a vector that was already
//! persisted from a previous process.

mod lru_cache;
mod sqlite_cache;

pub use lru_cache::LruEmbeddingCache;
pub use sqlite_cache::SqliteEmbeddingCache;

use async_trait::async_trait;
use std::sync::Arc;

use crate::broker::LLMBroker;
use crate::error::EngineError;

#[async_trait]
pub trait EmbeddingService: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EngineError>;
}

/// Cosine similarity as the normalized dot product, generalized into a
/// free function so every caller (convergence scoring, persona
/// selection, context assembly) shares one implementation.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    dot / (norm_a * norm_b)
}

pub struct BrokerEmbeddingService {
    broker: Arc<dyn LLMBroker>,
}

impl BrokerEmbeddingService {
    pub fn new(broker: Arc<dyn LLMBroker>) -> Self {
        Self { broker }
    }
}

#[async_trait]
impl EmbeddingService for BrokerEmbeddingService {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EngineError> {
        self.broker.embed(text).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_similarity_of_identical_vectors_is_one() {
        let v = vec![0.3, 0.1, 0.9, -0.2];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn cosine_similarity_of_orthogonal_vectors_is_zero() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-5);
    }

    #[test]
    fn cosine_similarity_handles_zero_vector() {
        let a = vec![0.0, 0.0];
        let b = vec![1.0, 1.0];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }
}
