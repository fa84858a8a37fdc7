use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{BrokerRequest, BrokerResponse, LLMBroker, ModelTier};
use crate::error::EngineError;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    tier: ModelTier,
    prompt_hash: [u8; 32],
    system_hash: [u8; 32],
}

fn hash(text: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hasher.finalize().into()
}

/// Wraps another broker with an in-memory response cache keyed on
/// tier + prompt hash, so repeated calls with identical inputs (common
/// across retries and re-entrant graph transitions) skip the network.
pub struct CachedBroker {
    inner: Arc<dyn LLMBroker>,
    responses: RwLock<HashMap<CacheKey, BrokerResponse>>,
}

impl CachedBroker {
    pub fn new(inner: Arc<dyn LLMBroker>) -> Self {
        Self { inner, responses: RwLock::new(HashMap::new()) }
    }

    fn key_for(request: &BrokerRequest) -> CacheKey {
        CacheKey {
            tier: request.tier,
            prompt_hash: hash(&request.user_prompt),
            system_hash: hash(request.system_prompt.as_deref().unwrap_or("")),
        }
    }
}

#[async_trait]
impl LLMBroker for CachedBroker {
    async fn call(&self, request: BrokerRequest) -> Result<BrokerResponse, EngineError> {
        let key = Self::key_for(&request);
        if let Some(cached) = self.responses.read().await.get(&key) {
            return Ok(cached.clone());
        }
        let response = self.inner.call(request).await?;
        self.responses.write().await.insert(key, response.clone());
        Ok(response)
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EngineError> {
        self.inner.embed(text).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MockBroker;

    #[tokio::test]
    async fn repeated_call_hits_cache_not_inner() {
        let inner = Arc::new(MockBroker::new());
        inner.push_response("only once").await;
        let cached = CachedBroker::new(inner);

        let r1 = cached.call(BrokerRequest::new("same prompt", ModelTier::Fast)).await.unwrap();
        let r2 = cached.call(BrokerRequest::new("same prompt", ModelTier::Fast)).await.unwrap();
        assert_eq!(r1.text, "only once");
        assert_eq!(r2.text, "only once");
    }

    #[tokio::test]
    async fn distinct_prompts_do_not_collide() {
        let inner = Arc::new(MockBroker::new());
        inner.push_response("a").await;
        inner.push_response("b").await;
        let cached = CachedBroker::new(inner);

        let r1 = cached.call(BrokerRequest::new("prompt a", ModelTier::Fast)).await.unwrap();
        let r2 = cached.call(BrokerRequest::new("prompt b", ModelTier::Fast)).await.unwrap();
        assert_eq!(r1.text, "a");
        assert_eq!(r2.text, "b");
    }
}
