use async_trait::async_trait;
use std::collections::VecDeque;
use tokio::sync::Mutex;

use super::{BrokerRequest, BrokerResponse, LLMBroker, ModelTier};
use crate::error::EngineError;

fn tier_rate_per_1k_tokens(tier: ModelTier) -> f64 {
    match tier {
        ModelTier::Fast => 0.0002,
        ModelTier::Balanced => 0.0010,
        ModelTier::Deep => 0.0050,
    }
}

/// Deterministic, scriptable broker for tests and the CLI demo.
///
/// Queue responses with `push_response`; once the queue drains, `call`
/// falls back to a fixed deterministic echo of the prompt so callers that
/// don't care about exact content still get a stable, reproducible
/// response shape.
pub struct MockBroker {
    queued: Mutex<VecDeque<String>>,
}

impl MockBroker {
    pub fn new() -> Self {
        Self { queued: Mutex::new(VecDeque::new()) }
    }

    pub async fn push_response(&self, text: impl Into<String>) {
        self.queued.lock().await.push_back(text.into());
    }
}

impl Default for MockBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LLMBroker for MockBroker {
    async fn call(&self, request: BrokerRequest) -> Result<BrokerResponse, EngineError> {
        let text = self
            .queued
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| format!("[mock response to: {}]", request.user_prompt));
        let tokens_used = (text.len() / 4).max(1) as u64;
        let cost_usd = tokens_used as f64 / 1000.0 * tier_rate_per_1k_tokens(request.tier);
        Ok(BrokerResponse { text, tokens_used, cost_usd })
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EngineError> {
        Ok(deterministic_embedding(text))
    }
}

/// A stable, content-derived pseudo-embedding. Not semantically meaningful
/// — it exists so tests can exercise cosine similarity and convergence
/// scoring without a real embedding model: identical text always produces
/// an identical vector, and the byte distribution shifts the vector
/// enough that unrelated strings rarely collide.
pub(crate) fn deterministic_embedding(text: &str) -> Vec<f32> {
    const DIM: usize = 32;
    let mut v = vec![0f32; DIM];
    for (i, byte) in text.bytes().enumerate() {
        v[i % DIM] += byte as f32;
    }
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn queued_responses_drain_in_order() {
        let broker = MockBroker::new();
        broker.push_response("first").await;
        broker.push_response("second").await;
        let r1 = broker.call(BrokerRequest::new("p", ModelTier::Fast)).await.unwrap();
        let r2 = broker.call(BrokerRequest::new("p", ModelTier::Fast)).await.unwrap();
        assert_eq!(r1.text, "first");
        assert_eq!(r2.text, "second");
    }

    #[tokio::test]
    async fn empty_queue_falls_back_to_echo() {
        let broker = MockBroker::new();
        let r = broker.call(BrokerRequest::new("hello", ModelTier::Fast)).await.unwrap();
        assert!(r.text.contains("hello"));
    }

    #[tokio::test]
    async fn identical_text_embeds_identically() {
        let broker = MockBroker::new();
        let a = broker.embed("same text").await.unwrap();
        let b = broker.embed("same text").await.unwrap();
        assert_eq!(a, b);
    }
}
