//! LLM Broker
//!
//! `LLMBroker` is the single seam through which every agent talks to a
//! model. Two implementations ship: `MockBroker`, deterministic and
//! scriptable, used by tests and the CLI demo; and `OllamaBroker`, a thin
//! wrapper over `ollama-rs` for anyone pointing the engine at a real
//! model. `CachedBroker` wraps either one with a response cache keyed on
//! model + prompt hash.

mod cached;
mod mock;
mod ollama;

pub use cached::CachedBroker;
pub use mock::MockBroker;
pub use ollama::OllamaBroker;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    Fast,
    Balanced,
    Deep,
}

#[derive(Debug, Clone)]
pub struct BrokerRequest {
    pub system_prompt: Option<String>,
    pub user_prompt: String,
    pub tier: ModelTier,
    pub max_tokens: Option<u32>,
}

impl BrokerRequest {
    pub fn new(user_prompt: impl Into<String>, tier: ModelTier) -> Self {
        Self {
            system_prompt: None,
            user_prompt: user_prompt.into(),
            tier,
            max_tokens: None,
        }
    }

    pub fn with_system(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BrokerResponse {
    pub text: String,
    pub tokens_used: u64,
    pub cost_usd: f64,
}

#[async_trait]
pub trait LLMBroker: Send + Sync {
    async fn call(&self, request: BrokerRequest) -> Result<BrokerResponse, EngineError>;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EngineError>;
}

const RETRY_BASE_DELAY: Duration = Duration::from_millis(250);
const RETRY_BACKOFF_FACTOR: u32 = 2;
const MAX_RETRIES: u32 = 2;

/// Calls `attempt` with exponential backoff (base 250ms, factor 2),
/// retrying up to `MAX_RETRIES` times on failure. Grounded on the
/// escalation-loop shape used for model-tier escalation elsewhere in this
/// codebase, simplified to a flat retry since the broker call itself
/// carries no tier-escalation semantics.
pub(crate) async fn call_with_backoff<F, Fut>(mut attempt: F) -> Result<BrokerResponse, EngineError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<BrokerResponse, EngineError>>,
{
    let mut delay = RETRY_BASE_DELAY;
    let mut last_err = None;
    for try_number in 0..=MAX_RETRIES {
        match attempt().await {
            Ok(response) => return Ok(response),
            Err(err) => {
                tracing::warn!(try_number, error = %err, "broker call failed, retrying");
                last_err = Some(err);
                if try_number < MAX_RETRIES {
                    tokio::time::sleep(delay).await;
                    delay *= RETRY_BACKOFF_FACTOR;
                }
            }
        }
    }
    Err(last_err.unwrap_or_else(|| EngineError::Broker("retry loop produced no attempts".into())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn call_with_backoff_retries_then_succeeds() {
        let calls = AtomicU32::new(0);
        let result = call_with_backoff(|| async {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(EngineError::Broker("transient".into()))
            } else {
                Ok(BrokerResponse { text: "ok".into(), tokens_used: 1, cost_usd: 0.0 })
            }
        })
        .await;
        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn call_with_backoff_gives_up_after_max_retries() {
        let calls = AtomicU32::new(0);
        let result = call_with_backoff(|| async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<BrokerResponse, _>(EngineError::Broker("permanent".into()))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), MAX_RETRIES + 1);
    }
}
