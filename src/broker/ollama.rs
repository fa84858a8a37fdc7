use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use ollama_rs::generation::chat::{request::ChatMessageRequest, ChatMessage};
use ollama_rs::generation::embeddings::request::{EmbeddingsInput, GenerateEmbeddingsRequest};
use ollama_rs::models::ModelOptions;
use ollama_rs::Ollama;
use std::num::NonZeroU32;

use super::{call_with_backoff, BrokerRequest, BrokerResponse, LLMBroker, ModelTier};
use crate::error::EngineError;

fn default_model_for(tier: ModelTier) -> &'static str {
    match tier {
        ModelTier::Fast => "llama3.2:1b",
        ModelTier::Balanced => "llama3.2:3b",
        ModelTier::Deep => "llama3.1:8b",
    }
}

/// Thin wrapper over `ollama-rs`, mirroring the chat-completion shape used
/// elsewhere in this codebase's Ollama integration, generalized to select
/// a model by tier and enforce a process-wide concurrent-call limit.
pub struct OllamaBroker {
    client: Ollama,
    embed_model: String,
    limiter: DefaultDirectRateLimiter,
}

impl OllamaBroker {
    pub fn new(client: Ollama) -> Self {
        Self::with_limit(client, 4)
    }

    /// `max_concurrent_calls_per_second` bounds how often `call`/`embed`
    /// may reach the Ollama server, respecting provider rate limits.
    pub fn with_limit(client: Ollama, max_concurrent_calls_per_second: u32) -> Self {
        let quota = Quota::per_second(
            NonZeroU32::new(max_concurrent_calls_per_second.max(1)).expect("nonzero by construction"),
        );
        Self {
            client,
            embed_model: "nomic-embed-text".to_string(),
            limiter: RateLimiter::direct(quota),
        }
    }

    pub fn with_embed_model(mut self, model: impl Into<String>) -> Self {
        self.embed_model = model.into();
        self
    }

    async fn call_once(&self, request: &BrokerRequest) -> Result<BrokerResponse, EngineError> {
        self.limiter.until_ready().await;

        let model = default_model_for(request.tier).to_string();
        let mut messages = Vec::new();
        if let Some(system) = &request.system_prompt {
            messages.push(ChatMessage::system(system.clone()));
        }
        messages.push(ChatMessage::user(request.user_prompt.clone()));

        let mut options = ModelOptions::default();
        options = options.num_ctx(4096);
        if let Some(max_tokens) = request.max_tokens {
            options = options.num_predict(max_tokens as i32);
        }

        let chat_request = ChatMessageRequest::new(model, messages).options(options);
        let response = self
            .client
            .send_chat_messages(chat_request)
            .await
            .map_err(|e| EngineError::Broker(e.to_string()))?;

        let text = response.message.content;
        let tokens_used = (text.len() / 4).max(1) as u64;
        let cost_usd = 0.0; // local inference has no per-token billing
        Ok(BrokerResponse { text, tokens_used, cost_usd })
    }
}

#[async_trait]
impl LLMBroker for OllamaBroker {
    async fn call(&self, request: BrokerRequest) -> Result<BrokerResponse, EngineError> {
        call_with_backoff(|| self.call_once(&request)).await
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EngineError> {
        self.limiter.until_ready().await;
        let request = GenerateEmbeddingsRequest::new(self.embed_model.clone(), EmbeddingsInput::Single(text.to_string()));
        let response = self
            .client
            .generate_embeddings(request)
            .await
            .map_err(|e| EngineError::Embedding(e.to_string()))?;
        response
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| EngineError::Embedding("ollama returned no embedding vector".into()))
    }
}
