//! Agent set
//!
//! Every agent implements the shared `Agent` trait — the generalization
//! of this codebase's `Agent::execute` trait to a typed input/output pair
//! plus a cost-accounting phase label. Each concrete agent owns an
//! `Arc<dyn LLMBroker>` and does its own prompt construction and response
//! parsing in the JSON-first, re-ask-once, safe-default-last style already
//! used by this codebase's `Router::route` and its planner.

mod decomposer;
mod facilitator;
mod meta_synthesizer;
mod moderator;
mod persona_contributor;
mod selector;
mod summarizer;
mod synthesizer;

pub use decomposer::Decomposer;
pub use facilitator::{FacilitatorAgent, FacilitatorInput};
pub use meta_synthesizer::{MetaSynthesisReport, MetaSynthesizer};
pub use moderator::ModeratorAgent;
pub use persona_contributor::PersonaContributor;
pub use selector::{SelectedPersona, Selector};
pub use summarizer::Summarizer;
pub use synthesizer::{Synthesizer, SynthesisReport};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::broker::{BrokerRequest, BrokerResponse, LLMBroker, ModelTier};
use crate::config::EngineConfig;
use crate::error::EngineError;

/// The cost-accounting bucket an agent's call is attributed to. Distinct
/// from `crate::domain::contribution::Phase`, which tags a single
/// discussion message rather than a cost line item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostPhase {
    Decomposition,
    PersonaSelection,
    Discussion,
    Synthesis,
    MetaSynthesis,
}

impl CostPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            CostPhase::Decomposition => "decomposition",
            CostPhase::PersonaSelection => "persona_selection",
            CostPhase::Discussion => "discussion",
            CostPhase::Synthesis => "synthesis",
            CostPhase::MetaSynthesis => "meta_synthesis",
        }
    }
}

/// Shared context threaded into every agent call.
pub struct AgentContext {
    pub config: Arc<EngineConfig>,
    pub round_number: u8,
}

impl AgentContext {
    pub fn new(config: Arc<EngineConfig>, round_number: u8) -> Self {
        Self { config, round_number }
    }

    /// Fast model for early rounds, balanced afterward, per
    /// `EngineConfig::model_policy`.
    pub fn discussion_tier(&self) -> ModelTier {
        if self.round_number <= self.config.model_policy.fast_until_round {
            ModelTier::Fast
        } else {
            ModelTier::Balanced
        }
    }
}

#[async_trait]
pub trait Agent: Send + Sync {
    type Input: Send;
    type Output: Send;

    async fn run(&self, input: Self::Input, ctx: &AgentContext) -> Result<(Self::Output, BrokerResponse), EngineError>;

    fn phase(&self) -> CostPhase;
}

/// Extracts the first top-level `{...}` object from free-form LLM output
/// and parses it as JSON. Shared by every agent's JSON-first parse step.
pub(crate) fn extract_json_object(text: &str) -> Option<serde_json::Value> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    serde_json::from_str(&text[start..=end]).ok()
}

const REASK_SUFFIX: &str = "\n\nYour previous response could not be parsed. Respond again with \
ONLY the JSON object described above: no prose, no markdown fences, no commentary.";

/// Calls `broker`, and if `parse` rejects the first response, re-asks
/// exactly once with a stricter system prompt before handing control back
/// to the caller's own safe-default fallback. Token and cost accounting
/// from both calls is summed into a single `BrokerResponse` so callers
/// still record one cost-accounting line per agent call regardless of how
/// many broker round-trips it took.
pub(crate) async fn call_with_reask<T>(
    broker: &Arc<dyn LLMBroker>,
    request: BrokerRequest,
    parse: impl Fn(&str) -> Option<T>,
) -> Result<(Option<T>, BrokerResponse), EngineError> {
    let first = broker.call(request.clone()).await?;
    if let Some(parsed) = parse(&first.text) {
        return Ok((Some(parsed), first));
    }
    tracing::debug!("response unparsable, re-asking once with stricter instructions");
    let base_system = request.system_prompt.clone().unwrap_or_default();
    let stricter = request.with_system(format!("{base_system}{REASK_SUFFIX}"));
    let second = broker.call(stricter).await?;
    let parsed = parse(&second.text);
    let combined = BrokerResponse {
        text: second.text,
        tokens_used: first.tokens_used + second.tokens_used,
        cost_usd: first.cost_usd + second.cost_usd,
    };
    Ok((parsed, combined))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_json_object_ignores_surrounding_prose() {
        let text = "Here is my answer:\n{\"a\": 1, \"b\": \"x\"}\nThanks.";
        let v = extract_json_object(text).unwrap();
        assert_eq!(v["a"], 1);
        assert_eq!(v["b"], "x");
    }

    #[test]
    fn extract_json_object_returns_none_for_non_json() {
        assert!(extract_json_object("no braces here").is_none());
    }

    #[tokio::test]
    async fn call_with_reask_returns_first_response_when_parse_succeeds() {
        let broker: Arc<dyn LLMBroker> = Arc::new(crate::broker::MockBroker::new());
        broker.call(BrokerRequest::new("prime", ModelTier::Fast)).await.ok();
        let mock = crate::broker::MockBroker::new();
        mock.push_response("ok").await;
        let broker: Arc<dyn LLMBroker> = Arc::new(mock);
        let request = BrokerRequest::new("hello", ModelTier::Fast).with_system("sys");
        let (parsed, response) = call_with_reask(&broker, request, |t| (t == "ok").then(|| t.to_string())).await.unwrap();
        assert_eq!(parsed.as_deref(), Some("ok"));
        assert_eq!(response.text, "ok");
    }

    #[tokio::test]
    async fn call_with_reask_retries_once_then_falls_through_to_none() {
        let mock = crate::broker::MockBroker::new();
        mock.push_response("garbage").await;
        mock.push_response("still garbage").await;
        let broker: Arc<dyn LLMBroker> = Arc::new(mock);
        let request = BrokerRequest::new("hello", ModelTier::Fast).with_system("sys");
        let (parsed, response) = call_with_reask(&broker, request, |t: &str| (t == "good").then(|| t.to_string())).await.unwrap();
        assert!(parsed.is_none());
        assert_eq!(response.text, "still garbage");
        assert_eq!(response.tokens_used, 2 * "garbage".len() as u64 / 4 + 2 * "still garbage".len() as u64 / 4);
    }
}
