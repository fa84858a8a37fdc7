use async_trait::async_trait;
use std::sync::Arc;

use super::{Agent, AgentContext, CostPhase};
use crate::broker::{BrokerRequest, BrokerResponse, LLMBroker, ModelTier};
use crate::domain::ContributionMessage;
use crate::error::EngineError;

const SYSTEM_PROMPT: &str = "Summarize this expert's contributions to the discussion in 75 tokens \
or fewer. Capture their position and reasoning, not the discussion's back-and-forth.";

/// Roughly 4 characters per token for English prose; used only to trim an
/// over-long model response defensively, not to produce the summary.
const APPROX_CHARS_PER_TOKEN: usize = 4;
const TOKEN_BUDGET: usize = 75;

pub struct Summarizer {
    broker: Arc<dyn LLMBroker>,
}

impl Summarizer {
    pub fn new(broker: Arc<dyn LLMBroker>) -> Self {
        Self { broker }
    }

    fn enforce_budget(text: &str) -> String {
        let max_chars = TOKEN_BUDGET * APPROX_CHARS_PER_TOKEN;
        if text.len() <= max_chars {
            return text.to_string();
        }
        let mut end = max_chars;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &text[..end])
    }
}

#[async_trait]
impl Agent for Summarizer {
    type Input = (String, Vec<ContributionMessage>);
    type Output = String;

    async fn run(&self, input: Self::Input, _ctx: &AgentContext) -> Result<(Self::Output, BrokerResponse), EngineError> {
        let (persona_code, contributions) = input;
        let body = contributions.iter().map(|c| c.content.as_str()).collect::<Vec<_>>().join("\n---\n");
        let user_prompt = format!("Expert: {persona_code}\nContributions:\n{body}");
        let request = BrokerRequest::new(user_prompt, ModelTier::Fast).with_system(SYSTEM_PROMPT);
        let response = self.broker.call(request).await?;
        let summary = Self::enforce_budget(&response.text);
        Ok((summary, response))
    }

    fn phase(&self) -> CostPhase {
        CostPhase::Discussion
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MockBroker;
    use crate::domain::Phase;

    #[tokio::test]
    async fn over_long_response_is_trimmed_to_budget() {
        let broker = Arc::new(MockBroker::new());
        broker.push_response("x".repeat(1000)).await;
        let summarizer = Summarizer::new(broker);
        let ctx = AgentContext::new(Arc::new(crate::config::EngineConfig::default()), 1);
        let contributions = vec![ContributionMessage::new("cfo_advisor", 1, "content", Phase::Exploration)];
        let (summary, _) = summarizer.run(("cfo_advisor".into(), contributions), &ctx).await.unwrap();
        assert!(summary.len() <= TOKEN_BUDGET * APPROX_CHARS_PER_TOKEN + 3);
    }
}
