use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::{extract_json_object, Agent, AgentContext, CostPhase};
use crate::broker::{BrokerRequest, BrokerResponse, LLMBroker, ModelTier};
use crate::domain::{ContributionMessage, Focus, Recommendation};
use crate::error::EngineError;

const SYSTEM_PROMPT: &str = "You are the synthesis agent. Produce a structured decision report \
for this sub-problem's discussion. You must explicitly address every key question, risk, and \
alternative listed in the focus. Respond with a single JSON object: {\"executive_summary\": \
\"...\", \"key_insights\": [\"...\"], \"recommendation\": \"...\", \"tradeoffs\": [\"...\"], \
\"conditions\": [\"...\"], \"confidence\": 0.0-1.0}.";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SynthesisReport {
    pub executive_summary: String,
    pub key_insights: Vec<String>,
    pub recommendation: String,
    pub tradeoffs: Vec<String>,
    pub conditions: Vec<String>,
    pub confidence: f32,
}

impl SynthesisReport {
    pub fn to_markdown(&self) -> String {
        format!(
            "## Executive Summary\n{}\n\n## Key Insights\n{}\n\n## Recommendation\n{}\n\n## Tradeoffs\n{}\n\n## Conditions\n{}\n\n## Confidence\n{:.2}",
            self.executive_summary,
            bullet_list(&self.key_insights),
            self.recommendation,
            bullet_list(&self.tradeoffs),
            bullet_list(&self.conditions),
            self.confidence
        )
    }

    fn fallback(contributions: &[ContributionMessage]) -> Self {
        let last = contributions.last().map(|c| c.content.clone()).unwrap_or_default();
        Self {
            executive_summary: "Synthesis output could not be parsed; falling back to the panel's final contribution.".to_string(),
            key_insights: Vec::new(),
            recommendation: last,
            tradeoffs: Vec::new(),
            conditions: Vec::new(),
            confidence: 0.3,
        }
    }
}

fn bullet_list(items: &[String]) -> String {
    if items.is_empty() {
        "(none)".to_string()
    } else {
        items.iter().map(|i| format!("- {i}")).collect::<Vec<_>>().join("\n")
    }
}

pub struct Synthesizer {
    broker: Arc<dyn LLMBroker>,
}

impl Synthesizer {
    pub fn new(broker: Arc<dyn LLMBroker>) -> Self {
        Self { broker }
    }
}

#[async_trait]
impl Agent for Synthesizer {
    type Input = (Vec<ContributionMessage>, Vec<Recommendation>, Option<Focus>);
    type Output = SynthesisReport;

    async fn run(&self, input: Self::Input, _ctx: &AgentContext) -> Result<(Self::Output, BrokerResponse), EngineError> {
        let (contributions, recommendations, focus) = input;
        let contributions_text = contributions
            .iter()
            .map(|c| format!("{}: {}", c.persona_code, c.content))
            .collect::<Vec<_>>()
            .join("\n");
        let recommendations_text = recommendations
            .iter()
            .map(|r| format!("{} (confidence {:.2}): {}", r.persona_code, r.confidence, r.text))
            .collect::<Vec<_>>()
            .join("\n");
        let focus_text = focus
            .as_ref()
            .map(|f| {
                format!(
                    "Key questions: {}\nRisks: {}\nAlternatives: {}",
                    f.key_questions.join("; "),
                    f.risks.join("; "),
                    f.alternatives.join("; ")
                )
            })
            .unwrap_or_default();
        let user_prompt = format!("Focus:\n{focus_text}\n\nContributions:\n{contributions_text}\n\nRecommendations:\n{recommendations_text}");

        let request = BrokerRequest::new(user_prompt, ModelTier::Deep).with_system(SYSTEM_PROMPT);
        let response = self.broker.call(request).await?;

        let report = extract_json_object(&response.text)
            .and_then(|v| serde_json::from_value::<SynthesisReport>(v).ok())
            .map(|mut r| {
                r.confidence = r.confidence.clamp(0.0, 1.0);
                r
            })
            .unwrap_or_else(|| SynthesisReport::fallback(&contributions));

        Ok((report, response))
    }

    fn phase(&self) -> CostPhase {
        CostPhase::Synthesis
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MockBroker;
    use crate::domain::Phase;

    #[tokio::test]
    async fn parses_well_formed_report() {
        let broker = Arc::new(MockBroker::new());
        broker
            .push_response(
                r#"{"executive_summary": "raise prices by 10%", "key_insights": ["demand is inelastic"],
                    "recommendation": "raise prices", "tradeoffs": ["risk of churn"], "conditions": ["monitor churn"],
                    "confidence": 0.8}"#,
            )
            .await;
        let synthesizer = Synthesizer::new(broker);
        let ctx = AgentContext::new(Arc::new(crate::config::EngineConfig::default()), 4);
        let contributions = vec![ContributionMessage::new("cfo_advisor", 1, "content", Phase::Exploration)];
        let (report, _) = synthesizer.run((contributions, Vec::new(), None), &ctx).await.unwrap();
        assert_eq!(report.recommendation, "raise prices");
        assert_eq!(report.confidence, 0.8);
    }

    #[tokio::test]
    async fn malformed_output_falls_back_to_last_contribution() {
        let broker = Arc::new(MockBroker::new());
        broker.push_response("not json").await;
        let synthesizer = Synthesizer::new(broker);
        let ctx = AgentContext::new(Arc::new(crate::config::EngineConfig::default()), 4);
        let contributions = vec![ContributionMessage::new("cfo_advisor", 1, "final position", Phase::Convergence)];
        let (report, _) = synthesizer.run((contributions, Vec::new(), None), &ctx).await.unwrap();
        assert_eq!(report.recommendation, "final position");
    }
}
