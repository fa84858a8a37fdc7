use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::{extract_json_object, Agent, AgentContext, CostPhase};
use crate::broker::{BrokerRequest, BrokerResponse, LLMBroker, ModelTier};
use crate::domain::SubProblemResult;
use crate::error::EngineError;

const SYSTEM_PROMPT: &str = "You are the meta-synthesis agent. Integrate the results of every \
sub-problem's discussion into one unified report: reconcile any contradictions between \
sub-problems, make dependency relationships explicit, and produce a prioritized action list. \
Respond with a single JSON object: {\"unified_summary\": \"...\", \"reconciled_contradictions\": \
[\"...\"], \"action_items\": [\"...\"]}.";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetaSynthesisReport {
    pub unified_summary: String,
    pub reconciled_contradictions: Vec<String>,
    pub action_items: Vec<String>,
}

impl MetaSynthesisReport {
    fn fallback(results: &[SubProblemResult]) -> Self {
        Self {
            unified_summary: results
                .iter()
                .filter(|r| !r.failed)
                .map(|r| format!("{}: {}", r.goal, r.synthesis))
                .collect::<Vec<_>>()
                .join("\n\n"),
            reconciled_contradictions: Vec::new(),
            action_items: results
                .iter()
                .filter(|r| !r.failed)
                .flat_map(|r| r.recommendations.iter().map(|rec| rec.text.clone()))
                .collect(),
        }
    }
}

pub struct MetaSynthesizer {
    broker: Arc<dyn LLMBroker>,
}

impl MetaSynthesizer {
    pub fn new(broker: Arc<dyn LLMBroker>) -> Self {
        Self { broker }
    }
}

#[async_trait]
impl Agent for MetaSynthesizer {
    type Input = Vec<SubProblemResult>;
    type Output = MetaSynthesisReport;

    async fn run(&self, input: Self::Input, _ctx: &AgentContext) -> Result<(Self::Output, BrokerResponse), EngineError> {
        let body = input
            .iter()
            .map(|r| {
                if r.failed {
                    format!("sub-problem {} FAILED: {}", r.sub_problem_id, r.error.as_deref().unwrap_or("unknown error"))
                } else {
                    format!("sub-problem {} ({}):\n{}", r.sub_problem_id, r.goal, r.synthesis)
                }
            })
            .collect::<Vec<_>>()
            .join("\n\n");

        let request = BrokerRequest::new(body, ModelTier::Deep).with_system(SYSTEM_PROMPT);
        let response = self.broker.call(request).await?;

        let report = extract_json_object(&response.text)
            .and_then(|v| serde_json::from_value::<MetaSynthesisReport>(v).ok())
            .unwrap_or_else(|| MetaSynthesisReport::fallback(&input));

        Ok((report, response))
    }

    fn phase(&self) -> CostPhase {
        CostPhase::MetaSynthesis
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn falls_back_to_concatenated_syntheses() {
        let broker = Arc::new(crate::broker::MockBroker::new());
        broker.push_response("not json").await;
        let agent = MetaSynthesizer::new(broker);
        let ctx = AgentContext::new(Arc::new(crate::config::EngineConfig::default()), 0);
        let results = vec![
            SubProblemResult::success("sp0", "market", "raise prices"),
            SubProblemResult::failure("sp1", "ops", "broker timeout"),
        ];
        let (report, _) = agent.run(results, &ctx).await.unwrap();
        assert!(report.unified_summary.contains("raise prices"));
        assert!(!report.unified_summary.contains("broker timeout"));
    }
}
