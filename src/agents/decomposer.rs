use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use super::{extract_json_object, Agent, AgentContext, CostPhase};
use crate::broker::{BrokerRequest, BrokerResponse, LLMBroker, ModelTier};
use crate::domain::{Problem, SubProblem};
use crate::error::EngineError;

const SYSTEM_PROMPT: &str = "You are the decomposition agent for an AI deliberation engine. \
Break the user's problem into 1-5 independent or dependent sub-problems, each a specific, \
answerable question. Respond with a single JSON object: \
{\"complexity\": 1-10, \"sub_problems\": [{\"id\": \"sp0\", \"goal\": \"...\", \"rationale\": \"...\", \
\"complexity_score\": 1-10, \"dependencies\": [\"sp_id\"], \"focus\": {\"key_questions\": [...], \
\"risks\": [...], \"alternatives\": [...], \"required_expertise\": [...], \"success_criteria\": [...]}}]}. \
Sub-problem ids must be unique and dependencies must reference only earlier sub-problem ids.";

#[derive(Deserialize)]
struct DecompositionPayload {
    complexity: Option<u8>,
    sub_problems: Vec<SubProblem>,
}

pub struct Decomposer {
    broker: Arc<dyn LLMBroker>,
}

impl Decomposer {
    pub fn new(broker: Arc<dyn LLMBroker>) -> Self {
        Self { broker }
    }

    fn parse(&self, text: &str, description: &str) -> Problem {
        if let Some(value) = extract_json_object(text) {
            if let Ok(payload) = serde_json::from_value::<DecompositionPayload>(value) {
                if !payload.sub_problems.is_empty() {
                    let mut problem = Problem::new(Uuid::new_v4().to_string(), description);
                    problem.complexity = payload.complexity;
                    problem.sub_problems = payload.sub_problems;
                    // Contract caps the panel at 5 sub-problems; a model that
                    // over-decomposes gets truncated rather than rejected.
                    problem.sub_problems.truncate(5);
                    if problem.validate().is_ok() {
                        return problem;
                    }
                }
            }
        }
        Self::single_subproblem_fallback(description)
    }

    fn single_subproblem_fallback(description: &str) -> Problem {
        let mut problem = Problem::new(Uuid::new_v4().to_string(), description);
        problem.sub_problems = vec![SubProblem::new("sp0", description, "atomic fallback: decomposition output could not be parsed")];
        problem.complexity = Some(3);
        problem
    }
}

#[async_trait]
impl Agent for Decomposer {
    type Input = (String, Option<String>);
    type Output = Problem;

    async fn run(&self, input: Self::Input, _ctx: &AgentContext) -> Result<(Self::Output, BrokerResponse), EngineError> {
        let (description, context) = input;
        let mut user_prompt = format!("Problem: {description}");
        if let Some(context) = &context {
            user_prompt.push_str(&format!("\n\nAdditional context: {context}"));
        }

        let request = BrokerRequest::new(user_prompt, ModelTier::Balanced).with_system(SYSTEM_PROMPT);
        let response = self.broker.call(request).await?;
        let problem = self.parse(&response.text, &description);
        Ok((problem, response))
    }

    fn phase(&self) -> CostPhase {
        CostPhase::Decomposition
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MockBroker;

    #[tokio::test]
    async fn parses_well_formed_decomposition() {
        let broker = Arc::new(MockBroker::new());
        broker
            .push_response(
                r#"{"complexity": 6, "sub_problems": [
                    {"id": "sp0", "goal": "assess market", "rationale": "needed first", "complexity_score": 5, "dependencies": [], "focus": null},
                    {"id": "sp1", "goal": "set pricing", "rationale": "depends on market", "complexity_score": 4, "dependencies": ["sp0"], "focus": null}
                ]}"#,
            )
            .await;
        let decomposer = Decomposer::new(broker);
        let ctx = AgentContext::new(Arc::new(crate::config::EngineConfig::default()), 0);
        let (problem, _) = decomposer.run(("Should we raise prices?".into(), None), &ctx).await.unwrap();
        assert_eq!(problem.sub_problems.len(), 2);
        assert_eq!(problem.complexity, Some(6));
    }

    #[tokio::test]
    async fn malformed_output_falls_back_to_single_subproblem() {
        let broker = Arc::new(MockBroker::new());
        broker.push_response("not json at all").await;
        let decomposer = Decomposer::new(broker);
        let ctx = AgentContext::new(Arc::new(crate::config::EngineConfig::default()), 0);
        let (problem, _) = decomposer.run(("A hard question".into(), None), &ctx).await.unwrap();
        assert_eq!(problem.sub_problems.len(), 1);
        assert_eq!(problem.sub_problems[0].id, "sp0");
    }

    #[tokio::test]
    async fn cyclic_decomposition_falls_back() {
        let broker = Arc::new(MockBroker::new());
        broker
            .push_response(
                r#"{"sub_problems": [
                    {"id": "sp0", "goal": "a", "rationale": "r", "complexity_score": 3, "dependencies": ["sp1"], "focus": null},
                    {"id": "sp1", "goal": "b", "rationale": "r", "complexity_score": 3, "dependencies": ["sp0"], "focus": null}
                ]}"#,
            )
            .await;
        let decomposer = Decomposer::new(broker);
        let ctx = AgentContext::new(Arc::new(crate::config::EngineConfig::default()), 0);
        let (problem, _) = decomposer.run(("cyclic".into(), None), &ctx).await.unwrap();
        assert_eq!(problem.sub_problems.len(), 1);
    }
}
