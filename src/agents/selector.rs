use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

use super::{extract_json_object, Agent, AgentContext, CostPhase};
use crate::broker::{BrokerRequest, BrokerResponse, LLMBroker, ModelTier};
use crate::domain::{PersonaProfile, SubProblem};
use crate::error::EngineError;
use crate::personas::PersonaLibrary;

const SYSTEM_PROMPT: &str = "You are the persona selection agent. Given a sub-problem and a list \
of candidate expert codes, choose an ordered panel and give a one-sentence rationale for each. \
Respond with a single JSON object: {\"selections\": [{\"code\": \"...\", \"rationale\": \"...\"}]}.";

#[derive(Clone, Debug, PartialEq)]
pub struct SelectedPersona {
    pub profile: PersonaProfile,
    pub rationale: String,
}

#[derive(Deserialize)]
struct SelectionEntry {
    code: String,
    rationale: String,
}

#[derive(Deserialize)]
struct SelectionPayload {
    selections: Vec<SelectionEntry>,
}

pub struct Selector {
    broker: Arc<dyn LLMBroker>,
    library: Arc<PersonaLibrary>,
}

impl Selector {
    pub fn new(broker: Arc<dyn LLMBroker>, library: Arc<PersonaLibrary>) -> Self {
        Self { broker, library }
    }

    fn parse(&self, text: &str, candidates: &[&'static PersonaProfile], count: usize) -> Vec<SelectedPersona> {
        if let Some(value) = extract_json_object(text) {
            if let Ok(payload) = serde_json::from_value::<SelectionPayload>(value) {
                let mut picked = Vec::new();
                for entry in payload.selections {
                    if let Some(profile) = candidates.iter().find(|p| p.code == entry.code) {
                        picked.push(SelectedPersona { profile: (*profile).clone(), rationale: entry.rationale });
                    }
                    if picked.len() >= count {
                        break;
                    }
                }
                if picked.len() >= count.min(candidates.len()).max(1) {
                    return picked;
                }
            }
        }
        candidates
            .iter()
            .take(count)
            .map(|p| SelectedPersona {
                profile: (*p).clone(),
                rationale: "selected by expertise match (fallback: unparsable selector output)".to_string(),
            })
            .collect()
    }
}

#[async_trait]
impl Agent for Selector {
    type Input = (SubProblem, usize);
    type Output = Vec<SelectedPersona>;

    async fn run(&self, input: Self::Input, _ctx: &AgentContext) -> Result<(Self::Output, BrokerResponse), EngineError> {
        let (sub_problem, count) = input;
        let count = count.clamp(3, 5);
        let tags = sub_problem
            .focus
            .as_ref()
            .map(|f| f.required_expertise.clone())
            .unwrap_or_default();
        let candidates = self.library.by_expertise(&tags);
        let candidates: Vec<&'static PersonaProfile> = if candidates.len() >= count {
            candidates
        } else {
            self.library.all().iter().collect()
        };

        let candidate_list = candidates
            .iter()
            .map(|p| format!("{}: {} ({})", p.code, p.display_name, p.domain_expertise.join(", ")))
            .collect::<Vec<_>>()
            .join("\n");
        let user_prompt = format!(
            "Sub-problem goal: {}\nRequired expertise: {}\nCandidates:\n{}\nSelect exactly {} personas.",
            sub_problem.goal,
            tags.join(", "),
            candidate_list,
            count
        );

        let request = BrokerRequest::new(user_prompt, ModelTier::Fast).with_system(SYSTEM_PROMPT);
        let response = self.broker.call(request).await?;
        let selected = self.parse(&response.text, &candidates, count);
        Ok((selected, response))
    }

    fn phase(&self) -> CostPhase {
        CostPhase::PersonaSelection
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MockBroker;

    #[tokio::test]
    async fn selection_respects_requested_count() {
        let broker = Arc::new(MockBroker::new());
        broker.push_response(r#"{"selections": [
            {"code": "cfo_advisor", "rationale": "finance lens"},
            {"code": "pricing_strategist", "rationale": "pricing lens"},
            {"code": "market_researcher", "rationale": "demand evidence"}
        ]}"#).await;
        let selector = Selector::new(broker, Arc::new(PersonaLibrary::new()));
        let ctx = AgentContext::new(Arc::new(crate::config::EngineConfig::default()), 0);
        let mut sp = SubProblem::new("sp0", "Should we raise prices?", "r");
        sp.focus = Some(crate::domain::Focus { required_expertise: vec!["pricing strategy".into()], ..Default::default() });
        let (selected, _) = selector.run((sp, 3), &ctx).await.unwrap();
        assert_eq!(selected.len(), 3);
    }

    #[tokio::test]
    async fn malformed_output_falls_back_to_top_candidates() {
        let broker = Arc::new(MockBroker::new());
        broker.push_response("not json").await;
        let selector = Selector::new(broker, Arc::new(PersonaLibrary::new()));
        let ctx = AgentContext::new(Arc::new(crate::config::EngineConfig::default()), 0);
        let sp = SubProblem::new("sp0", "goal", "r");
        let (selected, _) = selector.run((sp, 4), &ctx).await.unwrap();
        assert_eq!(selected.len(), 4);
    }
}
