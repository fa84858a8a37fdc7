use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

use super::{extract_json_object, Agent, AgentContext, CostPhase};
use crate::broker::{BrokerRequest, BrokerResponse, LLMBroker, ModelTier};
use crate::domain::{ContributionMessage, FacilitatorAction, FacilitatorDecision, Focus, ModeratorType};
use crate::error::EngineError;

const SYSTEM_PROMPT: &str = "You are the facilitator of an expert panel discussion. Decide the \
next transition: continue (another persona speaks), moderator (inject a contrarian/skeptic/\
optimist challenge), vote (move to recommendation collection), clarify (ask the user a \
question), or research (request more evidence before continuing). Do not choose vote before \
round 3 or before every persona has spoken at least once, unless told a deadlock or cost cap was \
detected. Prefer the persona with the fewest contributions so far, and avoid picking whoever \
spoke last if an alternative exists. Respond with a single JSON object: {\"action\": \"continue\"\
|\"moderator\"|\"vote\"|\"clarify\"|\"research\", \"reasoning\": \"...\", \"next_speaker\": \"...\
\"?, \"moderator_type\": \"contrarian\"|\"skeptic\"|\"optimist\"?, \"question\": \"...\"?}.";

pub struct FacilitatorInput {
    pub contributions: Vec<ContributionMessage>,
    pub round_number: u8,
    pub round_summaries: Vec<String>,
    pub focus: Option<Focus>,
    pub contribution_counts: HashMap<String, usize>,
    pub last_speakers: Vec<String>,
    pub deadlock_detected: bool,
    pub cost_breach: bool,
    pub drift_detected: bool,
}

#[derive(Deserialize)]
struct RawDecision {
    action: String,
    reasoning: String,
    next_speaker: Option<String>,
    moderator_type: Option<String>,
    question: Option<String>,
}

pub struct FacilitatorAgent {
    broker: Arc<dyn LLMBroker>,
}

impl FacilitatorAgent {
    pub fn new(broker: Arc<dyn LLMBroker>) -> Self {
        Self { broker }
    }

    fn lowest_count_speaker(counts: &HashMap<String, usize>, avoid: Option<&str>) -> Option<String> {
        let mut candidates: Vec<(&String, &usize)> = counts.iter().collect();
        candidates.sort_by_key(|(code, count)| (**count, (*code).clone()));
        candidates
            .iter()
            .find(|(code, _)| Some(code.as_str()) != avoid)
            .or_else(|| candidates.first())
            .map(|(code, _)| (*code).clone())
    }

    fn parse(&self, text: &str, input: &FacilitatorInput) -> FacilitatorDecision {
        let parsed = extract_json_object(text).and_then(|v| serde_json::from_value::<RawDecision>(v).ok());

        let mut decision = match parsed {
            Some(raw) => {
                let action = match raw.action.to_lowercase().as_str() {
                    "moderator" => FacilitatorAction::Moderator,
                    "vote" => FacilitatorAction::Vote,
                    "clarify" => FacilitatorAction::Clarify,
                    "research" => FacilitatorAction::Research,
                    _ => FacilitatorAction::Continue,
                };
                let moderator_type = raw.moderator_type.as_deref().and_then(|s| match s.to_lowercase().as_str() {
                    "contrarian" => Some(ModeratorType::Contrarian),
                    "skeptic" => Some(ModeratorType::Skeptic),
                    "optimist" => Some(ModeratorType::Optimist),
                    _ => None,
                });
                FacilitatorDecision {
                    action,
                    reasoning: raw.reasoning,
                    next_speaker: raw.next_speaker,
                    moderator_type,
                    question: raw.question,
                }
            }
            None => {
                let last = input.last_speakers.last().map(|s| s.as_str());
                FacilitatorDecision::continue_with(
                    Self::lowest_count_speaker(&input.contribution_counts, last).unwrap_or_default(),
                    "unparsable facilitator output: defaulting to rotation",
                )
            }
        };

        self.enforce_guardrails(&mut decision, input);
        decision
    }

    /// Prompt-level guardrails, enforced again here so a misbehaving model
    /// can never violate them: no vote before round 3 or before every
    /// persona has spoken (unless a deadlock or cost cap forces it), and
    /// no consecutive repeat speaker when a lower-count alternative exists.
    fn enforce_guardrails(&self, decision: &mut FacilitatorDecision, input: &FacilitatorInput) {
        if input.drift_detected {
            let last = input.last_speakers.last().map(|s| s.as_str());
            *decision = FacilitatorDecision::continue_with(
                Self::lowest_count_speaker(&input.contribution_counts, last).unwrap_or_default(),
                "discussion drifted from the sub-problem goal for two consecutive contributions: redirecting with a goal reminder",
            );
            return;
        }

        let everyone_spoken = input.contribution_counts.values().all(|&c| c > 0);
        let vote_allowed = input.round_number >= 3 && everyone_spoken || input.deadlock_detected || input.cost_breach;

        if decision.action == FacilitatorAction::Vote && !vote_allowed {
            let last = input.last_speakers.last().map(|s| s.as_str());
            *decision = FacilitatorDecision::continue_with(
                Self::lowest_count_speaker(&input.contribution_counts, last).unwrap_or_default(),
                "vote requested too early: rotating instead",
            );
        }

        if decision.action == FacilitatorAction::Continue {
            let last = input.last_speakers.last().map(|s| s.as_str());
            let repeats_last = decision.next_speaker.as_deref() == last;
            let has_alternative = input.contribution_counts.keys().any(|k| Some(k.as_str()) != last);
            if decision.next_speaker.is_none() || (repeats_last && has_alternative) {
                decision.next_speaker = Self::lowest_count_speaker(&input.contribution_counts, last);
            }
        }
    }
}

#[async_trait]
impl Agent for FacilitatorAgent {
    type Input = FacilitatorInput;
    type Output = FacilitatorDecision;

    async fn run(&self, input: Self::Input, _ctx: &AgentContext) -> Result<(Self::Output, BrokerResponse), EngineError> {
        let contributions_text = input
            .contributions
            .iter()
            .map(|c| format!("[{}] {}: {}", c.round_number, c.persona_code, c.content))
            .collect::<Vec<_>>()
            .join("\n");
        let counts_text = input
            .contribution_counts
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(", ");
        let user_prompt = format!(
            "Round: {}\nContribution counts: {}\nLast speakers: {}\nDeadlock detected: {}\nCost breach: {}\nDrift detected: {}\nRecent contributions:\n{}",
            input.round_number,
            counts_text,
            input.last_speakers.join(", "),
            input.deadlock_detected,
            input.cost_breach,
            input.drift_detected,
            contributions_text
        );

        let request = BrokerRequest::new(user_prompt, ModelTier::Fast).with_system(SYSTEM_PROMPT);
        let response = self.broker.call(request).await?;
        let decision = self.parse(&response.text, &input);
        Ok((decision, response))
    }

    fn phase(&self) -> CostPhase {
        CostPhase::Discussion
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MockBroker;

    fn counts(pairs: &[(&str, usize)]) -> HashMap<String, usize> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[tokio::test]
    async fn early_vote_request_is_overridden_to_continue() {
        let broker = Arc::new(MockBroker::new());
        broker.push_response(r#"{"action": "vote", "reasoning": "seems settled"}"#).await;
        let agent = FacilitatorAgent::new(broker);
        let ctx = AgentContext::new(Arc::new(crate::config::EngineConfig::default()), 1);
        let input = FacilitatorInput {
            contributions: Vec::new(),
            round_number: 1,
            round_summaries: Vec::new(),
            focus: None,
            contribution_counts: counts(&[("a", 1), ("b", 0)]),
            last_speakers: vec!["a".into()],
            deadlock_detected: false,
            cost_breach: false,
            drift_detected: false,
        };
        let (decision, _) = agent.run(input, &ctx).await.unwrap();
        assert_eq!(decision.action, FacilitatorAction::Continue);
        assert_eq!(decision.next_speaker.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn cost_breach_allows_early_vote() {
        let broker = Arc::new(MockBroker::new());
        broker.push_response(r#"{"action": "vote", "reasoning": "budget exhausted"}"#).await;
        let agent = FacilitatorAgent::new(broker);
        let ctx = AgentContext::new(Arc::new(crate::config::EngineConfig::default()), 1);
        let input = FacilitatorInput {
            contributions: Vec::new(),
            round_number: 1,
            round_summaries: Vec::new(),
            focus: None,
            contribution_counts: counts(&[("a", 1), ("b", 0)]),
            last_speakers: vec!["a".into()],
            deadlock_detected: false,
            cost_breach: true,
            drift_detected: false,
        };
        let (decision, _) = agent.run(input, &ctx).await.unwrap();
        assert_eq!(decision.action, FacilitatorAction::Vote);
    }

    #[tokio::test]
    async fn consecutive_repeat_is_rerouted_when_alternative_exists() {
        let broker = Arc::new(MockBroker::new());
        broker.push_response(r#"{"action": "continue", "reasoning": "keep going", "next_speaker": "a"}"#).await;
        let agent = FacilitatorAgent::new(broker);
        let ctx = AgentContext::new(Arc::new(crate::config::EngineConfig::default()), 2);
        let input = FacilitatorInput {
            contributions: Vec::new(),
            round_number: 2,
            round_summaries: Vec::new(),
            focus: None,
            contribution_counts: counts(&[("a", 2), ("b", 1)]),
            last_speakers: vec!["a".into()],
            deadlock_detected: false,
            cost_breach: false,
            drift_detected: false,
        };
        let (decision, _) = agent.run(input, &ctx).await.unwrap();
        assert_eq!(decision.next_speaker.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn drift_forces_redirect_regardless_of_model_output() {
        let broker = Arc::new(MockBroker::new());
        broker.push_response(r#"{"action": "vote", "reasoning": "let's wrap up"}"#).await;
        let agent = FacilitatorAgent::new(broker);
        let ctx = AgentContext::new(Arc::new(crate::config::EngineConfig::default()), 2);
        let input = FacilitatorInput {
            contributions: Vec::new(),
            round_number: 2,
            round_summaries: Vec::new(),
            focus: None,
            contribution_counts: counts(&[("a", 2), ("b", 1)]),
            last_speakers: vec!["a".into()],
            deadlock_detected: false,
            cost_breach: false,
            drift_detected: true,
        };
        let (decision, _) = agent.run(input, &ctx).await.unwrap();
        assert_eq!(decision.action, FacilitatorAction::Continue);
        assert_eq!(decision.next_speaker.as_deref(), Some("b"));
    }
}
