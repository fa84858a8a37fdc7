use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::facilitator::ModeratorType;
use super::recommendation::Recommendation;
use super::result::SubProblemResult;

/// How strongly a vote round agreed. Derived from the spread of
/// `Recommendation::confidence` values, not a raw vote count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsensusLevel {
    Strong,
    Moderate,
    Weak,
}

/// One entry in a session's published event stream. `sub_problem_index`
/// is `None` for session-wide events (start, meta-synthesis, completion).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    pub event_type: String,
    pub session_id: String,
    pub sub_problem_index: Option<usize>,
    pub timestamp: DateTime<Utc>,
    pub data: EventData,
}

impl Event {
    pub fn new(session_id: impl Into<String>, sub_problem_index: Option<usize>, data: EventData) -> Self {
        Self {
            event_type: data.type_name().to_string(),
            session_id: session_id.into(),
            sub_problem_index,
            timestamp: Utc::now(),
            data,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum EventData {
    SessionStarted {
        problem_description: String,
    },
    DecompositionStarted,
    DecompositionComplete {
        sub_problem_count: usize,
    },
    SubproblemStarted {
        sub_problem_id: String,
        goal: String,
    },
    PersonaSelectionStarted,
    PersonaSelected {
        code: String,
        name: String,
        expertise: Vec<String>,
        rationale: String,
        order: usize,
    },
    PersonaSelectionComplete {
        personas: Vec<String>,
    },
    RoundStarted {
        round_number: u8,
        experts: Vec<String>,
    },
    ContributionStarted {
        persona_code: String,
        round_number: u8,
    },
    Contribution {
        persona_code: String,
        round_number: u8,
        content: String,
    },
    FacilitatorDecision {
        action: String,
        reasoning: String,
    },
    ModeratorIntervention {
        moderator_type: ModeratorType,
        content: String,
    },
    Convergence {
        round: u8,
        semantic_score: f32,
        novelty_score: f32,
        should_stop: bool,
    },
    ClarificationRequested {
        question_id: String,
        question: String,
    },
    ClarificationAnswered {
        question_id: String,
        answer: String,
    },
    VotingStarted,
    PersonaVote {
        persona_code: String,
        recommendation: String,
        confidence: f32,
        reasoning: String,
        conditions: Vec<String>,
    },
    VotingComplete {
        consensus_level: ConsensusLevel,
    },
    SynthesisStarted,
    SynthesisComplete {
        synthesis: String,
    },
    SubproblemComplete {
        result: SubProblemResult,
    },
    SubproblemFailed {
        sub_problem_id: String,
        error: String,
    },
    MetaSynthesisStarted,
    MetaSynthesisComplete {
        synthesis: String,
    },
    PhaseCostBreakdown {
        phase_costs: std::collections::HashMap<String, f64>,
        total_cost: f64,
    },
    Complete {
        total_cost_usd: f64,
        duration_seconds: f64,
    },
    Error {
        message: String,
        recoverable: bool,
    },
}

impl EventData {
    pub fn type_name(&self) -> &'static str {
        match self {
            EventData::SessionStarted { .. } => "session_started",
            EventData::DecompositionStarted => "decomposition_started",
            EventData::DecompositionComplete { .. } => "decomposition_complete",
            EventData::SubproblemStarted { .. } => "subproblem_started",
            EventData::PersonaSelectionStarted => "persona_selection_started",
            EventData::PersonaSelected { .. } => "persona_selected",
            EventData::PersonaSelectionComplete { .. } => "persona_selection_complete",
            EventData::RoundStarted { .. } => "round_started",
            EventData::ContributionStarted { .. } => "contribution_started",
            EventData::Contribution { .. } => "contribution",
            EventData::FacilitatorDecision { .. } => "facilitator_decision",
            EventData::ModeratorIntervention { .. } => "moderator_intervention",
            EventData::Convergence { .. } => "convergence",
            EventData::ClarificationRequested { .. } => "clarification_requested",
            EventData::ClarificationAnswered { .. } => "clarification_answered",
            EventData::VotingStarted => "voting_started",
            EventData::PersonaVote { .. } => "persona_vote",
            EventData::VotingComplete { .. } => "voting_complete",
            EventData::SynthesisStarted => "synthesis_started",
            EventData::SynthesisComplete { .. } => "synthesis_complete",
            EventData::SubproblemComplete { .. } => "subproblem_complete",
            EventData::SubproblemFailed { .. } => "subproblem_failed",
            EventData::MetaSynthesisStarted => "meta_synthesis_started",
            EventData::MetaSynthesisComplete { .. } => "meta_synthesis_complete",
            EventData::PhaseCostBreakdown { .. } => "phase_cost_breakdown",
            EventData::Complete { .. } => "complete",
            EventData::Error { .. } => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_name_matches_variant() {
        let ev = Event::new("s1", None, EventData::VotingStarted);
        assert_eq!(ev.event_type, "voting_started");
    }
}
