use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::contribution::ContributionMessage;
use super::persona::PersonaProfile;
use super::problem::Problem;
use super::recommendation::Recommendation;
use super::result::SubProblemResult;
use super::Metrics;

/// Precedence when more than one stop condition fires in the same round:
/// hard_cap > cost_exceeded > deadlock > max_rounds > consensus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    MaxRounds,
    HardCap,
    Consensus,
    CostExceeded,
    Deadlock,
    Drift,
}

/// A single convergence evaluation, produced after each contribution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConvergenceReading {
    pub round: u8,
    pub semantic_score: f32,
    pub novelty_score: f32,
    pub should_stop: bool,
    pub stop_reason: Option<StopReason>,
}

/// The discussion phase a sub-problem subgraph is currently in. Distinct
/// from `crate::domain::contribution::Phase`, which tags a single message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Decomposing,
    SelectingPersonas,
    InitialRound,
    Discussing,
    AwaitingClarification,
    Voting,
    Synthesizing,
    MetaSynthesizing,
    Complete,
    Failed,
    Paused,
}

/// The engine's working state for one session. Snapshotted after every
/// node transition. Owned exclusively by the session's coordinator;
/// the graph driver holds a mutable borrow only for the duration of one
/// node invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionState {
    pub session_id: String,
    pub problem: Problem,
    pub current_sub_problem: Option<usize>,
    pub sub_problem_index: usize,
    pub sub_problem_results: Vec<SubProblemResult>,
    pub personas: Vec<PersonaProfile>,
    pub contributions: Vec<ContributionMessage>,
    pub round_summaries: Vec<String>,
    pub round_number: u8,
    pub max_rounds: u8,
    pub phase: SessionPhase,
    pub facilitator_decision: Option<super::facilitator::FacilitatorDecision>,
    pub should_stop: bool,
    pub stop_reason: Option<StopReason>,
    pub votes: Vec<Recommendation>,
    pub synthesis: Option<String>,
    pub metrics: Metrics,
    pub expert_memory: HashMap<String, String>,
    pub pending_clarification: Option<PendingClarification>,
    pub business_context: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingClarification {
    pub question_id: String,
    pub question: String,
    pub reason: String,
}

impl SessionState {
    pub fn new(session_id: impl Into<String>, problem: Problem, max_rounds: u8) -> Self {
        Self {
            session_id: session_id.into(),
            problem,
            current_sub_problem: None,
            sub_problem_index: 0,
            sub_problem_results: Vec::new(),
            personas: Vec::new(),
            contributions: Vec::new(),
            round_summaries: Vec::new(),
            round_number: 0,
            max_rounds,
            phase: SessionPhase::Decomposing,
            facilitator_decision: None,
            should_stop: false,
            stop_reason: None,
            votes: Vec::new(),
            synthesis: None,
            metrics: Metrics::default(),
            expert_memory: HashMap::new(),
            pending_clarification: None,
            business_context: None,
        }
    }

    pub fn contributions_for(&self, persona_code: &str) -> Vec<&ContributionMessage> {
        self.contributions
            .iter()
            .filter(|c| c.persona_code == persona_code)
            .collect()
    }

    pub fn contribution_counts(&self) -> HashMap<String, usize> {
        let mut counts = HashMap::new();
        for c in &self.contributions {
            *counts.entry(c.persona_code.clone()).or_insert(0) += 1;
        }
        counts
    }

    pub fn last_n_speakers(&self, n: usize) -> Vec<String> {
        self.contributions
            .iter()
            .rev()
            .take(n)
            .map(|c| c.persona_code.clone())
            .collect()
    }

    /// Compact one-line-per-speaker digest of a single round's contributions,
    /// for the context composer's older-rounds fragment. `None` if the round
    /// produced no contributions (e.g. it was skipped entirely).
    pub fn summarize_round(&self, round_number: u8) -> Option<String> {
        let lines: Vec<String> = self
            .contributions
            .iter()
            .filter(|c| c.round_number == round_number)
            .map(|c| {
                let snippet: String = c.content.chars().take(140).collect();
                format!("{}: {snippet}", c.persona_code)
            })
            .collect();
        if lines.is_empty() {
            None
        } else {
            Some(lines.join(" | "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contribution_counts_tracks_per_persona() {
        let mut state = SessionState::new("s1", Problem::new("p1", "d"), 5);
        state.contributions.push(ContributionMessage::new("a", 1, "x", super::super::contribution::Phase::Exploration));
        state.contributions.push(ContributionMessage::new("a", 1, "y", super::super::contribution::Phase::Exploration));
        state.contributions.push(ContributionMessage::new("b", 1, "z", super::super::contribution::Phase::Exploration));
        let counts = state.contribution_counts();
        assert_eq!(counts["a"], 2);
        assert_eq!(counts["b"], 1);
    }
}
