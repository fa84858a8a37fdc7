use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::recommendation::Recommendation;

/// Cost/round accounting for a single sub-problem's discussion, folded
/// into the session-level `Metrics` once the sub-problem completes.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PhaseMetrics {
    pub rounds_used: u8,
    pub contribution_count: u32,
    pub cost_usd: f64,
    pub tokens_used: u64,
}

/// The terminal output of one sub-problem's discussion subgraph.
///
/// `expert_summaries` is capped per entry so that carrying a persona's
/// memory forward into later sub-problems stays cheap; callers that need
/// the full discussion should read `SessionState::contributions` instead.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubProblemResult {
    pub sub_problem_id: String,
    pub goal: String,
    pub synthesis: String,
    pub recommendations: Vec<Recommendation>,
    pub contribution_count: u32,
    pub expert_panel: Vec<String>,
    pub expert_summaries: HashMap<String, String>,
    pub metrics: PhaseMetrics,
    pub failed: bool,
    pub error: Option<String>,
}

impl SubProblemResult {
    pub fn success(
        sub_problem_id: impl Into<String>,
        goal: impl Into<String>,
        synthesis: impl Into<String>,
    ) -> Self {
        Self {
            sub_problem_id: sub_problem_id.into(),
            goal: goal.into(),
            synthesis: synthesis.into(),
            recommendations: Vec::new(),
            contribution_count: 0,
            expert_panel: Vec::new(),
            expert_summaries: HashMap::new(),
            metrics: PhaseMetrics::default(),
            failed: false,
            error: None,
        }
    }

    pub fn failure(sub_problem_id: impl Into<String>, goal: impl Into<String>, error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            sub_problem_id: sub_problem_id.into(),
            goal: goal.into(),
            synthesis: format!("[FAILED: {error}]"),
            recommendations: Vec::new(),
            contribution_count: 0,
            expert_panel: Vec::new(),
            expert_summaries: HashMap::new(),
            metrics: PhaseMetrics::default(),
            failed: true,
            error: Some(error),
        }
    }
}
