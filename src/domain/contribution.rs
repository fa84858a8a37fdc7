use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The phase a contribution was produced in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Exploration,
    Challenge,
    Convergence,
}

/// A single turn from a persona during discussion. Append-only; ordered
/// by insertion in `SessionState::contributions`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContributionMessage {
    pub persona_code: String,
    pub round_number: u8,
    pub content: String,
    pub phase: Phase,
    pub timestamp: DateTime<Utc>,
}

impl ContributionMessage {
    pub fn new(persona_code: impl Into<String>, round_number: u8, content: impl Into<String>, phase: Phase) -> Self {
        Self {
            persona_code: persona_code.into(),
            round_number,
            content: content.into(),
            phase,
            timestamp: Utc::now(),
        }
    }
}
