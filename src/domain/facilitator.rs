use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FacilitatorAction {
    Continue,
    Moderator,
    Vote,
    Clarify,
    Research,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModeratorType {
    Contrarian,
    Skeptic,
    Optimist,
}

/// The facilitator's decision for the next discussion transition.
///
/// Invariant: `next_speaker` is `Some` iff `action == Continue`;
/// `question` is `Some` iff `action == Clarify`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FacilitatorDecision {
    pub action: FacilitatorAction,
    pub reasoning: String,
    pub next_speaker: Option<String>,
    pub moderator_type: Option<ModeratorType>,
    pub question: Option<String>,
}

impl FacilitatorDecision {
    pub fn continue_with(next_speaker: impl Into<String>, reasoning: impl Into<String>) -> Self {
        Self {
            action: FacilitatorAction::Continue,
            reasoning: reasoning.into(),
            next_speaker: Some(next_speaker.into()),
            moderator_type: None,
            question: None,
        }
    }

    pub fn vote(reasoning: impl Into<String>) -> Self {
        Self {
            action: FacilitatorAction::Vote,
            reasoning: reasoning.into(),
            next_speaker: None,
            moderator_type: None,
            question: None,
        }
    }

    /// True if next_speaker/question are present exactly when the action requires them.
    pub fn is_well_formed(&self) -> bool {
        match self.action {
            FacilitatorAction::Continue => self.next_speaker.is_some(),
            FacilitatorAction::Clarify => self.question.is_some(),
            _ => true,
        }
    }
}
