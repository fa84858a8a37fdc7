use serde::{Deserialize, Serialize};

/// A free-form decision suggestion from a persona. Not a vote — there is
/// no tally. `confidence` is the persona's own self-reported certainty.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Recommendation {
    pub persona_code: String,
    pub text: String,
    pub confidence: f32,
    pub reasoning: String,
    pub conditions: Vec<String>,
}

impl Recommendation {
    pub fn new(persona_code: impl Into<String>, text: impl Into<String>, confidence: f32) -> Self {
        Self {
            persona_code: persona_code.into(),
            text: text.into(),
            confidence: confidence.clamp(0.0, 1.0),
            reasoning: String::new(),
            conditions: Vec::new(),
        }
    }
}
