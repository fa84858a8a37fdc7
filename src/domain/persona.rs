use serde::{Deserialize, Serialize};

/// A fixed expert profile drawn from the static catalog (`crate::personas`).
/// Read-only; identity is `code`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PersonaProfile {
    pub code: String,
    pub display_name: String,
    pub domain_expertise: Vec<String>,
    pub system_prompt: String,
    pub archetype: Option<String>,
}

impl PersonaProfile {
    pub fn matches_any(&self, tags: &[String]) -> bool {
        tags.iter().any(|t| {
            self.domain_expertise
                .iter()
                .any(|e| e.eq_ignore_ascii_case(t))
        })
    }
}
