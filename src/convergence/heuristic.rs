const AGREEMENT_MARKERS: &[&str] = &[
    "agree", "concur", "aligned", "consensus", "on board", "same conclusion", "no further concerns",
];

/// Keyword-counting fallback used only when the embedding service is
/// unavailable. Cruder than cosine similarity but keeps the detector
/// functional rather than stalling the session indefinitely.
#[derive(Debug, Default)]
pub struct AgreementHeuristic;

impl AgreementHeuristic {
    pub fn new() -> Self {
        Self
    }

    /// Returns `(semantic_score, novelty_score)` derived from the fraction
    /// of window messages containing an agreement marker.
    pub fn score(&self, window_texts: &[String]) -> (f32, f32) {
        if window_texts.is_empty() {
            return (0.0, 1.0);
        }
        let agreeing = window_texts
            .iter()
            .filter(|t| {
                let lower = t.to_lowercase();
                AGREEMENT_MARKERS.iter().any(|m| lower.contains(m))
            })
            .count();
        let semantic_score = agreeing as f32 / window_texts.len() as f32;
        let latest_agrees = window_texts
            .last()
            .map(|t| {
                let lower = t.to_lowercase();
                AGREEMENT_MARKERS.iter().any(|m| lower.contains(m))
            })
            .unwrap_or(false);
        let novelty_score = if latest_agrees { 0.2 } else { 0.8 };
        (semantic_score, novelty_score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_agreement_markers_yield_high_semantic_score() {
        let heuristic = AgreementHeuristic::new();
        let texts = vec!["I agree with this".to_string(), "We have consensus here".to_string()];
        let (semantic, _) = heuristic.score(&texts);
        assert_eq!(semantic, 1.0);
    }

    #[test]
    fn no_markers_yield_zero_semantic_score() {
        let heuristic = AgreementHeuristic::new();
        let texts = vec!["Let's explore another angle".to_string()];
        let (semantic, novelty) = heuristic.score(&texts);
        assert_eq!(semantic, 0.0);
        assert_eq!(novelty, 0.8);
    }
}
