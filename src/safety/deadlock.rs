use crate::domain::ContributionMessage;
use crate::embedding::cosine_similarity;

const WINDOW: usize = 6;
const REPETITION_SIMILARITY_FLOOR: f32 = 0.90;
const REPETITION_RATE_CEILING: f32 = 0.6;

/// Detects two independent stalling patterns over the last up-to-6
/// contributions: high semantic repetition (everyone re-saying the same
/// thing) and circular refutation (A refutes B, B refutes A, with no
/// forward progress).
#[derive(Debug, Default)]
pub struct DeadlockDetector;

impl DeadlockDetector {
    pub fn new() -> Self {
        Self
    }

    /// `embeddings` must be the vectors for the same contributions passed
    /// in, in the same order (caller embeds once and shares the vectors
    /// with the convergence detector to avoid duplicate calls).
    pub fn is_deadlocked(&self, contributions: &[ContributionMessage], embeddings: &[Vec<f32>]) -> bool {
        self.repetition_deadlock(embeddings) || self.circular_refutation(contributions)
    }

    fn repetition_deadlock(&self, embeddings: &[Vec<f32>]) -> bool {
        let window = tail(embeddings, WINDOW);
        if window.len() < 2 {
            return false;
        }
        let mut matches = 0;
        let mut pairs = 0;
        for i in 0..window.len() {
            for j in 0..window.len() {
                if i == j {
                    continue;
                }
                pairs += 1;
                if cosine_similarity(&window[i], &window[j]) >= REPETITION_SIMILARITY_FLOOR {
                    matches += 1;
                }
            }
        }
        if pairs == 0 {
            return false;
        }
        (matches as f32 / pairs as f32) > REPETITION_RATE_CEILING
    }

    /// Looks for "<persona> disagrees/refutes with <other persona>" pairs
    /// appearing in both directions within the window.
    fn circular_refutation(&self, contributions: &[ContributionMessage]) -> bool {
        let window = tail(contributions, WINDOW);
        let mut edges: Vec<(String, String)> = Vec::new();
        for c in &window {
            let lower = c.content.to_lowercase();
            if !(lower.contains("disagree") || lower.contains("refute") || lower.contains("contrary to")) {
                continue;
            }
            for other in &window {
                if other.persona_code == c.persona_code {
                    continue;
                }
                let marker = other.persona_code.to_lowercase();
                if lower.contains(&marker) {
                    edges.push((c.persona_code.clone(), other.persona_code.clone()));
                }
            }
        }
        edges.iter().any(|(a, b)| edges.iter().any(|(c, d)| c == b && d == a))
    }
}

fn tail<T: Clone>(items: &[T], window: usize) -> Vec<T> {
    let start = items.len().saturating_sub(window);
    items[start..].to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Phase;

    fn msg(code: &str, content: &str) -> ContributionMessage {
        ContributionMessage::new(code, 3, content, Phase::Exploration)
    }

    #[test]
    fn high_repetition_rate_trips_deadlock() {
        let detector = DeadlockDetector::new();
        let embeddings = vec![vec![1.0, 0.0]; 4];
        let contributions = vec![msg("a", "x"), msg("b", "y"), msg("c", "z"), msg("d", "w")];
        assert!(detector.is_deadlocked(&contributions, &embeddings));
    }

    #[test]
    fn diverse_embeddings_do_not_trip_deadlock() {
        let detector = DeadlockDetector::new();
        let embeddings = vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![-1.0, 0.0], vec![0.0, -1.0]];
        let contributions = vec![msg("a", "x"), msg("b", "y"), msg("c", "z"), msg("d", "w")];
        assert!(!detector.is_deadlocked(&contributions, &embeddings));
    }

    #[test]
    fn circular_refutation_trips_deadlock() {
        let detector = DeadlockDetector::new();
        let embeddings = vec![vec![1.0, 0.0], vec![0.0, 1.0]];
        let contributions = vec![
            msg("cfo_advisor", "I disagree with coo_advisor on timing."),
            msg("coo_advisor", "I disagree with cfo_advisor's premise entirely."),
        ];
        assert!(detector.is_deadlocked(&contributions, &embeddings));
    }
}
