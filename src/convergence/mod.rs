//! Convergence detection
//!
//! `ConvergenceDetector::evaluate` runs after every contribution, scoring
//! the last up-to-6-message window for semantic agreement and deciding
//! whether the discussion should stop. Falls back to a keyword heuristic
//! only when the embedding service is unavailable.

mod heuristic;

pub use heuristic::AgreementHeuristic;

use crate::config::EngineConfig;
use crate::domain::{ConvergenceReading, StopReason};
use crate::embedding::cosine_similarity;

const WINDOW: usize = 6;
const HARD_ROUND_CAP: u8 = 15;

pub struct ConvergenceDetector {
    heuristic: AgreementHeuristic,
}

impl ConvergenceDetector {
    pub fn new() -> Self {
        Self { heuristic: AgreementHeuristic::new() }
    }

    /// `window_embeddings` holds the vectors for the last up-to-6
    /// contributions in the same order, or `None` if the embedding service
    /// is unavailable — in which case `window_texts` drives the keyword
    /// fallback instead.
    pub fn evaluate(
        &self,
        round: u8,
        window_embeddings: Option<&[Vec<f32>]>,
        window_texts: &[String],
        cfg: &EngineConfig,
        cost_breach: bool,
        deadlock: bool,
    ) -> ConvergenceReading {
        let (semantic_score, novelty_score) = match window_embeddings {
            Some(embeddings) => self.score_embeddings(embeddings),
            None => self.heuristic.score(window_texts),
        };

        let stop_reason = self.stop_reason(round, semantic_score, novelty_score, cfg, cost_breach, deadlock);

        ConvergenceReading {
            round,
            semantic_score,
            novelty_score,
            should_stop: stop_reason.is_some(),
            stop_reason,
        }
    }

    /// `semantic_score` is the mean of each message's max similarity to
    /// every other message in the window. `novelty_score` is 1 minus the
    /// latest message's similarity against the rest of the window.
    fn score_embeddings(&self, embeddings: &[Vec<f32>]) -> (f32, f32) {
        let window = tail(embeddings, WINDOW);
        if window.len() < 2 {
            return (0.0, 1.0);
        }
        let mut max_sims = Vec::with_capacity(window.len());
        for i in 0..window.len() {
            let mut best = 0.0f32;
            for j in 0..window.len() {
                if i == j {
                    continue;
                }
                best = best.max(cosine_similarity(&window[i], &window[j]));
            }
            max_sims.push(best);
        }
        let semantic_score = max_sims.iter().sum::<f32>() / max_sims.len() as f32;

        let latest = window.last().unwrap();
        let mut latest_best = 0.0f32;
        for other in &window[..window.len() - 1] {
            latest_best = latest_best.max(cosine_similarity(latest, other));
        }
        let novelty_score = 1.0 - latest_best;

        (semantic_score, novelty_score)
    }

    fn stop_reason(
        &self,
        round: u8,
        semantic_score: f32,
        novelty_score: f32,
        cfg: &EngineConfig,
        cost_breach: bool,
        deadlock: bool,
    ) -> Option<StopReason> {
        if round >= HARD_ROUND_CAP {
            return Some(StopReason::HardCap);
        }
        if cost_breach {
            return Some(StopReason::CostExceeded);
        }
        if deadlock {
            return Some(StopReason::Deadlock);
        }
        if round >= cfg.max_rounds {
            return Some(StopReason::MaxRounds);
        }
        if round >= cfg.min_rounds_for_convergence
            && semantic_score >= cfg.convergence_threshold
            && novelty_score <= cfg.novelty_ceiling_for_stop
        {
            return Some(StopReason::Consensus);
        }
        None
    }
}

impl Default for ConvergenceDetector {
    fn default() -> Self {
        Self::new()
    }
}

fn tail<T: Clone>(items: &[T], window: usize) -> Vec<T> {
    let start = items.len().saturating_sub(window);
    items[start..].to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hard_cap_outranks_everything_else() {
        let detector = ConvergenceDetector::new();
        let cfg = EngineConfig::default();
        let reading = detector.evaluate(15, Some(&[vec![1.0, 0.0], vec![1.0, 0.0]]), &[], &cfg, true, true);
        assert_eq!(reading.stop_reason, Some(StopReason::HardCap));
    }

    #[test]
    fn cost_breach_outranks_deadlock_and_max_rounds() {
        let detector = ConvergenceDetector::new();
        let cfg = EngineConfig::default();
        let reading = detector.evaluate(cfg.max_rounds, Some(&[vec![1.0, 0.0]]), &[], &cfg, true, true);
        assert_eq!(reading.stop_reason, Some(StopReason::CostExceeded));
    }

    #[test]
    fn deadlock_outranks_max_rounds() {
        let detector = ConvergenceDetector::new();
        let cfg = EngineConfig::default();
        let reading = detector.evaluate(cfg.max_rounds, Some(&[vec![1.0, 0.0]]), &[], &cfg, false, true);
        assert_eq!(reading.stop_reason, Some(StopReason::Deadlock));
    }

    #[test]
    fn identical_contributions_converge_on_consensus() {
        let detector = ConvergenceDetector::new();
        let cfg = EngineConfig::default();
        let embeddings = vec![vec![1.0, 0.0]; 4];
        let reading = detector.evaluate(cfg.min_rounds_for_convergence, Some(&embeddings), &[], &cfg, false, false);
        assert_eq!(reading.stop_reason, Some(StopReason::Consensus));
    }

    #[test]
    fn diverse_contributions_before_max_rounds_continue() {
        let detector = ConvergenceDetector::new();
        let cfg = EngineConfig::default();
        let embeddings = vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![-1.0, 0.0]];
        let reading = detector.evaluate(cfg.min_rounds_for_convergence, Some(&embeddings), &[], &cfg, false, false);
        assert!(!reading.should_stop);
    }

    #[test]
    fn consensus_cannot_fire_before_min_rounds() {
        let detector = ConvergenceDetector::new();
        let cfg = EngineConfig::default();
        let embeddings = vec![vec![1.0, 0.0]; 4];
        let reading = detector.evaluate(1, Some(&embeddings), &[], &cfg, false, false);
        assert!(!reading.should_stop);
    }
}
