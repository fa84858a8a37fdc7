//! Engine configuration.
//!
//! `EngineConfig` bundles every tunable the engine consumes. Validation
//! happens once, at construction, rather than scattered through the call
//! sites that read these fields.

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelPolicy {
    /// Rounds at or below this use the fast tier; above it, balanced.
    pub fast_until_round: u8,
}

impl Default for ModelPolicy {
    fn default() -> Self {
        Self { fast_until_round: 2 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub max_rounds: u8,
    pub convergence_threshold: f32,
    pub min_rounds_for_convergence: u8,
    pub novelty_ceiling_for_stop: f32,
    pub max_cost_usd: f64,
    pub enable_moderator: bool,
    pub enable_parallel_subproblems: bool,
    pub model_policy: ModelPolicy,
    pub session_timeout_secs: u64,
    pub node_timeout_secs: u64,
}

const HARD_ROUND_CAP: u8 = 15;

impl EngineConfig {
    /// Pick the adaptive default `max_rounds` for a problem of the given
    /// complexity score (1-10 scale, per `SubProblem::complexity_score`).
    pub fn adaptive_max_rounds(complexity: u8) -> u8 {
        match complexity {
            0..=3 => 3,
            4..=5 => 4,
            6..=7 => 5,
            _ => 6,
        }
    }

    pub fn for_complexity(complexity: u8) -> Self {
        Self {
            max_rounds: Self::adaptive_max_rounds(complexity),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.max_rounds == 0 || self.max_rounds > HARD_ROUND_CAP {
            return Err(EngineError::InvalidProblem(format!(
                "max_rounds must be in 1..={HARD_ROUND_CAP}, got {}",
                self.max_rounds
            )));
        }
        if !(0.0..=1.0).contains(&self.convergence_threshold) {
            return Err(EngineError::InvalidProblem(
                "convergence_threshold must be in [0,1]".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.novelty_ceiling_for_stop) {
            return Err(EngineError::InvalidProblem(
                "novelty_ceiling_for_stop must be in [0,1]".into(),
            ));
        }
        if self.min_rounds_for_convergence == 0 || self.min_rounds_for_convergence > self.max_rounds {
            return Err(EngineError::InvalidProblem(
                "min_rounds_for_convergence must be between 1 and max_rounds".into(),
            ));
        }
        if self.max_cost_usd <= 0.0 {
            return Err(EngineError::InvalidProblem(
                "max_cost_usd must be positive".into(),
            ));
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_rounds: 4,
            convergence_threshold: 0.85,
            min_rounds_for_convergence: 3,
            novelty_ceiling_for_stop: 0.30,
            max_cost_usd: 5.0,
            enable_moderator: true,
            enable_parallel_subproblems: true,
            model_policy: ModelPolicy::default(),
            session_timeout_secs: 3600,
            node_timeout_secs: 60,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_round_count_above_hard_cap() {
        let mut cfg = EngineConfig::default();
        cfg.max_rounds = 20;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn adaptive_rounds_scale_with_complexity() {
        assert_eq!(EngineConfig::adaptive_max_rounds(2), 3);
        assert_eq!(EngineConfig::adaptive_max_rounds(5), 4);
        assert_eq!(EngineConfig::adaptive_max_rounds(7), 5);
        assert_eq!(EngineConfig::adaptive_max_rounds(9), 6);
    }

    #[test]
    fn rejects_min_rounds_exceeding_max_rounds() {
        let mut cfg = EngineConfig::default();
        cfg.min_rounds_for_convergence = cfg.max_rounds + 1;
        assert!(cfg.validate().is_err());
    }
}
