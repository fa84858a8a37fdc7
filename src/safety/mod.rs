//! Safety layer
//!
//! Five defensive checks consulted from the graph driver's transition loop,
//! plus two contribution-level detectors. All are pure/cheap except
//! `DriftDetector`, which needs a relevance score an agent call produces
//! upstream — the detector itself only interprets that score.

mod deadlock;
mod drift;

pub use deadlock::DeadlockDetector;
pub use drift::DriftDetector;

use std::time::{Duration, Instant};

use crate::config::EngineConfig;
use crate::domain::Metrics;
use crate::error::EngineError;

/// Hard step cap on the whole graph driver loop, independent of rounds.
/// Generous enough that no well-formed sub-problem discussion should ever
/// hit it; it exists to stop a misconfigured router from looping forever.
pub const RECURSION_CAP: u32 = 55;

const HARD_ROUND_CAP: u8 = 15;

/// Counts total node invocations across the driver's lifetime and rejects
/// re-entry once `RECURSION_CAP` is reached.
#[derive(Debug, Default)]
pub struct RecursionGuard {
    steps: u32,
}

impl RecursionGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one node invocation; returns an error if the cap is breached.
    pub fn step(&mut self) -> Result<(), EngineError> {
        self.steps += 1;
        if self.steps > RECURSION_CAP {
            return Err(EngineError::Safety(format!(
                "recursion cap of {RECURSION_CAP} steps exceeded"
            )));
        }
        Ok(())
    }

    pub fn steps(&self) -> u32 {
        self.steps
    }
}

/// Round counter against the hard cap (15) and the session's configured
/// `max_rounds`.
#[derive(Debug)]
pub struct RoundGuard {
    max_rounds: u8,
}

impl RoundGuard {
    pub fn new(max_rounds: u8) -> Self {
        Self { max_rounds: max_rounds.min(HARD_ROUND_CAP) }
    }

    pub fn hit_hard_cap(&self, round: u8) -> bool {
        round >= HARD_ROUND_CAP
    }

    pub fn hit_max_rounds(&self, round: u8) -> bool {
        round >= self.max_rounds
    }
}

/// Per-session and per-node wall-clock deadlines, built on the same
/// `Instant`-based idiom as a plain elapsed-time budget tracker: no
/// external clock dependency, just a start time and a duration to compare
/// against.
#[derive(Debug)]
pub struct Watchdog {
    session_start: Instant,
    session_timeout: Duration,
    node_timeout: Duration,
}

impl Watchdog {
    pub fn new(session_timeout_secs: u64, node_timeout_secs: u64) -> Self {
        Self {
            session_start: Instant::now(),
            session_timeout: Duration::from_secs(session_timeout_secs),
            node_timeout: Duration::from_secs(node_timeout_secs),
        }
    }

    pub fn session_expired(&self) -> bool {
        self.session_start.elapsed() >= self.session_timeout
    }

    pub fn node_deadline(&self) -> Duration {
        self.node_timeout
    }

    pub fn session_elapsed(&self) -> Duration {
        self.session_start.elapsed()
    }
}

/// Per-session USD cost cap. Reads straight from `Metrics::total_cost_usd`
/// rather than keeping its own counter, since `MetricsCollector` is the
/// single source of truth for spend.
#[derive(Debug)]
pub struct CostGuard {
    max_cost_usd: f64,
}

impl CostGuard {
    pub fn new(max_cost_usd: f64) -> Self {
        Self { max_cost_usd }
    }

    pub fn breached(&self, metrics: &Metrics) -> bool {
        metrics.total_cost_usd >= self.max_cost_usd
    }
}

/// Composes the five checks plus the two detectors into one object the
/// graph driver consults before every re-entry.
pub struct SafetyLayer {
    pub recursion: RecursionGuard,
    pub rounds: RoundGuard,
    pub watchdog: Watchdog,
    pub cost: CostGuard,
    pub drift: DriftDetector,
    pub deadlock: DeadlockDetector,
}

impl SafetyLayer {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            recursion: RecursionGuard::new(),
            rounds: RoundGuard::new(config.max_rounds),
            watchdog: Watchdog::new(config.session_timeout_secs, config.node_timeout_secs),
            cost: CostGuard::new(config.max_cost_usd),
            drift: DriftDetector::new(),
            deadlock: DeadlockDetector::new(),
        }
    }

    /// Called before the driver re-enters the next node. Combines the step
    /// counter and session deadline checks that don't depend on round/cost
    /// state (those are read directly by the convergence detector, which
    /// owns stop-reason precedence).
    pub fn check_reentry(&mut self) -> Result<(), EngineError> {
        self.recursion.step()?;
        if self.watchdog.session_expired() {
            return Err(EngineError::Safety(format!(
                "session timeout exceeded after {:?}",
                self.watchdog.session_elapsed()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recursion_guard_trips_past_cap() {
        let mut guard = RecursionGuard::new();
        for _ in 0..RECURSION_CAP {
            assert!(guard.step().is_ok());
        }
        assert!(guard.step().is_err());
    }

    #[test]
    fn round_guard_respects_hard_cap_over_configured_max() {
        let guard = RoundGuard::new(200);
        assert!(guard.hit_max_rounds(HARD_ROUND_CAP));
    }

    #[test]
    fn cost_guard_breaches_at_or_above_limit() {
        let guard = CostGuard::new(5.0);
        let mut metrics = Metrics::default();
        metrics.total_cost_usd = 4.99;
        assert!(!guard.breached(&metrics));
        metrics.total_cost_usd = 5.0;
        assert!(guard.breached(&metrics));
    }

    #[test]
    fn watchdog_not_expired_immediately() {
        let watchdog = Watchdog::new(3600, 60);
        assert!(!watchdog.session_expired());
    }
}
