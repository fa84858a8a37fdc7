//! Cost/metrics collector
//!
//! Write-only accumulator over `domain::Metrics`. A `tokio::sync::Mutex`
//! guards accumulation rather than atomics: writes happen between awaits
//! (after every agent call), not on a hot path, so the mutex's
//! read-modify-write keeps `total_cost_usd == sum(phase_costs.values())`
//! exactly rather than merely eventually.

use tokio::sync::Mutex;

use crate::agents::CostPhase;
use crate::domain::Metrics;

pub struct MetricsCollector {
    metrics: Mutex<Metrics>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self { metrics: Mutex::new(Metrics::default()) }
    }

    pub async fn record(&self, phase: CostPhase, tokens: u64, cost_usd: f64) {
        let mut metrics = self.metrics.lock().await;
        metrics.total_cost_usd += cost_usd;
        metrics.total_tokens += tokens;
        *metrics.phase_costs.entry(phase.as_str().to_string()).or_insert(0.0) += cost_usd;
    }

    pub async fn set_convergence_score(&self, score: f32) {
        self.metrics.lock().await.convergence_score = score;
    }

    pub async fn set_duration(&self, seconds: f64) {
        self.metrics.lock().await.duration_seconds = seconds;
    }

    pub async fn snapshot(&self) -> Metrics {
        self.metrics.lock().await.clone()
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn total_cost_equals_sum_of_phase_costs() {
        let collector = MetricsCollector::new();
        collector.record(CostPhase::Decomposition, 100, 0.01).await;
        collector.record(CostPhase::Discussion, 500, 0.25).await;
        collector.record(CostPhase::Discussion, 300, 0.15).await;

        let snapshot = collector.snapshot().await;
        let summed: f64 = snapshot.phase_costs.values().sum();
        assert!((snapshot.total_cost_usd - summed).abs() < 1e-9);
        assert!((snapshot.total_cost_usd - 0.41).abs() < 1e-9);
        assert_eq!(snapshot.total_tokens, 900);
    }
}
