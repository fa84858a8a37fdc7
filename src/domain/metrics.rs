use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Write-only, monotonic cost/usage accumulation for a session.
/// Invariant: `total_cost_usd == phase_costs.values().sum()` at all times
/// (enforced by `crate::metrics::MetricsCollector`, never by mutating this
/// struct directly).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Metrics {
    pub total_cost_usd: f64,
    pub total_tokens: u64,
    pub phase_costs: HashMap<String, f64>,
    pub duration_seconds: f64,
    pub convergence_score: f32,
}
