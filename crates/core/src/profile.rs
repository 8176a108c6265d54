//! Usage profile model - aggregated utilization over a telemetry window.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::component::ComponentId;
use crate::Time;

/// Aggregate request statistics over a profiling window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySummary {
    pub total_requests: u64,
    pub avg_latency_ms: f64,
    pub min_latency_ms: f64,
    pub max_latency_ms: f64,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
}

/// Frequent and rare token paths observed in the window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenFrequencies {
    /// Most frequent tokens, descending by count
    pub frequent: Vec<(u32, u64)>,
    /// Least frequent tokens (empty when fewer distinct tokens than the top-N)
    pub rare: Vec<(u32, u64)>,
    pub distinct_tokens: u64,
    pub total_tokens: u64,
}

/// Per-component utilization over one telemetry window.
///
/// Superseded, never merged, by the next profiling run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageProfile {
    pub window_start: Option<Time>,
    pub window_end: Option<Time>,
    /// Normalized utilization in `[0, 1]`
    pub utilization: BTreeMap<ComponentId, f64>,
    /// Below the dormant epsilon across the window
    pub dormant: BTreeSet<ComponentId>,
    /// Low but non-dormant utilization
    pub redundant_candidates: BTreeSet<ComponentId>,
    pub summary: TelemetrySummary,
    pub tokens: TokenFrequencies,
}

impl UsageProfile {
    /// Profile of an empty telemetry window.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Whether the profile was built from zero telemetry.
    pub fn is_empty(&self) -> bool {
        self.summary.total_requests == 0
    }

    /// Utilization of a component; unknown components count as unused.
    pub fn utilization_of(&self, id: &ComponentId) -> f64 {
        self.utilization.get(id).copied().unwrap_or(0.0)
    }
}
