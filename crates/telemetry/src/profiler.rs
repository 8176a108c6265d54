//! Usage profiler - aggregates telemetry into per-component utilization.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use evoloop_core::config::ProfilerConfig;
use evoloop_core::{
    ComponentId, StructuralSnapshot, TelemetryRecord, TelemetrySummary, TokenFrequencies,
    UsageProfile,
};
use tracing::debug;

use crate::source::{Result, TelemetrySource, WindowSpec};

/// Builds usage profiles from telemetry windows.
///
/// Profiling is a pure function of the window and snapshot: running it twice
/// over unchanged input yields equal profiles.
pub struct UsageProfiler {
    config: ProfilerConfig,
}

impl UsageProfiler {
    /// Create a profiler with default settings.
    pub fn new() -> Self {
        Self {
            config: ProfilerConfig::default(),
        }
    }

    /// Set the configuration.
    pub fn with_config(mut self, config: ProfilerConfig) -> Self {
        self.config = config;
        self
    }

    /// Window this profiler reads from a source.
    pub fn window_spec(&self) -> WindowSpec {
        match self.config.window {
            Some(n) => WindowSpec::LastN(n),
            None => WindowSpec::All,
        }
    }

    /// Read the configured window and the latest snapshot, then profile.
    pub async fn profile_source(
        &self,
        source: &dyn TelemetrySource,
    ) -> Result<(UsageProfile, Option<StructuralSnapshot>)> {
        let records = source.window(self.window_spec()).await?;
        let snapshot = source.latest_snapshot().await?;
        let profile = self.profile(&records, snapshot.as_ref());
        Ok((profile, snapshot))
    }

    /// Profile a window of records.
    ///
    /// Components known from the snapshot but never seen in telemetry get
    /// utilization 0. An empty window yields an empty profile.
    pub fn profile(
        &self,
        records: &[TelemetryRecord],
        snapshot: Option<&StructuralSnapshot>,
    ) -> UsageProfile {
        if records.is_empty() {
            debug!("Empty telemetry window, returning empty profile");
            return UsageProfile::empty();
        }

        let mut head_counts: BTreeMap<ComponentId, u64> = BTreeMap::new();
        let mut layer_counts: BTreeMap<ComponentId, u64> = BTreeMap::new();

        if let Some(snapshot) = snapshot {
            for stats in &snapshot.heads {
                head_counts.insert(stats.head.into(), 0);
            }
            for stats in &snapshot.ffn {
                layer_counts.insert(ComponentId::ffn(stats.layer), 0);
            }
        }

        for record in records {
            for (head, count) in &record.head_activations {
                *head_counts.entry((*head).into()).or_insert(0) += count;
            }
            for (layer, count) in &record.layer_executions {
                *layer_counts.entry(ComponentId::ffn(*layer)).or_insert(0) += count;
            }
        }

        let mut utilization = BTreeMap::new();
        normalize_into(&head_counts, &mut utilization);
        normalize_into(&layer_counts, &mut utilization);

        let mut dormant = BTreeSet::new();
        let mut redundant_candidates = BTreeSet::new();
        for (id, &u) in &utilization {
            if u < self.config.dormant_epsilon {
                dormant.insert(*id);
            } else if u < self.config.redundant_threshold {
                redundant_candidates.insert(*id);
            }
        }

        debug!(
            "Profiled {} records: {} components, {} dormant, {} redundant candidates",
            records.len(),
            utilization.len(),
            dormant.len(),
            redundant_candidates.len()
        );

        UsageProfile {
            window_start: records.iter().map(|r| r.timestamp).min(),
            window_end: records.iter().map(|r| r.timestamp).max(),
            utilization,
            dormant,
            redundant_candidates,
            summary: summarize(records),
            tokens: token_frequencies(records, self.config.top_n),
        }
    }
}

impl Default for UsageProfiler {
    fn default() -> Self {
        Self::new()
    }
}

/// Scale counts by the maximum count of their kind.
fn normalize_into(counts: &BTreeMap<ComponentId, u64>, out: &mut BTreeMap<ComponentId, f64>) {
    let max = counts.values().copied().max().unwrap_or(0);
    for (id, &count) in counts {
        let u = if max == 0 { 0.0 } else { count as f64 / max as f64 };
        out.insert(*id, u);
    }
}

fn summarize(records: &[TelemetryRecord]) -> TelemetrySummary {
    let n = records.len() as f64;
    let latencies = records.iter().map(|r| r.latency_ms);
    TelemetrySummary {
        total_requests: records.len() as u64,
        avg_latency_ms: records.iter().map(|r| r.latency_ms).sum::<f64>() / n,
        min_latency_ms: latencies.clone().fold(f64::INFINITY, f64::min),
        max_latency_ms: latencies.fold(f64::NEG_INFINITY, f64::max),
        total_input_tokens: records.iter().map(|r| r.input_tokens as u64).sum(),
        total_output_tokens: records.iter().map(|r| r.output_tokens as u64).sum(),
    }
}

fn token_frequencies(records: &[TelemetryRecord], top_n: usize) -> TokenFrequencies {
    let mut counts: HashMap<u32, u64> = HashMap::new();
    for token in records.iter().flat_map(|r| r.output_token_ids.iter()) {
        *counts.entry(*token).or_insert(0) += 1;
    }

    let total_tokens = counts.values().sum();
    let distinct_tokens = counts.len() as u64;

    // Count descending, token id ascending on ties.
    let mut sorted: Vec<(u32, u64)> = counts.into_iter().collect();
    sorted.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

    let frequent = sorted.iter().take(top_n).copied().collect();
    let rare = if sorted.len() > top_n {
        sorted.iter().rev().take(top_n).copied().collect()
    } else {
        Vec::new()
    };

    TokenFrequencies {
        frequent,
        rare,
        distinct_tokens,
        total_tokens,
    }
}
