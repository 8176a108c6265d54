//! Telemetry records and structural snapshots produced by the serving side.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::component::HeadId;
use crate::id::RequestId;
use crate::Time;

/// One inference request as captured by the forward-pass hooks.
///
/// Immutable once written; the profiler and drift detector only read it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    /// Request identifier
    pub request_id: RequestId,

    /// When the request completed
    pub timestamp: Time,

    /// Prompt tokens
    pub input_tokens: u32,

    /// Generated tokens
    pub output_tokens: u32,

    /// End-to-end latency
    pub latency_ms: f64,

    /// Activation count per attention head
    pub head_activations: BTreeMap<HeadId, u64>,

    /// Execution count per layer index
    pub layer_executions: BTreeMap<u32, u64>,

    /// Pooled output embedding
    pub output_embedding: Vec<f32>,

    /// Generated token ids
    #[serde(default)]
    pub output_token_ids: Vec<u32>,
}

impl TelemetryRecord {
    /// Create a record with no structural counters.
    pub fn new(timestamp: Time, latency_ms: f64) -> Self {
        Self {
            request_id: RequestId::new(),
            timestamp,
            input_tokens: 0,
            output_tokens: 0,
            latency_ms,
            head_activations: BTreeMap::new(),
            layer_executions: BTreeMap::new(),
            output_embedding: Vec::new(),
            output_token_ids: Vec::new(),
        }
    }
}

/// Per-head weight statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeadStats {
    pub head: HeadId,
    pub weight_norm: f64,
}

/// Per-layer feed-forward statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FfnStats {
    pub layer: u32,
    pub weight_norm: f64,
    /// Fraction of near-zero activations
    pub sparsity: f64,
    /// Summary vector of the layer's output statistics
    pub output_signature: Vec<f32>,
}

/// Embedding table dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingStats {
    pub vocab_size: u32,
    pub dim: u32,
}

/// Periodic structural snapshot of the serving model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuralSnapshot {
    pub taken_at: Time,
    pub heads: Vec<HeadStats>,
    pub ffn: Vec<FfnStats>,
    pub embedding: Option<EmbeddingStats>,
}

impl StructuralSnapshot {
    /// Look up a head's statistics.
    pub fn head(&self, id: HeadId) -> Option<&HeadStats> {
        self.heads.iter().find(|h| h.head == id)
    }

    /// Look up a layer's FFN statistics.
    pub fn ffn_layer(&self, layer: u32) -> Option<&FfnStats> {
        self.ffn.iter().find(|f| f.layer == layer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_roundtrips_head_map() {
        let mut record = TelemetryRecord::new(chrono::Utc::now(), 12.5);
        record.head_activations.insert(HeadId::new(1, 2), 7);
        let json = serde_json::to_string(&record).unwrap();
        let back: TelemetryRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.head_activations.get(&HeadId::new(1, 2)), Some(&7));
    }
}
