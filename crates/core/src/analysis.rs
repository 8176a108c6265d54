//! Structural analysis model - advisory output of the analyzer.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::component::{ComponentId, HeadId};

/// Kind of rewiring the analyzer recommends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RewiringKind {
    HeadPruning,
    LayerPruning,
    /// Collapse two highly similar FFN layers. Advisory only.
    MergeFfn,
    Quantization,
    EmbeddingCompression,
}

/// One recommendation, ordered by the analyzer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewiringRecommendation {
    pub kind: RewiringKind,
    pub targets: Vec<ComponentId>,
    pub estimated_speedup_pct: f64,
    pub estimated_memory_saving_pct: f64,
    /// Never applied automatically by the evolution engine
    pub advisory: bool,
    pub description: String,
}

/// Two FFN layers whose output statistics are nearly identical.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedundantPair {
    pub keep: u32,
    pub redundant: u32,
    pub similarity: f64,
}

/// Constraints the analysis was computed under.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConstraints {
    pub prune_threshold: f64,
    pub max_prune_ratio: f64,
    pub always_keep: Vec<String>,
}

/// Result of one structural analysis.
///
/// Derived and read-only; consumed exactly once per evolution attempt.
/// Contains no wall-clock data so that re-analysis of an unchanged window
/// compares equal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StructuralAnalysis {
    /// Heads proposed for pruning, lowest importance first
    pub prunable_heads: Vec<HeadId>,
    /// Layers whose heads and FFN are all below threshold
    pub prunable_layers: Vec<u32>,
    pub redundant_ffn_layers: Vec<u32>,
    pub redundant_pairs: Vec<RedundantPair>,
    pub importance: BTreeMap<ComponentId, f64>,
    pub pruning_risk_score: f64,
    pub recommendations: Vec<RewiringRecommendation>,
    pub constraints: AnalysisConstraints,
}

impl StructuralAnalysis {
    /// Total number of components proposed for removal.
    pub fn prunable_count(&self) -> usize {
        self.prunable_heads.len() + self.prunable_layers.len()
    }

    /// Importance of a component, or 0 if it was not scored.
    pub fn importance_of(&self, id: &ComponentId) -> f64 {
        self.importance.get(id).copied().unwrap_or(0.0)
    }
}
