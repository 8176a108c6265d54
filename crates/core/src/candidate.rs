//! Evolution candidate - a mutated, not-yet-registered model.

use serde::{Deserialize, Serialize};

use crate::artifact::ModelArtifact;
use crate::id::{CandidateId, VersionId};
use crate::mutation::Mutation;

/// What the distillation pass did to recover quality.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DistillationReport {
    pub method: String,
    pub steps: u32,
    /// Layers whose surviving weights were adjusted
    pub layers_adjusted: Vec<u32>,
    /// Largest gain applied to any layer
    pub max_gain: f64,
}

/// A candidate produced by one evolution cycle.
///
/// Exists only inside the cycle; it becomes a registry version on approval
/// and is dropped otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvolutionCandidate {
    pub id: CandidateId,
    pub parent: VersionId,
    /// Ordered plan that produced this artifact
    pub plan: Vec<Mutation>,
    pub artifact: ModelArtifact,
    /// Candidate bytes / parent bytes
    pub compression_ratio: f64,
    pub parent_parameters: u64,
    pub distillation: DistillationReport,
}

impl EvolutionCandidate {
    /// Parameter count of the candidate artifact.
    pub fn parameters(&self) -> u64 {
        self.artifact.parameter_count()
    }

    /// Parameter reduction vs parent, in percent.
    pub fn reduction_pct(&self) -> f64 {
        if self.parent_parameters == 0 {
            return 0.0;
        }
        (1.0 - self.parameters() as f64 / self.parent_parameters as f64) * 100.0
    }
}
