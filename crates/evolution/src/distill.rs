//! Quality recovery after pruning.

use evoloop_core::{DistillationReport, ModelArtifact};
use tracing::debug;

/// Adjusts a pruned student so it behaves more like its parent.
///
/// Runs on a blocking thread inside the mutation stage.
pub trait Distiller: Send + Sync {
    /// Adjust `student` in place.
    fn distill(&self, teacher: &ModelArtifact, student: &mut ModelArtifact) -> DistillationReport;
}

/// Rescales the surviving heads of each pruned layer so the layer's
/// attention norm approaches the parent's, with a bounded gain.
#[derive(Debug, Clone)]
pub struct NormRecoveryDistiller {
    max_gain: f64,
}

impl NormRecoveryDistiller {
    /// Create a distiller with the given gain bound (at least 1).
    pub fn new(max_gain: f64) -> Self {
        Self {
            max_gain: if max_gain.is_finite() { max_gain.max(1.0) } else { 1.0 },
        }
    }
}

impl Default for NormRecoveryDistiller {
    fn default() -> Self {
        Self::new(1.5)
    }
}

impl Distiller for NormRecoveryDistiller {
    fn distill(&self, teacher: &ModelArtifact, student: &mut ModelArtifact) -> DistillationReport {
        let mut report = DistillationReport {
            method: "norm_recovery".to_string(),
            steps: 1,
            layers_adjusted: Vec::new(),
            max_gain: 1.0,
        };

        for layer in &mut student.layers {
            let Some(original) = teacher.layer(layer.index) else {
                continue;
            };
            if layer.heads.len() >= original.heads.len() {
                continue;
            }
            let current = layer.attention_norm();
            if current <= 0.0 {
                continue;
            }
            let gain = (original.attention_norm() / current).clamp(1.0, self.max_gain);
            for head in &mut layer.heads {
                for w in &mut head.weights {
                    *w = (*w as f64 * gain) as f32;
                }
            }
            debug!("Layer {} rescaled by {:.3}", layer.index, gain);
            report.layers_adjusted.push(layer.index);
            report.max_gain = report.max_gain.max(gain);
        }
        report
    }
}

/// Leaves the student untouched; records that nothing was done.
#[derive(Debug, Clone, Default)]
pub struct NoopDistiller;

impl Distiller for NoopDistiller {
    fn distill(&self, _teacher: &ModelArtifact, _student: &mut ModelArtifact) -> DistillationReport {
        DistillationReport {
            method: "none".to_string(),
            steps: 0,
            layers_adjusted: Vec::new(),
            max_gain: 1.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mutate::apply_plan;
    use evoloop_core::Mutation;
    use std::collections::BTreeSet;

    #[test]
    fn test_norm_recovers_toward_parent() {
        let parent = ModelArtifact::synthetic("base", 2, 4, 8, 8);
        let mut student = apply_plan(
            &parent,
            &[Mutation::PruneHead { layer: 1, head: 2 }],
            &BTreeSet::new(),
        )
        .unwrap();
        let before = student.layers[1].attention_norm();

        let report = NormRecoveryDistiller::new(10.0).distill(&parent, &mut student);

        assert_eq!(report.layers_adjusted, vec![1]);
        let after = student.layers[1].attention_norm();
        let target = parent.layers[1].attention_norm();
        assert!(after > before);
        assert!((after - target).abs() < 1e-3 * target);
        // Untouched layer keeps its weights.
        assert_eq!(student.layers[0], parent.layers[0]);
    }

    #[test]
    fn test_gain_is_bounded() {
        let parent = ModelArtifact::synthetic("base", 1, 4, 8, 8);
        let plan: Vec<Mutation> = (1..4).map(|h| Mutation::PruneHead { layer: 0, head: h }).collect();
        let mut student = apply_plan(&parent, &plan, &BTreeSet::new()).unwrap();
        let before = student.layers[0].attention_norm();

        let report = NormRecoveryDistiller::new(1.2).distill(&parent, &mut student);
        assert!(report.max_gain <= 1.2 + 1e-9);
        assert!(student.layers[0].attention_norm() <= before * 1.2 + 1e-6);
    }

    #[test]
    fn test_noop_leaves_student() {
        let parent = ModelArtifact::synthetic("base", 1, 2, 4, 4);
        let mut student = parent.clone();
        let report = NoopDistiller.distill(&parent, &mut student);
        assert_eq!(student, parent);
        assert_eq!(report.steps, 0);
    }
}
