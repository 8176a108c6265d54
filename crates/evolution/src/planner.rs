//! Plan selection - turns an analysis into an ordered mutation plan.

use std::collections::BTreeSet;

use evoloop_analysis::{pruning_risk, removal_set};
use evoloop_core::config::EvolutionConfig;
use evoloop_core::{ComponentId, HeadId, ModelArtifact, Mutation, StructuralAnalysis};
use serde::Serialize;
use tracing::{debug, info};

/// A candidate plan with its heuristic score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredPlan {
    pub mutations: Vec<Mutation>,
    /// Estimated parameter reduction, in percent
    pub estimated_reduction_pct: f64,
    /// Pruning risk of this subset alone
    pub risk: f64,
    /// `reduction - risk`; higher is better
    pub score: f64,
}

/// Result of plan selection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanSelection {
    /// Chosen removals followed by optional precision/embedding steps
    pub plan: Vec<Mutation>,
    /// Every prefix that was scored, shortest first
    pub considered: Vec<ScoredPlan>,
    /// Structural components this cycle may touch
    pub budget: usize,
}

impl PlanSelection {
    /// Whether there is nothing to apply.
    pub fn is_empty(&self) -> bool {
        self.plan.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
enum Step {
    Head(HeadId),
    Layer(u32),
}

/// Chooses what one cycle mutates.
///
/// Removal steps are ordered by importance, lowest first. Every prefix that
/// fits the budget (up to `max_plan_candidates`) is scored by estimated
/// parameter reduction minus its own pruning risk, and the best one wins.
pub struct PlanSelector {
    config: EvolutionConfig,
}

impl PlanSelector {
    /// Create a selector with default settings.
    pub fn new() -> Self {
        Self {
            config: EvolutionConfig::default(),
        }
    }

    /// Set the configuration.
    pub fn with_config(mut self, config: EvolutionConfig) -> Self {
        self.config = config;
        self
    }

    /// Structural components one cycle may remove from `artifact`.
    pub fn budget(&self, artifact: &ModelArtifact) -> usize {
        let n = artifact.structural_component_count() as f64;
        (n * self.config.max_mutation_fraction).floor() as usize
    }

    /// Build the plan for `artifact` from `analysis`.
    pub fn select(
        &self,
        analysis: &StructuralAnalysis,
        artifact: &ModelArtifact,
        fragmentation_penalty: f64,
    ) -> PlanSelection {
        let budget = self.budget(artifact);
        let steps = self.ordered_steps(analysis, artifact);

        let mut considered = Vec::new();
        let mut heads = Vec::new();
        let mut layers = Vec::new();
        let mut spent = 0usize;
        for step in steps {
            if considered.len() >= self.config.max_plan_candidates {
                break;
            }
            let cost = match step {
                Step::Head(_) => 1,
                Step::Layer(l) => artifact.layer(l).map(|l| l.heads.len()).unwrap_or(0) + 1,
            };
            if spent + cost > budget {
                continue;
            }
            spent += cost;
            match step {
                Step::Head(h) => heads.push(h),
                Step::Layer(l) => layers.push(l),
            }
            let plan = self.score(analysis, artifact, &heads, &layers, fragmentation_penalty);
            debug!(
                "Plan of {} removals: -{:.2}% params, risk {:.3}, score {:.4}",
                plan.mutations.len(),
                plan.estimated_reduction_pct,
                plan.risk,
                plan.score
            );
            considered.push(plan);
        }

        let mut best: Option<&ScoredPlan> = None;
        for plan in &considered {
            if best.map_or(true, |b| plan.score > b.score) {
                best = Some(plan);
            }
        }
        let mut plan: Vec<Mutation> = best.map(|b| b.mutations.clone()).unwrap_or_default();
        if let Some(best) = best {
            info!(
                "Selected plan of {} removals out of {} scored (score {:.4})",
                best.mutations.len(),
                considered.len(),
                best.score
            );
        }

        if self.config.enable_quantization
            && self.config.quantize_to.bytes_per_param() < artifact.precision.bytes_per_param()
        {
            plan.push(Mutation::Quantize {
                precision: self.config.quantize_to,
            });
        }
        if self.config.enable_embedding_compression {
            let rank = self.config.compression_rank;
            let current = artifact.embedding.rank.unwrap_or(artifact.embedding.dim);
            if rank > 0 && rank < current {
                plan.push(Mutation::CompressEmbedding { rank });
            }
        }

        PlanSelection {
            plan,
            considered,
            budget,
        }
    }

    /// Prunable layers and heads still present in `artifact`, least
    /// important first. Heads of a prunable layer are covered by the layer.
    fn ordered_steps(&self, analysis: &StructuralAnalysis, artifact: &ModelArtifact) -> Vec<Step> {
        let layer_set: BTreeSet<u32> = analysis
            .prunable_layers
            .iter()
            .copied()
            .filter(|l| artifact.layer(*l).is_some())
            .collect();

        let mut steps: Vec<(f64, Step)> = layer_set
            .iter()
            .map(|&l| (analysis.importance_of(&ComponentId::ffn(l)), Step::Layer(l)))
            .collect();
        steps.extend(
            analysis
                .prunable_heads
                .iter()
                .filter(|h| artifact.has_head(**h) && !layer_set.contains(&h.layer))
                .map(|h| (analysis.importance_of(&ComponentId::from(*h)), Step::Head(*h))),
        );
        steps.sort_by(|a, b| a.0.total_cmp(&b.0));
        steps.into_iter().map(|(_, s)| s).collect()
    }

    fn score(
        &self,
        analysis: &StructuralAnalysis,
        artifact: &ModelArtifact,
        heads: &[HeadId],
        layers: &[u32],
        fragmentation_penalty: f64,
    ) -> ScoredPlan {
        let mut removed_params = 0u64;
        for l in layers {
            if let Some(layer) = artifact.layer(*l) {
                removed_params += layer.heads.iter().map(|h| h.weights.len() as u64).sum::<u64>();
                removed_params += layer.ffn.weights.len() as u64;
            }
        }
        for h in heads {
            if let Some(head) = artifact.layer(h.layer).and_then(|l| l.head(h.head)) {
                removed_params += head.weights.len() as u64;
            }
        }
        let total = artifact.parameter_count().max(1);
        let estimated_reduction_pct = removed_params as f64 / total as f64 * 100.0;

        let removed = removal_set(&analysis.importance, heads, layers);
        let risk = pruning_risk(&analysis.importance, &removed, fragmentation_penalty);

        let mut mutations: Vec<Mutation> = layers.iter().map(|&layer| Mutation::PruneLayer { layer }).collect();
        mutations.extend(heads.iter().map(|h| Mutation::PruneHead {
            layer: h.layer,
            head: h.head,
        }));

        ScoredPlan {
            mutations,
            estimated_reduction_pct,
            risk,
            score: estimated_reduction_pct / 100.0 - risk,
        }
    }
}

impl Default for PlanSelector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evoloop_core::Precision;
    use std::collections::BTreeMap;

    fn model() -> ModelArtifact {
        // 16 heads + 4 layers = 20 components; budget 5 at 0.25.
        ModelArtifact::synthetic("base", 4, 4, 64, 64)
    }

    fn analysis(heads: &[(u32, u32, f64)], layers: &[(u32, f64)]) -> StructuralAnalysis {
        let mut importance = BTreeMap::new();
        for l in 0..4 {
            importance.insert(ComponentId::ffn(l), 0.9);
            for h in 0..4 {
                importance.insert(ComponentId::head(l, h), 0.9);
            }
        }
        for &(l, h, v) in heads {
            importance.insert(ComponentId::head(l, h), v);
        }
        for &(l, v) in layers {
            importance.insert(ComponentId::ffn(l), v);
            for h in 0..4 {
                importance.insert(ComponentId::head(l, h), v);
            }
        }
        StructuralAnalysis {
            prunable_heads: heads.iter().map(|&(l, h, _)| HeadId::new(l, h)).collect(),
            prunable_layers: layers.iter().map(|&(l, _)| l).collect(),
            importance,
            ..Default::default()
        }
    }

    #[test]
    fn test_empty_analysis_gives_empty_plan() {
        let selection = PlanSelector::new().select(&StructuralAnalysis::default(), &model(), 0.5);
        assert!(selection.is_empty());
        assert!(selection.considered.is_empty());
        assert_eq!(selection.budget, 5);
    }

    #[test]
    fn test_prefixes_are_scored_in_importance_order() {
        let a = analysis(&[(2, 1, 0.05), (3, 2, 0.01), (1, 3, 0.10)], &[]);
        let selection = PlanSelector::new().select(&a, &model(), 0.5);

        assert_eq!(selection.considered.len(), 3);
        assert_eq!(
            selection.considered[0].mutations,
            vec![Mutation::PruneHead { layer: 3, head: 2 }]
        );
        assert_eq!(selection.considered[2].mutations.len(), 3);
        assert!(!selection.plan.is_empty());
        assert!(selection.plan.iter().all(Mutation::is_removal));
    }

    #[test]
    fn test_budget_bounds_plan() {
        let heads: Vec<(u32, u32, f64)> = (1..4)
            .flat_map(|l| (0..4).map(move |h| (l, h, 0.01 * (l * 4 + h) as f64)))
            .collect();
        let selector = PlanSelector::new().with_config(EvolutionConfig {
            max_plan_candidates: 20,
            ..Default::default()
        });
        let selection = selector.select(&analysis(&heads, &[]), &model(), 0.5);
        assert_eq!(selection.considered.len(), 5);
        assert!(selection.plan.len() <= selection.budget);
    }

    #[test]
    fn test_layer_costs_its_heads() {
        // Layer 2 costs 5 of the 5-component budget, so no head fits after it.
        let a = analysis(&[(1, 0, 0.05)], &[(2, 0.01)]);
        let selection = PlanSelector::new().select(&a, &model(), 0.5);
        assert_eq!(selection.considered.len(), 1);
        assert_eq!(selection.plan, vec![Mutation::PruneLayer { layer: 2 }]);
    }

    #[test]
    fn test_missing_targets_are_skipped() {
        let mut m = model();
        m.layers[3].heads.retain(|h| h.index != 2);
        let a = analysis(&[(3, 2, 0.01)], &[]);
        let selection = PlanSelector::new().select(&a, &m, 0.5);
        assert!(selection.is_empty());
    }

    #[test]
    fn test_optional_steps_follow_removals() {
        let selector = PlanSelector::new().with_config(EvolutionConfig {
            enable_quantization: true,
            quantize_to: Precision::F16,
            enable_embedding_compression: true,
            compression_rank: 8,
            ..Default::default()
        });
        let selection = selector.select(&StructuralAnalysis::default(), &model(), 0.5);
        assert_eq!(
            selection.plan,
            vec![
                Mutation::Quantize { precision: Precision::F16 },
                Mutation::CompressEmbedding { rank: 8 },
            ]
        );
    }
}
