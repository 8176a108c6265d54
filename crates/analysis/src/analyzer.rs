//! Structural analyzer - turns a usage profile and a structural snapshot
//! into pruning proposals and rewiring recommendations.

use std::collections::{BTreeMap, BTreeSet};

use evoloop_core::config::AnalyzerConfig;
use evoloop_core::{
    AnalysisConstraints, ComponentId, HeadId, RedundantPair, RewiringKind, RewiringRecommendation,
    StructuralAnalysis, StructuralSnapshot, UsageProfile,
};
use regex::Regex;
use tracing::{debug, warn};

use crate::risk::{pruning_risk, removal_set};

/// Computes [`StructuralAnalysis`] results.
pub struct StructuralAnalyzer {
    config: AnalyzerConfig,
    keep: Vec<Regex>,
}

impl StructuralAnalyzer {
    /// Create an analyzer with default settings.
    pub fn new() -> Self {
        Self::default().with_config(AnalyzerConfig::default())
    }

    /// Set the configuration.
    ///
    /// Always-keep patterns that fail to compile are skipped with a warning;
    /// `ControllerConfig::validate` rejects them before they get here.
    pub fn with_config(mut self, config: AnalyzerConfig) -> Self {
        self.keep = config
            .always_keep
            .iter()
            .filter_map(|p| match Regex::new(p) {
                Ok(re) => Some(re),
                Err(e) => {
                    warn!("Ignoring invalid always-keep pattern {:?}: {}", p, e);
                    None
                }
            })
            .collect();
        self.config = config;
        self
    }

    /// Whether a component is on the always-keep list.
    pub fn is_protected(&self, id: &ComponentId) -> bool {
        let canonical = id.to_string();
        self.keep.iter().any(|re| re.is_match(&canonical))
    }

    /// Fragmentation penalty the risk score is computed with.
    pub fn fragmentation_penalty(&self) -> f64 {
        self.config.fragmentation_penalty
    }

    /// Analyze a profile against a snapshot.
    ///
    /// With no telemetry or no snapshot there is nothing to justify a
    /// removal: the result has no prunable components and zero risk.
    pub fn analyze(
        &self,
        profile: &UsageProfile,
        snapshot: Option<&StructuralSnapshot>,
    ) -> StructuralAnalysis {
        let constraints = AnalysisConstraints {
            prune_threshold: self.config.prune_threshold,
            max_prune_ratio: self.config.max_prune_ratio,
            always_keep: self.config.always_keep.clone(),
        };

        let snapshot = match snapshot {
            Some(s) if !profile.is_empty() => s,
            _ => {
                debug!("No telemetry or snapshot; nothing to analyze");
                return StructuralAnalysis {
                    constraints,
                    ..Default::default()
                };
            }
        };

        let importance = self.score(profile, snapshot);
        let below = |id: &ComponentId| {
            importance.get(id).copied().unwrap_or(0.0) < self.config.prune_threshold
                && !self.is_protected(id)
        };

        // Heads eligible for pruning, lowest importance first.
        let mut eligible: Vec<(HeadId, f64)> = snapshot
            .heads
            .iter()
            .map(|s| s.head)
            .filter(|h| below(&ComponentId::from(*h)))
            .map(|h| (h, importance.get(&ComponentId::from(h)).copied().unwrap_or(0.0)))
            .collect();
        eligible.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));

        // A layer goes whole when its FFN and every one of its heads qualify.
        let prunable_layers: Vec<u32> = snapshot
            .ffn
            .iter()
            .map(|f| f.layer)
            .filter(|&layer| {
                let heads: Vec<_> = snapshot.heads.iter().filter(|h| h.head.layer == layer).collect();
                below(&ComponentId::ffn(layer))
                    && !heads.is_empty()
                    && heads.iter().all(|h| below(&ComponentId::from(h.head)))
            })
            .collect();

        eligible.retain(|(h, _)| !prunable_layers.contains(&h.layer));
        let cap = if eligible.is_empty() {
            0
        } else {
            ((eligible.len() as f64 * self.config.max_prune_ratio) as usize).max(1)
        };
        let prunable_heads: Vec<HeadId> = eligible.iter().take(cap).map(|(h, _)| *h).collect();

        let (redundant_pairs, redundant_ffn_layers) = self.redundant_ffn(snapshot);

        let removed = removal_set(&importance, &prunable_heads, &prunable_layers);
        let pruning_risk_score = pruning_risk(&importance, &removed, self.config.fragmentation_penalty);

        let recommendations = self.recommend(
            profile,
            snapshot,
            &prunable_heads,
            &prunable_layers,
            &redundant_pairs,
        );

        debug!(
            "Analysis: {} prunable heads, {} prunable layers, {} redundant FFN layers, risk {:.3}",
            prunable_heads.len(),
            prunable_layers.len(),
            redundant_ffn_layers.len(),
            pruning_risk_score
        );

        StructuralAnalysis {
            prunable_heads,
            prunable_layers,
            redundant_ffn_layers,
            redundant_pairs,
            importance,
            pruning_risk_score,
            recommendations,
            constraints,
        }
    }

    /// Importance of every head and FFN layer in the snapshot.
    fn score(&self, profile: &UsageProfile, snapshot: &StructuralSnapshot) -> BTreeMap<ComponentId, f64> {
        let wu = self.config.utilization_weight;
        let ws = self.config.structural_weight;
        let total = wu + ws;

        let max_head = snapshot.heads.iter().map(|h| h.weight_norm).fold(0.0, f64::max);
        let max_ffn = snapshot.ffn.iter().map(|f| f.weight_norm).fold(0.0, f64::max);
        let ratio = |norm: f64, max: f64| if max > 0.0 { norm / max } else { 0.0 };

        let mut importance = BTreeMap::new();
        for h in &snapshot.heads {
            let id = ComponentId::from(h.head);
            let score = (wu * profile.utilization_of(&id) + ws * ratio(h.weight_norm, max_head)) / total;
            importance.insert(id, score);
        }
        for f in &snapshot.ffn {
            let id = ComponentId::ffn(f.layer);
            let score = (wu * profile.utilization_of(&id) + ws * ratio(f.weight_norm, max_ffn)) / total;
            importance.insert(id, score);
        }
        importance
    }

    /// Near-identical FFN pairs and the layers they make redundant.
    ///
    /// The later layer of each pair is listed as redundant, as is any layer
    /// whose sparsity alone exceeds the threshold.
    fn redundant_ffn(&self, snapshot: &StructuralSnapshot) -> (Vec<RedundantPair>, Vec<u32>) {
        let mut layers: Vec<_> = snapshot
            .ffn
            .iter()
            .filter(|f| !self.is_protected(&ComponentId::ffn(f.layer)))
            .collect();
        layers.sort_by_key(|f| f.layer);

        let mut pairs = Vec::new();
        let mut redundant = BTreeSet::new();
        for (i, a) in layers.iter().enumerate() {
            for b in &layers[i + 1..] {
                if let Some(similarity) = cosine(&a.output_signature, &b.output_signature) {
                    if similarity > self.config.redundancy_threshold {
                        pairs.push(RedundantPair {
                            keep: a.layer,
                            redundant: b.layer,
                            similarity,
                        });
                        redundant.insert(b.layer);
                    }
                }
            }
            if a.sparsity > self.config.high_sparsity_threshold {
                redundant.insert(a.layer);
            }
        }
        (pairs, redundant.into_iter().collect())
    }

    fn recommend(
        &self,
        profile: &UsageProfile,
        snapshot: &StructuralSnapshot,
        heads: &[HeadId],
        layers: &[u32],
        pairs: &[RedundantPair],
    ) -> Vec<RewiringRecommendation> {
        let total_heads = snapshot.heads.len().max(1) as f64;
        let total_layers = snapshot.ffn.len().max(1) as f64;
        let mut out = Vec::new();

        if !heads.is_empty() {
            let share = heads.len() as f64 / total_heads;
            out.push(RewiringRecommendation {
                kind: RewiringKind::HeadPruning,
                targets: heads.iter().map(|h| ComponentId::from(*h)).collect(),
                estimated_speedup_pct: (heads.len() as f64 * 2.0).min(100.0),
                estimated_memory_saving_pct: share * 50.0,
                advisory: false,
                description: format!("Remove {} low-importance attention heads", heads.len()),
            });
        }

        if !layers.is_empty() {
            let share = layers.len() as f64 / total_layers * 100.0;
            out.push(RewiringRecommendation {
                kind: RewiringKind::LayerPruning,
                targets: layers.iter().map(|l| ComponentId::ffn(*l)).collect(),
                estimated_speedup_pct: share,
                estimated_memory_saving_pct: share,
                advisory: false,
                description: format!("Remove {} underused layers", layers.len()),
            });
        }

        for pair in pairs {
            out.push(RewiringRecommendation {
                kind: RewiringKind::MergeFfn,
                targets: vec![ComponentId::ffn(pair.keep), ComponentId::ffn(pair.redundant)],
                estimated_speedup_pct: 3.0,
                estimated_memory_saving_pct: 100.0 / total_layers / 2.0,
                advisory: true,
                description: format!(
                    "FFN layers {} and {} are {:.3} similar; review for merge",
                    pair.keep, pair.redundant, pair.similarity
                ),
            });
        }

        out.push(RewiringRecommendation {
            kind: RewiringKind::Quantization,
            targets: Vec::new(),
            estimated_speedup_pct: 15.0,
            estimated_memory_saving_pct: 40.0,
            advisory: false,
            description: "Re-encode weights at reduced precision".to_string(),
        });

        if let Some(embedding) = snapshot.embedding {
            if embedding.vocab_size > 0 && profile.tokens.total_tokens > 0 {
                let coverage = profile.tokens.distinct_tokens as f64 / embedding.vocab_size as f64;
                if coverage < self.config.embedding_coverage_threshold {
                    out.push(RewiringRecommendation {
                        kind: RewiringKind::EmbeddingCompression,
                        targets: vec![ComponentId::Embedding],
                        estimated_speedup_pct: 0.0,
                        estimated_memory_saving_pct: (1.0 - coverage) * 50.0,
                        advisory: false,
                        description: format!(
                            "Only {:.1}% of the vocabulary observed; factorize the embedding table",
                            coverage * 100.0
                        ),
                    });
                }
            }
        }

        out
    }
}

impl Default for StructuralAnalyzer {
    fn default() -> Self {
        Self {
            config: AnalyzerConfig::default(),
            keep: Vec::new(),
        }
    }
}

/// Cosine similarity, `None` for mismatched or zero vectors.
fn cosine(a: &[f32], b: &[f32]) -> Option<f64> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    let mut dot = 0.0;
    let mut na = 0.0;
    let mut nb = 0.0;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        return None;
    }
    Some(dot / (na.sqrt() * nb.sqrt()))
}
