//! Applying mutation plans with weight inheritance.

use std::collections::BTreeSet;

use evoloop_core::{ComponentId, HeadId, Layer, ModelArtifact, Mutation, Precision};
use tracing::debug;

/// Why a plan could not be applied.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MutationError {
    /// Target is on the always-keep list
    #[error("{0} is protected")]
    Protected(ComponentId),

    /// Target does not exist in the parent
    #[error("{0} does not exist")]
    MissingTarget(ComponentId),

    /// Target was already removed earlier in the plan
    #[error("{0} is already pruned")]
    AlreadyPruned(ComponentId),

    /// Quantization would not lower precision
    #[error("Cannot quantize {from:?} to {to:?}")]
    PrecisionNotLower {
        /// Current precision
        from: Precision,
        /// Requested precision
        to: Precision,
    },

    /// Compression rank is not below the current embedding rank
    #[error("Embedding rank {rank} is not below current rank {current}")]
    RankNotLower {
        /// Requested rank
        rank: u32,
        /// Current effective rank
        current: u32,
    },

    /// Plan removes every layer
    #[error("Plan removes every layer")]
    EmptyModel,
}

/// Apply `plan` to a copy of `parent`.
///
/// Removals are checked against `protected` and against the parent before
/// anything is built. Surviving heads and FFN blocks are copied from the
/// parent by `(layer, head)` identity; precision and embedding changes are
/// applied afterwards in plan order.
pub fn apply_plan(
    parent: &ModelArtifact,
    plan: &[Mutation],
    protected: &BTreeSet<ComponentId>,
) -> Result<ModelArtifact, MutationError> {
    let mut heads: BTreeSet<HeadId> = BTreeSet::new();
    let mut layers: BTreeSet<u32> = BTreeSet::new();

    for mutation in plan {
        match *mutation {
            Mutation::PruneHead { layer, head } => {
                let id = ComponentId::head(layer, head);
                if protected.contains(&id) {
                    return Err(MutationError::Protected(id));
                }
                if !parent.has_head(HeadId::new(layer, head)) {
                    return Err(MutationError::MissingTarget(id));
                }
                if layers.contains(&layer) || !heads.insert(HeadId::new(layer, head)) {
                    return Err(MutationError::AlreadyPruned(id));
                }
            }
            Mutation::PruneLayer { layer } => {
                let id = ComponentId::ffn(layer);
                let Some(target) = parent.layer(layer) else {
                    return Err(MutationError::MissingTarget(id));
                };
                if protected.contains(&id) {
                    return Err(MutationError::Protected(id));
                }
                if let Some(h) = target
                    .heads
                    .iter()
                    .map(|h| ComponentId::head(layer, h.index))
                    .find(|h| protected.contains(h))
                {
                    return Err(MutationError::Protected(h));
                }
                if !layers.insert(layer) {
                    return Err(MutationError::AlreadyPruned(id));
                }
            }
            Mutation::Quantize { .. } | Mutation::CompressEmbedding { .. } => {}
        }
    }

    if !parent.layers.is_empty() && layers.len() == parent.layers.len() {
        return Err(MutationError::EmptyModel);
    }

    let mut child = inherit(parent, &heads, &layers);

    for mutation in plan {
        match *mutation {
            Mutation::Quantize { precision } => quantize(&mut child, precision)?,
            Mutation::CompressEmbedding { rank } => compress_embedding(&mut child, rank)?,
            Mutation::PruneHead { .. } | Mutation::PruneLayer { .. } => {}
        }
    }

    debug!(
        "Applied {} mutations: {} -> {} parameters",
        plan.len(),
        parent.parameter_count(),
        child.parameter_count()
    );
    Ok(child)
}

/// Copy every surviving component of `parent`.
fn inherit(parent: &ModelArtifact, heads: &BTreeSet<HeadId>, layers: &BTreeSet<u32>) -> ModelArtifact {
    let layers = parent
        .layers
        .iter()
        .filter(|l| !layers.contains(&l.index))
        .map(|l| Layer {
            index: l.index,
            heads: l
                .heads
                .iter()
                .filter(|h| !heads.contains(&HeadId::new(l.index, h.index)))
                .cloned()
                .collect(),
            ffn: l.ffn.clone(),
        })
        .collect();

    ModelArtifact {
        name: parent.name.clone(),
        precision: parent.precision,
        embedding: parent.embedding,
        layers,
        output_projection: parent.output_projection.clone(),
    }
}

fn quantize(model: &mut ModelArtifact, to: Precision) -> Result<(), MutationError> {
    if to.bytes_per_param() >= model.precision.bytes_per_param() {
        return Err(MutationError::PrecisionNotLower {
            from: model.precision,
            to,
        });
    }
    let round: fn(&mut [f32]) = match to {
        Precision::F16 => round_f16,
        Precision::Int8 => round_int8,
        Precision::F32 => |_| {},
    };
    for layer in &mut model.layers {
        for head in &mut layer.heads {
            round(&mut head.weights);
        }
        round(&mut layer.ffn.weights);
    }
    round(&mut model.output_projection);
    model.precision = to;
    Ok(())
}

/// Truncate mantissas to half precision's 10 bits, rounding to nearest.
fn round_f16(weights: &mut [f32]) {
    for w in weights.iter_mut() {
        if w.is_finite() {
            let bits = w.to_bits().wrapping_add(0x1000) & !0x1fff;
            *w = f32::from_bits(bits);
        }
    }
}

/// Symmetric per-tensor 8-bit quantization.
fn round_int8(weights: &mut [f32]) {
    let max = weights.iter().fold(0.0f32, |m, w| m.max(w.abs()));
    if max == 0.0 || !max.is_finite() {
        return;
    }
    let scale = max / 127.0;
    for w in weights.iter_mut() {
        *w = (*w / scale).round().clamp(-127.0, 127.0) * scale;
    }
}

fn compress_embedding(model: &mut ModelArtifact, rank: u32) -> Result<(), MutationError> {
    let current = model.embedding.rank.unwrap_or(model.embedding.dim);
    if rank == 0 || rank >= current {
        return Err(MutationError::RankNotLower { rank, current });
    }
    model.embedding.rank = Some(rank);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> ModelArtifact {
        ModelArtifact::synthetic("base", 3, 3, 8, 16)
    }

    fn none() -> BTreeSet<ComponentId> {
        BTreeSet::new()
    }

    #[test]
    fn test_surviving_heads_keep_parent_weights() {
        let parent = base();
        let plan = [Mutation::PruneHead { layer: 1, head: 1 }];
        let child = apply_plan(&parent, &plan, &none()).unwrap();

        assert!(!child.has_head(HeadId::new(1, 1)));
        assert_eq!(child.head_count(), parent.head_count() - 1);
        for (l, layer) in child.layers.iter().enumerate() {
            for head in &layer.heads {
                let original = parent.layers[l].head(head.index).unwrap();
                assert_eq!(head.weights, original.weights);
            }
            assert_eq!(layer.ffn, parent.layers[l].ffn);
        }
        assert_eq!(parent.parameter_count() - child.parameter_count(), 8);
    }

    #[test]
    fn test_layer_prune_keeps_original_indices() {
        let parent = base();
        let child = apply_plan(&parent, &[Mutation::PruneLayer { layer: 1 }], &none()).unwrap();
        let indices: Vec<u32> = child.layers.iter().map(|l| l.index).collect();
        assert_eq!(indices, vec![0, 2]);
        assert_eq!(child.layer(2), parent.layer(2));
    }

    #[test]
    fn test_protected_and_missing_targets() {
        let parent = base();
        let protected: BTreeSet<ComponentId> = [ComponentId::head(0, 0)].into_iter().collect();

        assert_eq!(
            apply_plan(&parent, &[Mutation::PruneHead { layer: 0, head: 0 }], &protected),
            Err(MutationError::Protected(ComponentId::head(0, 0)))
        );
        assert_eq!(
            apply_plan(&parent, &[Mutation::PruneLayer { layer: 0 }], &protected),
            Err(MutationError::Protected(ComponentId::head(0, 0)))
        );
        assert_eq!(
            apply_plan(&parent, &[Mutation::PruneHead { layer: 1, head: 9 }], &protected),
            Err(MutationError::MissingTarget(ComponentId::head(1, 9)))
        );
        assert_eq!(
            apply_plan(&parent, &[Mutation::PruneLayer { layer: 7 }], &protected),
            Err(MutationError::MissingTarget(ComponentId::ffn(7)))
        );
    }

    #[test]
    fn test_double_prune_rejected() {
        let parent = base();
        let plan = [
            Mutation::PruneLayer { layer: 2 },
            Mutation::PruneHead { layer: 2, head: 0 },
        ];
        assert_eq!(
            apply_plan(&parent, &plan, &none()),
            Err(MutationError::AlreadyPruned(ComponentId::head(2, 0)))
        );

        let all = [
            Mutation::PruneLayer { layer: 0 },
            Mutation::PruneLayer { layer: 1 },
            Mutation::PruneLayer { layer: 2 },
        ];
        assert_eq!(apply_plan(&parent, &all, &none()), Err(MutationError::EmptyModel));
    }

    #[test]
    fn test_quantize_and_compress() {
        let parent = base();
        let plan = [
            Mutation::Quantize { precision: Precision::Int8 },
            Mutation::CompressEmbedding { rank: 8 },
        ];
        let child = apply_plan(&parent, &plan, &none()).unwrap();
        assert_eq!(child.precision, Precision::Int8);
        assert_eq!(child.embedding.rank, Some(8));
        assert!(child.size_bytes() < parent.size_bytes() / 3);

        // Quantized weights stay close to the originals.
        let a = &parent.layers[1].ffn.weights;
        let b = &child.layers[1].ffn.weights;
        assert!(a.iter().zip(b).all(|(x, y)| (x - y).abs() < 0.01));

        assert!(matches!(
            apply_plan(&child, &[Mutation::Quantize { precision: Precision::F16 }], &none()),
            Err(MutationError::PrecisionNotLower { .. })
        ));
        assert!(matches!(
            apply_plan(&child, &[Mutation::CompressEmbedding { rank: 8 }], &none()),
            Err(MutationError::RankNotLower { rank: 8, current: 8 })
        ));
    }

    #[test]
    fn test_f16_rounding_is_close() {
        let mut w = vec![0.123_456_79f32, -0.5, 1.0e-3];
        let before = w.clone();
        round_f16(&mut w);
        for (a, b) in before.iter().zip(&w) {
            assert!((a - b).abs() <= a.abs() * 1.0e-3);
        }
    }
}
