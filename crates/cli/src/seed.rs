//! Synthetic telemetry for local runs.

use chrono::Duration;
use evoloop_core::{
    EmbeddingStats, FfnStats, HeadId, HeadStats, ModelArtifact, StructuralSnapshot,
    TelemetryRecord,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Width of the synthetic output embeddings.
const EMBEDDING_DIM: usize = 8;

/// Shape of the generated workload.
#[derive(Debug, Clone)]
pub struct SeedPlan {
    pub requests: usize,
    /// Share of attention heads outside layer 0 that never fire
    pub dormant_share: f64,
    /// Shift the output distribution over the last third of requests
    pub drift: bool,
    pub seed: u64,
}

/// Generated records plus the matching structural snapshot.
pub struct Seeded {
    pub records: Vec<TelemetryRecord>,
    pub snapshot: StructuralSnapshot,
    pub dormant: Vec<HeadId>,
}

pub fn generate(model: &ModelArtifact, plan: &SeedPlan) -> Seeded {
    let mut rng = StdRng::seed_from_u64(plan.seed);

    let mut dormant = Vec::new();
    for layer in model.layers.iter().filter(|l| l.index > 0) {
        for head in &layer.heads {
            if rng.gen_bool(plan.dormant_share.clamp(0.0, 1.0)) {
                dormant.push(HeadId::new(layer.index, head.index));
            }
        }
    }

    let start = chrono::Utc::now() - Duration::minutes(plan.requests as i64);
    let drift_from = plan.requests - plan.requests / 3;
    let mut records = Vec::with_capacity(plan.requests);
    for i in 0..plan.requests {
        let mut latency = rng.gen_range(100.0..800.0);
        if rng.gen_bool(0.1) {
            latency += rng.gen_range(1000.0..2000.0);
        }
        let mut record = TelemetryRecord::new(start + Duration::minutes(i as i64), latency);
        record.input_tokens = rng.gen_range(10..50);
        record.output_tokens = rng.gen_range(20..200);

        for layer in &model.layers {
            record.layer_executions.insert(layer.index, 1);
            for head in &layer.heads {
                let id = HeadId::new(layer.index, head.index);
                if !dormant.contains(&id) {
                    record.head_activations.insert(id, rng.gen_range(5..50));
                }
            }
        }

        let drifted = plan.drift && i >= drift_from;
        let axis = if drifted { 1 } else { 0 };
        let mut embedding: Vec<f32> = (0..EMBEDDING_DIM)
            .map(|_| rng.gen_range(-0.05..0.05))
            .collect();
        embedding[axis] += 1.0;
        record.output_embedding = embedding;

        let vocab = if drifted { 256..512 } else { 0..256 };
        record.output_token_ids = (0..rng.gen_range(4..16))
            .map(|_| rng.gen_range(vocab.clone()))
            .collect();
        records.push(record);
    }

    let mut heads = Vec::new();
    let mut ffn = Vec::new();
    for layer in &model.layers {
        for head in &layer.heads {
            let id = HeadId::new(layer.index, head.index);
            let weight_norm = if dormant.contains(&id) {
                rng.gen_range(0.1..0.3)
            } else {
                rng.gen_range(0.8..1.2)
            };
            heads.push(HeadStats { head: id, weight_norm });
        }
        let signature: Vec<f32> = (0..model.layers.len())
            .map(|j| if j == layer.index as usize { 1.0 } else { rng.gen_range(0.0..0.2) })
            .collect();
        ffn.push(FfnStats {
            layer: layer.index,
            weight_norm: 1.0,
            sparsity: rng.gen_range(0.1..0.3),
            output_signature: signature,
        });
    }
    // One layer whose FFN barely activates.
    if let Some(last) = ffn.last_mut() {
        last.sparsity = 0.95;
    }

    let snapshot = StructuralSnapshot {
        taken_at: chrono::Utc::now(),
        heads,
        ffn,
        embedding: Some(EmbeddingStats {
            vocab_size: model.embedding.vocab_size,
            dim: model.embedding.dim,
        }),
    };

    Seeded { records, snapshot, dormant }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(drift: bool) -> SeedPlan {
        SeedPlan { requests: 30, dormant_share: 0.3, drift, seed: 11 }
    }

    #[test]
    fn test_generation_is_reproducible() {
        let model = ModelArtifact::synthetic("base", 4, 4, 8, 8);
        let a = generate(&model, &plan(false));
        let b = generate(&model, &plan(false));
        assert_eq!(a.dormant, b.dormant);
        assert_eq!(a.records.len(), 30);
        assert_eq!(a.records[3].output_token_ids, b.records[3].output_token_ids);
    }

    #[test]
    fn test_dormant_heads_never_fire() {
        let model = ModelArtifact::synthetic("base", 4, 4, 8, 8);
        let seeded = generate(&model, &plan(false));
        assert!(seeded.dormant.iter().all(|h| h.layer > 0));
        for record in &seeded.records {
            for head in &seeded.dormant {
                assert!(!record.head_activations.contains_key(head));
            }
        }
        assert_eq!(seeded.snapshot.heads.len(), 16);
    }

    #[test]
    fn test_drift_moves_late_outputs() {
        let model = ModelArtifact::synthetic("base", 2, 2, 8, 8);
        let seeded = generate(&model, &plan(true));
        assert!(seeded.records[0].output_embedding[0] > 0.9);
        assert!(seeded.records[29].output_embedding[1] > 0.9);
        assert!(seeded.records[29].output_token_ids.iter().all(|t| *t >= 256));
    }
}
