//! Structural representation of a model that the evolution engine mutates.
//!
//! The artifact carries enough structure (layers, heads, FFN blocks,
//! embedding shape, precision) and enough parameters for weight inheritance
//! and distillation to be meaningful. Loading real checkpoints is the serving
//! layer's concern.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::component::{ComponentId, HeadId};

/// Numeric precision of stored weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Precision {
    F32,
    F16,
    Int8,
}

impl Precision {
    /// Storage cost of one parameter.
    pub fn bytes_per_param(self) -> u64 {
        match self {
            Precision::F32 => 4,
            Precision::F16 => 2,
            Precision::Int8 => 1,
        }
    }
}

/// Embedding table shape, optionally low-rank factorized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddingSpec {
    pub vocab_size: u32,
    pub dim: u32,
    /// Factorization rank, if compressed
    pub rank: Option<u32>,
}

impl EmbeddingSpec {
    /// Parameters in the (possibly factorized) table.
    pub fn parameter_count(&self) -> u64 {
        let (v, d) = (self.vocab_size as u64, self.dim as u64);
        match self.rank {
            Some(r) => r as u64 * (v + d),
            None => v * d,
        }
    }
}

/// One attention head and its parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttentionHead {
    pub index: u32,
    pub weights: Vec<f32>,
}

impl AttentionHead {
    /// L2 norm of the head's parameters.
    pub fn norm(&self) -> f64 {
        l2_norm(&self.weights)
    }
}

/// Feed-forward block of a layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedForward {
    pub weights: Vec<f32>,
}

/// One transformer layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layer {
    pub index: u32,
    pub heads: Vec<AttentionHead>,
    pub ffn: FeedForward,
}

impl Layer {
    /// Find a head by its original index.
    pub fn head(&self, index: u32) -> Option<&AttentionHead> {
        self.heads.iter().find(|h| h.index == index)
    }

    /// Combined L2 norm of all attention heads.
    pub fn attention_norm(&self) -> f64 {
        self.heads
            .iter()
            .map(|h| h.norm().powi(2))
            .sum::<f64>()
            .sqrt()
    }

    fn parameter_count(&self) -> u64 {
        let heads: u64 = self.heads.iter().map(|h| h.weights.len() as u64).sum();
        heads + self.ffn.weights.len() as u64
    }
}

/// A complete model artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub name: String,
    pub precision: Precision,
    pub embedding: EmbeddingSpec,
    pub layers: Vec<Layer>,
    pub output_projection: Vec<f32>,
}

impl ModelArtifact {
    /// Build a deterministic synthetic model of the given shape.
    ///
    /// Weights follow a fixed trigonometric pattern so that two calls with the
    /// same arguments produce byte-identical artifacts.
    pub fn synthetic(
        name: impl Into<String>,
        layers: u32,
        heads_per_layer: u32,
        head_params: usize,
        ffn_params: usize,
    ) -> Self {
        let gen = |seed: u64, n: usize| -> Vec<f32> {
            (0..n)
                .map(|i| {
                    let x = (seed as f64 * 12.9898 + i as f64 * 78.233).sin() * 0.5;
                    x as f32
                })
                .collect()
        };
        let layers = (0..layers)
            .map(|l| Layer {
                index: l,
                heads: (0..heads_per_layer)
                    .map(|h| AttentionHead {
                        index: h,
                        weights: gen((l * 1000 + h) as u64 + 1, head_params),
                    })
                    .collect(),
                ffn: FeedForward { weights: gen((l as u64 + 1) * 7919, ffn_params) },
            })
            .collect();
        Self {
            name: name.into(),
            precision: Precision::F32,
            embedding: EmbeddingSpec { vocab_size: 512, dim: 32, rank: None },
            layers,
            output_projection: gen(424_242, head_params),
        }
    }

    /// Total parameter count.
    pub fn parameter_count(&self) -> u64 {
        let layers: u64 = self.layers.iter().map(Layer::parameter_count).sum();
        layers + self.embedding.parameter_count() + self.output_projection.len() as u64
    }

    /// Storage size at the artifact's precision.
    pub fn size_bytes(&self) -> u64 {
        self.parameter_count() * self.precision.bytes_per_param()
    }

    /// Number of attention heads still present.
    pub fn head_count(&self) -> usize {
        self.layers.iter().map(|l| l.heads.len()).sum()
    }

    /// Number of structural components a plan can remove (heads plus layers).
    pub fn structural_component_count(&self) -> usize {
        self.head_count() + self.layers.len()
    }

    /// Look up a layer by its original index.
    pub fn layer(&self, index: u32) -> Option<&Layer> {
        self.layers.iter().find(|l| l.index == index)
    }

    /// Whether the given head is still present.
    pub fn has_head(&self, id: HeadId) -> bool {
        self.layer(id.layer).and_then(|l| l.head(id.head)).is_some()
    }

    /// Whether the given component is still present.
    pub fn contains(&self, id: ComponentId) -> bool {
        match id {
            ComponentId::Head { layer, head } => self.has_head(HeadId::new(layer, head)),
            ComponentId::Ffn { layer } => self.layer(layer).is_some(),
            ComponentId::Embedding | ComponentId::OutputProjection => true,
        }
    }

    /// Content digest (SHA-256 over the canonical JSON encoding).
    pub fn digest(&self) -> String {
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        hex::encode(Sha256::digest(&bytes))
    }
}

/// L2 norm of a weight vector.
pub fn l2_norm(weights: &[f32]) -> f64 {
    weights.iter().map(|w| (*w as f64).powi(2)).sum::<f64>().sqrt()
}
