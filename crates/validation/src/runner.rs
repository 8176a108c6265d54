//! Model runner plug-in.

use std::collections::HashMap;

use async_trait::async_trait;
use evoloop_core::{HeadId, ModelArtifact, Precision};
use sha2::{Digest, Sha256};

use crate::evaluation::FactualCheck;
use crate::validator::Result;

/// Output of one generation.
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    /// Generated output
    pub text: String,
    /// Latency reported by the runner; wall-clock is used when absent
    pub latency_ms: Option<f64>,
}

/// Executes a model artifact on a prompt.
///
/// The serving stack provides the real implementation; the sandbox only
/// needs text out and, optionally, a latency figure.
#[async_trait]
pub trait ModelRunner: Send + Sync {
    /// Generate a completion for `prompt` with `model`.
    async fn generate(&self, model: &ModelArtifact, prompt: &str) -> Result<Generation>;
}

/// Deterministic, structure-sensitive stand-in for a real model.
///
/// Each output token is derived from a hash of the prompt and its position.
/// A share of tokens (the sensitivity) is bound to one attention head of the
/// base model and disappears when that head is pruned, so output degrades in
/// proportion to what was removed. Lower precision and aggressive embedding
/// compression drop a small, fixed share of tokens. Latency scales with the
/// artifact's byte size.
pub struct SimulatedRunner {
    slots: Vec<HeadId>,
    output_len: usize,
    sensitivity: f64,
    facts: HashMap<String, String>,
    base_latency_ms: f64,
    ms_per_mb: f64,
}

impl SimulatedRunner {
    /// Runner whose tokens are bound to the heads of `base`.
    pub fn for_model(base: &ModelArtifact) -> Self {
        let slots = base
            .layers
            .iter()
            .flat_map(|l| l.heads.iter().map(move |h| HeadId::new(l.index, h.index)))
            .collect();
        Self {
            slots,
            output_len: 32,
            sensitivity: 0.25,
            facts: HashMap::new(),
            base_latency_ms: 20.0,
            ms_per_mb: 40.0,
        }
    }

    /// Share of tokens tied to a single head.
    pub fn with_sensitivity(mut self, sensitivity: f64) -> Self {
        self.sensitivity = sensitivity.clamp(0.0, 1.0);
        self
    }

    /// Answers the runner "knows" for factual prompts.
    pub fn with_facts<'a>(mut self, checks: impl IntoIterator<Item = &'a FactualCheck>) -> Self {
        for check in checks {
            self.facts.insert(check.prompt.clone(), check.expected.clone());
        }
        self
    }

    fn hash(prompt: &str, salt: u64) -> u64 {
        let mut hasher = Sha256::new();
        hasher.update(prompt.as_bytes());
        hasher.update(salt.to_le_bytes());
        let digest = hasher.finalize();
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        u64::from_le_bytes(bytes)
    }

    /// Whether the token with hash `h` survives in `model`.
    fn survives(&self, model: &ModelArtifact, h: u64) -> bool {
        let bound = (((h >> 16) % 10_000) as f64) < self.sensitivity * 10_000.0;
        if bound && !self.slots.is_empty() {
            let slot = self.slots[((h >> 32) % self.slots.len() as u64) as usize];
            if !model.has_head(slot) {
                return false;
            }
        }

        let precision_loss = match model.precision {
            Precision::F32 => false,
            Precision::F16 => (h >> 48) % 200 == 0,
            Precision::Int8 => (h >> 48) % 50 == 0,
        };
        let embedding = model.embedding;
        let compression_loss = match embedding.rank {
            Some(rank) if rank * 4 < embedding.dim => (h >> 56) % 40 == 0,
            _ => false,
        };
        !(precision_loss || compression_loss)
    }

    fn latency_ms(&self, model: &ModelArtifact) -> f64 {
        self.base_latency_ms + model.size_bytes() as f64 / 1_000_000.0 * self.ms_per_mb
    }
}

#[async_trait]
impl ModelRunner for SimulatedRunner {
    async fn generate(&self, model: &ModelArtifact, prompt: &str) -> Result<Generation> {
        let mut words = Vec::with_capacity(self.output_len + 1);

        if let Some(answer) = self.facts.get(prompt) {
            if self.survives(model, Self::hash(prompt, u64::MAX)) {
                words.push(answer.clone());
            } else {
                words.push("unsure".to_string());
            }
        }

        for j in 0..self.output_len as u64 {
            let h = Self::hash(prompt, j);
            if self.survives(model, h) {
                words.push(format!("w{:04x}", h & 0xffff));
            }
        }

        Ok(Generation {
            text: words.join(" "),
            latency_ms: Some(self.latency_ms(model)),
        })
    }
}
