//! Controller configuration.
//!
//! Every field has a default, so an empty JSON object is a valid config
//! file. Thresholds are checked by [`ControllerConfig::validate`] before the
//! controller is built; nothing is mutated on a validation error.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Result type for configuration.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub profiler: ProfilerConfig,
    pub analyzer: AnalyzerConfig,
    pub evolution: EvolutionConfig,
    pub validation: ValidationConfig,
    pub drift: DriftConfig,
    pub governance: GovernanceConfig,
}

impl ControllerConfig {
    /// Load and validate a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject malformed thresholds.
    pub fn validate(&self) -> Result<()> {
        let p = &self.profiler;
        fraction("profiler.dormant_epsilon", p.dormant_epsilon)?;
        fraction("profiler.redundant_threshold", p.redundant_threshold)?;
        if p.redundant_threshold < p.dormant_epsilon {
            return Err(ConfigError::invalid(
                "profiler.redundant_threshold",
                "must not be below dormant_epsilon",
            ));
        }
        if p.window == Some(0) {
            return Err(ConfigError::invalid("profiler.window", "window must not be empty"));
        }

        let a = &self.analyzer;
        fraction("analyzer.prune_threshold", a.prune_threshold)?;
        fraction("analyzer.max_prune_ratio", a.max_prune_ratio)?;
        fraction("analyzer.redundancy_threshold", a.redundancy_threshold)?;
        fraction("analyzer.high_sparsity_threshold", a.high_sparsity_threshold)?;
        fraction("analyzer.embedding_coverage_threshold", a.embedding_coverage_threshold)?;
        non_negative("analyzer.utilization_weight", a.utilization_weight)?;
        non_negative("analyzer.structural_weight", a.structural_weight)?;
        non_negative("analyzer.fragmentation_penalty", a.fragmentation_penalty)?;
        if a.utilization_weight + a.structural_weight <= 0.0 {
            return Err(ConfigError::invalid(
                "analyzer.utilization_weight",
                "importance weights must not both be zero",
            ));
        }
        for pattern in &a.always_keep {
            Regex::new(pattern)
                .map_err(|e| ConfigError::invalid("analyzer.always_keep", e.to_string()))?;
        }

        let e = &self.evolution;
        fraction("evolution.risk_ceiling", e.risk_ceiling)?;
        fraction("evolution.max_mutation_fraction", e.max_mutation_fraction)?;
        non_negative("evolution.max_distill_gain", e.max_distill_gain)?;
        if e.max_plan_candidates == 0 {
            return Err(ConfigError::invalid(
                "evolution.max_plan_candidates",
                "at least one plan must be considered",
            ));
        }
        if e.compression_rank == 0 {
            return Err(ConfigError::invalid("evolution.compression_rank", "rank must be positive"));
        }

        let v = &self.validation;
        non_negative("validation.max_accuracy_drop_pct", v.thresholds.max_accuracy_drop_pct)?;
        fraction("validation.max_hallucination_rate", v.thresholds.max_hallucination_rate)?;
        non_negative(
            "validation.max_latency_regression_pct",
            v.thresholds.max_latency_regression_pct,
        )?;
        fraction("validation.min_similarity", v.thresholds.min_similarity)?;
        if v.timeout_ms == 0 {
            return Err(ConfigError::invalid("validation.timeout_ms", "timeout must be positive"));
        }

        let d = &self.drift;
        if d.window_size == 0 {
            return Err(ConfigError::invalid("drift.window_size", "window must not be empty"));
        }
        if d.history_capacity == 0 {
            return Err(ConfigError::invalid("drift.history_capacity", "history must not be empty"));
        }
        fraction("drift.threshold", d.threshold)?;
        non_negative("drift.embedding_weight", d.embedding_weight)?;
        non_negative("drift.vocabulary_weight", d.vocabulary_weight)?;
        non_negative("drift.variance_weight", d.variance_weight)?;

        Ok(())
    }
}

fn non_negative(field: &'static str, value: f64) -> Result<()> {
    if value.is_nan() || value < 0.0 {
        return Err(ConfigError::invalid(field, format!("{} is not a non-negative number", value)));
    }
    Ok(())
}

fn fraction(field: &'static str, value: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(ConfigError::invalid(field, format!("{} is outside [0, 1]", value)));
    }
    Ok(())
}

/// Usage profiler settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfilerConfig {
    /// Below this utilization a component is dormant
    pub dormant_epsilon: f64,
    /// Below this (and at or above dormant) a component is a redundancy candidate
    pub redundant_threshold: f64,
    /// Most recent N records to profile; `None` = whole store
    pub window: Option<usize>,
    /// Size of the frequent/rare token lists
    pub top_n: usize,
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            dormant_epsilon: 0.10,
            redundant_threshold: 0.25,
            window: None,
            top_n: 20,
        }
    }
}

/// Structural analyzer settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    pub prune_threshold: f64,
    pub utilization_weight: f64,
    pub structural_weight: f64,
    /// Regex patterns over canonical component ids that are never pruned
    #[serde(default = "default_always_keep")]
    pub always_keep: Vec<String>,
    /// Upper bound on the share of eligible heads proposed per analysis
    pub max_prune_ratio: f64,
    /// Cosine similarity above which two FFN layers are redundant
    pub redundancy_threshold: f64,
    /// FFN sparsity above which a layer is flagged redundant on its own
    pub high_sparsity_threshold: f64,
    pub fragmentation_penalty: f64,
    /// Observed vocabulary share below which embedding compression is suggested
    pub embedding_coverage_threshold: f64,
}

fn default_always_keep() -> Vec<String> {
    vec![r"^L0\.".to_string(), r"^OUT$".to_string(), r"^EMB$".to_string()]
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            prune_threshold: 0.15,
            utilization_weight: 0.7,
            structural_weight: 0.3,
            always_keep: default_always_keep(),
            max_prune_ratio: 0.40,
            redundancy_threshold: 0.95,
            high_sparsity_threshold: 0.70,
            fragmentation_penalty: 0.5,
            embedding_coverage_threshold: 0.5,
        }
    }
}

/// Evolution engine settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvolutionConfig {
    /// Analyses riskier than this are rejected before mutation
    pub risk_ceiling: f64,
    /// Share of structural components one cycle may touch
    pub max_mutation_fraction: f64,
    /// Number of prefix plans scored per cycle
    pub max_plan_candidates: usize,
    pub enable_quantization: bool,
    pub quantize_to: crate::artifact::Precision,
    pub enable_embedding_compression: bool,
    pub compression_rank: u32,
    /// Minimum seconds between cycles; 0 disables the cooldown
    pub cooldown_secs: u64,
    /// Upper bound on the distillation rescale factor
    pub max_distill_gain: f64,
}

impl Default for EvolutionConfig {
    fn default() -> Self {
        Self {
            risk_ceiling: 0.6,
            max_mutation_fraction: 0.25,
            max_plan_candidates: 5,
            enable_quantization: false,
            quantize_to: crate::artifact::Precision::F16,
            enable_embedding_compression: false,
            compression_rank: 16,
            cooldown_secs: 0,
            max_distill_gain: 1.5,
        }
    }
}

/// PASS/FAIL criteria of the validation battery.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationThresholds {
    pub max_accuracy_drop_pct: f64,
    pub max_hallucination_rate: f64,
    pub max_latency_regression_pct: f64,
    pub min_similarity: f64,
}

impl Default for ValidationThresholds {
    fn default() -> Self {
        Self {
            max_accuracy_drop_pct: 2.0,
            max_hallucination_rate: 0.05,
            max_latency_regression_pct: 10.0,
            min_similarity: 0.0,
        }
    }
}

/// Validation sandbox settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    #[serde(flatten)]
    pub thresholds: ValidationThresholds,
    /// Per-check timeout; a timed-out check is a FAIL
    pub timeout_ms: u64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            thresholds: ValidationThresholds::default(),
            timeout_ms: 30_000,
        }
    }
}

/// Drift detector settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriftConfig {
    pub window_size: usize,
    pub threshold: f64,
    pub embedding_weight: f64,
    pub vocabulary_weight: f64,
    pub variance_weight: f64,
    /// Number of recent embeddings the intent-variance term looks at
    pub variance_span: usize,
    pub history_capacity: usize,
}

impl Default for DriftConfig {
    fn default() -> Self {
        Self {
            window_size: 20,
            threshold: 0.35,
            embedding_weight: 0.6,
            vocabulary_weight: 0.3,
            variance_weight: 0.1,
            variance_span: 5,
            history_capacity: 500,
        }
    }
}

/// Governance settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernanceConfig {
    /// Freeze a new drift reference after each approval
    pub rebaseline_on_approve: bool,
    /// Default page size for audit queries
    pub audit_limit: usize,
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        Self {
            rebaseline_on_approve: true,
            audit_limit: 50,
        }
    }
}
