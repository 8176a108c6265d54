//! evoloop core data models.
//!
//! This crate defines the data structures shared by every stage of the
//! self-evolution loop: telemetry, usage profiles, structural analyses,
//! mutation plans, model artifacts, validation reports, registry versions,
//! drift samples, audit entries and the controller configuration.

#![warn(missing_docs)]

// Identities
mod id;
mod component;

// Observation
mod telemetry;
mod profile;
mod analysis;

// Evolution
mod artifact;
mod mutation;
mod candidate;
mod validation;
mod version;

// Governance
mod drift;
mod audit;

pub mod config;

// Re-exports
pub use id::*;
pub use component::{ComponentId, HeadId, ParseComponentError};

pub use telemetry::{EmbeddingStats, FfnStats, HeadStats, StructuralSnapshot, TelemetryRecord};
pub use profile::{TelemetrySummary, TokenFrequencies, UsageProfile};
pub use analysis::{
    AnalysisConstraints, RedundantPair, RewiringKind, RewiringRecommendation, StructuralAnalysis,
};

pub use artifact::{l2_norm, AttentionHead, EmbeddingSpec, FeedForward, Layer, ModelArtifact, Precision};
pub use mutation::Mutation;
pub use candidate::{DistillationReport, EvolutionCandidate};
pub use validation::{Measurements, ValidationReport, Verdict};
pub use version::ModelVersion;

pub use drift::{DriftComponents, DriftSample};
pub use audit::{AuditAction, AuditEntry, AuditRecord, GENESIS_HASH};

pub use config::{ConfigError, ControllerConfig, ValidationThresholds};

/// Timestamp type
pub type Time = chrono::DateTime<chrono::Utc>;
