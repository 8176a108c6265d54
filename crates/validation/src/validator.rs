//! Validator seam used by the evolution engine.

use async_trait::async_trait;
use evoloop_core::{EvolutionCandidate, ModelArtifact, ValidationReport};

/// Result type for validation internals.
pub type Result<T> = std::result::Result<T, ValidationError>;

/// Reasons a candidate could not be evaluated.
///
/// These never escape [`Validator::validate`]; they become FAIL reports.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    /// The model runner returned an error
    #[error("runner error: {0}")]
    Runner(String),

    /// A check did not finish in time
    #[error("{check} check timed out after {timeout_ms}ms")]
    Timeout {
        /// Check name
        check: &'static str,
        /// Configured timeout
        timeout_ms: u64,
    },

    /// The task running a check panicked or was cancelled
    #[error("{check} check aborted: {message}")]
    Aborted {
        /// Check name
        check: &'static str,
        /// Panic or cancellation message
        message: String,
    },

    /// Evaluation set could not be loaded
    #[error("evaluation set error: {0}")]
    EvaluationSet(String),
}

/// Produces a validation report for a candidate against its parent.
///
/// Implementations must always return a report: an evaluation that cannot
/// complete is a FAIL, not an error.
#[async_trait]
pub trait Validator: Send + Sync {
    /// Validate `candidate` against the `parent` artifact it was derived from.
    async fn validate(&self, candidate: &EvolutionCandidate, parent: &ModelArtifact) -> ValidationReport;
}
