//! Evolution errors.

use evoloop_core::ConfigError;
use evoloop_governance::GovernanceError;
use evoloop_registry::RegistryError;
use evoloop_telemetry::TelemetryError;

use crate::cycle::CycleStage;
use crate::mutate::MutationError;

/// Result type for evolution operations.
pub type Result<T> = std::result::Result<T, EvolutionError>;

/// Errors that end a cycle in the `Error` state.
#[derive(Debug, thiserror::Error)]
pub enum EvolutionError {
    /// Configuration rejected
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Telemetry could not be read
    #[error("Telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),

    /// Plan could not be applied
    #[error("Mutation failed: {0}")]
    Mutation(#[from] MutationError),

    /// Registry failure
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Governance failure
    #[error("Governance error: {0}")]
    Governance(#[from] GovernanceError),

    /// Blocking work panicked or was cancelled
    #[error("Task failed: {0}")]
    Task(String),

    /// State machine misuse
    #[error("Illegal cycle transition {from:?} -> {to:?}")]
    IllegalStage {
        /// Current stage
        from: CycleStage,
        /// Requested stage
        to: CycleStage,
    },
}
