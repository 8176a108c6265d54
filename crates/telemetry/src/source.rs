//! Telemetry source abstraction.

use async_trait::async_trait;
use evoloop_core::{StructuralSnapshot, TelemetryRecord, Time};
use evoloop_storage::StorageError;
use serde::{Deserialize, Serialize};

/// Result type for telemetry operations.
pub type Result<T> = std::result::Result<T, TelemetryError>;

/// Telemetry errors.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// Backing store failed
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Source cannot serve requests
    #[error("Telemetry source unavailable: {0}")]
    Unavailable(String),
}

/// Which records a profiling run looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowSpec {
    /// The most recent `n` records
    LastN(usize),
    /// Records at or after a timestamp
    Since(Time),
    /// Everything retained
    #[default]
    All,
}

/// Read side of the telemetry store consumed by the controller.
///
/// The capture hooks inside the serving process write to whatever store
/// implements this; the controller only reads.
#[async_trait]
pub trait TelemetrySource: Send + Sync {
    /// Records in the requested window, oldest first.
    async fn window(&self, spec: WindowSpec) -> Result<Vec<TelemetryRecord>>;

    /// Most recent structural snapshot, if any was taken.
    async fn latest_snapshot(&self) -> Result<Option<StructuralSnapshot>>;
}
