//! Storage trait abstraction.

use async_trait::async_trait;
use evoloop_core::{
    AuditEntry, ModelArtifact, ModelVersion, StructuralSnapshot, TelemetryRecord, VersionId,
};

/// Error type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Item not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Write would overwrite an append-only record
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Durable backing store for the registry, audit log and telemetry.
///
/// Versions and audit entries are append-only: implementations must refuse
/// to overwrite an existing version and must never rewrite audit entries.
/// Methods take `&self` so a single store can be shared behind an `Arc`.
#[async_trait]
pub trait Storage: Send + Sync {
    // === Registry ===

    /// Persist a new version. Fails if the id is already taken.
    async fn save_version(&self, version: &ModelVersion) -> Result<()>;

    /// Load a version by id.
    async fn load_version(&self, id: VersionId) -> Result<Option<ModelVersion>>;

    /// All versions, ascending by id.
    async fn list_versions(&self) -> Result<Vec<ModelVersion>>;

    /// Persist an artifact under its content digest.
    async fn save_artifact(&self, digest: &str, artifact: &ModelArtifact) -> Result<()>;

    /// Load an artifact by digest.
    async fn load_artifact(&self, digest: &str) -> Result<Option<ModelArtifact>>;

    /// Durably record the active version.
    async fn save_active(&self, id: VersionId) -> Result<()>;

    /// Load the recorded active version.
    async fn load_active(&self) -> Result<Option<VersionId>>;

    // === Audit ===

    /// Append one audit entry.
    async fn append_audit(&self, entry: &AuditEntry) -> Result<()>;

    /// All audit entries in append order.
    async fn list_audit(&self) -> Result<Vec<AuditEntry>>;

    // === Telemetry ===

    /// Append telemetry records.
    async fn append_telemetry(&self, records: &[TelemetryRecord]) -> Result<()>;

    /// All telemetry records in append order.
    async fn load_telemetry(&self) -> Result<Vec<TelemetryRecord>>;

    /// Replace the latest structural snapshot.
    async fn save_snapshot(&self, snapshot: &StructuralSnapshot) -> Result<()>;

    /// Load the latest structural snapshot.
    async fn load_snapshot(&self) -> Result<Option<StructuralSnapshot>>;
}
