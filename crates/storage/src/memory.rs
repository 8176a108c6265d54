//! In-memory storage for tests and ephemeral runs.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use evoloop_core::{
    AuditEntry, ModelArtifact, ModelVersion, StructuralSnapshot, TelemetryRecord, VersionId,
};
use tokio::sync::RwLock;

use super::{Result, Storage, StorageError};

#[derive(Default)]
struct Inner {
    versions: BTreeMap<VersionId, ModelVersion>,
    artifacts: HashMap<String, ModelArtifact>,
    active: Option<VersionId>,
    audit: Vec<AuditEntry>,
    telemetry: Vec<TelemetryRecord>,
    snapshot: Option<StructuralSnapshot>,
}

/// Volatile storage backend.
#[derive(Default)]
pub struct MemoryStorage {
    inner: RwLock<Inner>,
}

impl MemoryStorage {
    /// Create empty storage.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn save_version(&self, version: &ModelVersion) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.versions.contains_key(&version.id) {
            return Err(StorageError::AlreadyExists(format!("version {}", version.id)));
        }
        inner.versions.insert(version.id, version.clone());
        Ok(())
    }

    async fn load_version(&self, id: VersionId) -> Result<Option<ModelVersion>> {
        Ok(self.inner.read().await.versions.get(&id).cloned())
    }

    async fn list_versions(&self) -> Result<Vec<ModelVersion>> {
        Ok(self.inner.read().await.versions.values().cloned().collect())
    }

    async fn save_artifact(&self, digest: &str, artifact: &ModelArtifact) -> Result<()> {
        self.inner
            .write()
            .await
            .artifacts
            .entry(digest.to_string())
            .or_insert_with(|| artifact.clone());
        Ok(())
    }

    async fn load_artifact(&self, digest: &str) -> Result<Option<ModelArtifact>> {
        Ok(self.inner.read().await.artifacts.get(digest).cloned())
    }

    async fn save_active(&self, id: VersionId) -> Result<()> {
        self.inner.write().await.active = Some(id);
        Ok(())
    }

    async fn load_active(&self) -> Result<Option<VersionId>> {
        Ok(self.inner.read().await.active)
    }

    async fn append_audit(&self, entry: &AuditEntry) -> Result<()> {
        self.inner.write().await.audit.push(entry.clone());
        Ok(())
    }

    async fn list_audit(&self) -> Result<Vec<AuditEntry>> {
        Ok(self.inner.read().await.audit.clone())
    }

    async fn append_telemetry(&self, records: &[TelemetryRecord]) -> Result<()> {
        self.inner.write().await.telemetry.extend_from_slice(records);
        Ok(())
    }

    async fn load_telemetry(&self) -> Result<Vec<TelemetryRecord>> {
        Ok(self.inner.read().await.telemetry.clone())
    }

    async fn save_snapshot(&self, snapshot: &StructuralSnapshot) -> Result<()> {
        self.inner.write().await.snapshot = Some(snapshot.clone());
        Ok(())
    }

    async fn load_snapshot(&self) -> Result<Option<StructuralSnapshot>> {
        Ok(self.inner.read().await.snapshot.clone())
    }
}
