//! Registry implementation.

use std::sync::Arc;

use arc_swap::ArcSwap;
use evoloop_core::{
    CandidateId, EvolutionCandidate, ModelArtifact, ModelVersion, ValidationReport, VersionId,
};
use evoloop_storage::{Storage, StorageError};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info};

/// Result type for registry operations.
pub type Result<T> = std::result::Result<T, RegistryError>;

/// Registry errors.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Backing store failed
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// No such version
    #[error("Version not found: {0}")]
    NotFound(VersionId),

    /// Only PASS versions can be registered or activated
    #[error("Version {0} did not pass validation")]
    NotPassing(String),

    /// Candidate names a parent that is not in the ledger
    #[error("Parent version {0} does not exist")]
    ParentMissing(VersionId),

    /// Report belongs to a different candidate
    #[error("Report for candidate {report} attached to candidate {candidate}")]
    ReportMismatch {
        /// Candidate the report was produced for
        report: CandidateId,
        /// Candidate being registered
        candidate: CandidateId,
    },

    /// Storage holds no versions
    #[error("Registry is not initialized")]
    NotInitialized,

    /// Artifact for a version is missing from storage
    #[error("Artifact for version {0} is missing")]
    ArtifactMissing(VersionId),

    /// Parent links do not lead back to the root
    #[error("Lineage of {0} is corrupt")]
    CorruptLineage(VersionId),
}

/// Registry overview.
#[derive(Debug, Clone, Serialize)]
pub struct RegistrySummary {
    pub total_versions: usize,
    pub active: VersionId,
    pub latest: VersionId,
    pub latest_compression_ratio: f64,
    pub latest_accuracy_drop_pct: f64,
}

/// Append-only model registry with an atomically swapped active pointer.
///
/// `active()` never takes a lock. `register` and `set_active` are serialized
/// by a short mutex and persist before they publish, so a reader can never
/// observe a version or pointer that is not durably recorded.
pub struct ModelRegistry {
    storage: Arc<dyn Storage>,
    ledger: RwLock<Vec<Arc<ModelVersion>>>,
    active: ArcSwap<ModelVersion>,
    write_lock: Mutex<()>,
    active_tx: watch::Sender<Arc<ModelVersion>>,
}

impl ModelRegistry {
    /// Open an existing registry.
    pub async fn open(storage: Arc<dyn Storage>) -> Result<Self> {
        let versions: Vec<Arc<ModelVersion>> = storage
            .list_versions()
            .await?
            .into_iter()
            .map(Arc::new)
            .collect();
        if versions.is_empty() {
            return Err(RegistryError::NotInitialized);
        }

        let active_id = storage.load_active().await?.unwrap_or(VersionId::ROOT);
        let active = versions
            .iter()
            .find(|v| v.id == active_id)
            .cloned()
            .ok_or(RegistryError::NotFound(active_id))?;
        if !active.is_servable() {
            return Err(RegistryError::NotPassing(active_id.to_string()));
        }

        info!(
            "Opened registry with {} versions, active {}",
            versions.len(),
            active.id
        );

        let (active_tx, _) = watch::channel(Arc::clone(&active));
        Ok(Self {
            storage,
            ledger: RwLock::new(versions),
            active: ArcSwap::new(active),
            write_lock: Mutex::new(()),
            active_tx,
        })
    }

    /// Open the registry, registering `base` as the root if storage is empty.
    pub async fn bootstrap(storage: Arc<dyn Storage>, base: &ModelArtifact) -> Result<Self> {
        if !storage.list_versions().await?.is_empty() {
            return Self::open(storage).await;
        }

        let digest = base.digest();
        storage.save_artifact(&digest, base).await?;
        let root = ModelVersion {
            id: VersionId::ROOT,
            parent: None,
            optimizations: Vec::new(),
            compression_ratio: 1.0,
            accuracy_drop_pct: 0.0,
            parameters: base.parameter_count(),
            size_bytes: base.size_bytes(),
            artifact_digest: digest,
            validation: ValidationReport::baseline(CandidateId::new()),
            trigger: "bootstrap".to_string(),
            created_at: chrono::Utc::now(),
        };
        storage.save_version(&root).await?;
        storage.save_active(VersionId::ROOT).await?;
        info!("Registered base model {} as {}", base.name, root.id);

        Self::open(storage).await
    }

    /// Register a validated candidate as a new version.
    ///
    /// The version is persisted before it becomes visible. It does not
    /// become active; call [`set_active`](Self::set_active) for that.
    pub async fn register(
        &self,
        candidate: &EvolutionCandidate,
        report: ValidationReport,
        trigger: &str,
    ) -> Result<Arc<ModelVersion>> {
        if report.candidate_id != candidate.id {
            return Err(RegistryError::ReportMismatch {
                report: report.candidate_id,
                candidate: candidate.id,
            });
        }
        if !report.passed() {
            return Err(RegistryError::NotPassing(format!("candidate {}", candidate.id)));
        }

        let _guard = self.write_lock.lock().await;

        let id = {
            let ledger = self.ledger.read();
            if !ledger.iter().any(|v| v.id == candidate.parent) {
                return Err(RegistryError::ParentMissing(candidate.parent));
            }
            ledger.last().map(|v| v.id.next()).unwrap_or(VersionId::ROOT)
        };

        let digest = candidate.artifact.digest();
        self.storage.save_artifact(&digest, &candidate.artifact).await?;

        let version = ModelVersion {
            id,
            parent: Some(candidate.parent),
            optimizations: candidate.plan.clone(),
            compression_ratio: candidate.compression_ratio,
            accuracy_drop_pct: report.accuracy_drop_pct,
            parameters: candidate.artifact.parameter_count(),
            size_bytes: candidate.artifact.size_bytes(),
            artifact_digest: digest,
            validation: report,
            trigger: trigger.to_string(),
            created_at: chrono::Utc::now(),
        };
        self.storage.save_version(&version).await?;

        let version = Arc::new(version);
        self.ledger.write().push(Arc::clone(&version));
        info!(
            "Registered {} (parent {}, {} mutations, ratio {:.3})",
            version.id,
            candidate.parent,
            version.optimizations.len(),
            version.compression_ratio
        );
        Ok(version)
    }

    /// Make a PASS version the active one.
    ///
    /// The pointer is persisted first; on success the swap is published to
    /// readers and subscribers.
    pub async fn set_active(&self, id: VersionId) -> Result<Arc<ModelVersion>> {
        let version = self.get(id).ok_or(RegistryError::NotFound(id))?;
        if !version.is_servable() {
            return Err(RegistryError::NotPassing(id.to_string()));
        }

        let _guard = self.write_lock.lock().await;
        self.storage.save_active(id).await?;
        let previous = self.active.swap(Arc::clone(&version));
        self.active_tx.send_replace(Arc::clone(&version));

        info!("Active version {} -> {}", previous.id, version.id);
        Ok(version)
    }

    /// Currently active version.
    pub fn active(&self) -> Arc<ModelVersion> {
        self.active.load_full()
    }

    /// Receive every future change of the active version.
    pub fn subscribe_active(&self) -> watch::Receiver<Arc<ModelVersion>> {
        self.active_tx.subscribe()
    }

    /// Look up a version.
    pub fn get(&self, id: VersionId) -> Option<Arc<ModelVersion>> {
        let ledger = self.ledger.read();
        ledger
            .binary_search_by_key(&id, |v| v.id)
            .ok()
            .map(|i| Arc::clone(&ledger[i]))
    }

    /// All versions, oldest first.
    pub fn list(&self) -> Vec<Arc<ModelVersion>> {
        self.ledger.read().clone()
    }

    /// Number of registered versions.
    pub fn len(&self) -> usize {
        self.ledger.read().len()
    }

    /// Whether the ledger is empty (never true once opened).
    pub fn is_empty(&self) -> bool {
        self.ledger.read().is_empty()
    }

    /// Walk from `id` to the root, `id` first.
    ///
    /// Bounded by the ledger size, so a corrupt parent link cannot loop.
    pub fn lineage(&self, id: VersionId) -> Result<Vec<Arc<ModelVersion>>> {
        let limit = self.len();
        let mut chain = Vec::new();
        let mut cursor = Some(id);

        while let Some(current) = cursor {
            if chain.len() >= limit {
                return Err(RegistryError::CorruptLineage(id));
            }
            let version = self.get(current).ok_or(RegistryError::NotFound(current))?;
            if let Some(parent) = version.parent {
                if parent >= version.id {
                    return Err(RegistryError::CorruptLineage(id));
                }
            }
            cursor = version.parent;
            chain.push(version);
        }

        debug!("Lineage of {}: {} versions", id, chain.len());
        Ok(chain)
    }

    /// Load the artifact of a version.
    pub async fn artifact(&self, id: VersionId) -> Result<ModelArtifact> {
        let version = self.get(id).ok_or(RegistryError::NotFound(id))?;
        self.storage
            .load_artifact(&version.artifact_digest)
            .await?
            .ok_or(RegistryError::ArtifactMissing(id))
    }

    /// Counts and the latest version's headline numbers.
    pub fn summary(&self) -> RegistrySummary {
        let ledger = self.ledger.read();
        let active = self.active.load().id;
        match ledger.last() {
            Some(latest) => RegistrySummary {
                total_versions: ledger.len(),
                active,
                latest: latest.id,
                latest_compression_ratio: latest.compression_ratio,
                latest_accuracy_drop_pct: latest.accuracy_drop_pct,
            },
            None => RegistrySummary {
                total_versions: 0,
                active,
                latest: active,
                latest_compression_ratio: 1.0,
                latest_accuracy_drop_pct: 0.0,
            },
        }
    }
}
