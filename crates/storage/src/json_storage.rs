//! JSON file storage implementation.
//!
//! Layout under the root directory:
//!
//! ```text
//! versions/<n>.json       one file per registry version
//! artifacts/<digest>.json model artifacts, content-addressed
//! active.json             active version pointer
//! audit.jsonl             audit log, one entry per line
//! telemetry.jsonl         telemetry records, one per line
//! snapshot.json           latest structural snapshot
//! ```
//!
//! Whole-object writes go to a temp file first and are renamed into place,
//! so readers never observe a half-written file.

use std::path::{Path, PathBuf};

use evoloop_core::{
    AuditEntry, ModelArtifact, ModelVersion, StructuralSnapshot, TelemetryRecord, VersionId,
};
use serde::{de::DeserializeOwned, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use super::{Result, Storage, StorageError};

/// File-based JSON storage backend.
pub struct JsonStorage {
    root: PathBuf,
    /// Serializes appends to the JSON-lines files
    append_lock: Mutex<()>,
}

impl JsonStorage {
    /// Open (creating if needed) storage rooted at `root`.
    pub async fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        fs::create_dir_all(root.join("versions")).await?;
        fs::create_dir_all(root.join("artifacts")).await?;

        Ok(Self {
            root,
            append_lock: Mutex::new(()),
        })
    }

    /// Root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn version_path(&self, id: VersionId) -> PathBuf {
        self.root.join("versions").join(format!("{}.json", id.0))
    }

    fn artifact_path(&self, digest: &str) -> PathBuf {
        self.root.join("artifacts").join(format!("{}.json", digest))
    }

    fn active_path(&self) -> PathBuf {
        self.root.join("active.json")
    }

    fn audit_path(&self) -> PathBuf {
        self.root.join("audit.jsonl")
    }

    fn telemetry_path(&self) -> PathBuf {
        self.root.join("telemetry.jsonl")
    }

    fn snapshot_path(&self) -> PathBuf {
        self.root.join("snapshot.json")
    }

    async fn append_lines<T: Serialize>(&self, path: &Path, items: &[T]) -> Result<()> {
        let mut buf = Vec::new();
        for item in items {
            serde_json::to_writer(&mut buf, item)?;
            buf.push(b'\n');
        }

        let _guard = self.append_lock.lock().await;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(&buf).await?;
        file.sync_data().await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl Storage for JsonStorage {
    async fn save_version(&self, version: &ModelVersion) -> Result<()> {
        let path = self.version_path(version.id);
        if fs::try_exists(&path).await? {
            return Err(StorageError::AlreadyExists(format!("version {}", version.id)));
        }
        write_atomic(&path, version).await?;
        debug!("Saved version {} to {}", version.id, path.display());
        Ok(())
    }

    async fn load_version(&self, id: VersionId) -> Result<Option<ModelVersion>> {
        read_json(&self.version_path(id)).await
    }

    async fn list_versions(&self) -> Result<Vec<ModelVersion>> {
        let mut versions: Vec<ModelVersion> = list_dir(&self.root.join("versions")).await?;
        versions.sort_by_key(|v| v.id);
        Ok(versions)
    }

    async fn save_artifact(&self, digest: &str, artifact: &ModelArtifact) -> Result<()> {
        let path = self.artifact_path(digest);
        // Content-addressed: an existing file already holds these bytes.
        if fs::try_exists(&path).await? {
            return Ok(());
        }
        write_atomic(&path, artifact).await
    }

    async fn load_artifact(&self, digest: &str) -> Result<Option<ModelArtifact>> {
        read_json(&self.artifact_path(digest)).await
    }

    async fn save_active(&self, id: VersionId) -> Result<()> {
        write_atomic(&self.active_path(), &id).await
    }

    async fn load_active(&self) -> Result<Option<VersionId>> {
        read_json(&self.active_path()).await
    }

    async fn append_audit(&self, entry: &AuditEntry) -> Result<()> {
        self.append_lines(&self.audit_path(), std::slice::from_ref(entry))
            .await
    }

    async fn list_audit(&self) -> Result<Vec<AuditEntry>> {
        read_lines(&self.audit_path()).await
    }

    async fn append_telemetry(&self, records: &[TelemetryRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        self.append_lines(&self.telemetry_path(), records).await
    }

    async fn load_telemetry(&self) -> Result<Vec<TelemetryRecord>> {
        read_lines(&self.telemetry_path()).await
    }

    async fn save_snapshot(&self, snapshot: &StructuralSnapshot) -> Result<()> {
        write_atomic(&self.snapshot_path(), snapshot).await
    }

    async fn load_snapshot(&self) -> Result<Option<StructuralSnapshot>> {
        read_json(&self.snapshot_path()).await
    }
}

async fn write_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_vec_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    let mut file = fs::File::create(&tmp).await?;
    file.write_all(&json).await?;
    file.sync_all().await?;
    drop(file);
    fs::rename(&tmp, path).await?;
    Ok(())
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match fs::read_to_string(path).await {
        Ok(json) => {
            let value = serde_json::from_str(&json)?;
            Ok(Some(value))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn read_lines<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let content = match fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).map_err(StorageError::from))
        .collect()
}

async fn list_dir<T: DeserializeOwned>(dir: &Path) -> Result<Vec<T>> {
    let mut items = Vec::new();
    let mut rd = fs::read_dir(dir).await?;
    while let Some(entry) = rd.next_entry().await? {
        if entry.path().extension().and_then(|s| s.to_str()) != Some("json") {
            continue;
        }
        if let Some(item) = read_json(&entry.path()).await? {
            items.push(item);
        }
    }
    Ok(items)
}
