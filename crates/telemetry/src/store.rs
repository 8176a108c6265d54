//! In-memory telemetry store.

use async_trait::async_trait;
use evoloop_core::{StructuralSnapshot, TelemetryRecord};
use evoloop_storage::Storage;
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::debug;

use crate::source::{Result, TelemetrySource, WindowSpec};

const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Append-only telemetry store with a live feed.
///
/// `append` holds the write lock only for the push, so many writers can
/// ingest concurrently with profilers reading a window.
pub struct InMemoryTelemetryStore {
    records: RwLock<Vec<TelemetryRecord>>,
    snapshot: RwLock<Option<StructuralSnapshot>>,
    feed: broadcast::Sender<TelemetryRecord>,
}

impl Default for InMemoryTelemetryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryTelemetryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create an empty store whose live feed buffers `capacity` records.
    pub fn with_capacity(capacity: usize) -> Self {
        let (feed, _) = broadcast::channel(capacity.max(1));
        Self {
            records: RwLock::new(Vec::new()),
            snapshot: RwLock::new(None),
            feed,
        }
    }

    /// Load everything a storage backend has retained.
    pub async fn from_storage(storage: &dyn Storage) -> Result<Self> {
        let store = Self::new();
        let records = storage.load_telemetry().await?;
        debug!("Loaded {} telemetry records from storage", records.len());
        store.records.write().extend(records);
        if let Some(snapshot) = storage.load_snapshot().await? {
            store.set_snapshot(snapshot);
        }
        Ok(store)
    }

    /// Append one record and publish it to subscribers.
    pub fn append(&self, record: TelemetryRecord) {
        self.records.write().push(record.clone());
        // No subscribers is fine.
        let _ = self.feed.send(record);
    }

    /// Append several records.
    pub fn extend(&self, records: impl IntoIterator<Item = TelemetryRecord>) {
        for record in records {
            self.append(record);
        }
    }

    /// Replace the latest structural snapshot.
    pub fn set_snapshot(&self, snapshot: StructuralSnapshot) {
        *self.snapshot.write() = Some(snapshot);
    }

    /// Live feed of newly appended records.
    pub fn subscribe(&self) -> broadcast::Receiver<TelemetryRecord> {
        self.feed.subscribe()
    }

    /// Number of retained records.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Whether no records were appended yet.
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[async_trait]
impl TelemetrySource for InMemoryTelemetryStore {
    async fn window(&self, spec: WindowSpec) -> Result<Vec<TelemetryRecord>> {
        let records = self.records.read();
        let selected = match spec {
            WindowSpec::All => records.clone(),
            WindowSpec::LastN(n) => {
                let start = records.len().saturating_sub(n);
                records[start..].to_vec()
            }
            WindowSpec::Since(t) => records.iter().filter(|r| r.timestamp >= t).cloned().collect(),
        };
        Ok(selected)
    }

    async fn latest_snapshot(&self) -> Result<Option<StructuralSnapshot>> {
        Ok(self.snapshot.read().clone())
    }
}
