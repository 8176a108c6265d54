//! Append-only, hash-chained audit log.

use std::sync::Arc;

use evoloop_core::{AuditEntry, AuditRecord, GENESIS_HASH};
use evoloop_storage::Storage;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{GovernanceError, Result};

struct Tail {
    next_seq: u64,
    hash: String,
}

/// Audit log backed by [`Storage`].
///
/// Appends are serialized so sequence numbers and hash links never fork.
pub struct AuditLog {
    storage: Arc<dyn Storage>,
    tail: Mutex<Tail>,
}

impl AuditLog {
    /// Open the log, resuming after the last stored entry.
    pub async fn open(storage: Arc<dyn Storage>) -> Result<Self> {
        let entries = storage.list_audit().await?;
        let tail = match entries.last() {
            Some(last) => Tail {
                next_seq: last.seq + 1,
                hash: last.hash.clone(),
            },
            None => Tail {
                next_seq: 0,
                hash: GENESIS_HASH.to_string(),
            },
        };
        debug!("Opened audit log at seq {}", tail.next_seq);
        Ok(Self {
            storage,
            tail: Mutex::new(tail),
        })
    }

    /// Seal and persist a record.
    pub async fn append(&self, record: AuditRecord) -> Result<AuditEntry> {
        let mut tail = self.tail.lock().await;
        let entry = AuditEntry::seal(record, tail.next_seq, tail.hash.clone());
        self.storage.append_audit(&entry).await?;
        tail.next_seq += 1;
        tail.hash = entry.hash.clone();

        info!(
            "Audit #{} {} [{}] {}: {}",
            entry.seq,
            entry.action,
            entry.status,
            entry
                .version
                .map(|v| v.to_string())
                .unwrap_or_else(|| "-".to_string()),
            entry.reason
        );
        Ok(entry)
    }

    /// Most recent entries, newest first.
    pub async fn list(&self, limit: usize) -> Result<Vec<AuditEntry>> {
        let mut entries = self.storage.list_audit().await?;
        entries.reverse();
        entries.truncate(limit);
        Ok(entries)
    }

    /// Number of stored entries.
    pub async fn len(&self) -> u64 {
        self.tail.lock().await.next_seq
    }

    /// Check every hash and link; returns the number of entries verified.
    pub async fn verify(&self) -> Result<usize> {
        let entries = self.storage.list_audit().await?;
        let mut prev = GENESIS_HASH.to_string();
        for (i, entry) in entries.iter().enumerate() {
            if entry.seq != i as u64 {
                return Err(GovernanceError::AuditChainBroken {
                    seq: entry.seq,
                    reason: format!("expected seq {}", i),
                });
            }
            if entry.prev_hash != prev {
                return Err(GovernanceError::AuditChainBroken {
                    seq: entry.seq,
                    reason: "previous hash mismatch".to_string(),
                });
            }
            if !entry.is_intact() {
                return Err(GovernanceError::AuditChainBroken {
                    seq: entry.seq,
                    reason: "content hash mismatch".to_string(),
                });
            }
            prev = entry.hash.clone();
        }
        Ok(entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evoloop_core::{AuditAction, VersionId};
    use evoloop_storage::{JsonStorage, MemoryStorage};

    fn record(action: AuditAction, status: &str) -> AuditRecord {
        AuditRecord::new(action, Some(VersionId::ROOT), "test", status, "reason")
    }

    #[tokio::test]
    async fn test_append_links_entries() {
        let log = AuditLog::open(Arc::new(MemoryStorage::new())).await.unwrap();
        let a = log.append(record(AuditAction::Evolve, "STARTED")).await.unwrap();
        let b = log.append(record(AuditAction::Reject, "REJECTED")).await.unwrap();

        assert_eq!(a.seq, 0);
        assert_eq!(a.prev_hash, GENESIS_HASH);
        assert_eq!(b.seq, 1);
        assert_eq!(b.prev_hash, a.hash);
        assert_eq!(log.verify().await.unwrap(), 2);

        let newest = log.list(1).await.unwrap();
        assert_eq!(newest.len(), 1);
        assert_eq!(newest[0].action, AuditAction::Reject);
    }

    #[tokio::test]
    async fn test_reopen_continues_chain() {
        let dir = tempfile::tempdir().unwrap();
        let storage: Arc<dyn Storage> = Arc::new(JsonStorage::new(dir.path()).await.unwrap());

        let first = {
            let log = AuditLog::open(Arc::clone(&storage)).await.unwrap();
            log.append(record(AuditAction::Approve, "OK")).await.unwrap()
        };

        let log = AuditLog::open(storage).await.unwrap();
        let second = log.append(record(AuditAction::Rollback, "OK")).await.unwrap();
        assert_eq!(second.seq, 1);
        assert_eq!(second.prev_hash, first.hash);
        assert_eq!(log.verify().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_verify_detects_tampering() {
        let storage = Arc::new(MemoryStorage::new());
        let log = AuditLog::open(storage.clone()).await.unwrap();
        log.append(record(AuditAction::Approve, "OK")).await.unwrap();

        let mut forged = AuditEntry::seal(record(AuditAction::Approve, "OK"), 1, "not-the-tail");
        forged.reason = "forged".to_string();
        storage.append_audit(&forged).await.unwrap();

        assert!(matches!(
            log.verify().await,
            Err(GovernanceError::AuditChainBroken { seq: 1, .. })
        ));
    }
}
