//! Audit trail entries.
//!
//! Entries form a SHA-256 chain: each entry stores the hash of its
//! predecessor, and its own hash covers every other field. Rewriting any
//! entry breaks every link after it.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::id::{AuditId, VersionId};
use crate::Time;

/// Hash used as `prev_hash` of the first entry.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Kind of governance action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    Evolve,
    Approve,
    Reject,
    Rollback,
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AuditAction::Evolve => "EVOLVE",
            AuditAction::Approve => "APPROVE",
            AuditAction::Reject => "REJECT",
            AuditAction::Rollback => "ROLLBACK",
        };
        f.write_str(s)
    }
}

/// One immutable audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: AuditId,
    /// Position in the log, starting at 0
    pub seq: u64,
    pub action: AuditAction,
    pub version: Option<VersionId>,
    pub triggered_by: String,
    /// Outcome label, e.g. `STARTED`, `OK`, `NO_BACKUP`
    pub status: String,
    pub reason: String,
    pub timestamp: Time,
    pub prev_hash: String,
    pub hash: String,
}

/// Fields of an entry before it is placed in the chain.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditRecord {
    pub action: AuditAction,
    pub version: Option<VersionId>,
    pub triggered_by: String,
    pub status: String,
    pub reason: String,
}

impl AuditRecord {
    /// Create a record.
    pub fn new(
        action: AuditAction,
        version: Option<VersionId>,
        triggered_by: impl Into<String>,
        status: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            action,
            version,
            triggered_by: triggered_by.into(),
            status: status.into(),
            reason: reason.into(),
        }
    }
}

impl AuditEntry {
    /// Seal a record as entry `seq`, chained after `prev_hash`.
    pub fn seal(record: AuditRecord, seq: u64, prev_hash: impl Into<String>) -> Self {
        let mut entry = Self {
            id: AuditId::new(),
            seq,
            action: record.action,
            version: record.version,
            triggered_by: record.triggered_by,
            status: record.status,
            reason: record.reason,
            timestamp: chrono::Utc::now(),
            prev_hash: prev_hash.into(),
            hash: String::new(),
        };
        entry.hash = entry.compute_hash();
        entry
    }

    /// Hash over every field except `hash` itself.
    pub fn compute_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.id.to_string());
        hasher.update(self.seq.to_le_bytes());
        hasher.update(self.action.to_string());
        match self.version {
            Some(v) => hasher.update(v.0.to_le_bytes()),
            None => hasher.update(b"-"),
        }
        for field in [&self.triggered_by, &self.status, &self.reason] {
            hasher.update((field.len() as u64).to_le_bytes());
            hasher.update(field.as_bytes());
        }
        hasher.update(self.timestamp.to_rfc3339());
        hasher.update(&self.prev_hash);
        hex::encode(hasher.finalize())
    }

    /// Whether the stored hash matches the content.
    pub fn is_intact(&self) -> bool {
        self.hash == self.compute_hash()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> AuditRecord {
        AuditRecord::new(AuditAction::Approve, Some(VersionId(1)), "test", "OK", "promoted")
    }

    #[test]
    fn test_seal_is_intact() {
        let entry = AuditEntry::seal(record(), 0, GENESIS_HASH);
        assert!(entry.is_intact());
        assert_eq!(entry.prev_hash, GENESIS_HASH);
    }

    #[test]
    fn test_tamper_detected() {
        let mut entry = AuditEntry::seal(record(), 0, GENESIS_HASH);
        entry.reason = "something else".to_string();
        assert!(!entry.is_intact());
    }

    #[test]
    fn test_survives_json() {
        let entry = AuditEntry::seal(record(), 3, "abc");
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"APPROVE\""));
        let back: AuditEntry = serde_json::from_str(&json).unwrap();
        assert!(back.is_intact());
    }
}
