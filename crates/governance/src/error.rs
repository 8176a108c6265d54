//! Governance errors.

use evoloop_registry::RegistryError;
use evoloop_storage::StorageError;

use crate::proposal::ProposalState;

/// Result type for governance operations.
pub type Result<T> = std::result::Result<T, GovernanceError>;

/// Governance errors.
#[derive(Debug, thiserror::Error)]
pub enum GovernanceError {
    /// Audit storage failed
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Registry refused an operation
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// A decided proposal was decided again
    #[error("Illegal proposal transition {from:?} -> {to:?}")]
    IllegalTransition {
        /// Current state
        from: ProposalState,
        /// Requested state
        to: ProposalState,
    },

    /// An audit entry does not match its hash or its predecessor
    #[error("Audit chain broken at entry {seq}: {reason}")]
    AuditChainBroken {
        /// Sequence number of the first bad entry
        seq: u64,
        /// What failed
        reason: String,
    },
}
