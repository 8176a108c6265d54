//! Governance for evoloop.
//!
//! The governance manager is the only component that promotes a candidate,
//! rolls back the active version, or writes to the audit log.

#![warn(missing_docs)]

pub mod audit;
pub mod error;
pub mod manager;
pub mod proposal;

pub use audit::AuditLog;
pub use error::{GovernanceError, Result};
pub use manager::{Conflict, Decision, GovernanceManager, GovernanceSummary, RollbackOutcome};
pub use proposal::{Proposal, ProposalState};
