//! Promotion proposals.

use serde::Serialize;

use evoloop_core::{CandidateId, Time, VersionId};

use crate::error::{GovernanceError, Result};

/// Lifecycle of a proposal. `Approved` and `Rejected` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProposalState {
    /// Awaiting a decision
    Pending,
    /// Promoted into the registry
    Approved,
    /// Declined; `reason` says why
    Rejected,
}

impl ProposalState {
    /// Whether no further transition is allowed.
    pub fn is_terminal(self) -> bool {
        !matches!(self, ProposalState::Pending)
    }
}

/// One candidate's request for promotion.
#[derive(Debug, Clone, Serialize)]
pub struct Proposal {
    /// Candidate under review
    pub candidate_id: CandidateId,
    /// Version the candidate was derived from
    pub parent: VersionId,
    /// Current lifecycle state
    pub state: ProposalState,
    /// Rejection reason
    pub reason: Option<String>,
    /// When the proposal was opened
    pub created_at: Time,
    /// When it reached a terminal state
    pub decided_at: Option<Time>,
}

impl Proposal {
    /// Open a pending proposal.
    pub fn new(candidate_id: CandidateId, parent: VersionId) -> Self {
        Self {
            candidate_id,
            parent,
            state: ProposalState::Pending,
            reason: None,
            created_at: chrono::Utc::now(),
            decided_at: None,
        }
    }

    /// Pending -> Approved.
    pub fn approve(&mut self) -> Result<()> {
        self.transition(ProposalState::Approved)
    }

    /// Pending -> Rejected.
    pub fn reject(&mut self, reason: impl Into<String>) -> Result<()> {
        self.transition(ProposalState::Rejected)?;
        self.reason = Some(reason.into());
        Ok(())
    }

    fn transition(&mut self, to: ProposalState) -> Result<()> {
        if self.state.is_terminal() {
            return Err(GovernanceError::IllegalTransition {
                from: self.state,
                to,
            });
        }
        self.state = to;
        self.decided_at = Some(chrono::Utc::now());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_to_approved() {
        let mut p = Proposal::new(CandidateId::new(), VersionId::ROOT);
        p.approve().unwrap();
        assert_eq!(p.state, ProposalState::Approved);
        assert!(p.decided_at.is_some());
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut p = Proposal::new(CandidateId::new(), VersionId::ROOT);
        p.reject("nope").unwrap();
        assert_eq!(p.reason.as_deref(), Some("nope"));
        assert!(matches!(
            p.approve(),
            Err(GovernanceError::IllegalTransition {
                from: ProposalState::Rejected,
                to: ProposalState::Approved
            })
        ));

        let mut p = Proposal::new(CandidateId::new(), VersionId::ROOT);
        p.approve().unwrap();
        assert!(p.reject("late").is_err());
        assert_eq!(p.state, ProposalState::Approved);
        assert!(p.reason.is_none());
    }
}
