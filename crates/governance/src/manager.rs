//! Governance manager: promotion decisions and rollback.

use std::fmt;
use std::sync::Arc;

use evoloop_core::config::GovernanceConfig;
use evoloop_core::{
    AuditAction, AuditEntry, AuditRecord, DriftSample, EvolutionCandidate, ModelVersion,
    ValidationReport, VersionId,
};
use evoloop_drift::DriftDetector;
use evoloop_registry::{ModelRegistry, RegistryError, RegistrySummary};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::audit::AuditLog;
use crate::error::Result;
use crate::proposal::{Proposal, ProposalState};

/// Why a cycle may not proceed to promotion right now.
#[derive(Debug, Clone, PartialEq)]
pub enum Conflict {
    /// Drift flag is raised
    DriftInProgress {
        /// Current score
        score: f64,
        /// Configured threshold
        threshold: f64,
    },
    /// Another promotion or rollback holds the lock
    PromotionInProgress,
    /// Active pointer is no longer the candidate's parent
    ActiveMoved {
        /// Parent the candidate was derived from
        expected: VersionId,
        /// Version active at decision time
        actual: VersionId,
    },
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Conflict::DriftInProgress { score, threshold } => {
                write!(f, "drift in progress: score {:.3} > {:.3}", score, threshold)
            }
            Conflict::PromotionInProgress => write!(f, "promotion already in progress"),
            Conflict::ActiveMoved { expected, actual } => {
                write!(f, "active version moved from {} to {} during cycle", expected, actual)
            }
        }
    }
}

/// Outcome of [`GovernanceManager::decide`].
#[derive(Debug, Clone)]
pub struct Decision {
    /// Proposal in its terminal state
    pub proposal: Proposal,
    /// New active version on approval
    pub version: Option<Arc<ModelVersion>>,
    /// Audit entry recording the decision
    pub audit: AuditEntry,
}

impl Decision {
    /// Whether the candidate was promoted.
    pub fn approved(&self) -> bool {
        self.proposal.state == ProposalState::Approved
    }
}

/// Outcome of a rollback request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RollbackOutcome {
    /// Active pointer moved
    Ok {
        /// Previously active version
        from: VersionId,
        /// Now active version
        to: VersionId,
    },
    /// Active version is the root; nothing to restore
    NoBackup,
}

/// Combined governance overview.
#[derive(Debug, Clone, Serialize)]
pub struct GovernanceSummary {
    /// Registry counts and active version
    pub registry: RegistrySummary,
    /// Total audit entries
    pub audit_entries: u64,
    /// Most recent audit entry
    pub last_audit: Option<AuditEntry>,
    /// Most recent drift sample
    pub latest_drift: Option<DriftSample>,
    /// Whether a promotion or rollback holds the lock
    pub promotion_in_progress: bool,
}

/// Sole authority over promotion, rollback and the audit log.
pub struct GovernanceManager {
    registry: Arc<ModelRegistry>,
    drift: Arc<DriftDetector>,
    audit: AuditLog,
    promotion_lock: Mutex<()>,
    config: GovernanceConfig,
}

impl GovernanceManager {
    /// Create a manager over a registry, a drift detector and an audit log.
    pub fn new(registry: Arc<ModelRegistry>, drift: Arc<DriftDetector>, audit: AuditLog) -> Self {
        Self {
            registry,
            drift,
            audit,
            promotion_lock: Mutex::new(()),
            config: GovernanceConfig::default(),
        }
    }

    /// Set governance settings.
    pub fn with_config(mut self, config: GovernanceConfig) -> Self {
        self.config = config;
        self
    }

    /// Registry governed by this manager.
    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    /// Drift detector consulted on every decision.
    pub fn drift(&self) -> &Arc<DriftDetector> {
        &self.drift
    }

    /// Cheap admission check run before any mutation work.
    pub fn precheck(&self) -> std::result::Result<(), Conflict> {
        if self.promotion_lock.try_lock().is_err() {
            return Err(Conflict::PromotionInProgress);
        }
        let sample = self.drift.score();
        if sample.flag {
            return Err(Conflict::DriftInProgress {
                score: sample.score,
                threshold: sample.threshold,
            });
        }
        Ok(())
    }

    /// Approve or reject a validated candidate.
    ///
    /// Approval requires a PASS report, an active pointer still at the
    /// candidate's parent, no drift flag and a free promotion lock. Approval registers the candidate, swaps the active pointer and
    /// freezes a new drift reference. Every decision is audited.
    pub async fn decide(
        &self,
        candidate: &EvolutionCandidate,
        report: ValidationReport,
        triggered_by: &str,
    ) -> Result<Decision> {
        let mut proposal = Proposal::new(candidate.id, candidate.parent);

        let Ok(_guard) = self.promotion_lock.try_lock() else {
            return self
                .reject(proposal, Conflict::PromotionInProgress.to_string(), triggered_by)
                .await;
        };

        if !report.passed() {
            let reason = format!("validation failed: {}", report.failure_summary());
            return self.reject(proposal, reason, triggered_by).await;
        }

        let active = self.registry.active().id;
        if active != candidate.parent {
            let conflict = Conflict::ActiveMoved {
                expected: candidate.parent,
                actual: active,
            };
            return self.reject(proposal, conflict.to_string(), triggered_by).await;
        }

        let sample = self.drift.score();
        if sample.flag {
            let conflict = Conflict::DriftInProgress {
                score: sample.score,
                threshold: sample.threshold,
            };
            return self.reject(proposal, conflict.to_string(), triggered_by).await;
        }

        let version = match self.promote(candidate, report, triggered_by).await {
            Ok(version) => version,
            Err(e) => {
                let reason = format!("promotion failed: {}", e);
                self.reject(proposal, reason, triggered_by).await?;
                return Err(e.into());
            }
        };

        proposal.approve()?;
        let entry = self
            .audit
            .append(AuditRecord::new(
                AuditAction::Approve,
                Some(version.id),
                triggered_by,
                "OK",
                format!(
                    "promoted {} over {} (ratio {:.3}, accuracy drop {:.2}%)",
                    version.id, candidate.parent, version.compression_ratio, version.accuracy_drop_pct
                ),
            ))
            .await?;

        if self.config.rebaseline_on_approve {
            self.drift.freeze_reference();
        }

        Ok(Decision {
            proposal,
            version: Some(version),
            audit: entry,
        })
    }

    async fn promote(
        &self,
        candidate: &EvolutionCandidate,
        report: ValidationReport,
        triggered_by: &str,
    ) -> std::result::Result<Arc<ModelVersion>, RegistryError> {
        let version = self.registry.register(candidate, report, triggered_by).await?;
        self.registry.set_active(version.id).await
    }

    async fn reject(
        &self,
        mut proposal: Proposal,
        reason: String,
        triggered_by: &str,
    ) -> Result<Decision> {
        warn!("Rejected candidate {}: {}", proposal.candidate_id, reason);
        proposal.reject(reason.clone())?;
        let entry = self
            .audit
            .append(AuditRecord::new(
                AuditAction::Reject,
                None,
                triggered_by,
                "REJECTED",
                format!("candidate {}: {}", proposal.candidate_id, reason),
            ))
            .await?;
        Ok(Decision {
            proposal,
            version: None,
            audit: entry,
        })
    }

    /// Restore the parent of the active version.
    ///
    /// Always audited, including the `NoBackup` case.
    pub async fn rollback(&self, reason: &str, triggered_by: &str) -> Result<RollbackOutcome> {
        let _guard = self.promotion_lock.lock().await;
        let active = self.registry.active();

        let Some(parent) = active.parent else {
            warn!("Rollback requested at root {}: no backup", active.id);
            self.audit
                .append(AuditRecord::new(
                    AuditAction::Rollback,
                    Some(active.id),
                    triggered_by,
                    "NO_BACKUP",
                    reason,
                ))
                .await?;
            return Ok(RollbackOutcome::NoBackup);
        };

        self.swap_back(active.id, parent, reason, triggered_by).await
    }

    /// Restore a specific earlier version.
    pub async fn rollback_to(
        &self,
        target: VersionId,
        reason: &str,
        triggered_by: &str,
    ) -> Result<RollbackOutcome> {
        let _guard = self.promotion_lock.lock().await;
        let active = self.registry.active();
        self.swap_back(active.id, target, reason, triggered_by).await
    }

    async fn swap_back(
        &self,
        from: VersionId,
        to: VersionId,
        reason: &str,
        triggered_by: &str,
    ) -> Result<RollbackOutcome> {
        match self.registry.set_active(to).await {
            Ok(_) => {
                info!("Rolled back {} -> {}", from, to);
                self.audit
                    .append(AuditRecord::new(
                        AuditAction::Rollback,
                        Some(to),
                        triggered_by,
                        "OK",
                        format!("{} -> {}: {}", from, to, reason),
                    ))
                    .await?;
                Ok(RollbackOutcome::Ok { from, to })
            }
            Err(e) => {
                self.audit
                    .append(AuditRecord::new(
                        AuditAction::Rollback,
                        Some(to),
                        triggered_by,
                        "FAILED",
                        format!("{} -> {}: {} ({})", from, to, reason, e),
                    ))
                    .await?;
                Err(e.into())
            }
        }
    }

    /// Record an EVOLVE event on behalf of the evolution engine.
    pub async fn record_evolve(
        &self,
        version: Option<VersionId>,
        triggered_by: &str,
        status: &str,
        reason: impl Into<String>,
    ) -> Result<AuditEntry> {
        self.audit
            .append(AuditRecord::new(
                AuditAction::Evolve,
                version,
                triggered_by,
                status,
                reason,
            ))
            .await
    }

    /// Record a cycle rejected before any candidate reached [`decide`](Self::decide).
    pub async fn record_rejection(
        &self,
        version: Option<VersionId>,
        triggered_by: &str,
        reason: &str,
    ) -> Result<AuditEntry> {
        self.audit
            .append(AuditRecord::new(
                AuditAction::Reject,
                version,
                triggered_by,
                "REJECTED",
                reason,
            ))
            .await
    }

    /// Most recent audit entries, newest first.
    pub async fn audit(&self, limit: usize) -> Result<Vec<AuditEntry>> {
        self.audit.list(limit).await
    }

    /// Recent audit entries using the configured page size.
    pub async fn recent_audit(&self) -> Result<Vec<AuditEntry>> {
        self.audit.list(self.config.audit_limit).await
    }

    /// Verify the audit hash chain; returns the number of entries checked.
    pub async fn verify_audit_chain(&self) -> Result<usize> {
        self.audit.verify().await
    }

    /// Registry, audit and drift at a glance.
    pub async fn summary(&self) -> Result<GovernanceSummary> {
        let last_audit = self.audit.list(1).await?.into_iter().next();
        Ok(GovernanceSummary {
            registry: self.registry.summary(),
            audit_entries: self.audit.len().await,
            last_audit,
            latest_drift: self.drift.history(1).into_iter().next(),
            promotion_in_progress: self.promotion_lock.try_lock().is_err(),
        })
    }
}
