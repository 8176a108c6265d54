//! The evolution engine - runs one cycle of the self-evolution loop.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use evoloop_core::config::EvolutionConfig;
use evoloop_core::{
    CandidateId, ComponentId, EvolutionCandidate, ModelArtifact, StructuralAnalysis,
    ValidationReport,
};
use evoloop_governance::GovernanceManager;
use evoloop_validation::Validator;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::cycle::{Cycle, CycleStage, CycleStatus, DiffSummary, EvolutionResult, Rejection};
use crate::distill::{Distiller, NormRecoveryDistiller};
use crate::error::{EvolutionError, Result};
use crate::mutate::apply_plan;
use crate::planner::PlanSelector;

/// Where the engine gets its analysis and protection rules from.
#[async_trait]
pub trait AnalysisProvider: Send + Sync {
    /// Fresh analysis of current usage.
    async fn analyze(&self) -> Result<StructuralAnalysis>;

    /// Whether a component must never be removed.
    fn is_protected(&self, id: &ComponentId) -> bool;

    /// Fragmentation penalty used when scoring plans.
    fn fragmentation_penalty(&self) -> f64;
}

/// Runs evolution cycles.
///
/// ```text
/// Admit → Analyze → Plan → Mutate → Validate → Decide
/// ```
///
/// At most one cycle is in flight; a second caller is rejected at once
/// rather than queued. Nothing touches the registry before the governance
/// decision, so any failure leaves the active model as it was.
pub struct EvolutionEngine {
    config: EvolutionConfig,
    planner: PlanSelector,
    distiller: Arc<dyn Distiller>,
    validator: Arc<dyn Validator>,
    validation_timeout: Duration,
    governance: Arc<GovernanceManager>,
    cycle_lock: Mutex<()>,
    last_admitted: parking_lot::Mutex<Option<Instant>>,
}

impl EvolutionEngine {
    /// Create an engine validating with `validator` and deciding through
    /// `governance`.
    pub fn new(governance: Arc<GovernanceManager>, validator: Arc<dyn Validator>) -> Self {
        let config = EvolutionConfig::default();
        Self {
            planner: PlanSelector::new().with_config(config.clone()),
            distiller: Arc::new(NormRecoveryDistiller::new(config.max_distill_gain)),
            validator,
            validation_timeout: Duration::from_secs(120),
            governance,
            cycle_lock: Mutex::new(()),
            last_admitted: parking_lot::Mutex::new(None),
            config,
        }
    }

    /// Set the configuration.
    pub fn with_config(mut self, config: EvolutionConfig) -> Self {
        self.planner = PlanSelector::new().with_config(config.clone());
        self.distiller = Arc::new(NormRecoveryDistiller::new(config.max_distill_gain));
        self.config = config;
        self
    }

    /// Replace the distiller.
    pub fn with_distiller(mut self, distiller: Arc<dyn Distiller>) -> Self {
        self.distiller = distiller;
        self
    }

    /// Bound on the whole validation stage.
    pub fn with_validation_timeout(mut self, timeout: Duration) -> Self {
        self.validation_timeout = timeout;
        self
    }

    /// Whether a cycle currently holds the lock.
    pub fn is_busy(&self) -> bool {
        self.cycle_lock.try_lock().is_err()
    }

    /// Run one cycle to a terminal state.
    pub async fn run_cycle(&self, trigger: &str, provider: &dyn AnalysisProvider) -> EvolutionResult {
        let registry = self.governance.registry();
        let Ok(_guard) = self.cycle_lock.try_lock() else {
            let cycle = Cycle::admit(trigger, registry.active().id);
            info!("Cycle {} rejected: another cycle is in flight", cycle.id());
            return self.reject(cycle, Rejection::ConcurrentCycle).await;
        };

        // Read under the lock; governance rejects the candidate if a
        // rollback moves the pointer before the decision.
        let parent = registry.active();
        let cycle = Cycle::admit(trigger, parent.id);

        info!("Starting evolution cycle {} ({}) from {}", cycle.id(), trigger, parent.id);
        if let Err(e) = self
            .governance
            .record_evolve(Some(parent.id), trigger, "STARTED", format!("cycle {}", cycle.id()))
            .await
        {
            warn!("Failed to audit cycle start: {}", e);
        }

        match self.drive(cycle, provider).await {
            Ok(result) => result,
            Err((cycle, e)) => self.fail(cycle, e).await,
        }
    }

    /// Stages after the lock is held. Errors hand the cycle back so the
    /// caller can close it.
    async fn drive(
        &self,
        mut cycle: Cycle,
        provider: &dyn AnalysisProvider,
    ) -> std::result::Result<EvolutionResult, (Cycle, EvolutionError)> {
        macro_rules! attempt {
            ($e:expr) => {
                match $e {
                    Ok(v) => v,
                    Err(e) => return Err((cycle, e.into())),
                }
            };
        }

        // 1. Admission
        if let Some(remaining) = self.cooldown_remaining() {
            return Ok(self
                .reject(cycle, Rejection::Cooldown { remaining_secs: remaining.as_secs().max(1) })
                .await);
        }
        if let Err(conflict) = self.governance.precheck() {
            return Ok(self
                .reject(cycle, Rejection::Admission { reason: conflict.to_string() })
                .await);
        }
        *self.last_admitted.lock() = Some(Instant::now());

        // 2. Analysis
        let analyzed = provider.analyze().await;
        let analysis = attempt!(analyzed);
        cycle.set_risk(analysis.pruning_risk_score);
        attempt!(cycle.advance(
            CycleStage::Analyzed,
            format!(
                "{} prunable, risk {:.3}",
                analysis.prunable_count(),
                analysis.pruning_risk_score
            ),
        ));
        if analysis.pruning_risk_score > self.config.risk_ceiling {
            let rejection = Rejection::TooRisky {
                risk: analysis.pruning_risk_score,
                ceiling: self.config.risk_ceiling,
            };
            return Ok(self.reject_as(cycle, CycleStatus::RejectedTooRisky, rejection).await);
        }

        // 3. Plan
        let registry = self.governance.registry();
        let loaded = registry.artifact(cycle.parent()).await;
        let parent_artifact = attempt!(loaded);
        let selection = self
            .planner
            .select(&analysis, &parent_artifact, provider.fragmentation_penalty());
        if selection.is_empty() {
            return Ok(self.reject(cycle, Rejection::NothingToDo).await);
        }
        let plan = selection.plan;
        let summary: Vec<String> = plan.iter().map(|m| m.to_string()).collect();
        attempt!(cycle.advance(CycleStage::Planned, summary.join(", ")));

        // 4. Mutation on a blocking thread; a panic there is contained.
        let protected = protected_components(&parent_artifact, provider);
        let parent_artifact = Arc::new(parent_artifact);
        let mutated = {
            let parent = Arc::clone(&parent_artifact);
            let plan = plan.clone();
            let distiller = Arc::clone(&self.distiller);
            tokio::task::spawn_blocking(move || {
                apply_plan(&parent, &plan, &protected).map(|mut child| {
                    let report = distiller.distill(&parent, &mut child);
                    (child, report)
                })
            })
            .await
        };
        let mutated = match mutated {
            Ok(result) => result.map_err(EvolutionError::from),
            Err(join_err) => Err(EvolutionError::Task(join_err.to_string())),
        };
        let (artifact, distillation) = attempt!(mutated);

        let candidate = EvolutionCandidate {
            id: CandidateId::new(),
            parent: cycle.parent(),
            compression_ratio: ratio(artifact.size_bytes(), parent_artifact.size_bytes()),
            parent_parameters: parent_artifact.parameter_count(),
            plan,
            artifact,
            distillation,
        };
        let diff = DiffSummary {
            parameters_before: candidate.parent_parameters,
            parameters_after: candidate.parameters(),
            reduction_pct: candidate.reduction_pct(),
            bytes_before: parent_artifact.size_bytes(),
            bytes_after: candidate.artifact.size_bytes(),
            compression_ratio: candidate.compression_ratio,
            plan: candidate.plan.clone(),
        };
        info!(
            "Candidate {}: {} -> {} parameters ({:.1}% smaller)",
            candidate.id, diff.parameters_before, diff.parameters_after, diff.reduction_pct
        );
        cycle.set_diff(diff);
        attempt!(cycle.advance(CycleStage::Mutated, format!("candidate {}", candidate.id)));

        // 5. Validation
        let report = match tokio::time::timeout(
            self.validation_timeout,
            self.validator.validate(&candidate, &parent_artifact),
        )
        .await
        {
            Ok(report) => report,
            Err(_) => {
                warn!(
                    "Validation of {} timed out after {:?}",
                    candidate.id, self.validation_timeout
                );
                ValidationReport::failed(
                    candidate.id,
                    "timeout",
                    format!("validation timed out after {}ms", self.validation_timeout.as_millis()),
                )
            }
        };
        cycle.set_report(report.clone());
        attempt!(cycle.advance(CycleStage::Validated, report.verdict.to_string()));

        // 6. Decision
        let decided = self
            .governance
            .decide(&candidate, report.clone(), cycle.trigger())
            .await;
        let decision = attempt!(decided);
        attempt!(cycle.advance(CycleStage::Decided, decision.audit.reason.clone()));

        if decision.approved() {
            let version = decision.version.map(|v| v.id);
            info!("Cycle {} approved: active is now {:?}", cycle.id(), version);
            return Ok(cycle.finish(CycleStatus::Approved, version, None, None));
        }

        let reason = decision.proposal.reason.unwrap_or_default();
        let rejection = if report.passed() {
            Rejection::Governance { reason }
        } else {
            Rejection::ValidationFailed {
                reason: report.failure_summary(),
            }
        };
        info!("Cycle {} rejected: {}", cycle.id(), rejection);
        Ok(cycle.finish(CycleStatus::Rejected, None, Some(rejection), None))
    }

    fn cooldown_remaining(&self) -> Option<Duration> {
        if self.config.cooldown_secs == 0 {
            return None;
        }
        let cooldown = Duration::from_secs(self.config.cooldown_secs);
        let last = (*self.last_admitted.lock())?;
        cooldown.checked_sub(last.elapsed()).filter(|d| !d.is_zero())
    }

    async fn reject(&self, cycle: Cycle, rejection: Rejection) -> EvolutionResult {
        self.reject_as(cycle, CycleStatus::Rejected, rejection).await
    }

    /// Close a cycle rejected before governance saw a candidate.
    async fn reject_as(&self, cycle: Cycle, status: CycleStatus, rejection: Rejection) -> EvolutionResult {
        debug!("Cycle {} rejected before decision: {}", cycle.id(), rejection);
        if let Err(e) = self
            .governance
            .record_rejection(Some(cycle.parent()), cycle.trigger(), &rejection.to_string())
            .await
        {
            warn!("Failed to audit rejection: {}", e);
        }
        cycle.finish(status, None, Some(rejection), None)
    }

    async fn fail(&self, cycle: Cycle, e: EvolutionError) -> EvolutionResult {
        error!("Cycle {} failed at {:?}: {}", cycle.id(), cycle.stage(), e);
        if let Err(audit_err) = self
            .governance
            .record_evolve(Some(cycle.parent()), cycle.trigger(), "ERROR", e.to_string())
            .await
        {
            warn!("Failed to audit cycle error: {}", audit_err);
        }
        cycle.finish(CycleStatus::Error, None, None, Some(e.to_string()))
    }
}

fn ratio(after: u64, before: u64) -> f64 {
    if before == 0 {
        1.0
    } else {
        after as f64 / before as f64
    }
}

/// Components of `artifact` the provider marks as untouchable.
fn protected_components(artifact: &ModelArtifact, provider: &dyn AnalysisProvider) -> BTreeSet<ComponentId> {
    let mut all = vec![ComponentId::Embedding, ComponentId::OutputProjection];
    for layer in &artifact.layers {
        all.push(ComponentId::ffn(layer.index));
        all.extend(layer.heads.iter().map(|h| ComponentId::head(layer.index, h.index)));
    }
    all.into_iter().filter(|id| provider.is_protected(id)).collect()
}
