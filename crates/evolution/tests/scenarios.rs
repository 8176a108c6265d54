//! End-to-end cycles through the controller.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use evoloop_core::config::ValidationThresholds;
use evoloop_core::{
    AuditAction, CandidateId, ControllerConfig, DistillationReport, EvolutionCandidate, FfnStats, HeadId, HeadStats, Measurements,
    ModelArtifact, StructuralSnapshot, TelemetryRecord, ValidationReport, VersionId,
};
use evoloop_drift::DriftDetector;
use evoloop_evolution::{CycleStage, CycleStatus, EvolutionController, Rejection};
use evoloop_governance::RollbackOutcome;
use evoloop_storage::{JsonStorage, MemoryStorage, Storage};
use evoloop_telemetry::{InMemoryTelemetryStore, TelemetrySource};
use evoloop_validation::{EvaluationSet, SimulatedRunner, ValidationSandbox, Validator};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::Notify;

const LAYERS: u32 = 4;
const HEADS: u32 = 4;

/// Heads that see no traffic and carry small weights.
const DORMANT: [(u32, u32); 5] = [(1, 1), (2, 0), (2, 3), (3, 0), (3, 2)];

/// Unit vector at cos = 0.3 from the reference embedding `[1, 0]`.
const DRIFTED: [f32; 2] = [0.3, 0.953_939_2];

fn base() -> ModelArtifact {
    ModelArtifact::synthetic("base", LAYERS, HEADS, 16, 32)
}

fn is_dormant(layer: u32, head: u32) -> bool {
    DORMANT.contains(&(layer, head))
}

fn snapshot() -> StructuralSnapshot {
    let mut heads = Vec::new();
    let mut ffn = Vec::new();
    for l in 0..LAYERS {
        for h in 0..HEADS {
            heads.push(HeadStats {
                head: HeadId::new(l, h),
                weight_norm: if is_dormant(l, h) { 0.2 } else { 1.0 },
            });
        }
        let mut signature = vec![0.0f32; LAYERS as usize];
        signature[l as usize] = 1.0;
        ffn.push(FfnStats {
            layer: l,
            weight_norm: 1.0,
            sparsity: 0.1,
            output_signature: signature,
        });
    }
    StructuralSnapshot {
        taken_at: chrono::Utc::now(),
        heads,
        ffn,
        embedding: None,
    }
}

fn record() -> TelemetryRecord {
    let mut r = TelemetryRecord::new(chrono::Utc::now(), 20.0);
    r.input_tokens = 12;
    r.output_tokens = 3;
    for l in 0..LAYERS {
        r.layer_executions.insert(l, 10);
        for h in 0..HEADS {
            if !is_dormant(l, h) {
                r.head_activations.insert(HeadId::new(l, h), 10);
            }
        }
    }
    r.output_embedding = vec![1.0, 0.0];
    r.output_token_ids = vec![1, 2, 3];
    r
}

fn busy_store() -> Arc<InMemoryTelemetryStore> {
    let store = Arc::new(InMemoryTelemetryStore::new());
    store.extend((0..40).map(|_| record()));
    store.set_snapshot(snapshot());
    store
}

/// Judges every candidate with the same measurements.
struct FixedValidator {
    measurements: Measurements,
}

impl FixedValidator {
    fn new(accuracy_drop_pct: f64) -> Arc<Self> {
        Arc::new(Self {
            measurements: Measurements {
                similarity_score: 1.0 - accuracy_drop_pct / 100.0,
                accuracy_drop_pct,
                hallucination_rate: 0.01,
                latency_delta_pct: -5.0,
                parent_latency_ms: 40.0,
                candidate_latency_ms: 38.0,
            },
        })
    }
}

#[async_trait]
impl Validator for FixedValidator {
    async fn validate(&self, candidate: &EvolutionCandidate, _parent: &ModelArtifact) -> ValidationReport {
        ValidationReport::evaluate(
            candidate.id,
            "fixed",
            self.measurements,
            &ValidationThresholds::default(),
        )
    }
}

/// Passes every candidate, but outputs drift while it runs.
struct DriftingValidator {
    drift: Mutex<Option<Arc<DriftDetector>>>,
}

#[async_trait]
impl Validator for DriftingValidator {
    async fn validate(&self, candidate: &EvolutionCandidate, parent: &ModelArtifact) -> ValidationReport {
        let drift = self.drift.lock().clone();
        if let Some(drift) = drift {
            for _ in 0..drift.config().window_size {
                drift.observe_output(DRIFTED.to_vec(), Vec::new());
            }
        }
        FixedValidator::new(0.5).validate(candidate, parent).await
    }
}

/// Never finishes in time.
struct SlowValidator;

#[async_trait]
impl Validator for SlowValidator {
    async fn validate(&self, candidate: &EvolutionCandidate, _parent: &ModelArtifact) -> ValidationReport {
        tokio::time::sleep(Duration::from_secs(30)).await;
        ValidationReport::baseline(candidate.id)
    }
}

/// Holds the cycle inside validation until released.
struct GatedValidator {
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

#[async_trait]
impl Validator for GatedValidator {
    async fn validate(&self, candidate: &EvolutionCandidate, parent: &ModelArtifact) -> ValidationReport {
        self.entered.notify_one();
        self.release.notified().await;
        FixedValidator::new(0.5).validate(candidate, parent).await
    }
}

/// Random accuracy drop around the 2% threshold.
struct RandomValidator {
    rng: Mutex<StdRng>,
}

#[async_trait]
impl Validator for RandomValidator {
    async fn validate(&self, candidate: &EvolutionCandidate, parent: &ModelArtifact) -> ValidationReport {
        let drop = self.rng.lock().gen_range(0.0..4.0);
        FixedValidator::new(drop).validate(candidate, parent).await
    }
}

async fn controller_with(
    config: ControllerConfig,
    store: Arc<InMemoryTelemetryStore>,
    validator: Arc<dyn Validator>,
) -> EvolutionController {
    let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
    let telemetry: Arc<dyn TelemetrySource> = store;
    EvolutionController::open(config, storage, telemetry, &base(), validator)
        .await
        .unwrap()
}

async fn controller(validator: Arc<dyn Validator>) -> EvolutionController {
    controller_with(ControllerConfig::default(), busy_store(), validator).await
}

#[tokio::test]
async fn scenario_a_empty_telemetry_analyzes_to_nothing() {
    let store = Arc::new(InMemoryTelemetryStore::new());
    let c = controller_with(ControllerConfig::default(), store, FixedValidator::new(0.5)).await;

    let analysis = c.profile_and_analyze().await.unwrap();
    assert_eq!(analysis.prunable_count(), 0);
    assert_eq!(analysis.pruning_risk_score, 0.0);

    let result = c.run_evolution_cycle("scheduled").await;
    assert_eq!(result.status, CycleStatus::Rejected);
    assert_eq!(result.rejection, Some(Rejection::NothingToDo));
    assert_eq!(c.registry().active().id, VersionId::ROOT);
}

#[tokio::test]
async fn scenario_b_passing_candidate_is_promoted() {
    let c = controller(FixedValidator::new(0.5)).await;
    let prior = c.registry().active().id;

    let result = c.run_evolution_cycle("manual").await;

    assert_eq!(result.status, CycleStatus::Approved, "{:?}", result);
    let report = result.report.as_ref().unwrap();
    assert!(report.passed());
    let new_id = result.new_version.unwrap();
    let version = c.registry().get(new_id).unwrap();
    assert_eq!(version.parent, Some(prior));
    assert_eq!(c.registry().active().id, new_id);

    let diff = result.diff.as_ref().unwrap();
    assert!(diff.parameters_after < diff.parameters_before);
    assert!(diff.plan.iter().all(|m| m.is_removal()));
    let stages: Vec<CycleStage> = result.trace.iter().map(|t| t.stage).collect();
    assert_eq!(
        stages,
        vec![
            CycleStage::Admitted,
            CycleStage::Analyzed,
            CycleStage::Planned,
            CycleStage::Mutated,
            CycleStage::Validated,
            CycleStage::Decided,
            CycleStage::Approved,
        ]
    );

    let artifact = c.registry().artifact(new_id).await.unwrap();
    for m in &diff.plan {
        if let Some(target) = m.target() {
            assert!(!artifact.contains(target));
        }
    }

    let audit = c.governance().audit(10).await.unwrap();
    assert!(audit
        .iter()
        .any(|e| e.action == AuditAction::Approve && e.version == Some(new_id)));
    assert_eq!(c.registry().lineage(new_id).unwrap().len(), 2);
}

#[tokio::test]
async fn scenario_c_accuracy_regression_is_rejected() {
    let c = controller(FixedValidator::new(5.0)).await;

    let result = c.run_evolution_cycle("manual").await;

    assert_eq!(result.status, CycleStatus::Rejected);
    assert!(matches!(result.rejection, Some(Rejection::ValidationFailed { .. })));
    assert_eq!(c.registry().active().id, VersionId::ROOT);
    assert_eq!(c.registry().len(), 1);

    let audit = c.governance().audit(10).await.unwrap();
    let reject = audit
        .iter()
        .find(|e| e.action == AuditAction::Reject)
        .unwrap();
    assert!(reject.reason.contains("accuracy drop"));
}

#[tokio::test]
async fn scenario_d_drift_blocks_passing_candidate() {
    let validator = Arc::new(DriftingValidator {
        drift: Mutex::new(None),
    });
    let c = controller(validator.clone()).await;
    *validator.drift.lock() = Some(Arc::clone(c.drift()));

    let result = c.run_evolution_cycle("manual").await;

    assert_eq!(result.status, CycleStatus::Rejected);
    assert!(result.report.as_ref().unwrap().passed());
    match result.rejection {
        Some(Rejection::Governance { reason }) => {
            assert_eq!(reason, "drift in progress: score 0.420 > 0.350")
        }
        other => panic!("unexpected rejection {:?}", other),
    }
    assert_eq!(c.registry().active().id, VersionId::ROOT);
    assert!(c.drift().history(1)[0].flag);

    // While drift persists, the next cycle is turned away before mutation.
    let again = c.run_evolution_cycle("manual").await;
    assert!(matches!(again.rejection, Some(Rejection::Admission { .. })));
    assert!(again.diff.is_none());
}

#[tokio::test]
async fn scenario_e_rollback_at_root_reports_no_backup() {
    let c = controller(FixedValidator::new(0.5)).await;

    let outcome = c.governance().rollback("operator request", "ops").await.unwrap();

    assert_eq!(outcome, RollbackOutcome::NoBackup);
    assert_eq!(c.registry().active().id, VersionId::ROOT);
    let audit = c.governance().audit(1).await.unwrap();
    assert_eq!(audit[0].action, AuditAction::Rollback);
    assert_eq!(audit[0].status, "NO_BACKUP");
}

#[tokio::test]
async fn test_risk_ceiling_rejects_before_mutation() {
    let mut config = ControllerConfig::default();
    config.evolution.risk_ceiling = 0.0;
    let c = controller_with(config, busy_store(), FixedValidator::new(0.5)).await;

    let result = c.run_evolution_cycle("manual").await;

    assert_eq!(result.status, CycleStatus::RejectedTooRisky);
    assert!(result.diff.is_none());
    assert!(result.report.is_none());
    assert_eq!(c.registry().len(), 1);
}

#[tokio::test]
async fn test_validation_timeout_is_a_fail() {
    let c = controller(Arc::new(SlowValidator))
        .await
        .with_validation_timeout(Duration::from_millis(50));

    let result = c.run_evolution_cycle("manual").await;

    assert_eq!(result.status, CycleStatus::Rejected);
    let report = result.report.unwrap();
    assert!(!report.passed());
    assert!(report.failures[0].contains("timed out"));
    assert_eq!(c.registry().active().id, VersionId::ROOT);
}

#[tokio::test]
async fn test_concurrent_cycle_is_rejected_immediately() {
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let validator = Arc::new(GatedValidator {
        entered: Arc::clone(&entered),
        release: Arc::clone(&release),
    });
    let c = Arc::new(controller(validator).await);

    let first = {
        let c = Arc::clone(&c);
        tokio::spawn(async move { c.run_evolution_cycle("first").await })
    };
    entered.notified().await;
    assert!(c.is_evolving());

    let second = c.run_evolution_cycle("second").await;
    assert_eq!(second.status, CycleStatus::Rejected);
    assert_eq!(second.rejection, Some(Rejection::ConcurrentCycle));

    release.notify_one();
    let first = first.await.unwrap();
    assert_eq!(first.status, CycleStatus::Approved);
    assert_eq!(c.registry().len(), 2);
}

#[tokio::test]
async fn test_rollback_during_cycle_is_not_overwritten() {
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let validator = Arc::new(GatedValidator {
        entered: Arc::clone(&entered),
        release: Arc::clone(&release),
    });
    let c = Arc::new(controller(validator).await);

    // Promote an unpruned copy of the base as v1.
    let model = base();
    let promoted = EvolutionCandidate {
        id: CandidateId::new(),
        parent: VersionId::ROOT,
        plan: Vec::new(),
        compression_ratio: 1.0,
        parent_parameters: model.parameter_count(),
        artifact: model,
        distillation: DistillationReport::default(),
    };
    let passing = FixedValidator::new(0.5)
        .validate(&promoted, &base())
        .await;
    let v1 = c
        .governance()
        .decide(&promoted, passing, "setup")
        .await
        .unwrap()
        .version
        .unwrap()
        .id;

    let cycle = {
        let c = Arc::clone(&c);
        tokio::spawn(async move { c.run_evolution_cycle("scheduled").await })
    };
    entered.notified().await;
    let outcome = c.governance().rollback("bad release", "ops").await.unwrap();
    assert_eq!(outcome, RollbackOutcome::Ok { from: v1, to: VersionId::ROOT });
    release.notify_one();
    let result = cycle.await.unwrap();

    assert_eq!(result.parent, v1);
    assert_eq!(result.status, CycleStatus::Rejected);
    assert!(result.new_version.is_none());
    match result.rejection {
        Some(Rejection::Governance { reason }) => {
            assert!(reason.contains("active version moved from v1 to v0"), "{}", reason)
        }
        other => panic!("unexpected rejection {:?}", other),
    }
    assert_eq!(c.registry().active().id, VersionId::ROOT);
    assert_eq!(c.registry().len(), 2);
}

#[tokio::test]
async fn test_cooldown_spaces_cycles() {
    let mut config = ControllerConfig::default();
    config.evolution.cooldown_secs = 3600;
    let c = controller_with(config, busy_store(), FixedValidator::new(5.0)).await;

    let first = c.run_evolution_cycle("manual").await;
    assert_eq!(first.status, CycleStatus::Rejected);
    let second = c.run_evolution_cycle("manual").await;
    assert!(matches!(second.rejection, Some(Rejection::Cooldown { .. })));
}

#[tokio::test]
async fn test_analysis_is_idempotent() {
    let c = controller(FixedValidator::new(0.5)).await;
    let a = c.profile_and_analyze().await.unwrap();
    let b = c.profile_and_analyze().await.unwrap();
    assert_eq!(a, b);
    assert!(a.prunable_count() > 0);
    assert!(a.prunable_heads.iter().all(|h| h.layer != 0));
}

#[tokio::test]
async fn test_sandbox_cycle_keeps_active_servable() {
    let model = base();
    let eval = EvaluationSet::standard();
    let runner = SimulatedRunner::for_model(&model).with_facts(eval.factual_checks.iter());
    let sandbox = ValidationSandbox::new(Arc::new(runner)).with_eval_set(eval.clone());
    let c = controller(Arc::new(sandbox)).await;

    let result = c.run_evolution_cycle("manual").await;

    assert!(matches!(
        result.status,
        CycleStatus::Approved | CycleStatus::Rejected
    ));
    assert!(result.report.is_some());
    assert!(c.registry().active().is_servable());
    assert_eq!(result.approved(), c.registry().active().id != VersionId::ROOT);
}

#[tokio::test]
async fn test_random_cycles_preserve_registry_invariants() {
    let validator = Arc::new(RandomValidator {
        rng: Mutex::new(StdRng::seed_from_u64(7)),
    });
    let mut config = ControllerConfig::default();
    config.analyzer.max_prune_ratio = 0.2;
    let c = controller_with(config, busy_store(), validator).await;

    let mut parents: BTreeMap<VersionId, Option<VersionId>> = BTreeMap::new();
    for i in 0..8 {
        let before = c.registry().active().id;
        let result = c.run_evolution_cycle(&format!("round-{}", i)).await;
        let after = c.registry().active().id;

        if result.approved() {
            let id = result.new_version.unwrap();
            assert_eq!(after, id);
            assert!(id > before);
            parents.insert(id, Some(before));
        } else {
            assert_eq!(after, before, "cycle {} moved the pointer: {:?}", i, result.status);
            assert!(result.new_version.is_none());
        }
        assert_ne!(result.status, CycleStatus::Error, "{:?}", result.error);

        let lineage = c.registry().lineage(after).unwrap();
        assert!(lineage.windows(2).all(|w| w[0].id > w[1].id));
        assert_eq!(lineage.last().unwrap().id, VersionId::ROOT);
        assert!(lineage.iter().all(|v| v.is_servable()));
    }
    for v in c.registry().list() {
        if let Some(expected) = parents.get(&v.id) {
            assert_eq!(v.parent, *expected);
        }
    }

    // Roll back all the way; the root is a hard floor.
    let mut steps = 0;
    loop {
        match c.governance().rollback("unwind", "test").await.unwrap() {
            RollbackOutcome::Ok { from, to } => {
                assert!(to < from);
                steps += 1;
            }
            RollbackOutcome::NoBackup => break,
        }
    }
    assert_eq!(steps, parents.len());
    assert_eq!(c.registry().active().id, VersionId::ROOT);
    assert_eq!(
        c.governance().rollback("again", "test").await.unwrap(),
        RollbackOutcome::NoBackup
    );
    assert!(c.governance().verify_audit_chain().await.unwrap() > 0);
}

#[tokio::test]
async fn test_promotion_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let open = |validator: Arc<dyn Validator>| {
        let root = dir.path().to_path_buf();
        async move {
            let storage: Arc<dyn Storage> = Arc::new(JsonStorage::new(root).await.unwrap());
            let telemetry: Arc<dyn TelemetrySource> = busy_store();
            EvolutionController::open(ControllerConfig::default(), storage, telemetry, &base(), validator)
                .await
                .unwrap()
        }
    };

    let promoted = {
        let validator: Arc<dyn Validator> = FixedValidator::new(0.5);
        let c = open(validator).await;
        let result = c.run_evolution_cycle("manual").await;
        assert!(result.approved());
        result.new_version.unwrap()
    };

    let validator: Arc<dyn Validator> = FixedValidator::new(0.5);
    let c = open(validator).await;
    assert_eq!(c.registry().active().id, promoted);
    assert_eq!(c.registry().len(), 2);
    assert!(c.registry().artifact(promoted).await.is_ok());
    // STARTED, APPROVE
    assert_eq!(c.governance().verify_audit_chain().await.unwrap(), 2);
}
