//! Controller facade over the whole loop.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use evoloop_analysis::StructuralAnalyzer;
use evoloop_core::{
    ComponentId, ControllerConfig, ModelArtifact, StructuralAnalysis, StructuralSnapshot,
    TelemetryRecord, UsageProfile,
};
use evoloop_drift::DriftDetector;
use evoloop_governance::{AuditLog, GovernanceManager};
use evoloop_registry::ModelRegistry;
use evoloop_storage::Storage;
use evoloop_telemetry::{TelemetrySource, UsageProfiler, WindowSpec};
use evoloop_validation::Validator;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cycle::EvolutionResult;
use crate::distill::Distiller;
use crate::engine::{AnalysisProvider, EvolutionEngine};
use crate::error::Result;

/// Checks the sandbox bounds individually: accuracy, hallucination and
/// latency on both models.
const GUARDED_CHECKS: u64 = 4;

/// Entry point of the self-evolution loop.
///
/// Reads telemetry, analyzes it, runs evolution cycles and exposes the
/// registry, drift detector and governance manager to callers.
pub struct EvolutionController {
    config: ControllerConfig,
    telemetry: Arc<dyn TelemetrySource>,
    profiler: UsageProfiler,
    analyzer: StructuralAnalyzer,
    engine: EvolutionEngine,
    governance: Arc<GovernanceManager>,
}

impl EvolutionController {
    /// Assemble a controller from already-built parts.
    pub fn new(
        config: ControllerConfig,
        telemetry: Arc<dyn TelemetrySource>,
        governance: Arc<GovernanceManager>,
        validator: Arc<dyn Validator>,
    ) -> Self {
        let stage_timeout = Duration::from_millis(config.validation.timeout_ms.saturating_mul(GUARDED_CHECKS));
        let engine = EvolutionEngine::new(Arc::clone(&governance), validator)
            .with_config(config.evolution.clone())
            .with_validation_timeout(stage_timeout);
        Self {
            profiler: UsageProfiler::new().with_config(config.profiler.clone()),
            analyzer: StructuralAnalyzer::new().with_config(config.analyzer.clone()),
            engine,
            governance,
            telemetry,
            config,
        }
    }

    /// Validate the config, open (or bootstrap with `base`) the registry and
    /// audit log in `storage`, and freeze the initial drift reference from
    /// the most recent telemetry.
    pub async fn open(
        config: ControllerConfig,
        storage: Arc<dyn Storage>,
        telemetry: Arc<dyn TelemetrySource>,
        base: &ModelArtifact,
        validator: Arc<dyn Validator>,
    ) -> Result<Self> {
        config.validate()?;

        let registry = Arc::new(ModelRegistry::bootstrap(Arc::clone(&storage), base).await?);
        let drift = Arc::new(DriftDetector::with_config(config.drift.clone()));
        let recent = telemetry
            .window(WindowSpec::LastN(config.drift.window_size))
            .await?;
        for record in &recent {
            drift.observe(record);
        }
        drift.freeze_reference();

        let audit = AuditLog::open(storage).await?;
        let governance = Arc::new(
            GovernanceManager::new(registry, drift, audit).with_config(config.governance.clone()),
        );

        info!(
            "Controller ready: active {}, {} telemetry records seed the drift reference",
            governance.registry().active().id,
            recent.len()
        );
        Ok(Self::new(config, telemetry, governance, validator))
    }

    /// Replace the distiller used after mutation.
    pub fn with_distiller(mut self, distiller: Arc<dyn Distiller>) -> Self {
        self.engine = self.engine.with_distiller(distiller);
        self
    }

    /// Override the bound on the validation stage.
    pub fn with_validation_timeout(mut self, timeout: Duration) -> Self {
        self.engine = self.engine.with_validation_timeout(timeout);
        self
    }

    /// Profile the configured telemetry window.
    pub async fn profile(&self) -> Result<(UsageProfile, Option<StructuralSnapshot>)> {
        Ok(self.profiler.profile_source(self.telemetry.as_ref()).await?)
    }

    /// Profile current telemetry and analyze it.
    ///
    /// Pure with respect to controller state: nothing is mutated.
    pub async fn profile_and_analyze(&self) -> Result<StructuralAnalysis> {
        let (profile, snapshot) = self.profile().await?;
        debug!(
            "Profiled {} requests over {} components",
            profile.summary.total_requests,
            profile.utilization.len()
        );
        Ok(self.analyzer.analyze(&profile, snapshot.as_ref()))
    }

    /// Run one evolution cycle.
    pub async fn run_evolution_cycle(&self, trigger_reason: &str) -> EvolutionResult {
        self.engine.run_cycle(trigger_reason, self).await
    }

    /// Whether a cycle is in flight.
    pub fn is_evolving(&self) -> bool {
        self.engine.is_busy()
    }

    /// Feed the drift detector from a live telemetry stream.
    pub fn spawn_drift_monitor(&self, rx: broadcast::Receiver<TelemetryRecord>) -> JoinHandle<()> {
        Arc::clone(self.drift()).spawn_monitor(rx, self.config.drift.window_size.max(1))
    }

    /// Model registry.
    pub fn registry(&self) -> &Arc<ModelRegistry> {
        self.governance.registry()
    }

    /// Drift detector.
    pub fn drift(&self) -> &Arc<DriftDetector> {
        self.governance.drift()
    }

    /// Governance manager.
    pub fn governance(&self) -> &Arc<GovernanceManager> {
        &self.governance
    }

    /// Active configuration.
    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }
}

#[async_trait]
impl AnalysisProvider for EvolutionController {
    async fn analyze(&self) -> Result<StructuralAnalysis> {
        self.profile_and_analyze().await
    }

    fn is_protected(&self, id: &ComponentId) -> bool {
        self.analyzer.is_protected(id)
    }

    fn fragmentation_penalty(&self) -> f64 {
        self.analyzer.fragmentation_penalty()
    }
}
