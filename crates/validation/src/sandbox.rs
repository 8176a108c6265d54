//! Validation sandbox - the default [`Validator`].

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use evoloop_core::config::ValidationConfig;
use evoloop_core::{EvolutionCandidate, Measurements, ModelArtifact, ValidationReport};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::evaluation::EvaluationSet;
use crate::runner::ModelRunner;
use crate::similarity::token_similarity;
use crate::validator::{Result, ValidationError, Validator};

/// Runs the accuracy, hallucination and latency checks.
///
/// Each check runs in its own spawned task under the configured timeout, so
/// a runner that panics or hangs produces a FAIL report instead of taking
/// down the evolution cycle.
pub struct ValidationSandbox {
    runner: Arc<dyn ModelRunner>,
    eval_set: Arc<EvaluationSet>,
    config: ValidationConfig,
}

impl ValidationSandbox {
    /// Create a sandbox with default thresholds and the standard set.
    pub fn new(runner: Arc<dyn ModelRunner>) -> Self {
        Self {
            runner,
            eval_set: Arc::new(EvaluationSet::standard()),
            config: ValidationConfig::default(),
        }
    }

    /// Set the configuration.
    pub fn with_config(mut self, config: ValidationConfig) -> Self {
        self.config = config;
        self
    }

    /// Use a different evaluation set.
    pub fn with_eval_set(mut self, eval_set: EvaluationSet) -> Self {
        self.eval_set = Arc::new(eval_set);
        self
    }

    /// Evaluation set in use.
    pub fn eval_set(&self) -> &EvaluationSet {
        &self.eval_set
    }

    async fn measure(
        &self,
        candidate: Arc<ModelArtifact>,
        parent: Arc<ModelArtifact>,
    ) -> Result<Measurements> {
        let runner = &self.runner;
        let eval = &self.eval_set;

        let similarity_score = self
            .guarded(
                "accuracy",
                accuracy(runner.clone(), eval.clone(), candidate.clone(), parent.clone()),
            )
            .await?;
        debug!("Similarity vs parent: {:.4}", similarity_score);

        let hallucination_rate = self
            .guarded(
                "hallucination",
                hallucination(runner.clone(), eval.clone(), candidate.clone()),
            )
            .await?;
        debug!("Hallucination rate: {:.4}", hallucination_rate);

        let parent_latency_ms = self
            .guarded("latency", mean_latency(runner.clone(), eval.clone(), parent))
            .await?;
        let candidate_latency_ms = self
            .guarded("latency", mean_latency(runner.clone(), eval.clone(), candidate))
            .await?;
        let latency_delta_pct = if parent_latency_ms > 0.0 {
            (candidate_latency_ms - parent_latency_ms) / parent_latency_ms * 100.0
        } else {
            0.0
        };
        debug!(
            "Latency {:.2}ms -> {:.2}ms ({:+.1}%)",
            parent_latency_ms, candidate_latency_ms, latency_delta_pct
        );

        Ok(Measurements {
            similarity_score,
            accuracy_drop_pct: (1.0 - similarity_score) * 100.0,
            hallucination_rate,
            latency_delta_pct,
            parent_latency_ms,
            candidate_latency_ms,
        })
    }

    /// Run one check in its own task under the timeout.
    async fn guarded<F>(&self, check: &'static str, fut: F) -> Result<f64>
    where
        F: Future<Output = Result<f64>> + Send + 'static,
    {
        let timeout_ms = self.config.timeout_ms;
        let handle = tokio::spawn(fut);
        let _abort = AbortOnDrop(handle.abort_handle());
        match tokio::time::timeout(Duration::from_millis(timeout_ms), handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(ValidationError::Aborted {
                check,
                message: join_err.to_string(),
            }),
            Err(_) => Err(ValidationError::Timeout { check, timeout_ms }),
        }
    }
}

/// Cancels a spawned check when the caller stops waiting for it, including
/// when the whole `validate` future is dropped.
struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

#[async_trait]
impl Validator for ValidationSandbox {
    async fn validate(&self, candidate: &EvolutionCandidate, parent: &ModelArtifact) -> ValidationReport {
        info!(
            "Validating candidate {} against {} (eval set {})",
            candidate.id, parent.name, self.eval_set.version
        );

        let measured = self
            .measure(Arc::new(candidate.artifact.clone()), Arc::new(parent.clone()))
            .await;

        let report = match measured {
            Ok(m) => ValidationReport::evaluate(
                candidate.id,
                self.eval_set.version.clone(),
                m,
                &self.config.thresholds,
            ),
            Err(e) => {
                warn!("Candidate {} could not be evaluated: {}", candidate.id, e);
                ValidationReport::failed(candidate.id, self.eval_set.version.clone(), e.to_string())
            }
        };

        info!(
            "Candidate {} verdict {} (drop {:.2}%, hallucination {:.3}, latency {:+.1}%)",
            candidate.id,
            report.verdict,
            report.accuracy_drop_pct,
            report.hallucination_rate,
            report.latency_delta_pct
        );
        report
    }
}

async fn accuracy(
    runner: Arc<dyn ModelRunner>,
    eval: Arc<EvaluationSet>,
    candidate: Arc<ModelArtifact>,
    parent: Arc<ModelArtifact>,
) -> Result<f64> {
    if eval.reference_prompts.is_empty() {
        return Ok(1.0);
    }
    let mut total = 0.0;
    for prompt in &eval.reference_prompts {
        let expected = runner.generate(&parent, prompt).await?;
        let actual = runner.generate(&candidate, prompt).await?;
        total += token_similarity(&expected.text, &actual.text);
    }
    Ok(total / eval.reference_prompts.len() as f64)
}

async fn hallucination(
    runner: Arc<dyn ModelRunner>,
    eval: Arc<EvaluationSet>,
    candidate: Arc<ModelArtifact>,
) -> Result<f64> {
    if eval.factual_checks.is_empty() {
        return Ok(0.0);
    }
    let mut failures = 0usize;
    for check in &eval.factual_checks {
        let out = runner.generate(&candidate, &check.prompt).await?;
        if !out.text.to_lowercase().contains(&check.expected.to_lowercase()) {
            failures += 1;
        }
    }
    Ok(failures as f64 / eval.factual_checks.len() as f64)
}

async fn mean_latency(
    runner: Arc<dyn ModelRunner>,
    eval: Arc<EvaluationSet>,
    model: Arc<ModelArtifact>,
) -> Result<f64> {
    if eval.latency_batch.is_empty() {
        return Ok(0.0);
    }
    let mut total = 0.0;
    for prompt in &eval.latency_batch {
        let started = Instant::now();
        let out = runner.generate(&model, prompt).await?;
        let wall = started.elapsed().as_secs_f64() * 1000.0;
        total += out.latency_ms.unwrap_or(wall);
    }
    Ok(total / eval.latency_batch.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::{Generation, SimulatedRunner};
    use evoloop_core::{CandidateId, DistillationReport, Verdict, VersionId};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn candidate(artifact: ModelArtifact) -> EvolutionCandidate {
        EvolutionCandidate {
            id: CandidateId::new(),
            parent: VersionId::ROOT,
            plan: vec![],
            compression_ratio: 1.0,
            parent_parameters: artifact.parameter_count(),
            artifact,
            distillation: DistillationReport::default(),
        }
    }

    struct PanickingRunner;

    #[async_trait]
    impl ModelRunner for PanickingRunner {
        async fn generate(&self, _model: &ModelArtifact, _prompt: &str) -> Result<Generation> {
            panic!("runner exploded");
        }
    }

    struct SlowRunner;

    #[async_trait]
    impl ModelRunner for SlowRunner {
        async fn generate(&self, _model: &ModelArtifact, _prompt: &str) -> Result<Generation> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Generation { text: String::new(), latency_ms: None })
        }
    }

    /// Counts generations that start and that run to completion.
    #[derive(Default)]
    struct CountingRunner {
        started: AtomicUsize,
        finished: AtomicUsize,
    }

    #[async_trait]
    impl ModelRunner for CountingRunner {
        async fn generate(&self, _model: &ModelArtifact, _prompt: &str) -> Result<Generation> {
            self.started.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(200)).await;
            self.finished.fetch_add(1, Ordering::SeqCst);
            Ok(Generation { text: String::new(), latency_ms: None })
        }
    }

    struct FailingRunner;

    #[async_trait]
    impl ModelRunner for FailingRunner {
        async fn generate(&self, _model: &ModelArtifact, _prompt: &str) -> Result<Generation> {
            Err(ValidationError::Runner("model not loaded".to_string()))
        }
    }

    #[tokio::test]
    async fn test_identical_model_passes() {
        let base = ModelArtifact::synthetic("base", 3, 4, 8, 8);
        let eval = EvaluationSet::standard();
        let runner = SimulatedRunner::for_model(&base).with_facts(&eval.factual_checks);
        let sandbox = ValidationSandbox::new(Arc::new(runner)).with_eval_set(eval);

        let report = sandbox.validate(&candidate(base.clone()), &base).await;
        assert_eq!(report.verdict, Verdict::Pass);
        assert_eq!(report.similarity_score, 1.0);
        assert_eq!(report.accuracy_drop_pct, 0.0);
        assert_eq!(report.hallucination_rate, 0.0);
        assert_eq!(report.latency_delta_pct, 0.0);
        assert_eq!(report.eval_set_version, "standard-1");
    }

    #[tokio::test]
    async fn test_heavy_pruning_fails_on_accuracy() {
        let base = ModelArtifact::synthetic("base", 3, 4, 8, 8);
        let mut pruned = base.clone();
        for layer in &mut pruned.layers {
            layer.heads.truncate(1);
        }
        let runner = SimulatedRunner::for_model(&base).with_sensitivity(1.0);
        let sandbox = ValidationSandbox::new(Arc::new(runner));

        let report = sandbox.validate(&candidate(pruned), &base).await;
        assert_eq!(report.verdict, Verdict::Fail);
        assert!(report.failures.iter().any(|f| f.contains("accuracy drop")));
        assert!(report.latency_delta_pct < 0.0);
    }

    #[tokio::test]
    async fn test_panicking_runner_is_a_fail() {
        let base = ModelArtifact::synthetic("base", 1, 1, 2, 2);
        let sandbox = ValidationSandbox::new(Arc::new(PanickingRunner));
        let report = sandbox.validate(&candidate(base.clone()), &base).await;
        assert_eq!(report.verdict, Verdict::Fail);
        assert!(report.failure_summary().contains("aborted"));
    }

    #[tokio::test]
    async fn test_runner_error_is_a_fail() {
        let base = ModelArtifact::synthetic("base", 1, 1, 2, 2);
        let sandbox = ValidationSandbox::new(Arc::new(FailingRunner));
        let report = sandbox.validate(&candidate(base.clone()), &base).await;
        assert_eq!(report.verdict, Verdict::Fail);
        assert!(report.failure_summary().contains("model not loaded"));
    }

    #[tokio::test]
    async fn test_timeout_is_a_fail() {
        let base = ModelArtifact::synthetic("base", 1, 1, 2, 2);
        let sandbox = ValidationSandbox::new(Arc::new(SlowRunner)).with_config(ValidationConfig {
            timeout_ms: 50,
            ..Default::default()
        });
        let report = sandbox.validate(&candidate(base.clone()), &base).await;
        assert_eq!(report.verdict, Verdict::Fail);
        assert!(report.failure_summary().contains("timed out"));
    }

    #[tokio::test]
    async fn test_dropped_validation_cancels_checks() {
        let base = ModelArtifact::synthetic("base", 1, 1, 2, 2);
        let runner = Arc::new(CountingRunner::default());
        let sandbox = ValidationSandbox::new(runner.clone());

        let c = candidate(base.clone());
        let outer = tokio::time::timeout(Duration::from_millis(50), sandbox.validate(&c, &base)).await;
        assert!(outer.is_err());

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(runner.started.load(Ordering::SeqCst) >= 1);
        assert_eq!(runner.finished.load(Ordering::SeqCst), 0);
    }
}
