//! Validation report model.

use serde::{Deserialize, Serialize};

use crate::config::ValidationThresholds;
use crate::id::CandidateId;
use crate::Time;

/// Outcome of the validation battery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    Pass,
    Fail,
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::Pass => write!(f, "PASS"),
            Verdict::Fail => write!(f, "FAIL"),
        }
    }
}

/// Raw numbers produced by the three checks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Measurements {
    /// Output similarity vs parent in `[0, 1]`
    pub similarity_score: f64,
    pub accuracy_drop_pct: f64,
    /// Fraction of factual checks failed
    pub hallucination_rate: f64,
    /// Positive = slower than parent
    pub latency_delta_pct: f64,
    pub parent_latency_ms: f64,
    pub candidate_latency_ms: f64,
}

/// Immutable report attached 1:1 to a candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub candidate_id: CandidateId,
    /// Version of the evaluation set used
    pub eval_set_version: String,
    pub similarity_score: f64,
    pub accuracy_drop_pct: f64,
    pub hallucination_rate: f64,
    pub latency_delta_pct: f64,
    pub parent_latency_ms: f64,
    pub candidate_latency_ms: f64,
    pub verdict: Verdict,
    /// One entry per violated criterion
    pub failures: Vec<String>,
    pub evaluated_at: Time,
}

impl ValidationReport {
    /// Judge measurements against thresholds.
    pub fn evaluate(
        candidate_id: CandidateId,
        eval_set_version: impl Into<String>,
        m: Measurements,
        thresholds: &ValidationThresholds,
    ) -> Self {
        let mut failures = Vec::new();

        if !(m.accuracy_drop_pct <= thresholds.max_accuracy_drop_pct) {
            failures.push(format!(
                "accuracy drop {:.2}% exceeds max {:.2}%",
                m.accuracy_drop_pct, thresholds.max_accuracy_drop_pct
            ));
        }
        if !(m.hallucination_rate <= thresholds.max_hallucination_rate) {
            failures.push(format!(
                "hallucination rate {:.3} exceeds max {:.3}",
                m.hallucination_rate, thresholds.max_hallucination_rate
            ));
        }
        if !(m.latency_delta_pct <= thresholds.max_latency_regression_pct) {
            failures.push(format!(
                "latency regression {:.1}% exceeds max {:.1}%",
                m.latency_delta_pct, thresholds.max_latency_regression_pct
            ));
        }
        if !(m.similarity_score >= thresholds.min_similarity) {
            failures.push(format!(
                "similarity {:.3} below min {:.3}",
                m.similarity_score, thresholds.min_similarity
            ));
        }

        let verdict = if failures.is_empty() { Verdict::Pass } else { Verdict::Fail };

        Self {
            candidate_id,
            eval_set_version: eval_set_version.into(),
            similarity_score: m.similarity_score,
            accuracy_drop_pct: m.accuracy_drop_pct,
            hallucination_rate: m.hallucination_rate,
            latency_delta_pct: m.latency_delta_pct,
            parent_latency_ms: m.parent_latency_ms,
            candidate_latency_ms: m.candidate_latency_ms,
            verdict,
            failures,
            evaluated_at: chrono::Utc::now(),
        }
    }

    /// FAIL report for a candidate that could not be evaluated at all
    /// (timeout, runner crash).
    pub fn failed(
        candidate_id: CandidateId,
        eval_set_version: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            candidate_id,
            eval_set_version: eval_set_version.into(),
            similarity_score: 0.0,
            accuracy_drop_pct: 100.0,
            hallucination_rate: 1.0,
            latency_delta_pct: 0.0,
            parent_latency_ms: 0.0,
            candidate_latency_ms: 0.0,
            verdict: Verdict::Fail,
            failures: vec![reason.into()],
            evaluated_at: chrono::Utc::now(),
        }
    }

    /// Baseline report carried by the root model, which is its own parent.
    pub fn baseline(candidate_id: CandidateId) -> Self {
        Self {
            candidate_id,
            eval_set_version: "baseline".to_string(),
            similarity_score: 1.0,
            accuracy_drop_pct: 0.0,
            hallucination_rate: 0.0,
            latency_delta_pct: 0.0,
            parent_latency_ms: 0.0,
            candidate_latency_ms: 0.0,
            verdict: Verdict::Pass,
            failures: Vec::new(),
            evaluated_at: chrono::Utc::now(),
        }
    }

    /// Whether the verdict is PASS.
    pub fn passed(&self) -> bool {
        self.verdict == Verdict::Pass
    }

    /// Failures joined into one human-readable reason.
    pub fn failure_summary(&self) -> String {
        self.failures.join("; ")
    }
}
