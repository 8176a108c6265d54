//! Evolution cycle state machine and result types.

use std::fmt;

use evoloop_core::{CycleId, Mutation, Time, ValidationReport, VersionId};
use serde::Serialize;

use crate::error::{EvolutionError, Result};

/// Stage of one evolution cycle.
///
/// ```text
/// Admitted -> Analyzed -> Planned -> Mutated -> Validated -> Decided
///     |           |          |          |           |           |
///     +-----------+----------+----------+-----------+-----------+--> Approved | Rejected | Error
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleStage {
    Admitted,
    Analyzed,
    Planned,
    Mutated,
    Validated,
    Decided,
    Approved,
    Rejected,
    Error,
}

impl CycleStage {
    /// Whether the cycle is over.
    pub fn is_terminal(self) -> bool {
        matches!(self, CycleStage::Approved | CycleStage::Rejected | CycleStage::Error)
    }

    /// Whether `self -> to` is a legal transition.
    pub fn can_advance(self, to: CycleStage) -> bool {
        use CycleStage::*;
        match (self, to) {
            (from, _) if from.is_terminal() => false,
            (_, Error) => true,
            (Admitted, Analyzed | Rejected) => true,
            (Analyzed, Planned | Rejected) => true,
            (Planned, Mutated | Rejected) => true,
            (Mutated, Validated) => true,
            (Validated, Decided) => true,
            // Only a governance decision can approve.
            (Decided, Approved | Rejected) => true,
            _ => false,
        }
    }
}

/// Terminal status reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CycleStatus {
    Approved,
    Rejected,
    RejectedTooRisky,
    Error,
}

impl fmt::Display for CycleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CycleStatus::Approved => "APPROVED",
            CycleStatus::Rejected => "REJECTED",
            CycleStatus::RejectedTooRisky => "REJECTED_TOO_RISKY",
            CycleStatus::Error => "ERROR",
        };
        f.write_str(s)
    }
}

/// Why a cycle was rejected.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Rejection {
    /// Another cycle holds the evolution lock
    ConcurrentCycle,
    /// Too soon after the previous cycle
    Cooldown { remaining_secs: u64 },
    /// Governance refused admission (drift, promotion in progress)
    Admission { reason: String },
    /// Analysis risk above the ceiling
    TooRisky { risk: f64, ceiling: f64 },
    /// No mutation fits the budget
    NothingToDo,
    /// Validation verdict was FAIL
    ValidationFailed { reason: String },
    /// Governance refused promotion of a passing candidate
    Governance { reason: String },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::ConcurrentCycle => write!(f, "another evolution cycle is in flight"),
            Rejection::Cooldown { remaining_secs } => {
                write!(f, "cooldown active for another {}s", remaining_secs)
            }
            Rejection::Admission { reason } => write!(f, "admission refused: {}", reason),
            Rejection::TooRisky { risk, ceiling } => {
                write!(f, "pruning risk {:.3} exceeds ceiling {:.3}", risk, ceiling)
            }
            Rejection::NothingToDo => write!(f, "no applicable mutation"),
            Rejection::ValidationFailed { reason } => write!(f, "validation failed: {}", reason),
            Rejection::Governance { reason } => write!(f, "{}", reason),
        }
    }
}

/// Before/after numbers of a candidate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiffSummary {
    pub parameters_before: u64,
    pub parameters_after: u64,
    pub reduction_pct: f64,
    pub bytes_before: u64,
    pub bytes_after: u64,
    pub compression_ratio: f64,
    pub plan: Vec<Mutation>,
}

/// One entry of the stage trace.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageTrace {
    pub stage: CycleStage,
    pub at: Time,
    pub note: String,
}

/// Everything a caller learns about a finished cycle.
#[derive(Debug, Clone, Serialize)]
pub struct EvolutionResult {
    pub cycle_id: CycleId,
    pub trigger: String,
    pub status: CycleStatus,
    /// Active version when the cycle was admitted
    pub parent: VersionId,
    pub new_version: Option<VersionId>,
    pub rejection: Option<Rejection>,
    pub error: Option<String>,
    pub analysis_risk: Option<f64>,
    pub diff: Option<DiffSummary>,
    pub report: Option<ValidationReport>,
    pub trace: Vec<StageTrace>,
    pub started_at: Time,
    pub finished_at: Time,
}

impl EvolutionResult {
    /// Whether the candidate was promoted.
    pub fn approved(&self) -> bool {
        self.status == CycleStatus::Approved
    }
}

/// Mutable bookkeeping of a cycle in flight.
#[derive(Debug)]
pub struct Cycle {
    id: CycleId,
    trigger: String,
    parent: VersionId,
    stage: CycleStage,
    trace: Vec<StageTrace>,
    started_at: Time,
    analysis_risk: Option<f64>,
    diff: Option<DiffSummary>,
    report: Option<ValidationReport>,
}

impl Cycle {
    /// Start a cycle in the `Admitted` stage.
    pub fn admit(trigger: impl Into<String>, parent: VersionId) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: CycleId::new(),
            trigger: trigger.into(),
            parent,
            stage: CycleStage::Admitted,
            trace: vec![StageTrace {
                stage: CycleStage::Admitted,
                at: now,
                note: format!("parent {}", parent),
            }],
            started_at: now,
            analysis_risk: None,
            diff: None,
            report: None,
        }
    }

    /// Cycle id.
    pub fn id(&self) -> CycleId {
        self.id
    }

    /// Trigger reason.
    pub fn trigger(&self) -> &str {
        &self.trigger
    }

    /// Version the cycle started from.
    pub fn parent(&self) -> VersionId {
        self.parent
    }

    /// Current stage.
    pub fn stage(&self) -> CycleStage {
        self.stage
    }

    /// Move to the next stage.
    pub fn advance(&mut self, to: CycleStage, note: impl Into<String>) -> Result<()> {
        if !self.stage.can_advance(to) {
            return Err(EvolutionError::IllegalStage {
                from: self.stage,
                to,
            });
        }
        self.stage = to;
        self.trace.push(StageTrace {
            stage: to,
            at: chrono::Utc::now(),
            note: note.into(),
        });
        Ok(())
    }

    /// Record the analysis risk.
    pub fn set_risk(&mut self, risk: f64) {
        self.analysis_risk = Some(risk);
    }

    /// Record the candidate diff.
    pub fn set_diff(&mut self, diff: DiffSummary) {
        self.diff = Some(diff);
    }

    /// Record the validation report.
    pub fn set_report(&mut self, report: ValidationReport) {
        self.report = Some(report);
    }

    /// The validation report, once validated.
    pub fn report(&self) -> Option<&ValidationReport> {
        self.report.as_ref()
    }

    /// Close the cycle and build its result.
    ///
    /// Forces the terminal stage matching `status` if the cycle is not
    /// already terminal.
    pub fn finish(
        mut self,
        status: CycleStatus,
        new_version: Option<VersionId>,
        rejection: Option<Rejection>,
        error: Option<String>,
    ) -> EvolutionResult {
        let terminal = match status {
            CycleStatus::Approved => CycleStage::Approved,
            CycleStatus::Rejected | CycleStatus::RejectedTooRisky => CycleStage::Rejected,
            CycleStatus::Error => CycleStage::Error,
        };
        if !self.stage.is_terminal() {
            let note = rejection
                .as_ref()
                .map(|r| r.to_string())
                .or_else(|| error.clone())
                .unwrap_or_default();
            if self.advance(terminal, note).is_err() {
                // Unreachable for well-formed callers; keep the trace honest.
                self.stage = CycleStage::Error;
            }
        }

        EvolutionResult {
            cycle_id: self.id,
            trigger: self.trigger,
            status,
            parent: self.parent,
            new_version,
            rejection,
            error,
            analysis_risk: self.analysis_risk,
            diff: self.diff,
            report: self.report,
            trace: self.trace,
            started_at: self.started_at,
            finished_at: chrono::Utc::now(),
        }
    }
}
