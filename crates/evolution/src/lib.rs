//! Evolution layer - the closed self-evolution loop.
//!
//! One cycle turns observed usage into a smaller candidate model, validates
//! it and hands it to governance:
//!
//! ```text
//! Profile → Analyze → Plan → Mutate (inherit + distill) → Validate → Govern
//! ```
//!
//! [`EvolutionController`] wires the stages together and is the interface
//! external callers use.

#![warn(missing_docs)]

pub mod controller;
pub mod cycle;
pub mod distill;
pub mod engine;
pub mod error;
pub mod mutate;
pub mod planner;

pub use controller::EvolutionController;
pub use cycle::{
    Cycle, CycleStage, CycleStatus, DiffSummary, EvolutionResult, Rejection, StageTrace,
};
pub use distill::{Distiller, NoopDistiller, NormRecoveryDistiller};
pub use engine::{AnalysisProvider, EvolutionEngine};
pub use error::{EvolutionError, Result};
pub use mutate::{apply_plan, MutationError};
pub use planner::{PlanSelection, PlanSelector, ScoredPlan};
