//! Validation sandbox.
//!
//! Runs a candidate and its parent side by side over a fixed evaluation set
//! and judges the candidate against regression thresholds. A candidate that
//! cannot be evaluated (runner error, panic, timeout) fails; it never takes
//! the caller down with it.

#![warn(missing_docs)]

pub mod validator;
pub mod evaluation;
pub mod runner;
pub mod similarity;
pub mod sandbox;

pub use validator::{Result, ValidationError, Validator};
pub use evaluation::{EvaluationSet, FactualCheck};
pub use runner::{Generation, ModelRunner, SimulatedRunner};
pub use similarity::token_similarity;
pub use sandbox::ValidationSandbox;
