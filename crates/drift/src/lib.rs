//! Drift detection.
//!
//! Compares a rolling window of recent outputs against a reference frozen at
//! the last promotion. The detector runs independently of the evolution
//! cycle; its flag is an input to governance and never triggers a mutation.

#![warn(missing_docs)]

pub mod detector;
pub mod stats;

pub use detector::DriftDetector;
