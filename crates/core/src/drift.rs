//! Drift samples.

use serde::{Deserialize, Serialize};

use crate::Time;

/// Individual terms of a drift score.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DriftComponents {
    pub embedding_shift: f64,
    pub vocabulary_shift: f64,
    pub intent_variance: f64,
}

/// One drift measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftSample {
    pub timestamp: Time,
    pub score: f64,
    pub components: DriftComponents,
    pub threshold: f64,
    /// `score > threshold`
    pub flag: bool,
    /// Observations the score was computed over
    pub window_len: usize,
}

impl DriftSample {
    /// Build a sample, deriving the flag from the threshold.
    pub fn new(score: f64, components: DriftComponents, threshold: f64, window_len: usize) -> Self {
        Self {
            timestamp: chrono::Utc::now(),
            score,
            components,
            threshold,
            flag: score > threshold,
            window_len,
        }
    }

    /// A zero-drift sample.
    pub fn quiet(threshold: f64) -> Self {
        Self::new(0.0, DriftComponents::default(), threshold, 0)
    }
}
