//! Versioned evaluation sets.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::validator::{Result, ValidationError};

/// A prompt with a known answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactualCheck {
    /// Question put to the model
    pub prompt: String,
    /// Case-insensitive substring the output must contain
    pub expected: String,
}

/// Fixed inputs every candidate is judged on.
///
/// The version string is recorded in each report so results stay
/// comparable only within one set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationSet {
    /// Identifies the set in reports
    pub version: String,
    /// Prompts compared between parent and candidate
    pub reference_prompts: Vec<String>,
    /// Prompts with a known answer for the hallucination check
    pub factual_checks: Vec<FactualCheck>,
    /// Prompts timed for the latency check
    pub latency_batch: Vec<String>,
}

impl EvaluationSet {
    /// Built-in general-knowledge set.
    pub fn standard() -> Self {
        let reference_prompts: Vec<String> = [
            "Explain quantum computing in simple terms.",
            "Summarize the theory of relativity.",
            "What is artificial intelligence?",
            "Give three benefits of exercise.",
            "What is machine learning?",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        let factual_checks = [
            ("What is the capital of France?", "paris"),
            ("Who wrote Hamlet?", "shakespeare"),
            ("What is 2 + 2?", "4"),
            ("What is the chemical symbol for gold?", "au"),
            ("How many continents are there?", "seven"),
        ]
        .iter()
        .map(|(prompt, expected)| FactualCheck {
            prompt: prompt.to_string(),
            expected: expected.to_string(),
        })
        .collect();

        Self {
            version: "standard-1".to_string(),
            latency_batch: reference_prompts.clone(),
            reference_prompts,
            factual_checks,
        }
    }

    /// Load a set from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ValidationError::EvaluationSet(e.to_string()))?;
        let set: Self = serde_json::from_str(&content)
            .map_err(|e| ValidationError::EvaluationSet(e.to_string()))?;
        if set.reference_prompts.is_empty() {
            return Err(ValidationError::EvaluationSet(
                "reference_prompts must not be empty".to_string(),
            ));
        }
        Ok(set)
    }
}

impl Default for EvaluationSet {
    fn default() -> Self {
        Self::standard()
    }
}
