//! Rolling-window drift detector.

use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use evoloop_core::config::DriftConfig;
use evoloop_core::{DriftComponents, DriftSample, TelemetryRecord, Time};

use crate::stats::{centroid, cosine_shift, distribution, mean_variance, total_variation};

#[derive(Debug, Clone)]
struct Observation {
    embedding: Vec<f32>,
    tokens: Vec<u32>,
}

#[derive(Debug, Clone)]
struct Reference {
    centroid: Option<Vec<f64>>,
    tokens: HashMap<u32, f64>,
    frozen_at: Time,
}

#[derive(Debug, Default)]
struct State {
    window: VecDeque<Observation>,
    reference: Option<Reference>,
}

/// Scores how far recent outputs have moved from the last promoted reference.
///
/// `observe` is O(1) and never blocks on scoring: `score` copies the window
/// under the lock and computes outside it.
pub struct DriftDetector {
    config: DriftConfig,
    state: RwLock<State>,
    history: Mutex<VecDeque<DriftSample>>,
}

impl DriftDetector {
    /// Create a detector with default settings.
    pub fn new() -> Self {
        Self::with_config(DriftConfig::default())
    }

    /// Create a detector with explicit settings.
    pub fn with_config(config: DriftConfig) -> Self {
        Self {
            state: RwLock::new(State {
                window: VecDeque::with_capacity(config.window_size),
                reference: None,
            }),
            history: Mutex::new(VecDeque::new()),
            config,
        }
    }

    /// Active settings.
    pub fn config(&self) -> &DriftConfig {
        &self.config
    }

    /// Record one request's output.
    pub fn observe(&self, record: &TelemetryRecord) {
        self.observe_output(record.output_embedding.clone(), record.output_token_ids.clone());
    }

    /// Record a raw output embedding and its token ids.
    pub fn observe_output(&self, embedding: Vec<f32>, tokens: Vec<u32>) {
        let mut state = self.state.write();
        if state.window.len() >= self.config.window_size.max(1) {
            state.window.pop_front();
        }
        state.window.push_back(Observation { embedding, tokens });
    }

    /// Observations currently in the window.
    pub fn window_len(&self) -> usize {
        self.state.read().window.len()
    }

    /// Whether a reference has been frozen.
    pub fn has_reference(&self) -> bool {
        self.state.read().reference.is_some()
    }

    /// When the current reference was frozen.
    pub fn reference_frozen_at(&self) -> Option<Time> {
        self.state.read().reference.as_ref().map(|r| r.frozen_at)
    }

    /// Freeze the current window as the new reference distribution.
    ///
    /// Returns `false` and leaves the old reference in place when the window
    /// is empty.
    pub fn freeze_reference(&self) -> bool {
        let window: Vec<Observation> = {
            let state = self.state.read();
            state.window.iter().cloned().collect()
        };
        if window.is_empty() {
            debug!("Drift reference not frozen: window is empty");
            return false;
        }

        let reference = Reference {
            centroid: centroid(window.iter().map(|o| o.embedding.as_slice())),
            tokens: distribution(window.iter().flat_map(|o| o.tokens.iter())),
            frozen_at: chrono::Utc::now(),
        };
        self.state.write().reference = Some(reference);
        info!("Froze drift reference over {} observations", window.len());
        true
    }

    /// Compute the current drift sample and append it to the history.
    pub fn score(&self) -> DriftSample {
        let (window, reference) = {
            let state = self.state.read();
            (
                state.window.iter().cloned().collect::<Vec<_>>(),
                state.reference.clone(),
            )
        };

        let sample = match reference {
            Some(reference) if !window.is_empty() => self.compute(&window, &reference),
            _ => DriftSample::quiet(self.config.threshold),
        };

        if sample.flag {
            warn!(
                "Drift score {:.3} exceeds threshold {:.3}",
                sample.score, sample.threshold
            );
        }
        self.record(sample.clone());
        sample
    }

    /// Whether the latest score is over threshold.
    pub fn is_drifting(&self) -> bool {
        self.score().flag
    }

    /// Most recent samples, newest first.
    pub fn history(&self, limit: usize) -> Vec<DriftSample> {
        self.history.lock().iter().rev().take(limit).cloned().collect()
    }

    /// Feed the detector from a telemetry subscription, scoring every
    /// `score_every` observations. Ends when the sender is dropped.
    pub fn spawn_monitor(
        self: Arc<Self>,
        mut rx: broadcast::Receiver<TelemetryRecord>,
        score_every: usize,
    ) -> JoinHandle<()> {
        let score_every = score_every.max(1);
        tokio::spawn(async move {
            let mut seen = 0usize;
            loop {
                match rx.recv().await {
                    Ok(record) => {
                        self.observe(&record);
                        seen += 1;
                        if seen % score_every == 0 {
                            self.score();
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Drift monitor lagged, skipped {} records", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("Telemetry stream closed, drift monitor exiting");
                        break;
                    }
                }
            }
        })
    }

    fn compute(&self, window: &[Observation], reference: &Reference) -> DriftSample {
        let embedding_shift = match (
            centroid(window.iter().map(|o| o.embedding.as_slice())),
            reference.centroid.as_ref(),
        ) {
            (Some(current), Some(base)) => cosine_shift(&current, base),
            _ => 0.0,
        };

        let current_tokens = distribution(window.iter().flat_map(|o| o.tokens.iter()));
        let vocabulary_shift = total_variation(&current_tokens, &reference.tokens);

        let span = self.config.variance_span;
        let recent: Vec<&[f32]> = window
            .iter()
            .rev()
            .filter(|o| !o.embedding.is_empty())
            .take(span)
            .map(|o| o.embedding.as_slice())
            .collect();
        let intent_variance = if span > 0 && recent.len() == span {
            mean_variance(&recent)
        } else {
            0.0
        };

        let components = DriftComponents {
            embedding_shift,
            vocabulary_shift,
            intent_variance,
        };
        let score = self.config.embedding_weight * embedding_shift
            + self.config.vocabulary_weight * vocabulary_shift
            + self.config.variance_weight * intent_variance;

        debug!(
            "Drift terms: embedding {:.3}, vocabulary {:.3}, variance {:.3}",
            embedding_shift, vocabulary_shift, intent_variance
        );
        DriftSample::new(score, components, self.config.threshold, window.len())
    }

    fn record(&self, sample: DriftSample) {
        let mut history = self.history.lock();
        if history.len() >= self.config.history_capacity.max(1) {
            history.pop_front();
        }
        history.push_back(sample);
    }
}

impl Default for DriftDetector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // cos(angle) = 0.3, so a full window of these scores 0.6 * 0.7 = 0.42.
    const DRIFTED: [f32; 2] = [0.3, 0.953_939_2];

    fn settle(detector: &DriftDetector, embedding: [f32; 2], n: usize) {
        for _ in 0..n {
            detector.observe_output(embedding.to_vec(), Vec::new());
        }
    }

    #[test]
    fn test_no_reference_is_quiet() {
        let detector = DriftDetector::new();
        settle(&detector, DRIFTED, 5);
        let sample = detector.score();
        assert_eq!(sample.score, 0.0);
        assert!(!sample.flag);
    }

    #[test]
    fn test_empty_window_cannot_freeze() {
        let detector = DriftDetector::new();
        assert!(!detector.freeze_reference());
        assert!(!detector.has_reference());
        assert!(!detector.is_drifting());
    }

    #[test]
    fn test_stable_outputs_score_zero() {
        let detector = DriftDetector::new();
        settle(&detector, [1.0, 0.0], 20);
        assert!(detector.freeze_reference());
        settle(&detector, [1.0, 0.0], 20);
        let sample = detector.score();
        assert!(sample.score.abs() < 1e-9);
        assert!(!sample.flag);
    }

    #[test]
    fn test_shifted_outputs_cross_threshold() {
        let detector = DriftDetector::new();
        settle(&detector, [1.0, 0.0], 20);
        detector.freeze_reference();
        settle(&detector, DRIFTED, 20);

        let sample = detector.score();
        assert!((sample.score - 0.42).abs() < 1e-4, "score {}", sample.score);
        assert!(sample.flag);
        assert_eq!(sample.window_len, 20);
        assert!((sample.components.embedding_shift - 0.7).abs() < 1e-4);
        assert_eq!(sample.components.intent_variance, 0.0);
    }

    #[test]
    fn test_window_is_bounded() {
        let detector = DriftDetector::with_config(DriftConfig {
            window_size: 3,
            ..Default::default()
        });
        settle(&detector, [1.0, 0.0], 10);
        assert_eq!(detector.window_len(), 3);
    }

    #[test]
    fn test_vocabulary_shift_contributes() {
        let detector = DriftDetector::new();
        for _ in 0..10 {
            detector.observe_output(vec![1.0, 0.0], vec![1, 2, 3]);
        }
        detector.freeze_reference();
        for _ in 0..20 {
            detector.observe_output(vec![1.0, 0.0], vec![7, 8, 9]);
        }
        let sample = detector.score();
        assert!((sample.components.vocabulary_shift - 1.0).abs() < 1e-9);
        assert!((sample.score - 0.3).abs() < 1e-9);
        assert!(!sample.flag);
    }

    #[test]
    fn test_rebaseline_clears_drift() {
        let detector = DriftDetector::new();
        settle(&detector, [1.0, 0.0], 20);
        detector.freeze_reference();
        settle(&detector, DRIFTED, 20);
        assert!(detector.is_drifting());

        detector.freeze_reference();
        assert!(!detector.is_drifting());
    }

    #[test]
    fn test_history_newest_first_and_bounded() {
        let detector = DriftDetector::with_config(DriftConfig {
            history_capacity: 2,
            ..Default::default()
        });
        settle(&detector, [1.0, 0.0], 20);
        detector.freeze_reference();
        detector.score();
        settle(&detector, DRIFTED, 20);
        detector.score();
        detector.score();

        let history = detector.history(10);
        assert_eq!(history.len(), 2);
        assert!(history.iter().all(|s| s.flag));
        assert_eq!(detector.history(1).len(), 1);
    }

    #[tokio::test]
    async fn test_monitor_consumes_stream() {
        let detector = Arc::new(DriftDetector::new());
        let (tx, rx) = broadcast::channel(64);
        let handle = detector.clone().spawn_monitor(rx, 5);

        for _ in 0..10 {
            let mut record = TelemetryRecord::new(chrono::Utc::now(), 10.0);
            record.output_embedding = vec![1.0, 0.0];
            tx.send(record).unwrap();
        }
        drop(tx);
        handle.await.unwrap();

        assert_eq!(detector.window_len(), 10);
        assert_eq!(detector.history(10).len(), 2);
    }
}
