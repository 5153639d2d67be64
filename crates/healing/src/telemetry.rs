//! Monitor phase: telemetry collection and per-node feature extraction
//!
//! Frames come from an external collector. A node missing from a frame is a
//! telemetry gap for that tick; missing repeatedly it becomes a silence.

use crate::error::{HealingError, HealingResult};
use async_trait::async_trait;
use meshheal_core::{MetricKind, NodeId, TelemetryFrame, TelemetrySample};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

/// Samples kept per node for baselines
const HISTORY_DEPTH: usize = 32;

/// Source of telemetry frames
#[async_trait]
pub trait TelemetrySource: Send + Sync {
    /// Collect the latest frame
    async fn collect(&self) -> HealingResult<TelemetryFrame>;
}

/// In-memory source whose frame is replaced by the caller
#[derive(Debug, Clone, Default)]
pub struct SharedTelemetrySource {
    frame: Arc<RwLock<TelemetryFrame>>,
}

impl SharedTelemetrySource {
    /// Create a source serving an empty frame
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the served frame
    pub fn set(&self, frame: TelemetryFrame) {
        *self.frame.write().unwrap_or_else(|e| e.into_inner()) = frame;
    }

    /// Edit the served frame in place
    pub fn update<F: FnOnce(&mut TelemetryFrame)>(&self, edit: F) {
        edit(&mut self.frame.write().unwrap_or_else(|e| e.into_inner()));
    }
}

#[async_trait]
impl TelemetrySource for SharedTelemetrySource {
    async fn collect(&self) -> HealingResult<TelemetryFrame> {
        Ok(self.frame.read().unwrap_or_else(|e| e.into_inner()).clone())
    }
}

/// Source that re-reads a JSON frame file on every collection
#[derive(Debug, Clone)]
pub struct FileTelemetrySource {
    path: PathBuf,
}

impl FileTelemetrySource {
    /// Serve frames from `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl TelemetrySource for FileTelemetrySource {
    async fn collect(&self) -> HealingResult<TelemetryFrame> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| HealingError::TelemetrySource(format!("{}: {}", self.path.display(), e)))?;
        TelemetryFrame::from_json(&raw).map_err(|e| HealingError::TelemetrySource(e.to_string()))
    }
}

/// Scorer input for one node
#[derive(Debug, Clone, PartialEq)]
pub struct NodeFeatures {
    /// Node id
    pub node_id: NodeId,
    /// Current sample
    pub sample: TelemetrySample,
    /// Fraction of metrics present in the sample
    pub completeness: f64,
    /// Prior samples available for this node
    pub history_len: usize,
    /// Rolling mean per metric over prior samples
    pub baseline: BTreeMap<MetricKind, f64>,
}

impl NodeFeatures {
    /// Present metrics of the current sample
    pub fn values(&self) -> BTreeMap<MetricKind, f64> {
        self.sample.present_metrics().into_iter().collect()
    }
}

/// Bounded per-node sample history
#[derive(Debug, Default)]
pub struct FeatureHistory {
    samples: HashMap<NodeId, VecDeque<TelemetrySample>>,
}

impl FeatureHistory {
    /// Create empty history
    pub fn new() -> Self {
        Self::default()
    }

    /// Build features for a node from its current sample and prior history
    pub fn features(&self, node_id: &str, sample: &TelemetrySample) -> NodeFeatures {
        let prior = self.samples.get(node_id);
        let mut baseline = BTreeMap::new();

        if let Some(prior) = prior {
            for kind in MetricKind::ALL {
                let values: Vec<f64> = prior.iter().filter_map(|s| s.get(kind)).collect();
                if !values.is_empty() {
                    baseline.insert(kind, values.iter().sum::<f64>() / values.len() as f64);
                }
            }
        }

        NodeFeatures {
            node_id: node_id.to_string(),
            sample: sample.clone(),
            completeness: sample.completeness(),
            history_len: prior.map(|p| p.len()).unwrap_or(0),
            baseline,
        }
    }

    /// Append every sample in the frame
    pub fn record(&mut self, frame: &TelemetryFrame) {
        for (node_id, sample) in &frame.samples {
            let entry = self.samples.entry(node_id.clone()).or_default();
            if entry.len() >= HISTORY_DEPTH {
                entry.pop_front();
            }
            entry.push_back(sample.clone());
        }
    }

    /// Forget a node
    pub fn forget(&mut self, node_id: &str) {
        self.samples.remove(node_id);
    }
}

/// Counts consecutive frames each node has been missing from
#[derive(Debug, Default)]
pub struct SilenceTracker {
    missing: HashMap<NodeId, u32>,
}

impl SilenceTracker {
    /// Create a tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Update counters for the expected nodes; returns each node's current streak
    pub fn observe<'a, I>(&mut self, frame: &TelemetryFrame, expected: I) -> BTreeMap<NodeId, u32>
    where
        I: IntoIterator<Item = &'a NodeId>,
    {
        let mut streaks = BTreeMap::new();
        for node_id in expected {
            let streak = if frame.has(node_id) {
                self.missing.remove(node_id);
                0
            } else {
                let counter = self.missing.entry(node_id.clone()).or_insert(0);
                *counter += 1;
                *counter
            };
            streaks.insert(node_id.clone(), streak);
        }
        streaks
    }

    /// Current streak for a node
    pub fn streak(&self, node_id: &str) -> u32 {
        self.missing.get(node_id).copied().unwrap_or(0)
    }

    /// Forget a node
    pub fn forget(&mut self, node_id: &str) {
        self.missing.remove(node_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(cpu: f64) -> TelemetrySample {
        TelemetrySample {
            cpu_pct: Some(cpu),
            latency_ms: Some(5.0),
            ..Default::default()
        }
    }

    #[test]
    fn test_baseline_is_mean_of_prior_samples() {
        let mut history = FeatureHistory::new();
        for cpu in [10.0, 20.0, 30.0] {
            let mut frame = TelemetryFrame::new();
            frame.insert("n1", sample(cpu));
            history.record(&frame);
        }
        let features = history.features("n1", &sample(90.0));
        assert_eq!(features.history_len, 3);
        assert!((features.baseline[&MetricKind::CpuPct] - 20.0).abs() < 1e-9);
        assert!(!features.baseline.contains_key(&MetricKind::MemPct));
        assert!((features.completeness - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_history_is_bounded() {
        let mut history = FeatureHistory::new();
        for i in 0..(HISTORY_DEPTH + 5) {
            let mut frame = TelemetryFrame::new();
            frame.insert("n1", sample(i as f64));
            history.record(&frame);
        }
        assert_eq!(history.features("n1", &sample(0.0)).history_len, HISTORY_DEPTH);
    }

    #[test]
    fn test_silence_streaks_reset_on_report() {
        let expected = vec!["a".to_string(), "b".to_string()];
        let mut tracker = SilenceTracker::new();
        let mut frame = TelemetryFrame::new();
        frame.insert("a", sample(10.0));

        tracker.observe(&frame, &expected);
        let streaks = tracker.observe(&frame, &expected);
        assert_eq!(streaks["a"], 0);
        assert_eq!(streaks["b"], 2);

        frame.insert("b", sample(10.0));
        tracker.observe(&frame, &expected);
        assert_eq!(tracker.streak("b"), 0);
    }

    #[tokio::test]
    async fn test_shared_source_serves_latest_frame() {
        let source = SharedTelemetrySource::new();
        source.update(|frame| frame.insert("n1", sample(42.0)));
        let frame = source.collect().await.unwrap();
        assert_eq!(frame.samples["n1"].cpu_pct, Some(42.0));
    }

    #[tokio::test]
    async fn test_file_source_reads_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("telemetry.json");
        std::fs::write(&path, r#"{"n1": {"mem_pct": 33.0}}"#).unwrap();

        let frame = FileTelemetrySource::new(&path).collect().await.unwrap();
        assert_eq!(frame.samples["n1"].mem_pct, Some(33.0));

        let missing = FileTelemetrySource::new(dir.path().join("nope.json")).collect().await;
        assert!(matches!(missing, Err(HealingError::TelemetrySource(_))));
    }
}
