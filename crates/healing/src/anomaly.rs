//! Anomaly detection
//!
//! Node scoring goes through a pluggable [`AnomalyScorer`]. The detector adds
//! the checks that do not depend on a model: silence, identity invalidation
//! and direct link measurements.
//!
//! Thresholds come from a [`ThresholdTable`] computed once per tick from the
//! knowledge view, so every node in a tick is judged against the same cutoffs.

use crate::telemetry::{FeatureHistory, NodeFeatures, SilenceTracker};
use crate::worker_pool::WorkerPool;
use meshheal_core::{current_timestamp_ms, DetectorConfig, MetricKind, NodeId, TelemetryFrame};
use meshheal_mesh::{LinkKey, LinkQuality, NodeState, TopologySnapshot};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

/// Signal an anomaly was raised on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Signal {
    /// CPU utilisation
    Cpu,
    /// Memory utilisation
    Memory,
    /// Latency
    Latency,
    /// Packet loss
    PacketLoss,
    /// Throughput deficit
    Throughput,
    /// Node stopped reporting
    Silence,
    /// Link measured directly
    LinkQuality,
    /// Identity provider invalidated the node
    Identity,
}

impl Signal {
    /// Every signal, in embedding order
    pub const ALL: [Signal; 8] = [
        Signal::Cpu,
        Signal::Memory,
        Signal::Latency,
        Signal::PacketLoss,
        Signal::Throughput,
        Signal::Silence,
        Signal::LinkQuality,
        Signal::Identity,
    ];

    /// Signal for a telemetry metric
    pub fn from_metric(kind: MetricKind) -> Self {
        match kind {
            MetricKind::CpuPct => Signal::Cpu,
            MetricKind::MemPct => Signal::Memory,
            MetricKind::LatencyMs => Signal::Latency,
            MetricKind::PacketLossPct => Signal::PacketLoss,
            MetricKind::ThroughputMbps => Signal::Throughput,
        }
    }

    /// Position in [`Signal::ALL`]
    pub fn index(&self) -> usize {
        Signal::ALL.iter().position(|s| s == self).unwrap_or(0)
    }

    /// Whether the signal comes from the scorer (and so has adaptive thresholds)
    pub fn is_scored(&self) -> bool {
        !matches!(self, Signal::Silence | Signal::Identity)
    }

    /// Stable name
    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::Cpu => "cpu",
            Signal::Memory => "memory",
            Signal::Latency => "latency",
            Signal::PacketLoss => "packet_loss",
            Signal::Throughput => "throughput",
            Signal::Silence => "silence",
            Signal::LinkQuality => "link_quality",
            Signal::Identity => "identity",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an anomaly is about
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Subject {
    /// A node
    Node(NodeId),
    /// A link
    Link(LinkKey),
}

impl Subject {
    /// Node ids involved (one for a node, both endpoints for a link)
    pub fn node_ids(&self) -> Vec<&NodeId> {
        match self {
            Subject::Node(id) => vec![id],
            Subject::Link(key) => vec![&key.a, &key.b],
        }
    }

    /// Node id if this is a node subject
    pub fn as_node(&self) -> Option<&NodeId> {
        match self {
            Subject::Node(id) => Some(id),
            Subject::Link(_) => None,
        }
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subject::Node(id) => write!(f, "node:{}", id),
            Subject::Link(key) => write!(f, "link:{}", key),
        }
    }
}

/// A flagged anomaly
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyEvent {
    /// Unique event id
    pub id: String,
    /// Node or link the anomaly is about
    pub subject: Subject,
    /// Anomaly score (0.0 to 1.0)
    pub score: f64,
    /// Confidence in the score (0.0 to 1.0)
    pub confidence: f64,
    /// Detection time (Unix epoch milliseconds)
    pub timestamp_ms: u64,
    /// Snapshot version the event was computed against
    pub snapshot_version: u64,
    /// Dominant signal
    pub signal: Signal,
    /// Metrics that contributed to the score
    pub contributing: Vec<MetricKind>,
    /// Metric values at detection time
    pub metrics: BTreeMap<MetricKind, f64>,
}

impl AnomalyEvent {
    /// Create an event stamped now with a fresh id
    pub fn new(subject: Subject, signal: Signal, score: f64, confidence: f64, snapshot_version: u64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            subject,
            score: score.clamp(0.0, 1.0),
            confidence: confidence.clamp(0.0, 1.0),
            timestamp_ms: current_timestamp_ms(),
            snapshot_version,
            signal,
            contributing: Vec::new(),
            metrics: BTreeMap::new(),
        }
    }
}

/// Scorer output
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Prediction {
    /// Anomaly score (0.0 to 1.0)
    pub score: f64,
    /// Confidence (0.0 to 1.0)
    pub confidence: f64,
    /// Metric that dominated the score
    pub dominant: Option<MetricKind>,
    /// Metrics with a non-zero contribution
    pub contributing: Vec<MetricKind>,
}

/// Pluggable anomaly scoring model
pub trait AnomalyScorer: Send + Sync {
    /// Model name for logs
    fn name(&self) -> &str;

    /// Score one node given its features and those of its neighbors
    fn predict(&self, node: &NodeFeatures, neighbors: &[NodeFeatures]) -> Prediction;
}

/// Default scorer: normalized limit exceedance plus neighbor latency deviation
#[derive(Debug, Clone)]
pub struct StatisticalScorer {
    /// (soft, hard) CPU limits in percent
    pub cpu_limits: (f64, f64),
    /// (soft, hard) memory limits in percent
    pub mem_limits: (f64, f64),
    /// (soft, hard) latency limits in milliseconds
    pub latency_limits: (f64, f64),
    /// (soft, hard) loss limits in percent
    pub loss_limits: (f64, f64),
    /// (soft, hard) throughput floors in Mbit/s
    pub throughput_floors: (f64, f64),
    /// Weight of neighbor deviation in the final score
    pub neighbor_weight: f64,
    /// Samples needed for full history confidence
    pub min_history: usize,
}

impl Default for StatisticalScorer {
    fn default() -> Self {
        Self {
            cpu_limits: (70.0, 95.0),
            mem_limits: (75.0, 95.0),
            latency_limits: (50.0, 200.0),
            loss_limits: (1.0, 5.0),
            throughput_floors: (50.0, 5.0),
            neighbor_weight: 0.25,
            min_history: 3,
        }
    }
}

impl StatisticalScorer {
    /// Scorer with a custom history requirement
    pub fn with_min_history(min_history: usize) -> Self {
        Self {
            min_history,
            ..Self::default()
        }
    }

    fn exceedance(&self, kind: MetricKind, value: f64) -> f64 {
        let (soft, hard) = match kind {
            MetricKind::CpuPct => self.cpu_limits,
            MetricKind::MemPct => self.mem_limits,
            MetricKind::LatencyMs => self.latency_limits,
            MetricKind::PacketLossPct => self.loss_limits,
            MetricKind::ThroughputMbps => {
                let (soft, hard) = self.throughput_floors;
                return ramp(soft - value, 0.0, soft - hard);
            }
        };
        ramp(value - soft, 0.0, hard - soft)
    }
}

/// Linear 0..1 ramp of `value` between `low` and `low + span`
fn ramp(value: f64, low: f64, span: f64) -> f64 {
    if span <= 0.0 {
        return if value > low { 1.0 } else { 0.0 };
    }
    ((value - low) / span).clamp(0.0, 1.0)
}

impl AnomalyScorer for StatisticalScorer {
    fn name(&self) -> &str {
        "statistical"
    }

    fn predict(&self, node: &NodeFeatures, neighbors: &[NodeFeatures]) -> Prediction {
        let mut dominant: Option<(MetricKind, f64)> = None;
        let mut contributing = Vec::new();

        for (kind, value) in node.sample.present_metrics() {
            let exceed = self.exceedance(kind, value);
            if exceed > 0.0 {
                contributing.push(kind);
                if dominant.map(|(_, best)| exceed > best).unwrap_or(true) {
                    dominant = Some((kind, exceed));
                }
            }
        }

        // Latency far above the neighborhood mean is suspicious even under the limit
        let neighbor_latency: Vec<f64> = neighbors
            .iter()
            .filter_map(|n| n.sample.get(MetricKind::LatencyMs))
            .collect();
        let deviation = match node.sample.get(MetricKind::LatencyMs) {
            Some(own) if !neighbor_latency.is_empty() => {
                let mean = neighbor_latency.iter().sum::<f64>() / neighbor_latency.len() as f64;
                ramp((own - mean) / mean.max(1.0), 0.5, 2.5)
            }
            _ => 0.0,
        };

        if dominant.is_none() && deviation > 0.0 {
            dominant = Some((MetricKind::LatencyMs, 0.0));
            contributing.push(MetricKind::LatencyMs);
        }

        let base = dominant.map(|(_, e)| e).unwrap_or(0.0);
        let score = (base + self.neighbor_weight * deviation).min(1.0);

        let history_factor = if self.min_history == 0 {
            1.0
        } else {
            0.5 + 0.5 * (node.history_len as f64 / self.min_history as f64).min(1.0)
        };

        Prediction {
            score,
            confidence: (node.completeness * history_factor).clamp(0.0, 1.0),
            dominant: dominant.map(|(kind, _)| kind),
            contributing,
        }
    }
}

/// Per-signal anomaly cutoffs for one tick
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdTable {
    thresholds: BTreeMap<Signal, f64>,
    default: f64,
    min_confidence: f64,
}

impl ThresholdTable {
    /// Same cutoff for every signal
    pub fn uniform(threshold: f64, min_confidence: f64) -> Self {
        Self {
            thresholds: BTreeMap::new(),
            default: threshold,
            min_confidence,
        }
    }

    /// Override one signal
    pub fn with(mut self, signal: Signal, threshold: f64) -> Self {
        self.thresholds.insert(signal, threshold);
        self
    }

    /// Cutoff for a signal
    pub fn threshold(&self, signal: Signal) -> f64 {
        self.thresholds.get(&signal).copied().unwrap_or(self.default)
    }

    /// Minimum confidence to flag
    pub fn min_confidence(&self) -> f64 {
        self.min_confidence
    }

    /// Whether a score/confidence pair is flagged for the signal
    pub fn flags(&self, signal: Signal, score: f64, confidence: f64) -> bool {
        score > self.threshold(signal) && confidence > self.min_confidence
    }
}

/// Outcome of one detection pass
#[derive(Debug, Clone, Default)]
pub struct DetectionReport {
    /// Flagged anomalies
    pub events: Vec<AnomalyEvent>,
    /// Nodes with partial telemetry this tick
    pub gaps: Vec<NodeId>,
    /// Nodes whose prediction was discarded for exceeding the budget
    pub discarded: Vec<NodeId>,
    /// Nodes that reached the silence threshold
    pub silent: Vec<NodeId>,
}

/// Monitor/Analyze front end: turns frames into anomaly events
pub struct AnomalyDetector {
    scorer: Arc<dyn AnomalyScorer>,
    config: DetectorConfig,
    history: FeatureHistory,
    silence: SilenceTracker,
    pool: WorkerPool,
}

impl AnomalyDetector {
    /// Create a detector
    pub fn new(scorer: Arc<dyn AnomalyScorer>, config: DetectorConfig, pool: WorkerPool) -> Self {
        Self {
            scorer,
            config,
            history: FeatureHistory::new(),
            silence: SilenceTracker::new(),
            pool,
        }
    }

    /// Name of the plugged scorer
    pub fn scorer_name(&self) -> &str {
        self.scorer.name()
    }

    /// Score every active node and link in the snapshot
    pub async fn detect(
        &mut self,
        snapshot: &Arc<TopologySnapshot>,
        frame: &TelemetryFrame,
        thresholds: &ThresholdTable,
    ) -> DetectionReport {
        let mut report = DetectionReport::default();
        let version = snapshot.version;

        let active: Vec<NodeId> = snapshot
            .nodes
            .values()
            .filter(|n| n.state == NodeState::Active)
            .map(|n| n.id.clone())
            .collect();
        for node in snapshot.nodes.values().filter(|n| n.state != NodeState::Active) {
            self.silence.forget(&node.id);
        }

        let streaks = self.silence.observe(frame, &active);
        for (node_id, streak) in &streaks {
            if *streak >= self.config.silence_ticks {
                debug!(node_id = %node_id, streak, "Node silent");
                report.silent.push(node_id.clone());
                report.events.push(AnomalyEvent::new(
                    Subject::Node(node_id.clone()),
                    Signal::Silence,
                    1.0,
                    1.0,
                    version,
                ));
            }
        }

        for node_id in &active {
            if let Some(node) = snapshot.node(node_id) {
                if !node.identity_valid {
                    report.events.push(AnomalyEvent::new(
                        Subject::Node(node_id.clone()),
                        Signal::Identity,
                        1.0,
                        1.0,
                        version,
                    ));
                }
            }
        }

        self.score_nodes(snapshot, frame, &active, thresholds, &mut report).await;
        self.check_links(snapshot, thresholds, &mut report);
        self.history.record(frame);

        report
    }

    async fn score_nodes(
        &self,
        snapshot: &Arc<TopologySnapshot>,
        frame: &TelemetryFrame,
        active: &[NodeId],
        thresholds: &ThresholdTable,
        report: &mut DetectionReport,
    ) {
        let budget = Duration::from_millis(self.config.predict_budget_ms);
        let mut jobs = Vec::new();

        for node_id in active {
            let Some(sample) = frame.samples.get(node_id) else {
                continue;
            };
            let features = self.history.features(node_id, sample);
            if features.completeness < 1.0 {
                debug!(node_id = %node_id, completeness = features.completeness, "Telemetry gap");
                report.gaps.push(node_id.clone());
            }

            let neighbors: Vec<NodeFeatures> = snapshot
                .up_neighbors(node_id)
                .into_iter()
                .filter_map(|n| frame.samples.get(n).map(|s| self.history.features(n, s)))
                .collect();

            let scorer = self.scorer.clone();
            let handle = self.pool.spawn(move || {
                let started = Instant::now();
                let prediction = scorer.predict(&features, &neighbors);
                (features, prediction, started.elapsed())
            });
            jobs.push((node_id.clone(), handle));
        }

        let rounds = (jobs.len() as u32).div_ceil(self.pool.size().max(1) as u32).max(1);
        let deadline = tokio::time::Instant::now() + budget * (rounds + 1);

        for (node_id, handle) in jobs {
            let (features, prediction, elapsed) = match tokio::time::timeout_at(deadline, handle).await {
                Ok(Ok(Ok(done))) => done,
                Ok(Ok(Err(e))) => {
                    warn!(node_id = %node_id, error = %e, "Scorer job failed; treating as telemetry gap");
                    report.discarded.push(node_id);
                    continue;
                }
                Ok(Err(e)) => {
                    warn!(node_id = %node_id, error = %e, "Scorer job aborted; treating as telemetry gap");
                    report.discarded.push(node_id);
                    continue;
                }
                Err(_) => {
                    warn!(node_id = %node_id, "Scorer missed the tick deadline; treating as telemetry gap");
                    report.discarded.push(node_id);
                    continue;
                }
            };

            if elapsed > budget {
                warn!(
                    node_id = %node_id,
                    elapsed_ms = elapsed.as_millis() as u64,
                    budget_ms = self.config.predict_budget_ms,
                    "Prediction exceeded latency budget; discarded"
                );
                report.discarded.push(node_id);
                continue;
            }

            let signal = prediction
                .dominant
                .map(Signal::from_metric)
                .unwrap_or(Signal::Latency);
            if thresholds.flags(signal, prediction.score, prediction.confidence) {
                let mut event = AnomalyEvent::new(
                    Subject::Node(node_id),
                    signal,
                    prediction.score,
                    prediction.confidence,
                    snapshot.version,
                );
                event.contributing = prediction.contributing;
                event.metrics = features.values();
                report.events.push(event);
            }
        }
    }

    fn check_links(
        &self,
        snapshot: &TopologySnapshot,
        thresholds: &ThresholdTable,
        report: &mut DetectionReport,
    ) {
        let latency_limit = self.config.link_latency_ms;
        let loss_limit = self.config.link_loss_pct;

        for link in snapshot.links.values().filter(|l| l.up) {
            let endpoints_active = [&link.key.a, &link.key.b]
                .iter()
                .all(|id| snapshot.node(id).map(|n| n.state == NodeState::Active).unwrap_or(false));
            if !endpoints_active {
                continue;
            }

            let bad = link.quality == LinkQuality::Bad;
            let over_latency = link.latency_ms > latency_limit;
            let over_loss = link.loss_pct > loss_limit;
            if !(bad || over_latency || over_loss) {
                continue;
            }

            let score = if bad {
                1.0
            } else {
                (link.latency_ms / latency_limit.max(f64::EPSILON))
                    .max(link.loss_pct / loss_limit.max(f64::EPSILON))
                    .min(1.0)
            };
            if !thresholds.flags(Signal::LinkQuality, score, 1.0) {
                continue;
            }

            let mut event = AnomalyEvent::new(
                Subject::Link(link.key.clone()),
                Signal::LinkQuality,
                score,
                1.0,
                snapshot.version,
            );
            if over_latency || bad {
                event.contributing.push(MetricKind::LatencyMs);
            }
            if over_loss || bad {
                event.contributing.push(MetricKind::PacketLossPct);
            }
            event.metrics.insert(MetricKind::LatencyMs, link.latency_ms);
            event.metrics.insert(MetricKind::PacketLossPct, link.loss_pct);
            event.metrics.insert(MetricKind::ThroughputMbps, link.bandwidth_mbps);
            report.events.push(event);
        }
    }
}
