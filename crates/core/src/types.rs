//! Core types shared by every MeshHeal crate.
//!
//! Telemetry arrives from an external collector as a per-node mapping of optional
//! fields. Absent fields are legal and only reduce detector confidence.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Unique identifier for a node in the mesh
pub type NodeId = String;

/// Opaque token issued by the external zero-trust identity provider.
///
/// The control loop never inspects or validates the token; it only carries it
/// alongside the provider-supplied validity flag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdentityRef(pub String);

impl IdentityRef {
    /// Wrap a provider token
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Borrow the raw token
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Telemetry metric kinds understood by the loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MetricKind {
    /// CPU utilisation percentage (0-100)
    CpuPct,
    /// Memory utilisation percentage (0-100)
    MemPct,
    /// Round-trip latency in milliseconds
    LatencyMs,
    /// Packet loss percentage (0-100)
    PacketLossPct,
    /// Throughput in Mbit/s
    ThroughputMbps,
}

impl MetricKind {
    /// Every metric kind, in embedding order
    pub const ALL: [MetricKind; 5] = [
        MetricKind::CpuPct,
        MetricKind::MemPct,
        MetricKind::LatencyMs,
        MetricKind::PacketLossPct,
        MetricKind::ThroughputMbps,
    ];

    /// Stable wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::CpuPct => "cpu_pct",
            MetricKind::MemPct => "mem_pct",
            MetricKind::LatencyMs => "latency_ms",
            MetricKind::PacketLossPct => "packet_loss_pct",
            MetricKind::ThroughputMbps => "throughput_mbps",
        }
    }
}

/// One telemetry sample for a node. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    /// CPU utilisation percentage
    #[serde(default)]
    pub cpu_pct: Option<f64>,
    /// Memory utilisation percentage
    #[serde(default)]
    pub mem_pct: Option<f64>,
    /// Latency in milliseconds
    #[serde(default)]
    pub latency_ms: Option<f64>,
    /// Packet loss percentage
    #[serde(default)]
    pub packet_loss_pct: Option<f64>,
    /// Throughput in Mbit/s
    #[serde(default)]
    pub throughput_mbps: Option<f64>,
    /// Collection timestamp (Unix epoch milliseconds)
    #[serde(default)]
    pub timestamp: u64,
}

impl TelemetrySample {
    /// Read a single metric
    pub fn get(&self, kind: MetricKind) -> Option<f64> {
        match kind {
            MetricKind::CpuPct => self.cpu_pct,
            MetricKind::MemPct => self.mem_pct,
            MetricKind::LatencyMs => self.latency_ms,
            MetricKind::PacketLossPct => self.packet_loss_pct,
            MetricKind::ThroughputMbps => self.throughput_mbps,
        }
        .filter(|v| v.is_finite())
    }

    /// Fraction of the five metrics that are present and finite (0.0 to 1.0)
    pub fn completeness(&self) -> f64 {
        let present = MetricKind::ALL
            .iter()
            .filter(|kind| self.get(**kind).is_some())
            .count();
        present as f64 / MetricKind::ALL.len() as f64
    }

    /// Present metrics as (kind, value) pairs
    pub fn present_metrics(&self) -> Vec<(MetricKind, f64)> {
        MetricKind::ALL
            .iter()
            .filter_map(|kind| self.get(*kind).map(|v| (*kind, v)))
            .collect()
    }
}

/// A telemetry frame: latest sample per reporting node.
///
/// Nodes absent from the map did not report within the collection budget.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelemetryFrame {
    /// Samples keyed by node
    #[serde(default)]
    pub samples: BTreeMap<NodeId, TelemetrySample>,
    /// Frame collection time (Unix epoch milliseconds)
    #[serde(default)]
    pub collected_at: u64,
}

impl TelemetryFrame {
    /// Create an empty frame stamped now
    pub fn new() -> Self {
        Self {
            samples: BTreeMap::new(),
            collected_at: current_timestamp_ms(),
        }
    }

    /// Insert or replace a node's sample
    pub fn insert(&mut self, node_id: impl Into<NodeId>, sample: TelemetrySample) {
        self.samples.insert(node_id.into(), sample);
    }

    /// Check whether a node reported in this frame
    pub fn has(&self, node_id: &str) -> bool {
        self.samples.contains_key(node_id)
    }

    /// Parse a frame from JSON (either the full frame or a bare node→sample map)
    pub fn from_json(raw: &str) -> crate::Result<Self> {
        let value: serde_json::Value = serde_json::from_str(raw)?;
        if value.get("samples").is_some() {
            let mut frame: TelemetryFrame = serde_json::from_value(value)?;
            if frame.collected_at == 0 {
                frame.collected_at = current_timestamp_ms();
            }
            return Ok(frame);
        }
        let samples: BTreeMap<NodeId, TelemetrySample> = serde_json::from_value(value)?;
        Ok(Self {
            samples,
            collected_at: current_timestamp_ms(),
        })
    }
}

/// Get current timestamp in milliseconds since Unix epoch
pub fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}
