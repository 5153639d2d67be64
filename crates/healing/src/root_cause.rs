//! Root Cause Analyzer
//!
//! Correlates anomaly events into incidents, classifies them and ranks the
//! nodes most likely to be the origin. A connected group of anomalous nodes
//! becomes one cascade incident instead of one incident per node.

use crate::anomaly::{AnomalyEvent, Signal, Subject};
use crate::knowledge::{embed, KnowledgeView};
use meshheal_core::{AnalyzerConfig, MetricKind, NodeId};
use meshheal_mesh::{LinkKey, TopologySnapshot};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::fmt;
use tracing::{debug, info};
use uuid::Uuid;

/// Incident classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum IncidentKind {
    /// Node stopped responding
    NodeFailure,
    /// Link latency or loss out of bounds
    LinkDegradation,
    /// CPU saturation
    ResourceExhaustion,
    /// Memory pressure
    CachePressure,
    /// Identity invalidated
    SecurityAnomaly,
    /// Repeated incidents on one node
    Flapping,
    /// Connected group of failing nodes
    Cascade,
}

impl IncidentKind {
    /// Stable name
    pub fn as_str(&self) -> &'static str {
        match self {
            IncidentKind::NodeFailure => "NodeFailure",
            IncidentKind::LinkDegradation => "LinkDegradation",
            IncidentKind::ResourceExhaustion => "ResourceExhaustion",
            IncidentKind::CachePressure => "CachePressure",
            IncidentKind::SecurityAnomaly => "SecurityAnomaly",
            IncidentKind::Flapping => "Flapping",
            IncidentKind::Cascade => "Cascade",
        }
    }

    /// Kind implied by a dominant signal
    pub fn from_signal(signal: Signal) -> Self {
        match signal {
            Signal::Silence => IncidentKind::NodeFailure,
            Signal::Cpu => IncidentKind::ResourceExhaustion,
            Signal::Memory => IncidentKind::CachePressure,
            Signal::Identity => IncidentKind::SecurityAnomaly,
            Signal::Latency | Signal::PacketLoss | Signal::Throughput | Signal::LinkQuality => {
                IncidentKind::LinkDegradation
            }
        }
    }
}

impl fmt::Display for IncidentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A ranked root-cause suspect
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RootCauseCandidate {
    /// Suspect node
    pub node_id: NodeId,
    /// Weighted ranking score
    pub score: f64,
    /// Degree centrality in the snapshot
    pub centrality: f64,
    /// 1.0 for the earliest anomaly, decreasing with delay
    pub precedence: f64,
    /// Best similarity to a historical incident
    pub similarity: f64,
}

/// Correlated, classified anomaly
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    /// Unique incident id
    pub id: String,
    /// Classification
    pub kind: IncidentKind,
    /// Node or link the incident is about
    pub subject: Subject,
    /// Dominant signal
    pub signal: Signal,
    /// Highest event score
    pub score: f64,
    /// Events merged into the incident
    pub events: Vec<AnomalyEvent>,
    /// Root-cause suspects, best first
    pub candidates: Vec<RootCauseCandidate>,
    /// Whether this incident covers a cascade
    pub cascade: bool,
    /// Nodes involved
    pub covered_nodes: BTreeSet<NodeId>,
    /// Earliest event time (Unix epoch milliseconds)
    pub detected_at: u64,
    /// Snapshot version the events were computed against
    pub snapshot_version: u64,
    /// Metric values of the dominant event
    pub metrics: BTreeMap<MetricKind, f64>,
    /// Similarity embedding
    pub embedding: Vec<f64>,
}

impl Incident {
    /// Node remediation acts on: the top candidate for cascades, else the subject node
    pub fn target_node(&self) -> Option<&NodeId> {
        if self.cascade {
            return self.candidates.first().map(|c| &c.node_id);
        }
        self.subject.as_node()
    }

    /// Link the incident is about, for link subjects
    pub fn target_link(&self) -> Option<&LinkKey> {
        match &self.subject {
            Subject::Link(key) => Some(key),
            Subject::Node(_) => None,
        }
    }
}

/// Events on one subject within one correlation window
struct EventGroup {
    subject: Subject,
    events: Vec<AnomalyEvent>,
}

impl EventGroup {
    fn first_seen(&self) -> u64 {
        self.events.iter().map(|e| e.timestamp_ms).min().unwrap_or(0)
    }

    /// Identity events win; otherwise the highest score
    fn dominant(&self) -> Option<&AnomalyEvent> {
        self.events
            .iter()
            .find(|e| e.signal == Signal::Identity)
            .or_else(|| {
                self.events
                    .iter()
                    .max_by(|a, b| a.score.total_cmp(&b.score).then_with(|| b.signal.cmp(&a.signal)))
            })
    }
}

/// Analyze phase
#[derive(Debug)]
pub struct RootCauseAnalyzer {
    config: AnalyzerConfig,
    flaps: HashMap<NodeId, VecDeque<u64>>,
}

impl RootCauseAnalyzer {
    /// Create an analyzer
    pub fn new(config: AnalyzerConfig) -> Self {
        Self {
            config,
            flaps: HashMap::new(),
        }
    }

    /// Correlate one tick's events into incidents, ordered by detection time
    pub fn analyze(
        &mut self,
        events: Vec<AnomalyEvent>,
        snapshot: &TopologySnapshot,
        knowledge: &KnowledgeView,
    ) -> Vec<Incident> {
        let newest = events.iter().map(|e| e.timestamp_ms).max();
        self.prune_flaps(snapshot, newest);
        let mut groups = self.correlate(events);
        let mut incidents = Vec::new();

        for component in self.cascades(&groups, snapshot) {
            let (members, rest): (Vec<EventGroup>, Vec<EventGroup>) = groups
                .into_iter()
                .partition(|g| matches!(&g.subject, Subject::Node(id) if component.contains(id)));
            groups = rest;
            if let Some(incident) = self.cascade_incident(members, component, snapshot, knowledge) {
                incidents.push(incident);
            }
        }

        for group in groups {
            if let Some(incident) = self.single_incident(group, snapshot, knowledge) {
                incidents.push(incident);
            }
        }

        incidents.sort_by(|a, b| {
            a.detected_at
                .cmp(&b.detected_at)
                .then_with(|| a.subject.cmp(&b.subject))
        });
        incidents
    }

    /// Split events per subject into correlation windows
    fn correlate(&self, mut events: Vec<AnomalyEvent>) -> Vec<EventGroup> {
        events.sort_by(|a, b| {
            a.subject
                .cmp(&b.subject)
                .then_with(|| a.timestamp_ms.cmp(&b.timestamp_ms))
        });

        let mut groups: Vec<EventGroup> = Vec::new();
        for event in events {
            match groups.last_mut() {
                Some(group)
                    if group.subject == event.subject
                        && event.timestamp_ms.saturating_sub(group.first_seen())
                            <= self.config.correlation_window_ms =>
                {
                    group.events.push(event);
                }
                _ => groups.push(EventGroup {
                    subject: event.subject.clone(),
                    events: vec![event],
                }),
            }
        }
        groups
    }

    /// Connected sets of at least `cascade_min_nodes` anomalous nodes within the cascade window
    fn cascades(&self, groups: &[EventGroup], snapshot: &TopologySnapshot) -> Vec<BTreeSet<NodeId>> {
        let node_groups: Vec<(&NodeId, u64)> = groups
            .iter()
            .filter(|g| g.dominant().map(|e| e.signal != Signal::Identity).unwrap_or(false))
            .filter_map(|g| g.subject.as_node().map(|id| (id, g.first_seen())))
            .collect();
        let Some(latest) = node_groups.iter().map(|(_, ts)| *ts).max() else {
            return Vec::new();
        };

        let anomalous: BTreeSet<NodeId> = node_groups
            .iter()
            .filter(|(_, ts)| latest.saturating_sub(*ts) <= self.config.cascade_window_ms)
            .map(|(id, _)| (*id).clone())
            .collect();
        if anomalous.len() < self.config.cascade_min_nodes {
            return Vec::new();
        }

        snapshot
            .connected_components(&anomalous)
            .into_iter()
            .filter(|c| c.len() >= self.config.cascade_min_nodes)
            .collect()
    }

    fn cascade_incident(
        &mut self,
        members: Vec<EventGroup>,
        component: BTreeSet<NodeId>,
        snapshot: &TopologySnapshot,
        knowledge: &KnowledgeView,
    ) -> Option<Incident> {
        let suspects: Vec<(&NodeId, &EventGroup)> = members
            .iter()
            .filter_map(|g| g.subject.as_node().map(|id| (id, g)))
            .collect();
        let candidates = self.rank(&suspects, snapshot, knowledge);
        let top = candidates.first()?.node_id.clone();
        let top_group = members.iter().find(|g| g.subject.as_node() == Some(&top))?;
        let dominant = top_group.dominant()?.clone();

        let detected_at = members.iter().map(|g| g.first_seen()).min().unwrap_or(dominant.timestamp_ms);
        for node_id in &component {
            self.note_flap(node_id, detected_at);
        }

        info!(
            nodes = component.len(),
            target = %top,
            "Cascade detected"
        );

        let events: Vec<AnomalyEvent> = members.into_iter().flat_map(|g| g.events).collect();
        let score = events.iter().map(|e| e.score).fold(0.0, f64::max);
        Some(Incident {
            id: Uuid::new_v4().to_string(),
            kind: IncidentKind::Cascade,
            subject: Subject::Node(top),
            signal: dominant.signal,
            score,
            candidates,
            cascade: true,
            covered_nodes: component,
            detected_at,
            snapshot_version: events.iter().map(|e| e.snapshot_version).max().unwrap_or(0),
            embedding: embed(&dominant.metrics, score, dominant.signal),
            metrics: dominant.metrics,
            events,
        })
    }

    fn single_incident(
        &mut self,
        group: EventGroup,
        snapshot: &TopologySnapshot,
        knowledge: &KnowledgeView,
    ) -> Option<Incident> {
        let dominant = group.dominant()?.clone();
        let detected_at = group.first_seen();

        let mut kind = IncidentKind::from_signal(dominant.signal);
        if let Subject::Node(node_id) = &group.subject {
            let recent = self.note_flap(node_id, detected_at);
            if kind != IncidentKind::SecurityAnomaly && recent >= self.config.flap_threshold {
                debug!(node_id = %node_id, recent, "Node flapping");
                kind = IncidentKind::Flapping;
            }
        }

        let covered_nodes: BTreeSet<NodeId> = group.subject.node_ids().into_iter().cloned().collect();
        let suspects: Vec<(&NodeId, &EventGroup)> = covered_nodes.iter().map(|id| (id, &group)).collect();
        let candidates = self.rank(&suspects, snapshot, knowledge);

        let score = group.events.iter().map(|e| e.score).fold(0.0, f64::max);
        Some(Incident {
            id: Uuid::new_v4().to_string(),
            kind,
            subject: group.subject.clone(),
            signal: dominant.signal,
            score,
            candidates,
            cascade: false,
            covered_nodes,
            detected_at,
            snapshot_version: group.events.iter().map(|e| e.snapshot_version).max().unwrap_or(0),
            embedding: embed(&dominant.metrics, score, dominant.signal),
            metrics: dominant.metrics,
            events: group.events,
        })
    }

    /// Weighted centrality, precedence and similarity; ties go to the lower node id
    fn rank(
        &self,
        suspects: &[(&NodeId, &EventGroup)],
        snapshot: &TopologySnapshot,
        knowledge: &KnowledgeView,
    ) -> Vec<RootCauseCandidate> {
        let earliest = suspects.iter().map(|(_, g)| g.first_seen()).min().unwrap_or(0);
        let window = self.config.cascade_window_ms.max(1) as f64;

        let mut candidates: Vec<RootCauseCandidate> = suspects
            .iter()
            .map(|(node_id, group)| {
                let centrality = snapshot.degree_centrality(node_id);
                let precedence = (1.0 - (group.first_seen() - earliest) as f64 / window).clamp(0.0, 1.0);
                let similarity = group
                    .dominant()
                    .map(|e| knowledge.best_similarity(&embed(&e.metrics, e.score, e.signal)))
                    .unwrap_or(0.0)
                    .max(0.0);
                RootCauseCandidate {
                    node_id: (*node_id).clone(),
                    score: self.config.centrality_weight * centrality
                        + self.config.precedence_weight * precedence
                        + self.config.similarity_weight * similarity,
                    centrality,
                    precedence,
                    similarity,
                }
            })
            .collect();

        candidates.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.node_id.cmp(&b.node_id))
        });
        candidates
    }

    /// Forget departed nodes and sightings older than the flap window
    fn prune_flaps(&mut self, snapshot: &TopologySnapshot, now: Option<u64>) {
        let window = self.config.flap_window_ms;
        self.flaps.retain(|node_id, seen| {
            if snapshot.node(node_id).is_none() {
                return false;
            }
            if let Some(now) = now {
                seen.retain(|t| now.saturating_sub(*t) <= window);
            }
            !seen.is_empty()
        });
    }

    /// Record an incident for flap tracking; returns incidents within the flap window
    fn note_flap(&mut self, node_id: &str, at: u64) -> usize {
        let window = self.config.flap_window_ms;
        let seen = self.flaps.entry(node_id.to_string()).or_default();
        seen.push_back(at);
        while seen.front().map(|t| at.saturating_sub(*t) > window).unwrap_or(false) {
            seen.pop_front();
        }
        seen.len()
    }
}
