//! Collaborator seams for the Execute phase: command delivery and health probes
//!
//! The secure channel and the probe are owned by other subsystems. The loop
//! only depends on these traits; [`DryRunChannel`] and [`SnapshotProbe`] are
//! the in-process implementations used by the node service and tests. A
//! simulating dry-run channel also mirrors isolation commands into the
//! topology so the snapshot probe can observe them.

use crate::error::HealingResult;
use async_trait::async_trait;
use meshheal_core::{MetricKind, NodeId};
use meshheal_mesh::{FlowKey, LinkKey, LinkMetrics, NodeState, TopologyEvent, TopologyManager};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Remediation command delivered to a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    /// Forward the flow along `path`, failing over to `backups`
    InstallRoute {
        /// Flow to program
        flow: FlowKey,
        /// Primary path
        path: Vec<NodeId>,
        /// Failover paths
        backups: Vec<Vec<NodeId>>,
    },
    /// Restart or scale the local workload
    Restart,
    /// Undo a restart or scale action
    RevertRestart,
    /// Flush local caches
    ClearCache,
    /// Stop exchanging traffic with `node`
    Isolate {
        /// Node being isolated
        node: NodeId,
    },
    /// Resume exchanging traffic with `node`
    Rejoin {
        /// Node being readmitted
        node: NodeId,
    },
}

impl Command {
    /// Stable name
    pub fn name(&self) -> &'static str {
        match self {
            Command::InstallRoute { .. } => "install_route",
            Command::Restart => "restart",
            Command::RevertRestart => "revert_restart",
            Command::ClearCache => "clear_cache",
            Command::Isolate { .. } => "isolate",
            Command::Rejoin { .. } => "rejoin",
        }
    }
}

/// Delivery acknowledgement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandReply {
    /// Applied
    Ack,
    /// Refused
    Nack {
        /// Why the node refused
        reason: String,
    },
}

/// Authenticated command delivery to mesh nodes
#[async_trait]
pub trait SecureChannel: Send + Sync {
    /// Deliver `command` to `node_id` and wait for its reply
    async fn send(&self, node_id: &str, command: Command) -> HealingResult<CommandReply>;
}

/// What a health probe checks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProbeTarget {
    /// Node is present, active and trusted
    Node(NodeId),
    /// Node is reachable and its latest metrics are within limits
    NodeHealth(NodeId),
    /// Every hop of the path is up and forwarding
    Path(Vec<NodeId>),
    /// Node is cut off from its neighbors
    Isolated(NodeId),
}

/// Health verification after (and before) an action
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Whether the target is healthy
    async fn probe(&self, target: &ProbeTarget) -> bool;
}

/// Channel that acknowledges every command and keeps a log of them
#[derive(Clone, Default)]
pub struct DryRunChannel {
    sent: Arc<Mutex<Vec<(NodeId, Command)>>>,
    mesh: Option<Arc<TopologyManager>>,
    severed: Arc<Mutex<HashMap<LinkKey, LinkMetrics>>>,
}

impl DryRunChannel {
    /// Create an empty channel
    pub fn new() -> Self {
        Self::default()
    }

    /// Channel that also plays isolation commands against `topology`:
    /// `Isolate` takes the link to the isolated node down and `Rejoin`
    /// brings it back with its previous metrics
    pub fn simulating(topology: Arc<TopologyManager>) -> Self {
        Self {
            mesh: Some(topology),
            ..Self::default()
        }
    }

    /// Commands delivered so far, in order
    pub fn sent(&self) -> Vec<(NodeId, Command)> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn simulate(&self, topology: &TopologyManager, node_id: &str, command: &Command) {
        let (peer, isolate) = match command {
            Command::Isolate { node } => (node, true),
            Command::Rejoin { node } => (node, false),
            _ => return,
        };
        let Ok(key) = LinkKey::new(node_id, peer.as_str()) else {
            return;
        };
        let mut severed = self.severed.lock().unwrap_or_else(|e| e.into_inner());

        let event = if isolate {
            let Some(link) = topology.snapshot().link(node_id, peer).filter(|l| l.up).cloned() else {
                debug!(node_id, peer = %peer, "No live link to sever");
                return;
            };
            severed.insert(key, link.metrics());
            TopologyEvent::LinkDown {
                a: node_id.to_string(),
                b: peer.clone(),
            }
        } else {
            let Some(metrics) = severed.remove(&key) else {
                debug!(node_id, peer = %peer, "Link was not severed here");
                return;
            };
            TopologyEvent::LinkUp {
                a: node_id.to_string(),
                b: peer.clone(),
                metrics,
            }
        };
        if let Err(e) = topology.update(event) {
            warn!(node_id, peer = %peer, error = %e, "Simulated isolation not applied");
        }
    }
}

#[async_trait]
impl SecureChannel for DryRunChannel {
    async fn send(&self, node_id: &str, command: Command) -> HealingResult<CommandReply> {
        info!(node_id, command = command.name(), "Dry-run command");
        if let Some(topology) = &self.mesh {
            self.simulate(topology, node_id, &command);
        }
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((node_id.to_string(), command));
        Ok(CommandReply::Ack)
    }
}

/// Probe that answers from the live topology snapshot
#[derive(Clone)]
pub struct SnapshotProbe {
    topology: Arc<TopologyManager>,
    cpu_limit: f64,
    mem_limit: f64,
    latency_limit_ms: f64,
    loss_limit_pct: f64,
}

impl SnapshotProbe {
    /// Probe with default metric limits
    pub fn new(topology: Arc<TopologyManager>) -> Self {
        Self {
            topology,
            cpu_limit: 95.0,
            mem_limit: 95.0,
            latency_limit_ms: 200.0,
            loss_limit_pct: 5.0,
        }
    }
}

#[async_trait]
impl HealthProbe for SnapshotProbe {
    async fn probe(&self, target: &ProbeTarget) -> bool {
        let snapshot = self.topology.snapshot();
        match target {
            ProbeTarget::Node(id) => snapshot
                .node(id)
                .map(|n| n.state == NodeState::Active && n.is_trusted())
                .unwrap_or(false),
            ProbeTarget::NodeHealth(id) => {
                let Some(node) = snapshot.node(id) else {
                    return false;
                };
                if node.state != NodeState::Active || !node.is_trusted() {
                    return false;
                }
                let Some(sample) = &node.metrics else {
                    return true;
                };
                let within = |kind: MetricKind, limit: f64| sample.get(kind).map(|v| v < limit).unwrap_or(true);
                within(MetricKind::CpuPct, self.cpu_limit)
                    && within(MetricKind::MemPct, self.mem_limit)
                    && within(MetricKind::LatencyMs, self.latency_limit_ms)
                    && within(MetricKind::PacketLossPct, self.loss_limit_pct)
            }
            ProbeTarget::Path(path) => {
                let relays = path.iter().skip(1).take(path.len().saturating_sub(2));
                snapshot.contains_path(path)
                    && relays
                        .into_iter()
                        .all(|id| snapshot.node(id).map(|n| n.can_forward()).unwrap_or(false))
            }
            ProbeTarget::Isolated(id) => snapshot
                .node(id)
                .map(|n| n.state == NodeState::Quarantined || snapshot.up_neighbors(id).is_empty())
                .unwrap_or(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshheal_core::{IdentityRef, TelemetryFrame, TelemetrySample};
    use meshheal_mesh::{LinkMetrics, TopologyEvent};

    fn line() -> Arc<TopologyManager> {
        let manager = Arc::new(TopologyManager::new());
        let mut events: Vec<TopologyEvent> = ["a", "b", "c"]
            .iter()
            .map(|id| TopologyEvent::NodeJoin {
                id: id.to_string(),
                identity: IdentityRef::new(*id),
                identity_valid: true,
            })
            .collect();
        for (a, b) in [("a", "b"), ("b", "c")] {
            events.push(TopologyEvent::LinkUp {
                a: a.to_string(),
                b: b.to_string(),
                metrics: LinkMetrics::new(0.0, 5.0, 100.0),
            });
        }
        manager.apply_batch(events).unwrap();
        manager
    }

    fn path(ids: &[&str]) -> Vec<NodeId> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_dry_run_channel_acks_and_logs() {
        let channel = DryRunChannel::new();
        let reply = channel.send("a", Command::Restart).await.unwrap();
        assert_eq!(reply, CommandReply::Ack);
        assert_eq!(channel.sent(), vec![("a".to_string(), Command::Restart)]);
    }

    #[tokio::test]
    async fn test_path_probe_follows_topology() {
        let topology = line();
        let probe = SnapshotProbe::new(topology.clone());
        assert!(probe.probe(&ProbeTarget::Path(path(&["a", "b", "c"]))).await);
        assert!(probe.probe(&ProbeTarget::Path(path(&["a", "b"]))).await);
        assert!(!probe.probe(&ProbeTarget::Path(path(&["a", "c"]))).await);

        topology
            .update(TopologyEvent::NodeStateChanged {
                id: "b".to_string(),
                state: NodeState::Unreachable,
            })
            .unwrap();
        assert!(!probe.probe(&ProbeTarget::Path(path(&["a", "b", "c"]))).await);
        assert!(!probe.probe(&ProbeTarget::Node("b".to_string())).await);
    }

    #[tokio::test]
    async fn test_isolated_requires_severed_links() {
        let topology = line();
        let probe = SnapshotProbe::new(topology.clone());
        let isolated = ProbeTarget::Isolated("b".to_string());
        assert!(!probe.probe(&isolated).await);
        assert!(!probe.probe(&ProbeTarget::Isolated("zz".to_string())).await);

        let channel = DryRunChannel::simulating(topology.clone());
        let isolate = Command::Isolate { node: "b".to_string() };
        channel.send("a", isolate.clone()).await.unwrap();
        assert!(!probe.probe(&isolated).await, "c still reaches b");
        channel.send("c", isolate).await.unwrap();
        assert!(probe.probe(&isolated).await);

        channel.send("a", Command::Rejoin { node: "b".to_string() }).await.unwrap();
        assert!(!probe.probe(&isolated).await);
        let link = topology.snapshot().link("a", "b").cloned().unwrap();
        assert!(link.up);
        assert_eq!(link.latency_ms, 5.0);
    }

    #[tokio::test]
    async fn test_quarantined_node_counts_as_isolated() {
        let topology = line();
        let probe = SnapshotProbe::new(topology.clone());
        topology
            .update(TopologyEvent::NodeStateChanged {
                id: "b".to_string(),
                state: NodeState::Quarantined,
            })
            .unwrap();
        assert!(probe.probe(&ProbeTarget::Isolated("b".to_string())).await);
        // A plain dry run leaves the topology alone
        DryRunChannel::new()
            .send("a", Command::Isolate { node: "c".to_string() })
            .await
            .unwrap();
        assert!(topology.snapshot().link("b", "c").unwrap().up);
    }

    #[tokio::test]
    async fn test_health_probe_checks_metrics() {
        let topology = line();
        let probe = SnapshotProbe::new(topology.clone());
        assert!(probe.probe(&ProbeTarget::NodeHealth("a".to_string())).await);

        let mut frame = TelemetryFrame::new();
        frame.insert(
            "a",
            TelemetrySample {
                cpu_pct: Some(99.0),
                ..Default::default()
            },
        );
        topology.ingest_telemetry(&frame);
        assert!(!probe.probe(&ProbeTarget::NodeHealth("a".to_string())).await);
        assert!(probe.probe(&ProbeTarget::Node("a".to_string())).await);
        assert!(!probe.probe(&ProbeTarget::NodeHealth("zz".to_string())).await);
    }
}
