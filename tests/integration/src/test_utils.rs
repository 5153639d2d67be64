//! Fixtures shared by the integration scenarios

use meshheal_core::{HealingConfig, IdentityRef, TelemetryFrame, TelemetrySample};
use meshheal_healing::{
    Collaborators, ControlLoop, DryRunChannel, LoggingGovernance, SharedTelemetrySource,
    SnapshotProbe,
};
use meshheal_mesh::{FlowKey, LinkMetrics, Route, TopologyEvent, TopologyManager};
use std::sync::Arc;

/// Install a test subscriber once; honours `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Sample well inside every limit
pub fn healthy_sample() -> TelemetrySample {
    TelemetrySample {
        cpu_pct: Some(25.0),
        mem_pct: Some(40.0),
        latency_ms: Some(10.0),
        packet_loss_pct: Some(0.0),
        throughput_mbps: Some(200.0),
        ..Default::default()
    }
}

/// Healthy sample with CPU pinned
pub fn overloaded_sample() -> TelemetrySample {
    TelemetrySample {
        cpu_pct: Some(99.0),
        ..healthy_sample()
    }
}

/// Frame with a healthy sample for every listed node
pub fn healthy_frame(nodes: &[&str]) -> TelemetryFrame {
    let mut frame = TelemetryFrame::new();
    for id in nodes {
        frame.insert(*id, healthy_sample());
    }
    frame
}

/// Owned node path
pub fn path(ids: &[&str]) -> Vec<String> {
    ids.iter().map(|s| s.to_string()).collect()
}

/// Join events for `nodes` plus uniform links for `edges`
pub fn topology_events(nodes: &[&str], edges: &[(&str, &str)]) -> Vec<TopologyEvent> {
    let mut events: Vec<TopologyEvent> = nodes
        .iter()
        .map(|id| TopologyEvent::NodeJoin {
            id: id.to_string(),
            identity: IdentityRef::new(format!("id-{}", id)),
            identity_valid: true,
        })
        .collect();
    for (a, b) in edges {
        events.push(TopologyEvent::LinkUp {
            a: a.to_string(),
            b: b.to_string(),
            metrics: LinkMetrics::new(0.0, 10.0, 500.0),
        });
    }
    events
}

/// Five-node ring A-B-C-D-E-A with flow B->D routed through C
pub fn ring_topology() -> Arc<TopologyManager> {
    let manager = Arc::new(TopologyManager::new());
    let mut events = topology_events(
        &RING,
        &[("A", "B"), ("B", "C"), ("C", "D"), ("D", "E"), ("E", "A")],
    );
    events.push(TopologyEvent::RouteInstalled {
        route: Route::new(FlowKey::new("B", "D"), path(&["B", "C", "D"])),
    });
    manager
        .apply_batch(events)
        .expect("ring construction should succeed");
    manager
}

/// Ring node ids
pub const RING: [&str; 5] = ["A", "B", "C", "D", "E"];

/// A control loop wired to in-process collaborators
pub struct Harness {
    /// Loop under test
    pub control: ControlLoop,
    /// Topology the loop drives
    pub topology: Arc<TopologyManager>,
    /// Telemetry served each tick
    pub telemetry: SharedTelemetrySource,
    /// Commands sent by the executor
    pub channel: DryRunChannel,
    /// Approvals and escalations received
    pub governance: LoggingGovernance,
}

impl Harness {
    /// Build a loop over `topology` with silent governance
    pub fn new(config: HealingConfig, topology: Arc<TopologyManager>) -> Self {
        Self::with_governance(config, topology, LoggingGovernance::silent())
    }

    /// Build a loop with the given governance double
    pub fn with_governance(
        config: HealingConfig,
        topology: Arc<TopologyManager>,
        governance: LoggingGovernance,
    ) -> Self {
        init_tracing();
        let telemetry = SharedTelemetrySource::new();
        let channel = DryRunChannel::simulating(topology.clone());
        let collaborators = Collaborators {
            telemetry: Arc::new(telemetry.clone()),
            channel: Arc::new(channel.clone()),
            probe: Arc::new(SnapshotProbe::new(topology.clone())),
            governance: Arc::new(governance.clone()),
        };
        let control = ControlLoop::new(config, topology.clone(), collaborators)
            .expect("control loop construction should succeed");
        Self {
            control,
            topology,
            telemetry,
            channel,
            governance,
        }
    }
}
