//! Healing scenarios driven tick by tick
//!
//! # Test Scenarios
//!
//! 1. **Silent relay**: a relay stops reporting and its flow moves to the disjoint side of the ring
//! 2. **Cascade**: connected nodes exhaust CPU together and the most central one is isolated
//! 3. **Risky plan**: history says the strategy usually fails, so approval is required and silence denies it
//! 4. **Compromised identity**: the node is isolated and governance is told
//! 5. **Shutdown**: pending approvals are denied instead of holding the loop open

use crate::test_utils::*;
use meshheal_core::{HealingConfig, MetricKind};
use meshheal_healing::{
    embed, Command, ExecutionState, IncidentKind, IncidentStatus, KnowledgeRecord, KnowledgeStore,
    Outcome, Signal, Strategy, Verdict,
};
use meshheal_mesh::{FlowKey, NodeState, TopologyManager};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Knowledge where every restart of an overloaded-CPU pattern has failed
fn failed_restarts(subject: &str, count: usize) -> KnowledgeStore {
    let mut store = KnowledgeStore::new(100);
    let mut metrics = BTreeMap::new();
    metrics.insert(MetricKind::CpuPct, 99.0);
    for _ in 0..count {
        store.record(KnowledgeRecord {
            subject: subject.to_string(),
            kind: IncidentKind::ResourceExhaustion,
            signal: Signal::Cpu,
            score: 1.0,
            metrics: metrics.clone(),
            strategy: Strategy::RestartOrScale,
            outcome: Outcome {
                success: false,
                verdict: Verdict::TruePositive,
                mttr_ms: None,
            },
            embedding: None,
        });
    }
    store
}

#[tokio::test]
async fn test_silent_relay_is_rerouted() {
    let mut h = Harness::new(HealingConfig::default(), ring_topology());
    h.telemetry.set(healthy_frame(&RING));
    assert!(h.control.run_tick().await.incidents.is_empty());

    // C goes quiet; the third silent tick crosses the threshold
    h.telemetry.set(healthy_frame(&["A", "B", "D", "E"]));
    assert!(h.control.run_tick().await.incidents.is_empty());
    assert!(h.control.run_tick().await.incidents.is_empty());
    let report = h.control.run_tick().await;

    assert_eq!(report.incidents.len(), 1);
    let incident = &report.incidents[0];
    assert_eq!(incident.kind, IncidentKind::NodeFailure);
    assert_eq!(incident.target_node().map(String::as_str), Some("C"));
    assert_eq!(report.dispatched, 1);

    let finished = h.control.wait_idle().await;
    assert_eq!(finished.len(), 1);
    let record = &finished[0];
    assert_eq!(record.strategy, Strategy::Reroute);
    assert_eq!(record.state, ExecutionState::Succeeded);
    let mttr = record.mttr_ms.expect("successful repair has an MTTR");
    assert!(mttr < HealingConfig::default().executor.mttr_sla_secs * 1_000);

    let route = h.topology.active_route(&FlowKey::new("B", "D")).unwrap();
    assert_eq!(route.path, path(&["B", "A", "E", "D"]));
    assert_eq!(h.topology.snapshot().node("C").unwrap().state, NodeState::Unreachable);
    assert_eq!(h.control.registry().status(&incident.id), Some(IncidentStatus::Resolved));

    let sent = h.channel.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "B");
    assert!(matches!(&sent[0].1, Command::InstallRoute { path: p, .. } if *p == path(&["B", "A", "E", "D"])));

    // The repair is remembered; silence with no earlier flag counts as a miss
    let entry = h.control.knowledge().get(0).unwrap();
    assert!(entry.outcome.success);
    assert_eq!(entry.outcome.verdict, Verdict::Missed);
    assert_eq!(h.control.metrics().rollback_count.get(), 0);

    // Once C reports again it rejoins
    h.telemetry.set(healthy_frame(&RING));
    h.control.run_tick().await;
    assert_eq!(h.topology.snapshot().node("C").unwrap().state, NodeState::Active);
}

#[tokio::test]
async fn test_cascade_isolates_most_central_node() {
    let nodes = ["N1", "N2", "N3", "N4", "N5", "N6"];
    let topology = Arc::new(TopologyManager::new());
    topology
        .apply_batch(topology_events(
            &nodes,
            &[
                ("N1", "N2"),
                ("N2", "N3"),
                ("N3", "N4"),
                ("N4", "N5"),
                ("N5", "N6"),
                ("N2", "N5"),
            ],
        ))
        .unwrap();
    let mut h = Harness::new(HealingConfig::default(), topology);

    h.telemetry.set(healthy_frame(&nodes));
    assert!(h.control.run_tick().await.incidents.is_empty());

    h.telemetry.update(|frame| {
        for id in ["N1", "N2", "N3", "N4"] {
            frame.insert(id, overloaded_sample());
        }
    });
    let report = h.control.run_tick().await;

    assert_eq!(report.incidents.len(), 1, "members fold into one cascade incident");
    let incident = &report.incidents[0];
    assert_eq!(incident.kind, IncidentKind::Cascade);
    assert!(incident.cascade);
    assert_eq!(incident.covered_nodes.len(), 4);
    assert_eq!(incident.candidates[0].node_id, "N2");

    h.control.wait_idle().await;
    let record = h.control.registry().get(&incident.id).unwrap();
    assert_eq!(record.plan.as_ref().unwrap().strategy, Strategy::IsolateNode);
    assert_eq!(record.status, IncidentStatus::Resolved);
    assert_eq!(h.topology.snapshot().node("N2").unwrap().state, NodeState::Quarantined);
    assert_eq!(h.control.metrics().quarantined_nodes.get(), 1);

    // Trusted neighbors are told to cut N2 off
    let mut told: Vec<String> = h.channel.sent().into_iter().map(|(node, _)| node).collect();
    told.sort();
    assert_eq!(told, path(&["N1", "N3", "N5"]));
}

#[tokio::test]
async fn test_risky_plan_is_denied_by_default() {
    let mut config = HealingConfig::default();
    config.governance.approval_timeout_ms = 50;

    // Ten remembered restarts of this exact pattern, seven of which failed
    let mut metrics = BTreeMap::new();
    for (kind, value) in [
        (MetricKind::CpuPct, 99.0),
        (MetricKind::MemPct, 40.0),
        (MetricKind::LatencyMs, 10.0),
        (MetricKind::PacketLossPct, 0.0),
        (MetricKind::ThroughputMbps, 200.0),
    ] {
        metrics.insert(kind, value);
    }
    let mut store = KnowledgeStore::new(config.knowledge.capacity);
    for i in 0..10 {
        store.record(KnowledgeRecord {
            subject: "node:C".to_string(),
            kind: IncidentKind::ResourceExhaustion,
            signal: Signal::Cpu,
            score: 1.0,
            metrics: metrics.clone(),
            strategy: Strategy::RestartOrScale,
            outcome: Outcome {
                success: i >= 7,
                verdict: Verdict::TruePositive,
                mttr_ms: if i >= 7 { Some(2_000) } else { None },
            },
            embedding: Some(embed(&metrics, 1.0, Signal::Cpu)),
        });
    }

    let mut h = Harness::new(config, ring_topology());
    h.control = h.control.with_knowledge(store);

    h.telemetry.set(healthy_frame(&RING));
    h.control.run_tick().await;
    h.telemetry.update(|frame| frame.insert("C", overloaded_sample()));
    let report = h.control.run_tick().await;

    assert_eq!(report.incidents.len(), 1);
    let incident = &report.incidents[0];
    assert_eq!(incident.kind, IncidentKind::ResourceExhaustion);
    assert_eq!(report.awaiting_approval, 1);
    assert_eq!(h.control.registry().status(&incident.id), Some(IncidentStatus::AwaitingApproval));

    let plan = h.control.registry().get(&incident.id).unwrap().plan.clone().unwrap();
    assert_eq!(plan.strategy, Strategy::RestartOrScale);
    assert!((plan.risk - 0.7).abs() < 1e-9);

    h.control.wait_idle().await;
    assert_eq!(h.control.registry().status(&incident.id), Some(IncidentStatus::DeniedByDefault));
    assert_eq!(h.governance.requests().len(), 1);
    assert!(h.channel.sent().is_empty(), "nothing executes without approval");
    assert_eq!(h.control.metrics().pending_approvals.get(), 0);
    assert_eq!(h.control.knowledge().len(), 10, "denied plans teach nothing");
}

#[tokio::test]
async fn test_compromised_identity_is_isolated_and_escalated() {
    let mut h = Harness::new(HealingConfig::default(), ring_topology());
    h.telemetry.set(healthy_frame(&RING));
    h.control.run_tick().await;

    h.topology
        .update(meshheal_mesh::TopologyEvent::IdentityChanged {
            id: "E".to_string(),
            identity_valid: false,
            identity: None,
        })
        .unwrap();
    let report = h.control.run_tick().await;

    assert_eq!(report.incidents.len(), 1);
    assert_eq!(report.incidents[0].kind, IncidentKind::SecurityAnomaly);
    let finished = h.control.wait_idle().await;
    assert_eq!(finished[0].strategy, Strategy::IsolateNode);
    assert_eq!(finished[0].state, ExecutionState::Succeeded);
    assert!(finished[0].escalated);

    assert_eq!(h.topology.snapshot().node("E").unwrap().state, NodeState::Quarantined);
    assert!(h.topology.snapshot().up_neighbors("E").is_empty(), "A and D dropped their links to E");
    let escalations = h.governance.escalations();
    assert_eq!(escalations.len(), 1);
    assert_eq!(escalations[0].node_id.as_deref(), Some("E"));

    // Quarantined nodes are no longer scored
    assert!(h.control.run_tick().await.incidents.is_empty());
}

#[tokio::test]
async fn test_in_flight_target_suppresses_duplicate_incident() {
    let mut config = HealingConfig::default();
    config.governance.approval_timeout_ms = 10_000;
    let mut h = Harness::new(config, ring_topology());
    h.telemetry.set(healthy_frame(&RING));
    h.control.run_tick().await;

    // Every restart of this pattern has failed before, so the plan waits for approval
    h.control = h.control.with_knowledge(failed_restarts("node:B", 5));

    h.telemetry.update(|frame| frame.insert("B", overloaded_sample()));
    let first = h.control.run_tick().await;
    assert_eq!(first.awaiting_approval, 1);

    let second = h.control.run_tick().await;
    assert!(second.incidents.is_empty());
    assert_eq!(second.suppressed, 1);
    assert_eq!(h.control.registry().len(), 1);
}

#[tokio::test]
async fn test_shutdown_denies_pending_approval() {
    // Default approval timeout is a full day
    let mut h = Harness::new(HealingConfig::default(), ring_topology());
    h.control = h.control.with_knowledge(failed_restarts("node:B", 5));
    h.telemetry.set(healthy_frame(&RING));
    h.control.run_tick().await;
    h.telemetry.update(|frame| frame.insert("B", overloaded_sample()));
    assert_eq!(h.control.run_tick().await.awaiting_approval, 1);

    let metrics = h.control.metrics().clone();
    let (tx, rx) = watch::channel(false);
    tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(3), h.control.run(rx))
        .await
        .expect("shutdown must not wait out the approval timeout")
        .unwrap();

    assert_eq!(metrics.pending_approvals.get(), 0);
    assert_eq!(h.governance.requests().len(), 1);
    assert!(h.channel.sent().is_empty(), "a denied plan sends nothing");
}

#[tokio::test]
async fn test_small_phase_queue_drains_many_completions() {
    let mut config = HealingConfig::default();
    config.control_loop.phase_queue_capacity = 1;
    config.governance.approval_timeout_ms = 100;
    let mut h = Harness::new(config, ring_topology());
    h.control = h.control.with_knowledge(failed_restarts("node:A", 5));
    h.telemetry.set(healthy_frame(&RING));
    h.control.run_tick().await;

    // Two risky plans in a row, both left waiting on governance
    let mut pending = Vec::new();
    for node in ["A", "C"] {
        h.telemetry.set(healthy_frame(&RING));
        h.telemetry.update(|frame| frame.insert(node, overloaded_sample()));
        let report = h.control.run_tick().await;
        assert_eq!(report.awaiting_approval, 1, "{} waits for approval", node);
        pending.push(report.incidents[0].id.clone());
    }

    tokio::time::timeout(Duration::from_secs(5), h.control.wait_idle())
        .await
        .expect("completions never block their tasks");
    for id in &pending {
        assert_eq!(h.control.registry().status(id), Some(IncidentStatus::DeniedByDefault));
    }
    assert_eq!(h.control.metrics().pending_approvals.get(), 0);
}
