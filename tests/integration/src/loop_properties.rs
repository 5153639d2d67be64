//! Invariants that must hold for any input

use crate::test_utils::*;
use meshheal_core::{DetectorConfig, HealingConfig, MetricKind};
use meshheal_healing::{
    AnomalyEvent, EventQueue, IncidentKind, KnowledgeRecord, KnowledgeStore, Outcome, PushOutcome,
    Signal, Subject, Verdict,
};
use meshheal_mesh::FlowKey;
use proptest::prelude::*;
use std::collections::{BTreeMap, BTreeSet};

fn scored_signal() -> impl Strategy<Value = Signal> {
    prop::sample::select(
        Signal::ALL
            .iter()
            .copied()
            .filter(|s| s.is_scored())
            .collect::<Vec<_>>(),
    )
}

fn verdict() -> impl Strategy<Value = Verdict> {
    prop_oneof![
        Just(Verdict::TruePositive),
        Just(Verdict::FalsePositive),
        Just(Verdict::Missed),
    ]
}

fn outcome_record(signal: Signal, score: f64, verdict: Verdict, pattern: u8) -> KnowledgeRecord {
    let mut metrics = BTreeMap::new();
    metrics.insert(MetricKind::CpuPct, 20.0 + 20.0 * pattern as f64);
    KnowledgeRecord {
        subject: format!("node:n{}", pattern),
        kind: if pattern % 2 == 0 {
            IncidentKind::ResourceExhaustion
        } else {
            IncidentKind::CachePressure
        },
        signal,
        score,
        metrics,
        strategy: meshheal_healing::Strategy::RestartOrScale,
        outcome: Outcome {
            success: verdict != Verdict::FalsePositive,
            verdict,
            mttr_ms: Some(1_000),
        },
        embedding: None,
    }
}

proptest! {
    #[test]
    fn prop_adaptive_threshold_stays_in_bounds(
        outcomes in prop::collection::vec((scored_signal(), 0.0f64..=1.0, verdict()), 0..200),
    ) {
        let config = DetectorConfig::default();
        let mut store = KnowledgeStore::new(500);
        for (signal, score, verdict) in outcomes {
            store.record(outcome_record(signal, score, verdict, 0));
        }

        let table = store.view().threshold_table(&config);
        for signal in Signal::ALL.iter().filter(|s| s.is_scored()) {
            let threshold = table.threshold(*signal);
            prop_assert!(threshold >= config.threshold_floor);
            prop_assert!(threshold <= config.threshold_ceiling);
        }
    }

    #[test]
    fn prop_store_is_bounded_and_keeps_first_sightings(
        capacity in 9usize..40,
        patterns in prop::collection::vec(0u8..4, 1..300),
    ) {
        let mut store = KnowledgeStore::new(capacity);
        let mut high_value = BTreeSet::new();
        for pattern in patterns {
            let entry = store.record(outcome_record(Signal::Cpu, 0.9, Verdict::TruePositive, pattern));
            if entry.high_value {
                high_value.insert(entry.seq);
            }
            prop_assert!(store.len() <= capacity);
        }

        // At most four distinct patterns, well under capacity
        for seq in high_value {
            prop_assert!(store.get(seq).is_some());
        }
    }

    #[test]
    fn prop_event_queue_is_bounded(
        capacity in 1usize..16,
        subjects in prop::collection::vec((0u8..24, 0.0f64..=1.0), 0..100),
    ) {
        let mut queue = EventQueue::new(capacity);
        let mut merged = 0usize;
        let pushed = subjects.len();
        for (node, score) in subjects {
            let event = AnomalyEvent::new(Subject::Node(format!("n{}", node)), Signal::Cpu, score, 0.9, 1);
            if queue.push(event) == PushOutcome::Merged {
                merged += 1;
            }
            prop_assert!(queue.len() <= capacity);
        }

        let drained = queue.drain();
        let distinct: BTreeSet<_> = drained.iter().map(|e| e.subject.clone()).collect();
        prop_assert_eq!(distinct.len(), drained.len());
        prop_assert_eq!(drained.len() + merged + queue.dropped() as usize, pushed);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    #[test]
    fn prop_incidents_settle_and_routes_stay_valid(
        silent in prop::sample::subsequence(RING.to_vec(), 0..3),
        silent_ticks in 0usize..5,
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async {
            let mut config = HealingConfig::default();
            config.governance.approval_timeout_ms = 20;
            let mut h = Harness::new(config, ring_topology());

            h.telemetry.set(healthy_frame(&RING));
            h.control.run_tick().await;

            let reporting: Vec<&str> = RING.iter().copied().filter(|id| !silent.contains(id)).collect();
            h.telemetry.set(healthy_frame(&reporting));
            let mut last_version = h.topology.snapshot().version;
            for _ in 0..silent_ticks {
                let report = h.control.run_tick().await;
                prop_assert!(report.snapshot_version >= last_version);
                last_version = report.snapshot_version;
            }
            h.control.wait_idle().await;

            for record in h.control.registry().records() {
                prop_assert!(record.status.is_terminal(), "unsettled incident: {:?}", record.status);
            }
            if let Some(route) = h.topology.active_route(&FlowKey::new("B", "D")) {
                prop_assert!(h.topology.snapshot().contains_path(&route.path));
            }
            Ok(())
        })?;
    }
}
