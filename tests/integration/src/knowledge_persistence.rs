//! Knowledge retention and journal recovery

use crate::test_utils::*;
use meshheal_core::{HealingConfig, MetricKind};
use meshheal_healing::{
    IncidentKind, KnowledgeJournal, KnowledgeRecord, KnowledgeStore, Outcome, Signal, Strategy,
    Verdict,
};
use std::collections::BTreeMap;
use tokio::sync::watch;

fn repeat_record() -> KnowledgeRecord {
    let mut metrics = BTreeMap::new();
    metrics.insert(MetricKind::LatencyMs, 350.0);
    KnowledgeRecord {
        subject: "link:A<->B".to_string(),
        kind: IncidentKind::LinkDegradation,
        signal: Signal::LinkQuality,
        score: 0.8,
        metrics,
        strategy: Strategy::Reroute,
        outcome: Outcome {
            success: true,
            verdict: Verdict::TruePositive,
            mttr_ms: Some(1_500),
        },
        embedding: None,
    }
}

#[test]
fn test_full_store_evicts_oldest_ordinary_entry() {
    let mut store = KnowledgeStore::new(10_000);
    for _ in 0..10_000 {
        store.record(repeat_record());
    }
    assert_eq!(store.len(), 10_000);

    // Same signature every time: only the first sighting is high value
    assert!(store.get(0).unwrap().high_value);
    assert!(!store.get(1).unwrap().high_value);

    let newest = store.record(repeat_record());
    assert_eq!(newest.seq, 10_000);
    assert_eq!(store.len(), 10_000);
    assert!(store.get(0).is_some(), "high-value entry survives");
    assert!(store.get(1).is_none(), "oldest ordinary entry is evicted");
    assert_eq!(store.evicted(), 1);
}

#[tokio::test]
async fn test_journal_restores_knowledge_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("knowledge.db");
    let mut config = HealingConfig::default();
    config.knowledge.journal_path = Some(db.to_string_lossy().into_owned());

    // First life: repair a silent relay, then shut down cleanly
    let mut h = Harness::new(config.clone(), ring_topology());
    h.telemetry.set(healthy_frame(&RING));
    h.control.run_tick().await;
    h.telemetry.set(healthy_frame(&["A", "B", "D", "E"]));
    for _ in 0..3 {
        h.control.run_tick().await;
    }
    h.control.wait_idle().await;
    assert_eq!(h.control.knowledge().len(), 1);

    let (tx, rx) = watch::channel(false);
    tx.send(true).unwrap();
    h.control.run(rx).await.unwrap();

    let journal = KnowledgeJournal::open(&db).unwrap();
    assert_eq!(journal.count().unwrap(), 1);
    let persisted = journal.load_recent(10).unwrap();
    assert_eq!(persisted[0].kind, IncidentKind::NodeFailure);
    assert_eq!(persisted[0].strategy, Strategy::Reroute);
    drop(journal);

    // Second life picks the history back up and keeps numbering
    let mut restarted = Harness::new(config, ring_topology());
    assert_eq!(restarted.control.knowledge().len(), 1);
    let entry = restarted.control.knowledge().get(0).unwrap();
    assert!(entry.outcome.success);

    restarted.telemetry.set(healthy_frame(&RING));
    restarted.control.run_tick().await;
    restarted.telemetry.set(healthy_frame(&["A", "B", "D", "E"]));
    for _ in 0..3 {
        restarted.control.run_tick().await;
    }
    restarted.control.wait_idle().await;
    assert!(restarted.control.knowledge().get(1).is_some());
}
