//! Healing Performance Benchmarks
//!
//! Measures the per-tick costs that grow with history and mesh size:
//! - Threshold table computation over a full knowledge store
//! - Similar-incident queries
//! - Root-cause analysis of a cascade

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use meshheal_core::{AnalyzerConfig, DetectorConfig, IdentityRef, MetricKind};
use meshheal_healing::{
    embed, AnomalyEvent, IncidentKind, KnowledgeRecord, KnowledgeStore, KnowledgeView, Outcome,
    RootCauseAnalyzer, Signal, Strategy, Subject, Verdict,
};
use meshheal_mesh::{LinkMetrics, TopologyEvent, TopologyManager};
use std::collections::BTreeMap;

fn filled_store(entries: usize) -> KnowledgeStore {
    let mut store = KnowledgeStore::new(entries);
    let signals = [Signal::Cpu, Signal::Memory, Signal::Latency, Signal::Silence];
    for i in 0..entries {
        let signal = signals[i % signals.len()];
        let mut metrics = BTreeMap::new();
        metrics.insert(MetricKind::CpuPct, (i % 100) as f64);
        metrics.insert(MetricKind::LatencyMs, (i % 400) as f64);
        let score = 0.5 + (i % 50) as f64 / 100.0;
        store.record(KnowledgeRecord {
            subject: format!("node:n{}", i % 64),
            kind: IncidentKind::from_signal(signal),
            signal,
            score,
            metrics,
            strategy: Strategy::Reroute,
            outcome: Outcome {
                success: i % 3 != 0,
                verdict: if i % 7 == 0 {
                    Verdict::FalsePositive
                } else {
                    Verdict::TruePositive
                },
                mttr_ms: Some(1_000 + (i % 10) as u64 * 100),
            },
            embedding: None,
        });
    }
    store
}

fn bench_thresholds(c: &mut Criterion) {
    let mut group = c.benchmark_group("threshold_table");
    let config = DetectorConfig::default();

    for entries in [1_000usize, 10_000] {
        let view = filled_store(entries).view();
        group.bench_with_input(BenchmarkId::from_parameter(entries), &view, |b, view: &KnowledgeView| {
            b.iter(|| black_box(view.threshold_table(&config)))
        });
    }
    group.finish();
}

fn bench_similarity(c: &mut Criterion) {
    let view = filled_store(10_000).view();
    let mut metrics = BTreeMap::new();
    metrics.insert(MetricKind::CpuPct, 97.0);
    let query = embed(&metrics, 0.9, Signal::Cpu);

    c.bench_function("query_similar_incidents_10k", |b| {
        b.iter(|| black_box(view.query_similar_incidents(black_box(&query), 10)))
    });
}

fn bench_cascade_analysis(c: &mut Criterion) {
    let manager = TopologyManager::new();
    let side = 8;
    let id = |r: usize, c: usize| format!("n{}-{}", r, c);
    let mut events = Vec::new();
    for r in 0..side {
        for c in 0..side {
            events.push(TopologyEvent::NodeJoin {
                id: id(r, c),
                identity: IdentityRef::new(id(r, c)),
                identity_valid: true,
            });
            if c + 1 < side {
                events.push(TopologyEvent::LinkUp {
                    a: id(r, c),
                    b: id(r, c + 1),
                    metrics: LinkMetrics::new(0.1, 5.0, 100.0),
                });
            }
            if r + 1 < side {
                events.push(TopologyEvent::LinkUp {
                    a: id(r, c),
                    b: id(r + 1, c),
                    metrics: LinkMetrics::new(0.1, 5.0, 100.0),
                });
            }
        }
    }
    let snapshot = manager
        .apply_batch(events)
        .expect("grid construction should succeed");
    let view = filled_store(1_000).view();

    let anomalies: Vec<AnomalyEvent> = (0..side)
        .flat_map(|r| (0..3).map(move |c| (r, c)))
        .map(|(r, c)| AnomalyEvent::new(Subject::Node(id(r, c)), Signal::Cpu, 0.9, 0.9, snapshot.version))
        .collect();

    c.bench_function("analyze_cascade_24_nodes", |b| {
        b.iter(|| {
            let mut analyzer = RootCauseAnalyzer::new(AnalyzerConfig::default());
            black_box(analyzer.analyze(anomalies.clone(), &snapshot, &view))
        })
    });
}

criterion_group!(benches, bench_thresholds, bench_similarity, bench_cascade_analysis);
criterion_main!(benches);
