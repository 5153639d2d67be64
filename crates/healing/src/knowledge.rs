//! Knowledge Store
//!
//! Append-only memory of remediation outcomes. The control loop takes one
//! immutable [`KnowledgeView`] per tick; adaptive thresholds, risk estimates
//! and strategy recommendations are pure functions of that view.
//!
//! Capacity is bounded. Eviction removes the oldest entry that is not
//! high-value, where high-value means the first entry ever recorded with its
//! pattern signature. If every entry is high-value the oldest one goes.

use crate::anomaly::{Signal, ThresholdTable};
use crate::journal::JournalHandle;
use crate::planner::Strategy;
use crate::root_cause::IncidentKind;
use meshheal_core::{current_timestamp_ms, DetectorConfig, KnowledgeConfig, MetricKind};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, warn};

/// Embedding layout: five metrics, the anomaly score, one-hot signal
pub const EMBEDDING_DIM: usize = 5 + 1 + Signal::ALL.len();

/// How the detection behind an outcome turned out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Verdict {
    /// The anomaly was real
    TruePositive,
    /// The target was already healthy before any action
    FalsePositive,
    /// The failure was caught by silence, not by the scorer
    Missed,
}

/// Result of a remediation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    /// Whether the plan reached `Succeeded`
    pub success: bool,
    /// Detection verdict
    pub verdict: Verdict,
    /// Time to repair in milliseconds (successes only)
    pub mttr_ms: Option<u64>,
}

/// One remembered remediation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    /// Monotonic sequence number
    pub seq: u64,
    /// Record time (Unix epoch milliseconds)
    pub timestamp_ms: u64,
    /// Incident subject
    pub subject: String,
    /// Incident classification
    pub kind: IncidentKind,
    /// Dominant signal
    pub signal: Signal,
    /// Anomaly score at detection
    pub score: f64,
    /// Metric values at detection
    pub metrics: BTreeMap<MetricKind, f64>,
    /// Strategy applied
    pub strategy: Strategy,
    /// What happened
    pub outcome: Outcome,
    /// Hex BLAKE3 of kind and quantized embedding
    pub signature: String,
    /// Similarity embedding
    pub embedding: Vec<f64>,
    /// First entry with this signature
    pub high_value: bool,
}

/// Input for [`KnowledgeStore::record`]
#[derive(Debug, Clone)]
pub struct KnowledgeRecord {
    /// Incident subject
    pub subject: String,
    /// Incident classification
    pub kind: IncidentKind,
    /// Dominant signal
    pub signal: Signal,
    /// Anomaly score at detection
    pub score: f64,
    /// Metric values at detection
    pub metrics: BTreeMap<MetricKind, f64>,
    /// Strategy applied
    pub strategy: Strategy,
    /// What happened
    pub outcome: Outcome,
    /// Precomputed embedding; derived from metrics/score/signal when absent
    pub embedding: Option<Vec<f64>>,
}

/// Build the similarity embedding for an incident
pub fn embed(metrics: &BTreeMap<MetricKind, f64>, score: f64, signal: Signal) -> Vec<f64> {
    let metric = |kind: MetricKind| metrics.get(&kind).copied().filter(|v| v.is_finite());
    let mut v = Vec::with_capacity(EMBEDDING_DIM);
    v.push(metric(MetricKind::CpuPct).map(|x| x / 100.0).unwrap_or(0.0));
    v.push(metric(MetricKind::MemPct).map(|x| x / 100.0).unwrap_or(0.0));
    v.push(metric(MetricKind::LatencyMs).map(|x| x / 500.0).unwrap_or(0.0));
    v.push(metric(MetricKind::PacketLossPct).map(|x| x / 20.0).unwrap_or(0.0));
    v.push(
        metric(MetricKind::ThroughputMbps)
            .map(|x| 1.0 - x / 100.0)
            .unwrap_or(0.0),
    );
    for x in v.iter_mut() {
        *x = x.clamp(0.0, 1.0);
    }
    v.push(score.clamp(0.0, 1.0));
    for s in Signal::ALL {
        v.push(if s == signal { 1.0 } else { 0.0 });
    }
    v
}

/// Pattern signature: BLAKE3 over the kind and the embedding quantized to 0.1
pub fn pattern_signature(kind: IncidentKind, embedding: &[f64]) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(kind.as_str().as_bytes());
    for x in embedding {
        hasher.update(&((x * 10.0).round() as i64).to_le_bytes());
    }
    hex::encode(hasher.finalize().as_bytes())
}

/// Cosine similarity in [-1, 1]; 0 when either vector is zero or lengths differ
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let nb = b.iter().map(|x| x * x).sum::<f64>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    (dot / (na * nb)).clamp(-1.0, 1.0)
}

/// Detection and remediation counts for a signal
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeStats {
    /// Confirmed detections
    pub true_positives: u64,
    /// Detections on healthy targets
    pub false_positives: u64,
    /// Failures the scorer never flagged (all signals)
    pub missed: u64,
    /// Successful remediations
    pub successes: u64,
    /// Failed remediations
    pub failures: u64,
}

impl OutcomeStats {
    /// FP / (TP + FP)
    pub fn false_positive_rate(&self) -> Option<f64> {
        let flagged = self.true_positives + self.false_positives;
        (flagged > 0).then(|| self.false_positives as f64 / flagged as f64)
    }

    /// TP / (TP + missed)
    pub fn recall(&self) -> Option<f64> {
        let real = self.true_positives + self.missed;
        (real > 0).then(|| self.true_positives as f64 / real as f64)
    }
}

/// A historical entry ranked by similarity
#[derive(Debug, Clone)]
pub struct SimilarIncident {
    /// The entry
    pub entry: Arc<KnowledgeEntry>,
    /// Cosine similarity to the query
    pub similarity: f64,
}

/// Immutable snapshot of the store for one tick
#[derive(Debug, Clone, Default)]
pub struct KnowledgeView {
    entries: Arc<Vec<Arc<KnowledgeEntry>>>,
}

impl KnowledgeView {
    /// A view with no history
    pub fn empty() -> Self {
        Self::default()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there is no history
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries, oldest first
    pub fn entries(&self) -> &[Arc<KnowledgeEntry>] {
        &self.entries
    }

    fn recent(&self, window: usize) -> &[Arc<KnowledgeEntry>] {
        let start = self.entries.len().saturating_sub(window.max(1));
        &self.entries[start..]
    }

    /// Counts over the most recent `window` entries
    pub fn outcome_stats(&self, signal: Signal, window: usize) -> OutcomeStats {
        let mut stats = OutcomeStats::default();
        for entry in self.recent(window) {
            if entry.outcome.verdict == Verdict::Missed {
                stats.missed += 1;
            }
            if entry.signal != signal {
                continue;
            }
            match entry.outcome.verdict {
                Verdict::TruePositive => stats.true_positives += 1,
                Verdict::FalsePositive => stats.false_positives += 1,
                Verdict::Missed => {}
            }
            if entry.outcome.success {
                stats.successes += 1;
            } else {
                stats.failures += 1;
            }
        }
        stats
    }

    /// Adaptive cutoff for a signal.
    ///
    /// EMAs of true- and false-positive scores place the cutoff between the
    /// two populations. It then moves up one step if the false-positive rate
    /// is over target and down one step if recall is under target, and is
    /// clamped to the configured floor and ceiling.
    pub fn get_adaptive_threshold(&self, signal: Signal, config: &DetectorConfig) -> f64 {
        if !signal.is_scored() {
            return config.base_threshold;
        }

        let alpha = config.ema_alpha;
        let ema = |verdict: Verdict| {
            self.recent(config.outcome_window)
                .iter()
                .filter(|e| e.signal == signal && e.outcome.verdict == verdict)
                .fold(None, |acc: Option<f64>, e| {
                    Some(match acc {
                        None => e.score,
                        Some(prev) => alpha * e.score + (1.0 - alpha) * prev,
                    })
                })
        };

        let mut threshold = config.base_threshold;
        match (ema(Verdict::TruePositive), ema(Verdict::FalsePositive)) {
            (Some(tp), Some(fp)) if tp > fp => threshold = (tp + fp) / 2.0,
            (Some(tp), None) => threshold = threshold.min(tp - config.score_margin),
            (None, Some(fp)) => threshold = threshold.max(fp + config.score_margin),
            _ => {}
        }

        let stats = self.outcome_stats(signal, config.outcome_window);
        if stats
            .false_positive_rate()
            .map(|rate| rate > config.target_false_positive_rate)
            .unwrap_or(false)
        {
            threshold += config.adjustment_step;
        }
        if stats
            .recall()
            .map(|recall| recall < config.target_recall)
            .unwrap_or(false)
        {
            threshold -= config.adjustment_step;
        }

        threshold.clamp(config.threshold_floor, config.threshold_ceiling)
    }

    /// Thresholds for every scored signal
    pub fn threshold_table(&self, config: &DetectorConfig) -> ThresholdTable {
        Signal::ALL
            .iter()
            .filter(|s| s.is_scored())
            .fold(
                ThresholdTable::uniform(config.base_threshold, config.min_confidence),
                |table, signal| table.with(*signal, self.get_adaptive_threshold(*signal, config)),
            )
    }

    /// Top `k` entries by cosine similarity, most similar first
    pub fn query_similar_incidents(&self, embedding: &[f64], k: usize) -> Vec<SimilarIncident> {
        let mut ranked: Vec<SimilarIncident> = self
            .entries
            .iter()
            .map(|entry| SimilarIncident {
                similarity: cosine_similarity(embedding, &entry.embedding),
                entry: entry.clone(),
            })
            .collect();
        ranked.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then_with(|| b.entry.seq.cmp(&a.entry.seq))
        });
        ranked.truncate(k);
        ranked
    }

    /// Highest similarity to any historical entry (0 with no history)
    pub fn best_similarity(&self, embedding: &[f64]) -> f64 {
        self.entries
            .iter()
            .map(|e| cosine_similarity(embedding, &e.embedding))
            .fold(0.0, f64::max)
    }

    /// Similarity-weighted failure rate of `strategy` among the `k` nearest
    /// entries that used it; `prior` without enough similar history
    pub fn strategy_risk(
        &self,
        strategy: Strategy,
        embedding: &[f64],
        k: usize,
        min_similarity: f64,
        prior: f64,
    ) -> f64 {
        let mut neighbors: Vec<(f64, bool)> = self
            .entries
            .iter()
            .filter(|e| e.strategy == strategy)
            .map(|e| (cosine_similarity(embedding, &e.embedding), e.outcome.success))
            .filter(|(similarity, _)| *similarity >= min_similarity)
            .collect();
        neighbors.sort_by(|a, b| b.0.total_cmp(&a.0));
        neighbors.truncate(k);

        let weight: f64 = neighbors.iter().map(|(s, _)| s).sum();
        if neighbors.is_empty() || weight <= 0.0 {
            return prior;
        }
        let failed: f64 = neighbors
            .iter()
            .filter(|(_, success)| !success)
            .map(|(s, _)| s)
            .sum();
        failed / weight
    }

    /// Mean time to repair of successful runs of `strategy` on `kind`
    pub fn average_mttr(&self, kind: IncidentKind, strategy: Strategy) -> Option<f64> {
        let samples: Vec<u64> = self
            .entries
            .iter()
            .filter(|e| e.kind == kind && e.strategy == strategy && e.outcome.success)
            .filter_map(|e| e.outcome.mttr_ms)
            .collect();
        if samples.is_empty() {
            return None;
        }
        Some(samples.iter().sum::<u64>() as f64 / samples.len() as f64)
    }

    /// Allowed strategy with the best average MTTR for `kind`, if any has history
    pub fn recommended_strategy(&self, kind: IncidentKind, allowed: &[Strategy]) -> Option<Strategy> {
        allowed
            .iter()
            .filter_map(|s| self.average_mttr(kind, *s).map(|mttr| (*s, mttr)))
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(s, _)| s)
    }
}

/// Capacity-bounded outcome memory
#[derive(Debug)]
pub struct KnowledgeStore {
    entries: VecDeque<Arc<KnowledgeEntry>>,
    capacity: usize,
    next_seq: u64,
    /// Stored entries per pattern signature
    signatures: HashMap<String, usize>,
    evicted: u64,
    journal: Option<JournalHandle>,
}

impl KnowledgeStore {
    /// Create an empty store
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity: capacity.max(1),
            next_seq: 0,
            signatures: HashMap::new(),
            evicted: 0,
            journal: None,
        }
    }

    /// Create a store sized from configuration
    pub fn from_config(config: &KnowledgeConfig) -> Self {
        Self::new(config.capacity)
    }

    /// Persist every new entry through the journal writer
    pub fn with_journal(mut self, journal: JournalHandle) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Stop journaling; the writer task exits once its queue drains
    pub fn close_journal(&mut self) {
        self.journal = None;
    }

    /// Reload entries from persistence without journaling them again
    pub fn restore(&mut self, entries: Vec<KnowledgeEntry>) {
        for entry in entries {
            self.next_seq = self.next_seq.max(entry.seq + 1);
            self.insert(Arc::new(entry));
        }
    }

    /// Append an outcome; returns the stored entry
    pub fn record(&mut self, record: KnowledgeRecord) -> Arc<KnowledgeEntry> {
        let embedding = record
            .embedding
            .unwrap_or_else(|| embed(&record.metrics, record.score, record.signal));
        let signature = pattern_signature(record.kind, &embedding);
        let high_value = !self.signatures.contains_key(&signature);

        let entry = Arc::new(KnowledgeEntry {
            seq: self.next_seq,
            timestamp_ms: current_timestamp_ms(),
            subject: record.subject,
            kind: record.kind,
            signal: record.signal,
            score: record.score,
            metrics: record.metrics,
            strategy: record.strategy,
            outcome: record.outcome,
            signature,
            embedding,
            high_value,
        });
        self.next_seq += 1;

        self.insert(entry.clone());
        debug!(
            seq = entry.seq,
            kind = entry.kind.as_str(),
            strategy = entry.strategy.as_str(),
            success = entry.outcome.success,
            high_value,
            "Knowledge recorded"
        );

        if let Some(journal) = &self.journal {
            if let Err(e) = journal.submit((*entry).clone()) {
                warn!(seq = entry.seq, error = %e, "Knowledge journal write not queued");
            }
        }
        entry
    }

    fn insert(&mut self, entry: Arc<KnowledgeEntry>) {
        if self.entries.len() >= self.capacity {
            let victim = self
                .entries
                .iter()
                .position(|e| !e.high_value)
                .unwrap_or(0);
            if let Some(removed) = self.entries.remove(victim) {
                self.evicted += 1;
                if let Some(count) = self.signatures.get_mut(&removed.signature) {
                    *count -= 1;
                    if *count == 0 {
                        self.signatures.remove(&removed.signature);
                    }
                }
                debug!(seq = removed.seq, high_value = removed.high_value, "Knowledge entry evicted");
            }
        }
        *self.signatures.entry(entry.signature.clone()).or_default() += 1;
        self.entries.push_back(entry);
    }

    /// Immutable view for one tick
    pub fn view(&self) -> KnowledgeView {
        KnowledgeView {
            entries: Arc::new(self.entries.iter().cloned().collect()),
        }
    }

    /// Adaptive threshold on the current contents
    pub fn get_adaptive_threshold(&self, signal: Signal, config: &DetectorConfig) -> f64 {
        self.view().get_adaptive_threshold(signal, config)
    }

    /// Similar incidents on the current contents
    pub fn query_similar_incidents(&self, embedding: &[f64], k: usize) -> Vec<SimilarIncident> {
        self.view().query_similar_incidents(embedding, k)
    }

    /// Entries held
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum entries held
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Entries evicted since creation
    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    /// Entry by sequence number
    pub fn get(&self, seq: u64) -> Option<Arc<KnowledgeEntry>> {
        self.entries.iter().find(|e| e.seq == seq).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(kind: IncidentKind, signal: Signal, score: f64, verdict: Verdict, success: bool) -> KnowledgeRecord {
        let mut metrics = BTreeMap::new();
        metrics.insert(MetricKind::CpuPct, 97.0);
        KnowledgeRecord {
            subject: "node:n1".to_string(),
            kind,
            signal,
            score,
            metrics,
            strategy: Strategy::RestartOrScale,
            outcome: Outcome {
                success,
                verdict,
                mttr_ms: success.then_some(1_000),
            },
            embedding: None,
        }
    }

    #[test]
    fn test_first_signature_is_high_value() {
        let mut store = KnowledgeStore::new(10);
        let first = store.record(record(IncidentKind::ResourceExhaustion, Signal::Cpu, 0.9, Verdict::TruePositive, true));
        let again = store.record(record(IncidentKind::ResourceExhaustion, Signal::Cpu, 0.9, Verdict::TruePositive, true));
        let other = store.record(record(IncidentKind::CachePressure, Signal::Cpu, 0.9, Verdict::TruePositive, true));

        assert!(first.high_value);
        assert!(!again.high_value);
        assert_eq!(first.signature, again.signature);
        assert!(other.high_value);
        assert_eq!(first.embedding.len(), EMBEDDING_DIM);
    }

    #[test]
    fn test_eviction_skips_high_value() {
        let mut store = KnowledgeStore::new(3);
        for _ in 0..3 {
            store.record(record(IncidentKind::ResourceExhaustion, Signal::Cpu, 0.9, Verdict::TruePositive, true));
        }
        store.record(record(IncidentKind::ResourceExhaustion, Signal::Cpu, 0.9, Verdict::TruePositive, true));

        assert_eq!(store.len(), 3);
        assert!(store.get(0).is_some());
        assert!(store.get(1).is_none());
        assert_eq!(store.evicted(), 1);
    }

    #[test]
    fn test_eviction_falls_back_to_oldest_when_all_high_value() {
        let mut store = KnowledgeStore::new(2);
        store.record(record(IncidentKind::ResourceExhaustion, Signal::Cpu, 0.9, Verdict::TruePositive, true));
        store.record(record(IncidentKind::CachePressure, Signal::Memory, 0.9, Verdict::TruePositive, true));
        store.record(record(IncidentKind::Flapping, Signal::Latency, 0.9, Verdict::TruePositive, true));

        assert_eq!(store.len(), 2);
        assert!(store.get(0).is_none());
        assert!(store.get(2).is_some());
    }

    #[test]
    fn test_signature_index_tracks_stored_entries() {
        let kinds = [
            IncidentKind::ResourceExhaustion,
            IncidentKind::CachePressure,
            IncidentKind::Flapping,
            IncidentKind::LinkDegradation,
        ];
        let mut store = KnowledgeStore::new(2);
        for _ in 0..50 {
            for kind in kinds {
                store.record(record(kind, Signal::Cpu, 0.9, Verdict::TruePositive, true));
            }
        }
        assert_eq!(store.len(), 2);
        assert!(store.signatures.len() <= 2);
        assert_eq!(store.signatures.values().sum::<usize>(), store.len());

        // A pattern that aged out entirely counts as new again
        let back = store.record(record(kinds[0], Signal::Cpu, 0.9, Verdict::TruePositive, true));
        assert!(back.high_value);
    }

    #[test]
    fn test_threshold_rises_with_false_positives() {
        let config = DetectorConfig::default();
        let mut store = KnowledgeStore::new(100);
        for _ in 0..10 {
            store.record(record(IncidentKind::ResourceExhaustion, Signal::Cpu, 0.7, Verdict::FalsePositive, false));
        }
        let threshold = store.get_adaptive_threshold(Signal::Cpu, &config);
        assert!(threshold > config.base_threshold);
        assert!(threshold <= config.threshold_ceiling);

        // Untouched signals keep the base
        assert_eq!(store.get_adaptive_threshold(Signal::Memory, &config), config.base_threshold);
    }

    #[test]
    fn test_threshold_drops_when_recall_is_low() {
        let config = DetectorConfig::default();
        let mut store = KnowledgeStore::new(100);
        store.record(record(IncidentKind::ResourceExhaustion, Signal::Cpu, 0.95, Verdict::TruePositive, true));
        for _ in 0..3 {
            store.record(record(IncidentKind::NodeFailure, Signal::Silence, 1.0, Verdict::Missed, true));
        }
        let threshold = store.get_adaptive_threshold(Signal::Cpu, &config);
        assert!(threshold < config.base_threshold);
        assert!(threshold >= config.threshold_floor);
    }

    #[test]
    fn test_view_is_isolated_from_later_writes() {
        let mut store = KnowledgeStore::new(10);
        let view = store.view();
        store.record(record(IncidentKind::ResourceExhaustion, Signal::Cpu, 0.9, Verdict::TruePositive, true));
        assert!(view.is_empty());
        assert_eq!(store.view().len(), 1);
    }

    #[test]
    fn test_strategy_risk_is_similarity_weighted_failure_rate() {
        let mut store = KnowledgeStore::new(100);
        for i in 0..10 {
            store.record(record(IncidentKind::ResourceExhaustion, Signal::Cpu, 0.9, Verdict::TruePositive, i >= 7));
        }
        let probe = embed(&store.get(0).unwrap().metrics, 0.9, Signal::Cpu);
        let risk = store.view().strategy_risk(Strategy::RestartOrScale, &probe, 10, 0.8, 0.1);
        assert!((risk - 0.7).abs() < 1e-9);

        // Different strategy has no history: prior
        let prior = store.view().strategy_risk(Strategy::Reroute, &probe, 10, 0.8, 0.1);
        assert_eq!(prior, 0.1);
    }

    #[test]
    fn test_recommended_strategy_prefers_lower_mttr() {
        let mut store = KnowledgeStore::new(100);
        let mut slow = record(IncidentKind::ResourceExhaustion, Signal::Cpu, 0.9, Verdict::TruePositive, true);
        slow.outcome.mttr_ms = Some(9_000);
        let mut fast = record(IncidentKind::ResourceExhaustion, Signal::Cpu, 0.9, Verdict::TruePositive, true);
        fast.strategy = Strategy::ClearCache;
        fast.outcome.mttr_ms = Some(2_000);
        store.record(slow);
        store.record(fast);

        let view = store.view();
        assert_eq!(
            view.recommended_strategy(
                IncidentKind::ResourceExhaustion,
                &[Strategy::RestartOrScale, Strategy::ClearCache]
            ),
            Some(Strategy::ClearCache)
        );
        assert_eq!(view.recommended_strategy(IncidentKind::Flapping, &[Strategy::IsolateNode]), None);
    }

    #[test]
    fn test_similarity_ranking() {
        let mut store = KnowledgeStore::new(10);
        store.record(record(IncidentKind::ResourceExhaustion, Signal::Cpu, 0.9, Verdict::TruePositive, true));
        let mut far = record(IncidentKind::LinkDegradation, Signal::Latency, 0.9, Verdict::TruePositive, true);
        far.metrics = BTreeMap::from([(MetricKind::LatencyMs, 400.0)]);
        store.record(far);

        let query = embed(&BTreeMap::from([(MetricKind::CpuPct, 95.0)]), 0.9, Signal::Cpu);
        let similar = store.query_similar_incidents(&query, 2);
        assert_eq!(similar.len(), 2);
        assert_eq!(similar[0].entry.kind, IncidentKind::ResourceExhaustion);
        assert!(similar[0].similarity > similar[1].similarity);
    }

    #[test]
    fn test_cosine_edge_cases() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert!((cosine_similarity(&[1.0, 1.0], &[2.0, 2.0]) - 1.0).abs() < 1e-12);
    }
}
