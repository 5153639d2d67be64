//! Bounded phase queue between detection and analysis
//!
//! Events for a subject already queued are merged into the queued event.
//! When the queue is full the oldest event is dropped.

use crate::anomaly::{AnomalyEvent, Subject};
use std::collections::VecDeque;
use tracing::warn;

/// What happened to a pushed event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Appended
    Queued,
    /// Folded into a queued event for the same subject
    Merged,
    /// Appended after evicting the oldest event
    DroppedOldest,
}

/// Bounded FIFO of anomaly events with same-subject merging
#[derive(Debug)]
pub struct EventQueue {
    events: VecDeque<AnomalyEvent>,
    capacity: usize,
    dropped: u64,
}

impl EventQueue {
    /// Create a queue holding at most `capacity` events
    pub fn new(capacity: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(capacity.min(4096)),
            capacity: capacity.max(1),
            dropped: 0,
        }
    }

    /// Push an event, merging or dropping as needed
    pub fn push(&mut self, event: AnomalyEvent) -> PushOutcome {
        if let Some(queued) = self.events.iter_mut().find(|e| e.subject == event.subject) {
            merge(queued, event);
            return PushOutcome::Merged;
        }

        let mut outcome = PushOutcome::Queued;
        if self.events.len() >= self.capacity {
            if let Some(oldest) = self.events.pop_front() {
                self.dropped += 1;
                warn!(
                    subject = %oldest.subject,
                    signal = %oldest.signal,
                    dropped_total = self.dropped,
                    "Phase queue full; dropped oldest anomaly event"
                );
            }
            outcome = PushOutcome::DroppedOldest;
        }
        self.events.push_back(event);
        outcome
    }

    /// Take every queued event in arrival order
    pub fn drain(&mut self) -> Vec<AnomalyEvent> {
        self.events.drain(..).collect()
    }

    /// Queued events
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether the queue is empty
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Events dropped since creation
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Whether an event for the subject is queued
    pub fn contains(&self, subject: &Subject) -> bool {
        self.events.iter().any(|e| &e.subject == subject)
    }
}

/// Max score wins the signal; contributing metrics are unioned
fn merge(queued: &mut AnomalyEvent, incoming: AnomalyEvent) {
    if incoming.score > queued.score {
        queued.score = incoming.score;
        queued.signal = incoming.signal;
        queued.snapshot_version = queued.snapshot_version.max(incoming.snapshot_version);
    }
    queued.confidence = queued.confidence.max(incoming.confidence);
    queued.timestamp_ms = queued.timestamp_ms.min(incoming.timestamp_ms);
    for kind in incoming.contributing {
        if !queued.contributing.contains(&kind) {
            queued.contributing.push(kind);
        }
    }
    for (kind, value) in incoming.metrics {
        queued.metrics.entry(kind).or_insert(value);
    }
}
