//! SQLite journal for knowledge entries
//!
//! Writes never block the loop: entries go through a bounded queue to a
//! writer task that persists them on the blocking pool, retrying with
//! exponential backoff. An entry that still fails is counted and dropped.

use crate::error::{HealingError, HealingResult};
use crate::knowledge::KnowledgeEntry;
use crate::metrics::HealingMetrics;
use meshheal_core::KnowledgeConfig;
use rand::Rng;
use rusqlite::{Connection, Result as SqliteResult};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Durable store of knowledge entries
#[derive(Debug)]
pub struct KnowledgeJournal {
    db: Connection,
}

impl KnowledgeJournal {
    /// Open (or create) the journal at `path`; `":memory:"` for an ephemeral one
    pub fn open<P: AsRef<Path>>(path: P) -> SqliteResult<Self> {
        let db = Connection::open(path)?;

        db.execute(
            "CREATE TABLE IF NOT EXISTS knowledge_entries (
                seq INTEGER PRIMARY KEY,
                timestamp INTEGER NOT NULL,
                kind TEXT NOT NULL,
                strategy TEXT NOT NULL,
                signature TEXT NOT NULL,
                payload TEXT NOT NULL
            )",
            [],
        )?;

        db.execute(
            "CREATE INDEX IF NOT EXISTS idx_knowledge_signature ON knowledge_entries(signature)",
            [],
        )?;

        Ok(Self { db })
    }

    /// Persist one entry; rewriting a sequence number replaces it
    pub fn append(&self, entry: &KnowledgeEntry) -> HealingResult<()> {
        let payload = serde_json::to_string(entry)?;
        self.db.execute(
            "INSERT OR REPLACE INTO knowledge_entries (seq, timestamp, kind, strategy, signature, payload)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                entry.seq as i64,
                entry.timestamp_ms as i64,
                entry.kind.as_str(),
                entry.strategy.as_str(),
                entry.signature,
                payload
            ],
        )?;
        Ok(())
    }

    /// The newest `limit` entries, oldest first
    pub fn load_recent(&self, limit: usize) -> HealingResult<Vec<KnowledgeEntry>> {
        let mut stmt = self
            .db
            .prepare("SELECT payload FROM knowledge_entries ORDER BY seq DESC LIMIT ?1")?;

        let payloads = stmt
            .query_map([limit as i64], |row| row.get::<_, String>(0))?
            .collect::<SqliteResult<Vec<_>>>()?;

        let mut entries = payloads
            .iter()
            .map(|p| serde_json::from_str::<KnowledgeEntry>(p))
            .collect::<Result<Vec<_>, _>>()?;
        entries.reverse();
        Ok(entries)
    }

    /// Entries stored
    pub fn count(&self) -> HealingResult<usize> {
        let count: i64 = self
            .db
            .query_row("SELECT COUNT(*) FROM knowledge_entries", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    #[cfg(test)]
    fn break_schema(&self) {
        self.db
            .execute("DROP TABLE knowledge_entries", [])
            .unwrap();
    }
}

/// Non-blocking handle to the journal writer task
#[derive(Debug, Clone)]
pub struct JournalHandle {
    tx: mpsc::Sender<KnowledgeEntry>,
    metrics: Option<HealingMetrics>,
}

impl JournalHandle {
    /// Start the writer task
    pub fn spawn(
        journal: KnowledgeJournal,
        config: &KnowledgeConfig,
        metrics: Option<HealingMetrics>,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(config.write_queue_capacity.max(1));
        let writer = JournalWriter {
            journal: Arc::new(Mutex::new(journal)),
            attempts: config.write_attempts.max(1),
            backoff: Duration::from_millis(config.write_backoff_ms),
            metrics: metrics.clone(),
        };
        let task = tokio::spawn(writer.run(rx));
        (Self { tx, metrics }, task)
    }

    /// Queue an entry for persistence without waiting
    pub fn submit(&self, entry: KnowledgeEntry) -> HealingResult<()> {
        self.tx.try_send(entry).map_err(|e| {
            if let Some(metrics) = &self.metrics {
                metrics.knowledge_write_failures.inc();
            }
            match e {
                mpsc::error::TrySendError::Full(_) => HealingError::QueueFull("knowledge journal".to_string()),
                mpsc::error::TrySendError::Closed(_) => {
                    HealingError::KnowledgeWriteFailure("journal writer stopped".to_string())
                }
            }
        })
    }
}

struct JournalWriter {
    journal: Arc<Mutex<KnowledgeJournal>>,
    attempts: u32,
    backoff: Duration,
    metrics: Option<HealingMetrics>,
}

impl JournalWriter {
    async fn run(self, mut rx: mpsc::Receiver<KnowledgeEntry>) {
        while let Some(entry) = rx.recv().await {
            if let Err(e) = self.write_with_retry(&entry).await {
                warn!(seq = entry.seq, error = %e, "Knowledge entry not persisted");
                if let Some(metrics) = &self.metrics {
                    metrics.knowledge_write_failures.inc();
                }
            }
        }
        debug!("Knowledge journal writer stopped");
    }

    async fn write_with_retry(&self, entry: &KnowledgeEntry) -> HealingResult<()> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let journal = self.journal.clone();
            let pending = entry.clone();
            let result = tokio::task::spawn_blocking(move || {
                journal
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .append(&pending)
            })
            .await
            .map_err(|e| HealingError::Worker(e.to_string()))
            .and_then(|r| r);

            match result {
                Ok(()) => return Ok(()),
                Err(e) if attempt >= self.attempts => {
                    return Err(HealingError::KnowledgeWriteFailure(format!(
                        "seq {} after {} attempts: {}",
                        entry.seq, attempt, e
                    )));
                }
                Err(e) => {
                    let base = self.backoff * 2u32.saturating_pow(attempt - 1);
                    let jitter_ms = rand::thread_rng().gen_range(0..=(base.as_millis() as u64 / 4));
                    let delay = base + Duration::from_millis(jitter_ms);
                    debug!(seq = entry.seq, attempt, delay_ms = delay.as_millis() as u64, error = %e, "Retrying knowledge write");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
