//! Error taxonomy for the self-healing control loop.
//!
//! Per-incident failures are recorded and never halt the loop. Only setup
//! errors (configuration, metrics registration, journal open) surface to the
//! caller of `ControlLoop::new`.

use meshheal_core::CoreError;
use meshheal_mesh::MeshError;
use thiserror::Error;

/// Errors raised by the healing pipeline
#[derive(Debug, Error)]
pub enum HealingError {
    /// Telemetry missing or late for a node; detection continues with lower confidence
    #[error("Telemetry gap for {node_id}: {reason}")]
    TelemetryGap {
        /// Node without usable telemetry
        node_id: String,
        /// What was missing
        reason: String,
    },

    /// Telemetry source failed outright
    #[error("Telemetry source error: {0}")]
    TelemetrySource(String),

    /// A plan references topology that no longer exists
    #[error("Topology inconsistency: {0}")]
    TopologyInconsistency(String),

    /// Fewer disjoint paths than requested
    #[error("Insufficient disjoint paths for {flow}: found {found} of {requested}")]
    InsufficientDisjointPaths {
        /// Flow being rerouted
        flow: String,
        /// Paths found
        found: usize,
        /// Paths requested
        requested: usize,
    },

    /// Action did not finish within its timeout
    #[error("Execution of plan {plan_id} timed out after {timeout_ms}ms")]
    ExecutionTimeout {
        /// Plan that timed out
        plan_id: String,
        /// Applied timeout
        timeout_ms: u64,
    },

    /// Execution abandoned because the loop is shutting down
    #[error("Execution of plan {plan_id} cancelled by shutdown")]
    Cancelled {
        /// Plan that was cancelled
        plan_id: String,
    },

    /// Rollback after a failed action also failed
    #[error("Rollback failed on {node_id}: {reason}")]
    RollbackFailure {
        /// Node being rolled back
        node_id: String,
        /// Why rollback failed
        reason: String,
    },

    /// Knowledge persistence failed after retries
    #[error("Knowledge write failed: {0}")]
    KnowledgeWriteFailure(String),

    /// Target identity is not valid
    #[error("Identity rejected for node {node_id}")]
    IdentityRejected {
        /// Node whose identity is invalid
        node_id: String,
    },

    /// Strategy breaker is open
    #[error("Circuit open for strategy {strategy}")]
    CircuitOpen {
        /// Strategy name
        strategy: String,
    },

    /// Global action rate limit reached
    #[error("Action rate limit exceeded")]
    RateLimited,

    /// Secure channel delivered a negative acknowledgement
    #[error("Command rejected by {node_id}: {reason}")]
    CommandRejected {
        /// Recipient node
        node_id: String,
        /// Nack reason
        reason: String,
    },

    /// Execution state machine violation
    #[error("Invalid execution transition {from} -> {to}")]
    InvalidTransition {
        /// Current state
        from: String,
        /// Requested state
        to: String,
    },

    /// Bounded queue refused a message
    #[error("Queue full: {0}")]
    QueueFull(String),

    /// Worker pool failure (closed semaphore or panicked job)
    #[error("Worker error: {0}")]
    Worker(String),

    /// Topology manager error
    #[error("Mesh error: {0}")]
    Mesh(#[from] MeshError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] CoreError),

    /// Journal storage error
    #[error("Journal error: {0}")]
    Journal(#[from] rusqlite::Error),

    /// Metrics registration error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for healing operations
pub type HealingResult<T> = Result<T, HealingError>;
