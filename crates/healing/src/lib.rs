//! MeshHeal self-healing control loop
//!
//! This crate implements the MAPE-K loop that keeps a mesh partition healthy:
//! - Monitor: telemetry collection and anomaly scoring against adaptive thresholds
//! - Analyze: event correlation, cascade detection and root-cause ranking
//! - Plan: strategy selection, k-disjoint rerouting and risk estimation
//! - Execute: guarded command delivery with verification and a single rollback
//! - Knowledge: bounded outcome memory with an optional SQLite journal
//!
//! Topology state lives in `meshheal-mesh`; this crate only reads snapshots
//! and submits events through the topology manager.

#![warn(missing_docs)]

pub mod anomaly;
pub mod channel;
pub mod error;
pub mod executor;
pub mod governance;
pub mod journal;
pub mod knowledge;
pub mod metrics;
pub mod orchestrator;
pub mod pipeline;
pub mod planner;
pub mod resilience;
pub mod root_cause;
pub mod telemetry;
pub mod worker_pool;

pub use anomaly::{
    AnomalyDetector, AnomalyEvent, AnomalyScorer, DetectionReport, Prediction, Signal,
    StatisticalScorer, Subject, ThresholdTable,
};
pub use channel::{
    Command, CommandReply, DryRunChannel, HealthProbe, ProbeTarget, SecureChannel, SnapshotProbe,
};
pub use error::{HealingError, HealingResult};
pub use executor::{ExecutionRecord, ExecutionState, Executor, ExecutorDeps, NodeLockTable};
pub use governance::{
    ApprovalDecision, ApprovalGate, ApprovalOutcome, ApprovalRequest, Escalation, Governance,
    LoggingGovernance,
};
pub use journal::{JournalHandle, KnowledgeJournal};
pub use knowledge::{
    cosine_similarity, embed, pattern_signature, KnowledgeEntry, KnowledgeRecord, KnowledgeStore,
    KnowledgeView, Outcome, OutcomeStats, SimilarIncident, Verdict, EMBEDDING_DIM,
};
pub use metrics::HealingMetrics;
pub use orchestrator::{
    Collaborators, ControlHandle, ControlLoop, IncidentRecord, IncidentRegistry, IncidentStatus,
    TickReport,
};
pub use pipeline::{EventQueue, PushOutcome};
pub use planner::{allowed_strategies, PlanDecision, Planner, RecoveryPlan, RerouteSpec, Strategy};
pub use resilience::{CircuitBreaker, CircuitState, RateLimiter, StrategyBreakers};
pub use root_cause::{Incident, IncidentKind, RootCauseAnalyzer, RootCauseCandidate};
pub use telemetry::{
    FeatureHistory, FileTelemetrySource, NodeFeatures, SharedTelemetrySource, SilenceTracker,
    TelemetrySource,
};
pub use worker_pool::WorkerPool;
