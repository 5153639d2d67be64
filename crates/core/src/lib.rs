//! Core functionality for the MeshHeal self-healing mesh control plane.
//!
//! This crate provides the shared types, configuration and logging bootstrap
//! used by the topology, healing and service crates.

pub mod config;
pub mod error;
pub mod logging;
pub mod types;

pub use config::{
    AnalyzerConfig, DetectorConfig, ExecutorConfig, GovernanceConfig, HealingConfig,
    KnowledgeConfig, LoopConfig, PlannerConfig,
};
pub use error::{CoreError, Result};
pub use logging::LogFormat;
pub use types::{
    current_timestamp_ms, IdentityRef, MetricKind, NodeId, TelemetryFrame, TelemetrySample,
};
