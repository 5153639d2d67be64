//! Prometheus metrics for the control loop

use crate::error::HealingResult;
use prometheus::{
    register_gauge_with_registry, register_histogram_with_registry,
    register_int_counter_vec_with_registry, register_int_counter_with_registry,
    register_int_gauge_with_registry, Encoder, Gauge, Histogram, IntCounter, IntCounterVec,
    IntGauge, Registry, TextEncoder,
};

/// Control loop metrics, registered on a private registry
#[derive(Clone)]
pub struct HealingMetrics {
    /// Incidents by kind
    pub incidents_detected: IntCounterVec,
    /// Executed plans by strategy and terminal state
    pub plans_executed: IntCounterVec,
    /// Time to repair
    pub mttr_seconds: Histogram,
    /// Most recent time to repair
    pub last_mttr_seconds: Gauge,
    /// Rollbacks attempted
    pub rollback_count: IntCounter,
    /// Anomalies flagged by signal
    pub anomalies_flagged: IntCounterVec,
    /// Anomaly events dropped by the phase queue
    pub events_dropped: IntCounter,
    /// Scorer predictions discarded for exceeding the latency budget
    pub predictions_discarded: IntCounter,
    /// Knowledge journal writes that failed after retries
    pub knowledge_write_failures: IntCounter,
    /// Nodes currently quarantined
    pub quarantined_nodes: IntGauge,
    /// Approval requests awaiting governance
    pub pending_approvals: IntGauge,
    /// Tick wall time
    pub tick_duration_seconds: Histogram,

    registry: Registry,
}

impl HealingMetrics {
    /// Register every metric on a fresh registry
    pub fn new() -> HealingResult<Self> {
        let registry = Registry::new();

        let incidents_detected = register_int_counter_vec_with_registry!(
            "meshheal_incidents_detected_total",
            "Incidents detected by kind",
            &["kind"],
            registry
        )?;

        let plans_executed = register_int_counter_vec_with_registry!(
            "meshheal_plans_executed_total",
            "Recovery plans executed by strategy and terminal state",
            &["strategy", "state"],
            registry
        )?;

        let mttr_seconds = register_histogram_with_registry!(
            "meshheal_mttr_seconds",
            "Time from incident detection to verified repair",
            vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0],
            registry
        )?;

        let last_mttr_seconds = register_gauge_with_registry!(
            "meshheal_last_mttr_seconds",
            "Time to repair of the most recent successful execution",
            registry
        )?;

        let rollback_count = register_int_counter_with_registry!(
            "meshheal_rollback_count_total",
            "Rollbacks attempted after failed executions",
            registry
        )?;

        let anomalies_flagged = register_int_counter_vec_with_registry!(
            "meshheal_anomalies_flagged_total",
            "Anomaly events flagged by dominant signal",
            &["signal"],
            registry
        )?;

        let events_dropped = register_int_counter_with_registry!(
            "meshheal_events_dropped_total",
            "Anomaly events dropped by phase queue backpressure",
            registry
        )?;

        let predictions_discarded = register_int_counter_with_registry!(
            "meshheal_predictions_discarded_total",
            "Scorer predictions discarded for exceeding the latency budget",
            registry
        )?;

        let knowledge_write_failures = register_int_counter_with_registry!(
            "meshheal_knowledge_write_failures_total",
            "Knowledge journal writes that failed after all retries",
            registry
        )?;

        let quarantined_nodes = register_int_gauge_with_registry!(
            "meshheal_quarantined_nodes",
            "Nodes currently quarantined",
            registry
        )?;

        let pending_approvals = register_int_gauge_with_registry!(
            "meshheal_pending_approvals",
            "Recovery plans awaiting governance approval",
            registry
        )?;

        let tick_duration_seconds = register_histogram_with_registry!(
            "meshheal_tick_duration_seconds",
            "Wall time of one control loop tick",
            vec![0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0],
            registry
        )?;

        Ok(Self {
            incidents_detected,
            plans_executed,
            mttr_seconds,
            last_mttr_seconds,
            rollback_count,
            anomalies_flagged,
            events_dropped,
            predictions_discarded,
            knowledge_write_failures,
            quarantined_nodes,
            pending_approvals,
            tick_duration_seconds,
            registry,
        })
    }

    /// Record a successful repair
    pub fn observe_mttr(&self, mttr_ms: u64) {
        let secs = mttr_ms as f64 / 1000.0;
        self.mttr_seconds.observe(secs);
        self.last_mttr_seconds.set(secs);
    }

    /// Text exposition of every registered metric
    pub fn export(&self) -> HealingResult<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }

    /// Underlying registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl std::fmt::Debug for HealingMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealingMetrics").finish_non_exhaustive()
    }
}
