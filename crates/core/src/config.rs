//! Configuration management for MeshHeal.
//!
//! Every field carries a default so a partial TOML document is enough; the
//! governance-tunable values (cascade thresholds, risk ceiling, approval timeout)
//! are ordinary fields rather than constants.

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level control loop configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HealingConfig {
    /// Loop scheduling
    #[serde(rename = "loop")]
    pub control_loop: LoopConfig,
    /// Monitor phase
    pub detector: DetectorConfig,
    /// Analyze phase
    pub analyzer: AnalyzerConfig,
    /// Plan phase
    pub planner: PlannerConfig,
    /// Execute phase
    pub executor: ExecutorConfig,
    /// Knowledge phase
    pub knowledge: KnowledgeConfig,
    /// Governance collaborator
    pub governance: GovernanceConfig,
}

/// Loop scheduling and resource bounds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    /// Mesh partition driven by this loop
    pub partition_id: String,
    /// Periodic tick interval (seconds, 5-30 in production)
    pub tick_interval_secs: u64,
    /// Budget for telemetry collection within a tick (milliseconds)
    pub telemetry_budget_ms: u64,
    /// Worker pool size for scoring and path search (None = core count)
    pub worker_pool_size: Option<usize>,
    /// Capacity of the anomaly event queue between Monitor and Analyze
    pub phase_queue_capacity: usize,
    /// Capacity of the preemption channel
    pub preempt_queue_capacity: usize,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            partition_id: "partition-0".to_string(),
            tick_interval_secs: 10,
            telemetry_budget_ms: 2_000,
            worker_pool_size: None,
            phase_queue_capacity: 1_024,
            preempt_queue_capacity: 64,
        }
    }
}

/// Anomaly detector and adaptive threshold parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Threshold used when Knowledge has no history for a signal
    pub base_threshold: f64,
    /// Minimum confidence required to flag an anomaly
    pub min_confidence: f64,
    /// Lower bound for adaptive thresholds
    pub threshold_floor: f64,
    /// Upper bound for adaptive thresholds
    pub threshold_ceiling: f64,
    /// EMA smoothing factor
    pub ema_alpha: f64,
    /// Target false-positive rate; exceeding it raises the threshold
    pub target_false_positive_rate: f64,
    /// Target recall; dropping below it lowers the threshold
    pub target_recall: f64,
    /// Step applied by the rate corrections
    pub adjustment_step: f64,
    /// Margin pulled around mislabelled scores
    pub score_margin: f64,
    /// Number of most recent outcomes per signal considered
    pub outcome_window: usize,
    /// Latency budget for a single prediction (milliseconds)
    pub predict_budget_ms: u64,
    /// Consecutive missing frames before a node is declared silent
    pub silence_ticks: u32,
    /// Samples needed before the history factor reaches 1.0
    pub min_history: u32,
    /// Link latency treated as degraded (milliseconds)
    pub link_latency_ms: f64,
    /// Link loss treated as degraded (percent)
    pub link_loss_pct: f64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            base_threshold: 0.6,
            min_confidence: 0.5,
            threshold_floor: 0.3,
            threshold_ceiling: 0.95,
            ema_alpha: 0.2,
            target_false_positive_rate: 0.1,
            target_recall: 0.9,
            adjustment_step: 0.05,
            score_margin: 0.05,
            outcome_window: 200,
            predict_budget_ms: 50,
            silence_ticks: 3,
            min_history: 3,
            link_latency_ms: 200.0,
            link_loss_pct: 5.0,
        }
    }
}

/// Root cause analyzer parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Events on the same subject within this window merge (milliseconds)
    pub correlation_window_ms: u64,
    /// Connected anomalous nodes needed to declare a cascade (M)
    pub cascade_min_nodes: usize,
    /// Window within which the cascade nodes must be anomalous (W, milliseconds)
    pub cascade_window_ms: u64,
    /// Incidents on one subject within the flap window that mark it flapping
    pub flap_threshold: usize,
    /// Flap observation window (milliseconds)
    pub flap_window_ms: u64,
    /// Ranking weight of topological centrality
    pub centrality_weight: f64,
    /// Ranking weight of temporal precedence
    pub precedence_weight: f64,
    /// Ranking weight of historical similarity
    pub similarity_weight: f64,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            correlation_window_ms: 5_000,
            cascade_min_nodes: 3,
            cascade_window_ms: 5_000,
            flap_threshold: 3,
            flap_window_ms: 300_000,
            centrality_weight: 0.4,
            precedence_weight: 0.35,
            similarity_weight: 0.25,
        }
    }
}

/// Planner parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Disjoint paths requested per rerouted flow
    pub k_paths: usize,
    /// Risk above which governance approval is required
    pub risk_ceiling: f64,
    /// Risk assumed when Knowledge has no similar history
    pub prior_risk: f64,
    /// Similar incidents consulted for risk estimation
    pub similar_incidents: usize,
    /// Minimum cosine similarity for an incident to count as similar
    pub min_similarity: f64,
    /// Maximum edge relaxations per path search
    pub path_search_budget: usize,
    /// Expected duration of a reroute (milliseconds)
    pub reroute_duration_ms: u64,
    /// Expected duration of a restart or scale action (milliseconds)
    pub restart_duration_ms: u64,
    /// Expected duration of a node isolation (milliseconds)
    pub isolate_duration_ms: u64,
    /// Expected duration of a cache clear (milliseconds)
    pub clear_cache_duration_ms: u64,
    /// Expected duration of an escalation hand-off (milliseconds)
    pub escalate_duration_ms: u64,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            k_paths: 3,
            risk_ceiling: 0.5,
            prior_risk: 0.1,
            similar_incidents: 10,
            min_similarity: 0.8,
            path_search_budget: 100_000,
            reroute_duration_ms: 2_000,
            restart_duration_ms: 10_000,
            isolate_duration_ms: 3_000,
            clear_cache_duration_ms: 2_000,
            escalate_duration_ms: 500,
        }
    }
}

/// Executor parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Timeout = expected duration x safety factor
    pub safety_factor: f64,
    /// Timeout for the single rollback attempt (milliseconds)
    pub rollback_timeout_ms: u64,
    /// Bound on the pre-action health probe (milliseconds)
    pub probe_timeout_ms: u64,
    /// Consecutive failures that open a strategy's circuit breaker
    pub breaker_failure_threshold: u32,
    /// Half-open successes that close the breaker again
    pub breaker_success_threshold: u32,
    /// Time the breaker stays open before probing (seconds)
    pub breaker_open_secs: u64,
    /// Maximum actions per rate-limit window
    pub rate_limit_actions: usize,
    /// Rate-limit window (seconds)
    pub rate_limit_window_secs: u64,
    /// Repair time objective used for reporting (seconds)
    pub mttr_sla_secs: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            safety_factor: 2.0,
            rollback_timeout_ms: 5_000,
            probe_timeout_ms: 2_000,
            breaker_failure_threshold: 5,
            breaker_success_threshold: 2,
            breaker_open_secs: 60,
            rate_limit_actions: 10,
            rate_limit_window_secs: 60,
            mttr_sla_secs: 60,
        }
    }
}

/// Knowledge store parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KnowledgeConfig {
    /// Maximum retained entries
    pub capacity: usize,
    /// Optional SQLite journal file
    pub journal_path: Option<String>,
    /// Capacity of the asynchronous write queue
    pub write_queue_capacity: usize,
    /// Journal write attempts before giving up on an entry
    pub write_attempts: u32,
    /// Initial retry backoff (milliseconds), doubled per attempt
    pub write_backoff_ms: u64,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            journal_path: None,
            write_queue_capacity: 256,
            write_attempts: 3,
            write_backoff_ms: 100,
        }
    }
}

/// Governance collaborator parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernanceConfig {
    /// Time to wait for an approval before denying by default (milliseconds)
    pub approval_timeout_ms: u64,
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        Self {
            approval_timeout_ms: 24 * 60 * 60 * 1_000,
        }
    }
}

impl LoopConfig {
    /// Tick interval as a duration
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    /// Telemetry budget as a duration
    pub fn telemetry_budget(&self) -> Duration {
        Duration::from_millis(self.telemetry_budget_ms)
    }
}

impl GovernanceConfig {
    /// Approval timeout as a duration
    pub fn approval_timeout(&self) -> Duration {
        Duration::from_millis(self.approval_timeout_ms)
    }
}

impl HealingConfig {
    /// Load configuration from a TOML file
    #[cfg(feature = "toml")]
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from a TOML document and validate it
    #[cfg(feature = "toml")]
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: HealingConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make the loop misbehave
    pub fn validate(&self) -> Result<()> {
        fn unit(field: &str, value: f64) -> Result<()> {
            if !(0.0..=1.0).contains(&value) {
                return Err(invalid(field, format!("{} not in [0, 1]", value)));
            }
            Ok(())
        }

        let d = &self.detector;
        unit("detector.base_threshold", d.base_threshold)?;
        unit("detector.min_confidence", d.min_confidence)?;
        unit("detector.threshold_floor", d.threshold_floor)?;
        unit("detector.threshold_ceiling", d.threshold_ceiling)?;
        unit("detector.ema_alpha", d.ema_alpha)?;
        unit("detector.target_false_positive_rate", d.target_false_positive_rate)?;
        unit("detector.target_recall", d.target_recall)?;
        if d.threshold_floor > d.threshold_ceiling {
            return Err(invalid(
                "detector.threshold_floor",
                "floor above ceiling".to_string(),
            ));
        }
        if d.silence_ticks == 0 {
            return Err(invalid("detector.silence_ticks", "must be at least 1".to_string()));
        }

        if self.analyzer.cascade_min_nodes < 2 {
            return Err(invalid(
                "analyzer.cascade_min_nodes",
                "a cascade needs at least 2 nodes".to_string(),
            ));
        }

        let p = &self.planner;
        if p.k_paths == 0 {
            return Err(invalid("planner.k_paths", "must be at least 1".to_string()));
        }
        unit("planner.risk_ceiling", p.risk_ceiling)?;
        unit("planner.prior_risk", p.prior_risk)?;
        unit("planner.min_similarity", p.min_similarity)?;

        if self.executor.safety_factor < 1.0 {
            return Err(invalid(
                "executor.safety_factor",
                "timeout would undercut the expected duration".to_string(),
            ));
        }
        if self.knowledge.capacity == 0 {
            return Err(invalid("knowledge.capacity", "must be positive".to_string()));
        }
        if !(5..=30).contains(&self.control_loop.tick_interval_secs) {
            return Err(invalid(
                "loop.tick_interval_secs",
                format!("{} is outside 5..=30", self.control_loop.tick_interval_secs),
            ));
        }
        if self.control_loop.phase_queue_capacity == 0 {
            return Err(invalid(
                "loop.phase_queue_capacity",
                "must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn invalid(field: &str, reason: String) -> CoreError {
    CoreError::InvalidConfig {
        field: field.to_string(),
        reason,
    }
}
