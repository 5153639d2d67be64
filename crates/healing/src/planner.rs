//! Plan phase
//!
//! Maps each incident to a recovery strategy, computes replacement paths for
//! rerouted flows and scores the plan's disruption cost and historical risk.
//! Plans riskier than the configured ceiling go to governance instead of the
//! executor.

use crate::error::HealingResult;
use crate::knowledge::KnowledgeView;
use crate::root_cause::{Incident, IncidentKind};
use crate::worker_pool::WorkerPool;
use meshheal_core::{current_timestamp_ms, NodeId, PlannerConfig};
use meshheal_mesh::{FlowKey, LinkKey, Path, PathConstraints, Route, TopologyManager, TopologySnapshot};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Recovery strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Strategy {
    /// Move affected flows onto disjoint paths
    Reroute,
    /// Restart or scale the target's workload
    RestartOrScale,
    /// Cut the target off from its neighbors
    IsolateNode,
    /// Flush the target's caches
    ClearCache,
    /// Hand the incident to a human
    Escalate,
}

impl Strategy {
    /// Stable name
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Reroute => "REROUTE",
            Strategy::RestartOrScale => "RESTART_OR_SCALE",
            Strategy::IsolateNode => "ISOLATE_NODE",
            Strategy::ClearCache => "CLEAR_CACHE",
            Strategy::Escalate => "ESCALATE",
        }
    }

    /// Whether a failed application can be undone
    pub fn has_rollback(&self) -> bool {
        matches!(self, Strategy::Reroute | Strategy::IsolateNode | Strategy::RestartOrScale)
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Strategies that may remediate an incident kind, default first
pub fn allowed_strategies(kind: IncidentKind) -> &'static [Strategy] {
    match kind {
        IncidentKind::NodeFailure | IncidentKind::LinkDegradation => &[Strategy::Reroute],
        IncidentKind::ResourceExhaustion => &[Strategy::RestartOrScale, Strategy::ClearCache],
        IncidentKind::CachePressure => &[Strategy::ClearCache, Strategy::RestartOrScale],
        IncidentKind::Flapping | IncidentKind::Cascade | IncidentKind::SecurityAnomaly => {
            &[Strategy::IsolateNode]
        }
    }
}

/// New paths for one affected flow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RerouteSpec {
    /// Flow being moved
    pub flow: FlowKey,
    /// Path installed before the plan
    pub previous: Vec<NodeId>,
    /// Lowest-latency replacement
    pub primary: Path,
    /// Disjoint failover paths
    pub backups: Vec<Path>,
    /// Fewer than k disjoint paths were found
    pub degraded: bool,
    /// The path search ran out of budget
    pub budget_exhausted: bool,
}

impl RerouteSpec {
    /// Route to install for this flow
    pub fn route(&self) -> Route {
        Route {
            flow: self.flow.clone(),
            path: self.primary.nodes.clone(),
            backups: self.backups.iter().map(|p| p.nodes.clone()).collect(),
        }
    }

    /// Route that was in place before the plan
    pub fn previous_route(&self) -> Route {
        Route::new(self.flow.clone(), self.previous.clone())
    }
}

/// Concrete remediation for one incident
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryPlan {
    /// Unique plan id
    pub id: String,
    /// Incident being remediated
    pub incident_id: String,
    /// Incident classification
    pub kind: IncidentKind,
    /// Chosen strategy
    pub strategy: Strategy,
    /// Node acted upon
    pub target: Option<NodeId>,
    /// Link acted upon, for link incidents
    pub target_link: Option<LinkKey>,
    /// Notify governance in addition to acting
    pub escalate: bool,
    /// Estimated disruption scope in [0, 1]
    pub cost: f64,
    /// Historical failure risk in [0, 1]
    pub risk: f64,
    /// Snapshot version the plan was computed against
    pub snapshot_version: u64,
    /// Expected time to apply (milliseconds)
    pub expected_duration_ms: u64,
    /// Replacement paths for affected flows
    pub reroutes: Vec<RerouteSpec>,
    /// Creation time (Unix epoch milliseconds)
    pub created_at: u64,
    /// Why this plan was chosen
    pub reason: String,
}

impl RecoveryPlan {
    /// Execution timeout: expected duration times the safety factor
    pub fn timeout(&self, safety_factor: f64) -> Duration {
        Duration::from_millis((self.expected_duration_ms as f64 * safety_factor.max(1.0)).ceil() as u64)
    }
}

/// Planner verdict for an incident
#[derive(Debug, Clone, PartialEq)]
pub enum PlanDecision {
    /// Risk within the ceiling
    Execute(RecoveryPlan),
    /// Risk above the ceiling; governance must approve
    AwaitApproval(RecoveryPlan),
    /// Nothing to remediate
    NoActionNeeded {
        /// Incident considered
        incident_id: String,
        /// Why no action is needed
        reason: String,
    },
}

/// Plan phase
pub struct Planner {
    config: PlannerConfig,
    topology: Arc<TopologyManager>,
    pool: WorkerPool,
}

impl Planner {
    /// Create a planner
    pub fn new(config: PlannerConfig, topology: Arc<TopologyManager>, pool: WorkerPool) -> Self {
        Self { config, topology, pool }
    }

    /// Produce a plan decision for an incident
    pub async fn plan(&self, incident: &Incident, knowledge: &KnowledgeView) -> HealingResult<PlanDecision> {
        let allowed = allowed_strategies(incident.kind);
        let mut strategy = knowledge
            .recommended_strategy(incident.kind, allowed)
            .unwrap_or(allowed[0]);
        let mut reason = format!("{} default for {}", strategy, incident.kind);
        if strategy != allowed[0] {
            reason = format!("{} has the best MTTR for {}", strategy, incident.kind);
        }

        let snapshot = self.topology.snapshot();
        let target = incident.target_node().cloned();
        let target_link = incident.target_link().cloned();

        if target.is_none() && target_link.is_none() {
            return Ok(no_action(incident, "incident has no actionable target"));
        }
        if let Some(node_id) = &target {
            if snapshot.node(node_id).is_none() {
                return Ok(no_action(incident, "target node left the topology"));
            }
        }

        let mut reroutes = Vec::new();
        match strategy {
            Strategy::Reroute => {
                let affected = affected_flows(&snapshot, target.as_deref(), target_link.as_ref());
                if affected.is_empty() {
                    return Ok(no_action(incident, "no active route traverses the failure"));
                }
                let (found, stranded) = self
                    .reroute(&affected, target.as_deref(), target_link.as_ref())
                    .await?;
                if !stranded.is_empty() {
                    warn!(
                        incident_id = %incident.id,
                        stranded = ?stranded,
                        "No disjoint path for affected flows; escalating"
                    );
                    strategy = Strategy::Escalate;
                    reason = format!("no alternative path for {} flow(s)", stranded.len());
                } else {
                    reroutes = found;
                }
            }
            Strategy::IsolateNode => {
                // Best effort: flows through the isolated node move if they can
                let affected = affected_flows(&snapshot, target.as_deref(), None);
                reroutes = self.reroute(&affected, target.as_deref(), None).await?.0;
            }
            Strategy::RestartOrScale | Strategy::ClearCache | Strategy::Escalate => {}
        }

        let cost = disruption_cost(&snapshot, target.as_deref(), target_link.as_ref());
        let risk = knowledge.strategy_risk(
            strategy,
            &incident.embedding,
            self.config.similar_incidents,
            self.config.min_similarity,
            self.config.prior_risk,
        );

        let plan = RecoveryPlan {
            id: Uuid::new_v4().to_string(),
            incident_id: incident.id.clone(),
            kind: incident.kind,
            strategy,
            target,
            target_link,
            escalate: incident.kind == IncidentKind::SecurityAnomaly || strategy == Strategy::Escalate,
            cost,
            risk,
            snapshot_version: snapshot.version,
            expected_duration_ms: self.expected_duration_ms(strategy),
            reroutes,
            created_at: current_timestamp_ms(),
            reason,
        };

        if risk > self.config.risk_ceiling {
            info!(
                plan_id = %plan.id,
                strategy = %plan.strategy,
                risk,
                ceiling = self.config.risk_ceiling,
                "Plan risk above ceiling; approval required"
            );
            return Ok(PlanDecision::AwaitApproval(plan));
        }

        debug!(plan_id = %plan.id, strategy = %plan.strategy, risk, cost, "Plan ready");
        Ok(PlanDecision::Execute(plan))
    }

    /// Search replacement paths; returns the specs found and the flows with no path
    async fn reroute(
        &self,
        flows: &[Route],
        avoid_node: Option<&str>,
        avoid_link: Option<&LinkKey>,
    ) -> HealingResult<(Vec<RerouteSpec>, Vec<FlowKey>)> {
        let mut constraints = PathConstraints::default();
        if let Some(node_id) = avoid_node {
            constraints.avoid_nodes.insert(node_id.to_string());
        }
        if let Some(key) = avoid_link {
            constraints.avoid_links.insert(key.clone());
        }

        let mut found = Vec::new();
        let mut stranded = Vec::new();
        for route in flows {
            let topology = self.topology.clone();
            let flow = route.flow.clone();
            let k = self.config.k_paths;
            let request = constraints.clone();
            let result = self
                .pool
                .run(move || topology.compute_k_disjoint_paths(&flow.source, &flow.destination, k, &request))
                .await??;

            if result.degraded {
                debug!(
                    flow = %route.flow,
                    found = result.paths.len(),
                    requested = result.requested,
                    budget_exhausted = result.budget_exhausted,
                    "Insufficient disjoint paths; continuing with what was found"
                );
            }
            match result.primary().cloned() {
                Some(primary) => found.push(RerouteSpec {
                    flow: route.flow.clone(),
                    previous: route.path.clone(),
                    backups: result.backups().to_vec(),
                    primary,
                    degraded: result.degraded,
                    budget_exhausted: result.budget_exhausted,
                }),
                None => stranded.push(route.flow.clone()),
            }
        }
        Ok((found, stranded))
    }

    fn expected_duration_ms(&self, strategy: Strategy) -> u64 {
        match strategy {
            Strategy::Reroute => self.config.reroute_duration_ms,
            Strategy::RestartOrScale => self.config.restart_duration_ms,
            Strategy::IsolateNode => self.config.isolate_duration_ms,
            Strategy::ClearCache => self.config.clear_cache_duration_ms,
            Strategy::Escalate => self.config.escalate_duration_ms,
        }
    }
}

fn no_action(incident: &Incident, reason: &str) -> PlanDecision {
    debug!(incident_id = %incident.id, reason, "No action needed");
    PlanDecision::NoActionNeeded {
        incident_id: incident.id.clone(),
        reason: reason.to_string(),
    }
}

/// Installed routes crossing the failure; flows ending at a failed node are unrecoverable by rerouting
fn affected_flows(snapshot: &TopologySnapshot, node: Option<&str>, link: Option<&LinkKey>) -> Vec<Route> {
    let routes = match (link, node) {
        (Some(key), _) => snapshot.routes_through_link(key),
        (None, Some(node_id)) => snapshot
            .routes_through_node(node_id)
            .into_iter()
            .filter(|r| r.flow.source != node_id && r.flow.destination != node_id)
            .collect(),
        (None, None) => Vec::new(),
    };
    routes.into_iter().cloned().collect()
}

/// Half the share of affected flows plus half the share of touched nodes
fn disruption_cost(snapshot: &TopologySnapshot, node: Option<&str>, link: Option<&LinkKey>) -> f64 {
    let (flows, touched) = match (link, node) {
        (Some(key), _) => {
            let touched: BTreeSet<&NodeId> = [&key.a, &key.b].into_iter().collect();
            (snapshot.routes_through_link(key).len(), touched.len())
        }
        (None, Some(node_id)) => (
            snapshot.routes_through_node(node_id).len(),
            snapshot.neighbors(node_id).len() + 1,
        ),
        (None, None) => (0, 0),
    };

    let flow_share = if snapshot.routes.is_empty() {
        0.0
    } else {
        flows as f64 / snapshot.routes.len() as f64
    };
    let node_share = if snapshot.nodes.is_empty() {
        0.0
    } else {
        touched as f64 / snapshot.nodes.len() as f64
    };
    (0.5 * flow_share + 0.5 * node_share).clamp(0.0, 1.0)
}
