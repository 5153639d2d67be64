//! Execute phase
//!
//! Applies a recovery plan through the secure channel under a per-node FIFO
//! lock, verifies it with a health probe and rolls it back once on failure.
//! A failed rollback quarantines the node and escalates; nothing is retried
//! indefinitely.
//!
//! A plan locks every node it touches (target, link endpoints, old and new
//! paths) in sorted order. Apply and verify share one deadline, and
//! cancellation on shutdown takes the same failure path as a timeout.
//!
//! State machine: `Pending -> Applying -> {Succeeded, Failed}` and
//! `Failed -> RolledBack`. Refusals before `Applying` (rate limit, open
//! breaker, stale plan, rejected identity) go straight to `Failed`.

use crate::channel::{Command, CommandReply, HealthProbe, ProbeTarget, SecureChannel};
use crate::error::{HealingError, HealingResult};
use crate::governance::{ApprovalGate, Escalation};
use crate::metrics::HealingMetrics;
use crate::planner::{RecoveryPlan, Strategy};
use crate::resilience::{RateLimiter, StrategyBreakers};
use crate::root_cause::IncidentKind;
use meshheal_core::{current_timestamp_ms, ExecutorConfig, NodeId};
use meshheal_mesh::{NodeState, TopologyEvent, TopologyManager, TopologySnapshot};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{watch, OwnedMutexGuard};
use tracing::{debug, error, info, warn};

/// Execution lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecutionState {
    /// Accepted, not started
    Pending,
    /// Commands in flight
    Applying,
    /// Applied and verified
    Succeeded,
    /// Refused, failed or timed out
    Failed,
    /// Failed and undone
    RolledBack,
}

impl ExecutionState {
    /// Whether `self -> to` is a legal transition
    pub fn can_transition(self, to: ExecutionState) -> bool {
        matches!(
            (self, to),
            (ExecutionState::Pending, ExecutionState::Applying)
                | (ExecutionState::Pending, ExecutionState::Failed)
                | (ExecutionState::Applying, ExecutionState::Succeeded)
                | (ExecutionState::Applying, ExecutionState::Failed)
                | (ExecutionState::Failed, ExecutionState::RolledBack)
        )
    }

    /// Whether no further transition is expected
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutionState::Succeeded | ExecutionState::Failed | ExecutionState::RolledBack
        )
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Outcome of one plan execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// Plan executed
    pub plan_id: String,
    /// Incident remediated
    pub incident_id: String,
    /// Node acted upon
    pub target: Option<NodeId>,
    /// Strategy applied
    pub strategy: Strategy,
    /// Current state
    pub state: ExecutionState,
    /// States visited, in order
    pub history: Vec<ExecutionState>,
    /// Start time (Unix epoch milliseconds)
    pub started_at: u64,
    /// Terminal time (Unix epoch milliseconds)
    pub finished_at: Option<u64>,
    /// Detection to verified repair (successes only)
    pub mttr_ms: Option<u64>,
    /// A rollback completed
    pub rolled_back: bool,
    /// The node was quarantined after a failed rollback
    pub quarantined: bool,
    /// Governance was notified
    pub escalated: bool,
    /// Failure description
    pub failure: Option<String>,
    /// Target health before acting (None when not probed)
    pub pre_healthy: Option<bool>,
}

impl ExecutionRecord {
    /// Pending record for a plan
    pub fn new(plan: &RecoveryPlan) -> Self {
        Self {
            plan_id: plan.id.clone(),
            incident_id: plan.incident_id.clone(),
            target: plan.target.clone(),
            strategy: plan.strategy,
            state: ExecutionState::Pending,
            history: vec![ExecutionState::Pending],
            started_at: current_timestamp_ms(),
            finished_at: None,
            mttr_ms: None,
            rolled_back: false,
            quarantined: false,
            escalated: false,
            failure: None,
            pre_healthy: None,
        }
    }

    /// Move to `to`, rejecting illegal transitions
    pub fn transition(&mut self, to: ExecutionState) -> HealingResult<()> {
        if !self.state.can_transition(to) {
            return Err(HealingError::InvalidTransition {
                from: self.state.to_string(),
                to: to.to_string(),
            });
        }
        self.state = to;
        self.history.push(to);
        if to.is_terminal() {
            self.finished_at = Some(current_timestamp_ms());
        }
        Ok(())
    }

    /// Whether the plan was applied and verified
    pub fn succeeded(&self) -> bool {
        self.state == ExecutionState::Succeeded
    }
}

/// Per-node FIFO locks plus the set of nodes currently applying
#[derive(Debug, Clone, Default)]
pub struct NodeLockTable {
    locks: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
    applying: Arc<Mutex<HashSet<String>>>,
}

/// Held per-node locks, released together
#[derive(Debug)]
pub struct NodeGuard {
    _locks: Vec<OwnedMutexGuard<()>>,
    keys: Vec<String>,
    applying: Arc<Mutex<HashSet<String>>>,
    marked: bool,
}

impl NodeGuard {
    fn mark_applying(&mut self) {
        self.applying
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend(self.keys.iter().cloned());
        self.marked = true;
    }
}

impl Drop for NodeGuard {
    fn drop(&mut self) {
        if self.marked {
            let mut applying = self.applying.lock().unwrap_or_else(|e| e.into_inner());
            for key in &self.keys {
                applying.remove(key);
            }
        }
    }
}

impl NodeLockTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for the lock on `key`; waiters are served in arrival order
    pub async fn acquire(&self, key: &str) -> NodeGuard {
        self.acquire_all(&[key.to_string()]).await
    }

    /// Wait for the locks on every key, taken in sorted order so that
    /// overlapping plans cannot deadlock
    pub async fn acquire_all(&self, keys: &[String]) -> NodeGuard {
        let keys: Vec<String> = keys.iter().cloned().collect::<BTreeSet<_>>().into_iter().collect();
        let locks: Vec<_> = {
            let mut table = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            keys.iter()
                .map(|key| table.entry(key.clone()).or_default().clone())
                .collect()
        };

        let mut held = Vec::with_capacity(locks.len());
        for lock in locks {
            held.push(lock.lock_owned().await);
        }
        NodeGuard {
            _locks: held,
            keys,
            applying: self.applying.clone(),
            marked: false,
        }
    }

    /// Whether an execution is applying on `key`
    pub fn is_applying(&self, key: &str) -> bool {
        self.applying
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(key)
    }

    /// Keys currently applying
    pub fn applying(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .applying
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect();
        keys.sort();
        keys
    }
}

/// External collaborators the executor acts through
#[derive(Clone)]
pub struct ExecutorDeps {
    /// Command delivery
    pub channel: Arc<dyn SecureChannel>,
    /// Post-action verification
    pub probe: Arc<dyn HealthProbe>,
    /// Escalation path
    pub gate: ApprovalGate,
}

/// Execute phase
pub struct Executor {
    config: ExecutorConfig,
    topology: Arc<TopologyManager>,
    deps: ExecutorDeps,
    locks: NodeLockTable,
    breakers: Mutex<StrategyBreakers>,
    limiter: Mutex<RateLimiter>,
    metrics: HealingMetrics,
    cancel: watch::Sender<bool>,
}

impl Executor {
    /// Create an executor
    pub fn new(
        config: ExecutorConfig,
        topology: Arc<TopologyManager>,
        deps: ExecutorDeps,
        metrics: HealingMetrics,
    ) -> Self {
        Self {
            breakers: Mutex::new(StrategyBreakers::from_config(&config)),
            limiter: Mutex::new(RateLimiter::from_config(&config)),
            config,
            topology,
            deps,
            locks: NodeLockTable::new(),
            metrics,
            cancel: watch::channel(false).0,
        }
    }

    /// Lock table, for inspection
    pub fn locks(&self) -> &NodeLockTable {
        &self.locks
    }

    /// Abort queued and in-flight executions; in-flight ones still roll back
    pub fn cancel(&self) {
        if !self.cancel.send_replace(true) {
            info!("Executor cancelled");
        }
    }

    /// Whether [`Executor::cancel`] has been called
    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Resolves once the executor is cancelled
    pub fn cancelled(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut rx = self.cancel.subscribe();
        async move {
            if rx.wait_for(|cancelled| *cancelled).await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }

    /// Run a plan to a terminal state; `detected_at` anchors the MTTR
    pub async fn execute(&self, plan: &RecoveryPlan, detected_at: u64) -> ExecutionRecord {
        let mut record = ExecutionRecord::new(plan);
        let cancel_error = || HealingError::Cancelled {
            plan_id: plan.id.clone(),
        };

        if self.is_cancelled() {
            return self.refuse(record, cancel_error());
        }
        if !self.limiter.lock().unwrap_or_else(|e| e.into_inner()).try_acquire() {
            return self.refuse(record, HealingError::RateLimited);
        }
        if !self
            .breakers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .allow(plan.strategy)
        {
            return self.refuse(
                record,
                HealingError::CircuitOpen {
                    strategy: plan.strategy.to_string(),
                },
            );
        }

        if plan.strategy == Strategy::Escalate {
            return self.hand_off(record, plan).await;
        }

        let keys = lock_keys(plan);
        let mut guard = tokio::select! {
            guard = self.locks.acquire_all(&keys) => guard,
            _ = self.cancelled() => return self.refuse(record, cancel_error()),
        };
        let snapshot = self.topology.snapshot();

        if let Err(e) = revalidate(plan, &snapshot) {
            return self.refuse(record, e);
        }
        let recipients = match recipients(plan, &snapshot) {
            Ok(r) => r,
            Err(e) => return self.refuse(record, e),
        };

        if plan.kind != IncidentKind::NodeFailure {
            if let Some(target) = &plan.target {
                let bound = Duration::from_millis(self.config.probe_timeout_ms);
                let probe_target = ProbeTarget::NodeHealth(target.clone());
                let health = self.deps.probe.probe(&probe_target);
                match tokio::time::timeout(bound, health).await {
                    Ok(healthy) => record.pre_healthy = Some(healthy),
                    Err(_) => warn!(
                        plan_id = %plan.id,
                        node_id = %target,
                        timeout_ms = self.config.probe_timeout_ms,
                        "Pre-action health probe timed out"
                    ),
                }
            }
        }

        if self.is_cancelled() {
            return self.refuse(record, cancel_error());
        }
        if let Err(e) = record.transition(ExecutionState::Applying) {
            return self.refuse(record, e);
        }
        guard.mark_applying();
        info!(
            plan_id = %plan.id,
            strategy = %plan.strategy,
            target = ?plan.target,
            recipients = recipients.len(),
            "Applying plan"
        );

        // Verification counts against the same deadline as the commands
        let timeout = plan.timeout(self.config.safety_factor);
        let attempt = async {
            self.apply(plan, &recipients).await?;
            self.verify(plan).await
        };
        let applied = tokio::select! {
            result = tokio::time::timeout(timeout, attempt) => match result {
                Ok(result) => result,
                Err(_) => Err(HealingError::ExecutionTimeout {
                    plan_id: plan.id.clone(),
                    timeout_ms: timeout.as_millis() as u64,
                }),
            },
            _ = self.cancelled() => Err(cancel_error()),
        };

        match applied.and_then(|()| self.commit(plan)) {
            Ok(()) => {
                advance(&mut record, ExecutionState::Succeeded);
                let mttr = current_timestamp_ms().saturating_sub(detected_at);
                record.mttr_ms = Some(mttr);
                self.metrics.observe_mttr(mttr);
                info!(plan_id = %plan.id, strategy = %plan.strategy, mttr_ms = mttr, "Plan succeeded");
            }
            Err(e) => {
                warn!(plan_id = %plan.id, strategy = %plan.strategy, error = %e, "Plan failed");
                record.failure = Some(e.to_string());
                advance(&mut record, ExecutionState::Failed);
                self.recover(&mut record, plan, &recipients).await;
            }
        }

        drop(guard);

        if plan.escalate && !record.escalated {
            self.deps
                .gate
                .escalate(Escalation::new(
                    plan.incident_id.clone(),
                    Some(plan.id.clone()),
                    plan.target.clone(),
                    plan.reason.clone(),
                ))
                .await;
            record.escalated = true;
        }

        self.finish(record)
    }

    /// Send the plan's commands
    async fn apply(&self, plan: &RecoveryPlan, recipients: &[NodeId]) -> HealingResult<()> {
        for spec in &plan.reroutes {
            let route = spec.route();
            self.send(
                &spec.flow.source,
                Command::InstallRoute {
                    flow: route.flow,
                    path: route.path,
                    backups: route.backups,
                },
            )
            .await?;
        }

        let command = match plan.strategy {
            Strategy::RestartOrScale => Some(Command::Restart),
            Strategy::ClearCache => Some(Command::ClearCache),
            Strategy::IsolateNode => plan.target.clone().map(|node| Command::Isolate { node }),
            Strategy::Reroute | Strategy::Escalate => None,
        };
        if let Some(command) = command {
            for node_id in recipients {
                self.send(node_id, command.clone()).await?;
            }
        }
        Ok(())
    }

    /// Post-action health probe
    async fn verify(&self, plan: &RecoveryPlan) -> HealingResult<()> {
        let mut targets: Vec<ProbeTarget> = plan
            .reroutes
            .iter()
            .map(|spec| ProbeTarget::Path(spec.primary.nodes.clone()))
            .collect();
        if let Some(target) = &plan.target {
            match plan.strategy {
                Strategy::RestartOrScale | Strategy::ClearCache => targets.push(ProbeTarget::Node(target.clone())),
                Strategy::IsolateNode => targets.push(ProbeTarget::Isolated(target.clone())),
                Strategy::Reroute | Strategy::Escalate => {}
            }
        }

        for target in &targets {
            if !self.deps.probe.probe(target).await {
                return Err(HealingError::TopologyInconsistency(format!(
                    "post-action probe failed for {:?}",
                    target
                )));
            }
        }
        Ok(())
    }

    /// Reflect a verified plan in the topology
    fn commit(&self, plan: &RecoveryPlan) -> HealingResult<()> {
        let mut events: Vec<TopologyEvent> = plan
            .reroutes
            .iter()
            .map(|spec| TopologyEvent::RouteInstalled { route: spec.route() })
            .collect();

        if let Some(target) = &plan.target {
            let state = match (plan.strategy, plan.kind) {
                (Strategy::IsolateNode, _) => Some(NodeState::Quarantined),
                (Strategy::Reroute, IncidentKind::NodeFailure) => Some(NodeState::Unreachable),
                _ => None,
            };
            if let Some(state) = state {
                events.push(TopologyEvent::NodeStateChanged {
                    id: target.clone(),
                    state,
                });
            }
        }

        if !events.is_empty() {
            self.topology.apply_batch(events)?;
            self.refresh_quarantine_gauge();
        }
        Ok(())
    }

    /// Roll back once; quarantine and escalate if that fails too
    async fn recover(&self, record: &mut ExecutionRecord, plan: &RecoveryPlan, recipients: &[NodeId]) {
        if !plan.strategy.has_rollback() {
            debug!(plan_id = %plan.id, strategy = %plan.strategy, "No rollback defined");
            return;
        }

        let timeout = Duration::from_millis(self.config.rollback_timeout_ms);
        let rolled_back = match tokio::time::timeout(timeout, self.rollback(plan, recipients)).await {
            Ok(result) => result,
            Err(_) => Err(HealingError::RollbackFailure {
                node_id: plan.target.clone().unwrap_or_default(),
                reason: format!("timed out after {}ms", timeout.as_millis()),
            }),
        };

        match rolled_back {
            Ok(()) => {
                advance(record, ExecutionState::RolledBack);
                record.rolled_back = true;
                self.metrics.rollback_count.inc();
                info!(plan_id = %plan.id, "Plan rolled back");
            }
            Err(e) => {
                error!(plan_id = %plan.id, error = %e, "Rollback failed; quarantining");
                record.failure = Some(format!(
                    "{}; {}",
                    record.failure.clone().unwrap_or_default(),
                    e
                ));
                if let Some(target) = &plan.target {
                    match self.topology.update(TopologyEvent::NodeStateChanged {
                        id: target.clone(),
                        state: NodeState::Quarantined,
                    }) {
                        Ok(_) => {
                            record.quarantined = true;
                            self.refresh_quarantine_gauge();
                        }
                        Err(qe) => warn!(node_id = %target, error = %qe, "Quarantine not applied"),
                    }
                }
                self.deps
                    .gate
                    .escalate(Escalation::new(
                        plan.incident_id.clone(),
                        Some(plan.id.clone()),
                        plan.target.clone(),
                        e.to_string(),
                    ))
                    .await;
                record.escalated = true;
            }
        }
    }

    async fn rollback(&self, plan: &RecoveryPlan, recipients: &[NodeId]) -> HealingResult<()> {
        let wrap = |node_id: &str, e: HealingError| HealingError::RollbackFailure {
            node_id: node_id.to_string(),
            reason: e.to_string(),
        };

        for spec in &plan.reroutes {
            let previous = spec.previous_route();
            self.send(
                &spec.flow.source,
                Command::InstallRoute {
                    flow: previous.flow,
                    path: previous.path,
                    backups: Vec::new(),
                },
            )
            .await
            .map_err(|e| wrap(&spec.flow.source, e))?;
        }

        let command = match plan.strategy {
            Strategy::RestartOrScale => Some(Command::RevertRestart),
            Strategy::IsolateNode => plan.target.clone().map(|node| Command::Rejoin { node }),
            _ => None,
        };
        if let Some(command) = command {
            for node_id in recipients {
                self.send(node_id, command.clone())
                    .await
                    .map_err(|e| wrap(node_id, e))?;
            }
        }
        Ok(())
    }

    async fn send(&self, node_id: &str, command: Command) -> HealingResult<()> {
        let name = command.name();
        match self.deps.channel.send(node_id, command).await? {
            CommandReply::Ack => {
                debug!(node_id, command = name, "Command acknowledged");
                Ok(())
            }
            CommandReply::Nack { reason } => Err(HealingError::CommandRejected {
                node_id: node_id.to_string(),
                reason,
            }),
        }
    }

    /// Escalate-only plans: hand off and finish
    async fn hand_off(&self, mut record: ExecutionRecord, plan: &RecoveryPlan) -> ExecutionRecord {
        advance(&mut record, ExecutionState::Applying);
        self.deps
            .gate
            .escalate(Escalation::new(
                plan.incident_id.clone(),
                Some(plan.id.clone()),
                plan.target.clone(),
                plan.reason.clone(),
            ))
            .await;
        record.escalated = true;
        advance(&mut record, ExecutionState::Succeeded);
        self.finish(record)
    }

    fn refuse(&self, mut record: ExecutionRecord, reason: HealingError) -> ExecutionRecord {
        warn!(plan_id = %record.plan_id, strategy = %record.strategy, error = %reason, "Plan refused");
        record.failure = Some(reason.to_string());
        advance(&mut record, ExecutionState::Failed);
        self.finish(record)
    }

    fn finish(&self, record: ExecutionRecord) -> ExecutionRecord {
        // Refusals and hand-offs say nothing about the strategy itself
        if record.history.contains(&ExecutionState::Applying) && record.strategy != Strategy::Escalate {
            self.breakers
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .record(record.strategy, record.succeeded());
        }
        self.metrics
            .plans_executed
            .with_label_values(&[record.strategy.as_str(), &record.state.to_string()])
            .inc();
        record
    }

    fn refresh_quarantine_gauge(&self) {
        let quarantined = self.topology.snapshot().nodes_in_state(NodeState::Quarantined).len();
        self.metrics.quarantined_nodes.set(quarantined as i64);
    }
}

/// Apply a transition the executor itself drives; a refusal is logged, not fatal
fn advance(record: &mut ExecutionRecord, to: ExecutionState) {
    if let Err(e) = record.transition(to) {
        warn!(plan_id = %record.plan_id, error = %e, "Execution state not advanced");
    }
}

/// Every node the plan touches, sorted; the plan id when it touches none
fn lock_keys(plan: &RecoveryPlan) -> Vec<String> {
    let mut keys: BTreeSet<String> = plan.target.iter().cloned().collect();
    if let Some(link) = &plan.target_link {
        keys.insert(link.a.clone());
        keys.insert(link.b.clone());
    }
    for spec in &plan.reroutes {
        keys.extend(spec.previous.iter().cloned());
        keys.extend(spec.primary.nodes.iter().cloned());
    }
    if keys.is_empty() {
        keys.insert(plan.id.clone());
    }
    keys.into_iter().collect()
}

/// Reject plans whose nodes, links or paths are gone or changed
fn revalidate(plan: &RecoveryPlan, snapshot: &TopologySnapshot) -> HealingResult<()> {
    let stale = |what: String| Err(HealingError::TopologyInconsistency(what));

    if let Some(target) = &plan.target {
        if snapshot.node(target).is_none() {
            return stale(format!("node {} no longer exists", target));
        }
    }
    if let Some(key) = &plan.target_link {
        if snapshot.link(&key.a, &key.b).is_none() {
            return stale(format!("link {} no longer exists", key));
        }
    }
    for spec in &plan.reroutes {
        let primary = &spec.primary.nodes;
        let relays_ok = primary
            .iter()
            .skip(1)
            .take(primary.len().saturating_sub(2))
            .all(|id| snapshot.node(id).map(|n| n.can_forward()).unwrap_or(false));
        if !snapshot.contains_path(primary) || !relays_ok {
            return stale(format!("path for {} is no longer usable", spec.flow));
        }
        let current = snapshot.routes.get(&spec.flow).map(|r| r.path.as_slice());
        if current != Some(spec.previous.as_slice()) {
            return stale(format!("route for {} changed since planning", spec.flow));
        }
    }
    Ok(())
}

/// Nodes receiving the strategy command, after identity checks
fn recipients(plan: &RecoveryPlan, snapshot: &TopologySnapshot) -> HealingResult<Vec<NodeId>> {
    for spec in &plan.reroutes {
        let trusted = snapshot
            .node(&spec.flow.source)
            .map(|n| n.is_trusted())
            .unwrap_or(false);
        if !trusted {
            return Err(HealingError::IdentityRejected {
                node_id: spec.flow.source.clone(),
            });
        }
    }

    let Some(target) = &plan.target else {
        return Ok(Vec::new());
    };
    match plan.strategy {
        Strategy::IsolateNode => {
            // Invalid targets can still be isolated through their trusted neighbors
            let neighbors: Vec<NodeId> = snapshot
                .neighbors(target)
                .into_iter()
                .filter(|id| snapshot.node(id).map(|n| n.is_trusted()).unwrap_or(false))
                .cloned()
                .collect();
            if neighbors.is_empty() && !snapshot.neighbors(target).is_empty() {
                return Err(HealingError::IdentityRejected {
                    node_id: target.clone(),
                });
            }
            Ok(neighbors)
        }
        Strategy::RestartOrScale | Strategy::ClearCache => {
            let trusted = snapshot.node(target).map(|n| n.is_trusted()).unwrap_or(false);
            if !trusted {
                return Err(HealingError::IdentityRejected {
                    node_id: target.clone(),
                });
            }
            Ok(vec![target.clone()])
        }
        Strategy::Reroute | Strategy::Escalate => Ok(Vec::new()),
    }
}
