//! MAPE-K control loop
//!
//! One [`ControlLoop`] drives one mesh partition. Each tick runs Monitor,
//! Analyze and Plan inline and hands every plan to its own task, so a slow
//! execution or a pending approval never blocks the next tick. Completed
//! executions come back over a channel and are turned into knowledge at the
//! start of the following tick. The completion channel is unbounded: it holds
//! at most one message per dispatched task, and tasks must never block on it
//! while [`ControlLoop::wait_idle`] is joining them.
//!
//! Ticks fire on a fixed interval or early through [`ControlHandle::preempt`].
//! On shutdown, pending approvals resolve as denied and in-flight executions
//! are cancelled into their rollback path before the loop drains.

use crate::anomaly::{AnomalyDetector, AnomalyEvent, AnomalyScorer, Signal, StatisticalScorer, Subject};
use crate::channel::{HealthProbe, SecureChannel};
use crate::error::{HealingError, HealingResult};
use crate::executor::{ExecutionRecord, ExecutionState, Executor, ExecutorDeps};
use crate::governance::{ApprovalGate, ApprovalOutcome, ApprovalRequest, Governance};
use crate::journal::{JournalHandle, KnowledgeJournal};
use crate::knowledge::{KnowledgeRecord, KnowledgeStore, KnowledgeView, Outcome, Verdict};
use crate::metrics::HealingMetrics;
use crate::pipeline::{EventQueue, PushOutcome};
use crate::planner::{PlanDecision, Planner, RecoveryPlan, Strategy};
use crate::root_cause::{Incident, IncidentKind, RootCauseAnalyzer};
use crate::telemetry::TelemetrySource;
use crate::worker_pool::WorkerPool;
use meshheal_core::{HealingConfig, NodeId, TelemetryFrame};
use meshheal_mesh::{NodeState, TopologyEvent, TopologyManager};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

/// Incident records kept for inspection
const INCIDENT_HISTORY: usize = 4_096;

/// External collaborators of the loop
#[derive(Clone)]
pub struct Collaborators {
    /// Per-tick telemetry
    pub telemetry: Arc<dyn TelemetrySource>,
    /// Command delivery
    pub channel: Arc<dyn SecureChannel>,
    /// Post-action verification
    pub probe: Arc<dyn HealthProbe>,
    /// Approvals and escalations
    pub governance: Arc<dyn Governance>,
}

/// Lifecycle of an incident inside the loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IncidentStatus {
    /// Detected, not yet planned
    Open,
    /// Plan handed to the executor
    Executing,
    /// Waiting on governance
    AwaitingApproval,
    /// Plan succeeded
    Resolved,
    /// Plan failed or was refused
    Failed,
    /// Handed to humans
    Escalated,
    /// Governance said no
    Denied,
    /// Governance did not answer in time
    DeniedByDefault,
    /// Nothing to remediate
    NoAction,
}

impl IncidentStatus {
    /// Whether the incident is settled
    pub fn is_terminal(self) -> bool {
        !matches!(
            self,
            IncidentStatus::Open | IncidentStatus::Executing | IncidentStatus::AwaitingApproval
        )
    }
}

/// Incident plus what the loop did about it
#[derive(Debug, Clone)]
pub struct IncidentRecord {
    /// The incident
    pub incident: Incident,
    /// Current status
    pub status: IncidentStatus,
    /// Plan chosen, if any
    pub plan: Option<RecoveryPlan>,
    /// Execution result, once finished
    pub execution: Option<ExecutionRecord>,
    /// Planner or governance note
    pub note: Option<String>,
}

/// Bounded incident history; settled records are evicted first
#[derive(Debug)]
pub struct IncidentRegistry {
    records: HashMap<String, IncidentRecord>,
    order: VecDeque<String>,
    capacity: usize,
}

impl IncidentRegistry {
    /// Create a registry holding at most `capacity` records
    pub fn new(capacity: usize) -> Self {
        Self {
            records: HashMap::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    fn open(&mut self, incident: Incident) {
        if self.records.len() >= self.capacity {
            let victim = self
                .order
                .iter()
                .position(|id| self.records.get(id).map(|r| r.status.is_terminal()).unwrap_or(true))
                .unwrap_or(0);
            if let Some(id) = self.order.remove(victim) {
                self.records.remove(&id);
            }
        }
        self.order.push_back(incident.id.clone());
        self.records.insert(
            incident.id.clone(),
            IncidentRecord {
                incident,
                status: IncidentStatus::Open,
                plan: None,
                execution: None,
                note: None,
            },
        );
    }

    fn update<F: FnOnce(&mut IncidentRecord)>(&mut self, id: &str, edit: F) {
        if let Some(record) = self.records.get_mut(id) {
            edit(record);
        }
    }

    /// Record by incident id
    pub fn get(&self, id: &str) -> Option<&IncidentRecord> {
        self.records.get(id)
    }

    /// Status by incident id
    pub fn status(&self, id: &str) -> Option<IncidentStatus> {
        self.records.get(id).map(|r| r.status)
    }

    /// Records in detection order
    pub fn records(&self) -> Vec<&IncidentRecord> {
        self.order.iter().filter_map(|id| self.records.get(id)).collect()
    }

    /// Records with the given status
    pub fn with_status(&self, status: IncidentStatus) -> Vec<&IncidentRecord> {
        self.records().into_iter().filter(|r| r.status == status).collect()
    }

    /// Records held
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no records are held
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Summary of one tick
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    /// Tick counter
    pub tick: u64,
    /// Snapshot version analyzed
    pub snapshot_version: u64,
    /// Telemetry arrived within the budget
    pub telemetry_ok: bool,
    /// The tick was triggered by preemption
    pub preempted: bool,
    /// Events that reached Analyze
    pub events: usize,
    /// Events dropped by queue backpressure
    pub dropped_events: usize,
    /// Nodes with partial telemetry
    pub gaps: Vec<NodeId>,
    /// Nodes whose prediction missed the budget
    pub discarded: Vec<NodeId>,
    /// Incidents produced
    pub incidents: Vec<Incident>,
    /// Incidents skipped because their target already has a plan in flight
    pub suppressed: usize,
    /// Plans handed to the executor
    pub dispatched: usize,
    /// Plans sent for approval
    pub awaiting_approval: usize,
    /// Incidents needing no action
    pub no_action: usize,
    /// Executions that finished since the previous tick
    pub completed: Vec<ExecutionRecord>,
}

/// Cloneable handle for preempting a running loop
#[derive(Debug, Clone)]
pub struct ControlHandle {
    preempt: mpsc::Sender<Vec<AnomalyEvent>>,
}

impl ControlHandle {
    /// Trigger an immediate tick with externally detected events
    pub fn preempt(&self, events: Vec<AnomalyEvent>) -> HealingResult<()> {
        self.preempt.try_send(events).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => HealingError::QueueFull("preempt channel".to_string()),
            mpsc::error::TrySendError::Closed(_) => HealingError::QueueFull("control loop stopped".to_string()),
        })
    }
}

enum Completion {
    Executed {
        context: DispatchContext,
        record: ExecutionRecord,
    },
    NotApproved {
        context: DispatchContext,
        outcome: ApprovalOutcome,
    },
}

/// What a dispatched task needs to report back
struct DispatchContext {
    incident: Incident,
    lock_key: String,
    scorer_flagged: bool,
}

/// The MAPE-K loop for one partition
pub struct ControlLoop {
    config: HealingConfig,
    topology: Arc<TopologyManager>,
    telemetry: Arc<dyn TelemetrySource>,
    detector: AnomalyDetector,
    queue: EventQueue,
    analyzer: RootCauseAnalyzer,
    planner: Arc<Planner>,
    executor: Arc<Executor>,
    gate: ApprovalGate,
    knowledge: KnowledgeStore,
    registry: IncidentRegistry,
    metrics: HealingMetrics,
    pool: WorkerPool,
    in_flight: HashSet<String>,
    tasks: Vec<JoinHandle<()>>,
    completion_tx: mpsc::UnboundedSender<Completion>,
    completion_rx: mpsc::UnboundedReceiver<Completion>,
    preempt_tx: mpsc::Sender<Vec<AnomalyEvent>>,
    preempt_rx: Option<mpsc::Receiver<Vec<AnomalyEvent>>>,
    last_flagged: HashMap<NodeId, u64>,
    tick: u64,
    journal_task: Option<JoinHandle<()>>,
}

impl ControlLoop {
    /// Build a loop; must be called inside a Tokio runtime when a journal is configured
    pub fn new(
        config: HealingConfig,
        topology: Arc<TopologyManager>,
        collaborators: Collaborators,
    ) -> HealingResult<Self> {
        config.validate()?;
        let metrics = HealingMetrics::new()?;
        let pool = WorkerPool::new(config.control_loop.worker_pool_size);

        let mut knowledge = KnowledgeStore::from_config(&config.knowledge);
        let mut journal_task = None;
        if let Some(path) = &config.knowledge.journal_path {
            let journal = KnowledgeJournal::open(path)?;
            let restored = journal.load_recent(config.knowledge.capacity)?;
            info!(path = %path, entries = restored.len(), "Knowledge journal opened");
            knowledge.restore(restored);
            let (handle, task) = JournalHandle::spawn(journal, &config.knowledge, Some(metrics.clone()));
            knowledge = knowledge.with_journal(handle);
            journal_task = Some(task);
        }

        let gate = ApprovalGate::new(collaborators.governance.clone(), config.governance.approval_timeout());
        let executor = Executor::new(
            config.executor.clone(),
            topology.clone(),
            ExecutorDeps {
                channel: collaborators.channel.clone(),
                probe: collaborators.probe.clone(),
                gate: gate.clone(),
            },
            metrics.clone(),
        );
        let scorer: Arc<dyn AnomalyScorer> =
            Arc::new(StatisticalScorer::with_min_history(config.detector.min_history as usize));

        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        let (preempt_tx, preempt_rx) = mpsc::channel(config.control_loop.preempt_queue_capacity.max(1));

        info!(
            partition = %config.control_loop.partition_id,
            tick_secs = config.control_loop.tick_interval_secs,
            workers = pool.size(),
            knowledge = knowledge.len(),
            "Control loop created"
        );

        Ok(Self {
            detector: AnomalyDetector::new(scorer, config.detector.clone(), pool.clone()),
            queue: EventQueue::new(config.control_loop.phase_queue_capacity),
            analyzer: RootCauseAnalyzer::new(config.analyzer.clone()),
            planner: Arc::new(Planner::new(config.planner.clone(), topology.clone(), pool.clone())),
            executor: Arc::new(executor),
            gate,
            knowledge,
            registry: IncidentRegistry::new(INCIDENT_HISTORY),
            metrics,
            pool,
            in_flight: HashSet::new(),
            tasks: Vec::new(),
            completion_tx,
            completion_rx,
            preempt_tx,
            preempt_rx: Some(preempt_rx),
            last_flagged: HashMap::new(),
            tick: 0,
            journal_task,
            telemetry: collaborators.telemetry,
            topology,
            config,
        })
    }

    /// Replace the anomaly scorer
    pub fn with_scorer(mut self, scorer: Arc<dyn AnomalyScorer>) -> Self {
        self.detector = AnomalyDetector::new(scorer, self.config.detector.clone(), self.pool.clone());
        self
    }

    /// Replace the knowledge store (for example, one restored elsewhere)
    pub fn with_knowledge(mut self, knowledge: KnowledgeStore) -> Self {
        self.knowledge = knowledge;
        self
    }

    /// Handle for preemption
    pub fn handle(&self) -> ControlHandle {
        ControlHandle {
            preempt: self.preempt_tx.clone(),
        }
    }

    /// Loop metrics
    pub fn metrics(&self) -> &HealingMetrics {
        &self.metrics
    }

    /// Incident history
    pub fn registry(&self) -> &IncidentRegistry {
        &self.registry
    }

    /// Knowledge store
    pub fn knowledge(&self) -> &KnowledgeStore {
        &self.knowledge
    }

    /// Executor, for inspection
    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    /// Topology this loop drives
    pub fn topology(&self) -> &Arc<TopologyManager> {
        &self.topology
    }

    /// Tick on the configured interval until `shutdown` flips to true
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> HealingResult<()> {
        let Some(mut preempt_rx) = self.preempt_rx.take() else {
            return Err(HealingError::Worker("control loop already running".to_string()));
        };
        let mut interval = tokio::time::interval(self.config.control_loop.tick_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(partition = %self.config.control_loop.partition_id, "Control loop started");
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.run_tick().await;
                }
                Some(events) = preempt_rx.recv() => {
                    info!(events = events.len(), "Preempted tick");
                    self.preempt_tick(events).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!(in_flight = self.tasks.len(), "Control loop stopping; cancelling executions");
        self.executor.cancel();
        self.wait_idle().await;
        self.knowledge.close_journal();
        if let Some(task) = self.journal_task.take() {
            // The writer drains what is queued, then exits
            if let Err(e) = task.await {
                error!(error = %e, "Knowledge journal writer panicked");
            }
        }
        Ok(())
    }

    /// Run one periodic tick
    pub async fn run_tick(&mut self) -> TickReport {
        let span = self.tick_span();
        self.tick_with(Vec::new(), false).instrument(span).await
    }

    /// Run one tick with externally detected events merged into Monitor output
    pub async fn preempt_tick(&mut self, events: Vec<AnomalyEvent>) -> TickReport {
        let span = self.tick_span();
        self.tick_with(events, true).instrument(span).await
    }

    fn tick_span(&self) -> Span {
        info_span!(
            "tick",
            partition = %self.config.control_loop.partition_id,
            tick = self.tick + 1
        )
    }

    /// Wait for every dispatched plan and fold its result into knowledge
    pub async fn wait_idle(&mut self) -> Vec<ExecutionRecord> {
        for task in std::mem::take(&mut self.tasks) {
            if let Err(e) = task.await {
                error!(error = %e, "Dispatched task panicked");
            }
        }
        self.drain_completions()
    }

    async fn tick_with(&mut self, injected: Vec<AnomalyEvent>, preempted: bool) -> TickReport {
        let started = Instant::now();
        self.tick += 1;
        let mut report = TickReport {
            tick: self.tick,
            preempted,
            completed: self.drain_completions(),
            ..TickReport::default()
        };

        // K: one view and one threshold table per tick
        let view = self.knowledge.view();
        let thresholds = view.threshold_table(&self.config.detector);

        // M
        let mut events = injected;
        match self.collect_telemetry().await {
            Some(frame) => {
                report.telemetry_ok = true;
                self.readmit_reporting(&frame);
                let snapshot = self.topology.ingest_telemetry(&frame);
                let detection = self.detector.detect(&snapshot, &frame, &thresholds).await;
                self.metrics
                    .predictions_discarded
                    .inc_by(detection.discarded.len() as u64);
                report.gaps = detection.gaps;
                report.discarded = detection.discarded;
                events.extend(detection.events);
            }
            None => report.telemetry_ok = false,
        }

        for event in events {
            if event.signal.is_scored() {
                if let Some(id) = event.subject.as_node() {
                    self.last_flagged.insert(id.clone(), self.tick);
                }
            }
            self.metrics
                .anomalies_flagged
                .with_label_values(&[event.signal.as_str()])
                .inc();
            if self.queue.push(event) == PushOutcome::DroppedOldest {
                self.metrics.events_dropped.inc();
                report.dropped_events += 1;
            }
        }
        let events = self.queue.drain();
        report.events = events.len();

        // A
        let snapshot = self.topology.snapshot();
        report.snapshot_version = snapshot.version;
        let incidents = self.analyzer.analyze(events, &snapshot, &view);

        // P, then E in the background
        for incident in incidents {
            self.metrics
                .incidents_detected
                .with_label_values(&[incident.kind.as_str()])
                .inc();
            let key = incident_key(&incident);
            if self.in_flight.contains(&key) {
                debug!(incident_id = %incident.id, target = %key, "Plan already in flight; suppressed");
                report.suppressed += 1;
                continue;
            }
            report.incidents.push(incident.clone());
            self.registry.open(incident.clone());
            self.plan_and_dispatch(incident, key, &view, &mut report).await;
        }

        self.metrics.tick_duration_seconds.observe(started.elapsed().as_secs_f64());
        if !report.incidents.is_empty() {
            info!(
                tick = report.tick,
                version = report.snapshot_version,
                incidents = report.incidents.len(),
                dispatched = report.dispatched,
                awaiting_approval = report.awaiting_approval,
                "Tick complete"
            );
        }
        report
    }

    async fn collect_telemetry(&self) -> Option<TelemetryFrame> {
        let budget = self.config.control_loop.telemetry_budget();
        match tokio::time::timeout(budget, self.telemetry.collect()).await {
            Ok(Ok(frame)) => Some(frame),
            Ok(Err(e)) => {
                warn!(error = %e, "Telemetry collection failed; skipping Monitor this tick");
                None
            }
            Err(_) => {
                warn!(
                    budget_ms = budget.as_millis() as u64,
                    "Telemetry collection over budget; skipping Monitor this tick"
                );
                None
            }
        }
    }

    /// Unreachable nodes that report again rejoin as active
    fn readmit_reporting(&self, frame: &TelemetryFrame) {
        let snapshot = self.topology.snapshot();
        let events: Vec<TopologyEvent> = snapshot
            .nodes_in_state(NodeState::Unreachable)
            .into_iter()
            .filter(|n| frame.has(&n.id))
            .map(|n| TopologyEvent::NodeStateChanged {
                id: n.id.clone(),
                state: NodeState::Active,
            })
            .collect();
        if events.is_empty() {
            return;
        }
        info!(nodes = events.len(), "Unreachable nodes reporting again");
        if let Err(e) = self.topology.apply_batch(events) {
            warn!(error = %e, "Failed to readmit nodes");
        }
    }

    async fn plan_and_dispatch(
        &mut self,
        incident: Incident,
        key: String,
        view: &KnowledgeView,
        report: &mut TickReport,
    ) {
        let decision = match self.planner.plan(&incident, view).await {
            Ok(decision) => decision,
            Err(e) => {
                warn!(incident_id = %incident.id, error = %e, "Planning failed");
                self.registry.update(&incident.id, |r| {
                    r.status = IncidentStatus::Failed;
                    r.note = Some(e.to_string());
                });
                return;
            }
        };

        let context = DispatchContext {
            scorer_flagged: self.scorer_flagged(&incident),
            lock_key: key.clone(),
            incident,
        };

        match decision {
            PlanDecision::NoActionNeeded { incident_id, reason } => {
                debug!(incident_id = %incident_id, reason = %reason, "No action needed");
                report.no_action += 1;
                self.registry.update(&incident_id, |r| {
                    r.status = IncidentStatus::NoAction;
                    r.note = Some(reason);
                });
                // Keep a silent node from being re-flagged every tick
                if context.incident.kind == IncidentKind::NodeFailure && context.incident.signal == Signal::Silence {
                    if let Some(node_id) = context.incident.target_node() {
                        if let Err(e) = self.topology.update(TopologyEvent::NodeStateChanged {
                            id: node_id.clone(),
                            state: NodeState::Unreachable,
                        }) {
                            warn!(node_id = %node_id, error = %e, "Failed to mark silent node unreachable");
                        }
                    }
                }
            }
            PlanDecision::Execute(plan) => {
                report.dispatched += 1;
                self.registry.update(&plan.incident_id, |r| {
                    r.status = IncidentStatus::Executing;
                    r.plan = Some(plan.clone());
                });
                self.in_flight.insert(key);
                let executor = self.executor.clone();
                let tx = self.completion_tx.clone();
                self.tasks.push(tokio::spawn(async move {
                    let record = executor.execute(&plan, context.incident.detected_at).await;
                    if tx.send(Completion::Executed { context, record }).is_err() {
                        debug!("Control loop gone; execution result dropped");
                    }
                }));
            }
            PlanDecision::AwaitApproval(plan) => {
                report.awaiting_approval += 1;
                self.registry.update(&plan.incident_id, |r| {
                    r.status = IncidentStatus::AwaitingApproval;
                    r.plan = Some(plan.clone());
                });
                self.in_flight.insert(key);
                self.metrics.pending_approvals.inc();
                let executor = self.executor.clone();
                let gate = self.gate.clone();
                let metrics = self.metrics.clone();
                let tx = self.completion_tx.clone();
                self.tasks.push(tokio::spawn(async move {
                    let outcome = tokio::select! {
                        outcome = gate.request(ApprovalRequest::for_plan(&plan)) => outcome,
                        _ = executor.cancelled() => {
                            warn!(plan_id = %plan.id, "Shutting down with approval pending; denying");
                            ApprovalOutcome::DeniedByDefault
                        }
                    };
                    metrics.pending_approvals.dec();
                    let completion = match outcome {
                        ApprovalOutcome::Approved => Completion::Executed {
                            record: executor.execute(&plan, context.incident.detected_at).await,
                            context,
                        },
                        outcome => Completion::NotApproved { context, outcome },
                    };
                    if tx.send(completion).is_err() {
                        debug!("Control loop gone; approval result dropped");
                    }
                }));
            }
        }
        self.tasks.retain(|task| !task.is_finished());
    }

    /// Whether the scorer flagged any covered node before the incident
    fn scorer_flagged(&self, incident: &Incident) -> bool {
        let window = self.config.detector.silence_ticks as u64 + 1;
        incident.covered_nodes.iter().any(|id| {
            self.last_flagged
                .get(id)
                .map(|tick| self.tick.saturating_sub(*tick) <= window)
                .unwrap_or(false)
        })
    }

    fn drain_completions(&mut self) -> Vec<ExecutionRecord> {
        let mut finished = Vec::new();
        while let Ok(completion) = self.completion_rx.try_recv() {
            match completion {
                Completion::Executed { context, record } => {
                    self.in_flight.remove(&context.lock_key);
                    let status = match (record.state, record.strategy) {
                        (ExecutionState::Succeeded, Strategy::Escalate) => IncidentStatus::Escalated,
                        (ExecutionState::Succeeded, _) => IncidentStatus::Resolved,
                        _ if record.escalated => IncidentStatus::Escalated,
                        _ => IncidentStatus::Failed,
                    };
                    if record.history.contains(&ExecutionState::Applying) {
                        self.learn(&context, &record);
                    }
                    self.registry.update(&context.incident.id, |r| {
                        r.status = status;
                        r.note = record.failure.clone();
                        r.execution = Some(record.clone());
                    });
                    finished.push(record);
                }
                Completion::NotApproved { context, outcome } => {
                    self.in_flight.remove(&context.lock_key);
                    let status = match outcome {
                        ApprovalOutcome::DeniedByDefault => IncidentStatus::DeniedByDefault,
                        _ => IncidentStatus::Denied,
                    };
                    self.registry.update(&context.incident.id, |r| r.status = status);
                }
            }
        }
        self.tasks.retain(|task| !task.is_finished());
        finished
    }

    fn learn(&mut self, context: &DispatchContext, record: &ExecutionRecord) {
        let incident = &context.incident;
        let verdict = if record.pre_healthy == Some(true) && incident.signal.is_scored() {
            Verdict::FalsePositive
        } else if incident.signal == Signal::Silence && !context.scorer_flagged {
            Verdict::Missed
        } else {
            Verdict::TruePositive
        };

        let entry = self.knowledge.record(KnowledgeRecord {
            subject: incident.subject.to_string(),
            kind: incident.kind,
            signal: incident.signal,
            score: incident.score,
            metrics: incident.metrics.clone(),
            strategy: record.strategy,
            outcome: Outcome {
                success: record.succeeded(),
                verdict,
                mttr_ms: record.mttr_ms,
            },
            embedding: Some(incident.embedding.clone()),
        });
        debug!(
            seq = entry.seq,
            incident_id = %incident.id,
            verdict = ?verdict,
            success = entry.outcome.success,
            "Outcome recorded"
        );
    }
}

/// In-flight key: the node or link the incident is about
fn incident_key(incident: &Incident) -> String {
    match (incident.target_node(), &incident.subject) {
        (Some(node_id), _) => node_id.clone(),
        (None, Subject::Link(key)) => key.to_string(),
        (None, Subject::Node(id)) => id.clone(),
    }
}
