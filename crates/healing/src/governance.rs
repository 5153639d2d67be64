//! Governance hand-off: approval requests for risky plans and escalations
//!
//! The loop never waits on governance inline. [`ApprovalGate`] bounds every
//! request by the configured timeout and treats silence as a denial.

use crate::planner::{RecoveryPlan, Strategy};
use crate::root_cause::IncidentKind;
use async_trait::async_trait;
use meshheal_core::{current_timestamp_ms, NodeId};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn};

/// Request for a human or quorum decision on a plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    /// Plan awaiting approval
    pub plan_id: String,
    /// Incident behind the plan
    pub incident_id: String,
    /// Incident classification
    pub kind: IncidentKind,
    /// Proposed strategy
    pub strategy: Strategy,
    /// Node acted upon
    pub target: Option<NodeId>,
    /// Estimated historical risk
    pub risk: f64,
    /// Estimated disruption scope
    pub cost: f64,
    /// Planner rationale
    pub reason: String,
    /// Request time (Unix epoch milliseconds)
    pub requested_at: u64,
}

impl ApprovalRequest {
    /// Request for a plan
    pub fn for_plan(plan: &RecoveryPlan) -> Self {
        Self {
            plan_id: plan.id.clone(),
            incident_id: plan.incident_id.clone(),
            kind: plan.kind,
            strategy: plan.strategy,
            target: plan.target.clone(),
            risk: plan.risk,
            cost: plan.cost,
            reason: plan.reason.clone(),
            requested_at: current_timestamp_ms(),
        }
    }
}

/// Answer from governance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApprovalDecision {
    /// Go ahead
    Approved,
    /// Do not execute
    Denied,
}

/// Result of waiting on the gate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApprovalOutcome {
    /// Approved in time
    Approved,
    /// Explicitly denied
    Denied,
    /// No answer before the timeout
    DeniedByDefault,
}

/// Unresolved incident handed to humans
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Escalation {
    /// Incident escalated
    pub incident_id: String,
    /// Plan involved, if any
    pub plan_id: Option<String>,
    /// Node involved, if any
    pub node_id: Option<NodeId>,
    /// Why it was escalated
    pub reason: String,
    /// Escalation time (Unix epoch milliseconds)
    pub raised_at: u64,
}

impl Escalation {
    /// Escalation stamped now
    pub fn new(incident_id: impl Into<String>, plan_id: Option<String>, node_id: Option<NodeId>, reason: impl Into<String>) -> Self {
        Self {
            incident_id: incident_id.into(),
            plan_id,
            node_id,
            reason: reason.into(),
            raised_at: current_timestamp_ms(),
        }
    }
}

/// Governance collaborator
#[async_trait]
pub trait Governance: Send + Sync {
    /// Ask for a decision; may never return
    async fn request_approval(&self, request: ApprovalRequest) -> ApprovalDecision;

    /// Notify humans of an unresolved incident
    async fn escalate(&self, escalation: Escalation);
}

/// Timeout wrapper around a governance collaborator
#[derive(Clone)]
pub struct ApprovalGate {
    governance: Arc<dyn Governance>,
    timeout: Duration,
}

impl ApprovalGate {
    /// Gate with the given timeout
    pub fn new(governance: Arc<dyn Governance>, timeout: Duration) -> Self {
        Self { governance, timeout }
    }

    /// Wait for a decision, denying by default on timeout
    pub async fn request(&self, request: ApprovalRequest) -> ApprovalOutcome {
        let plan_id = request.plan_id.clone();
        info!(plan_id = %plan_id, risk = request.risk, strategy = %request.strategy, "Approval requested");

        match tokio::time::timeout(self.timeout, self.governance.request_approval(request)).await {
            Ok(ApprovalDecision::Approved) => {
                info!(plan_id = %plan_id, "Plan approved");
                ApprovalOutcome::Approved
            }
            Ok(ApprovalDecision::Denied) => {
                info!(plan_id = %plan_id, "Plan denied");
                ApprovalOutcome::Denied
            }
            Err(_) => {
                warn!(
                    plan_id = %plan_id,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "No approval before timeout; denied by default"
                );
                ApprovalOutcome::DeniedByDefault
            }
        }
    }

    /// Forward an escalation
    pub async fn escalate(&self, escalation: Escalation) {
        warn!(
            incident_id = %escalation.incident_id,
            reason = %escalation.reason,
            "Incident escalated"
        );
        self.governance.escalate(escalation).await;
    }
}

/// Governance that logs everything and answers with a fixed decision, or never
#[derive(Debug, Clone, Default)]
pub struct LoggingGovernance {
    answer: Option<ApprovalDecision>,
    requests: Arc<Mutex<Vec<ApprovalRequest>>>,
    escalations: Arc<Mutex<Vec<Escalation>>>,
}

impl LoggingGovernance {
    /// Never answers approval requests
    pub fn silent() -> Self {
        Self::default()
    }

    /// Answers every request with `decision`
    pub fn answering(decision: ApprovalDecision) -> Self {
        Self {
            answer: Some(decision),
            ..Self::default()
        }
    }

    /// Requests received so far
    pub fn requests(&self) -> Vec<ApprovalRequest> {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Escalations received so far
    pub fn escalations(&self) -> Vec<Escalation> {
        self.escalations.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl Governance for LoggingGovernance {
    async fn request_approval(&self, request: ApprovalRequest) -> ApprovalDecision {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request);
        match self.answer {
            Some(decision) => decision,
            None => std::future::pending().await,
        }
    }

    async fn escalate(&self, escalation: Escalation) {
        self.escalations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(escalation);
    }
}
