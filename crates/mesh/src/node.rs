//! Mesh node records
//!
//! A node carries its latest telemetry, the opaque identity reference handed
//! out by the identity provider, and the lifecycle state the control loop
//! assigns to it.

use crate::routing::LinkQuality;
use meshheal_core::{current_timestamp_ms, IdentityRef, NodeId, TelemetrySample};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a node as seen by the control loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeState {
    /// Participating in forwarding
    Active,
    /// Stopped reporting or failed a health probe
    Unreachable,
    /// Excluded after a failed rollback; only an operator clears this
    Quarantined,
}

/// A node in the mesh topology
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkNode {
    /// Unique node identifier
    pub id: NodeId,
    /// Best quality among the node's up links (`Bad` when isolated)
    pub quality: LinkQuality,
    /// Latest telemetry sample, if any arrived
    pub metrics: Option<TelemetrySample>,
    /// Identity token from the zero-trust provider
    pub identity: IdentityRef,
    /// Provider verdict for the identity
    pub identity_valid: bool,
    /// Lifecycle state
    pub state: NodeState,
    /// Last telemetry timestamp (Unix epoch milliseconds)
    pub last_seen: u64,
}

impl NetworkNode {
    /// Create an active node with no telemetry yet
    pub fn new(id: impl Into<NodeId>, identity: IdentityRef, identity_valid: bool) -> Self {
        Self {
            id: id.into(),
            quality: LinkQuality::Bad,
            metrics: None,
            identity,
            identity_valid,
            state: NodeState::Active,
            last_seen: current_timestamp_ms(),
        }
    }

    /// Whether the node may relay traffic for others
    pub fn can_forward(&self) -> bool {
        self.state == NodeState::Active && self.identity_valid
    }

    /// Whether commands may be sent to this node
    pub fn is_trusted(&self) -> bool {
        self.identity_valid && self.state != NodeState::Quarantined
    }
}
