//! MeshHeal Mesh - Topology Manager
//!
//! Owns the live view of a mesh partition and answers routing questions
//! against it.
//!
//! # Core Components
//!
//! - **Link Classification**: loss/latency/throughput mapped to quality tiers
//! - **Topology Snapshots**: immutable, monotonically versioned graphs shared as `Arc`
//! - **Topology Manager**: single writer applying topology events and telemetry
//! - **k-Disjoint Paths**: budgeted repeated Dijkstra with a per-version path cache
//!
//! # Example Usage
//!
//! ```rust
//! use meshheal_core::IdentityRef;
//! use meshheal_mesh::{LinkMetrics, PathConstraints, TopologyEvent, TopologyManager};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = TopologyManager::new();
//! manager.apply_batch(vec![
//!     TopologyEvent::NodeJoin { id: "a".into(), identity: IdentityRef::new("a"), identity_valid: true },
//!     TopologyEvent::NodeJoin { id: "b".into(), identity: IdentityRef::new("b"), identity_valid: true },
//!     TopologyEvent::LinkUp { a: "a".into(), b: "b".into(), metrics: LinkMetrics::new(0.0, 4.0, 200.0) },
//! ])?;
//!
//! let paths = manager.compute_k_disjoint_paths("a", "b", 2, &PathConstraints::default())?;
//! assert_eq!(paths.paths.len(), 1);
//! assert!(paths.degraded);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod error;
pub mod manager;
pub mod node;
pub mod paths;
pub mod routing;
pub mod snapshot;

// Re-export main types
pub use error::{MeshError, MeshResult};
pub use manager::{TopologyEvent, TopologyManager, TopologyStats};
pub use node::{NetworkNode, NodeState};
pub use paths::{
    compute_k_disjoint_paths, DisjointPaths, Path, PathCache, PathConstraints, DEFAULT_PATH_BUDGET,
};
pub use routing::{classify_link, path_links, FlowKey, Link, LinkKey, LinkMetrics, LinkQuality, Route};
pub use snapshot::TopologySnapshot;
