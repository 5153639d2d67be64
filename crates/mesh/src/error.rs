//! Error types for MeshHeal topology operations.
//!
//! Covers snapshot updates, route installation and path search.

use thiserror::Error;

/// Errors that can occur in topology operations.
#[derive(Debug, Error)]
pub enum MeshError {
    /// Node not present in the active snapshot
    #[error("Node not found: {node_id}")]
    NodeNotFound {
        /// Missing node
        node_id: String,
    },

    /// Node already registered
    #[error("Node already present: {node_id}")]
    DuplicateNode {
        /// Conflicting node
        node_id: String,
    },

    /// Link not present in the active snapshot
    #[error("Link not found: {a} <-> {b}")]
    LinkNotFound {
        /// First endpoint
        a: String,
        /// Second endpoint
        b: String,
    },

    /// Link endpoints are invalid (e.g. a self loop)
    #[error("Invalid link: {0}")]
    InvalidLink(String),

    /// Route path does not exist in the snapshot
    #[error("Invalid route {source_id} -> {destination}: {reason}")]
    InvalidRoute {
        /// Flow source
        source_id: String,
        /// Flow destination
        destination: String,
        /// Why the path was rejected
        reason: String,
    },
}

/// Result type for topology operations.
pub type MeshResult<T> = Result<T, MeshError>;
