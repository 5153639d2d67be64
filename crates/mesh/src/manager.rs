//! Single-writer topology manager
//!
//! Readers take an `Arc<TopologySnapshot>` and never block writers for longer
//! than a pointer swap. Writers are serialized by one mutex, build the next
//! snapshot on a private copy and publish it under a higher version.

use crate::error::{MeshError, MeshResult};
use crate::node::{NetworkNode, NodeState};
use crate::paths::{self, DisjointPaths, Path, PathCache, PathConstraints, DEFAULT_PATH_BUDGET};
use crate::routing::{classify_link, FlowKey, Link, LinkKey, LinkMetrics, LinkQuality, Route};
use crate::snapshot::TopologySnapshot;
use meshheal_core::{current_timestamp_ms, IdentityRef, NodeId, TelemetryFrame};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, info, warn};

/// Topology-changing event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TopologyEvent {
    /// A node joined the partition
    NodeJoin {
        /// Node id
        id: NodeId,
        /// Identity token
        identity: IdentityRef,
        /// Provider verdict
        identity_valid: bool,
    },
    /// A node left; its links and every route through it are dropped
    NodeLeave {
        /// Node id
        id: NodeId,
    },
    /// A link came up (new or previously down)
    LinkUp {
        /// One endpoint
        a: NodeId,
        /// Other endpoint
        b: NodeId,
        /// Measured link metrics
        metrics: LinkMetrics,
    },
    /// A link went down
    LinkDown {
        /// One endpoint
        a: NodeId,
        /// Other endpoint
        b: NodeId,
    },
    /// New measurements for an existing link
    LinkMetricsChanged {
        /// One endpoint
        a: NodeId,
        /// Other endpoint
        b: NodeId,
        /// Measured link metrics
        metrics: LinkMetrics,
    },
    /// Identity provider re-evaluated a node
    IdentityChanged {
        /// Node id
        id: NodeId,
        /// New provider verdict
        identity_valid: bool,
        /// Replacement token, if one was issued
        #[serde(default)]
        identity: Option<IdentityRef>,
    },
    /// Control-loop lifecycle change
    NodeStateChanged {
        /// Node id
        id: NodeId,
        /// New state
        state: NodeState,
    },
    /// Install or replace the route for a flow
    RouteInstalled {
        /// Route to install
        route: Route,
    },
    /// Remove the route for a flow
    RouteRemoved {
        /// Flow to clear
        flow: FlowKey,
    },
}

/// Aggregate topology statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopologyStats {
    /// Current snapshot version
    pub version: u64,
    /// Total nodes
    pub node_count: usize,
    /// Nodes in `Active` state
    pub active_nodes: usize,
    /// Nodes in `Quarantined` state
    pub quarantined_nodes: usize,
    /// Total links
    pub link_count: usize,
    /// Links currently up
    pub up_links: usize,
    /// Installed routes
    pub route_count: usize,
    /// Graph diameter in hops
    pub diameter_hops: usize,
    /// Up links per quality tier
    pub links_by_quality: BTreeMap<LinkQuality, usize>,
    /// Path cache hits
    pub path_cache_hits: u64,
    /// Path cache misses
    pub path_cache_misses: u64,
}

/// Owner of the live topology snapshot
#[derive(Debug)]
pub struct TopologyManager {
    current: RwLock<Arc<TopologySnapshot>>,
    writer: Mutex<()>,
    cache: Mutex<PathCache>,
    path_budget: usize,
}

impl Default for TopologyManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TopologyManager {
    /// Create a manager holding an empty version-0 snapshot
    pub fn new() -> Self {
        Self::with_path_budget(DEFAULT_PATH_BUDGET)
    }

    /// Create a manager with a custom relaxation budget for path searches
    pub fn with_path_budget(path_budget: usize) -> Self {
        Self {
            current: RwLock::new(Arc::new(TopologySnapshot::empty())),
            writer: Mutex::new(()),
            cache: Mutex::new(PathCache::new()),
            path_budget,
        }
    }

    /// Current snapshot
    pub fn snapshot(&self) -> Arc<TopologySnapshot> {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Current snapshot version
    pub fn version(&self) -> u64 {
        self.snapshot().version
    }

    /// Apply one event; a new version is published only if something changed
    pub fn update(&self, event: TopologyEvent) -> MeshResult<Arc<TopologySnapshot>> {
        self.apply_batch(vec![event])
    }

    /// Apply events atomically under a single new version.
    ///
    /// If any event is rejected nothing is published.
    pub fn apply_batch(&self, events: Vec<TopologyEvent>) -> MeshResult<Arc<TopologySnapshot>> {
        let _guard = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        let base = self.snapshot();
        let mut draft = (*base).clone();
        let mut changed = false;

        for event in events {
            changed |= apply_event(&mut draft, event)?;
        }

        if !changed {
            return Ok(base);
        }
        Ok(self.publish(base.version, draft))
    }

    /// Attach the latest telemetry to known nodes.
    ///
    /// Samples for unknown nodes are ignored. The version moves only if at
    /// least one node's sample differs from what it already carried.
    pub fn ingest_telemetry(&self, frame: &TelemetryFrame) -> Arc<TopologySnapshot> {
        let _guard = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        let base = self.snapshot();
        let mut draft = (*base).clone();
        let mut changed = false;

        for (node_id, sample) in &frame.samples {
            match draft.nodes.get_mut(node_id) {
                Some(node) => {
                    if node.metrics.as_ref() != Some(sample) {
                        node.metrics = Some(sample.clone());
                        node.last_seen = if sample.timestamp > 0 {
                            sample.timestamp
                        } else {
                            frame.collected_at
                        };
                        changed = true;
                    }
                }
                None => debug!(node_id = %node_id, "Telemetry for unknown node ignored"),
            }
        }

        if !changed {
            return base;
        }
        self.publish(base.version, draft)
    }

    /// k-disjoint paths on the current snapshot, memoized per version
    pub fn compute_k_disjoint_paths(
        &self,
        source: &str,
        destination: &str,
        k: usize,
        constraints: &PathConstraints,
    ) -> MeshResult<DisjointPaths> {
        let snapshot = self.snapshot();
        {
            let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(hit) = cache.get(snapshot.version, source, destination, k, constraints) {
                return Ok(hit);
            }
        }

        let result = paths::compute_k_disjoint_paths(
            &snapshot,
            source,
            destination,
            k,
            constraints,
            self.path_budget,
        )?;

        self.cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(snapshot.version, source, destination, k, constraints, result.clone());
        Ok(result)
    }

    /// First known disjoint path for the flow that shares no link with `failed`.
    ///
    /// Cached results for the current version are consulted first; otherwise a
    /// fresh search avoiding the failed path's internal nodes is run.
    pub fn failover_path(&self, flow: &FlowKey, failed: &[NodeId], k: usize) -> MeshResult<Option<Path>> {
        let snapshot = self.snapshot();
        let usable = |path: &Path| {
            path.nodes.as_slice() != failed
                && !path.shares_edge_with(failed)
                && snapshot.contains_path(&path.nodes)
        };

        {
            let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
            cache.sync_version(snapshot.version);
            if let Some(known) = cache.lookup_any(&flow.source, &flow.destination) {
                if let Some(path) = known.paths.iter().find(|p| usable(*p)) {
                    return Ok(Some(path.clone()));
                }
            }
        }

        let mut constraints = PathConstraints::default();
        if failed.len() > 2 {
            constraints
                .avoid_nodes
                .extend(failed[1..failed.len() - 1].iter().cloned());
        }
        constraints.avoid_links.extend(crate::routing::path_links(failed));

        let result = self.compute_k_disjoint_paths(&flow.source, &flow.destination, k, &constraints)?;
        Ok(result.paths.into_iter().find(|p| usable(p)))
    }

    /// Route currently installed for a flow
    pub fn active_route(&self, flow: &FlowKey) -> Option<Route> {
        self.snapshot().routes.get(flow).cloned()
    }

    /// Aggregate statistics for the current snapshot
    pub fn stats(&self) -> TopologyStats {
        let snapshot = self.snapshot();
        let (hits, misses) = self
            .cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .counters();

        TopologyStats {
            version: snapshot.version,
            node_count: snapshot.nodes.len(),
            active_nodes: snapshot.nodes_in_state(NodeState::Active).len(),
            quarantined_nodes: snapshot.nodes_in_state(NodeState::Quarantined).len(),
            link_count: snapshot.links.len(),
            up_links: snapshot.links.values().filter(|l| l.up).count(),
            route_count: snapshot.routes.len(),
            diameter_hops: snapshot.diameter_hops(),
            links_by_quality: snapshot.link_quality_counts(),
            path_cache_hits: hits,
            path_cache_misses: misses,
        }
    }

    fn publish(&self, base_version: u64, mut draft: TopologySnapshot) -> Arc<TopologySnapshot> {
        draft.version = base_version + 1;
        draft.created_at = current_timestamp_ms();
        draft.reindex();
        let published = Arc::new(draft);
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = published.clone();
        debug!(version = published.version, "Published topology snapshot");
        published
    }
}

fn require_node<'a>(draft: &'a mut TopologySnapshot, id: &str) -> MeshResult<&'a mut NetworkNode> {
    draft.nodes.get_mut(id).ok_or_else(|| MeshError::NodeNotFound {
        node_id: id.to_string(),
    })
}

fn link_key(draft: &TopologySnapshot, a: &str, b: &str) -> MeshResult<LinkKey> {
    for end in [a, b] {
        if !draft.nodes.contains_key(end) {
            return Err(MeshError::NodeNotFound {
                node_id: end.to_string(),
            });
        }
    }
    LinkKey::new(a, b)
}

fn validate_route(draft: &TopologySnapshot, route: &Route) -> MeshResult<()> {
    let invalid = |reason: &str| MeshError::InvalidRoute {
        source_id: route.flow.source.clone(),
        destination: route.flow.destination.clone(),
        reason: reason.to_string(),
    };

    if route.path.first() != Some(&route.flow.source) || route.path.last() != Some(&route.flow.destination) {
        return Err(invalid("path endpoints do not match the flow"));
    }
    if !draft.contains_path(&route.path) {
        return Err(invalid("path uses unknown nodes or missing links"));
    }
    if let Some(id) = route
        .path
        .iter()
        .find(|id| draft.node(id).map(|n| n.state != NodeState::Active).unwrap_or(true))
    {
        return Err(invalid(&format!("path crosses inactive node {}", id)));
    }
    Ok(())
}

/// Apply a single event to a draft; returns whether anything changed
fn apply_event(draft: &mut TopologySnapshot, event: TopologyEvent) -> MeshResult<bool> {
    match event {
        TopologyEvent::NodeJoin {
            id,
            identity,
            identity_valid,
        } => {
            if draft.nodes.contains_key(&id) {
                return Err(MeshError::DuplicateNode { node_id: id });
            }
            info!(node_id = %id, identity_valid, "Node joined");
            draft
                .nodes
                .insert(id.clone(), NetworkNode::new(id, identity, identity_valid));
            Ok(true)
        }
        TopologyEvent::NodeLeave { id } => {
            if draft.nodes.remove(&id).is_none() {
                return Err(MeshError::NodeNotFound { node_id: id });
            }
            draft.links.retain(|key, _| !key.touches(&id));
            let before = draft.routes.len();
            draft.routes.retain(|_, route| !route.traverses_node(&id));
            info!(
                node_id = %id,
                dropped_routes = before - draft.routes.len(),
                "Node left"
            );
            draft.reindex();
            Ok(true)
        }
        TopologyEvent::LinkUp { a, b, metrics } => {
            let key = link_key(draft, &a, &b)?;
            match draft.links.get_mut(&key) {
                Some(link) if link.up => Err(MeshError::InvalidLink(format!("{} is already up", key))),
                Some(link) => {
                    *link = Link::new(key, metrics);
                    draft.reindex();
                    Ok(true)
                }
                None => {
                    draft.links.insert(key.clone(), Link::new(key, metrics));
                    draft.reindex();
                    Ok(true)
                }
            }
        }
        TopologyEvent::LinkDown { a, b } => {
            let key = link_key(draft, &a, &b)?;
            let link = draft
                .links
                .get_mut(&key)
                .ok_or_else(|| MeshError::LinkNotFound { a: a.clone(), b: b.clone() })?;
            if !link.up {
                return Ok(false);
            }
            link.up = false;
            warn!(link = %key, "Link down");
            draft.reindex();
            Ok(true)
        }
        TopologyEvent::LinkMetricsChanged { a, b, metrics } => {
            let key = link_key(draft, &a, &b)?;
            let link = draft
                .links
                .get_mut(&key)
                .ok_or_else(|| MeshError::LinkNotFound { a: a.clone(), b: b.clone() })?;
            if link.metrics() == metrics {
                return Ok(false);
            }
            let quality = classify_link(&metrics);
            if quality != link.quality {
                debug!(link = %key, from = %link.quality, to = %quality, "Link reclassified");
            }
            link.quality = quality;
            link.latency_ms = metrics.latency_ms;
            link.loss_pct = metrics.loss_pct;
            link.bandwidth_mbps = metrics.throughput_mbps;
            draft.reindex();
            Ok(true)
        }
        TopologyEvent::IdentityChanged {
            id,
            identity_valid,
            identity,
        } => {
            let node = require_node(draft, &id)?;
            let mut changed = false;
            if node.identity_valid != identity_valid {
                node.identity_valid = identity_valid;
                changed = true;
            }
            if let Some(token) = identity {
                if node.identity != token {
                    node.identity = token;
                    changed = true;
                }
            }
            if changed && !identity_valid {
                warn!(node_id = %id, "Node identity invalidated");
            }
            Ok(changed)
        }
        TopologyEvent::NodeStateChanged { id, state } => {
            let node = require_node(draft, &id)?;
            if node.state == state {
                return Ok(false);
            }
            info!(node_id = %id, from = ?node.state, to = ?state, "Node state changed");
            node.state = state;
            Ok(true)
        }
        TopologyEvent::RouteInstalled { route } => {
            validate_route(draft, &route)?;
            if draft.routes.get(&route.flow) == Some(&route) {
                return Ok(false);
            }
            debug!(flow = %route.flow, hops = route.path.len().saturating_sub(1), "Route installed");
            draft.routes.insert(route.flow.clone(), route);
            Ok(true)
        }
        TopologyEvent::RouteRemoved { flow } => Ok(draft.routes.remove(&flow).is_some()),
    }
}
