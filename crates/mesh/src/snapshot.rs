//! Immutable, versioned topology snapshots
//!
//! A snapshot is never mutated once published. The manager clones the current
//! one, applies changes and publishes the copy under the next version.

use crate::node::{NetworkNode, NodeState};
use crate::routing::{FlowKey, Link, LinkKey, LinkQuality, Route};
use meshheal_core::{current_timestamp_ms, NodeId};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Point-in-time view of the mesh graph
#[derive(Debug, Clone, Serialize)]
pub struct TopologySnapshot {
    /// Monotonic version number
    pub version: u64,
    /// Creation time (Unix epoch milliseconds)
    pub created_at: u64,
    /// Nodes keyed by id
    pub nodes: BTreeMap<NodeId, NetworkNode>,
    /// Links keyed by normalized endpoint pair
    pub links: BTreeMap<LinkKey, Link>,
    /// Active routes keyed by flow
    pub routes: BTreeMap<FlowKey, Route>,
    #[serde(skip)]
    adjacency: BTreeMap<NodeId, BTreeSet<NodeId>>,
}

impl Default for TopologySnapshot {
    fn default() -> Self {
        Self::empty()
    }
}

impl TopologySnapshot {
    /// Version 0, no nodes
    pub fn empty() -> Self {
        Self {
            version: 0,
            created_at: current_timestamp_ms(),
            nodes: BTreeMap::new(),
            links: BTreeMap::new(),
            routes: BTreeMap::new(),
            adjacency: BTreeMap::new(),
        }
    }

    /// Build a snapshot from parts; derived indexes are recomputed
    pub fn from_parts(
        version: u64,
        nodes: BTreeMap<NodeId, NetworkNode>,
        links: BTreeMap<LinkKey, Link>,
        routes: BTreeMap<FlowKey, Route>,
    ) -> Self {
        let mut snapshot = Self {
            version,
            created_at: current_timestamp_ms(),
            nodes,
            links,
            routes,
            adjacency: BTreeMap::new(),
        };
        snapshot.reindex();
        snapshot
    }

    /// Recompute adjacency and per-node quality after a mutation
    pub(crate) fn reindex(&mut self) {
        let mut adjacency: BTreeMap<NodeId, BTreeSet<NodeId>> = BTreeMap::new();
        let mut best: BTreeMap<NodeId, LinkQuality> = BTreeMap::new();

        for link in self.links.values() {
            adjacency
                .entry(link.key.a.clone())
                .or_default()
                .insert(link.key.b.clone());
            adjacency
                .entry(link.key.b.clone())
                .or_default()
                .insert(link.key.a.clone());

            if link.up {
                for end in [&link.key.a, &link.key.b] {
                    let entry = best.entry(end.clone()).or_insert(LinkQuality::Bad);
                    if link.quality < *entry {
                        *entry = link.quality;
                    }
                }
            }
        }

        for (id, node) in self.nodes.iter_mut() {
            node.quality = best.get(id).copied().unwrap_or(LinkQuality::Bad);
        }
        self.adjacency = adjacency;
    }

    /// Look up a node
    pub fn node(&self, id: &str) -> Option<&NetworkNode> {
        self.nodes.get(id)
    }

    /// Look up a link by either endpoint order
    pub fn link(&self, a: &str, b: &str) -> Option<&Link> {
        LinkKey::new(a, b).ok().and_then(|key| self.links.get(&key))
    }

    /// All neighbors, including over down links, in id order
    pub fn neighbors(&self, id: &str) -> Vec<&NodeId> {
        self.adjacency
            .get(id)
            .map(|set| set.iter().collect())
            .unwrap_or_default()
    }

    /// Neighbors reachable over up links, in id order
    pub fn up_neighbors(&self, id: &str) -> Vec<&NodeId> {
        self.adjacency
            .get(id)
            .map(|set| {
                set.iter()
                    .filter(|other| self.link(id, other).map(|l| l.up).unwrap_or(false))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Degree centrality over up links, normalized to [0, 1]
    pub fn degree_centrality(&self, id: &str) -> f64 {
        if self.nodes.len() <= 1 {
            return 0.0;
        }
        self.up_neighbors(id).len() as f64 / (self.nodes.len() - 1) as f64
    }

    /// Whether every node exists and every hop is an existing up link
    pub fn contains_path(&self, path: &[NodeId]) -> bool {
        if path.is_empty() || path.iter().any(|n| !self.nodes.contains_key(n)) {
            return false;
        }
        path.windows(2)
            .all(|hop| self.link(&hop[0], &hop[1]).map(|l| l.up).unwrap_or(false))
    }

    /// Routes whose path includes the node
    pub fn routes_through_node(&self, id: &str) -> Vec<&Route> {
        self.routes.values().filter(|r| r.traverses_node(id)).collect()
    }

    /// Routes whose path uses the link
    pub fn routes_through_link(&self, key: &LinkKey) -> Vec<&Route> {
        self.routes.values().filter(|r| r.traverses_link(key)).collect()
    }

    /// Nodes in a given state
    pub fn nodes_in_state(&self, state: NodeState) -> Vec<&NetworkNode> {
        self.nodes.values().filter(|n| n.state == state).collect()
    }

    /// Split a node subset into groups connected through up links inside the subset
    pub fn connected_components(&self, subset: &BTreeSet<NodeId>) -> Vec<BTreeSet<NodeId>> {
        let mut seen: BTreeSet<NodeId> = BTreeSet::new();
        let mut components = Vec::new();

        for start in subset {
            if seen.contains(start) || !self.nodes.contains_key(start) {
                continue;
            }
            let mut component = BTreeSet::new();
            let mut queue = VecDeque::from([start.clone()]);
            seen.insert(start.clone());

            while let Some(current) = queue.pop_front() {
                for next in self.up_neighbors(&current) {
                    if subset.contains(next) && seen.insert(next.clone()) {
                        queue.push_back(next.clone());
                    }
                }
                component.insert(current);
            }
            components.push(component);
        }
        components
    }

    /// Longest shortest path, in hops, over up links (0 for empty or edgeless graphs)
    pub fn diameter_hops(&self) -> usize {
        let mut diameter = 0;
        for start in self.nodes.keys() {
            let mut dist: BTreeMap<&NodeId, usize> = BTreeMap::new();
            let mut queue = VecDeque::from([start]);
            dist.insert(start, 0);
            while let Some(current) = queue.pop_front() {
                let d = dist[current];
                diameter = diameter.max(d);
                for next in self.up_neighbors(current) {
                    if !dist.contains_key(next) {
                        dist.insert(next, d + 1);
                        queue.push_back(next);
                    }
                }
            }
        }
        diameter
    }

    /// Count of up links per quality tier
    pub fn link_quality_counts(&self) -> BTreeMap<LinkQuality, usize> {
        let mut counts = BTreeMap::new();
        for link in self.links.values().filter(|l| l.up) {
            *counts.entry(link.quality).or_insert(0) += 1;
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::LinkMetrics;
    use meshheal_core::IdentityRef;

    fn line(ids: &[&str]) -> TopologySnapshot {
        let nodes = ids
            .iter()
            .map(|id| (id.to_string(), NetworkNode::new(*id, IdentityRef::new(*id), true)))
            .collect();
        let links = ids
            .windows(2)
            .map(|pair| {
                let key = LinkKey::new(pair[0], pair[1]).unwrap();
                (key.clone(), Link::new(key, LinkMetrics::new(0.0, 5.0, 500.0)))
            })
            .collect();
        TopologySnapshot::from_parts(1, nodes, links, BTreeMap::new())
    }

    #[test]
    fn test_node_quality_is_best_up_link() {
        let mut snap = line(&["a", "b", "c"]);
        assert_eq!(snap.node("b").unwrap().quality, LinkQuality::Excellent);

        for link in snap.links.values_mut() {
            link.up = false;
        }
        snap.reindex();
        assert_eq!(snap.node("b").unwrap().quality, LinkQuality::Bad);
    }

    #[test]
    fn test_contains_path_checks_links() {
        let snap = line(&["a", "b", "c"]);
        let ok = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let skip = vec!["a".to_string(), "c".to_string()];
        assert!(snap.contains_path(&ok));
        assert!(!snap.contains_path(&skip));
        assert!(!snap.contains_path(&[]));
    }

    #[test]
    fn test_components_respect_subset() {
        let snap = line(&["a", "b", "c", "d"]);
        let subset: BTreeSet<NodeId> = ["a", "b", "d"].iter().map(|s| s.to_string()).collect();
        let components = snap.connected_components(&subset);
        assert_eq!(components.len(), 2);
        assert!(components.iter().any(|c| c.len() == 2 && c.contains("a")));
    }

    #[test]
    fn test_diameter_and_centrality() {
        let snap = line(&["a", "b", "c", "d"]);
        assert_eq!(snap.diameter_hops(), 3);
        assert!((snap.degree_centrality("b") - 2.0 / 3.0).abs() < 1e-9);
        assert!((snap.degree_centrality("a") - 1.0 / 3.0).abs() < 1e-9);
    }
}
