//! k-disjoint path search
//!
//! Repeated Dijkstra over a snapshot. After each path is found its internal
//! vertices and its edges are removed, so the next search yields a path that is
//! vertex-disjoint except at the endpoints. Every edge relaxation is charged
//! against a computation budget shared by all rounds.

use crate::error::{MeshError, MeshResult};
use crate::routing::{path_links, LinkKey};
use crate::snapshot::TopologySnapshot;
use meshheal_core::NodeId;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeSet, BinaryHeap, HashMap};
use tracing::debug;

/// Default relaxation budget for a single k-disjoint request
pub const DEFAULT_PATH_BUDGET: usize = 100_000;

/// Bounded number of cached path results per snapshot version
const PATH_CACHE_CAPACITY: usize = 1024;

/// A loop-free node path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Path {
    /// Node sequence, source first
    pub nodes: Vec<NodeId>,
    /// Sum of link latencies in milliseconds
    pub latency_ms: f64,
    /// Sum of Dijkstra edge weights
    pub cost: f64,
}

impl Path {
    /// Number of hops
    pub fn hops(&self) -> usize {
        self.nodes.len().saturating_sub(1)
    }

    /// Nodes strictly between the endpoints
    pub fn internal_nodes(&self) -> &[NodeId] {
        if self.nodes.len() <= 2 {
            &[]
        } else {
            &self.nodes[1..self.nodes.len() - 1]
        }
    }

    /// Links traversed by the path
    pub fn links(&self) -> Vec<LinkKey> {
        path_links(&self.nodes)
    }

    /// Whether the two paths share any link
    pub fn shares_edge_with(&self, other: &[NodeId]) -> bool {
        let theirs: BTreeSet<LinkKey> = path_links(other).into_iter().collect();
        self.links().iter().any(|k| theirs.contains(k))
    }
}

/// Extra exclusions for a path request
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PathConstraints {
    /// Nodes that may not appear as intermediates
    pub avoid_nodes: BTreeSet<NodeId>,
    /// Links that may not be used
    pub avoid_links: BTreeSet<LinkKey>,
}

impl PathConstraints {
    /// Avoid a single node
    pub fn avoiding_node(node_id: impl Into<NodeId>) -> Self {
        let mut constraints = Self::default();
        constraints.avoid_nodes.insert(node_id.into());
        constraints
    }

    /// Avoid a single link
    pub fn avoiding_link(key: LinkKey) -> Self {
        let mut constraints = Self::default();
        constraints.avoid_links.insert(key);
        constraints
    }
}

/// Result of a k-disjoint search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisjointPaths {
    /// Paths ordered by (latency, hop count)
    pub paths: Vec<Path>,
    /// Number of paths requested
    pub requested: usize,
    /// Fewer than `requested` paths exist
    pub degraded: bool,
    /// The relaxation budget ran out before the search finished
    pub budget_exhausted: bool,
}

impl DisjointPaths {
    /// Lowest-latency path
    pub fn primary(&self) -> Option<&Path> {
        self.paths.first()
    }

    /// Failover paths after the primary
    pub fn backups(&self) -> &[Path] {
        if self.paths.is_empty() {
            &[]
        } else {
            &self.paths[1..]
        }
    }
}

#[derive(Debug, PartialEq)]
struct QueueEntry {
    cost: f64,
    node: NodeId,
}

impl Eq for QueueEntry {}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed for a min-heap; ties go to the lowest node id
        other
            .cost
            .total_cmp(&self.cost)
            .then_with(|| other.node.cmp(&self.node))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

enum SearchOutcome {
    Found(Path),
    Unreachable,
    BudgetExhausted,
}

/// Compute up to `k` paths from `source` to `destination` that share no
/// intermediate node and no edge.
///
/// Intermediates must be `Active` with a valid identity; links must be up.
/// `Bad` links are usable but carry a heavy penalty.
pub fn compute_k_disjoint_paths(
    snapshot: &TopologySnapshot,
    source: &str,
    destination: &str,
    k: usize,
    constraints: &PathConstraints,
    budget: usize,
) -> MeshResult<DisjointPaths> {
    for endpoint in [source, destination] {
        if snapshot.node(endpoint).is_none() {
            return Err(MeshError::NodeNotFound {
                node_id: endpoint.to_string(),
            });
        }
    }

    if k == 0 {
        return Ok(DisjointPaths {
            paths: Vec::new(),
            requested: 0,
            degraded: false,
            budget_exhausted: false,
        });
    }

    if source == destination {
        return Ok(DisjointPaths {
            paths: vec![Path {
                nodes: vec![source.to_string()],
                latency_ms: 0.0,
                cost: 0.0,
            }],
            requested: k,
            degraded: false,
            budget_exhausted: false,
        });
    }

    let mut removed_nodes: BTreeSet<NodeId> = constraints.avoid_nodes.clone();
    removed_nodes.remove(source);
    removed_nodes.remove(destination);
    let mut removed_links: BTreeSet<LinkKey> = constraints.avoid_links.clone();
    let mut remaining = budget;
    let mut paths = Vec::new();
    let mut budget_exhausted = false;

    while paths.len() < k {
        match shortest_path(
            snapshot,
            source,
            destination,
            &removed_nodes,
            &removed_links,
            &mut remaining,
        ) {
            SearchOutcome::Found(path) => {
                removed_nodes.extend(path.internal_nodes().iter().cloned());
                removed_links.extend(path.links());
                paths.push(path);
            }
            SearchOutcome::Unreachable => break,
            SearchOutcome::BudgetExhausted => {
                budget_exhausted = true;
                break;
            }
        }
    }

    paths.sort_by(|a, b| {
        a.latency_ms
            .total_cmp(&b.latency_ms)
            .then_with(|| a.hops().cmp(&b.hops()))
            .then_with(|| a.nodes.cmp(&b.nodes))
    });

    let degraded = paths.len() < k;
    if degraded {
        debug!(
            source,
            destination,
            requested = k,
            found = paths.len(),
            budget_exhausted,
            "Insufficient disjoint paths"
        );
    }

    Ok(DisjointPaths {
        paths,
        requested: k,
        degraded,
        budget_exhausted,
    })
}

fn shortest_path(
    snapshot: &TopologySnapshot,
    source: &str,
    destination: &str,
    removed_nodes: &BTreeSet<NodeId>,
    removed_links: &BTreeSet<LinkKey>,
    remaining: &mut usize,
) -> SearchOutcome {
    let mut dist: HashMap<NodeId, f64> = HashMap::new();
    let mut prev: HashMap<NodeId, NodeId> = HashMap::new();
    let mut settled: BTreeSet<NodeId> = BTreeSet::new();
    let mut heap = BinaryHeap::new();

    dist.insert(source.to_string(), 0.0);
    heap.push(QueueEntry {
        cost: 0.0,
        node: source.to_string(),
    });

    while let Some(QueueEntry { cost, node }) = heap.pop() {
        if !settled.insert(node.clone()) {
            continue;
        }
        if node == destination {
            return SearchOutcome::Found(rebuild(snapshot, &prev, source, destination, cost));
        }

        for next in snapshot.up_neighbors(&node) {
            if settled.contains(next) {
                continue;
            }
            if *remaining == 0 {
                return SearchOutcome::BudgetExhausted;
            }
            *remaining -= 1;

            if next != destination {
                if removed_nodes.contains(next) {
                    continue;
                }
                match snapshot.node(next) {
                    Some(n) if n.can_forward() => {}
                    _ => continue,
                }
            }

            let link = match snapshot.link(&node, next) {
                Some(link) if link.up => link,
                _ => continue,
            };
            if removed_links.contains(&link.key) {
                continue;
            }

            let candidate = cost + link.weight();
            let better = dist
                .get(next)
                .map(|known| candidate < *known)
                .unwrap_or(true);
            if better {
                dist.insert(next.clone(), candidate);
                prev.insert(next.clone(), node.clone());
                heap.push(QueueEntry {
                    cost: candidate,
                    node: next.clone(),
                });
            }
        }
    }

    SearchOutcome::Unreachable
}

fn rebuild(
    snapshot: &TopologySnapshot,
    prev: &HashMap<NodeId, NodeId>,
    source: &str,
    destination: &str,
    cost: f64,
) -> Path {
    let mut nodes = vec![destination.to_string()];
    let mut cursor = destination;
    while cursor != source {
        match prev.get(cursor) {
            Some(p) => {
                nodes.push(p.clone());
                cursor = p.as_str();
            }
            None => break,
        }
    }
    nodes.reverse();

    let latency_ms = nodes
        .windows(2)
        .filter_map(|hop| snapshot.link(&hop[0], &hop[1]))
        .map(|link| link.latency_ms)
        .sum();

    Path {
        nodes,
        latency_ms,
        cost,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PathCacheKey {
    source: NodeId,
    destination: NodeId,
    k: usize,
    constraints: PathConstraints,
}

/// Memoized path results for a single snapshot version.
///
/// Any lookup against a different version drops every cached entry.
#[derive(Debug, Default)]
pub struct PathCache {
    version: u64,
    entries: HashMap<PathCacheKey, DisjointPaths>,
    hits: u64,
    misses: u64,
}

impl PathCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached result for the request, if computed against `version`
    pub fn get(
        &mut self,
        version: u64,
        source: &str,
        destination: &str,
        k: usize,
        constraints: &PathConstraints,
    ) -> Option<DisjointPaths> {
        self.sync_version(version);
        let key = PathCacheKey {
            source: source.to_string(),
            destination: destination.to_string(),
            k,
            constraints: constraints.clone(),
        };
        match self.entries.get(&key) {
            Some(found) => {
                self.hits += 1;
                Some(found.clone())
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Store a result computed against `version`
    pub fn insert(
        &mut self,
        version: u64,
        source: &str,
        destination: &str,
        k: usize,
        constraints: &PathConstraints,
        result: DisjointPaths,
    ) {
        self.sync_version(version);
        if self.entries.len() >= PATH_CACHE_CAPACITY {
            self.entries.clear();
        }
        self.entries.insert(
            PathCacheKey {
                source: source.to_string(),
                destination: destination.to_string(),
                k,
                constraints: constraints.clone(),
            },
            result,
        );
    }

    /// Any cached result between the endpoints, most paths first
    pub fn lookup_any(&self, source: &str, destination: &str) -> Option<&DisjointPaths> {
        self.entries
            .iter()
            .filter(|(key, _)| key.source == source && key.destination == destination)
            .map(|(_, value)| value)
            .max_by_key(|value| value.paths.len())
    }

    /// Version the cached entries belong to
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Number of cached entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// (hits, misses)
    pub fn counters(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }

    /// Drop every entry computed against a version other than `version`
    pub fn sync_version(&mut self, version: u64) {
        if version != self.version {
            self.entries.clear();
            self.version = version;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{NetworkNode, NodeState};
    use crate::routing::{Link, LinkMetrics};
    use meshheal_core::IdentityRef;
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    fn build(ids: &[&str], edges: &[(&str, &str, f64)]) -> TopologySnapshot {
        let nodes = ids
            .iter()
            .map(|id| (id.to_string(), NetworkNode::new(*id, IdentityRef::new(*id), true)))
            .collect();
        let links = edges
            .iter()
            .map(|(a, b, latency)| {
                let key = LinkKey::new(*a, *b).unwrap();
                (key.clone(), Link::new(key, LinkMetrics::new(0.0, *latency, 500.0)))
            })
            .collect();
        TopologySnapshot::from_parts(1, nodes, links, BTreeMap::new())
    }

    fn ring() -> TopologySnapshot {
        build(
            &["A", "B", "C", "D", "E"],
            &[
                ("A", "B", 5.0),
                ("B", "C", 5.0),
                ("C", "D", 5.0),
                ("D", "E", 5.0),
                ("E", "A", 5.0),
            ],
        )
    }

    fn names(path: &Path) -> Vec<&str> {
        path.nodes.iter().map(|s| s.as_str()).collect()
    }

    #[test]
    fn test_ring_yields_two_disjoint_paths() {
        let snap = ring();
        let result =
            compute_k_disjoint_paths(&snap, "B", "D", 3, &PathConstraints::default(), DEFAULT_PATH_BUDGET)
                .unwrap();
        assert_eq!(result.paths.len(), 2);
        assert!(result.degraded);
        assert!(!result.budget_exhausted);
        assert_eq!(names(&result.paths[0]), vec!["B", "C", "D"]);
        assert_eq!(names(&result.paths[1]), vec!["B", "A", "E", "D"]);
    }

    #[test]
    fn test_avoided_node_is_bypassed() {
        let snap = ring();
        let result = compute_k_disjoint_paths(
            &snap,
            "B",
            "D",
            3,
            &PathConstraints::avoiding_node("C"),
            DEFAULT_PATH_BUDGET,
        )
        .unwrap();
        assert_eq!(result.paths.len(), 1);
        assert_eq!(names(&result.paths[0]), vec!["B", "A", "E", "D"]);
    }

    #[test]
    fn test_inactive_and_invalid_nodes_are_not_intermediates() {
        let mut snap = ring();
        snap.nodes.get_mut("C").unwrap().state = NodeState::Unreachable;
        snap.nodes.get_mut("A").unwrap().identity_valid = false;
        let result =
            compute_k_disjoint_paths(&snap, "B", "D", 2, &PathConstraints::default(), DEFAULT_PATH_BUDGET)
                .unwrap();
        assert!(result.paths.is_empty());
        assert!(result.degraded);
    }

    #[test]
    fn test_direct_edge_is_not_reused() {
        let snap = build(&["A", "B"], &[("A", "B", 1.0)]);
        let result =
            compute_k_disjoint_paths(&snap, "A", "B", 2, &PathConstraints::default(), DEFAULT_PATH_BUDGET)
                .unwrap();
        assert_eq!(result.paths.len(), 1);
        assert!(result.degraded);
    }

    #[test]
    fn test_tie_breaks_on_lowest_node_id() {
        let snap = build(
            &["S", "X", "Y", "T"],
            &[("S", "X", 5.0), ("X", "T", 5.0), ("S", "Y", 5.0), ("Y", "T", 5.0)],
        );
        let result =
            compute_k_disjoint_paths(&snap, "S", "T", 1, &PathConstraints::default(), DEFAULT_PATH_BUDGET)
                .unwrap();
        assert_eq!(names(&result.paths[0]), vec!["S", "X", "T"]);
    }

    #[test]
    fn test_budget_exhaustion_is_reported() {
        let snap = ring();
        let result = compute_k_disjoint_paths(&snap, "B", "D", 3, &PathConstraints::default(), 1).unwrap();
        assert!(result.budget_exhausted);
        assert!(result.degraded);
    }

    #[test]
    fn test_same_endpoints_and_unknown_nodes() {
        let snap = ring();
        let trivial =
            compute_k_disjoint_paths(&snap, "A", "A", 3, &PathConstraints::default(), DEFAULT_PATH_BUDGET)
                .unwrap();
        assert_eq!(trivial.paths.len(), 1);
        assert_eq!(trivial.paths[0].hops(), 0);

        let missing =
            compute_k_disjoint_paths(&snap, "A", "Z", 3, &PathConstraints::default(), DEFAULT_PATH_BUDGET);
        assert!(matches!(missing, Err(MeshError::NodeNotFound { .. })));
    }

    #[test]
    fn test_cache_rolls_on_version_change() {
        let snap = ring();
        let constraints = PathConstraints::default();
        let result =
            compute_k_disjoint_paths(&snap, "B", "D", 3, &constraints, DEFAULT_PATH_BUDGET).unwrap();

        let mut cache = PathCache::new();
        cache.insert(1, "B", "D", 3, &constraints, result.clone());
        assert_eq!(cache.get(1, "B", "D", 3, &constraints), Some(result));
        assert!(cache.get(2, "B", "D", 3, &constraints).is_none());
        assert!(cache.is_empty());
        assert_eq!(cache.counters(), (1, 1));
    }

    fn arbitrary_graph() -> impl Strategy<Value = (usize, Vec<(usize, usize, u8)>)> {
        (3usize..9).prop_flat_map(|n| {
            let edges = proptest::collection::vec((0..n, 0..n, 1u8..50), 0..(n * 3));
            (Just(n), edges)
        })
    }

    proptest! {
        #[test]
        fn prop_paths_are_vertex_disjoint((n, edges) in arbitrary_graph(), k in 1usize..5) {
            let ids: Vec<String> = (0..n).map(|i| format!("n{}", i)).collect();
            let nodes = ids
                .iter()
                .map(|id| (id.clone(), NetworkNode::new(id.clone(), IdentityRef::new(id.clone()), true)))
                .collect();
            let mut links = BTreeMap::new();
            for (a, b, latency) in edges {
                if let Ok(key) = LinkKey::new(ids[a].clone(), ids[b].clone()) {
                    links.insert(key.clone(), Link::new(key, LinkMetrics::new(0.0, latency as f64, 500.0)));
                }
            }
            let snap = TopologySnapshot::from_parts(1, nodes, links, BTreeMap::new());

            let result = compute_k_disjoint_paths(
                &snap, &ids[0], &ids[n - 1], k, &PathConstraints::default(), DEFAULT_PATH_BUDGET,
            ).unwrap();

            prop_assert!(result.paths.len() <= k);
            let mut seen_internal = BTreeSet::new();
            let mut seen_links = BTreeSet::new();
            for path in &result.paths {
                prop_assert!(snap.contains_path(&path.nodes));
                prop_assert_eq!(path.nodes.first(), Some(&ids[0]));
                prop_assert_eq!(path.nodes.last(), Some(&ids[n - 1]));
                for node in path.internal_nodes() {
                    prop_assert!(seen_internal.insert(node.clone()));
                }
                for link in path.links() {
                    prop_assert!(seen_links.insert(link));
                }
            }
            for pair in result.paths.windows(2) {
                prop_assert!(pair[0].latency_ms <= pair[1].latency_ms);
            }
        }
    }
}
