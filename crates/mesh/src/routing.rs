//! Link classification and route records
//!
//! Links are classified into quality tiers from loss, latency and throughput.
//! The tier feeds both the Dijkstra edge weight and operator-facing stats.

use crate::error::{MeshError, MeshResult};
use meshheal_core::NodeId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Link quality tier, best first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LinkQuality {
    /// loss < 0.1% and latency < 10ms and throughput > 100Mbps
    Excellent,
    /// loss < 0.5% and latency < 50ms and throughput > 50Mbps
    Good,
    /// loss < 1% and latency < 100ms and throughput > 10Mbps
    Fair,
    /// Anything between Fair and Bad
    Poor,
    /// loss >= 5% or latency >= 200ms
    Bad,
}

impl LinkQuality {
    /// Numeric rank (5 = Excellent, 1 = Bad)
    pub fn rank(&self) -> u8 {
        match self {
            LinkQuality::Excellent => 5,
            LinkQuality::Good => 4,
            LinkQuality::Fair => 3,
            LinkQuality::Poor => 2,
            LinkQuality::Bad => 1,
        }
    }

    /// Additive routing penalty in milliseconds
    pub fn penalty_ms(&self) -> f64 {
        match self {
            LinkQuality::Excellent => 0.0,
            LinkQuality::Good => 5.0,
            LinkQuality::Fair => 20.0,
            LinkQuality::Poor => 50.0,
            LinkQuality::Bad => 200.0,
        }
    }
}

impl fmt::Display for LinkQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LinkQuality::Excellent => "EXCELLENT",
            LinkQuality::Good => "GOOD",
            LinkQuality::Fair => "FAIR",
            LinkQuality::Poor => "POOR",
            LinkQuality::Bad => "BAD",
        };
        f.write_str(name)
    }
}

/// Raw link measurements
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinkMetrics {
    /// Packet loss percentage (0-100)
    pub loss_pct: f64,
    /// Latency in milliseconds
    pub latency_ms: f64,
    /// Throughput in Mbit/s
    pub throughput_mbps: f64,
}

impl LinkMetrics {
    /// Create link metrics
    pub fn new(loss_pct: f64, latency_ms: f64, throughput_mbps: f64) -> Self {
        Self {
            loss_pct,
            latency_ms,
            throughput_mbps,
        }
    }
}

/// Classify a link into a quality tier.
///
/// Pure function of its input: identical metrics always yield the same tier.
/// Non-finite measurements classify as `Bad`.
pub fn classify_link(metrics: &LinkMetrics) -> LinkQuality {
    let LinkMetrics {
        loss_pct: loss,
        latency_ms: latency,
        throughput_mbps: throughput,
    } = *metrics;

    if !loss.is_finite() || !latency.is_finite() || !throughput.is_finite() {
        return LinkQuality::Bad;
    }
    if loss >= 5.0 || latency >= 200.0 {
        return LinkQuality::Bad;
    }
    if loss < 0.1 && latency < 10.0 && throughput > 100.0 {
        LinkQuality::Excellent
    } else if loss < 0.5 && latency < 50.0 && throughput > 50.0 {
        LinkQuality::Good
    } else if loss < 1.0 && latency < 100.0 && throughput > 10.0 {
        LinkQuality::Fair
    } else {
        LinkQuality::Poor
    }
}

/// Unordered link endpoint pair, normalized so `a < b`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LinkKey {
    /// Lower endpoint id
    pub a: NodeId,
    /// Higher endpoint id
    pub b: NodeId,
}

impl LinkKey {
    /// Build a normalized key; self loops are rejected
    pub fn new(x: impl Into<NodeId>, y: impl Into<NodeId>) -> MeshResult<Self> {
        let (x, y) = (x.into(), y.into());
        if x == y {
            return Err(MeshError::InvalidLink(format!("self loop on {}", x)));
        }
        Ok(if x < y { Self { a: x, b: y } } else { Self { a: y, b: x } })
    }

    /// Check whether the node is an endpoint
    pub fn touches(&self, node_id: &str) -> bool {
        self.a == node_id || self.b == node_id
    }

    /// The opposite endpoint, if `node_id` is one of the endpoints
    pub fn other(&self, node_id: &str) -> Option<&NodeId> {
        if self.a == node_id {
            Some(&self.b)
        } else if self.b == node_id {
            Some(&self.a)
        } else {
            None
        }
    }
}

impl fmt::Display for LinkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}<->{}", self.a, self.b)
    }
}

/// Link between two nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    /// Endpoints
    pub key: LinkKey,
    /// Classified quality tier
    pub quality: LinkQuality,
    /// Latency in milliseconds
    pub latency_ms: f64,
    /// Packet loss percentage
    pub loss_pct: f64,
    /// Bandwidth in Mbit/s
    pub bandwidth_mbps: f64,
    /// Whether the link is currently up
    pub up: bool,
}

impl Link {
    /// Create an up link classified from its metrics
    pub fn new(key: LinkKey, metrics: LinkMetrics) -> Self {
        Self {
            key,
            quality: classify_link(&metrics),
            latency_ms: metrics.latency_ms,
            loss_pct: metrics.loss_pct,
            bandwidth_mbps: metrics.throughput_mbps,
            up: true,
        }
    }

    /// Current measurements
    pub fn metrics(&self) -> LinkMetrics {
        LinkMetrics::new(self.loss_pct, self.latency_ms, self.bandwidth_mbps)
    }

    /// Dijkstra edge weight (lower is better)
    pub fn weight(&self) -> f64 {
        let latency = if self.latency_ms.is_finite() {
            self.latency_ms.max(0.0)
        } else {
            1_000.0
        };
        let loss = if self.loss_pct.is_finite() {
            self.loss_pct.max(0.0)
        } else {
            100.0
        };
        latency + self.quality.penalty_ms() + loss * 10.0
    }
}

/// Directed flow between two endpoints
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FlowKey {
    /// Flow source
    pub source: NodeId,
    /// Flow destination
    pub destination: NodeId,
}

impl FlowKey {
    /// Create a flow key
    pub fn new(source: impl Into<NodeId>, destination: impl Into<NodeId>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
        }
    }
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.source, self.destination)
    }
}

/// Active forwarding route for a flow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    /// Flow served by this route
    pub flow: FlowKey,
    /// Hop-by-hop node sequence, source first
    pub path: Vec<NodeId>,
    /// Pre-computed failover paths
    #[serde(default)]
    pub backups: Vec<Vec<NodeId>>,
}

impl Route {
    /// Create a route without backups
    pub fn new(flow: FlowKey, path: Vec<NodeId>) -> Self {
        Self {
            flow,
            path,
            backups: Vec::new(),
        }
    }

    /// Check whether the route forwards through the node (endpoints included)
    pub fn traverses_node(&self, node_id: &str) -> bool {
        self.path.iter().any(|n| n == node_id)
    }

    /// Check whether the route uses the link
    pub fn traverses_link(&self, key: &LinkKey) -> bool {
        path_links(&self.path).iter().any(|k| k == key)
    }

    /// Next hop from the source, if any
    pub fn next_hop(&self) -> Option<&NodeId> {
        self.path.get(1)
    }
}

/// Consecutive link keys of a node path (self loops skipped)
pub fn path_links(path: &[NodeId]) -> Vec<LinkKey> {
    path.windows(2)
        .filter_map(|pair| LinkKey::new(pair[0].clone(), pair[1].clone()).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_classify_tiers() {
        assert_eq!(classify_link(&LinkMetrics::new(0.05, 5.0, 500.0)), LinkQuality::Excellent);
        assert_eq!(classify_link(&LinkMetrics::new(0.3, 30.0, 80.0)), LinkQuality::Good);
        assert_eq!(classify_link(&LinkMetrics::new(0.8, 90.0, 20.0)), LinkQuality::Fair);
        assert_eq!(classify_link(&LinkMetrics::new(2.0, 150.0, 5.0)), LinkQuality::Poor);
        assert_eq!(classify_link(&LinkMetrics::new(5.0, 5.0, 500.0)), LinkQuality::Bad);
        assert_eq!(classify_link(&LinkMetrics::new(0.0, 200.0, 500.0)), LinkQuality::Bad);
    }

    #[test]
    fn test_classify_boundaries_are_exclusive() {
        // Exactly 0.1% loss is no longer excellent
        assert_eq!(classify_link(&LinkMetrics::new(0.1, 5.0, 500.0)), LinkQuality::Good);
        // Exactly 100 Mbps is not "more than 100"
        assert_eq!(classify_link(&LinkMetrics::new(0.0, 5.0, 100.0)), LinkQuality::Good);
    }

    #[test]
    fn test_classify_non_finite_is_bad() {
        assert_eq!(classify_link(&LinkMetrics::new(f64::NAN, 5.0, 500.0)), LinkQuality::Bad);
        assert_eq!(
            classify_link(&LinkMetrics::new(0.0, f64::INFINITY, 500.0)),
            LinkQuality::Bad
        );
    }

    #[test]
    fn test_link_key_normalizes_order() {
        let k1 = LinkKey::new("b", "a").unwrap();
        let k2 = LinkKey::new("a", "b").unwrap();
        assert_eq!(k1, k2);
        assert_eq!(k1.a, "a");
        assert_eq!(k1.other("a").unwrap(), "b");
        assert!(k1.other("c").is_none());
    }

    #[test]
    fn test_reject_self_loop() {
        assert!(matches!(LinkKey::new("a", "a"), Err(MeshError::InvalidLink(_))));
    }

    #[test]
    fn test_weight_prefers_better_links() {
        let good = Link::new(LinkKey::new("a", "b").unwrap(), LinkMetrics::new(0.0, 5.0, 500.0));
        let bad = Link::new(LinkKey::new("a", "c").unwrap(), LinkMetrics::new(6.0, 5.0, 500.0));
        assert!(good.weight() < bad.weight());
    }

    #[test]
    fn test_route_traversal() {
        let route = Route::new(
            FlowKey::new("a", "c"),
            vec!["a".to_string(), "b".to_string(), "c".to_string()],
        );
        assert!(route.traverses_node("b"));
        assert!(route.traverses_link(&LinkKey::new("c", "b").unwrap()));
        assert!(!route.traverses_link(&LinkKey::new("a", "c").unwrap()));
        assert_eq!(route.next_hop().unwrap(), "b");
    }

    proptest! {
        #[test]
        fn prop_classification_is_idempotent(
            loss in prop_oneof![0.0f64..10.0, Just(f64::NAN)],
            latency in 0.0f64..400.0,
            throughput in 0.0f64..1000.0,
        ) {
            let metrics = LinkMetrics::new(loss, latency, throughput);
            let first = classify_link(&metrics);
            prop_assert_eq!(first, classify_link(&metrics));

            // Rebuilding a link from its own metrics keeps its tier
            let link = Link::new(LinkKey::new("x", "y").unwrap(), metrics);
            prop_assert_eq!(classify_link(&link.metrics()), link.quality);
        }
    }
}
