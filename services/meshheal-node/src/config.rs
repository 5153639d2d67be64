use anyhow::{bail, Context};
use meshheal_core::{HealingConfig, IdentityRef, LogFormat, NodeId};
use meshheal_mesh::{FlowKey, LinkMetrics, Route, TopologyEvent};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct SeedNode {
    pub id: NodeId,
    #[serde(default)]
    pub identity: Option<String>,
    #[serde(default = "default_true")]
    pub identity_valid: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedLink {
    pub a: NodeId,
    pub b: NodeId,
    #[serde(default)]
    pub loss_pct: f64,
    pub latency_ms: f64,
    pub throughput_mbps: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedRoute {
    pub path: Vec<NodeId>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_format: LogFormat,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    pub telemetry_file: PathBuf,
    #[serde(default)]
    pub healing: HealingConfig,
    #[serde(default)]
    pub nodes: Vec<SeedNode>,
    #[serde(default)]
    pub links: Vec<SeedLink>,
    #[serde(default)]
    pub routes: Vec<SeedRoute>,
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_http_port() -> u16 {
    9464
}

impl NodeConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> anyhow::Result<Self> {
        let config: NodeConfig = toml::from_str(raw).context("parsing node config")?;
        config.healing.validate()?;
        for route in &config.routes {
            if route.path.len() < 2 {
                bail!("route {:?} needs at least two nodes", route.path);
            }
        }
        Ok(config)
    }

    /// Topology events that build the seed partition
    pub fn seed_events(&self) -> Vec<TopologyEvent> {
        let nodes = self.nodes.iter().map(|n| TopologyEvent::NodeJoin {
            id: n.id.clone(),
            identity: IdentityRef::new(n.identity.clone().unwrap_or_else(|| n.id.clone())),
            identity_valid: n.identity_valid,
        });
        let links = self.links.iter().map(|l| TopologyEvent::LinkUp {
            a: l.a.clone(),
            b: l.b.clone(),
            metrics: LinkMetrics::new(l.loss_pct, l.latency_ms, l.throughput_mbps),
        });
        let routes = self.routes.iter().filter_map(|r| {
            let (source, destination) = (r.path.first()?, r.path.last()?);
            Some(TopologyEvent::RouteInstalled {
                route: Route::new(FlowKey::new(source.clone(), destination.clone()), r.path.clone()),
            })
        });
        nodes.chain(links).chain(routes).collect()
    }
}
