use anyhow::{bail, Context};
use axum::{extract::State, http::StatusCode, response::Json, routing::get, Router};
use meshheal_core::{current_timestamp_ms, logging, LogFormat};
use meshheal_healing::{
    Collaborators, ControlLoop, DryRunChannel, FileTelemetrySource, HealingMetrics, LoggingGovernance,
    SnapshotProbe,
};
use meshheal_mesh::TopologyManager;
use serde::Serialize;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

mod config;

use config::NodeConfig;

const NODE_PROTOCOL_VERSION: u32 = 1;
const NODE_RUNTIME_VERSION: u32 = 1;

#[derive(Debug, Serialize)]
struct NodeVersionHandshake {
    version: &'static str,
    runtime_version: u32,
    protocol_version: u32,
}

#[derive(Clone)]
struct AppState {
    partition_id: String,
    topology: Arc<TopologyManager>,
    metrics: HealingMetrics,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|arg| arg == "--version-json") {
        let handshake = NodeVersionHandshake {
            version: env!("CARGO_PKG_VERSION"),
            runtime_version: NODE_RUNTIME_VERSION,
            protocol_version: NODE_PROTOCOL_VERSION,
        };
        println!("{}", serde_json::to_string(&handshake)?);
        return Ok(());
    }

    let config_path = parse_config_path(&args)?;
    let config = NodeConfig::from_file(&config_path)?;
    let format = if args.iter().any(|arg| arg == "--json-logs") {
        LogFormat::Json
    } else {
        config.log_format
    };
    logging::init_with(format, &config.log_level);

    let topology = Arc::new(TopologyManager::with_path_budget(
        config.healing.planner.path_search_budget,
    ));
    let seed = topology
        .apply_batch(config.seed_events())
        .context("applying seed topology")?;
    info!(
        partition = %config.healing.control_loop.partition_id,
        nodes = seed.nodes.len(),
        routes = seed.routes.len(),
        "Seed topology loaded"
    );

    let collaborators = Collaborators {
        telemetry: Arc::new(FileTelemetrySource::new(config.telemetry_file.clone())),
        channel: Arc::new(DryRunChannel::simulating(topology.clone())),
        probe: Arc::new(SnapshotProbe::new(topology.clone())),
        governance: Arc::new(LoggingGovernance::silent()),
    };
    let control = ControlLoop::new(config.healing.clone(), topology.clone(), collaborators)?;

    let state = AppState {
        partition_id: config.healing.control_loop.partition_id.clone(),
        topology,
        metrics: control.metrics().clone(),
    };
    let app = Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(export_metrics))
        .with_state(state);

    let bind_addr = format!("0.0.0.0:{}", config.http_port);
    let listener = TcpListener::bind(&bind_addr).await?;
    info!("MeshHeal node listening on {}", bind_addr);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut server_shutdown = shutdown_rx.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = server_shutdown.changed().await;
            })
            .await
    });
    let control_task = tokio::spawn(control.run(shutdown_rx));

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");
    let _ = shutdown_tx.send(true);

    if let Err(e) = control_task.await? {
        error!(error = %e, "Control loop exited with error");
    }
    server.await??;
    Ok(())
}

async fn health_check(State(state): State<AppState>) -> Result<Json<Value>, StatusCode> {
    let stats = state.topology.stats();
    Ok(Json(json!({
        "status": "healthy",
        "service": "meshheal-node",
        "partition": state.partition_id,
        "topology_version": stats.version,
        "active_nodes": stats.active_nodes,
        "quarantined_nodes": stats.quarantined_nodes,
        "timestamp_ms": current_timestamp_ms(),
    })))
}

async fn export_metrics(State(state): State<AppState>) -> Result<String, StatusCode> {
    state.metrics.export().map_err(|e| {
        error!(error = %e, "Metrics export failed");
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

fn parse_config_path(args: &[String]) -> anyhow::Result<PathBuf> {
    let mut args_iter = args.iter();
    while let Some(arg) = args_iter.next() {
        if arg == "--config" {
            if let Some(path) = args_iter.next() {
                return Ok(PathBuf::from(path));
            }
            bail!("--config was provided without a path");
        }
    }

    bail!("missing required --config <path> argument")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config_path() {
        let args = vec!["meshheal-node".to_string(), "--config".to_string(), "node.toml".to_string()];
        assert_eq!(parse_config_path(&args).unwrap(), PathBuf::from("node.toml"));

        let missing = vec!["meshheal-node".to_string(), "--config".to_string()];
        assert!(parse_config_path(&missing).is_err());
        assert!(parse_config_path(&["meshheal-node".to_string()]).is_err());
    }
}
