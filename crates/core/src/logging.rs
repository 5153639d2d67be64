//! Structured logging infrastructure for MeshHeal.
//!
//! Centralized subscriber initialization with plain or JSON output and
//! `RUST_LOG`-based filtering.

use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Output format of the log subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Plain,
    /// One JSON object per event, for log aggregation
    Json,
}

fn filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Initialize the logging system with structured output.
///
/// Log level can be configured via the `RUST_LOG` environment variable.
/// If not set, defaults to `info` level.
///
/// # Example
/// ```no_run
/// use meshheal_core::logging;
///
/// logging::init();
/// tracing::info!("Control loop started");
/// ```
pub fn init() {
    init_with(LogFormat::Plain, "info");
}

/// Initialize the logging system with JSON output for production environments.
pub fn init_json() {
    init_with(LogFormat::Json, "info");
}

/// Initialize with an explicit format and fallback level.
///
/// Returns `false` when a global subscriber was already installed, which makes
/// the call safe from tests that share a process.
pub fn init_with(format: LogFormat, default_level: &str) -> bool {
    let registry = tracing_subscriber::registry().with(filter(default_level));
    match format {
        LogFormat::Plain => registry
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .try_init()
            .is_ok(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(true))
            .try_init()
            .is_ok(),
    }
}
