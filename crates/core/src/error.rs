//! Core error types

use thiserror::Error;

/// Core error type for MeshHeal
#[derive(Debug, Error)]
pub enum CoreError {
    /// Generic error
    #[error("Core error: {0}")]
    Generic(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file could not be parsed
    #[cfg(feature = "toml")]
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Configuration value out of range or inconsistent
    #[error("Invalid configuration: {field}: {reason}")]
    InvalidConfig {
        /// Offending field (dotted path)
        field: String,
        /// Why the value was rejected
        reason: String,
    },

    /// Telemetry payload could not be decoded
    #[error("Telemetry decode error: {0}")]
    TelemetryDecode(#[from] serde_json::Error),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
