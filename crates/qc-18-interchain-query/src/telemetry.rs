//! Structured logging setup.
//!
//! `RUST_LOG` wins over the configured level when set.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Logging configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Default filter directive, e.g. `info` or `qc_18_interchain_query=debug`.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl LogConfig {
    /// Verbose, human-readable logging for tests.
    pub fn for_testing() -> Self {
        Self {
            level: "qc_18_interchain_query=debug".to_string(),
            json: false,
        }
    }
}

/// Errors from logging setup.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Filter directive did not parse.
    #[error("Invalid log filter: {0}")]
    InvalidFilter(String),
    /// A global subscriber is already installed.
    #[error("Subscriber init failed: {0}")]
    Init(String),
}

/// Install the global `tracing` subscriber.
pub fn init_tracing(config: &LogConfig) -> Result<(), TelemetryError> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| TelemetryError::InvalidFilter(e.to_string()))?;

    let fmt_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_ansi(true)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| TelemetryError::Init(e.to_string()))?;

    tracing::info!(level = %config.level, json = config.json, "Tracing initialized");
    Ok(())
}
