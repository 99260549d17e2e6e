//! Logging configuration.
//!
//! The client logs through `tracing`; this module wires up a subscriber
//! with either pretty-print or JSON-ish output.
//!
//! ```rust,no_run
//! use kafka7::telemetry::{init_logging, LogFormat};
//!
//! init_logging(LogFormat::from_env()).expect("failed to init logging");
//! ```
//!
//! # Environment Variables
//!
//! - `LOG_FORMAT`: set to `json` or `pretty` (default: `pretty`)
//! - `RUST_LOG`: control log levels (default: `info`)

use tracing_subscriber::prelude::*;

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable pretty-print format (default).
    #[default]
    Pretty,
    /// JSON format for log aggregators.
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_lowercase().as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Pretty,
        })
    }
}

impl LogFormat {
    /// Read from the `LOG_FORMAT` environment variable.
    pub fn from_env() -> Self {
        std::env::var("LOG_FORMAT")
            .map(|s| s.parse().unwrap_or_default())
            .unwrap_or_default()
    }
}

/// Initialize logging with the specified format.
///
/// Log levels are controlled via the `RUST_LOG` environment variable.
/// True JSON output requires the `json` feature on `tracing-subscriber`;
/// without it the JSON request falls back to the pretty format with a
/// warning.
pub fn init_logging(format: LogFormat) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    if format == LogFormat::Json {
        tracing::warn!("JSON logging requested but json feature not enabled, using pretty format");
    }

    Ok(())
}
