//! Logging setup
//!
//! Level filtering comes from `RUST_LOG` when set, otherwise `LOG_LEVEL`,
//! otherwise the configured `--log-level`. `LOG_FORMAT=json` selects the
//! compact single-line format.

use crate::config::DaemonConfig;
use std::env;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Telemetry configuration
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Primary log filter (RUST_LOG env var)
    pub log_filter: String,
    /// Fallback log level if RUST_LOG not set
    pub default_level: String,
    /// Log format ("human" or "json")
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Human,
    Json,
}

impl LogFormat {
    fn parse(raw: &str) -> Self {
        match raw.to_lowercase().as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Human,
        }
    }
}

impl TelemetryConfig {
    /// Build from the process environment with the daemon's configured level
    /// as the last fallback.
    pub fn with_daemon_config(config: &DaemonConfig) -> Self {
        Self::resolve(
            env::var("RUST_LOG").ok(),
            env::var("LOG_LEVEL").ok(),
            env::var("LOG_FORMAT").ok(),
            &config.log_level,
        )
    }

    /// Resolve settings from explicit environment values.
    pub fn resolve(
        rust_log: Option<String>,
        log_level: Option<String>,
        log_format: Option<String>,
        configured_level: &str,
    ) -> Self {
        let log_filter = rust_log.unwrap_or_default();
        let default_level = log_level
            .filter(|level| !level.trim().is_empty())
            .unwrap_or_else(|| configured_level.to_string());
        Self {
            log_filter,
            default_level,
            log_format: LogFormat::parse(&log_format.unwrap_or_default()),
        }
    }

    /// Filter directive actually used.
    pub fn filter_directive(&self) -> &str {
        if self.log_filter.trim().is_empty() {
            &self.default_level
        } else {
            &self.log_filter
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self::resolve(
            env::var("RUST_LOG").ok(),
            env::var("LOG_LEVEL").ok(),
            env::var("LOG_FORMAT").ok(),
            "info",
        )
    }
}

/// Initialize logging.
///
/// Safe to call multiple times - will only initialize once.
pub fn init_logging(config: &TelemetryConfig) {
    // A global subscriber may already be set (e.g., from tests)
    if tracing::dispatcher::has_been_set() {
        tracing::debug!("tracing subscriber already initialized, skipping");
        return;
    }

    let filter = EnvFilter::new(config.filter_directive());

    let fmt_layer = match config.log_format {
        // `tracing-subscriber` JSON output needs its `json` feature; compact
        // single-line records serve log shippers well enough.
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .compact()
            .with_ansi(false)
            .boxed(),
        LogFormat::Human => tracing_subscriber::fmt::layer().with_target(true).boxed(),
    };

    // try_init: another thread may have won the race since has_been_set()
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init();
}
