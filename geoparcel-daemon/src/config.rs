//! Daemon configuration

use clap::Parser;
use geoparcel_sync::{ReconnectPolicy, SyncConfig, DEFAULT_EVENT_NAME, DEFAULT_WATERMARK_KEY};
use std::path::PathBuf;

/// Watermark state file name inside `--data-dir`.
pub const STATE_FILE: &str = "state.json";

/// Geoparcel sync daemon configuration
#[derive(Parser, Debug, Clone)]
#[command(name = "geoparcel-daemon")]
#[command(about = "Keeps a geohash parcel contour index in sync with a ledger")]
pub struct DaemonConfig {
    /// Ledger gateway base URL. Without it the daemon follows an empty
    /// in-memory ledger.
    #[arg(long, env = "GEOPARCEL_LEDGER_URL")]
    pub ledger_url: Option<String>,

    /// Bearer token for the ledger gateway
    #[arg(long, env = "GEOPARCEL_LEDGER_TOKEN", hide_env_values = true)]
    pub ledger_token: Option<String>,

    /// Ledger event carrying contour changes
    #[arg(long, env = "GEOPARCEL_EVENT_NAME", default_value = DEFAULT_EVENT_NAME)]
    pub event_name: String,

    /// Key under which the applied-block watermark is stored
    #[arg(long, env = "GEOPARCEL_WATERMARK_KEY", default_value = DEFAULT_WATERMARK_KEY)]
    pub watermark_key: String,

    /// Directory for file-backed contour and state storage (in-memory if unset)
    #[arg(long, env = "GEOPARCEL_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Live feed polling interval in ms for the HTTP gateway
    #[arg(long, env = "GEOPARCEL_POLL_INTERVAL_MS", default_value = "2000")]
    pub poll_interval_ms: u64,

    /// Initial reconnect delay in ms
    #[arg(long, env = "GEOPARCEL_RECONNECT_INITIAL_MS", default_value = "1000")]
    pub reconnect_initial_ms: u64,

    /// Maximum reconnect delay in ms; equal to the initial delay for a fixed schedule
    #[arg(long, env = "GEOPARCEL_RECONNECT_MAX_MS", default_value = "1000")]
    pub reconnect_max_ms: u64,

    /// Add random jitter to reconnect delays
    #[arg(long, env = "GEOPARCEL_RECONNECT_JITTER")]
    pub reconnect_jitter: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "GEOPARCEL_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Config file path (defaults to ./geoparcel.toml when present)
    #[arg(long = "config", env = "GEOPARCEL_CONFIG")]
    pub config_file: Option<PathBuf>,
}

impl DaemonConfig {
    /// Validate configuration at startup
    pub fn validate(&self) -> Result<(), String> {
        if self.event_name.trim().is_empty() {
            return Err("event_name must not be empty".to_string());
        }
        if self.watermark_key.trim().is_empty() {
            return Err("watermark_key must not be empty".to_string());
        }
        if self.poll_interval_ms == 0 {
            return Err("poll_interval_ms must be greater than 0".to_string());
        }
        if let Some(ref url) = self.ledger_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(format!("ledger_url must be an http(s) URL, got {:?}", url));
            }
        }
        Ok(())
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            base_ms: self.reconnect_initial_ms,
            max_ms: self.reconnect_max_ms.max(self.reconnect_initial_ms),
            jitter: self.reconnect_jitter,
        }
    }

    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig::default()
            .with_event_name(self.event_name.clone())
            .with_watermark_key(self.watermark_key.clone())
            .with_reconnect(self.reconnect_policy())
            .with_poll_interval_ms(self.poll_interval_ms)
    }

    pub fn storage_type_str(&self) -> &'static str {
        if self.data_dir.is_some() {
            "file"
        } else {
            "memory"
        }
    }

    /// State file holding the watermark, when file-backed.
    pub fn state_path(&self) -> Option<PathBuf> {
        self.data_dir.as_deref().map(|dir| dir.join(STATE_FILE))
    }
}
