//! Geoparcel sync daemon CLI
//!
//! Run with: `cargo run -p geoparcel-daemon -- --help`

use clap::{CommandFactory, FromArgMatches};
use geoparcel_daemon::{
    config_file::load_and_merge_config,
    telemetry::{init_logging, TelemetryConfig},
    DaemonConfig, GeoparcelDaemon,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Parse CLI + env via clap (typed config and raw matches)
    let matches = DaemonConfig::command().get_matches();
    let mut config = DaemonConfig::from_arg_matches(&matches)?;

    // 2. Merge the config file where CLI/env left defaults
    let merged = load_and_merge_config(&mut config, &matches);

    let telemetry_config = TelemetryConfig::with_daemon_config(&config);
    init_logging(&telemetry_config);

    if let Err(e) = merged {
        tracing::warn!(error = %e, "Ignoring config file");
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        storage = config.storage_type_str(),
        ledger = config.ledger_url.as_deref().unwrap_or("memory"),
        event = %config.event_name,
        log_format = ?telemetry_config.log_format,
        "Starting geoparcel daemon"
    );

    let daemon = GeoparcelDaemon::new(config).await?;
    daemon.run().await?;
    Ok(())
}
