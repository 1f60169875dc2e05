//! Geoparcel sync daemon
//!
//! Wires a ledger event source, the geohash contour index and the sync
//! controller into one long-running process.
//!
//! # Example
//!
//! ```ignore
//! use geoparcel_daemon::{DaemonConfig, GeoparcelDaemon};
//! use clap::Parser;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = DaemonConfig::parse();
//!     let daemon = GeoparcelDaemon::new(config).await.unwrap();
//!     daemon.run().await.unwrap();
//! }
//! ```

pub mod config;
pub mod config_file;
pub mod error;
pub mod telemetry;

pub use config::DaemonConfig;
pub use error::{DaemonError, Result};
pub use telemetry::{init_logging, TelemetryConfig};

use geoparcel_spatial::{ContourStore, FileContourStore, GeohashIndexer, MemoryContourStore};
use geoparcel_sync::{
    FileKvStore, HttpLedgerConnector, KvStore, LedgerConnector, LedgerEventSource, MemoryKvStore,
    MemoryLedger, SyncController, SyncReport,
};
use std::future::Future;
use std::sync::Arc;
use tracing::{error, info, warn};

/// The assembled daemon
#[derive(Debug)]
pub struct GeoparcelDaemon {
    config: DaemonConfig,
    store: Arc<dyn ContourStore>,
    controller: SyncController,
}

impl GeoparcelDaemon {
    /// Build the daemon with the connector implied by `config.ledger_url`.
    pub async fn new(config: DaemonConfig) -> Result<Self> {
        let connector: Arc<dyn LedgerConnector> = match config.ledger_url {
            Some(ref url) => Arc::new(
                HttpLedgerConnector::new(url.clone(), config.ledger_token.clone())
                    .with_poll_interval(config.sync_config().poll_interval()),
            ),
            None => {
                warn!("No ledger URL configured, following an empty in-memory ledger");
                Arc::new(MemoryLedger::new())
            }
        };
        Self::with_connector(config, connector).await
    }

    /// Build the daemon around an explicit ledger connector.
    ///
    /// Blocks until the first ledger connection is established.
    pub async fn with_connector(
        config: DaemonConfig,
        connector: Arc<dyn LedgerConnector>,
    ) -> Result<Self> {
        config.validate().map_err(DaemonError::Config)?;

        let storage = (config.data_dir.as_deref(), config.state_path());
        let (store, kv): (Arc<dyn ContourStore>, Arc<dyn KvStore>) = match storage {
            (Some(dir), Some(state_path)) => {
                let store = FileContourStore::open(dir).await?;
                info!(path = %dir.display(), "Using file-backed storage");
                let kv = FileKvStore::open(&state_path).await?;
                (Arc::new(store), Arc::new(kv))
            }
            _ => (
                Arc::new(MemoryContourStore::new()),
                Arc::new(MemoryKvStore::new()),
            ),
        };

        let sync_config = config.sync_config();
        let source = LedgerEventSource::connect(connector, sync_config.reconnect).await;
        let indexer = Arc::new(GeohashIndexer::new(store.clone()));
        let controller = SyncController::new(source, indexer, kv, sync_config);

        Ok(Self {
            config,
            store,
            controller,
        })
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    pub fn controller(&self) -> &SyncController {
        &self.controller
    }

    /// Contour store backing the index, for read-side consumers.
    pub fn store(&self) -> &Arc<dyn ContourStore> {
        &self.store
    }

    /// Sync until Ctrl-C.
    pub async fn run(self) -> Result<SyncReport> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Sync until `shutdown` resolves or the controller halts by itself.
    pub async fn run_until<F>(self, shutdown: F) -> Result<SyncReport>
    where
        F: Future<Output = ()>,
    {
        let caught_up = self.controller.start().await?;
        info!(
            applied = caught_up.applied,
            skipped = caught_up.skipped,
            watermark = caught_up.watermark,
            "Catch-up complete"
        );

        tokio::select! {
            _ = shutdown => {
                info!("Shutdown requested");
                self.controller.stop();
            }
            _ = self.controller.stopped() => {
                error!("Sync halted");
                return Err(DaemonError::Halted);
            }
        }

        let live = self.controller.report().await?;
        info!(
            applied = live.applied,
            skipped = live.skipped,
            watermark = live.watermark,
            "Sync stopped"
        );
        Ok(SyncReport {
            applied: caught_up.applied + live.applied,
            skipped: caught_up.skipped + live.skipped,
            watermark: live.watermark,
        })
    }
}
