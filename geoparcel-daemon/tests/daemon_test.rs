//! End-to-end daemon runs against file-backed storage.

use clap::Parser;
use geoparcel_daemon::{DaemonConfig, DaemonError, GeoparcelDaemon};
use geoparcel_spatial::{EntityId, SpatialQueryEngine};
use geoparcel_sync::MemoryLedger;
use std::path::Path;
use std::sync::Arc;

const EVENT: &str = "ContourChanged";
const PARCEL: [&str; 4] = ["w24q8r9pgd0p", "w24q8r3newq1", "w24q8r6pm9gc", "w24q8rf0q48p"];

fn file_config(dir: &Path) -> DaemonConfig {
    DaemonConfig::try_parse_from([
        "geoparcel-daemon",
        "--reconnect-initial-ms",
        "1",
        "--data-dir",
        dir.to_str().unwrap(),
    ])
    .unwrap()
}

#[tokio::test]
async fn restart_resumes_from_persisted_watermark() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = MemoryLedger::new();
    ledger.emit(EVENT, 10, "99", &PARCEL);

    let daemon = GeoparcelDaemon::with_connector(file_config(dir.path()), Arc::new(ledger.clone()))
        .await
        .unwrap();
    let first = daemon.run_until(async {}).await.unwrap();
    assert_eq!(first.applied, 1);
    assert_eq!(first.watermark, 10);
    assert!(dir.path().join("state.json").exists());

    // Clear the parcel while the daemon is down.
    ledger.emit(EVENT, 11, "99", &[]);

    let daemon = GeoparcelDaemon::with_connector(file_config(dir.path()), Arc::new(ledger.clone()))
        .await
        .unwrap();
    let engine = SpatialQueryEngine::new(daemon.store().clone());
    assert_eq!(
        engine.by_parent_prefix("w24q8r").await.unwrap()[0].entity_id,
        EntityId::from(99)
    );

    // Replay is inclusive of the stored block, so block 10 is applied again.
    let second = daemon.run_until(async {}).await.unwrap();
    assert_eq!(second.applied, 2);
    assert_eq!(second.watermark, 11);
    assert!(engine.by_parent_prefix("w24q8r").await.unwrap().is_empty());
}

#[tokio::test]
async fn invalid_config_is_rejected_before_connecting() {
    let config = DaemonConfig::try_parse_from(["geoparcel-daemon", "--poll-interval-ms", "0"]).unwrap();
    let ledger = MemoryLedger::new();

    let err = GeoparcelDaemon::with_connector(config, Arc::new(ledger.clone()))
        .await
        .unwrap_err();

    assert!(matches!(err, DaemonError::Config(_)));
    assert_eq!(ledger.connect_attempts(), 0);
}

#[tokio::test]
async fn restart_with_corrupt_contour_file_fails_to_open() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = MemoryLedger::new();
    ledger.emit(EVENT, 5, "99", &PARCEL);
    ledger.set_height(10);

    let daemon = GeoparcelDaemon::with_connector(file_config(dir.path()), Arc::new(ledger.clone()))
        .await
        .unwrap();
    assert_eq!(daemon.run_until(async {}).await.unwrap().watermark, 10);

    std::fs::write(dir.path().join("contours").join("99.json"), "{ truncated").unwrap();

    let err = GeoparcelDaemon::with_connector(file_config(dir.path()), Arc::new(ledger))
        .await
        .unwrap_err();
    assert!(matches!(err, DaemonError::Spatial(_)), "unexpected error: {}", err);
}
