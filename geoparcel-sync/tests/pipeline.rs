//! Ledger → controller → index → query, end to end over the in-memory ledger.

use geoparcel_spatial::{
    ContourStore, EntityId, GeohashIndexer, MemoryContourStore, ParcelContour, SpatialQueryEngine,
};
use geoparcel_sync::{
    BlockNumber, KvStore, LedgerConnector, LedgerEventSource, MemoryKvStore, MemoryLedger,
    RawEvent, ReconnectPolicy, SyncConfig, SyncController, SyncState,
};
use std::sync::Arc;
use std::time::Duration;

const EVENT: &str = "ContourChanged";

const PARCEL_99: [&str; 4] = ["w24q8r9pgd0p", "w24q8r3newq1", "w24q8r6pm9gc", "w24q8rf0q48p"];
const PARCEL_99_MOVED: [&str; 4] = ["w24q8r9pgd0p", "w24q8xwfk4u3", "w24q8r6pm9gc", "w24q8rf0q48p"];

/// Inside the original rectangle of parcel 99.
const INSIDE_99: &str = "w24q8r9du";
/// Shares the `w24q8` prefix with parcel 99 but lies south of it.
const SOUTH_OF_99: &str = "w24q8qc9u";

struct Pipeline {
    ledger: MemoryLedger,
    store: MemoryContourStore,
    kv: MemoryKvStore,
    controller: SyncController,
    engine: SpatialQueryEngine,
}

async fn pipeline(ledger: MemoryLedger, store: MemoryContourStore, kv: MemoryKvStore) -> Pipeline {
    let source = LedgerEventSource::connect(
        Arc::new(ledger.clone()),
        ReconnectPolicy::fixed(Duration::from_millis(1)),
    )
    .await;
    let indexer = Arc::new(GeohashIndexer::new(Arc::new(store.clone())));
    let controller =
        SyncController::new(source, indexer, Arc::new(kv.clone()), SyncConfig::default());
    let engine = SpatialQueryEngine::new(Arc::new(store.clone()));
    Pipeline {
        ledger,
        store,
        kv,
        controller,
        engine,
    }
}

async fn wait_for_watermark(controller: &SyncController, block: BlockNumber) {
    for _ in 0..1000 {
        if controller.watermark().await.unwrap() >= block {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("watermark never reached {}", block);
}

fn ids(contours: &[ParcelContour]) -> Vec<String> {
    contours.iter().map(|c| c.entity_id.to_string()).collect()
}

async fn snapshot(store: &MemoryContourStore) -> Vec<(EntityId, Vec<String>)> {
    let mut out = Vec::new();
    for id in store.entity_ids() {
        let cells = store
            .get(&id)
            .await
            .unwrap()
            .into_iter()
            .map(|row| row.cell.to_string())
            .collect();
        out.push((id, cells));
    }
    out
}

#[tokio::test]
async fn entity_99_lifecycle() {
    let ledger = MemoryLedger::new();
    ledger.emit(EVENT, 1, "99", &PARCEL_99);
    let p = pipeline(ledger, MemoryContourStore::new(), MemoryKvStore::new()).await;

    let report = p.controller.start().await.unwrap();
    assert_eq!(report.applied, 1);
    assert_eq!(p.controller.state(), SyncState::Live);

    let hits = p.engine.by_parent_prefix("w24q8r").await.unwrap();
    assert_eq!(ids(&hits), vec!["99"]);
    let cells: Vec<&str> = hits[0].cells.iter().map(|c| c.as_str()).collect();
    assert_eq!(cells, PARCEL_99);

    assert_eq!(ids(&p.engine.by_inner_point(INSIDE_99).await.unwrap()), vec!["99"]);
    assert!(p.engine.by_inner_point(SOUTH_OF_99).await.unwrap().is_empty());

    // Move the second vertex; the hex token id is the same parcel.
    p.ledger.emit(EVENT, 2, "0x63", &PARCEL_99_MOVED);
    wait_for_watermark(&p.controller, 2).await;

    assert_eq!(ids(&p.engine.by_parent_prefix("w24q8r").await.unwrap()), vec!["99"]);
    assert_eq!(ids(&p.engine.by_parent_prefix("w24q8xwf").await.unwrap()), vec!["99"]);
    assert!(p.engine.by_parent_prefix("w24q8r3").await.unwrap().is_empty());
    let moved = p.engine.by_parent_prefix("w24q8x").await.unwrap();
    let cells: Vec<&str> = moved[0].cells.iter().map(|c| c.as_str()).collect();
    assert_eq!(cells, PARCEL_99_MOVED);

    // Empty contour removes the parcel entirely.
    p.ledger.emit(EVENT, 3, "99", &[]);
    wait_for_watermark(&p.controller, 3).await;

    assert!(p.engine.by_parent_prefix("w24q8r").await.unwrap().is_empty());
    assert!(p.engine.by_parent_prefix("w24q8xwf").await.unwrap().is_empty());
    assert!(p.engine.by_inner_point(INSIDE_99).await.unwrap().is_empty());
    assert_eq!(p.store.prefix_row_count(), 0);
    assert_eq!(p.kv.get("lastBlockNumber").await.unwrap().as_deref(), Some("3"));
}

fn history(ledger: &MemoryLedger) {
    ledger.emit(EVENT, 1, "1", &["s00", "s02", "s08", "s0b"]);
    ledger.emit(EVENT, 2, "2", &["u4pr", "u4px", "u4pz"]);
    ledger.emit(EVENT, 3, "1", &["s00", "s03", "s08", "s0b"]);
    ledger.emit(EVENT, 4, "3", &["s00", "s01", "s03"]);
    ledger.emit(EVENT, 5, "2", &[]);
    ledger.emit(EVENT, 6, "1", &["s0b", "s08", "s03", "s00"]);
    ledger.emit(EVENT, 6, "3", &["s01", "s03", "s00"]);
    ledger.set_height(7);
}

#[tokio::test]
async fn restart_after_crash_matches_uninterrupted_run() {
    let ledger = MemoryLedger::new();
    history(&ledger);

    let clean = pipeline(ledger.clone(), MemoryContourStore::new(), MemoryKvStore::new()).await;
    clean.controller.start().await.unwrap();
    let expected = snapshot(&clean.store).await;
    clean.controller.stop();

    // A previous run recorded block 3 and then applied events through block 5
    // before crashing, without recording them.
    let store = MemoryContourStore::new();
    let kv = MemoryKvStore::new();
    kv.set("lastBlockNumber", "3").await.unwrap();
    let indexer = GeohashIndexer::new(Arc::new(store.clone()));
    for event in ledger_events_through(&ledger, 5).await {
        let decoded = event.decode().unwrap();
        indexer
            .apply_contour_change(&decoded.contour.entity_id, &decoded.contour.cells)
            .await
            .unwrap();
    }

    let restarted = pipeline(ledger, store, kv).await;
    let report = restarted.controller.start().await.unwrap();

    assert_eq!(report.watermark, 7);
    assert_eq!(report.applied, 5);
    assert_eq!(snapshot(&restarted.store).await, expected);
    assert_eq!(
        expected,
        vec![
            (
                EntityId::from(1),
                vec!["s0b".to_string(), "s08".to_string(), "s03".to_string(), "s00".to_string()]
            ),
            (
                EntityId::from(3),
                vec!["s01".to_string(), "s03".to_string(), "s00".to_string()]
            ),
        ]
    );
}

async fn ledger_events_through(ledger: &MemoryLedger, block: BlockNumber) -> Vec<RawEvent> {
    let conn = ledger.connect().await.unwrap();
    let mut events = conn.events_from_block(EVENT, 0).await.unwrap();
    events.retain(|e| e.block_number <= block);
    events
}

#[tokio::test]
async fn undecodable_live_event_is_skipped() {
    let ledger = MemoryLedger::new();
    let p = pipeline(ledger, MemoryContourStore::new(), MemoryKvStore::new()).await;
    p.controller.start().await.unwrap();

    p.ledger.emit(EVENT, 1, "99", &["w24q8r9pgd0p", "not a cell"]);
    p.ledger.emit(EVENT, 2, "7", &["s00", "s02", "s08"]);
    wait_for_watermark(&p.controller, 2).await;

    let report = p.controller.report().await.unwrap();
    assert_eq!((report.applied, report.skipped), (1, 1));
    assert_eq!(p.store.entity_ids(), vec![EntityId::from(7)]);
}

#[tokio::test]
async fn live_sync_survives_flaky_reconnects() {
    let ledger = MemoryLedger::new();
    let p = pipeline(ledger, MemoryContourStore::new(), MemoryKvStore::new()).await;
    p.controller.start().await.unwrap();

    p.ledger.emit(EVENT, 1, "1", &["s00", "s02", "s08"]);
    wait_for_watermark(&p.controller, 1).await;

    p.ledger.fail_next_connects(3);
    p.ledger.disconnect();
    p.ledger.emit(EVENT, 2, "2", &["u4pr", "u4px", "u4pz"]);
    wait_for_watermark(&p.controller, 2).await;

    assert_eq!(p.controller.state(), SyncState::Live);
    assert_eq!(ids(&p.engine.by_parent_prefix("u4p").await.unwrap()), vec!["2"]);
    assert_eq!(p.ledger.connect_attempts(), 5);
}
