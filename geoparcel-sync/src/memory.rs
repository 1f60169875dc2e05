//! In-memory ledger
//!
//! A [`LedgerConnector`] over a local event log, used by tests and local
//! runs. `disconnect()` invalidates every outstanding connection and live
//! feed the way a dropped socket would; failure knobs make the next
//! connects or calls fail with transport errors.

use crate::error::{Result, SyncError};
use crate::event::{BlockNumber, RawEvent};
use crate::source::{EventFeed, FeedItem, LedgerConnection, LedgerConnector};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::fmt::Debug;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};

const LIVE_CAPACITY: usize = 1024;

#[derive(Default)]
struct LedgerLog {
    events: Vec<RawEvent>,
    height: BlockNumber,
}

struct LedgerShared {
    log: RwLock<LedgerLog>,
    live_tx: broadcast::Sender<RawEvent>,
    epoch_tx: watch::Sender<u64>,
    connect_failures: AtomicUsize,
    call_failures: AtomicUsize,
    connect_attempts: AtomicUsize,
}

/// Shared in-memory event log. Clones refer to the same ledger.
#[derive(Clone)]
pub struct MemoryLedger {
    shared: Arc<LedgerShared>,
}

impl Debug for MemoryLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let log = self.shared.log.read();
        f.debug_struct("MemoryLedger")
            .field("events", &log.events.len())
            .field("height", &log.height)
            .field("epoch", &*self.shared.epoch_tx.borrow())
            .finish()
    }
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLedger {
    pub fn new() -> Self {
        let (live_tx, _) = broadcast::channel(LIVE_CAPACITY);
        let (epoch_tx, _) = watch::channel(0);
        Self {
            shared: Arc::new(LedgerShared {
                log: RwLock::new(LedgerLog::default()),
                live_tx,
                epoch_tx,
                connect_failures: AtomicUsize::new(0),
                call_failures: AtomicUsize::new(0),
                connect_attempts: AtomicUsize::new(0),
            }),
        }
    }

    /// Append an event at `block`. The log index is assigned in arrival
    /// order within the block; the chain height follows the highest block.
    pub fn emit(
        &self,
        event_name: &str,
        block: BlockNumber,
        token_id: &str,
        contour: &[&str],
    ) -> RawEvent {
        let mut log = self.shared.log.write();
        let log_index = log
            .events
            .iter()
            .filter(|e| e.block_number == block)
            .count() as u64;
        let event = RawEvent {
            block_number: block,
            log_index,
            event_name: event_name.to_string(),
            token_id: token_id.to_string(),
            contour: contour.iter().map(|c| c.to_string()).collect(),
        };
        log.events.push(event.clone());
        log.height = log.height.max(block);
        // No receivers is fine; nobody is subscribed yet.
        let _ = self.shared.live_tx.send(event.clone());
        event
    }

    /// Advance the chain height without emitting events.
    pub fn set_height(&self, height: BlockNumber) {
        let mut log = self.shared.log.write();
        log.height = log.height.max(height);
    }

    pub fn height(&self) -> BlockNumber {
        self.shared.log.read().height
    }

    /// Drop every open connection and live feed.
    pub fn disconnect(&self) {
        self.shared.epoch_tx.send_modify(|epoch| *epoch += 1);
    }

    /// Make the next `n` connect attempts fail with a transport error.
    pub fn fail_next_connects(&self, n: usize) {
        self.shared.connect_failures.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` calls on any connection fail with a transport error.
    pub fn fail_next_calls(&self, n: usize) {
        self.shared.call_failures.store(n, Ordering::SeqCst);
    }

    /// Total connect attempts, failed ones included.
    pub fn connect_attempts(&self) -> usize {
        self.shared.connect_attempts.load(Ordering::SeqCst)
    }

    fn epoch(&self) -> u64 {
        *self.shared.epoch_tx.borrow()
    }

    fn matching(&self, event_name: &str, from_block: BlockNumber) -> Vec<RawEvent> {
        self.shared
            .log
            .read()
            .events
            .iter()
            .filter(|e| e.event_name == event_name && e.block_number >= from_block)
            .cloned()
            .collect()
    }
}

fn take_failure(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl LedgerConnector for MemoryLedger {
    async fn connect(&self) -> Result<Arc<dyn LedgerConnection>> {
        self.shared.connect_attempts.fetch_add(1, Ordering::SeqCst);
        if take_failure(&self.shared.connect_failures) {
            return Err(SyncError::transport("connection refused"));
        }
        Ok(Arc::new(MemoryConnection {
            ledger: self.clone(),
            epoch: self.epoch(),
        }))
    }
}

/// Connection bound to the ledger epoch it was opened in.
#[derive(Debug)]
struct MemoryConnection {
    ledger: MemoryLedger,
    epoch: u64,
}

impl MemoryConnection {
    fn check(&self) -> Result<()> {
        if self.ledger.epoch() != self.epoch {
            return Err(SyncError::transport("connection reset"));
        }
        if take_failure(&self.ledger.shared.call_failures) {
            return Err(SyncError::transport("request timed out"));
        }
        Ok(())
    }
}

enum LiveStep {
    Event(RawEvent),
    Lagged(u64),
    Closed,
}

#[async_trait]
impl LedgerConnection for MemoryConnection {
    async fn current_block(&self) -> Result<BlockNumber> {
        self.check()?;
        Ok(self.ledger.height())
    }

    async fn events_from_block(
        &self,
        event_name: &str,
        from_block: BlockNumber,
    ) -> Result<Vec<RawEvent>> {
        self.check()?;
        Ok(self.ledger.matching(event_name, from_block))
    }

    fn subscribe(&self, event_name: &str, from_block: BlockNumber) -> EventFeed {
        // Subscribe before reading the backlog so nothing falls between them.
        let mut live_rx = self.ledger.shared.live_tx.subscribe();
        let mut epoch_rx = self.ledger.shared.epoch_tx.subscribe();
        let backlog = self.ledger.matching(event_name, from_block);
        let stale = *epoch_rx.borrow_and_update() != self.epoch;
        let event_name = event_name.to_string();

        let stream = async_stream::stream! {
            let mut last = None;
            if !stale {
                for event in backlog {
                    last = Some(event.position());
                    yield FeedItem::Event(event);
                }
            }

            while !stale {
                // Drain delivered events before noticing a reset.
                let step = tokio::select! {
                    biased;
                    received = live_rx.recv() => match received {
                        Ok(event) => LiveStep::Event(event),
                        Err(broadcast::error::RecvError::Lagged(n)) => LiveStep::Lagged(n),
                        Err(broadcast::error::RecvError::Closed) => LiveStep::Closed,
                    },
                    _ = epoch_rx.changed() => LiveStep::Closed,
                };

                match step {
                    LiveStep::Event(event) => {
                        let fresh = last.map_or(true, |pos| event.position() > pos);
                        if fresh && event.event_name == event_name && event.block_number >= from_block {
                            last = Some(event.position());
                            yield FeedItem::Event(event);
                        }
                    }
                    LiveStep::Lagged(n) => {
                        yield FeedItem::Disconnected { reason: format!("subscriber lagged by {} events", n) };
                        break;
                    }
                    LiveStep::Closed => {
                        yield FeedItem::Disconnected { reason: "connection reset".to_string() };
                        break;
                    }
                }
            }
            if stale {
                yield FeedItem::Disconnected { reason: "connection reset".to_string() };
            }
        };
        Box::pin(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_replay_is_inclusive_and_filtered() {
        let ledger = MemoryLedger::new();
        ledger.emit("ContourChanged", 1, "1", &["s00"]);
        ledger.emit("Transfer", 2, "1", &[]);
        ledger.emit("ContourChanged", 2, "2", &["s01"]);
        ledger.emit("ContourChanged", 2, "3", &["s02"]);

        let conn = ledger.connect().await.unwrap();
        let events = conn.events_from_block("ContourChanged", 2).await.unwrap();

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].position(), (2, 1));
        assert_eq!(events[1].position(), (2, 2));
        assert_eq!(conn.current_block().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_disconnect_invalidates_connection() {
        let ledger = MemoryLedger::new();
        let conn = ledger.connect().await.unwrap();

        ledger.disconnect();

        assert!(conn.current_block().await.unwrap_err().is_transport());
        let fresh = ledger.connect().await.unwrap();
        assert!(fresh.current_block().await.is_ok());
    }

    #[tokio::test]
    async fn test_failure_knobs() {
        let ledger = MemoryLedger::new();
        ledger.fail_next_connects(1);
        assert!(ledger.connect().await.is_err());
        let conn = ledger.connect().await.unwrap();

        ledger.fail_next_calls(2);
        assert!(conn.current_block().await.is_err());
        assert!(conn.current_block().await.is_err());
        assert!(conn.current_block().await.is_ok());
        assert_eq!(ledger.connect_attempts(), 2);
    }

    #[tokio::test]
    async fn test_feed_backlog_then_live_without_duplicates() {
        let ledger = MemoryLedger::new();
        ledger.emit("ContourChanged", 1, "1", &["s00"]);
        let conn = ledger.connect().await.unwrap();

        let mut feed = conn.subscribe("ContourChanged", 1);
        ledger.emit("ContourChanged", 2, "1", &["s01"]);
        ledger.disconnect();

        let mut items = Vec::new();
        while let Some(item) = feed.next().await {
            items.push(item);
        }

        assert_eq!(items.len(), 3);
        assert!(matches!(&items[0], FeedItem::Event(e) if e.block_number == 1));
        assert!(matches!(&items[1], FeedItem::Event(e) if e.block_number == 2));
        assert!(matches!(items[2], FeedItem::Disconnected { .. }));
    }
}
