//! Ledger event source
//!
//! Wraps a [`LedgerConnector`] and owns the current [`LedgerConnection`] in a
//! replaceable slot. When any call or live feed reports a transport failure
//! the source moves to [`ConnectionState::Reconnecting`], retries
//! `connect()` on the configured backoff until it succeeds, swaps the new
//! connection in, returns to [`ConnectionState::Connected`], and fires every
//! reconnect callback.
//!
//! ```text
//!            transport failure
//!   Connected ─────────────────► Reconnecting ──┐ connect() fails:
//!       ▲                             │  ◄──────┘ sleep(backoff)
//!       └──── swap connection ◄───────┘
//!             fire callbacks
//! ```
//!
//! Replay calls retry transparently across reconnects. A live feed that
//! drops is not resumed; the reconnect callbacks are expected to open a new
//! subscription from a durable anchor.

use crate::backoff::Backoff;
use crate::config::ReconnectPolicy;
use crate::error::Result;
use crate::event::{BlockNumber, RawEvent};
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::{Stream, StreamExt};
use parking_lot::{Mutex, RwLock};
use std::fmt::Debug;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Item yielded by a live feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedItem {
    Event(RawEvent),
    /// The feed's transport dropped; no further items follow
    Disconnected { reason: String },
}

/// Unbounded live event feed.
pub type EventFeed = Pin<Box<dyn Stream<Item = FeedItem> + Send>>;

/// Invoked for each live event, one at a time, in arrival order.
pub type EventHandler = Arc<dyn Fn(RawEvent) -> BoxFuture<'static, ()> + Send + Sync>;

/// Invoked after the transport has been re-established.
pub type ReconnectCallback = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// One established transport to the ledger.
#[async_trait]
pub trait LedgerConnection: Debug + Send + Sync {
    /// Latest known chain height.
    async fn current_block(&self) -> Result<BlockNumber>;

    /// Events named `event_name` at or after `from_block`, in ledger order.
    async fn events_from_block(
        &self,
        event_name: &str,
        from_block: BlockNumber,
    ) -> Result<Vec<RawEvent>>;

    /// Feed of events at or after `from_block`, including ones that already
    /// exist. Must end with [`FeedItem::Disconnected`] when the transport
    /// drops.
    fn subscribe(&self, event_name: &str, from_block: BlockNumber) -> EventFeed;
}

/// Factory for ledger connections.
#[async_trait]
pub trait LedgerConnector: Debug + Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn LedgerConnection>>;
}

/// Transport state of a [`LedgerEventSource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Reconnecting,
}

struct Slot {
    connection: Arc<dyn LedgerConnection>,
    generation: u64,
}

struct SourceInner {
    connector: Arc<dyn LedgerConnector>,
    policy: ReconnectPolicy,
    slot: RwLock<Slot>,
    state: Mutex<ConnectionState>,
    generation_tx: watch::Sender<u64>,
    callbacks: RwLock<Vec<ReconnectCallback>>,
}

/// Reconnecting ledger event source. Cheap to clone.
#[derive(Clone)]
pub struct LedgerEventSource {
    inner: Arc<SourceInner>,
}

impl Debug for LedgerEventSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerEventSource")
            .field("connector", &self.inner.connector)
            .field("state", &self.state())
            .field("generation", &self.generation())
            .finish()
    }
}

impl LedgerEventSource {
    /// Establish the first connection, retrying transport failures on the
    /// policy's backoff.
    pub async fn connect(connector: Arc<dyn LedgerConnector>, policy: ReconnectPolicy) -> Self {
        let connection = establish(connector.as_ref(), policy).await;
        let (generation_tx, _) = watch::channel(0);
        Self {
            inner: Arc::new(SourceInner {
                connector,
                policy,
                slot: RwLock::new(Slot {
                    connection,
                    generation: 0,
                }),
                state: Mutex::new(ConnectionState::Connected),
                generation_tx,
                callbacks: RwLock::new(Vec::new()),
            }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.lock()
    }

    /// Number of reconnects completed so far.
    pub fn generation(&self) -> u64 {
        self.inner.slot.read().generation
    }

    fn current(&self) -> (Arc<dyn LedgerConnection>, u64) {
        let slot = self.inner.slot.read();
        (slot.connection.clone(), slot.generation)
    }

    /// Register a callback fired after every completed reconnect.
    pub fn on_reconnect(&self, callback: ReconnectCallback) {
        self.inner.callbacks.write().push(callback);
    }

    /// Latest known chain height. Transport failures are retried.
    pub async fn current_block(&self) -> Result<BlockNumber> {
        self.with_retry("current_block", |conn| async move { conn.current_block().await })
            .await
    }

    /// Historical events from `from_block` (inclusive). Transport failures
    /// are retried.
    pub async fn events_from_block(
        &self,
        event_name: &str,
        from_block: BlockNumber,
    ) -> Result<Vec<RawEvent>> {
        self.with_retry("events_from_block", |conn| async move {
            conn.events_from_block(event_name, from_block).await
        })
        .await
    }

    /// Start a live feed on a background task. Returns immediately.
    ///
    /// When the feed disconnects the task ends and a reconnect is started;
    /// the subscription is not resumed by itself.
    pub fn subscribe_for_new_events(
        &self,
        event_name: &str,
        from_block: BlockNumber,
        on_event: EventHandler,
    ) -> Subscription {
        let (connection, generation) = self.current();
        let mut feed = connection.subscribe(event_name, from_block);
        let source = self.clone();
        let event_name = event_name.to_string();

        tracing::debug!(event = %event_name, from_block, generation, "Opening live subscription");

        let handle = tokio::spawn(async move {
            let mut reason = "feed ended".to_string();
            while let Some(item) = feed.next().await {
                match item {
                    FeedItem::Event(event) => on_event(event).await,
                    FeedItem::Disconnected { reason: r } => {
                        reason = r;
                        break;
                    }
                }
            }
            drop(feed);
            tracing::warn!(event = %event_name, %reason, "Live subscription lost");
            // Run detached: a callback may replace (and abort) this subscription.
            tokio::spawn(async move { source.reconnect_from(generation, &reason).await });
        });

        Subscription { handle, from_block }
    }

    async fn with_retry<T, F, Fut>(&self, op_name: &'static str, op: F) -> Result<T>
    where
        F: Fn(Arc<dyn LedgerConnection>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut backoff = Backoff::new(self.inner.policy);
        loop {
            let (connection, generation) = self.current();
            match op(connection).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transport() => {
                    tracing::warn!(op = op_name, error = %e, "Ledger call failed, reconnecting");
                    self.reconnect_from(generation, &e.to_string()).await;
                    // First retry is immediate; repeated failures back off.
                    let delay = backoff.next_delay();
                    if backoff.attempts() > 1 {
                        tokio::time::sleep(delay).await;
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Replace the connection observed at `seen_generation`.
    ///
    /// If another caller already reconnected past it, returns at once; if a
    /// reconnect is in progress, waits for it instead of starting another.
    pub(crate) async fn reconnect_from(&self, seen_generation: u64, reason: &str) {
        let mut generation_rx = self.inner.generation_tx.subscribe();
        let in_progress = {
            let mut state = self.inner.state.lock();
            if self.inner.slot.read().generation > seen_generation {
                return;
            }
            let in_progress = *state == ConnectionState::Reconnecting;
            *state = ConnectionState::Reconnecting;
            in_progress
        };
        if in_progress {
            let _ = generation_rx.wait_for(|g| *g > seen_generation).await;
            return;
        }

        tracing::warn!(reason, "Ledger transport lost, reconnecting");
        let connection = establish(self.inner.connector.as_ref(), self.inner.policy).await;

        // Generation bump and Connected are published together under the
        // state lock; reconnect_from checks both under the same lock.
        let generation = {
            let mut state = self.inner.state.lock();
            let generation = {
                let mut slot = self.inner.slot.write();
                slot.connection = connection;
                slot.generation += 1;
                slot.generation
            };
            *state = ConnectionState::Connected;
            self.inner.generation_tx.send_replace(generation);
            generation
        };
        tracing::info!(generation, "Ledger transport re-established");

        let callbacks: Vec<ReconnectCallback> = self.inner.callbacks.read().clone();
        for callback in callbacks {
            callback().await;
        }
    }
}

/// Connect, retrying transport failures forever. Other errors are logged and
/// retried too: there is no caller to hand them to while reconnecting.
async fn establish(
    connector: &dyn LedgerConnector,
    policy: ReconnectPolicy,
) -> Arc<dyn LedgerConnection> {
    let mut backoff = Backoff::new(policy);
    loop {
        match connector.connect().await {
            Ok(connection) => return connection,
            Err(e) => {
                let delay = backoff.next_delay();
                if e.is_transport() {
                    tracing::debug!(error = %e, ?delay, "Ledger connect failed");
                } else {
                    tracing::error!(error = %e, ?delay, "Ledger connect rejected");
                }
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Handle to a running live subscription. Dropping it stops the feed.
#[derive(Debug)]
pub struct Subscription {
    handle: JoinHandle<()>,
    from_block: BlockNumber,
}

impl Subscription {
    /// Block the feed was anchored at.
    pub fn from_block(&self) -> BlockNumber {
        self.from_block
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn cancel(&self) {
        self.handle.abort();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
