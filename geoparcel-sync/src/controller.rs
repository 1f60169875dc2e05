//! Synchronization controller
//!
//! Drives the index from the ledger:
//!
//! ```text
//!   Idle ──start()──► CatchingUp ──batch applied──► Live
//!                         │                          │
//!                         └──── storage failure ─────┴──► Stopped
//! ```
//!
//! Catch-up replays every tracked event from the watermark (inclusive),
//! applies them in order, then records the chain height captured before the
//! fetch. Live mode applies each pushed event and advances the watermark to
//! its block. After a transport reconnect a fresh subscription is anchored at
//! the watermark; events seen twice are absorbed by idempotent apply.

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::event::{BlockNumber, RawEvent};
use crate::kv::{KvStore, Watermark};
use crate::source::{EventHandler, LedgerEventSource, Subscription};
use futures::FutureExt;
use geoparcel_spatial::GeohashIndexer;
use parking_lot::Mutex;
use std::fmt::Debug;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::watch;

/// Controller lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    CatchingUp,
    Live,
    Stopped,
}

/// Summary of applied work.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Events decoded and applied to the index
    pub applied: usize,
    /// Events skipped because they could not be decoded
    pub skipped: usize,
    /// Watermark after the work completed
    pub watermark: BlockNumber,
}

enum Outcome {
    Applied,
    Skipped,
}

struct ControllerInner {
    source: LedgerEventSource,
    indexer: Arc<GeohashIndexer>,
    watermark: Watermark,
    config: SyncConfig,
    state_tx: watch::Sender<SyncState>,
    subscription: Mutex<Option<Subscription>>,
    live_applied: AtomicUsize,
    live_skipped: AtomicUsize,
}

/// Keeps a [`GeohashIndexer`] in sync with a ledger event stream.
#[derive(Clone)]
pub struct SyncController {
    inner: Arc<ControllerInner>,
}

impl Debug for SyncController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncController")
            .field("event_name", &self.inner.config.event_name)
            .field("state", &self.state())
            .finish()
    }
}

impl SyncController {
    pub fn new(
        source: LedgerEventSource,
        indexer: Arc<GeohashIndexer>,
        kv: Arc<dyn KvStore>,
        config: SyncConfig,
    ) -> Self {
        let watermark = Watermark::new(kv, config.watermark_key.clone());
        let (state_tx, _) = watch::channel(SyncState::Idle);
        Self {
            inner: Arc::new(ControllerInner {
                source,
                indexer,
                watermark,
                config,
                state_tx,
                subscription: Mutex::new(None),
                live_applied: AtomicUsize::new(0),
                live_skipped: AtomicUsize::new(0),
            }),
        }
    }

    pub fn state(&self) -> SyncState {
        *self.inner.state_tx.borrow()
    }

    /// Current stored watermark.
    pub async fn watermark(&self) -> Result<BlockNumber> {
        self.inner.watermark.load().await
    }

    /// Catch up from the watermark, then go live.
    ///
    /// Returns the catch-up report once the live subscription is open. Only
    /// valid from [`SyncState::Idle`]. A storage failure leaves the controller
    /// [`SyncState::Stopped`] with the watermark untouched.
    pub async fn start(&self) -> Result<SyncReport> {
        let mut from = SyncState::Idle;
        self.inner.state_tx.send_if_modified(|state| {
            from = *state;
            if *state == SyncState::Idle {
                *state = SyncState::CatchingUp;
                true
            } else {
                false
            }
        });
        if from != SyncState::Idle {
            return Err(SyncError::Config(format!(
                "controller cannot start from {:?}",
                from
            )));
        }

        let weak = Arc::downgrade(&self.inner);
        self.inner.source.on_reconnect(Arc::new(move || {
            let weak = weak.clone();
            async move {
                if let Some(inner) = weak.upgrade() {
                    inner.on_reconnect().await;
                }
            }
            .boxed()
        }));

        let report = match self.catch_up().await {
            Ok(report) => report,
            Err(e) => {
                tracing::error!(error = %e, "Catch-up failed, stopping");
                self.inner.halt();
                return Err(e);
            }
        };

        if !self.inner.transition(SyncState::CatchingUp, SyncState::Live) {
            // stop() raced the catch-up
            return Ok(report);
        }
        if let Err(e) = self.inner.resubscribe().await {
            self.inner.halt();
            return Err(e);
        }

        tracing::info!(
            applied = report.applied,
            skipped = report.skipped,
            watermark = report.watermark,
            "Sync live"
        );
        Ok(report)
    }

    /// Replay and apply history from the watermark to the current height.
    ///
    /// The watermark is written only after the whole batch is applied.
    pub async fn catch_up(&self) -> Result<SyncReport> {
        let inner = &self.inner;
        let from = inner.watermark.load().await?;
        let head = inner.source.current_block().await?;
        let events = inner
            .source
            .events_from_block(&inner.config.event_name, from)
            .await?;

        tracing::info!(from, head, events = events.len(), "Catching up");

        let mut report = SyncReport::default();
        for event in &events {
            match inner.apply(event).await? {
                Outcome::Applied => report.applied += 1,
                Outcome::Skipped => report.skipped += 1,
            }
        }

        inner.watermark.advance(head).await?;
        report.watermark = inner.watermark.load().await?;
        Ok(report)
    }

    /// Stop live processing. Safe to call in any state.
    pub fn stop(&self) {
        if self.state() != SyncState::Stopped {
            tracing::info!("Stopping sync");
        }
        self.inner.halt();
    }

    /// Resolves once the controller reaches [`SyncState::Stopped`].
    pub async fn stopped(&self) {
        let mut rx = self.inner.state_tx.subscribe();
        let _ = rx.wait_for(|state| *state == SyncState::Stopped).await;
    }

    /// Live counts since start, with the current watermark.
    pub async fn report(&self) -> Result<SyncReport> {
        Ok(SyncReport {
            applied: self.inner.live_applied.load(Ordering::Relaxed),
            skipped: self.inner.live_skipped.load(Ordering::Relaxed),
            watermark: self.inner.watermark.load().await?,
        })
    }
}

impl ControllerInner {
    fn state(&self) -> SyncState {
        *self.state_tx.borrow()
    }

    fn transition(&self, from: SyncState, to: SyncState) -> bool {
        self.state_tx.send_if_modified(|state| {
            if *state == from {
                *state = to;
                true
            } else {
                false
            }
        })
    }

    fn halt(&self) {
        self.state_tx.send_replace(SyncState::Stopped);
        let subscription = self.subscription.lock().take();
        drop(subscription);
    }

    async fn apply(&self, event: &RawEvent) -> Result<Outcome> {
        let decoded = match event.decode() {
            Ok(decoded) => decoded,
            Err(e) => {
                tracing::warn!(
                    block = event.block_number,
                    token_id = %event.token_id,
                    error = %e,
                    "Skipping undecodable event"
                );
                return Ok(Outcome::Skipped);
            }
        };

        let contour = &decoded.contour;
        let stats = self
            .indexer
            .apply_contour_change(&contour.entity_id, &contour.cells)
            .await?;
        tracing::debug!(
            block = decoded.block_number,
            entity = %contour.entity_id,
            inserted = stats.inserted,
            removed = stats.removed,
            cleared = stats.cleared,
            "Applied contour change"
        );
        Ok(Outcome::Applied)
    }

    fn handler(self: &Arc<Self>) -> EventHandler {
        let weak: Weak<Self> = Arc::downgrade(self);
        Arc::new(move |event: RawEvent| {
            let weak = weak.clone();
            async move {
                if let Some(inner) = weak.upgrade() {
                    inner.apply_live(event).await;
                }
            }
            .boxed()
        })
    }

    async fn apply_live(&self, event: RawEvent) {
        if self.state() != SyncState::Live {
            return;
        }
        let block = event.block_number;
        let result = match self.apply(&event).await {
            Ok(outcome) => self.watermark.advance(block).await.map(|_| outcome),
            Err(e) => Err(e),
        };
        match result {
            Ok(Outcome::Applied) => {
                self.live_applied.fetch_add(1, Ordering::Relaxed);
            }
            Ok(Outcome::Skipped) => {
                self.live_skipped.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                tracing::error!(block, error = %e, "Live apply failed, stopping subscription");
                self.halt();
            }
        }
    }

    /// Open a live subscription at the watermark, replacing any current one.
    async fn resubscribe(self: &Arc<Self>) -> Result<()> {
        let from = self.watermark.load().await?;
        let subscription =
            self.source
                .subscribe_for_new_events(&self.config.event_name, from, self.handler());

        let mut slot = self.subscription.lock();
        if self.state() != SyncState::Live {
            return Ok(());
        }
        tracing::info!(from_block = from, "Live subscription anchored");
        *slot = Some(subscription);
        Ok(())
    }

    async fn on_reconnect(self: Arc<Self>) {
        if self.state() != SyncState::Live {
            return;
        }
        if let Err(e) = self.resubscribe().await {
            tracing::error!(error = %e, "Resubscribe after reconnect failed, stopping");
            self.halt();
        }
    }
}
