//! Ledger-to-index synchronization for parcel contours
//!
//! Replays contour-change events from a ledger into a
//! [`GeohashIndexer`](geoparcel_spatial::GeohashIndexer), then follows the
//! live feed, recording progress as a durable block watermark.
//!
//! # Architecture
//!
//! - [`source`]: Reconnecting event source over connector/connection traits
//! - [`memory`]: In-process ledger for tests and local runs
//! - [`http`]: Polling connector for an HTTP ledger gateway
//! - [`event`]: Raw ledger events and their decoding
//! - [`kv`]: Key-value stores and the block watermark
//! - [`controller`]: Catch-up and live synchronization state machine
//! - [`backoff`]: Reconnect delay schedule
//! - [`config`] / [`error`]: Configuration and error types
//!
//! # Dependencies
//!
//! Depends on `geoparcel-spatial` for the index and value types. It brings in
//! `reqwest` for the HTTP connector.

pub mod backoff;
pub mod config;
pub mod controller;
pub mod error;
pub mod event;
pub mod http;
pub mod kv;
pub mod memory;
pub mod source;

pub use config::{ReconnectPolicy, SyncConfig, DEFAULT_EVENT_NAME, DEFAULT_WATERMARK_KEY};
pub use controller::{SyncController, SyncReport, SyncState};
pub use error::{DecodeError, Result, SyncError};
pub use event::{BlockNumber, ChainId, DecodedEvent, RawEvent};
pub use http::HttpLedgerConnector;
pub use kv::{FileKvStore, KvStore, MemoryKvStore, Watermark};
pub use memory::MemoryLedger;
pub use source::{
    ConnectionState, EventFeed, EventHandler, FeedItem, LedgerConnection, LedgerConnector,
    LedgerEventSource, ReconnectCallback, Subscription,
};
