//! Sync configuration types
//!
//! Defines which ledger event is tracked, where the watermark lives, and how
//! the event source backs off while reconnecting.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Key under which the applied-block watermark is stored.
pub const DEFAULT_WATERMARK_KEY: &str = "lastBlockNumber";

/// Ledger event carrying parcel contour changes.
pub const DEFAULT_EVENT_NAME: &str = "ContourChanged";

/// Polling period for connectors without a push feed.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2000;

/// Delay schedule between reconnect attempts.
///
/// The default is a fixed one second delay: `base_ms == max_ms` and no jitter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// First delay in milliseconds; doubles per failed attempt
    pub base_ms: u64,
    /// Upper bound for the delay in milliseconds
    pub max_ms: u64,
    /// Add up to 25% random jitter to each delay
    pub jitter: bool,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_ms: 1000,
            max_ms: 1000,
            jitter: false,
        }
    }
}

impl ReconnectPolicy {
    /// Constant delay between attempts.
    pub fn fixed(delay: Duration) -> Self {
        let ms = delay.as_millis() as u64;
        Self {
            base_ms: ms,
            max_ms: ms,
            jitter: false,
        }
    }

    /// Doubling delay from `base_ms`, capped at `max_ms`, with jitter.
    pub fn exponential(base_ms: u64, max_ms: u64) -> Self {
        Self {
            base_ms,
            max_ms: max_ms.max(base_ms),
            jitter: true,
        }
    }
}

/// Synchronization controller configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Ledger event name to replay and subscribe to
    pub event_name: String,
    /// KV key holding the watermark
    pub watermark_key: String,
    /// Event source reconnect schedule
    pub reconnect: ReconnectPolicy,
    /// Live feed polling period in milliseconds (HTTP connector)
    pub poll_interval_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            event_name: DEFAULT_EVENT_NAME.to_string(),
            watermark_key: DEFAULT_WATERMARK_KEY.to_string(),
            reconnect: ReconnectPolicy::default(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

impl SyncConfig {
    pub fn with_event_name(mut self, event_name: impl Into<String>) -> Self {
        self.event_name = event_name.into();
        self
    }

    pub fn with_watermark_key(mut self, key: impl Into<String>) -> Self {
        self.watermark_key = key.into();
        self
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn with_poll_interval_ms(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms.max(1);
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
