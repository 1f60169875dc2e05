//! Error types for ledger synchronization

use geoparcel_spatial::SpatialError;
use thiserror::Error;

/// Errors from sync operations
#[derive(Debug, Error)]
pub enum SyncError {
    /// Ledger connectivity lost or unreachable; retried by the event source
    #[error("Ledger transport error: {0}")]
    Transport(String),

    /// Ledger refused the request and retrying will not help (e.g. 401/403)
    #[error("Ledger rejected request: {0}")]
    Fatal(String),

    /// Event payload could not be decoded
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Contour index failure
    #[error("Index error: {0}")]
    Index(#[from] SpatialError),

    /// Key-value store failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration or lifecycle misuse
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SyncError {
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Whether the event source should reconnect and retry.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(e: reqwest::Error) -> Self {
        SyncError::Transport(e.to_string())
    }
}

/// A ledger event whose payload cannot be turned into a contour change.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("invalid token id {0:?}")]
    TokenId(String),

    #[error("invalid contour vertex {value:?} at index {index}")]
    Vertex { index: usize, value: String },
}

pub type Result<T> = std::result::Result<T, SyncError>;
