//! Error types for the parcel spatial index.

use thiserror::Error;

/// Spatial index errors.
#[derive(Error, Debug)]
pub enum SpatialError {
    /// String is not a valid geohash cell.
    #[error("Invalid geohash: {0}")]
    InvalidGeohash(String),

    /// Entity identifier could not be interpreted as an integer.
    #[error("Invalid entity id: {0}")]
    InvalidEntityId(String),

    /// Contour store failure (read or write).
    #[error("Storage error: {0}")]
    Storage(String),

    /// IO error from a file-backed store.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Persisted row could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl SpatialError {
    /// Create a storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create an invalid geohash error
    pub fn invalid_geohash(value: impl Into<String>) -> Self {
        Self::InvalidGeohash(value.into())
    }
}

/// Result type for spatial operations.
pub type Result<T> = std::result::Result<T, SpatialError>;
