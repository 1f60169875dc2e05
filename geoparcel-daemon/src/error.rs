//! Daemon error types

use crate::config_file::ConfigFileError;
use geoparcel_spatial::SpatialError;
use geoparcel_sync::SyncError;
use thiserror::Error;

/// Errors surfaced by the daemon
#[derive(Error, Debug)]
pub enum DaemonError {
    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Config file could not be read or parsed
    #[error(transparent)]
    ConfigFile(#[from] ConfigFileError),

    /// Contour store failure while opening
    #[error("Index error: {0}")]
    Spatial(#[from] SpatialError),

    /// Sync failure
    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    /// Sync stopped on its own after a live failure
    #[error("Sync halted; restart resumes from the stored watermark")]
    Halted,
}

pub type Result<T> = std::result::Result<T, DaemonError>;
