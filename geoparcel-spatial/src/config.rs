//! Spatial index configuration types.

use serde::{Deserialize, Serialize};

/// Configuration for the spatial query engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Shortest prefix of a query point looked up in the prefix index.
    ///
    /// Lower values find parcels whose vertices lie further from the point,
    /// at the cost of a larger candidate set for the exact test.
    /// Default: 1
    pub min_prefix_len: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self { min_prefix_len: 1 }
    }
}

impl QueryConfig {
    /// Set the minimum lookup prefix length (clamped to at least 1).
    pub fn with_min_prefix_len(mut self, len: usize) -> Self {
        self.min_prefix_len = len.max(1);
        self
    }
}
