//! Contour store abstraction.
//!
//! The store is the only mutable boundary of the index. It holds two tables:
//!
//! ```text
//! contour rows : (entity_id, cell) -> position
//! prefix rows  : prefix -> {(entity_id, cell)}
//! ```
//!
//! Prefix rows reference the owning contour row, so two parcels sharing a
//! boundary cell each own their own prefix rows for it. Every call is atomic
//! on its own; callers that need read-modify-write consistency (the indexer)
//! serialize per entity themselves.

use crate::entity::EntityId;
use crate::error::Result;
use crate::geohash::Geohash;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// One stored boundary vertex of a parcel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContourCell {
    pub cell: Geohash,
    pub position: u32,
}

impl ContourCell {
    pub fn new(cell: Geohash, position: u32) -> Self {
        Self { cell, position }
    }
}

/// Keyed storage for contour rows and their prefix index.
#[async_trait]
pub trait ContourStore: Debug + Send + Sync {
    /// Rows for `entity_id` ordered by position. Unknown entities yield an
    /// empty vector.
    async fn get(&self, entity_id: &EntityId) -> Result<Vec<ContourCell>>;

    /// Insert a contour row, or update the position of an existing one.
    async fn upsert(&self, entity_id: &EntityId, cell: &Geohash, position: u32) -> Result<()>;

    /// Remove a contour row together with every prefix row referencing it.
    async fn delete(&self, entity_id: &EntityId, cell: &Geohash) -> Result<()>;

    /// Record prefix rows pointing at `(entity_id, cell)`.
    ///
    /// Inserting a row that already exists must not create a duplicate.
    async fn insert_prefixes(
        &self,
        entity_id: &EntityId,
        cell: &Geohash,
        prefixes: &[&str],
    ) -> Result<()>;

    /// Distinct entities owning a cell equal to `prefix` or having a prefix
    /// row equal to it. Invalid prefixes match nothing.
    async fn find_by_prefix(&self, prefix: &str) -> Result<Vec<EntityId>>;

    /// Remove every contour and prefix row of `entity_id`.
    async fn clear(&self, entity_id: &EntityId) -> Result<()>;

    /// Number of entities with at least one contour row.
    async fn entity_count(&self) -> Result<usize>;
}
