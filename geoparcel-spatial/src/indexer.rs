//! Geohash indexer.
//!
//! Applies contour-change events to a [`ContourStore`]. Each change is a
//! diff between the stored rows of an entity and its new ordered cell list:
//!
//! 1. stored cells missing from the new list are deleted (with prefix rows)
//! 2. surviving cells only have their position rewritten, and only if it moved
//! 3. new cells are inserted with one prefix row per proper prefix
//!
//! An empty cell list clears the entity. Applying the same change twice
//! leaves the store unchanged the second time.
//!
//! The diff is a read-modify-write, so changes to one entity are serialized
//! with a per-entity async lock. Different entities never contend.

use crate::entity::EntityId;
use crate::error::Result;
use crate::geohash::Geohash;
use crate::store::{ContourCell, ContourStore};
use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Store operations needed to move an entity to a new contour.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContourPlan {
    /// Drop every row of the entity.
    pub clear: bool,
    /// Cells to delete along with their prefix rows.
    pub removals: Vec<Geohash>,
    /// Existing cells whose position changes.
    pub repositions: Vec<(Geohash, u32)>,
    /// New cells and their positions.
    pub inserts: Vec<(Geohash, u32)>,
}

impl ContourPlan {
    /// Whether applying the plan would touch the store at all.
    pub fn is_noop(&self) -> bool {
        !self.clear
            && self.removals.is_empty()
            && self.repositions.is_empty()
            && self.inserts.is_empty()
    }
}

/// Compute the diff from `existing` rows to `new_cells`.
///
/// Repeated cells in `new_cells` keep their first occurrence so positions
/// stay contiguous and each cell appears once per entity.
pub fn plan_contour_change(existing: &[ContourCell], new_cells: &[Geohash]) -> ContourPlan {
    if new_cells.is_empty() {
        return ContourPlan {
            clear: !existing.is_empty(),
            ..ContourPlan::default()
        };
    }

    let mut seen: HashSet<&Geohash> = HashSet::with_capacity(new_cells.len());
    let target: Vec<&Geohash> = new_cells.iter().filter(|c| seen.insert(*c)).collect();

    let current: HashMap<&Geohash, u32> = existing.iter().map(|r| (&r.cell, r.position)).collect();

    let removals = existing
        .iter()
        .filter(|r| !seen.contains(&r.cell))
        .map(|r| r.cell.clone())
        .collect();

    let mut repositions = Vec::new();
    let mut inserts = Vec::new();
    for (i, cell) in target.into_iter().enumerate() {
        let position = i as u32;
        match current.get(cell) {
            Some(&old) if old == position => {}
            Some(_) => repositions.push((cell.clone(), position)),
            None => inserts.push((cell.clone(), position)),
        }
    }

    ContourPlan {
        clear: false,
        removals,
        repositions,
        inserts,
    }
}

/// Counts from one applied contour change.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyStats {
    pub inserted: usize,
    pub repositioned: usize,
    pub removed: usize,
    pub cleared: bool,
}

/// Applies contour changes to a store with per-entity serialization.
pub struct GeohashIndexer {
    store: Arc<dyn ContourStore>,
    locks: parking_lot::Mutex<HashMap<EntityId, Arc<Mutex<()>>>>,
}

impl Debug for GeohashIndexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeohashIndexer")
            .field("store", &self.store)
            .field("locked_entities", &self.locks.lock().len())
            .finish()
    }
}

impl GeohashIndexer {
    pub fn new(store: Arc<dyn ContourStore>) -> Self {
        Self {
            store,
            locks: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn ContourStore> {
        &self.store
    }

    fn entity_lock(&self, entity_id: &EntityId) -> Arc<Mutex<()>> {
        self.locks
            .lock()
            .entry(entity_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the entity's lock slot when nobody else holds or awaits it.
    fn release_lock(&self, entity_id: &EntityId, lock: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock();
        // One reference in the map, one held here.
        if Arc::strong_count(&lock) == 2 {
            locks.remove(entity_id);
        }
    }

    /// Replace the contour of `entity_id` with `new_cells`.
    pub async fn apply_contour_change(
        &self,
        entity_id: &EntityId,
        new_cells: &[Geohash],
    ) -> Result<ApplyStats> {
        let lock = self.entity_lock(entity_id);
        let result = {
            let _guard = lock.lock().await;
            self.apply_locked(entity_id, new_cells).await
        };
        self.release_lock(entity_id, lock);
        result
    }

    async fn apply_locked(&self, entity_id: &EntityId, new_cells: &[Geohash]) -> Result<ApplyStats> {
        let existing = self.store.get(entity_id).await?;
        let plan = plan_contour_change(&existing, new_cells);

        if plan.is_noop() {
            tracing::trace!(entity = %entity_id, "Contour unchanged");
            return Ok(ApplyStats::default());
        }

        if plan.clear {
            self.store.clear(entity_id).await?;
            tracing::debug!(entity = %entity_id, removed = existing.len(), "Contour cleared");
            return Ok(ApplyStats {
                removed: existing.len(),
                cleared: true,
                ..ApplyStats::default()
            });
        }

        for cell in &plan.removals {
            self.store.delete(entity_id, cell).await?;
        }
        for (cell, position) in &plan.repositions {
            self.store.upsert(entity_id, cell, *position).await?;
        }
        for (cell, position) in &plan.inserts {
            self.store.upsert(entity_id, cell, *position).await?;
            let prefixes: Vec<&str> = cell.proper_prefixes().collect();
            self.store
                .insert_prefixes(entity_id, cell, &prefixes)
                .await?;
        }

        let stats = ApplyStats {
            inserted: plan.inserts.len(),
            repositioned: plan.repositions.len(),
            removed: plan.removals.len(),
            cleared: false,
        };
        tracing::debug!(
            entity = %entity_id,
            inserted = stats.inserted,
            repositioned = stats.repositioned,
            removed = stats.removed,
            "Contour applied"
        );
        Ok(stats)
    }
}
