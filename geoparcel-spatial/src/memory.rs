//! In-memory contour store
//!
//! Stores all rows in hash and B-tree maps behind `Arc<RwLock>`, making it
//! thread-safe and cheap to clone. Used directly in tests and as the working
//! set of the file-backed store.

use crate::entity::EntityId;
use crate::error::Result;
use crate::geohash::{is_valid_prefix, Geohash};
use crate::store::{ContourCell, ContourStore};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::Debug;
use std::sync::Arc;

#[derive(Default)]
struct Tables {
    /// Contour rows: entity -> cell -> position
    contours: HashMap<EntityId, HashMap<Geohash, u32>>,
    /// Exact-cell lookup: cell -> owning entities
    cells: BTreeMap<Geohash, BTreeSet<EntityId>>,
    /// Prefix rows: prefix -> (entity, cell)
    prefixes: BTreeMap<String, BTreeSet<(EntityId, Geohash)>>,
}

impl Tables {
    fn insert_row(&mut self, entity_id: &EntityId, cell: &Geohash, position: u32) {
        self.contours
            .entry(entity_id.clone())
            .or_default()
            .insert(cell.clone(), position);
        self.cells
            .entry(cell.clone())
            .or_default()
            .insert(entity_id.clone());
    }

    fn remove_row(&mut self, entity_id: &EntityId, cell: &Geohash) {
        if let Some(rows) = self.contours.get_mut(entity_id) {
            rows.remove(cell);
            if rows.is_empty() {
                self.contours.remove(entity_id);
            }
        }

        if let Some(owners) = self.cells.get_mut(cell) {
            owners.remove(entity_id);
            if owners.is_empty() {
                self.cells.remove(cell);
            }
        }

        let key = (entity_id.clone(), cell.clone());
        for prefix in cell.proper_prefixes() {
            if let Some(refs) = self.prefixes.get_mut(prefix) {
                refs.remove(&key);
                if refs.is_empty() {
                    self.prefixes.remove(prefix);
                }
            }
        }
    }
}

/// In-memory contour store for tests and embedded use
#[derive(Clone, Default)]
pub struct MemoryContourStore {
    tables: Arc<RwLock<Tables>>,
}

impl Debug for MemoryContourStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tables = self.tables.read();
        f.debug_struct("MemoryContourStore")
            .field("entity_count", &tables.contours.len())
            .field("prefix_count", &tables.prefixes.len())
            .finish()
    }
}

impl MemoryContourStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of `(prefix, entity, cell)` rows.
    pub fn prefix_row_count(&self) -> usize {
        self.tables.read().prefixes.values().map(BTreeSet::len).sum()
    }

    /// Total number of contour rows across all entities.
    pub fn contour_row_count(&self) -> usize {
        self.tables.read().contours.values().map(HashMap::len).sum()
    }

    /// Every entity with at least one row, sorted.
    pub fn entity_ids(&self) -> Vec<EntityId> {
        let mut ids: Vec<EntityId> = self.tables.read().contours.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Replace every row of `entity_id` with `rows`, rebuilding their prefix
    /// rows, in one write.
    pub(crate) fn replace_rows(&self, entity_id: &EntityId, rows: &[ContourCell]) {
        let mut tables = self.tables.write();
        let current: Vec<Geohash> = tables
            .contours
            .get(entity_id)
            .map(|cells| cells.keys().cloned().collect())
            .unwrap_or_default();
        for cell in &current {
            tables.remove_row(entity_id, cell);
        }
        for row in rows {
            tables.insert_row(entity_id, &row.cell, row.position);
            for prefix in row.cell.proper_prefixes() {
                tables
                    .prefixes
                    .entry(prefix.to_string())
                    .or_default()
                    .insert((entity_id.clone(), row.cell.clone()));
            }
        }
    }

    pub(crate) fn rows_sorted(&self, entity_id: &EntityId) -> Vec<ContourCell> {
        let tables = self.tables.read();
        let mut rows: Vec<ContourCell> = tables
            .contours
            .get(entity_id)
            .map(|cells| {
                cells
                    .iter()
                    .map(|(cell, pos)| ContourCell::new(cell.clone(), *pos))
                    .collect()
            })
            .unwrap_or_default();
        rows.sort_by(|a, b| a.position.cmp(&b.position).then_with(|| a.cell.cmp(&b.cell)));
        rows
    }
}

#[async_trait]
impl ContourStore for MemoryContourStore {
    async fn get(&self, entity_id: &EntityId) -> Result<Vec<ContourCell>> {
        Ok(self.rows_sorted(entity_id))
    }

    async fn upsert(&self, entity_id: &EntityId, cell: &Geohash, position: u32) -> Result<()> {
        self.tables.write().insert_row(entity_id, cell, position);
        Ok(())
    }

    async fn delete(&self, entity_id: &EntityId, cell: &Geohash) -> Result<()> {
        self.tables.write().remove_row(entity_id, cell);
        Ok(())
    }

    async fn insert_prefixes(
        &self,
        entity_id: &EntityId,
        cell: &Geohash,
        prefixes: &[&str],
    ) -> Result<()> {
        let mut tables = self.tables.write();
        for prefix in prefixes {
            tables
                .prefixes
                .entry((*prefix).to_string())
                .or_default()
                .insert((entity_id.clone(), cell.clone()));
        }
        Ok(())
    }

    async fn find_by_prefix(&self, prefix: &str) -> Result<Vec<EntityId>> {
        if !is_valid_prefix(prefix) {
            return Ok(Vec::new());
        }
        let prefix = prefix.to_ascii_lowercase();
        let tables = self.tables.read();

        let mut found: BTreeSet<EntityId> = BTreeSet::new();
        if let Some(refs) = tables.prefixes.get(&prefix) {
            found.extend(refs.iter().map(|(entity_id, _)| entity_id.clone()));
        }
        if let Ok(cell) = Geohash::parse(&prefix) {
            if let Some(owners) = tables.cells.get(&cell) {
                found.extend(owners.iter().cloned());
            }
        }
        Ok(found.into_iter().collect())
    }

    async fn clear(&self, entity_id: &EntityId) -> Result<()> {
        let mut tables = self.tables.write();
        let cells: Vec<Geohash> = tables
            .contours
            .get(entity_id)
            .map(|rows| rows.keys().cloned().collect())
            .unwrap_or_default();
        for cell in &cells {
            tables.remove_row(entity_id, cell);
        }
        Ok(())
    }

    async fn entity_count(&self) -> Result<usize> {
        Ok(self.tables.read().contours.len())
    }
}
