//! File-backed contour store
//!
//! Contour rows are persisted one JSON file per entity at
//! `{base_path}/contours/{entity_id}.json`. Prefix rows are derived data:
//! they live only in memory and are rebuilt from the contour files on
//! [`FileContourStore::open`].
//!
//! Every mutating call updates the in-memory tables first, then rewrites the
//! entity's file atomically (temp file + rename). If the write fails the
//! entity's in-memory rows are rolled back, so the store never runs ahead of
//! disk. An entity with no rows has no file. A contour file that cannot be
//! parsed fails [`FileContourStore::open`].

use crate::entity::EntityId;
use crate::error::{Result, SpatialError};
use crate::geohash::Geohash;
use crate::memory::MemoryContourStore;
use crate::store::{ContourCell, ContourStore};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::path::{Path, PathBuf};

/// On-disk form of one entity's contour.
#[derive(Debug, Serialize, Deserialize)]
struct ContourFile {
    entity_id: EntityId,
    cells: Vec<ContourCell>,
}

/// Contour store persisted as per-entity JSON files.
#[derive(Debug)]
pub struct FileContourStore {
    base_path: PathBuf,
    working: MemoryContourStore,
}

impl FileContourStore {
    /// Open (or create) a store rooted at `base_path` and load existing rows.
    pub async fn open(base_path: impl AsRef<Path>) -> Result<Self> {
        let base_path = base_path.as_ref().to_path_buf();
        let dir = base_path.join("contours");

        let files = tokio::task::spawn_blocking(move || load_contour_files(&dir))
            .await
            .map_err(|e| SpatialError::storage(format!("Task join error: {}", e)))??;

        let working = MemoryContourStore::new();
        for file in &files {
            for row in &file.cells {
                let prefixes: Vec<&str> = row.cell.proper_prefixes().collect();
                working.upsert(&file.entity_id, &row.cell, row.position).await?;
                working
                    .insert_prefixes(&file.entity_id, &row.cell, &prefixes)
                    .await?;
            }
        }

        tracing::info!(
            path = %base_path.display(),
            entities = files.len(),
            "Opened file contour store"
        );

        Ok(Self { base_path, working })
    }

    fn entity_path(&self, entity_id: &EntityId) -> PathBuf {
        self.base_path
            .join("contours")
            .join(format!("{}.json", entity_id))
    }

    /// Persist the entity, or put its in-memory rows back to `before`.
    async fn persist_or_rollback(
        &self,
        entity_id: &EntityId,
        before: Vec<ContourCell>,
    ) -> Result<()> {
        let result = self.persist(entity_id).await;
        if let Err(ref e) = result {
            tracing::warn!(entity = %entity_id, error = %e, "Contour write failed, rolling back");
            self.working.replace_rows(entity_id, &before);
        }
        result
    }

    /// Rewrite (or remove) the entity file from the in-memory rows.
    async fn persist(&self, entity_id: &EntityId) -> Result<()> {
        let path = self.entity_path(entity_id);
        let cells = self.working.rows_sorted(entity_id);

        if cells.is_empty() {
            return tokio::task::spawn_blocking(move || match std::fs::remove_file(&path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(SpatialError::storage(format!(
                    "Failed to remove contour file {}: {}",
                    path.display(),
                    e
                ))),
            })
            .await
            .map_err(|e| SpatialError::storage(format!("Task join error: {}", e)))?;
        }

        let json = serde_json::to_string_pretty(&ContourFile {
            entity_id: entity_id.clone(),
            cells,
        })?;

        tokio::task::spawn_blocking(move || {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    SpatialError::storage(format!(
                        "Failed to create contour directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
            let tmp_path = path.with_extension("json.tmp");
            std::fs::write(&tmp_path, json.as_bytes()).map_err(|e| {
                SpatialError::storage(format!(
                    "Failed to write contour file {}: {}",
                    tmp_path.display(),
                    e
                ))
            })?;
            std::fs::rename(&tmp_path, &path).map_err(|e| {
                SpatialError::storage(format!(
                    "Failed to rename contour file {}: {}",
                    path.display(),
                    e
                ))
            })
        })
        .await
        .map_err(|e| SpatialError::storage(format!("Task join error: {}", e)))?
    }
}

fn load_contour_files(dir: &Path) -> Result<Vec<ContourFile>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
        Err(e) => {
            return Err(SpatialError::storage(format!(
                "Failed to list contour directory {}: {}",
                dir.display(),
                e
            )))
        }
    };

    let mut files = Vec::new();
    for entry in entries {
        let path = entry?.path();
        // Skips leftover `.json.tmp` files too: their extension is `tmp`.
        if !path.extension().is_some_and(|ext| ext == "json") {
            continue;
        }
        let contents = std::fs::read_to_string(&path)?;
        // Fatal: events behind the watermark are not replayed on restart.
        let file = serde_json::from_str::<ContourFile>(&contents).map_err(|e| {
            SpatialError::storage(format!(
                "Corrupt contour file {}: {}",
                path.display(),
                e
            ))
        })?;
        files.push(file);
    }
    Ok(files)
}

#[async_trait]
impl ContourStore for FileContourStore {
    async fn get(&self, entity_id: &EntityId) -> Result<Vec<ContourCell>> {
        self.working.get(entity_id).await
    }

    async fn upsert(&self, entity_id: &EntityId, cell: &Geohash, position: u32) -> Result<()> {
        let before = self.working.rows_sorted(entity_id);
        self.working.upsert(entity_id, cell, position).await?;
        self.persist_or_rollback(entity_id, before).await
    }

    async fn delete(&self, entity_id: &EntityId, cell: &Geohash) -> Result<()> {
        let before = self.working.rows_sorted(entity_id);
        self.working.delete(entity_id, cell).await?;
        self.persist_or_rollback(entity_id, before).await
    }

    async fn insert_prefixes(
        &self,
        entity_id: &EntityId,
        cell: &Geohash,
        prefixes: &[&str],
    ) -> Result<()> {
        self.working.insert_prefixes(entity_id, cell, prefixes).await
    }

    async fn find_by_prefix(&self, prefix: &str) -> Result<Vec<EntityId>> {
        self.working.find_by_prefix(prefix).await
    }

    async fn clear(&self, entity_id: &EntityId) -> Result<()> {
        let before = self.working.rows_sorted(entity_id);
        self.working.clear(entity_id).await?;
        self.persist_or_rollback(entity_id, before).await
    }

    async fn entity_count(&self) -> Result<usize> {
        self.working.entity_count().await
    }
}
