//! Spatial query engine.
//!
//! Both queries run in two phases:
//!
//! ```text
//! prefix lookups ──► candidate entity ids (deduplicated)
//!                        │
//!                        ▼
//!               ordered contour reconstruction
//!                        │
//!                        ▼
//!            exact containment (point queries only)
//! ```
//!
//! Reads are side-effect free and may interleave with indexing; a query can
//! observe a partially applied batch.

use crate::config::QueryConfig;
use crate::entity::{EntityId, ParcelContour};
use crate::error::Result;
use crate::geohash::{is_valid_prefix, Geohash};
use crate::geometry::{ContainmentTest, GeoContainment};
use crate::store::ContourStore;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Serves prefix and point-containment lookups against a contour store.
#[derive(Debug, Clone)]
pub struct SpatialQueryEngine {
    store: Arc<dyn ContourStore>,
    containment: Arc<dyn ContainmentTest>,
    config: QueryConfig,
}

impl SpatialQueryEngine {
    /// Engine with the default `geo`-based containment test.
    pub fn new(store: Arc<dyn ContourStore>) -> Self {
        Self {
            store,
            containment: Arc::new(GeoContainment),
            config: QueryConfig::default(),
        }
    }

    pub fn with_containment(mut self, containment: Arc<dyn ContainmentTest>) -> Self {
        self.containment = containment;
        self
    }

    pub fn with_config(mut self, config: QueryConfig) -> Self {
        self.config = config;
        self
    }

    /// Parcels with at least one boundary cell inside `prefix`.
    pub async fn by_parent_prefix(&self, prefix: &str) -> Result<Vec<ParcelContour>> {
        self.by_parent_prefixes(&[prefix]).await
    }

    /// Union of [`by_parent_prefix`](Self::by_parent_prefix) over several
    /// prefixes; a parcel matching more than one prefix appears once.
    pub async fn by_parent_prefixes<S: AsRef<str>>(
        &self,
        prefixes: &[S],
    ) -> Result<Vec<ParcelContour>> {
        let mut candidates = BTreeSet::new();
        for prefix in prefixes {
            let prefix = prefix.as_ref();
            if !is_valid_prefix(prefix) {
                continue;
            }
            candidates.extend(self.store.find_by_prefix(prefix).await?);
        }
        self.reconstruct(candidates).await
    }

    /// Parcels whose contour contains `point_cell`.
    pub async fn by_inner_point(&self, point_cell: &str) -> Result<Vec<ParcelContour>> {
        let Ok(point) = Geohash::parse(point_cell) else {
            return Ok(Vec::new());
        };

        let mut lookups: Vec<&str> = vec![point.as_str()];
        lookups.extend(
            point
                .proper_prefixes()
                .take_while(|p| p.len() >= self.config.min_prefix_len),
        );

        let mut candidates = BTreeSet::new();
        for prefix in lookups {
            candidates.extend(self.store.find_by_prefix(prefix).await?);
        }
        let candidate_count = candidates.len();

        let contours = self.reconstruct(candidates).await?;
        let matched: Vec<ParcelContour> = contours
            .into_iter()
            .filter(|c| self.containment.contains_geohash(&c.cells, &point))
            .collect();

        tracing::debug!(
            point = %point,
            candidates = candidate_count,
            matched = matched.len(),
            "Inner point query"
        );
        Ok(matched)
    }

    /// Load ordered contours for the candidates; entities cleared since the
    /// lookup are dropped.
    async fn reconstruct(&self, candidates: BTreeSet<EntityId>) -> Result<Vec<ParcelContour>> {
        let mut out = Vec::with_capacity(candidates.len());
        for entity_id in candidates {
            let rows = self.store.get(&entity_id).await?;
            if rows.is_empty() {
                continue;
            }
            let cells = rows.into_iter().map(|r| r.cell).collect();
            out.push(ParcelContour::new(entity_id, cells));
        }
        Ok(out)
    }
}
