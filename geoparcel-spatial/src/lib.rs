//! Geohash-keyed spatial index for land-parcel contours.
//!
//! A parcel (entity) has a boundary made of geohash cells in vertex order.
//! The index keeps those cells plus a derived prefix index so that
//! "which parcels touch this area" and "which parcel contains this point"
//! can be answered without scanning every parcel.
//!
//! # Architecture
//!
//! ```text
//!   contour change (entity_id, [cells])
//!                  │
//!                  ▼
//!         GeohashIndexer ── plan_contour_change (pure diff)
//!                  │
//!                  ▼
//!   ┌───────────────────────────────────┐
//!   │ ContourStore                      │
//!   │   contour rows  (entity, cell, pos)│
//!   │   prefix rows   (prefix → cell)   │
//!   └───────────────────────────────────┘
//!                  │
//!                  ▼
//!        SpatialQueryEngine ── prefix lookups ─► ContainmentTest (geo)
//! ```
//!
//! # Modules
//!
//! - [`geohash`]: Geohash cell type, prefixes, encode/decode
//! - [`entity`]: Entity ids and contour value records
//! - [`store`]: Contour store trait
//! - [`memory`] / [`file`]: In-memory and file-backed stores
//! - [`indexer`]: Contour diff and apply
//! - [`geometry`]: Exact containment test
//! - [`query`]: Prefix and inner-point queries
//! - [`config`] / [`error`]: Configuration and error types

pub mod config;
pub mod entity;
pub mod error;
pub mod file;
pub mod geohash;
pub mod geometry;
pub mod indexer;
pub mod memory;
pub mod query;
pub mod store;

pub use config::QueryConfig;
pub use entity::{EntityId, ParcelContour};
pub use error::{Result, SpatialError};
pub use file::FileContourStore;
pub use geohash::Geohash;
pub use geometry::{ContainmentTest, GeoContainment};
pub use indexer::{plan_contour_change, ApplyStats, ContourPlan, GeohashIndexer};
pub use memory::MemoryContourStore;
pub use query::SpatialQueryEngine;
pub use store::{ContourCell, ContourStore};
