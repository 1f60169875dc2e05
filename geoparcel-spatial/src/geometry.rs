//! Exact point-in-contour test.
//!
//! Query pruning works on geohash prefixes only; the final containment
//! decision is delegated to a [`ContainmentTest`]. The default
//! implementation builds a polygon from the cell centers of the contour
//! (in vertex order) and checks the center of the query cell with the
//! `geo` crate.

use crate::geohash::Geohash;
use geo::{Contains, Coord, LineString, Point, Polygon};
use std::collections::HashSet;
use std::fmt::Debug;

/// Decides whether a contour contains a point cell.
pub trait ContainmentTest: Debug + Send + Sync {
    fn contains_geohash(&self, contour: &[Geohash], point: &Geohash) -> bool;
}

/// Polygon containment on cell centers using `geo`.
#[derive(Debug, Default, Clone, Copy)]
pub struct GeoContainment;

impl ContainmentTest for GeoContainment {
    fn contains_geohash(&self, contour: &[Geohash], point: &Geohash) -> bool {
        let Some(polygon) = contour_polygon(contour) else {
            return false;
        };
        let (lat, lng) = point.center();
        polygon.contains(&Point::new(lng, lat))
    }
}

/// Build the polygon of a contour, or `None` when it has fewer than three
/// distinct vertices. The ring is closed implicitly.
pub fn contour_polygon(contour: &[Geohash]) -> Option<Polygon<f64>> {
    let distinct: HashSet<&Geohash> = contour.iter().collect();
    if distinct.len() < 3 {
        return None;
    }

    let coords: Vec<Coord<f64>> = contour
        .iter()
        .map(|cell| {
            let (lat, lng) = cell.center();
            Coord { x: lng, y: lat }
        })
        .collect();

    Some(Polygon::new(LineString::from(coords), vec![]))
}
