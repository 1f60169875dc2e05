//! Geohash cells.
//!
//! A geohash is a base-32 string that interleaves longitude and latitude
//! bisection bits, longitude first. Every prefix of a cell names an
//! enclosing ancestor cell, which is what the prefix index relies on.

use crate::error::{Result, SpatialError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Geohash base-32 alphabet (no `a`, `i`, `l`, `o`).
pub const ALPHABET: &[u8; 32] = b"0123456789bcdefghjkmnpqrstuvwxyz";

/// Maximum precision accepted by [`Geohash::encode`].
pub const MAX_PRECISION: usize = 22;

fn decode_char(c: u8) -> Option<u8> {
    let c = c.to_ascii_lowercase();
    ALPHABET.iter().position(|&a| a == c).map(|i| i as u8)
}

/// Check whether `s` is a non-empty string over the geohash alphabet.
///
/// Used to reject malformed query arguments without raising an error.
pub fn is_valid_prefix(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| decode_char(b).is_some())
}

/// Axis-aligned cell bounds in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellBounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl CellBounds {
    /// Center of the cell as `(lat, lng)`.
    pub fn center(&self) -> (f64, f64) {
        (
            (self.min_lat + self.max_lat) / 2.0,
            (self.min_lng + self.max_lng) / 2.0,
        )
    }
}

/// A validated, lowercase geohash cell.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Geohash(String);

impl Geohash {
    /// Parse a geohash, normalizing to lowercase.
    pub fn parse(value: &str) -> Result<Self> {
        if !is_valid_prefix(value) {
            return Err(SpatialError::invalid_geohash(value));
        }
        Ok(Self(value.to_ascii_lowercase()))
    }

    /// Encode a coordinate at the given precision (1..=22 characters).
    pub fn encode(lat: f64, lng: f64, precision: usize) -> Result<Self> {
        if precision == 0 || precision > MAX_PRECISION {
            return Err(SpatialError::Config(format!(
                "geohash precision must be 1..={}, got {}",
                MAX_PRECISION, precision
            )));
        }
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lng) {
            return Err(SpatialError::invalid_geohash(format!("({}, {})", lat, lng)));
        }

        let (mut lat_lo, mut lat_hi) = (-90.0_f64, 90.0_f64);
        let (mut lng_lo, mut lng_hi) = (-180.0_f64, 180.0_f64);
        let mut out = String::with_capacity(precision);
        let mut even = true;

        while out.len() < precision {
            let mut idx = 0u8;
            for _ in 0..5 {
                idx <<= 1;
                if even {
                    let mid = (lng_lo + lng_hi) / 2.0;
                    if lng >= mid {
                        idx |= 1;
                        lng_lo = mid;
                    } else {
                        lng_hi = mid;
                    }
                } else {
                    let mid = (lat_lo + lat_hi) / 2.0;
                    if lat >= mid {
                        idx |= 1;
                        lat_lo = mid;
                    } else {
                        lat_hi = mid;
                    }
                }
                even = !even;
            }
            out.push(ALPHABET[idx as usize] as char);
        }

        Ok(Self(out))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Proper prefixes, longest first: `len-1` characters down to 1.
    ///
    /// `"w24q"` yields `"w24"`, `"w2"`, `"w"`.
    pub fn proper_prefixes(&self) -> impl Iterator<Item = &str> + '_ {
        (1..self.0.len()).rev().map(move |n| &self.0[..n])
    }

    /// Decode the cell rectangle.
    pub fn bounds(&self) -> CellBounds {
        let (mut lat_lo, mut lat_hi) = (-90.0_f64, 90.0_f64);
        let (mut lng_lo, mut lng_hi) = (-180.0_f64, 180.0_f64);
        let mut even = true;

        for b in self.0.bytes() {
            // Validated at construction.
            let idx = decode_char(b).unwrap_or(0);
            for shift in (0..5).rev() {
                let bit = (idx >> shift) & 1;
                if even {
                    let mid = (lng_lo + lng_hi) / 2.0;
                    if bit == 1 {
                        lng_lo = mid;
                    } else {
                        lng_hi = mid;
                    }
                } else {
                    let mid = (lat_lo + lat_hi) / 2.0;
                    if bit == 1 {
                        lat_lo = mid;
                    } else {
                        lat_hi = mid;
                    }
                }
                even = !even;
            }
        }

        CellBounds {
            min_lat: lat_lo,
            max_lat: lat_hi,
            min_lng: lng_lo,
            max_lng: lng_hi,
        }
    }

    /// Cell center as `(lat, lng)`.
    pub fn center(&self) -> (f64, f64) {
        self.bounds().center()
    }
}

impl fmt::Display for Geohash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Geohash {
    type Err = SpatialError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Geohash {
    type Error = SpatialError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Geohash> for String {
    fn from(value: Geohash) -> Self {
        value.0
    }
}

impl AsRef<str> for Geohash {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
