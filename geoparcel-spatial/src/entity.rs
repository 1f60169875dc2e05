//! Parcel identity and contour value records.

use crate::error::{Result, SpatialError};
use crate::geohash::Geohash;
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Integer parcel identifier.
///
/// Ledger token ids can span the full 256-bit range, so the id is stored as
/// an arbitrary-precision unsigned integer and rendered in decimal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityId(BigUint);

impl EntityId {
    /// Parse a base-10 id.
    pub fn from_decimal(digits: &str) -> Result<Self> {
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(SpatialError::InvalidEntityId(digits.to_string()));
        }
        BigUint::parse_bytes(digits.as_bytes(), 10)
            .map(Self)
            .ok_or_else(|| SpatialError::InvalidEntityId(digits.to_string()))
    }

    /// Parse a base-16 id (without `0x` prefix).
    pub fn from_hex(digits: &str) -> Result<Self> {
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(SpatialError::InvalidEntityId(format!("0x{}", digits)));
        }
        BigUint::parse_bytes(digits.as_bytes(), 16)
            .map(Self)
            .ok_or_else(|| SpatialError::InvalidEntityId(format!("0x{}", digits)))
    }
}

impl From<u64> for EntityId {
    fn from(value: u64) -> Self {
        Self(BigUint::from(value))
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EntityId {
    type Err = SpatialError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_decimal(s)
    }
}

impl TryFrom<String> for EntityId {
    type Error = SpatialError;

    fn try_from(value: String) -> Result<Self> {
        Self::from_decimal(&value)
    }
}

impl From<EntityId> for String {
    fn from(value: EntityId) -> Self {
        value.to_string()
    }
}

/// An entity together with its boundary cells in vertex order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParcelContour {
    pub entity_id: EntityId,
    pub cells: Vec<Geohash>,
}

impl ParcelContour {
    pub fn new(entity_id: EntityId, cells: Vec<Geohash>) -> Self {
        Self { entity_id, cells }
    }
}
