//! Ledger events and their decoding into contour changes.
//!
//! Events arrive in the ledger's native shape: a token id that is either a
//! decimal string or a `0x` hex quantity, and a boundary given as a list of
//! vertices. A vertex is either geohash text or the `0x` hex encoding of the
//! geohash's ASCII bytes, right-padded with zero bytes (fixed-width
//! `bytes32` slots). Decoding happens once, at ingestion.

use crate::error::DecodeError;
use geoparcel_spatial::{EntityId, Geohash, ParcelContour};
use serde::{Deserialize, Serialize};

/// Ledger block height.
pub type BlockNumber = u64;

/// A contour-change event as emitted by the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEvent {
    pub block_number: BlockNumber,
    /// Position of the event within its block
    #[serde(default)]
    pub log_index: u64,
    pub event_name: String,
    pub token_id: String,
    /// Boundary vertices in order; empty clears the parcel
    #[serde(default)]
    pub contour: Vec<String>,
}

impl RawEvent {
    /// Ordering key within the ledger.
    pub fn position(&self) -> (BlockNumber, u64) {
        (self.block_number, self.log_index)
    }

    pub fn decode(&self) -> Result<DecodedEvent, DecodeError> {
        let entity_id = ChainId::parse(&self.token_id).to_entity_id()?;
        let cells = self
            .contour
            .iter()
            .enumerate()
            .map(|(index, raw)| decode_vertex(raw).ok_or_else(|| DecodeError::Vertex {
                index,
                value: raw.clone(),
            }))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(DecodedEvent {
            block_number: self.block_number,
            contour: ParcelContour::new(entity_id, cells),
        })
    }
}

/// Contour change ready for the indexer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedEvent {
    pub block_number: BlockNumber,
    pub contour: ParcelContour,
}

/// A chain-native token id, tagged by its textual encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainId {
    Decimal(String),
    /// Hex digits with the `0x` prefix stripped
    HexEncoded(String),
}

impl ChainId {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        match raw
            .strip_prefix("0x")
            .or_else(|| raw.strip_prefix("0X"))
        {
            Some(digits) => ChainId::HexEncoded(digits.to_string()),
            None => ChainId::Decimal(raw.to_string()),
        }
    }

    pub fn to_entity_id(&self) -> Result<EntityId, DecodeError> {
        match self {
            ChainId::Decimal(digits) => EntityId::from_decimal(digits)
                .map_err(|_| DecodeError::TokenId(digits.clone())),
            ChainId::HexEncoded(digits) => EntityId::from_hex(digits)
                .map_err(|_| DecodeError::TokenId(format!("0x{}", digits))),
        }
    }
}

fn decode_vertex(raw: &str) -> Option<Geohash> {
    let raw = raw.trim();
    match raw.strip_prefix("0x") {
        Some(digits) => {
            let bytes = hex::decode(digits).ok()?;
            let end = bytes.iter().rposition(|b| *b != 0).map_or(0, |i| i + 1);
            let text = std::str::from_utf8(&bytes[..end]).ok()?;
            Geohash::parse(text).ok()
        }
        None => Geohash::parse(raw).ok(),
    }
}
