#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Geohash cells for the drill-down grid.
//!
//! [`codec`] encodes and decodes base-32 geohashes and walks the cell
//! hierarchy (parent, 32 children, 31 siblings). [`zoom`] maps map zoom
//! levels to geohash precision and back.

pub mod codec;
pub mod zoom;

use signal_map_query_models::Rectangle;

pub use codec::{children, decode, decode_bbox, encode, parent, siblings, validate};
pub use zoom::{ZoomBand, ZoomPrecisionMap};

/// Longest geohash the codec accepts.
pub const MAX_PRECISION: usize = 12;

/// Errors produced by geohash operations.
///
/// A malformed geohash always indicates a logic bug upstream, so decoding
/// never falls back to a degenerate cell.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GeohashError {
    /// The geohash string was empty.
    #[error("Geohash is empty")]
    Empty,

    /// The geohash contains a character outside the base-32 alphabet.
    #[error("Invalid character {character:?} in geohash {hash:?}")]
    InvalidCharacter {
        /// The offending geohash.
        hash: String,
        /// The first character not in the alphabet.
        character: char,
    },

    /// The requested precision is outside `1..=MAX_PRECISION`.
    #[error("Geohash precision {0} is outside 1..={MAX_PRECISION}")]
    InvalidPrecision(usize),

    /// The coordinate is not finite or is outside the WGS84 range.
    #[error("Coordinate ({lat}, {lon}) is outside the valid range")]
    InvalidCoordinate {
        /// Latitude.
        lat: f64,
        /// Longitude.
        lon: f64,
    },
}

/// Bounds of a geohash cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    /// Southern edge.
    pub lat_min: f64,
    /// Western edge.
    pub lon_min: f64,
    /// Northern edge.
    pub lat_max: f64,
    /// Eastern edge.
    pub lon_max: f64,
}

impl BoundingBox {
    /// Closed-interval containment on all four edges.
    ///
    /// Points on a shared edge belong to both neighboring cells.
    #[must_use]
    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        lat >= self.lat_min && lat <= self.lat_max && lon >= self.lon_min && lon <= self.lon_max
    }

    /// Center as `(lat, lon)`.
    #[must_use]
    pub fn center(&self) -> (f64, f64) {
        (
            f64::midpoint(self.lat_min, self.lat_max),
            f64::midpoint(self.lon_min, self.lon_max),
        )
    }

    /// Converts to the query-model rectangle.
    #[must_use]
    pub fn to_rectangle(&self) -> Rectangle {
        Rectangle::new([self.lat_min, self.lat_max], [self.lon_min, self.lon_max])
    }

    /// Converts to a `geo` rectangle in `(x = lon, y = lat)` order.
    #[must_use]
    pub fn to_rect(&self) -> geo::Rect<f64> {
        geo::Rect::new(
            geo::coord! { x: self.lon_min, y: self.lat_min },
            geo::coord! { x: self.lon_max, y: self.lat_max },
        )
    }
}

/// A validated geohash together with its decoded bounds.
#[derive(Debug, Clone, PartialEq)]
pub struct GeohashCell {
    hash: String,
    bbox: BoundingBox,
}

impl GeohashCell {
    /// Validates `hash` and decodes its bounds.
    ///
    /// # Errors
    ///
    /// Returns [`GeohashError`] if `hash` is empty or not base-32.
    pub fn new(hash: impl Into<String>) -> Result<Self, GeohashError> {
        let hash = hash.into();
        let bbox = decode_bbox(&hash)?;
        Ok(Self { hash, bbox })
    }

    /// The geohash string.
    #[must_use]
    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// Number of characters in the geohash.
    #[must_use]
    pub fn precision(&self) -> usize {
        self.hash.len()
    }

    /// Decoded cell bounds.
    #[must_use]
    pub const fn bbox(&self) -> &BoundingBox {
        &self.bbox
    }
}
