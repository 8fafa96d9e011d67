//! Zoom level ↔ geohash precision mapping.
//!
//! The mapping is a step table of [`ZoomBand`]s. Each band covers the zooms
//! from its `min_zoom` up to the next band, and zooms below the lowest band
//! fall into it. The inverse maps a precision back to the lowest zoom that
//! reaches it, which keeps both directions monotonic.

use serde::Deserialize;
use signal_map_query_models::Viewport;

use crate::{GeohashError, codec};

/// Highest zoom the map allows.
pub const DEFAULT_MAX_ZOOM: u8 = 18;

/// One step of the zoom table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ZoomBand {
    /// Lowest zoom level of the band.
    pub min_zoom: u8,
    /// Geohash precision used inside the band.
    pub precision: usize,
}

#[derive(Deserialize)]
struct ZoomTable {
    #[serde(default = "default_max_zoom")]
    max_zoom: u8,
    #[serde(default = "default_bands")]
    bands: Vec<ZoomBand>,
}

const fn default_max_zoom() -> u8 {
    DEFAULT_MAX_ZOOM
}

fn default_bands() -> Vec<ZoomBand> {
    [(16, 7), (14, 6), (11, 5), (8, 4), (6, 3), (4, 2)]
        .into_iter()
        .map(|(min_zoom, precision)| ZoomBand {
            min_zoom,
            precision,
        })
        .collect()
}

/// Bidirectional zoom/precision mapping, clamped to a maximum zoom.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "ZoomTable")]
pub struct ZoomPrecisionMap {
    max_zoom: u8,
    /// Sorted by `min_zoom`, highest first.
    bands: Vec<ZoomBand>,
}

impl From<ZoomTable> for ZoomPrecisionMap {
    fn from(table: ZoomTable) -> Self {
        Self::new(table.max_zoom, table.bands)
    }
}

impl Default for ZoomPrecisionMap {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ZOOM, default_bands())
    }
}

impl ZoomPrecisionMap {
    /// Builds a map from bands in any order. An empty band list falls back
    /// to the default table.
    #[must_use]
    pub fn new(max_zoom: u8, mut bands: Vec<ZoomBand>) -> Self {
        if bands.is_empty() {
            bands = default_bands();
        }
        bands.sort_by(|a, b| b.min_zoom.cmp(&a.min_zoom));
        Self { max_zoom, bands }
    }

    /// Highest zoom the map allows.
    #[must_use]
    pub const fn max_zoom(&self) -> u8 {
        self.max_zoom
    }

    /// Bands, highest zoom first.
    #[must_use]
    pub fn bands(&self) -> &[ZoomBand] {
        &self.bands
    }

    fn lowest_band(&self) -> ZoomBand {
        self.bands
            .last()
            .copied()
            .unwrap_or(ZoomBand {
                min_zoom: 0,
                precision: 1,
            })
    }

    /// Geohash precision to use at `zoom`.
    #[must_use]
    pub fn zoom_to_precision(&self, zoom: u8) -> usize {
        let zoom = zoom.min(self.max_zoom);
        self.bands
            .iter()
            .find(|band| zoom >= band.min_zoom)
            .map_or_else(|| self.lowest_band().precision, |band| band.precision)
    }

    /// Lowest zoom at which `precision` is reached, clamped to the maximum
    /// zoom.
    ///
    /// Precisions finer than the table clamp to the top band, coarser ones
    /// to the bottom band.
    #[must_use]
    pub fn precision_to_zoom(&self, precision: usize) -> u8 {
        let zoom = self
            .bands
            .iter()
            .rev()
            .find(|band| band.precision >= precision)
            .or_else(|| self.bands.first())
            .map_or(0, |band| band.min_zoom);
        zoom.min(self.max_zoom)
    }

    /// The geohash of the viewport center at the precision for its zoom.
    ///
    /// This is the default selection when the grid opens without one.
    ///
    /// # Errors
    ///
    /// Returns [`GeohashError`] if the viewport center is not a valid
    /// coordinate or the table yields an unsupported precision.
    pub fn viewport_geohash(&self, viewport: &Viewport) -> Result<String, GeohashError> {
        let (lat, lon) = viewport.rect.center();
        codec::encode(lat, lon, self.zoom_to_precision(viewport.zoom))
    }
}
