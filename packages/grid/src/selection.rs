//! Selection state machine for the geohash grid.

use serde::Deserialize;
use signal_map_geohash::{ZoomPrecisionMap, decode, validate};
use signal_map_query_models::Viewport;

use crate::{GridError, GridItem, build_grid};

/// Tunables for selection-driven map moves.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SelectionOptions {
    /// Center difference in degrees below which a click does not recenter
    /// the map.
    pub recenter_epsilon: f64,
}

impl Default for SelectionOptions {
    fn default() -> Self {
        Self {
            recenter_epsilon: 1e-6,
        }
    }
}

/// Map center and zoom.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MapView {
    /// Center as `(lat, lon)`.
    pub center: (f64, f64),
    /// Zoom level.
    pub zoom: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
enum Selection {
    #[default]
    Unselected,
    Selected(String),
}

/// Owns the selected geohash and the prediction-mode flags.
///
/// The grid is never built without a selection outside prediction mode:
/// [`Self::grid`] derives a default from the viewport center first.
#[derive(Debug, Clone, Default)]
pub struct SelectionState {
    options: SelectionOptions,
    zoom_map: ZoomPrecisionMap,
    selection: Selection,
    prediction_mode: bool,
    prediction_initialized: bool,
}

impl SelectionState {
    /// Creates an empty selection that derives its default cell through
    /// `zoom_map`.
    #[must_use]
    pub fn new(options: SelectionOptions, zoom_map: ZoomPrecisionMap) -> Self {
        Self {
            options,
            zoom_map,
            ..Self::default()
        }
    }

    /// The selected geohash, if any.
    #[must_use]
    pub fn selection(&self) -> Option<&str> {
        match &self.selection {
            Selection::Unselected => None,
            Selection::Selected(hash) => Some(hash),
        }
    }

    /// Replaces the selection. `None` clears it.
    ///
    /// # Errors
    ///
    /// * If `hash` is not a valid geohash
    pub fn set_selection(&mut self, hash: Option<String>) -> Result<(), GridError> {
        self.selection = match hash {
            Some(hash) => {
                validate(&hash)?;
                Selection::Selected(hash)
            }
            None => Selection::Unselected,
        };
        Ok(())
    }

    /// Whether the grid is showing prediction cells.
    #[must_use]
    pub const fn prediction_mode(&self) -> bool {
        self.prediction_mode
    }

    /// Enters or leaves prediction mode. Leaving re-arms the one-shot
    /// auto-selection for the next entry.
    pub fn set_prediction_mode(&mut self, enabled: bool) {
        if !enabled {
            self.prediction_initialized = false;
        }
        self.prediction_mode = enabled;
    }

    /// Selects a clicked cell.
    ///
    /// Returns the view the map should move to, or `None` when the map is
    /// already there (center within the configured epsilon, same zoom).
    ///
    /// # Errors
    ///
    /// * If `hash` is not a valid geohash
    pub fn click(&mut self, hash: &str, current: &MapView) -> Result<Option<MapView>, GridError> {
        let center = decode(hash)?;
        let zoom = self.zoom_map.precision_to_zoom(hash.len());
        self.selection = Selection::Selected(hash.to_string());

        let epsilon = self.options.recenter_epsilon;
        let moved = (center.0 - current.center.0).abs() > epsilon
            || (center.1 - current.center.1).abs() > epsilon
            || zoom != current.zoom;

        Ok(moved.then_some(MapView { center, zoom }))
    }

    /// Derives a selection from the viewport center when there is none.
    ///
    /// Does nothing in prediction mode. Returns the selection afterwards.
    ///
    /// # Errors
    ///
    /// * If the viewport center cannot be encoded
    pub fn ensure_selection(&mut self, viewport: &Viewport) -> Result<Option<&str>, GridError> {
        if !self.prediction_mode {
            self.select_default(viewport)?;
        }
        Ok(self.selection())
    }

    fn select_default(&mut self, viewport: &Viewport) -> Result<(), GridError> {
        if self.selection == Selection::Unselected {
            let hash = self.zoom_map.viewport_geohash(viewport)?;
            log::debug!("No geohash selected, defaulting to viewport center {hash}");
            self.selection = Selection::Selected(hash);
        }
        Ok(())
    }

    /// Runs the prediction-mode auto-selection once per entry.
    ///
    /// When the current selection is missing or not among
    /// `prediction_hashes`, selects the predicted cell closest to the
    /// centroid of all predicted cell centers. Returns whether the
    /// selection changed.
    ///
    /// # Errors
    ///
    /// * If a predicted geohash is invalid
    pub fn sync_prediction(&mut self, prediction_hashes: &[String]) -> Result<bool, GridError> {
        if !self.prediction_mode || self.prediction_initialized || prediction_hashes.is_empty() {
            return Ok(false);
        }
        self.prediction_initialized = true;

        if self
            .selection()
            .is_some_and(|hash| prediction_hashes.iter().any(|p| p == hash))
        {
            return Ok(false);
        }

        let closest = closest_to_centroid(prediction_hashes)?;
        log::debug!("Auto-selecting prediction cell {closest:?}");
        let changed = closest.is_some();
        if let Some(hash) = closest {
            self.selection = Selection::Selected(hash);
        }
        Ok(changed)
    }

    /// Builds the grid for the current state.
    ///
    /// # Errors
    ///
    /// * If the selection or a predicted geohash is invalid
    pub fn grid(
        &mut self,
        viewport: &Viewport,
        prediction_hashes: &[String],
    ) -> Result<Vec<GridItem>, GridError> {
        if self.prediction_mode && !prediction_hashes.is_empty() {
            self.sync_prediction(prediction_hashes)?;
        } else {
            self.select_default(viewport)?;
        }
        build_grid(self.selection(), prediction_hashes, self.prediction_mode)
    }
}

fn closest_to_centroid(hashes: &[String]) -> Result<Option<String>, GridError> {
    let centers = hashes
        .iter()
        .map(|hash| Ok((hash, decode(hash)?)))
        .collect::<Result<Vec<_>, GridError>>()?;

    if centers.is_empty() {
        return Ok(None);
    }

    #[allow(clippy::cast_precision_loss)]
    let n = centers.len() as f64;
    let lat = centers.iter().map(|(_, c)| c.0).sum::<f64>() / n;
    let lon = centers.iter().map(|(_, c)| c.1).sum::<f64>() / n;

    let distance = |c: &(f64, f64)| (c.0 - lat).hypot(c.1 - lon);

    Ok(centers
        .iter()
        .min_by(|a, b| distance(&a.1).total_cmp(&distance(&b.1)))
        .map(|(hash, _)| (*hash).clone()))
}
