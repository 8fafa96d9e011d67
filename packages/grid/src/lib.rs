#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Geohash drill-down grid.
//!
//! Given the selected cell, [`builder::build_grid`] emits its 32 children,
//! its 31 siblings and the sibling ring of every ancestor up to the root.
//! In prediction mode the grid is exactly the set of predicted cells.
//!
//! [`selection::SelectionState`] owns the selection state machine (default
//! selection from the viewport, click-to-recenter, prediction-mode
//! auto-selection), [`prediction::PredictionSet`] resolves prediction values
//! per time step and height, and [`enrich`] attaches a value to every cell.
//! The [`url`] adapter mirrors the selection in a `geohash` query parameter.

pub mod builder;
pub mod enrich;
pub mod prediction;
pub mod selection;
pub mod url;

use signal_map_geohash::GeohashError;

pub use builder::{GridItem, GridRole, build_grid};
pub use enrich::{GridCellView, enrich};
pub use prediction::{PredictionFrame, PredictionSet};
pub use selection::{MapView, SelectionOptions, SelectionState};

/// Errors produced while building or navigating the grid.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GridError {
    /// A geohash in the selection or prediction data is malformed.
    #[error(transparent)]
    InvalidGeohash(#[from] GeohashError),

    /// The hierarchical grid was requested without a selected cell.
    #[error("No geohash is selected and prediction mode is inactive")]
    MissingSelection,
}
