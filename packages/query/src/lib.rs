#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Viewport-driven query orchestration for the signal map.
//!
//! [`Orchestrator`] turns map interactions into backend queries through a
//! [`QueryBackend`], drops responses that a newer query has superseded, and
//! fans the surviving ones out to clustering and rectangle statistics.
//! [`HttpQueryBackend`] talks to the dataset service over HTTP.

pub mod backend;
pub mod layer;
pub mod orchestrator;

use signal_map_geohash::GeohashError;
use signal_map_grid::GridError;

pub use backend::{BackendError, HttpQueryBackend, QueryBackend};
pub use layer::{HeatPoint, LayerView};
pub use orchestrator::{ActiveRect, MapSnapshot, Orchestrator, QueryOutcome};

/// Errors surfaced by the orchestrator.
///
/// None of them are fatal: the last applied state stays in place.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    /// A cluster or rectangle query failed.
    #[error("Query failed: {0}")]
    QueryFailed(#[from] BackendError),

    /// A geohash handed to the selection is malformed.
    #[error(transparent)]
    InvalidGeohash(#[from] GeohashError),

    /// The geohash grid could not be built.
    #[error(transparent)]
    Grid(#[from] GridError),

    /// A query needs the viewport, but none has been set yet.
    #[error("No viewport has been set")]
    MissingViewport,
}
