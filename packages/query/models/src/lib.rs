#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Shared data model for the signal map exploration engine.
//!
//! These types cross every boundary in the workspace: the query backend
//! speaks them over JSON, the cluster and grid engines consume them, and the
//! orchestrator snapshots them for the rendering layer. Wire names are
//! `camelCase` to match the backend contract.

pub mod coerce;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// A single geo-tagged measurement sample.
///
/// The backend ships points as positional arrays
/// (`[lat, lon, count, id, measure0, measure1, dimensions]`); an object form
/// with the same field names is accepted as well.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "PointRepr")]
pub struct Point {
    /// Latitude (WGS84).
    pub lat: f64,
    /// Longitude (WGS84).
    pub lon: f64,
    /// Source row ID, when the backend exposes one.
    pub id: Option<String>,
    /// Value of the dataset's first measure.
    pub measure0: Option<f64>,
    /// Value of the dataset's second measure.
    pub measure1: Option<f64>,
    /// Dimension values, aligned with [`DatasetSchema::dimensions`].
    pub dimensions: Vec<String>,
}

impl Point {
    /// Creates a point with no ID and no dimension values.
    #[must_use]
    pub const fn new(lat: f64, lon: f64, measure0: Option<f64>, measure1: Option<f64>) -> Self {
        Self {
            lat,
            lon,
            id: None,
            measure0,
            measure1,
            dimensions: Vec::new(),
        }
    }

    /// Returns the value of the given measure slot.
    #[must_use]
    pub const fn measure(&self, slot: MeasureSlot) -> Option<f64> {
        match slot {
            MeasureSlot::Measure0 => self.measure0,
            MeasureSlot::Measure1 => self.measure1,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PointRepr {
    Positional(
        f64,
        f64,
        serde::de::IgnoredAny,
        Option<coerce::Scalar>,
        Option<f64>,
        Option<f64>,
        Vec<coerce::Scalar>,
    ),
    Object {
        lat: f64,
        lon: f64,
        #[serde(default)]
        id: Option<coerce::Scalar>,
        #[serde(default)]
        measure0: Option<f64>,
        #[serde(default)]
        measure1: Option<f64>,
        #[serde(default)]
        dimensions: Vec<coerce::Scalar>,
    },
}

impl From<PointRepr> for Point {
    fn from(repr: PointRepr) -> Self {
        match repr {
            PointRepr::Positional(lat, lon, _, id, measure0, measure1, dimensions)
            | PointRepr::Object {
                lat,
                lon,
                id,
                measure0,
                measure1,
                dimensions,
            } => Self {
                lat,
                lon,
                id: id.map(String::from),
                measure0,
                measure1,
                dimensions: dimensions.into_iter().map(String::from).collect(),
            },
        }
    }
}

/// Which of the dataset's two measures a value refers to.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum MeasureSlot {
    /// `measure0`
    Measure0,
    /// `measure1`
    Measure1,
}

/// Column names of the dataset currently being explored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetSchema {
    /// Name of the first measure column.
    pub measure0: String,
    /// Name of the second measure column.
    pub measure1: String,
    /// Categorical dimension column names.
    #[serde(default)]
    pub dimensions: Vec<String>,
}

impl DatasetSchema {
    /// Returns the column name behind a measure slot.
    #[must_use]
    pub fn measure_name(&self, slot: MeasureSlot) -> &str {
        match slot {
            MeasureSlot::Measure0 => &self.measure0,
            MeasureSlot::Measure1 => &self.measure1,
        }
    }
}

/// A lat/lon rectangle, always stored with `min <= max` on both axes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rectangle {
    /// `[min, max]` latitude.
    pub lat: [f64; 2],
    /// `[min, max]` longitude.
    pub lon: [f64; 2],
}

impl Rectangle {
    /// Creates a rectangle, swapping bounds that were passed reversed.
    #[must_use]
    pub fn new(lat: [f64; 2], lon: [f64; 2]) -> Self {
        Self {
            lat: ordered(lat),
            lon: ordered(lon),
        }
    }

    /// Creates a rectangle from map-style `south, west, north, east` bounds.
    #[must_use]
    pub fn from_bounds(south: f64, west: f64, north: f64, east: f64) -> Self {
        Self::new([south, north], [west, east])
    }

    /// Center as `(lat, lon)`.
    #[must_use]
    pub fn center(&self) -> (f64, f64) {
        (
            f64::midpoint(self.lat[0], self.lat[1]),
            f64::midpoint(self.lon[0], self.lon[1]),
        )
    }

    /// Closed-interval containment test on all four bounds.
    #[must_use]
    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        lat >= self.lat[0] && lat <= self.lat[1] && lon >= self.lon[0] && lon <= self.lon[1]
    }
}

fn ordered(range: [f64; 2]) -> [f64; 2] {
    if range[0] <= range[1] {
        range
    } else {
        [range[1], range[0]]
    }
}

/// The visible map region and its zoom level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    /// Visible bounds.
    pub rect: Rectangle,
    /// Map zoom level.
    pub zoom: u8,
}

/// Aggregate function applied to grouped series.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum AggType {
    /// Sum of the measure column.
    Sum,
    /// Arithmetic mean of the measure column.
    Avg,
    /// Row count.
    #[default]
    Count,
    /// Minimum of the measure column.
    Min,
    /// Maximum of the measure column.
    Max,
}

/// Inclusive time window in epoch milliseconds. `None` leaves that side open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    /// Window start.
    pub from: Option<i64>,
    /// Window end.
    pub to: Option<i64>,
}

impl TimeRange {
    /// Builds a window from two UTC timestamps.
    #[must_use]
    pub fn between(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self {
            from: Some(from.timestamp_millis()),
            to: Some(to.timestamp_millis()),
        }
    }
}

/// Categorical filters keyed by dimension name. `None` means "any value".
pub type CategoricalFilters = BTreeMap<String, Option<String>>;

/// Everything that determines a backend query.
///
/// Two states that compare equal field-wise describe the same query; the
/// orchestrator uses this type as its dedup and staleness key. It also
/// serializes directly as the backend request body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryState {
    /// Rectangle substituted into the query (viewport or drawn rectangle).
    pub rect: Rectangle,
    /// Map zoom level.
    pub zoom: u8,
    /// Active categorical filters.
    pub categorical_filters: CategoricalFilters,
    /// Group-by dimension columns for the series.
    pub group_by_cols: Vec<String>,
    /// Measure column the series aggregates.
    pub measure_col: Option<String>,
    /// Aggregate function for the series.
    pub agg_type: AggType,
    /// Time window.
    #[serde(flatten)]
    pub time_range: TimeRange,
}

impl QueryState {
    /// Removes every filter keyed on a column that is currently grouped by.
    ///
    /// A column cannot filter and group at the same time. Returns the names
    /// of the filters that were dropped.
    pub fn strip_grouped_filters(&mut self) -> Vec<String> {
        let grouped: Vec<String> = self
            .categorical_filters
            .keys()
            .filter(|dim| self.group_by_cols.contains(dim))
            .cloned()
            .collect();

        for dim in &grouped {
            self.categorical_filters.remove(dim);
        }

        grouped
    }
}

/// Descriptive statistics for one measure. `None` means insufficient data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MeasureStats {
    /// Smallest value.
    pub min: Option<f64>,
    /// Largest value.
    pub max: Option<f64>,
    /// Arithmetic mean.
    pub mean: Option<f64>,
    /// Population standard deviation.
    pub standard_deviation: Option<f64>,
    /// Population variance.
    pub variance: Option<f64>,
}

/// Statistics over all points inside a rectangle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RectStats {
    /// Number of points inside the rectangle.
    pub count: u64,
    /// Statistics for `measure0`.
    pub measure0: MeasureStats,
    /// Statistics for `measure1`.
    pub measure1: MeasureStats,
    /// Population covariance of the two measures.
    pub covariance: Option<f64>,
    /// Pearson correlation of the two measures.
    pub pearson_correlation: Option<f64>,
}

impl RectStats {
    /// Returns the statistics for a measure slot.
    #[must_use]
    pub const fn measure(&self, slot: MeasureSlot) -> &MeasureStats {
        match slot {
            MeasureSlot::Measure0 => &self.measure0,
            MeasureSlot::Measure1 => &self.measure1,
        }
    }
}

/// One entry of the grouped series returned alongside a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupedStat {
    /// Values of the group-by columns for this group.
    #[serde(default, deserialize_with = "coerce::string_list")]
    pub group: Vec<String>,
    /// Aggregated value, `None` when the group has no usable rows.
    #[serde(default)]
    pub value: Option<f64>,
}

/// Distinct values per dimension, as reported by the backend.
pub type Facets = BTreeMap<String, Vec<String>>;

/// Backend response to a map query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueryResponse {
    /// Raw points inside the queried rectangle.
    pub points: Vec<Point>,
    /// Distinct values per dimension.
    #[serde(deserialize_with = "coerce::string_map")]
    pub facets: Facets,
    /// Grouped series.
    pub series: Vec<GroupedStat>,
    /// Rectangle-level statistics.
    pub rect_stats: Option<RectStats>,
    /// Tiles fully inside the rectangle.
    pub fully_contained_tile_count: u64,
    /// Tiles touched by the query.
    pub tile_count: u64,
    /// Points returned.
    pub point_count: u64,
    /// I/O operations the backend performed.
    pub io_count: u64,
    /// Tiles in the whole dataset.
    pub total_tile_count: u64,
    /// Points in the whole dataset.
    pub total_point_count: u64,
}

/// Execution summary of the latest applied query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryInfo {
    /// Round-trip time of the query.
    pub execution_time_ms: u64,
    /// Tiles fully inside the rectangle.
    pub fully_contained_tile_count: u64,
    /// Tiles touched by the query.
    pub tile_count: u64,
    /// Points returned.
    pub point_count: u64,
    /// I/O operations the backend performed.
    pub io_count: u64,
    /// Tiles in the whole dataset.
    pub total_tile_count: u64,
    /// Points in the whole dataset.
    pub total_point_count: u64,
}

impl QueryInfo {
    /// Builds the summary for a response that took `execution_time_ms`.
    #[must_use]
    pub const fn from_response(response: &QueryResponse, execution_time_ms: u64) -> Self {
        Self {
            execution_time_ms,
            fully_contained_tile_count: response.fully_contained_tile_count,
            tile_count: response.tile_count,
            point_count: response.point_count,
            io_count: response.io_count,
            total_tile_count: response.total_tile_count,
            total_point_count: response.total_point_count,
        }
    }
}

/// A signal-quality estimate for one geohash cell at one time and height.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictionRecord {
    /// Record ID.
    #[serde(default)]
    pub id: Option<String>,
    /// Zone the prediction was made for.
    #[serde(default)]
    pub zone_id: Option<String>,
    /// Geohash cell.
    pub geohash: String,
    /// Predicted RSRP.
    pub rsrp: f64,
    /// Time the prediction applies to.
    pub timestamp: DateTime<Utc>,
    /// Height above ground in meters.
    pub height: f64,
}

/// Which visualization the map currently renders.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum MapLayer {
    /// Zoom-dependent point clusters.
    #[default]
    Cluster,
    /// Intensity heatmap of raw points.
    Heatmap,
    /// Hierarchical geohash grid.
    Geohash,
}
