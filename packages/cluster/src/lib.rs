#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Zoom-dependent clustering of measurement points for map rendering.
//!
//! A [`SpatialIndex`] is built once per query result and then asked for the
//! clusters inside a viewport at an exact zoom. Each aggregate node carries
//! its constituent points, the union of their dimension values and the mean
//! of each measure, so popups and geohash binning never go back to the raw
//! batch.

pub mod index;
pub mod reduce;

use std::collections::{BTreeMap, BTreeSet};

use serde::Deserialize;
use signal_map_query_models::{DatasetSchema, Point, Rectangle};

pub use index::{SpatialIndex, SuperclusterIndex};
pub use reduce::ClusterProperties;

/// Clustering parameters.
///
/// Defaults match the thresholds the dashboard has always used; they are
/// tunable rather than invariants.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ClusterOptions {
    /// Cluster radius in pixels.
    pub radius: f64,
    /// Tile extent the radius is relative to.
    pub extent: f64,
    /// Minimum number of points that form a cluster.
    pub min_points: usize,
    /// Lowest zoom level clusters are generated for.
    pub min_zoom: u8,
    /// Highest zoom level clusters are generated for. Above it every point
    /// is its own leaf.
    pub max_zoom: u8,
}

impl Default for ClusterOptions {
    fn default() -> Self {
        Self {
            radius: 60.0,
            extent: 256.0,
            min_points: 3,
            min_zoom: 0,
            max_zoom: 18,
        }
    }
}

/// Whether a node wraps one point or several.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// Exactly one point.
    Leaf,
    /// Two or more points merged at this zoom.
    Aggregate,
}

/// A cluster or single point, ready for rendering.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterNode {
    /// Leaf or aggregate.
    pub kind: NodeKind,
    /// Position as `(lon, lat)`. Aggregates use the weighted centroid.
    pub coordinates: (f64, f64),
    /// Number of points, always `points.len()`.
    pub total_count: usize,
    /// All constituent points.
    pub points: Vec<Point>,
    /// Mean of the non-null values per measure name.
    pub measure_averages: BTreeMap<String, Option<f64>>,
    /// Union of values per dimension name.
    pub dimension_value_sets: BTreeMap<String, BTreeSet<String>>,
}

impl ClusterNode {
    fn from_properties(kind: NodeKind, coordinates: (f64, f64), props: ClusterProperties) -> Self {
        Self {
            kind,
            coordinates,
            total_count: props.total_count,
            points: props.points,
            measure_averages: props.measure_averages,
            dimension_value_sets: props.dimension_value_sets,
        }
    }

    /// Converts to a `GeoJSON` point feature.
    ///
    /// Properties carry `totalCount`, `cluster`, one entry per measure name
    /// with its average and one array per dimension name with its values.
    #[must_use]
    pub fn to_feature(&self) -> geojson::Feature {
        let mut properties = serde_json::Map::new();
        properties.insert("totalCount".to_string(), self.total_count.into());
        properties.insert(
            "cluster".to_string(),
            (self.kind == NodeKind::Aggregate).into(),
        );
        for (name, avg) in &self.measure_averages {
            properties.insert(name.clone(), avg.map_or(serde_json::Value::Null, Into::into));
        }
        for (name, values) in &self.dimension_value_sets {
            properties.insert(
                name.clone(),
                values.iter().cloned().collect::<Vec<_>>().into(),
            );
        }

        geojson::Feature {
            bbox: None,
            geometry: Some(geojson::Geometry::new(geojson::Value::Point(vec![
                self.coordinates.0,
                self.coordinates.1,
            ]))),
            id: None,
            properties: Some(properties),
            foreign_members: None,
        }
    }
}

/// Converts nodes to a `GeoJSON` feature collection.
#[must_use]
pub fn to_feature_collection(nodes: &[ClusterNode]) -> geojson::FeatureCollection {
    geojson::FeatureCollection {
        bbox: None,
        features: nodes.iter().map(ClusterNode::to_feature).collect(),
        foreign_members: None,
    }
}

/// Builds cluster indexes and queries them.
#[derive(Debug, Clone, Default)]
pub struct ClusterAggregator {
    options: ClusterOptions,
}

impl ClusterAggregator {
    /// Creates an aggregator with the given parameters.
    #[must_use]
    pub const fn new(options: ClusterOptions) -> Self {
        Self { options }
    }

    /// Clustering parameters in use.
    #[must_use]
    pub const fn options(&self) -> &ClusterOptions {
        &self.options
    }

    /// Builds an index over one query result's points.
    #[must_use]
    pub fn build_index(&self, points: Vec<Point>, schema: &DatasetSchema) -> SuperclusterIndex {
        let mut index = SuperclusterIndex::new(self.options.clone(), schema.clone());
        index.load(points);
        index
    }

    /// Clusters `points` and returns the nodes inside `bbox` at `zoom`.
    #[must_use]
    pub fn cluster(
        &self,
        points: &[Point],
        bbox: &Rectangle,
        zoom: u8,
        schema: &DatasetSchema,
    ) -> Vec<ClusterNode> {
        if points.is_empty() {
            return Vec::new();
        }
        self.build_index(points.to_vec(), schema)
            .get_clusters(bbox, zoom)
    }
}
