//! Render-ready views, one per [`MapLayer`] variant.
//!
//! [`MapLayer`]: signal_map_query_models::MapLayer

use signal_map_cluster::{ClusterNode, to_feature_collection};
use signal_map_grid::GridCellView;
use signal_map_query_models::Point;

/// One sample of the heatmap layer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeatPoint {
    /// Latitude of the sample.
    pub lat: f64,
    /// Longitude of the sample.
    pub lon: f64,
    /// Value of `measure0` at this point.
    pub intensity: f64,
}

impl HeatPoint {
    /// Heat samples for every point that has a `measure0` value.
    #[must_use]
    pub fn from_points(points: &[Point]) -> Vec<Self> {
        points
            .iter()
            .filter_map(|p| {
                Some(Self {
                    lat: p.lat,
                    lon: p.lon,
                    intensity: p.measure0?,
                })
            })
            .collect()
    }
}

/// What the rendering layer draws for the active map layer.
#[derive(Debug, Clone, PartialEq)]
pub enum LayerView {
    /// Cluster markers.
    Clusters(Vec<ClusterNode>),
    /// Heatmap samples.
    Heatmap(Vec<HeatPoint>),
    /// Geohash grid cells with their values.
    Grid(Vec<GridCellView>),
}

impl LayerView {
    /// Number of rendered items.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Clusters(nodes) => nodes.len(),
            Self::Heatmap(points) => points.len(),
            Self::Grid(cells) => cells.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Converts the view to a `GeoJSON` feature collection.
    #[must_use]
    pub fn to_feature_collection(&self) -> geojson::FeatureCollection {
        let features = match self {
            Self::Clusters(nodes) => return to_feature_collection(nodes),
            Self::Heatmap(points) => points
                .iter()
                .map(|p| {
                    let mut properties = serde_json::Map::new();
                    properties.insert("intensity".to_string(), p.intensity.into());
                    geojson::Feature {
                        bbox: None,
                        geometry: Some(geojson::Geometry::new(geojson::Value::Point(vec![
                            p.lon, p.lat,
                        ]))),
                        id: None,
                        properties: Some(properties),
                        foreign_members: None,
                    }
                })
                .collect(),
            Self::Grid(cells) => cells.iter().map(GridCellView::to_feature).collect(),
        };

        geojson::FeatureCollection {
            bbox: None,
            features,
            foreign_members: None,
        }
    }
}
