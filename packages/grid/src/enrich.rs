//! Per-cell values for rendering.

use std::collections::BTreeMap;

use signal_map_query_models::{MeasureSlot, Point};
use signal_map_stats::cell_average;

use crate::{GridItem, GridRole};

/// A grid item together with the value shown for it.
#[derive(Debug, Clone, PartialEq)]
pub struct GridCellView {
    /// The grid item.
    pub item: GridItem,
    /// Mean measure inside the cell, or the predicted value for prediction
    /// cells. `None` when there is no data.
    pub value: Option<f64>,
}

impl GridCellView {
    /// Converts to a `GeoJSON` polygon feature with `geohash`, `role` and
    /// `value` properties.
    #[must_use]
    pub fn to_feature(&self) -> geojson::Feature {
        let polygon = self.item.cell.bbox().to_rect().to_polygon();

        let mut properties = serde_json::Map::new();
        properties.insert("geohash".to_string(), self.item.cell.hash().into());
        properties.insert("role".to_string(), self.item.role.as_ref().into());
        properties.insert(
            "value".to_string(),
            self.value.map_or(serde_json::Value::Null, Into::into),
        );

        geojson::Feature {
            bbox: None,
            geometry: Some(geojson::Geometry::new(geojson::Value::from(&polygon))),
            id: None,
            properties: Some(properties),
            foreign_members: None,
        }
    }
}

/// Attaches a value to every grid item.
///
/// Prediction cells take their value from `predictions` by geohash. All
/// other cells average `slot` over the points inside the cell bounds.
#[must_use]
pub fn enrich(
    items: Vec<GridItem>,
    points: &[Point],
    slot: MeasureSlot,
    predictions: Option<&BTreeMap<String, f64>>,
) -> Vec<GridCellView> {
    items
        .into_iter()
        .map(|item| {
            let value = match item.role {
                GridRole::Prediction => {
                    predictions.and_then(|values| values.get(item.cell.hash()).copied())
                }
                GridRole::Children | GridRole::Siblings | GridRole::Context => {
                    cell_average(points, item.cell.bbox(), slot)
                }
            };
            GridCellView { item, value }
        })
        .collect()
}
