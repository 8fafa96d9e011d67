//! Per-cluster property aggregation.
//!
//! Every cluster carries the full list of its constituent points, the union
//! of each dimension's values, and each measure's mean. Means are always
//! recomputed from the full point list rather than updated incrementally.

use std::collections::{BTreeMap, BTreeSet};

use signal_map_query_models::{DatasetSchema, MeasureSlot, Point};

/// Aggregated properties of a cluster (or of a single point).
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterProperties {
    /// Number of points folded in so far.
    pub total_count: usize,
    /// All constituent points. Coincident duplicates are kept.
    pub points: Vec<Point>,
    /// Mean of the non-null values per measure name.
    pub measure_averages: BTreeMap<String, Option<f64>>,
    /// Union of values per dimension name.
    pub dimension_value_sets: BTreeMap<String, BTreeSet<String>>,
}

impl ClusterProperties {
    /// Properties of a single point.
    #[must_use]
    pub fn from_point(point: &Point, schema: &DatasetSchema) -> Self {
        let mut props = Self {
            total_count: 1,
            points: vec![point.clone()],
            measure_averages: BTreeMap::new(),
            dimension_value_sets: BTreeMap::new(),
        };

        for (index, dim) in schema.dimensions.iter().enumerate() {
            let values = props.dimension_value_sets.entry(dim.clone()).or_default();
            // Missing values decode as empty strings.
            if let Some(value) = point.dimensions.get(index).filter(|v| !v.is_empty()) {
                values.insert(value.clone());
            }
        }

        props.recompute_means(schema);
        props
    }

    /// Folds `other` into `self`.
    pub fn reduce(&mut self, other: &Self, schema: &DatasetSchema) {
        self.total_count += other.total_count;
        self.points.extend(other.points.iter().cloned());

        for (dim, values) in &other.dimension_value_sets {
            self.dimension_value_sets
                .entry(dim.clone())
                .or_default()
                .extend(values.iter().cloned());
        }

        self.recompute_means(schema);
    }

    fn recompute_means(&mut self, schema: &DatasetSchema) {
        for slot in [MeasureSlot::Measure0, MeasureSlot::Measure1] {
            self.measure_averages.insert(
                schema.measure_name(slot).to_string(),
                mean(self.points.iter().filter_map(|p| p.measure(slot))),
            );
        }
    }
}

/// Arithmetic mean, `None` for an empty iterator.
#[allow(clippy::cast_precision_loss)]
pub fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    (count > 0).then(|| sum / count as f64)
}
