#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Rectangle statistics.
//!
//! Computes per-measure min/max/mean/variance/standard deviation and the
//! covariance and Pearson correlation between the two measures for every
//! point inside a rectangle or geohash cell. Variances are population
//! variances. Any statistic without enough data is `None`, never zero.

use signal_map_geohash::BoundingBox;
use signal_map_query_models::{MeasureSlot, MeasureStats, Point, RectStats, Rectangle};

/// Computes [`RectStats`] over a filtered set of points.
#[derive(Debug, Clone, Copy, Default)]
pub struct RectStatsReducer;

impl RectStatsReducer {
    /// Statistics over every point in `points`.
    #[must_use]
    pub fn reduce_all(points: &[Point]) -> RectStats {
        Self::reduce_where(points, |_| true)
    }

    /// Statistics over the points inside `rect` (closed bounds).
    #[must_use]
    pub fn reduce_rect(points: &[Point], rect: &Rectangle) -> RectStats {
        Self::reduce_where(points, |p| rect.contains(p.lat, p.lon))
    }

    /// Statistics over the points inside a geohash cell (closed bounds).
    #[must_use]
    pub fn reduce_cell(points: &[Point], bbox: &BoundingBox) -> RectStats {
        Self::reduce_where(points, |p| bbox.contains(p.lat, p.lon))
    }

    /// Statistics over the points accepted by `filter`.
    #[must_use]
    pub fn reduce_where(points: &[Point], filter: impl Fn(&Point) -> bool) -> RectStats {
        let selected: Vec<&Point> = points.iter().filter(|p| filter(p)).collect();

        let values = |slot: MeasureSlot| -> Vec<f64> {
            selected.iter().filter_map(|p| p.measure(slot)).collect()
        };
        let pairs: Vec<(f64, f64)> = selected
            .iter()
            .filter_map(|p| Some((p.measure0?, p.measure1?)))
            .collect();

        let (covariance, pearson_correlation) = cross_stats(&pairs);

        RectStats {
            count: selected.len() as u64,
            measure0: measure_stats(&values(MeasureSlot::Measure0)),
            measure1: measure_stats(&values(MeasureSlot::Measure1)),
            covariance,
            pearson_correlation,
        }
    }
}

/// Mean of one measure over the points inside a geohash cell.
///
/// `None` when no point with a value for that measure falls inside.
#[must_use]
pub fn cell_average(points: &[Point], bbox: &BoundingBox, slot: MeasureSlot) -> Option<f64> {
    let values: Vec<f64> = points
        .iter()
        .filter(|p| bbox.contains(p.lat, p.lon))
        .filter_map(|p| p.measure(slot))
        .collect();
    mean(&values)
}

#[allow(clippy::cast_precision_loss)]
fn mean(values: &[f64]) -> Option<f64> {
    (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64)
}

#[allow(clippy::cast_precision_loss)]
fn measure_stats(values: &[f64]) -> MeasureStats {
    let Some(mean) = mean(values) else {
        return MeasureStats::default();
    };

    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;

    MeasureStats {
        min: values.iter().copied().reduce(f64::min),
        max: values.iter().copied().reduce(f64::max),
        mean: Some(mean),
        standard_deviation: Some(variance.sqrt()),
        variance: Some(variance),
    }
}

#[allow(clippy::cast_precision_loss)]
fn cross_stats(pairs: &[(f64, f64)]) -> (Option<f64>, Option<f64>) {
    if pairs.is_empty() {
        return (None, None);
    }

    let n = pairs.len() as f64;
    let mean_x = pairs.iter().map(|(x, _)| x).sum::<f64>() / n;
    let mean_y = pairs.iter().map(|(_, y)| y).sum::<f64>() / n;

    let (mut sxy, mut sxx, mut syy) = (0.0, 0.0, 0.0);
    for (x, y) in pairs {
        let dx = x - mean_x;
        let dy = y - mean_y;
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }

    let covariance = sxy / n;
    let pearson = (pairs.len() >= 2 && sxx > 0.0 && syy > 0.0).then(|| sxy / (sxx * syy).sqrt());

    (Some(covariance), pearson)
}
