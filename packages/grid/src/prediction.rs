//! Prediction data for the grid overlay.
//!
//! Predictions arrive as one record per `(geohash, timestamp, height)`. The
//! overlay shows one time step at one height, chosen on a timeline.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use signal_map_query_models::PredictionRecord;

/// The time step and height currently shown.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PredictionFrame {
    /// Prediction timestamp.
    pub timestamp: DateTime<Utc>,
    /// Height in meters.
    pub height: f64,
}

/// All prediction records of the active zone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PredictionSet {
    records: Vec<PredictionRecord>,
}

impl PredictionSet {
    /// Wraps a batch of records.
    #[must_use]
    pub const fn new(records: Vec<PredictionRecord>) -> Self {
        Self { records }
    }

    /// Whether there are no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// The raw records.
    #[must_use]
    pub fn records(&self) -> &[PredictionRecord] {
        &self.records
    }

    /// Distinct geohashes, in order of first appearance.
    #[must_use]
    pub fn geohashes(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        self.records
            .iter()
            .filter(|r| seen.insert(r.geohash.as_str()))
            .map(|r| r.geohash.clone())
            .collect()
    }

    /// Distinct timestamps, oldest first.
    #[must_use]
    pub fn timestamps(&self) -> Vec<DateTime<Utc>> {
        self.records
            .iter()
            .map(|r| r.timestamp)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Distinct heights, lowest first.
    #[must_use]
    pub fn heights(&self) -> Vec<f64> {
        let mut heights: Vec<f64> = self.records.iter().map(|r| r.height).collect();
        heights.sort_by(f64::total_cmp);
        heights.dedup();
        heights
    }

    /// Resolves a timeline position to a frame.
    ///
    /// `height` defaults to the lowest available height. Returns `None` if
    /// `time_index` is past the last time step or there are no records.
    #[must_use]
    pub fn frame(&self, time_index: usize, height: Option<f64>) -> Option<PredictionFrame> {
        let timestamp = *self.timestamps().get(time_index)?;
        let height = height.or_else(|| self.heights().first().copied())?;
        Some(PredictionFrame { timestamp, height })
    }

    /// Predicted value per geohash for one frame.
    ///
    /// When several records share a cell, the first one wins.
    #[must_use]
    pub fn values(&self, frame: &PredictionFrame) -> BTreeMap<String, f64> {
        let mut values = BTreeMap::new();
        for record in &self.records {
            #[allow(clippy::float_cmp)]
            let matches = record.timestamp == frame.timestamp && record.height == frame.height;
            if matches {
                values.entry(record.geohash.clone()).or_insert(record.rsrp);
            }
        }
        values
    }
}
