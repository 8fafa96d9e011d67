//! Viewport query orchestration.
//!
//! Every input change (viewport, drawn rectangle, selected geohash,
//! filters, grouping, time window) turns into a [`QueryState`]. Queries are
//! never aborted: each one remembers the state it was issued for, and its
//! response is applied only if that state is still the latest one issued
//! for its shape. Anything else is dropped as stale.
//!
//! Two query shapes share the backend. The cluster query covers the
//! viewport and feeds clustering, facets and (while no other rectangle is
//! active) the statistics. The rectangle query covers a drawn rectangle or
//! the selected geohash cell and feeds only the statistics and series.

use std::{
    sync::{Mutex, MutexGuard, PoisonError},
    time::Instant,
};

use signal_map_cluster::{ClusterAggregator, ClusterNode};
use signal_map_config::EngineConfig;
use signal_map_geohash::GeohashCell;
use signal_map_grid::{MapView, PredictionSet, SelectionState, enrich, url};
use signal_map_query_models::{
    AggType, CategoricalFilters, DatasetSchema, Facets, GroupedStat, MapLayer, MeasureSlot, Point,
    QueryInfo, QueryState, RectStats, Rectangle, TimeRange, Viewport,
};
use signal_map_stats::RectStatsReducer;

use crate::{
    QueryBackend, QueryError,
    layer::{HeatPoint, LayerView},
};

/// Which rectangle currently drives the statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ActiveRect {
    /// The map viewport.
    #[default]
    View,
    /// A rectangle drawn by the user.
    Drawn,
    /// The bounds of the selected geohash cell.
    SelectedGeohash,
}

/// What happened to a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryOutcome {
    /// The response was applied.
    Applied,
    /// A newer query superseded this one before its response arrived.
    Stale,
    /// Nothing was issued: the same query is already in flight or applied,
    /// or no rectangle needs querying.
    Skipped,
}

/// Read-only copy of the orchestrator state for rendering.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MapSnapshot {
    /// Current map bounds and zoom.
    pub viewport: Option<Viewport>,
    /// Rectangle the statistics describe.
    pub active_rect: ActiveRect,
    pub map_layer: MapLayer,
    /// Selected geohash cell.
    pub selection: Option<String>,
    pub prediction_mode: bool,
    /// Filters sent with the next query. `None` values match anything.
    pub categorical_filters: CategoricalFilters,
    /// Clusters of the last applied viewport query.
    pub clusters: Vec<ClusterNode>,
    /// Distinct values per dimension in the viewport.
    pub facets: Facets,
    /// Grouped aggregates for the active rectangle.
    pub series: Vec<GroupedStat>,
    /// Statistics for the active rectangle.
    pub rect_stats: Option<RectStats>,
    /// Timing and tile counts of the last applied viewport query.
    pub query_info: Option<QueryInfo>,
    /// A cluster query is in flight.
    pub clusters_loading: bool,
    /// Message of the last failed query, cleared by the next success.
    pub last_error: Option<String>,
}

#[derive(Debug, Default)]
struct MapState {
    viewport: Option<Viewport>,
    drawn_rect: Option<Rectangle>,
    geohash_rect: Option<Rectangle>,
    active_rect: ActiveRect,
    map_layer: MapLayer,

    categorical_filters: CategoricalFilters,
    group_by_cols: Vec<String>,
    measure_col: Option<String>,
    agg_type: AggType,
    time_range: TimeRange,

    points: Vec<Point>,
    clusters: Vec<ClusterNode>,
    facets: Facets,
    view_stats: Option<RectStats>,
    view_series: Vec<GroupedStat>,
    rect_stats: Option<RectStats>,
    series: Vec<GroupedStat>,
    query_info: Option<QueryInfo>,
    clusters_loading: bool,
    last_error: Option<String>,

    latest_cluster_query: Option<QueryState>,
    latest_rect_query: Option<QueryState>,
    /// Bumped on every issued cluster query; only the newest issue clears
    /// `clusters_loading`.
    cluster_ticket: u64,

    predictions: PredictionSet,
    time_index: usize,
    height: Option<f64>,
}

impl MapState {
    /// Builds the query for `rect`, dropping filters on grouped columns from
    /// both the query and the active filter set.
    fn build_query(&mut self, rect: Rectangle, zoom: u8) -> QueryState {
        let mut query = QueryState {
            rect,
            zoom,
            categorical_filters: self.categorical_filters.clone(),
            group_by_cols: self.group_by_cols.clone(),
            measure_col: self.measure_col.clone(),
            agg_type: self.agg_type,
            time_range: self.time_range,
        };

        let dropped = query.strip_grouped_filters();
        if !dropped.is_empty() {
            log::debug!("Dropping filters on grouped columns: {dropped:?}");
            for dim in &dropped {
                self.categorical_filters.remove(dim);
            }
        }

        query
    }

    fn active_rectangle(&self) -> Option<Rectangle> {
        match self.active_rect {
            ActiveRect::View => None,
            ActiveRect::Drawn => self.drawn_rect,
            ActiveRect::SelectedGeohash => self.geohash_rect,
        }
    }

    /// Makes `source` the active rectangle; the most recent source wins.
    fn activate(&mut self, source: ActiveRect) -> ActiveRect {
        self.active_rect = source;
        self.fall_back()
    }

    /// Moves off an active source whose rectangle is gone: to the other
    /// rectangle if one is present, else to the view. Falling back to the
    /// view restores the viewport statistics.
    fn fall_back(&mut self) -> ActiveRect {
        if self.active_rect != ActiveRect::View && self.active_rectangle().is_none() {
            self.active_rect = if self.drawn_rect.is_some() {
                ActiveRect::Drawn
            } else if self.geohash_rect.is_some() {
                ActiveRect::SelectedGeohash
            } else {
                ActiveRect::View
            };
        }

        if self.active_rect == ActiveRect::View {
            self.latest_rect_query = None;
            self.rect_stats = self.view_stats;
            self.series.clone_from(&self.view_series);
        }

        self.active_rect
    }
}

/// Drives backend queries from map interactions and owns their results.
///
/// All methods take `&self`; share the orchestrator behind an `Arc` to let
/// several interactions run concurrently.
pub struct Orchestrator<B> {
    backend: B,
    aggregator: ClusterAggregator,
    schema: DatasetSchema,
    state: Mutex<MapState>,
    selection: Mutex<SelectionState>,
}

impl<B: QueryBackend> Orchestrator<B> {
    /// Creates an orchestrator with no viewport and nothing selected.
    #[must_use]
    pub fn new(
        backend: B,
        aggregator: ClusterAggregator,
        selection: SelectionState,
        schema: DatasetSchema,
    ) -> Self {
        Self {
            backend,
            aggregator,
            schema,
            state: Mutex::new(MapState::default()),
            selection: Mutex::new(selection),
        }
    }

    /// Creates an orchestrator with the clustering and selection settings
    /// from `config`.
    #[must_use]
    pub fn from_config(backend: B, config: &EngineConfig, schema: DatasetSchema) -> Self {
        Self::new(
            backend,
            ClusterAggregator::new(config.cluster.clone()),
            SelectionState::new(config.selection.clone(), config.zoom.clone()),
            schema,
        )
    }

    /// The backend queries are sent to.
    pub const fn backend(&self) -> &B {
        &self.backend
    }

    // Lock order is always `state` before `selection`.
    fn state(&self) -> MutexGuard<'_, MapState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn selection_state(&self) -> MutexGuard<'_, SelectionState> {
        self.selection.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Copies the current state.
    #[must_use]
    pub fn snapshot(&self) -> MapSnapshot {
        let state = self.state();
        let selection = self.selection_state();
        MapSnapshot {
            viewport: state.viewport,
            active_rect: state.active_rect,
            map_layer: state.map_layer,
            selection: selection.selection().map(ToString::to_string),
            prediction_mode: selection.prediction_mode(),
            categorical_filters: state.categorical_filters.clone(),
            clusters: state.clusters.clone(),
            facets: state.facets.clone(),
            series: state.series.clone(),
            rect_stats: state.rect_stats,
            query_info: state.query_info,
            clusters_loading: state.clusters_loading,
            last_error: state.last_error.clone(),
        }
    }

    /// Moves the map and reclusters for the new viewport.
    ///
    /// # Errors
    ///
    /// * [`QueryError::QueryFailed`] if the backend query fails
    pub async fn set_viewport(&self, viewport: Viewport) -> Result<QueryOutcome, QueryError> {
        self.state().viewport = Some(viewport);
        self.run_cluster_query().await
    }

    /// Sets a categorical filter. `None` matches any value.
    ///
    /// # Errors
    ///
    /// * [`QueryError::MissingViewport`] before the first viewport is set
    /// * [`QueryError::QueryFailed`] if a backend query fails
    pub async fn set_filter(
        &self,
        dimension: impl Into<String> + Send,
        value: Option<String>,
    ) -> Result<QueryOutcome, QueryError> {
        self.state()
            .categorical_filters
            .insert(dimension.into(), value);
        self.refresh().await
    }

    /// Removes a categorical filter.
    ///
    /// # Errors
    ///
    /// * [`QueryError::MissingViewport`] before the first viewport is set
    /// * [`QueryError::QueryFailed`] if a backend query fails
    pub async fn clear_filter(&self, dimension: &str) -> Result<QueryOutcome, QueryError> {
        self.state().categorical_filters.remove(dimension);
        self.refresh().await
    }

    /// Changes the group-by columns. Filters on any of them are dropped.
    ///
    /// # Errors
    ///
    /// * [`QueryError::MissingViewport`] before the first viewport is set
    /// * [`QueryError::QueryFailed`] if a backend query fails
    pub async fn set_group_by(&self, columns: Vec<String>) -> Result<QueryOutcome, QueryError> {
        self.state().group_by_cols = columns;
        self.refresh().await
    }

    /// Changes the measure column the series aggregates.
    ///
    /// # Errors
    ///
    /// * [`QueryError::MissingViewport`] before the first viewport is set
    /// * [`QueryError::QueryFailed`] if a backend query fails
    pub async fn set_measure_col(&self, column: Option<String>) -> Result<QueryOutcome, QueryError> {
        self.state().measure_col = column;
        self.refresh().await
    }

    /// Changes the series aggregate.
    ///
    /// # Errors
    ///
    /// * [`QueryError::MissingViewport`] before the first viewport is set
    /// * [`QueryError::QueryFailed`] if a backend query fails
    pub async fn set_agg_type(&self, agg_type: AggType) -> Result<QueryOutcome, QueryError> {
        self.state().agg_type = agg_type;
        self.refresh().await
    }

    /// Changes the time window.
    ///
    /// # Errors
    ///
    /// * [`QueryError::MissingViewport`] before the first viewport is set
    /// * [`QueryError::QueryFailed`] if a backend query fails
    pub async fn set_time_range(&self, time_range: TimeRange) -> Result<QueryOutcome, QueryError> {
        self.state().time_range = time_range;
        self.refresh().await
    }

    /// Sets or clears the drawn rectangle.
    ///
    /// Drawing makes the rectangle the statistics source. Clearing it falls
    /// back to the selected cell, then the viewport.
    ///
    /// # Errors
    ///
    /// * [`QueryError::QueryFailed`] if the rectangle query fails
    pub async fn set_drawn_rect(
        &self,
        rect: Option<Rectangle>,
    ) -> Result<QueryOutcome, QueryError> {
        let active = {
            let mut state = self.state();
            state.drawn_rect = rect;
            if rect.is_some() {
                state.activate(ActiveRect::Drawn)
            } else {
                state.fall_back()
            }
        };
        if active == ActiveRect::View {
            return Ok(QueryOutcome::Skipped);
        }
        self.run_rect_query().await
    }

    /// Selects a geohash cell, or clears the selection with `None`.
    ///
    /// Outside prediction mode the cell bounds become the statistics
    /// rectangle and a rectangle query is issued; clearing falls back to
    /// the drawn rectangle, then the viewport. In prediction mode the
    /// selection only drives the grid until prediction mode is left.
    ///
    /// # Errors
    ///
    /// * [`QueryError::InvalidGeohash`] if `hash` is malformed
    /// * [`QueryError::QueryFailed`] if the rectangle query fails
    pub async fn select_geohash(&self, hash: Option<&str>) -> Result<QueryOutcome, QueryError> {
        let run = {
            let mut state = self.state();
            let mut selection = self.selection_state();
            Self::apply_selection(&mut state, &mut selection, hash)?
        };
        self.run_rect_query_if(run).await
    }

    /// Handles a click on a grid cell.
    ///
    /// Returns where the map should move (if anywhere) and the outcome of
    /// the resulting rectangle query.
    ///
    /// # Errors
    ///
    /// * [`QueryError::InvalidGeohash`] if `hash` is malformed
    /// * [`QueryError::QueryFailed`] if the rectangle query fails
    pub async fn click_cell(
        &self,
        hash: &str,
        current: &MapView,
    ) -> Result<(Option<MapView>, QueryOutcome), QueryError> {
        let (target, run) = {
            let mut state = self.state();
            let mut selection = self.selection_state();
            GeohashCell::new(hash)?;
            let target = selection.click(hash, current)?;
            let run = Self::apply_selection(&mut state, &mut selection, Some(hash))?;
            (target, run)
        };
        let outcome = self.run_rect_query_if(run).await?;
        Ok((target, outcome))
    }

    /// Applies the `geohash` parameter of a URL query string.
    ///
    /// When present, the layer switches to [`MapLayer::Geohash`] and the
    /// selection is set in the same update.
    ///
    /// # Errors
    ///
    /// * [`QueryError::InvalidGeohash`] if the parameter is malformed
    /// * [`QueryError::QueryFailed`] if the rectangle query fails
    pub async fn load_url(&self, query: &str) -> Result<QueryOutcome, QueryError> {
        let Some(hash) = url::read_geohash(query)? else {
            return Ok(QueryOutcome::Skipped);
        };
        let run = {
            let mut state = self.state();
            let mut selection = self.selection_state();
            let run = Self::apply_selection(&mut state, &mut selection, Some(&hash))?;
            state.map_layer = MapLayer::Geohash;
            run
        };
        self.run_rect_query_if(run).await
    }

    /// Rewrites `current` so that its `geohash` parameter mirrors the
    /// selection.
    #[must_use]
    pub fn url_query(&self, current: &str) -> String {
        url::write_geohash(current, self.selection_state().selection())
    }

    /// Switches the rendered layer. Queries are unaffected.
    pub fn set_map_layer(&self, layer: MapLayer) {
        self.state().map_layer = layer;
    }

    /// Enters or leaves prediction mode.
    ///
    /// Leaving applies whatever cell was selected meanwhile to the
    /// statistics, as if it had just been selected.
    ///
    /// # Errors
    ///
    /// * [`QueryError::QueryFailed`] if the rectangle query fails
    pub async fn set_prediction_mode(&self, enabled: bool) -> Result<QueryOutcome, QueryError> {
        let run = {
            let mut state = self.state();
            let mut selection = self.selection_state();
            let leaving = selection.prediction_mode() && !enabled;
            selection.set_prediction_mode(enabled);
            if leaving {
                let hash = selection.selection().map(ToString::to_string);
                Self::apply_selection(&mut state, &mut selection, hash.as_deref())?
            } else {
                false
            }
        };
        self.run_rect_query_if(run).await
    }

    /// Replaces the prediction records and rewinds the timeline.
    pub fn set_predictions(&self, predictions: PredictionSet) {
        let mut state = self.state();
        state.predictions = predictions;
        state.time_index = 0;
        state.height = None;
    }

    /// Picks the prediction time step and height. `None` uses the lowest
    /// height.
    pub fn set_prediction_frame(&self, time_index: usize, height: Option<f64>) {
        let mut state = self.state();
        state.time_index = time_index;
        state.height = height;
    }

    /// Renders the active map layer.
    ///
    /// # Errors
    ///
    /// * [`QueryError::MissingViewport`] for the geohash layer before the
    ///   first viewport is set
    /// * [`QueryError::Grid`] if the grid cannot be built
    pub fn layer_view(&self) -> Result<LayerView, QueryError> {
        let state = self.state();
        match state.map_layer {
            MapLayer::Cluster => Ok(LayerView::Clusters(state.clusters.clone())),
            MapLayer::Heatmap => Ok(LayerView::Heatmap(HeatPoint::from_points(&state.points))),
            MapLayer::Geohash => {
                let viewport = state.viewport.ok_or(QueryError::MissingViewport)?;
                let mut selection = self.selection_state();

                let prediction_hashes = if selection.prediction_mode() {
                    state.predictions.geohashes()
                } else {
                    Vec::new()
                };
                let items = selection.grid(&viewport, &prediction_hashes)?;
                let values = state
                    .predictions
                    .frame(state.time_index, state.height)
                    .map(|frame| state.predictions.values(&frame));

                Ok(LayerView::Grid(enrich(
                    items,
                    &state.points,
                    MeasureSlot::Measure0,
                    values.as_ref(),
                )))
            }
        }
    }

    fn apply_selection(
        state: &mut MapState,
        selection: &mut SelectionState,
        hash: Option<&str>,
    ) -> Result<bool, QueryError> {
        let cell = hash.map(GeohashCell::new).transpose()?;
        selection.set_selection(hash.map(ToString::to_string))?;

        if selection.prediction_mode() {
            return Ok(false);
        }

        state.geohash_rect = cell.map(|cell| cell.bbox().to_rectangle());
        let active = if state.geohash_rect.is_some() {
            state.activate(ActiveRect::SelectedGeohash)
        } else {
            state.fall_back()
        };
        Ok(active != ActiveRect::View)
    }

    async fn run_rect_query_if(&self, run: bool) -> Result<QueryOutcome, QueryError> {
        if run {
            self.run_rect_query().await
        } else {
            Ok(QueryOutcome::Skipped)
        }
    }

    /// Re-issues the cluster query and, when a rectangle is active, the
    /// rectangle query alongside it.
    async fn refresh(&self) -> Result<QueryOutcome, QueryError> {
        let rect_active = self.state().active_rect != ActiveRect::View;
        if rect_active {
            let (cluster, rect) = futures::join!(self.run_cluster_query(), self.run_rect_query());
            rect?;
            cluster
        } else {
            self.run_cluster_query().await
        }
    }

    async fn run_cluster_query(&self) -> Result<QueryOutcome, QueryError> {
        let (query, ticket) = {
            let mut state = self.state();
            let viewport = state.viewport.ok_or(QueryError::MissingViewport)?;
            let query = state.build_query(viewport.rect, viewport.zoom);
            if state.latest_cluster_query.as_ref() == Some(&query) {
                log::trace!("Cluster query unchanged, not reissuing");
                return Ok(QueryOutcome::Skipped);
            }
            state.latest_cluster_query = Some(query.clone());
            state.cluster_ticket += 1;
            state.clusters_loading = true;
            (query, state.cluster_ticket)
        };

        let started = Instant::now();
        let result = self.backend.query(&query).await;
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let mut guard = self.state();
        let state = &mut *guard;
        if state.latest_cluster_query.as_ref() != Some(&query) {
            log::debug!(
                "Dropping stale cluster response (zoom {}, rect {:?})",
                query.zoom,
                query.rect
            );
            return Ok(QueryOutcome::Stale);
        }
        let newest = ticket == state.cluster_ticket;
        if newest {
            state.clusters_loading = false;
        }

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                log::warn!("Cluster query failed: {e}");
                state.last_error = Some(e.to_string());
                if newest {
                    state.latest_cluster_query = None;
                }
                return Err(QueryError::QueryFailed(e));
            }
        };

        let rect_stats = response
            .rect_stats
            .unwrap_or_else(|| RectStatsReducer::reduce_rect(&response.points, &query.rect));
        let clusters =
            self.aggregator
                .cluster(&response.points, &query.rect, query.zoom, &self.schema);
        log::debug!(
            "Applied cluster response: {} points, {} nodes in {elapsed_ms}ms",
            response.points.len(),
            clusters.len()
        );

        state.query_info = Some(QueryInfo::from_response(&response, elapsed_ms));
        state.last_error = None;
        state.clusters = clusters;
        state.facets = response.facets;
        state.view_stats = Some(rect_stats);
        state.view_series = response.series;
        state.points = response.points;
        if state.active_rect == ActiveRect::View {
            state.rect_stats = state.view_stats;
            state.series.clone_from(&state.view_series);
        }

        Ok(QueryOutcome::Applied)
    }

    async fn run_rect_query(&self) -> Result<QueryOutcome, QueryError> {
        let query = {
            let mut state = self.state();
            let Some(rect) = state.active_rectangle() else {
                return Ok(QueryOutcome::Skipped);
            };
            let zoom = state.viewport.map_or(0, |viewport| viewport.zoom);
            let query = state.build_query(rect, zoom);
            if state.latest_rect_query.as_ref() == Some(&query) {
                log::trace!("Rectangle query unchanged, not reissuing");
                return Ok(QueryOutcome::Skipped);
            }
            state.latest_rect_query = Some(query.clone());
            query
        };

        let result = self.backend.query(&query).await;

        let mut guard = self.state();
        let state = &mut *guard;
        if state.latest_rect_query.as_ref() != Some(&query) {
            log::debug!("Dropping stale rectangle response (rect {:?})", query.rect);
            return Ok(QueryOutcome::Stale);
        }

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                log::warn!("Rectangle query failed: {e}");
                state.last_error = Some(e.to_string());
                state.latest_rect_query = None;
                return Err(QueryError::QueryFailed(e));
            }
        };

        state.rect_stats = Some(
            response
                .rect_stats
                .unwrap_or_else(|| RectStatsReducer::reduce_rect(&response.points, &query.rect)),
        );
        state.series = response.series;
        state.last_error = None;

        Ok(QueryOutcome::Applied)
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::VecDeque, sync::Arc};

    use signal_map_geohash::{decode, decode_bbox, encode};
    use signal_map_grid::GridRole;
    use signal_map_query_models::{PredictionRecord, QueryResponse};
    use tokio::sync::oneshot;

    use super::*;
    use crate::BackendError;

    type Reply = Result<QueryResponse, BackendError>;

    /// Answers from a queue of canned replies, or parks the query until the
    /// test resolves it.
    #[derive(Default)]
    struct ScriptedBackend {
        queued: Mutex<VecDeque<Reply>>,
        issued: Mutex<Vec<QueryState>>,
        pending: Mutex<Vec<Option<oneshot::Sender<Reply>>>>,
    }

    impl ScriptedBackend {
        fn reply(&self, reply: Reply) {
            self.queued.lock().unwrap().push_back(reply);
        }

        fn issued(&self) -> Vec<QueryState> {
            self.issued.lock().unwrap().clone()
        }

        fn last_issued(&self) -> QueryState {
            self.issued().last().cloned().unwrap()
        }

        fn pending(&self) -> usize {
            self.pending.lock().unwrap().len()
        }

        fn resolve(&self, index: usize, reply: Reply) {
            let sender = self.pending.lock().unwrap()[index].take().unwrap();
            assert!(sender.send(reply).is_ok(), "query {index} was abandoned");
        }
    }

    #[async_trait::async_trait]
    impl QueryBackend for ScriptedBackend {
        async fn query(&self, query: &QueryState) -> Reply {
            self.issued.lock().unwrap().push(query.clone());
            let queued = self.queued.lock().unwrap().pop_front();
            if let Some(reply) = queued {
                return reply;
            }

            let (sender, receiver) = oneshot::channel();
            self.pending.lock().unwrap().push(Some(sender));
            receiver.await.unwrap_or_else(|_| {
                Err(BackendError::Status {
                    status: 499,
                    body: "dropped".to_string(),
                })
            })
        }
    }

    type TestOrchestrator = Orchestrator<ScriptedBackend>;

    fn orchestrator() -> TestOrchestrator {
        Orchestrator::new(
            ScriptedBackend::default(),
            ClusterAggregator::default(),
            SelectionState::default(),
            DatasetSchema {
                measure0: "rsrp".to_string(),
                measure1: "rsrq".to_string(),
                dimensions: vec!["operator".to_string()],
            },
        )
    }

    async fn wait_for_pending(orchestrator: &TestOrchestrator, count: usize) {
        while orchestrator.backend().pending() < count {
            tokio::task::yield_now().await;
        }
    }

    fn viewport_a() -> Viewport {
        Viewport {
            rect: Rectangle::from_bounds(10.0, 10.0, 20.0, 20.0),
            zoom: 10,
        }
    }

    fn viewport_b() -> Viewport {
        Viewport {
            rect: Rectangle::from_bounds(30.0, 30.0, 40.0, 40.0),
            zoom: 10,
        }
    }

    fn points_a() -> Vec<Point> {
        vec![Point::new(15.0, 15.0, Some(-80.0), Some(-10.0))]
    }

    fn points_b() -> Vec<Point> {
        vec![
            Point::new(35.0, 35.0, Some(-90.0), None),
            Point::new(31.0, 39.0, Some(-95.0), None),
        ]
    }

    fn response(points: Vec<Point>, tile_count: u64) -> QueryResponse {
        QueryResponse {
            point_count: points.len() as u64,
            points,
            tile_count,
            ..QueryResponse::default()
        }
    }

    fn stats_response(count: u64) -> QueryResponse {
        QueryResponse {
            rect_stats: Some(RectStats {
                count,
                ..RectStats::default()
            }),
            ..QueryResponse::default()
        }
    }

    fn count_of(snapshot: &MapSnapshot) -> u64 {
        snapshot.rect_stats.unwrap().count
    }

    #[tokio::test]
    async fn superseded_response_is_dropped() {
        let orchestrator = Arc::new(orchestrator());

        let first = tokio::spawn({
            let orchestrator = Arc::clone(&orchestrator);
            async move { orchestrator.set_viewport(viewport_a()).await }
        });
        wait_for_pending(&orchestrator, 1).await;

        let second = tokio::spawn({
            let orchestrator = Arc::clone(&orchestrator);
            async move { orchestrator.set_viewport(viewport_b()).await }
        });
        wait_for_pending(&orchestrator, 2).await;

        orchestrator.backend().resolve(0, Ok(response(points_a(), 1)));
        assert_eq!(first.await.unwrap().unwrap(), QueryOutcome::Stale);

        let snapshot = orchestrator.snapshot();
        assert!(snapshot.clusters.is_empty(), "stale payload leaked");
        assert_eq!(snapshot.query_info, None);
        assert_eq!(snapshot.rect_stats, None);
        assert!(snapshot.clusters_loading);

        orchestrator.backend().resolve(1, Ok(response(points_b(), 2)));
        assert_eq!(second.await.unwrap().unwrap(), QueryOutcome::Applied);

        let snapshot = orchestrator.snapshot();
        assert_eq!(snapshot.clusters.len(), 2);
        assert_eq!(snapshot.query_info.unwrap().tile_count, 2);
        assert_eq!(count_of(&snapshot), 2);
        assert!(!snapshot.clusters_loading);
    }

    #[tokio::test]
    async fn older_response_arriving_last_is_dropped() {
        let orchestrator = Arc::new(orchestrator());

        let first = tokio::spawn({
            let orchestrator = Arc::clone(&orchestrator);
            async move { orchestrator.set_viewport(viewport_a()).await }
        });
        wait_for_pending(&orchestrator, 1).await;
        let second = tokio::spawn({
            let orchestrator = Arc::clone(&orchestrator);
            async move { orchestrator.set_viewport(viewport_b()).await }
        });
        wait_for_pending(&orchestrator, 2).await;

        orchestrator.backend().resolve(1, Ok(response(points_b(), 2)));
        assert_eq!(second.await.unwrap().unwrap(), QueryOutcome::Applied);
        orchestrator.backend().resolve(0, Ok(response(points_a(), 1)));
        assert_eq!(first.await.unwrap().unwrap(), QueryOutcome::Stale);

        let snapshot = orchestrator.snapshot();
        assert_eq!(snapshot.clusters.len(), 2);
        assert_eq!(snapshot.query_info.unwrap().tile_count, 2);
    }

    #[tokio::test]
    async fn identical_state_is_not_refetched() {
        let orchestrator = Arc::new(orchestrator());

        let first = tokio::spawn({
            let orchestrator = Arc::clone(&orchestrator);
            async move { orchestrator.set_viewport(viewport_a()).await }
        });
        wait_for_pending(&orchestrator, 1).await;

        let repeat = orchestrator.set_viewport(viewport_a()).await.unwrap();
        assert_eq!(repeat, QueryOutcome::Skipped);
        assert_eq!(orchestrator.backend().issued().len(), 1);

        orchestrator.backend().resolve(0, Ok(response(points_a(), 1)));
        assert_eq!(first.await.unwrap().unwrap(), QueryOutcome::Applied);

        let again = orchestrator.set_viewport(viewport_a()).await.unwrap();
        assert_eq!(again, QueryOutcome::Skipped);
        assert_eq!(orchestrator.backend().issued().len(), 1);
    }

    #[tokio::test]
    async fn failure_keeps_last_good_state() {
        let orchestrator = orchestrator();
        orchestrator.backend().reply(Ok(response(points_a(), 1)));
        orchestrator.set_viewport(viewport_a()).await.unwrap();

        orchestrator.backend().reply(Err(BackendError::Status {
            status: 500,
            body: "boom".to_string(),
        }));
        let err = orchestrator.set_viewport(viewport_b()).await.unwrap_err();
        assert!(matches!(err, QueryError::QueryFailed(_)));

        let snapshot = orchestrator.snapshot();
        assert_eq!(snapshot.clusters.len(), 1);
        assert_eq!(snapshot.query_info.unwrap().tile_count, 1);
        assert!(snapshot.last_error.unwrap().contains("500"));
        assert!(!snapshot.clusters_loading);

        orchestrator.backend().reply(Ok(response(points_b(), 2)));
        let retried = orchestrator.set_viewport(viewport_b()).await.unwrap();
        assert_eq!(retried, QueryOutcome::Applied);
        assert_eq!(orchestrator.snapshot().last_error, None);
    }

    #[tokio::test]
    async fn empty_viewport_is_not_an_error() {
        let orchestrator = orchestrator();
        orchestrator.backend().reply(Ok(QueryResponse::default()));
        let outcome = orchestrator.set_viewport(viewport_a()).await.unwrap();
        assert_eq!(outcome, QueryOutcome::Applied);

        let snapshot = orchestrator.snapshot();
        assert!(snapshot.clusters.is_empty());
        let stats = snapshot.rect_stats.unwrap();
        assert_eq!(stats.count, 0);
        assert_eq!(stats.measure0.mean, None);
        assert_eq!(stats.pearson_correlation, None);
    }

    #[tokio::test]
    async fn drawn_rectangle_takes_statistics_precedence() {
        let orchestrator = orchestrator();
        orchestrator.backend().reply(Ok(stats_response(10)));
        orchestrator.set_viewport(viewport_a()).await.unwrap();
        assert_eq!(count_of(&orchestrator.snapshot()), 10);

        let drawn = Rectangle::from_bounds(12.0, 12.0, 14.0, 14.0);
        orchestrator.backend().reply(Ok(stats_response(3)));
        let outcome = orchestrator.set_drawn_rect(Some(drawn)).await.unwrap();
        assert_eq!(outcome, QueryOutcome::Applied);
        assert_eq!(orchestrator.backend().last_issued().rect, drawn);

        let snapshot = orchestrator.snapshot();
        assert_eq!(snapshot.active_rect, ActiveRect::Drawn);
        assert_eq!(count_of(&snapshot), 3);

        orchestrator.backend().reply(Ok(stats_response(20)));
        orchestrator.set_viewport(viewport_b()).await.unwrap();
        assert_eq!(count_of(&orchestrator.snapshot()), 3);

        let outcome = orchestrator.set_drawn_rect(None).await.unwrap();
        assert_eq!(outcome, QueryOutcome::Skipped);
        let snapshot = orchestrator.snapshot();
        assert_eq!(snapshot.active_rect, ActiveRect::View);
        assert_eq!(count_of(&snapshot), 20);
    }

    #[tokio::test]
    async fn filter_change_requeries_active_rectangle_too() {
        let orchestrator = orchestrator();
        orchestrator.backend().reply(Ok(stats_response(10)));
        orchestrator.set_viewport(viewport_a()).await.unwrap();

        let drawn = Rectangle::from_bounds(12.0, 12.0, 14.0, 14.0);
        orchestrator.backend().reply(Ok(stats_response(3)));
        orchestrator.set_drawn_rect(Some(drawn)).await.unwrap();

        orchestrator.backend().reply(Ok(stats_response(9)));
        orchestrator.backend().reply(Ok(stats_response(2)));
        orchestrator
            .set_filter("operator", Some("A".to_string()))
            .await
            .unwrap();

        let issued = orchestrator.backend().issued();
        assert_eq!(issued.len(), 4);
        assert!(issued[2..].iter().any(|q| q.rect == drawn));
        assert!(issued[2..].iter().any(|q| q.rect == viewport_a().rect));
        assert!(
            issued[2..]
                .iter()
                .all(|q| q.categorical_filters["operator"].as_deref() == Some("A"))
        );
    }

    #[tokio::test]
    async fn grouping_strips_filters_on_grouped_columns() {
        let orchestrator = orchestrator();
        orchestrator.backend().reply(Ok(QueryResponse::default()));
        orchestrator.set_viewport(viewport_a()).await.unwrap();

        orchestrator.backend().reply(Ok(QueryResponse::default()));
        orchestrator
            .set_filter("operator", Some("A".to_string()))
            .await
            .unwrap();
        assert!(
            orchestrator
                .backend()
                .last_issued()
                .categorical_filters
                .contains_key("operator")
        );

        orchestrator.backend().reply(Ok(QueryResponse::default()));
        orchestrator
            .set_group_by(vec!["operator".to_string()])
            .await
            .unwrap();

        let query = orchestrator.backend().last_issued();
        assert!(query.categorical_filters.is_empty());
        assert_eq!(query.group_by_cols, vec!["operator"]);
        assert!(orchestrator.snapshot().categorical_filters.is_empty());
    }

    #[tokio::test]
    async fn filters_need_a_viewport() {
        let orchestrator = orchestrator();
        let err = orchestrator.set_agg_type(AggType::Max).await.unwrap_err();
        assert!(matches!(err, QueryError::MissingViewport));
        assert!(orchestrator.backend().issued().is_empty());
    }

    #[tokio::test]
    async fn selecting_geohash_queries_its_bounds() {
        let orchestrator = orchestrator();
        orchestrator.backend().reply(Ok(QueryResponse::default()));
        orchestrator.set_viewport(viewport_a()).await.unwrap();

        let hash = encode(15.0, 15.0, 4).unwrap();
        orchestrator.backend().reply(Ok(stats_response(4)));
        let outcome = orchestrator.select_geohash(Some(&hash)).await.unwrap();
        assert_eq!(outcome, QueryOutcome::Applied);
        assert_eq!(
            orchestrator.backend().last_issued().rect,
            decode_bbox(&hash).unwrap().to_rectangle()
        );

        let snapshot = orchestrator.snapshot();
        assert_eq!(snapshot.active_rect, ActiveRect::SelectedGeohash);
        assert_eq!(snapshot.selection.as_deref(), Some(hash.as_str()));
        assert_eq!(count_of(&snapshot), 4);

        let err = orchestrator.select_geohash(Some("bad!")).await.unwrap_err();
        assert!(matches!(err, QueryError::InvalidGeohash(_)));
        assert_eq!(
            orchestrator.snapshot().selection.as_deref(),
            Some(hash.as_str())
        );
    }

    #[tokio::test]
    async fn latest_rectangle_source_wins() {
        let orchestrator = orchestrator();
        let drawn = Rectangle::from_bounds(12.0, 12.0, 14.0, 14.0);
        orchestrator.backend().reply(Ok(stats_response(3)));
        orchestrator.set_drawn_rect(Some(drawn)).await.unwrap();

        orchestrator.backend().reply(Ok(stats_response(4)));
        let outcome = orchestrator.select_geohash(Some("s0")).await.unwrap();
        assert_eq!(outcome, QueryOutcome::Applied);
        assert_eq!(
            orchestrator.backend().last_issued().rect,
            decode_bbox("s0").unwrap().to_rectangle()
        );
        let snapshot = orchestrator.snapshot();
        assert_eq!(snapshot.active_rect, ActiveRect::SelectedGeohash);
        assert_eq!(count_of(&snapshot), 4);

        orchestrator.backend().reply(Ok(stats_response(5)));
        orchestrator.set_drawn_rect(Some(drawn)).await.unwrap();
        assert_eq!(orchestrator.snapshot().active_rect, ActiveRect::Drawn);
        assert_eq!(count_of(&orchestrator.snapshot()), 5);

        orchestrator.backend().reply(Ok(stats_response(6)));
        orchestrator.set_drawn_rect(None).await.unwrap();
        let snapshot = orchestrator.snapshot();
        assert_eq!(snapshot.active_rect, ActiveRect::SelectedGeohash);
        assert_eq!(count_of(&snapshot), 6);

        orchestrator.backend().reply(Ok(stats_response(7)));
        orchestrator.set_drawn_rect(Some(drawn)).await.unwrap();
        orchestrator.backend().reply(Ok(stats_response(8)));
        orchestrator.select_geohash(Some("s0")).await.unwrap();
        orchestrator.backend().reply(Ok(stats_response(9)));
        let outcome = orchestrator.select_geohash(None).await.unwrap();
        assert_eq!(outcome, QueryOutcome::Applied);
        assert_eq!(orchestrator.backend().last_issued().rect, drawn);
        let snapshot = orchestrator.snapshot();
        assert_eq!(snapshot.active_rect, ActiveRect::Drawn);
        assert_eq!(count_of(&snapshot), 9);
    }

    #[tokio::test]
    async fn older_rectangle_response_is_dropped() {
        let orchestrator = Arc::new(orchestrator());
        let first_rect = Rectangle::from_bounds(12.0, 12.0, 14.0, 14.0);
        let second_rect = Rectangle::from_bounds(15.0, 15.0, 16.0, 16.0);

        let first = tokio::spawn({
            let orchestrator = Arc::clone(&orchestrator);
            async move { orchestrator.set_drawn_rect(Some(first_rect)).await }
        });
        wait_for_pending(&orchestrator, 1).await;
        let second = tokio::spawn({
            let orchestrator = Arc::clone(&orchestrator);
            async move { orchestrator.set_drawn_rect(Some(second_rect)).await }
        });
        wait_for_pending(&orchestrator, 2).await;

        orchestrator.backend().resolve(1, Ok(stats_response(2)));
        assert_eq!(second.await.unwrap().unwrap(), QueryOutcome::Applied);
        orchestrator.backend().resolve(0, Ok(stats_response(1)));
        assert_eq!(first.await.unwrap().unwrap(), QueryOutcome::Stale);

        assert_eq!(count_of(&orchestrator.snapshot()), 2);
    }

    #[tokio::test]
    async fn clearing_drawn_rectangle_drops_its_pending_response() {
        let orchestrator = Arc::new(orchestrator());
        orchestrator.backend().reply(Ok(stats_response(10)));
        orchestrator.set_viewport(viewport_a()).await.unwrap();

        let drawn = tokio::spawn({
            let orchestrator = Arc::clone(&orchestrator);
            async move {
                orchestrator
                    .set_drawn_rect(Some(Rectangle::from_bounds(12.0, 12.0, 14.0, 14.0)))
                    .await
            }
        });
        wait_for_pending(&orchestrator, 1).await;

        let cleared = orchestrator.set_drawn_rect(None).await.unwrap();
        assert_eq!(cleared, QueryOutcome::Skipped);
        assert_eq!(count_of(&orchestrator.snapshot()), 10);

        orchestrator.backend().resolve(0, Ok(stats_response(5)));
        assert_eq!(drawn.await.unwrap().unwrap(), QueryOutcome::Stale);

        let snapshot = orchestrator.snapshot();
        assert_eq!(snapshot.active_rect, ActiveRect::View);
        assert_eq!(count_of(&snapshot), 10);
    }

    #[tokio::test]
    async fn reissued_state_keeps_loading_until_its_latest_reply() {
        let orchestrator = Arc::new(orchestrator());
        let spawn_viewport = |viewport: Viewport| {
            let orchestrator = Arc::clone(&orchestrator);
            tokio::spawn(async move { orchestrator.set_viewport(viewport).await })
        };

        let first_a = spawn_viewport(viewport_a());
        wait_for_pending(&orchestrator, 1).await;
        let b = spawn_viewport(viewport_b());
        wait_for_pending(&orchestrator, 2).await;
        let second_a = spawn_viewport(viewport_a());
        wait_for_pending(&orchestrator, 3).await;

        orchestrator.backend().resolve(0, Ok(response(points_a(), 1)));
        assert_eq!(first_a.await.unwrap().unwrap(), QueryOutcome::Applied);
        assert!(orchestrator.snapshot().clusters_loading);

        orchestrator.backend().resolve(1, Ok(response(points_b(), 2)));
        assert_eq!(b.await.unwrap().unwrap(), QueryOutcome::Stale);
        assert!(orchestrator.snapshot().clusters_loading);

        orchestrator.backend().resolve(2, Ok(response(points_a(), 1)));
        assert_eq!(second_a.await.unwrap().unwrap(), QueryOutcome::Applied);
        assert!(!orchestrator.snapshot().clusters_loading);
    }

    #[tokio::test]
    async fn leaving_prediction_mode_applies_the_new_selection() {
        let orchestrator = orchestrator();
        orchestrator.backend().reply(Ok(QueryResponse::default()));
        orchestrator.set_viewport(viewport_a()).await.unwrap();
        orchestrator.backend().reply(Ok(stats_response(1)));
        orchestrator.select_geohash(Some("u4pr")).await.unwrap();

        orchestrator.set_prediction_mode(true).await.unwrap();
        orchestrator.select_geohash(Some("sx8d")).await.unwrap();
        assert_eq!(orchestrator.backend().issued().len(), 2);

        orchestrator.backend().reply(Ok(stats_response(2)));
        let outcome = orchestrator.set_prediction_mode(false).await.unwrap();
        assert_eq!(outcome, QueryOutcome::Applied);
        let sx8d = decode_bbox("sx8d").unwrap().to_rectangle();
        assert_eq!(orchestrator.backend().last_issued().rect, sx8d);
        assert_eq!(count_of(&orchestrator.snapshot()), 2);

        orchestrator.backend().reply(Ok(stats_response(3)));
        orchestrator.backend().reply(Ok(stats_response(3)));
        orchestrator
            .set_filter("operator", Some("A".to_string()))
            .await
            .unwrap();
        let u4pr = decode_bbox("u4pr").unwrap().to_rectangle();
        let issued = orchestrator.backend().issued();
        let refreshed = &issued[3..];
        assert_eq!(refreshed.len(), 2);
        assert!(refreshed.iter().any(|q| q.rect == sx8d));
        assert!(refreshed.iter().all(|q| q.rect != u4pr));

        let snapshot = orchestrator.snapshot();
        assert_eq!(snapshot.selection.as_deref(), Some("sx8d"));
        assert_eq!(snapshot.active_rect, ActiveRect::SelectedGeohash);
    }

    #[tokio::test]
    async fn prediction_mode_selection_does_not_query() {
        let orchestrator = orchestrator();
        orchestrator.set_prediction_mode(true).await.unwrap();
        let outcome = orchestrator.select_geohash(Some("sx8d")).await.unwrap();
        assert_eq!(outcome, QueryOutcome::Skipped);
        assert!(orchestrator.backend().issued().is_empty());
        assert_eq!(orchestrator.snapshot().active_rect, ActiveRect::View);
    }

    #[tokio::test]
    async fn click_recenters_and_queries() {
        let orchestrator = orchestrator();
        orchestrator.backend().reply(Ok(stats_response(1)));
        let current = MapView {
            center: (0.0, 0.0),
            zoom: 2,
        };
        let (target, outcome) = orchestrator.click_cell("sx8d", &current).await.unwrap();
        let target = target.unwrap();
        assert_eq!(target.center, decode("sx8d").unwrap());
        assert_eq!(target.zoom, 8);
        assert_eq!(outcome, QueryOutcome::Applied);
        assert_eq!(orchestrator.snapshot().selection.as_deref(), Some("sx8d"));
    }

    #[tokio::test]
    async fn url_sets_layer_and_selection_together() {
        let orchestrator = orchestrator();
        orchestrator.backend().reply(Ok(response(points_a(), 1)));
        orchestrator.set_viewport(viewport_a()).await.unwrap();

        let outcome = orchestrator.load_url("?zoom=4").await.unwrap();
        assert_eq!(outcome, QueryOutcome::Skipped);
        assert_eq!(orchestrator.snapshot().map_layer, MapLayer::Cluster);

        let hash = encode(15.0, 15.0, 4).unwrap();
        orchestrator.backend().reply(Ok(stats_response(1)));
        orchestrator
            .load_url(&format!("?zoom=4&geohash={hash}"))
            .await
            .unwrap();

        let snapshot = orchestrator.snapshot();
        assert_eq!(snapshot.map_layer, MapLayer::Geohash);
        assert_eq!(snapshot.selection.as_deref(), Some(hash.as_str()));
        assert_eq!(
            orchestrator.url_query("zoom=4&geohash=u4"),
            format!("zoom=4&geohash={hash}")
        );

        let LayerView::Grid(cells) = orchestrator.layer_view().unwrap() else {
            panic!("expected the grid layer");
        };
        let children: Vec<_> = cells
            .iter()
            .filter(|c| c.item.role == GridRole::Children)
            .collect();
        assert_eq!(children.len(), 32);
        let with_data: Vec<_> = children.iter().filter(|c| c.value.is_some()).collect();
        assert_eq!(with_data.len(), 1);
        assert_eq!(with_data[0].value, Some(-80.0));
    }

    #[tokio::test]
    async fn cluster_and_heatmap_layers() {
        let orchestrator = orchestrator();
        assert!(orchestrator.layer_view().unwrap().is_empty());

        orchestrator.backend().reply(Ok(response(points_a(), 1)));
        orchestrator.set_viewport(viewport_a()).await.unwrap();

        let LayerView::Clusters(nodes) = orchestrator.layer_view().unwrap() else {
            panic!("expected clusters");
        };
        assert_eq!(nodes.len(), 1);

        orchestrator.set_map_layer(MapLayer::Heatmap);
        let LayerView::Heatmap(heat) = orchestrator.layer_view().unwrap() else {
            panic!("expected heatmap");
        };
        assert_eq!(heat.len(), 1);
        assert!((heat[0].intensity + 80.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn grid_layer_needs_a_viewport() {
        let orchestrator = orchestrator();
        orchestrator.set_map_layer(MapLayer::Geohash);
        assert!(matches!(
            orchestrator.layer_view(),
            Err(QueryError::MissingViewport)
        ));
    }

    #[tokio::test]
    async fn prediction_layer_shows_predicted_cells() {
        let orchestrator = orchestrator();
        orchestrator.backend().reply(Ok(QueryResponse::default()));
        orchestrator.set_viewport(viewport_a()).await.unwrap();

        let records: Vec<PredictionRecord> = serde_json::from_value(serde_json::json!([
            { "geohash": "sx89", "rsrp": -90.0, "timestamp": "2025-05-01T12:00:00Z", "height": 10.0 },
            { "geohash": "sx8d", "rsrp": -80.0, "timestamp": "2025-05-01T12:00:00Z", "height": 10.0 },
            { "geohash": "sx8e", "rsrp": -85.0, "timestamp": "2025-05-01T12:00:00Z", "height": 10.0 },
        ]))
        .unwrap();

        orchestrator.set_map_layer(MapLayer::Geohash);
        orchestrator.set_prediction_mode(true).await.unwrap();
        orchestrator.set_predictions(PredictionSet::new(records));
        orchestrator.set_prediction_frame(0, None);

        let LayerView::Grid(cells) = orchestrator.layer_view().unwrap() else {
            panic!("expected the grid layer");
        };
        assert_eq!(cells.len(), 3);
        assert!(cells.iter().all(|c| c.item.role == GridRole::Prediction));
        assert_eq!(cells[1].value, Some(-80.0));
        assert_eq!(orchestrator.snapshot().selection.as_deref(), Some("sx8d"));
    }
}
