#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Command-line front end for the signal map engine.
//!
//! ```text
//! signal_map encode --lat 37.98 --lon 23.72 --precision 6
//! signal_map decode sx8d
//! signal_map grid [HASH] [--bbox S,W,N,E --zoom Z] [--points FILE] [--predictions FILE]
//! signal_map cluster --points FILE --zoom Z [--bbox S,W,N,E]
//! signal_map stats --points FILE [--bbox S,W,N,E]
//! signal_map query --bbox S,W,N,E --zoom Z [--layer geohash] [--url '?geohash=sx8d']
//! ```
//!
//! Configuration comes from the embedded defaults or the file named by
//! `SIGNAL_MAP_CONFIG`.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use signal_map_cluster::{ClusterAggregator, to_feature_collection};
use signal_map_config::EngineConfig;
use signal_map_geohash::{GeohashCell, encode};
use signal_map_grid::{PredictionSet, SelectionState, enrich};
use signal_map_query::{HttpQueryBackend, LayerView, Orchestrator};
use signal_map_query_models::{
    DatasetSchema, MapLayer, MeasureSlot, Point, PredictionRecord, Rectangle, Viewport,
};
use signal_map_stats::RectStatsReducer;

/// Default extent when no bbox is given; the Mercator projection stops at 85 degrees.
const WORLD: Rectangle = Rectangle {
    lat: [-85.0, 85.0],
    lon: [-180.0, 180.0],
};

#[derive(Parser)]
#[command(
    name = "signal_map",
    about = "Cluster, grid and query geo-tagged signal measurements"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct SchemaArgs {
    /// Name of the first measure
    #[arg(long, default_value = "measure0")]
    measure0: String,
    /// Name of the second measure
    #[arg(long, default_value = "measure1")]
    measure1: String,
    /// Dimension names, comma separated, in point order
    #[arg(long, value_delimiter = ',')]
    dimensions: Vec<String>,
}

impl SchemaArgs {
    fn schema(&self) -> DatasetSchema {
        DatasetSchema {
            measure0: self.measure0.clone(),
            measure1: self.measure1.clone(),
            dimensions: self.dimensions.clone(),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Encode a coordinate as a geohash
    Encode {
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,
        #[arg(long, default_value = "6")]
        precision: usize,
    },
    /// Print the center and bounds of a geohash
    Decode { hash: String },
    /// Print the drill-down grid as `GeoJSON`
    Grid {
        /// Selected geohash; derived from the viewport when omitted
        hash: Option<String>,
        /// Viewport as south,west,north,east
        #[arg(long, value_parser = parse_bbox, allow_hyphen_values = true)]
        bbox: Option<Rectangle>,
        /// Map zoom level
        #[arg(long, default_value = "10")]
        zoom: u8,
        /// JSON file of points to average per cell
        #[arg(long)]
        points: Option<PathBuf>,
        /// JSON file of prediction records; switches to prediction mode
        #[arg(long)]
        predictions: Option<PathBuf>,
        /// Prediction time step
        #[arg(long, default_value = "0")]
        time_index: usize,
        /// Prediction height; defaults to the lowest
        #[arg(long)]
        height: Option<f64>,
    },
    /// Cluster a JSON file of points and print `GeoJSON`
    Cluster {
        #[arg(long)]
        points: PathBuf,
        #[arg(long)]
        zoom: u8,
        /// Viewport as south,west,north,east
        #[arg(long, value_parser = parse_bbox, allow_hyphen_values = true)]
        bbox: Option<Rectangle>,
        #[command(flatten)]
        schema: SchemaArgs,
    },
    /// Compute rectangle statistics over a JSON file of points
    Stats {
        #[arg(long)]
        points: PathBuf,
        /// Rectangle as south,west,north,east
        #[arg(long, value_parser = parse_bbox, allow_hyphen_values = true)]
        bbox: Option<Rectangle>,
    },
    /// Run one viewport query against the configured backend
    Query {
        /// Viewport as south,west,north,east
        #[arg(long, value_parser = parse_bbox, allow_hyphen_values = true)]
        bbox: Rectangle,
        #[arg(long)]
        zoom: u8,
        /// Layer to render
        #[arg(long, default_value = "cluster")]
        layer: MapLayer,
        /// URL query string to restore a selection from
        #[arg(long)]
        url: Option<String>,
        #[command(flatten)]
        schema: SchemaArgs,
    },
}

fn parse_bbox(value: &str) -> Result<Rectangle, String> {
    let parts = value
        .split(',')
        .map(|part| part.trim().parse::<f64>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| format!("invalid bbox {value:?}: {e}"))?;
    let [south, west, north, east] = parts[..] else {
        return Err(format!(
            "bbox needs 4 values (south,west,north,east), got {}",
            parts.len()
        ));
    };
    Ok(Rectangle::from_bounds(south, west, north, east))
}

fn read_json<T: serde::de::DeserializeOwned>(
    path: &Path,
) -> Result<T, Box<dyn std::error::Error>> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read {}: {e}", path.display()))?;
    Ok(serde_json::from_str(&text)?)
}

fn print_features(collection: &geojson::FeatureCollection) -> Result<(), serde_json::Error> {
    println!("{}", serde_json::to_string_pretty(collection)?);
    Ok(())
}

fn run_grid(
    config: &EngineConfig,
    hash: Option<String>,
    viewport: Viewport,
    points: &[Point],
    predictions: Option<PredictionSet>,
    frame: (usize, Option<f64>),
) -> Result<geojson::FeatureCollection, Box<dyn std::error::Error>> {
    let mut selection = SelectionState::new(config.selection.clone(), config.zoom.clone());
    selection.set_selection(hash)?;

    let (hashes, values) = match &predictions {
        Some(set) => {
            selection.set_prediction_mode(true);
            let values = set.frame(frame.0, frame.1).map(|f| set.values(&f));
            (set.geohashes(), values)
        }
        None => (Vec::new(), None),
    };

    let items = selection.grid(&viewport, &hashes)?;
    log::info!(
        "Grid of {} cells around {}",
        items.len(),
        selection.selection().unwrap_or("-")
    );

    let cells = enrich(items, points, MeasureSlot::Measure0, values.as_ref());
    Ok(LayerView::Grid(cells).to_feature_collection())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    pretty_env_logger::init_custom_env("RUST_LOG");
    let cli = Cli::parse();
    let config = EngineConfig::load()?;

    match cli.command {
        Commands::Encode {
            lat,
            lon,
            precision,
        } => {
            println!("{}", encode(lat, lon, precision)?);
        }
        Commands::Decode { hash } => {
            let cell = GeohashCell::new(hash)?;
            let bbox = cell.bbox();
            let (lat, lon) = bbox.center();
            println!("center: {lat}, {lon}");
            println!(
                "bbox:   {}, {}, {}, {} (south, west, north, east)",
                bbox.lat_min, bbox.lon_min, bbox.lat_max, bbox.lon_max
            );
            println!("precision: {}", cell.precision());
        }
        Commands::Grid {
            hash,
            bbox,
            zoom,
            points,
            predictions,
            time_index,
            height,
        } => {
            let points: Vec<Point> = match points {
                Some(path) => read_json(&path)?,
                None => Vec::new(),
            };
            let predictions = match predictions {
                Some(path) => Some(PredictionSet::new(read_json::<Vec<PredictionRecord>>(
                    &path,
                )?)),
                None => None,
            };
            let viewport = Viewport {
                rect: bbox.unwrap_or(WORLD),
                zoom,
            };
            let collection = run_grid(
                &config,
                hash,
                viewport,
                &points,
                predictions,
                (time_index, height),
            )?;
            print_features(&collection)?;
        }
        Commands::Cluster {
            points,
            zoom,
            bbox,
            schema,
        } => {
            let points: Vec<Point> = read_json(&points)?;
            let aggregator = ClusterAggregator::new(config.cluster);
            let nodes =
                aggregator.cluster(&points, &bbox.unwrap_or(WORLD), zoom, &schema.schema());
            log::info!("{} points -> {} nodes at zoom {zoom}", points.len(), nodes.len());
            print_features(&to_feature_collection(&nodes))?;
        }
        Commands::Stats { points, bbox } => {
            let points: Vec<Point> = read_json(&points)?;
            let stats = bbox.map_or_else(
                || RectStatsReducer::reduce_all(&points),
                |rect| RectStatsReducer::reduce_rect(&points, &rect),
            );
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Commands::Query {
            bbox,
            zoom,
            layer,
            url,
            schema,
        } => {
            let backend = HttpQueryBackend::new(config.backend.clone())?;
            let orchestrator = Orchestrator::from_config(backend, &config, schema.schema());

            orchestrator
                .set_viewport(Viewport { rect: bbox, zoom })
                .await?;
            orchestrator.set_map_layer(layer);
            if let Some(url) = url {
                orchestrator.load_url(&url).await?;
            }

            let snapshot = orchestrator.snapshot();
            if let Some(info) = snapshot.query_info {
                log::info!(
                    "{} points, {} tiles, {}ms",
                    info.point_count,
                    info.tile_count,
                    info.execution_time_ms
                );
            }
            if let Some(stats) = snapshot.rect_stats {
                log::info!("Rectangle statistics: {}", serde_json::to_string(&stats)?);
            }

            print_features(&orchestrator.layer_view()?.to_feature_collection())?;
        }
    }

    Ok(())
}
