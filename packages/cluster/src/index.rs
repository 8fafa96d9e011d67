//! Hierarchical greedy clustering index.
//!
//! Points are projected to unit Web Mercator space and clustered once per
//! zoom level, from `max_zoom` down to `min_zoom`. Each level is built from
//! the level above it: an unvisited node absorbs every unvisited neighbor
//! within `radius / (extent * 2^zoom)` when the combined point count reaches
//! `min_points`. Every level keeps its own R-tree so viewport queries are a
//! single envelope lookup.

use std::f64::consts::PI;
use std::sync::Arc;

use rstar::primitives::GeomWithData;
use rstar::{AABB, RTree};
use signal_map_query_models::{DatasetSchema, Point, Rectangle};

use crate::reduce::ClusterProperties;
use crate::{ClusterNode, ClusterOptions, NodeKind};

/// A spatial index that turns a point batch into per-zoom clusters.
pub trait SpatialIndex: Send + Sync {
    /// Replaces the indexed points with `points`.
    fn load(&mut self, points: Vec<Point>);

    /// Returns the clusters and leaves inside `bbox` at `zoom`.
    fn get_clusters(&self, bbox: &Rectangle, zoom: u8) -> Vec<ClusterNode>;

    /// Number of indexed points.
    fn point_count(&self) -> usize;
}

type TreeEntry = GeomWithData<[f64; 2], usize>;

#[derive(Debug, Clone)]
enum Payload {
    Leaf(usize),
    Cluster(Arc<ClusterProperties>),
}

#[derive(Debug, Clone)]
struct IndexedNode {
    x: f64,
    y: f64,
    num_points: usize,
    payload: Payload,
}

struct Level {
    nodes: Vec<IndexedNode>,
    tree: RTree<TreeEntry>,
}

impl Level {
    fn new(nodes: Vec<IndexedNode>) -> Self {
        let entries = nodes
            .iter()
            .enumerate()
            .map(|(i, node)| TreeEntry::new([node.x, node.y], i))
            .collect();
        Self {
            nodes,
            tree: RTree::bulk_load(entries),
        }
    }
}

/// Supercluster-style index backed by one R-tree per zoom level.
pub struct SuperclusterIndex {
    options: ClusterOptions,
    schema: DatasetSchema,
    points: Vec<Point>,
    /// `levels[z - min_zoom]` for `z` in `min_zoom..=max_zoom + 1`.
    levels: Vec<Level>,
}

impl SuperclusterIndex {
    /// Creates an empty index. Call [`SpatialIndex::load`] to populate it.
    #[must_use]
    pub const fn new(options: ClusterOptions, schema: DatasetSchema) -> Self {
        Self {
            options,
            schema,
            points: Vec::new(),
            levels: Vec::new(),
        }
    }

    fn min_zoom(&self) -> u8 {
        self.options.min_zoom.min(self.options.max_zoom)
    }

    #[allow(clippy::cast_precision_loss)]
    fn cluster_level(&self, above: &Level, zoom: u8) -> Vec<IndexedNode> {
        let r = self.options.radius / (self.options.extent * f64::from(zoom).exp2());
        let mut visited = vec![false; above.nodes.len()];
        let mut next = Vec::new();

        for (i, node) in above.nodes.iter().enumerate() {
            if visited[i] {
                continue;
            }
            visited[i] = true;

            let mut neighbors: Vec<usize> = above
                .tree
                .locate_within_distance([node.x, node.y], r * r)
                .map(|entry| entry.data)
                .filter(|&j| !visited[j])
                .collect();
            neighbors.sort_unstable();

            let num_points = node.num_points
                + neighbors
                    .iter()
                    .map(|&j| above.nodes[j].num_points)
                    .sum::<usize>();

            if num_points > node.num_points && num_points >= self.options.min_points {
                let mut wx = node.x * node.num_points as f64;
                let mut wy = node.y * node.num_points as f64;
                let mut props = self.properties(node);

                for &j in &neighbors {
                    visited[j] = true;
                    let other = &above.nodes[j];
                    wx += other.x * other.num_points as f64;
                    wy += other.y * other.num_points as f64;
                    props.reduce(&self.properties(other), &self.schema);
                }

                next.push(IndexedNode {
                    x: wx / num_points as f64,
                    y: wy / num_points as f64,
                    num_points,
                    payload: Payload::Cluster(Arc::new(props)),
                });
            } else {
                next.push(node.clone());
                if num_points > 1 {
                    for &j in &neighbors {
                        visited[j] = true;
                        next.push(above.nodes[j].clone());
                    }
                }
            }
        }

        next
    }

    fn properties(&self, node: &IndexedNode) -> ClusterProperties {
        match &node.payload {
            Payload::Leaf(i) => ClusterProperties::from_point(&self.points[*i], &self.schema),
            Payload::Cluster(props) => props.as_ref().clone(),
        }
    }

    fn to_cluster_node(&self, node: &IndexedNode) -> ClusterNode {
        match &node.payload {
            Payload::Leaf(i) => {
                let point = &self.points[*i];
                let props = ClusterProperties::from_point(point, &self.schema);
                ClusterNode::from_properties(NodeKind::Leaf, (point.lon, point.lat), props)
            }
            Payload::Cluster(props) => ClusterNode::from_properties(
                NodeKind::Aggregate,
                (x_lng(node.x), y_lat(node.y)),
                props.as_ref().clone(),
            ),
        }
    }
}

impl SpatialIndex for SuperclusterIndex {
    fn load(&mut self, points: Vec<Point>) {
        self.points = points;

        let leaves: Vec<IndexedNode> = self
            .points
            .iter()
            .enumerate()
            .filter(|(_, p)| p.lat.is_finite() && p.lon.is_finite())
            .map(|(i, p)| IndexedNode {
                x: lng_x(p.lon),
                y: lat_y(p.lat),
                num_points: 1,
                payload: Payload::Leaf(i),
            })
            .collect();

        let min_zoom = self.min_zoom();
        let mut levels = vec![Level::new(leaves)];
        for zoom in (min_zoom..=self.options.max_zoom).rev() {
            let Some(above) = levels.last() else {
                break;
            };
            let nodes = self.cluster_level(above, zoom);
            levels.push(Level::new(nodes));
        }
        levels.reverse();

        log::debug!(
            "Indexed {} points into {} zoom levels ({} top-level nodes)",
            self.points.len(),
            levels.len(),
            levels.first().map_or(0, |level| level.nodes.len())
        );

        self.levels = levels;
    }

    fn get_clusters(&self, bbox: &Rectangle, zoom: u8) -> Vec<ClusterNode> {
        let min_zoom = self.min_zoom();
        let zoom = zoom.clamp(min_zoom, self.options.max_zoom.saturating_add(1));
        let Some(level) = self.levels.get(usize::from(zoom - min_zoom)) else {
            return Vec::new();
        };

        let (west, east) = if bbox.lon[1] - bbox.lon[0] >= 360.0 {
            (-180.0, 180.0)
        } else {
            (bbox.lon[0].clamp(-180.0, 180.0), bbox.lon[1].clamp(-180.0, 180.0))
        };
        let south = bbox.lat[0].clamp(-90.0, 90.0);
        let north = bbox.lat[1].clamp(-90.0, 90.0);

        let envelope =
            AABB::from_corners([lng_x(west), lat_y(north)], [lng_x(east), lat_y(south)]);

        let mut hits: Vec<usize> = level
            .tree
            .locate_in_envelope_intersecting(&envelope)
            .map(|entry| entry.data)
            .collect();
        hits.sort_unstable();

        hits.into_iter()
            .map(|i| self.to_cluster_node(&level.nodes[i]))
            .collect()
    }

    fn point_count(&self) -> usize {
        self.points.len()
    }
}

fn lng_x(lng: f64) -> f64 {
    lng / 360.0 + 0.5
}

fn lat_y(lat: f64) -> f64 {
    let sin = (lat * PI / 180.0).sin();
    let y = 0.25f64.mul_add(-((1.0 + sin) / (1.0 - sin)).ln() / PI, 0.5);
    y.clamp(0.0, 1.0)
}

fn x_lng(x: f64) -> f64 {
    (x - 0.5) * 360.0
}

fn y_lat(y: f64) -> f64 {
    let y2 = y.mul_add(-360.0, 180.0) * PI / 180.0;
    360.0 * y2.exp().atan() / PI - 90.0
}
