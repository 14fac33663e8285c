//! # Hierarchical Point Clustering
//!
//! Builds an immutable, per-zoom cluster hierarchy over the location
//! catalogue and answers `(bbox, zoom)` queries against it.
//!
//! ## Algorithm
//! 1. Validate and project every location into normalised mercator space
//! 2. Level `max_zoom + 1` holds one node per location (the leaves)
//! 3. For each zoom `z` from `max_zoom` down to `min_zoom`, walk the nodes of
//!    level `z + 1` in order; every unprocessed node absorbs its unprocessed
//!    neighbours within `radius / (extent * 2^z)` into a weighted-centroid
//!    cluster (an R-tree per level answers the radius search)
//! 4. Nodes with no neighbours are carried down unchanged, so a cluster keeps
//!    its identity across every zoom where it does not merge further
//!
//! A cluster formed at level `z` splits back into its members at `z + 1`,
//! which is its expansion zoom.
//!
//! The index holds no query state: the same `(bbox, zoom)` always returns
//! the same nodes in the same order.

use log::{debug, info};
use rstar::primitives::GeomWithData;
use rstar::{RTree, AABB};
use std::sync::Arc;
use std::time::Instant;

use crate::config::ClusterConfig;
use crate::geo_utils::{lat_y, lng_x, x_lng, y_lat};
use crate::{BBox, Catalogue, GeoPoint, Location, MapError};

/// Prefix for the synthetic marker key of a cluster node.
pub const CLUSTER_KEY_PREFIX: &str = "cluster:";

/// A node returned by [`SpatialIndex::query`].
#[derive(Debug, Clone, PartialEq)]
pub enum ClusterNode {
    /// Two or more locations rendered as one badge.
    Cluster {
        cluster_id: usize,
        /// Count-weighted centroid of the members
        position: GeoPoint,
        point_count: u32,
        /// Minimum zoom at which this cluster splits into separate nodes
        expansion_zoom: u8,
    },
    /// A single location.
    Leaf {
        position: GeoPoint,
        location_id: String,
    },
}

impl ClusterNode {
    /// Stable marker key: the location id for leaves, `cluster:<id>` for clusters.
    pub fn key(&self) -> String {
        match self {
            ClusterNode::Cluster { cluster_id, .. } => format!("{}{}", CLUSTER_KEY_PREFIX, cluster_id),
            ClusterNode::Leaf { location_id, .. } => location_id.clone(),
        }
    }

    pub fn position(&self) -> GeoPoint {
        match self {
            ClusterNode::Cluster { position, .. } | ClusterNode::Leaf { position, .. } => *position,
        }
    }

    /// Number of locations this node stands for.
    pub fn point_count(&self) -> u32 {
        match self {
            ClusterNode::Cluster { point_count, .. } => *point_count,
            ClusterNode::Leaf { .. } => 1,
        }
    }

    pub fn is_cluster(&self) -> bool {
        matches!(self, ClusterNode::Cluster { .. })
    }
}

/// Parse a cluster marker key back into its cluster id.
pub fn parse_cluster_key(key: &str) -> Option<usize> {
    key.strip_prefix(CLUSTER_KEY_PREFIX)?.parse().ok()
}

// =============================================================================
// Internal hierarchy
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum NodeRef {
    /// Index into the catalogue
    Leaf(usize),
    /// Index into the cluster arena
    Cluster(usize),
}

#[derive(Debug, Clone, Copy)]
struct LevelNode {
    x: f64,
    y: f64,
    count: u32,
    node: NodeRef,
}

#[derive(Debug, Clone)]
struct ClusterRecord {
    x: f64,
    y: f64,
    point_count: u32,
    children: Vec<NodeRef>,
    expansion_zoom: u8,
}

/// Level point: projected position tagged with its index in `Level::nodes`.
type LevelPoint = GeomWithData<[f64; 2], usize>;

struct Level {
    nodes: Vec<LevelNode>,
    tree: RTree<LevelPoint>,
}

impl Level {
    fn new(nodes: Vec<LevelNode>) -> Self {
        let points: Vec<LevelPoint> = nodes
            .iter()
            .enumerate()
            .map(|(i, n)| GeomWithData::new([n.x, n.y], i))
            .collect();
        Self {
            nodes,
            tree: RTree::bulk_load(points),
        }
    }
}

// =============================================================================
// Spatial Index
// =============================================================================

/// Immutable cluster hierarchy for one catalogue.
///
/// Rebuild to reflect catalogue changes; there is no incremental mutation.
///
/// # Example
/// ```
/// use std::sync::Arc;
/// use campus_map::{BBox, Catalogue, Category, ClusterConfig, Location, SpatialIndex};
///
/// let catalogue = Arc::new(Catalogue::new(vec![
///     Location::new("lib", "Library", Category::Academic, 40.7295, -73.9965),
///     Location::new("gym", "Gym", Category::Recreation, 40.7296, -73.9964),
/// ]).unwrap());
///
/// let index = SpatialIndex::build(catalogue, &ClusterConfig::default()).unwrap();
/// let far = index.query(&BBox::WORLD, 2.0);
/// assert_eq!(far.len(), 1);
/// assert_eq!(far[0].point_count(), 2);
///
/// let near = index.query(&BBox::WORLD, 20.0);
/// assert_eq!(near.len(), 2);
/// ```
pub struct SpatialIndex {
    catalogue: Arc<Catalogue>,
    config: ClusterConfig,
    clusters: Vec<ClusterRecord>,
    /// `levels[z - min_zoom]` for `z` in `min_zoom..=max_zoom + 1`
    levels: Vec<Level>,
}

impl SpatialIndex {
    /// Build the hierarchy for every location in the catalogue.
    ///
    /// Fails with [`MapError::InvalidCoordinate`] on the first location whose
    /// coordinates are non-finite or out of range; nothing is clamped.
    pub fn build(catalogue: Arc<Catalogue>, config: &ClusterConfig) -> Result<Self, MapError> {
        config.validate()?;
        let start = Instant::now();

        let locations = catalogue.locations();
        if let Some(bad) = locations.iter().find(|l| !l.position().is_valid()) {
            return Err(MapError::InvalidCoordinate {
                id: bad.id.clone(),
                lat: bad.lat,
                lon: bad.lon,
            });
        }

        let leaves = project_leaves(locations);
        let radius = config.radius;

        let mut clusters: Vec<ClusterRecord> = Vec::new();
        let mut levels: Vec<Level> = Vec::with_capacity((config.max_zoom - config.min_zoom) as usize + 2);
        levels.push(Level::new(leaves));

        for zoom in (config.min_zoom..=config.max_zoom).rev() {
            let above = levels.last().map(|l| cluster_level(l, zoom, radius, config, &mut clusters));
            if let Some(nodes) = above {
                levels.push(Level::new(nodes));
            }
        }
        levels.reverse();

        info!(
            "[SpatialIndex] Built {} locations into {} clusters over zoom {}..={} (radius {}px) in {:?}",
            locations.len(),
            clusters.len(),
            config.min_zoom,
            config.max_zoom,
            radius,
            start.elapsed()
        );

        Ok(Self {
            catalogue,
            config: config.clone(),
            clusters,
            levels,
        })
    }

    /// Nodes visible inside `bbox` at `zoom`.
    ///
    /// Fractional zooms are floored and clamped to `min_zoom..=max_zoom + 1`.
    /// A box whose west edge is east of its east edge wraps the antimeridian.
    pub fn query(&self, bbox: &BBox, zoom: f64) -> Vec<ClusterNode> {
        let level = &self.levels[self.level_index(zoom)];

        let min_lat = bbox.south.clamp(-90.0, 90.0);
        let max_lat = bbox.north.clamp(-90.0, 90.0);
        let mut min_lng = (bbox.west + 180.0).rem_euclid(360.0) - 180.0;
        let mut max_lng = if bbox.east == 180.0 {
            180.0
        } else {
            (bbox.east + 180.0).rem_euclid(360.0) - 180.0
        };

        if bbox.east - bbox.west >= 360.0 {
            min_lng = -180.0;
            max_lng = 180.0;
        }

        let mut hits: Vec<usize> = if min_lng > max_lng {
            let mut east_side = locate(level, min_lng, min_lat, 180.0, max_lat);
            east_side.extend(locate(level, -180.0, min_lat, max_lng, max_lat));
            east_side
        } else {
            locate(level, min_lng, min_lat, max_lng, max_lat)
        };

        hits.sort_unstable_by_key(|&i| level.nodes[i].node);
        hits.dedup();

        debug!(
            "[SpatialIndex] query zoom={} -> {} nodes",
            zoom,
            hits.len()
        );

        hits.into_iter()
            .map(|i| self.to_cluster_node(&level.nodes[i]))
            .collect()
    }

    /// Zoom at which the given cluster splits into separate nodes.
    pub fn expansion_zoom(&self, cluster_id: usize) -> Result<u8, MapError> {
        self.cluster(cluster_id).map(|c| c.expansion_zoom)
    }

    /// The cluster itself as a node (centroid, count, expansion zoom).
    pub fn cluster_node(&self, cluster_id: usize) -> Result<ClusterNode, MapError> {
        self.cluster(cluster_id)?;
        Ok(self.node_ref_to_cluster_node(NodeRef::Cluster(cluster_id)))
    }

    /// Immediate members of a cluster, as they appear at its expansion zoom.
    pub fn children(&self, cluster_id: usize) -> Result<Vec<ClusterNode>, MapError> {
        let cluster = self.cluster(cluster_id)?;
        Ok(cluster
            .children
            .iter()
            .map(|&node| self.node_ref_to_cluster_node(node))
            .collect())
    }

    /// Locations under a cluster, depth first, paginated.
    pub fn leaves(&self, cluster_id: usize, limit: usize, offset: usize) -> Result<Vec<&Location>, MapError> {
        self.cluster(cluster_id)?;

        let mut out = Vec::new();
        let mut skipped = 0;
        let mut stack = vec![NodeRef::Cluster(cluster_id)];

        while let Some(node) = stack.pop() {
            if out.len() >= limit {
                break;
            }
            match node {
                NodeRef::Cluster(id) => {
                    // Reverse so the first child is visited first.
                    stack.extend(self.clusters[id].children.iter().rev().copied());
                }
                NodeRef::Leaf(i) => {
                    if skipped < offset {
                        skipped += 1;
                    } else if let Some(location) = self.catalogue.get_index(i) {
                        out.push(location);
                    }
                }
            }
        }

        Ok(out)
    }

    pub fn catalogue(&self) -> &Arc<Catalogue> {
        &self.catalogue
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    /// Number of indexed locations.
    pub fn len(&self) -> usize {
        self.catalogue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.catalogue.is_empty()
    }

    /// Highest zoom that returns anything other than leaves, plus one.
    pub fn leaf_zoom(&self) -> u8 {
        self.config.max_zoom + 1
    }

    fn level_index(&self, zoom: f64) -> usize {
        let min = self.config.min_zoom as f64;
        let max = self.config.max_zoom as f64 + 1.0;
        let z = if zoom.is_finite() { zoom.floor().clamp(min, max) } else { min };
        (z - min) as usize
    }

    fn cluster(&self, cluster_id: usize) -> Result<&ClusterRecord, MapError> {
        self.clusters
            .get(cluster_id)
            .ok_or(MapError::UnknownCluster(cluster_id))
    }

    fn node_ref_to_cluster_node(&self, node: NodeRef) -> ClusterNode {
        match node {
            NodeRef::Cluster(id) => {
                let c = &self.clusters[id];
                self.to_cluster_node(&LevelNode { x: c.x, y: c.y, count: c.point_count, node })
            }
            NodeRef::Leaf(i) => {
                let (x, y) = self
                    .catalogue
                    .get_index(i)
                    .map(|l| (lng_x(l.lon), lat_y(l.lat)))
                    .unwrap_or((0.5, 0.5));
                self.to_cluster_node(&LevelNode { x, y, count: 1, node })
            }
        }
    }

    fn to_cluster_node(&self, node: &LevelNode) -> ClusterNode {
        match node.node {
            NodeRef::Cluster(id) => ClusterNode::Cluster {
                cluster_id: id,
                position: GeoPoint::new(y_lat(node.y), x_lng(node.x)),
                point_count: node.count,
                expansion_zoom: self.clusters[id].expansion_zoom,
            },
            NodeRef::Leaf(i) => {
                // Leaves report the catalogue coordinates, not the projected round trip.
                match self.catalogue.get_index(i) {
                    Some(location) => ClusterNode::Leaf {
                        position: location.position(),
                        location_id: location.id.clone(),
                    },
                    None => ClusterNode::Leaf {
                        position: GeoPoint::new(y_lat(node.y), x_lng(node.x)),
                        location_id: String::new(),
                    },
                }
            }
        }
    }
}

impl std::fmt::Debug for SpatialIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpatialIndex")
            .field("locations", &self.catalogue.len())
            .field("clusters", &self.clusters.len())
            .field("levels", &self.levels.len())
            .finish()
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

fn project_leaf(i: usize, location: &Location) -> LevelNode {
    LevelNode {
        x: lng_x(location.lon),
        y: lat_y(location.lat),
        count: 1,
        node: NodeRef::Leaf(i),
    }
}

#[cfg(feature = "parallel")]
fn project_leaves(locations: &[Location]) -> Vec<LevelNode> {
    use rayon::prelude::*;
    locations
        .par_iter()
        .enumerate()
        .map(|(i, l)| project_leaf(i, l))
        .collect()
}

#[cfg(not(feature = "parallel"))]
fn project_leaves(locations: &[Location]) -> Vec<LevelNode> {
    locations
        .iter()
        .enumerate()
        .map(|(i, l)| project_leaf(i, l))
        .collect()
}

/// Build the nodes of level `zoom` from the level above it.
fn cluster_level(
    above: &Level,
    zoom: u8,
    radius: f64,
    config: &ClusterConfig,
    clusters: &mut Vec<ClusterRecord>,
) -> Vec<LevelNode> {
    let r = radius / (config.extent * 2f64.powi(zoom as i32));
    let r2 = r * r;

    let mut processed = vec![false; above.nodes.len()];
    let mut next = Vec::with_capacity(above.nodes.len());

    for i in 0..above.nodes.len() {
        if processed[i] {
            continue;
        }
        processed[i] = true;
        let p = above.nodes[i];

        let mut neighbors: Vec<usize> = above
            .tree
            .locate_within_distance([p.x, p.y], r2)
            .map(|g| g.data)
            .filter(|&j| !processed[j])
            .collect();
        neighbors.sort_unstable();

        let count: u32 = p.count + neighbors.iter().map(|&j| above.nodes[j].count).sum::<u32>();

        if !neighbors.is_empty() && count >= config.min_points {
            let mut wx = p.x * p.count as f64;
            let mut wy = p.y * p.count as f64;
            let mut children = Vec::with_capacity(neighbors.len() + 1);
            children.push(p.node);

            for &j in &neighbors {
                processed[j] = true;
                let n = above.nodes[j];
                wx += n.x * n.count as f64;
                wy += n.y * n.count as f64;
                children.push(n.node);
            }

            let id = clusters.len();
            let x = wx / count as f64;
            let y = wy / count as f64;
            clusters.push(ClusterRecord {
                x,
                y,
                point_count: count,
                children,
                expansion_zoom: zoom + 1,
            });
            next.push(LevelNode { x, y, count, node: NodeRef::Cluster(id) });
        } else {
            next.push(p);
            for &j in &neighbors {
                processed[j] = true;
                next.push(above.nodes[j]);
            }
        }
    }

    next
}

fn locate(level: &Level, west: f64, south: f64, east: f64, north: f64) -> Vec<usize> {
    let envelope = AABB::from_corners([lng_x(west), lat_y(north)], [lng_x(east), lat_y(south)]);
    level
        .tree
        .locate_in_envelope(&envelope)
        .map(|g| g.data)
        .collect()
}

// =============================================================================
// Tests
// =============================================================================
