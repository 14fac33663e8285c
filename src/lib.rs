//! # Campus Map
//!
//! Interactive-map core for a campus point-of-interest viewer.
//!
//! This library provides:
//! - Hierarchical point clustering that answers any `(viewport, zoom)` query
//! - Category-driven marker visuals for clusters and single locations
//! - Key-based marker reconciliation against an external renderer
//! - A follow-mode state machine for live position tracking
//! - Concurrent per-profile route and travel-time queries
//!
//! The renderer, position source, catalogue and credential store are external
//! collaborators reached through the traits in [`renderer`] and [`session`].
//!
//! ## Features
//!
//! - **`parallel`** - Project large catalogues in parallel with rayon
//! - **`http`** - Mapbox Directions backend for routing (default)
//! - **`full`** - Enable all features
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use campus_map::{
//!     BBox, Catalogue, Category, ClusterConfig, ClusterProjector, Location,
//!     MarkerReconciler, SpatialIndex,
//! };
//!
//! let catalogue = Arc::new(Catalogue::new(vec![
//!     Location::new("lib", "Main Library", Category::Academic, 40.7295, -73.9965),
//!     Location::new("caf", "Cafeteria", Category::Dining, 40.7297, -73.9962),
//!     Location::new("dorm", "North Hall", Category::Housing, 40.7350, -73.9900),
//! ]).unwrap());
//!
//! let index = SpatialIndex::build(catalogue.clone(), &ClusterConfig::default()).unwrap();
//! let nodes = index.query(&BBox::WORLD, 15.0);
//!
//! let specs = ClusterProjector::default().project(&nodes, &catalogue).unwrap();
//! let plan = campus_map::reconcile(&MarkerReconciler::new().markers(), &specs);
//! assert_eq!(plan.to_create.len(), nodes.len());
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

pub mod config;
pub mod deeplink;
pub mod error;
pub mod follow;
pub mod geo_utils;
pub mod index;
pub mod projector;
pub mod reconcile;
pub mod renderer;
pub mod routing;
pub mod session;

// HTTP module for directions requests
#[cfg(feature = "http")]
pub mod http;

pub use config::{ClusterConfig, FollowConfig, MapConfig, RoutingConfig};
pub use deeplink::{encode_share_link, SharedLocation};
pub use error::{ErrorKind, MapError};
pub use follow::{
    FollowController, FollowOutput, FollowState, PositionError, PositionSample, PositionStatus, Recenter,
};
pub use index::{ClusterNode, SpatialIndex};
pub use projector::{BadgeSize, ClusterProjector, MarkerVisual, RenderSpec};
pub use reconcile::{reconcile, MarkerKind, MarkerReconciler, ReconcilePlan, RenderedMarker};
pub use renderer::{InteractionKind, MapEvent, Renderer};
pub use routing::{
    DirectionsBackend, RouteGeometry, RouteLeg, RoutePlan, RouteResult, RoutingAggregator,
    TravelProfile, TravelSummary, TravelTimes,
};
pub use session::{
    resolve_routing_token, CatalogueProvider, CredentialProvider, EnvCredentials, Session,
    SessionNotice, SessionOutcome, StaticCredentials,
};

#[cfg(feature = "http")]
pub use http::MapboxDirections;

// ============================================================================
// Core Types
// ============================================================================

/// A WGS84 coordinate.
///
/// # Example
/// ```
/// use campus_map::GeoPoint;
/// let point = GeoPoint::new(40.7589, -73.9851); // Times Square
/// assert!(point.is_valid());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    /// Create a new point from latitude and longitude.
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Check if the point has finite, in-range coordinates.
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && self.lat >= -90.0
            && self.lat <= 90.0
            && self.lon >= -180.0
            && self.lon <= 180.0
    }

    /// `[lon, lat]` pair as used by GeoJSON and directions APIs.
    pub fn to_lon_lat(&self) -> [f64; 2] {
        [self.lon, self.lat]
    }
}

/// A geographic bounding box in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

impl BBox {
    /// The whole world.
    pub const WORLD: BBox = BBox {
        west: -180.0,
        south: -90.0,
        east: 180.0,
        north: 90.0,
    };

    /// Smallest box containing both points.
    pub fn from_corners(a: GeoPoint, b: GeoPoint) -> Self {
        Self {
            west: a.lon.min(b.lon),
            south: a.lat.min(b.lat),
            east: a.lon.max(b.lon),
            north: a.lat.max(b.lat),
        }
    }

    /// Get the center point of the box.
    pub fn center(&self) -> GeoPoint {
        GeoPoint::new((self.south + self.north) / 2.0, (self.west + self.east) / 2.0)
    }

    pub fn contains(&self, point: &GeoPoint) -> bool {
        point.lat >= self.south
            && point.lat <= self.north
            && point.lon >= self.west
            && point.lon <= self.east
    }
}

/// The renderer's visible region and zoom, reported on every camera move.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub bounds: BBox,
    /// Camera zoom. Renderers may report fractional zooms; queries floor them.
    pub zoom: f64,
    /// Width of the map surface in pixels, used to pick the cluster radius.
    pub width_px: u32,
}

impl Viewport {
    pub fn new(bounds: BBox, zoom: f64, width_px: u32) -> Self {
        Self { bounds, zoom, width_px }
    }
}

/// Location category. Unrecognised values from the catalogue deserialize
/// as [`Category::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    Academic,
    StudentServices,
    Dining,
    Housing,
    Recreation,
    Administrative,
    Services,
    #[serde(other)]
    Unknown,
}

impl Category {
    pub const ALL: [Category; 7] = [
        Category::Academic,
        Category::StudentServices,
        Category::Dining,
        Category::Housing,
        Category::Recreation,
        Category::Administrative,
        Category::Services,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Academic => "academic",
            Category::StudentServices => "student-services",
            Category::Dining => "dining",
            Category::Housing => "housing",
            Category::Recreation => "recreation",
            Category::Administrative => "administrative",
            Category::Services => "services",
            Category::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A campus point of interest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub id: String,
    pub name: String,
    pub category: Category,
    pub lat: f64,
    #[serde(alias = "lng")]
    pub lon: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Location {
    pub fn new(id: &str, name: &str, category: Category, lat: f64, lon: f64) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            category,
            lat,
            lon,
            description: None,
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn position(&self) -> GeoPoint {
        GeoPoint::new(self.lat, self.lon)
    }
}

/// The session's read-only set of locations, addressable by id.
#[derive(Debug, Clone, Default)]
pub struct Catalogue {
    locations: Vec<Location>,
    by_id: HashMap<String, usize>,
}

impl Catalogue {
    /// Create a catalogue. Location ids become marker keys, so duplicates
    /// and ids in the cluster/pinned key namespace (`cluster:…`, `@…`, empty)
    /// are rejected.
    pub fn new(locations: Vec<Location>) -> Result<Self, MapError> {
        let mut by_id = HashMap::with_capacity(locations.len());
        for (i, location) in locations.iter().enumerate() {
            if reconcile::is_reserved_key(&location.id) {
                return Err(MapError::ReservedLocationId(location.id.clone()));
            }
            if by_id.insert(location.id.clone(), i).is_some() {
                return Err(MapError::DuplicateLocation(location.id.clone()));
            }
        }
        Ok(Self { locations, by_id })
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse a JSON array of locations.
    pub fn from_json_str(json: &str) -> Result<Self, MapError> {
        let locations: Vec<Location> = serde_json::from_str(json)
            .map_err(|e| MapError::CatalogueUnavailable(format!("JSON parse error: {}", e)))?;
        Self::new(locations)
    }

    pub fn get(&self, id: &str) -> Option<&Location> {
        self.by_id.get(id).map(|&i| &self.locations[i])
    }

    pub fn get_index(&self, index: usize) -> Option<&Location> {
        self.locations.get(index)
    }

    pub fn locations(&self) -> &[Location] {
        &self.locations
    }

    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }
}

// ============================================================================
// Tests
// ============================================================================
