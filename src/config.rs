//! Tunable parameters for clustering, follow mode and routing.
//!
//! Every struct has a `Default` matching the behaviour of the deployed map,
//! and deserializes with missing fields filled from those defaults, so a
//! config file only needs to name what it overrides.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::MapError;

/// Configuration for the spatial clustering index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Merge radius in pixels on wide (desktop) displays.
    /// Default: 50.0
    pub radius: f64,

    /// Merge radius in pixels on narrow (mobile) displays. Smaller radius
    /// means fewer merges and more visible detail on a small screen.
    /// Default: 35.0
    pub mobile_radius: f64,

    /// Viewport width (px) below which `mobile_radius` applies.
    /// Default: 768
    pub mobile_breakpoint_px: u32,

    /// Tile extent in pixels used to convert the radius into world units.
    /// Default: 512.0
    pub extent: f64,

    /// Lowest zoom level that gets a cluster level.
    /// Default: 0
    pub min_zoom: u8,

    /// Highest zoom level that clusters. Queries above this return leaves.
    /// Default: 16
    pub max_zoom: u8,

    /// Minimum number of points that form a cluster.
    /// Default: 2
    pub min_points: u32,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            radius: 50.0,
            mobile_radius: 35.0,
            mobile_breakpoint_px: 768,
            extent: 512.0,
            min_zoom: 0,
            max_zoom: 16,
            min_points: 2,
        }
    }
}

impl ClusterConfig {
    /// Copy of this config with the radius chosen for a display width.
    pub fn for_viewport_width(&self, width_px: u32) -> Self {
        Self {
            radius: self.radius_for_width(width_px),
            ..self.clone()
        }
    }

    /// Radius that applies to a display of the given width.
    pub fn radius_for_width(&self, width_px: u32) -> f64 {
        if width_px < self.mobile_breakpoint_px {
            self.mobile_radius
        } else {
            self.radius
        }
    }

    pub fn validate(&self) -> Result<(), MapError> {
        if !(self.radius.is_finite() && self.radius > 0.0) {
            return Err(MapError::Config(format!("radius must be positive, got {}", self.radius)));
        }
        if !(self.mobile_radius.is_finite() && self.mobile_radius > 0.0) {
            return Err(MapError::Config(format!(
                "mobile_radius must be positive, got {}",
                self.mobile_radius
            )));
        }
        if !(self.extent.is_finite() && self.extent > 0.0) {
            return Err(MapError::Config(format!("extent must be positive, got {}", self.extent)));
        }
        if self.min_zoom > self.max_zoom {
            return Err(MapError::Config(format!(
                "min_zoom {} exceeds max_zoom {}",
                self.min_zoom, self.max_zoom
            )));
        }
        // Level max_zoom + 1 holds the leaves and must fit in a u8.
        if self.max_zoom >= 30 {
            return Err(MapError::Config(format!("max_zoom {} too large", self.max_zoom)));
        }
        if self.min_points < 2 {
            return Err(MapError::Config("min_points must be at least 2".to_string()));
        }
        Ok(())
    }
}

/// Configuration for the follow-mode state machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FollowConfig {
    /// Zoom used when recentering on the live position.
    /// Default: 17.0
    pub follow_zoom: f64,

    /// Movement (meters) below which a new sample does not re-issue a
    /// recenter while following. Absorbs GPS jitter.
    /// Default: 5.0
    pub min_recenter_distance_m: f64,
}

impl Default for FollowConfig {
    fn default() -> Self {
        Self {
            follow_zoom: 17.0,
            min_recenter_distance_m: 5.0,
        }
    }
}

/// Configuration for route and travel-time queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Upper bound for a single profile request, in milliseconds.
    /// Default: 10000
    pub request_timeout_ms: u64,

    /// Padding (px) applied when fitting the viewport to a route.
    /// Default: 50.0
    pub fit_padding: f64,

    /// Padding (px) applied when fitting a shared location and the live position.
    /// Default: 80.0
    pub share_fit_padding: f64,

    /// Zoom used when flying to a single point (shared location, cluster fallback).
    /// Default: 17.0
    pub focus_zoom: f64,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 10_000,
            fit_padding: 50.0,
            share_fit_padding: 80.0,
            focus_zoom: 17.0,
        }
    }
}

impl RoutingConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Complete map configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapConfig {
    pub cluster: ClusterConfig,
    pub follow: FollowConfig,
    pub routing: RoutingConfig,
}

impl MapConfig {
    /// Parse a JSON document. Absent sections and fields keep their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, MapError> {
        let config: MapConfig =
            serde_json::from_str(json).map_err(|e| MapError::Config(e.to_string()))?;
        config.cluster.validate()?;
        Ok(config)
    }
}
