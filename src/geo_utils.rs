//! # Geographic Utilities
//!
//! Projection and distance helpers shared by the clustering index, the
//! follow controller and the routing aggregator.
//!
//! ## Overview
//!
//! | Function | Description |
//! |----------|-------------|
//! | [`haversine_distance`] | Great-circle distance between two points |
//! | [`lng_x`] / [`lat_y`] | Project lon/lat into normalised spherical-mercator space |
//! | [`x_lng`] / [`y_lat`] | Inverse projection |
//! | [`compute_bounds`] | Bounding box of a set of points |
//! | [`line_bounds`] | Bounding box of a `[lon, lat]` polyline |
//!
//! ## Example
//!
//! ```rust
//! use campus_map::{GeoPoint, geo_utils};
//!
//! let library = GeoPoint::new(40.7295, -73.9965);
//! let gym = GeoPoint::new(40.7310, -73.9940);
//!
//! let meters = geo_utils::haversine_distance(&library, &gym);
//! assert!(meters > 100.0 && meters < 500.0);
//!
//! // Mercator round trip
//! let x = geo_utils::lng_x(library.lon);
//! assert!((geo_utils::x_lng(x) - library.lon).abs() < 1e-9);
//! ```
//!
//! ## Coordinate System
//!
//! Inputs are WGS84 degrees. Projected coordinates live in `[0, 1]` on both
//! axes with `(0, 0)` at the north-west corner of the world, so a pixel
//! distance at zoom `z` is the projected distance times `extent * 2^z`.

use geo::{BoundingRect, Coord, Distance, Haversine, LineString, Point};
use std::f64::consts::PI;

use crate::{BBox, GeoPoint};

// =============================================================================
// Distance Functions
// =============================================================================

/// Great-circle distance between two points in meters.
///
/// ```rust
/// use campus_map::{GeoPoint, geo_utils};
///
/// let london = GeoPoint::new(51.5074, -0.1278);
/// let paris = GeoPoint::new(48.8566, 2.3522);
/// let distance = geo_utils::haversine_distance(&london, &paris);
/// assert!((distance - 343_560.0).abs() < 1000.0);
/// ```
#[inline]
pub fn haversine_distance(p1: &GeoPoint, p2: &GeoPoint) -> f64 {
    let point1 = Point::new(p1.lon, p1.lat);
    let point2 = Point::new(p2.lon, p2.lat);
    Haversine::distance(point1, point2)
}

// =============================================================================
// Projection
// =============================================================================

/// Longitude to normalised mercator x in `[0, 1]`.
#[inline]
pub fn lng_x(lon: f64) -> f64 {
    lon / 360.0 + 0.5
}

/// Latitude to normalised mercator y in `[0, 1]`, north at 0.
///
/// Latitudes beyond the mercator limit (~85.05°) clamp to the edges.
#[inline]
pub fn lat_y(lat: f64) -> f64 {
    let sin = (lat * PI / 180.0).sin();
    let y = 0.5 - 0.25 * ((1.0 + sin) / (1.0 - sin)).ln() / PI;
    y.clamp(0.0, 1.0)
}

/// Normalised mercator x back to longitude.
#[inline]
pub fn x_lng(x: f64) -> f64 {
    (x - 0.5) * 360.0
}

/// Normalised mercator y back to latitude.
#[inline]
pub fn y_lat(y: f64) -> f64 {
    let y2 = (180.0 - y * 360.0) * PI / 180.0;
    360.0 * y2.exp().atan() / PI - 90.0
}

// =============================================================================
// Bounding Box Functions
// =============================================================================

/// Bounding box enclosing all points, or `None` for empty input.
///
/// ```rust
/// use campus_map::{GeoPoint, geo_utils};
///
/// let bounds = geo_utils::compute_bounds(&[
///     GeoPoint::new(51.50, -0.13),
///     GeoPoint::new(51.51, -0.12),
/// ]).unwrap();
/// assert_eq!(bounds.south, 51.50);
/// assert_eq!(bounds.east, -0.12);
/// ```
pub fn compute_bounds(points: &[GeoPoint]) -> Option<BBox> {
    if points.is_empty() {
        return None;
    }

    let mut bounds = BBox {
        west: f64::MAX,
        south: f64::MAX,
        east: f64::MIN,
        north: f64::MIN,
    };

    for p in points {
        bounds.west = bounds.west.min(p.lon);
        bounds.east = bounds.east.max(p.lon);
        bounds.south = bounds.south.min(p.lat);
        bounds.north = bounds.north.max(p.lat);
    }

    Some(bounds)
}

/// Bounding box of a `[lon, lat]` polyline, or `None` if it has no points.
pub fn line_bounds(coords: &[[f64; 2]]) -> Option<BBox> {
    let line: LineString<f64> = coords
        .iter()
        .map(|c| Coord { x: c[0], y: c[1] })
        .collect();

    line.bounding_rect().map(|rect| BBox {
        west: rect.min().x,
        south: rect.min().y,
        east: rect.max().x,
        north: rect.max().y,
    })
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: f64, b: f64, epsilon: f64) -> bool {
        (a - b).abs() < epsilon
    }

    #[test]
    fn test_haversine_distance_same_point() {
        let p = GeoPoint::new(51.5074, -0.1278);
        assert_eq!(haversine_distance(&p, &p), 0.0);
    }

    #[test]
    fn test_projection_corners() {
        assert!(approx_eq(lng_x(-180.0), 0.0, 1e-12));
        assert!(approx_eq(lng_x(180.0), 1.0, 1e-12));
        assert!(approx_eq(lat_y(0.0), 0.5, 1e-12));
        assert_eq!(lat_y(90.0), 0.0);
        assert_eq!(lat_y(-90.0), 1.0);
    }

    #[test]
    fn test_projection_inverse() {
        for lat in [-60.0, -12.5, 0.0, 40.7589, 85.0] {
            assert!(approx_eq(y_lat(lat_y(lat)), lat, 1e-9), "lat {}", lat);
        }
        for lon in [-179.0, -73.9851, 0.0, 151.2] {
            assert!(approx_eq(x_lng(lng_x(lon)), lon, 1e-9), "lon {}", lon);
        }
    }

    #[test]
    fn test_compute_bounds_empty() {
        assert!(compute_bounds(&[]).is_none());
    }

    #[test]
    fn test_line_bounds() {
        let coords = [[-73.99, 40.72], [-73.98, 40.73], [-73.985, 40.71]];
        let bounds = line_bounds(&coords).unwrap();
        assert_eq!(bounds.west, -73.99);
        assert_eq!(bounds.east, -73.98);
        assert_eq!(bounds.south, 40.71);
        assert_eq!(bounds.north, 40.73);

        assert!(line_bounds(&[]).is_none());
    }
}
