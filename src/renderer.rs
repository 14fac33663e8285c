//! Boundary to the map rendering surface.
//!
//! The core never owns tiles or a canvas. It asks the renderer to draw,
//! move and remove markers, move the camera, and show a route overlay, and it
//! receives everything the renderer and the position source report as one
//! [`MapEvent`] stream.

use crate::follow::{PositionError, PositionSample};
use crate::projector::MarkerVisual;
use crate::routing::RouteGeometry;
use crate::{BBox, GeoPoint, Viewport};

/// Drawing capability supplied by the host map.
pub trait Renderer {
    /// Current visible region and zoom.
    fn viewport(&self) -> Viewport;

    /// Draw a marker, or move/restyle the one already drawn under `key`.
    fn set_marker(&mut self, key: &str, position: GeoPoint, visual: &MarkerVisual);

    /// Detach the marker drawn under `key`.
    fn remove_marker(&mut self, key: &str);

    /// Animate the camera to a point.
    fn fly_to(&mut self, center: GeoPoint, zoom: f64);

    /// Fit the camera to a box with padding in pixels.
    fn fit_bounds(&mut self, bounds: BBox, padding: f64);

    /// Replace the route overlay; `None` removes it.
    fn set_route_overlay(&mut self, geometry: Option<&RouteGeometry>);
}

/// A user gesture that takes camera control away from follow mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InteractionKind {
    Pan,
    Zoom,
    Rotate,
    Touch,
}

/// Everything that can happen to the map, in delivery order.
#[derive(Debug, Clone, PartialEq)]
pub enum MapEvent {
    /// The camera moved; re-cluster for the new region.
    ViewportChanged(Viewport),
    /// A user gesture started.
    InteractionStart(InteractionKind),
    /// A marker was tapped.
    MarkerClicked(String),
    /// The position source delivered a fix.
    Position(PositionSample),
    /// The position source failed.
    PositionError(PositionError),
    /// The user asked to recenter on their position.
    RecenterRequested,
}
