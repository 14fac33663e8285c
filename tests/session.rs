//! End-to-end session scenarios against a recording renderer.

use std::collections::{HashMap, HashSet};

use campus_map::{
    BBox, Category, DirectionsBackend, FollowState, GeoPoint, InteractionKind, Location, MapConfig, MapError,
    MapEvent, MarkerVisual, PositionError, PositionSample, Renderer, RouteGeometry, RouteLeg, RoutingAggregator,
    RoutingConfig, Session, SessionNotice, SessionOutcome, TravelProfile, TravelSummary, Viewport,
};

#[derive(Default)]
struct RecordingRenderer {
    viewport: Option<Viewport>,
    markers: HashMap<String, (GeoPoint, MarkerVisual)>,
    set_calls: usize,
    remove_calls: usize,
    fly_tos: Vec<(GeoPoint, f64)>,
    fits: Vec<(BBox, f64)>,
    overlay: Option<RouteGeometry>,
}

impl RecordingRenderer {
    fn at(zoom: f64, width_px: u32) -> Self {
        Self {
            viewport: Some(Viewport::new(BBox::WORLD, zoom, width_px)),
            ..Self::default()
        }
    }

    fn keys_with_visual(&self, pred: impl Fn(&MarkerVisual) -> bool) -> Vec<String> {
        let mut keys: Vec<String> = self
            .markers
            .iter()
            .filter(|(_, (_, visual))| pred(visual))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    fn cluster_keys(&self) -> Vec<String> {
        self.keys_with_visual(|v| matches!(v, MarkerVisual::Cluster { .. }))
    }

    fn location_keys(&self) -> Vec<String> {
        self.keys_with_visual(|v| matches!(v, MarkerVisual::Location { .. }))
    }
}

impl Renderer for RecordingRenderer {
    fn viewport(&self) -> Viewport {
        self.viewport.unwrap_or(Viewport::new(BBox::WORLD, 0.0, 1024))
    }

    fn set_marker(&mut self, key: &str, position: GeoPoint, visual: &MarkerVisual) {
        self.set_calls += 1;
        self.markers.insert(key.to_string(), (position, visual.clone()));
    }

    fn remove_marker(&mut self, key: &str) {
        self.remove_calls += 1;
        self.markers.remove(key);
    }

    fn fly_to(&mut self, center: GeoPoint, zoom: f64) {
        self.fly_tos.push((center, zoom));
    }

    fn fit_bounds(&mut self, bounds: BBox, padding: f64) {
        self.fits.push((bounds, padding));
    }

    fn set_route_overlay(&mut self, geometry: Option<&RouteGeometry>) {
        self.overlay = geometry.cloned();
    }
}

/// 12 locations over ~0.01 degrees, alternating dining and academic.
fn campus() -> Vec<Location> {
    let mut locations = Vec::new();
    for row in 0..3 {
        for col in 0..4 {
            let category = if (row * 4 + col) % 2 == 0 { Category::Dining } else { Category::Academic };
            locations.push(Location::new(
                &format!("loc-{}-{}", row, col),
                &format!("Building {}{}", row, col),
                category,
                40.7290 + row as f64 * 0.005,
                -73.9970 + col as f64 * 0.0033,
            ));
        }
    }
    locations
}

fn campus_provider() -> Result<Vec<Location>, MapError> {
    Ok(campus())
}

fn start(renderer: &mut RecordingRenderer) -> Session {
    Session::start(&campus_provider, MapConfig::default(), renderer).unwrap()
}

fn world_at(zoom: f64) -> MapEvent {
    MapEvent::ViewportChanged(Viewport::new(BBox::WORLD, zoom, 1024))
}

fn fix(lat: f64, lon: f64, t: u64) -> MapEvent {
    MapEvent::Position(PositionSample::new(lat, lon, t))
}

#[test]
fn test_start_draws_initial_viewport() {
    let mut renderer = RecordingRenderer::at(3.0, 1024);
    let session = start(&mut renderer);

    assert!(session.notices().is_empty());
    assert_eq!(renderer.cluster_keys().len(), 1);
    assert!(renderer.location_keys().is_empty());
    assert_eq!(session.reconciler().len(), 1);
}

#[test]
fn test_catalogue_failure_is_not_fatal() {
    let failing = || -> Result<Vec<Location>, MapError> { Err(MapError::CatalogueUnavailable("503".to_string())) };
    let mut renderer = RecordingRenderer::at(3.0, 1024);
    let session = Session::start(&failing, MapConfig::default(), &mut renderer).unwrap();

    assert_eq!(session.notices().len(), 1);
    assert!(matches!(session.notices()[0], SessionNotice::CatalogueUnavailable(_)));
    assert!(renderer.markers.is_empty());
}

#[test]
fn test_empty_catalogue_notice() {
    let empty = || -> Result<Vec<Location>, MapError> { Ok(Vec::new()) };
    let mut renderer = RecordingRenderer::at(3.0, 1024);
    let session = Session::start(&empty, MapConfig::default(), &mut renderer).unwrap();
    assert_eq!(session.notices(), &[SessionNotice::EmptyCatalogue]);
}

#[test]
fn test_duplicate_ids_rejected() {
    let dupes = || -> Result<Vec<Location>, MapError> {
        Ok(vec![
            Location::new("a", "A", Category::Dining, 40.0, -73.0),
            Location::new("a", "B", Category::Dining, 40.1, -73.1),
        ])
    };
    let mut renderer = RecordingRenderer::at(3.0, 1024);
    let err = Session::start(&dupes, MapConfig::default(), &mut renderer).unwrap_err();
    assert_eq!(err, MapError::DuplicateLocation("a".to_string()));
}

#[test]
fn test_ids_shadowing_marker_keys_rejected() {
    for id in ["cluster:0", "@user-position", "@shared-location"] {
        let provider = || -> Result<Vec<Location>, MapError> {
            Ok(vec![
                Location::new("a", "A", Category::Dining, 40.0, -73.0),
                Location::new("b", "B", Category::Academic, 40.1, -73.1),
                Location::new(id, "Imposter", Category::Dining, 40.2, -73.2),
            ])
        };
        let mut renderer = RecordingRenderer::at(18.0, 1024);
        let err = Session::start(&provider, MapConfig::default(), &mut renderer).unwrap_err();
        assert_eq!(err, MapError::ReservedLocationId(id.to_string()));
        assert!(renderer.markers.is_empty());
    }
}

#[test]
fn test_zooming_in_replaces_cluster_with_leaves() {
    let mut renderer = RecordingRenderer::at(3.0, 1024);
    let mut session = start(&mut renderer);
    let cluster_key = renderer.cluster_keys()[0].clone();

    let outcome = session.handle_event(&world_at(18.0), &mut renderer).unwrap();
    assert_eq!(outcome, SessionOutcome::Reclustered { created: 12, updated: 0, removed: 1 });
    assert!(!renderer.markers.contains_key(&cluster_key));
    assert_eq!(renderer.location_keys().len(), 12);

    // Same viewport again draws nothing new.
    let calls = renderer.set_calls;
    session.handle_event(&world_at(18.0), &mut renderer).unwrap();
    assert_eq!(renderer.set_calls, calls);
}

#[test]
fn test_cluster_click_zooms_to_expansion() {
    let mut renderer = RecordingRenderer::at(3.0, 1024);
    let mut session = start(&mut renderer);
    let cluster_key = renderer.cluster_keys()[0].clone();

    let outcome = session
        .handle_event(&MapEvent::MarkerClicked(cluster_key), &mut renderer)
        .unwrap();
    let SessionOutcome::ClusterExpanded { zoom, .. } = outcome else {
        panic!("expected cluster expansion, got {:?}", outcome);
    };
    assert!(zoom > 3);
    assert_eq!(renderer.fly_tos.len(), 1);
    assert_eq!(renderer.fly_tos[0].1, zoom as f64);
}

#[test]
fn test_leaf_click_selects() {
    let mut renderer = RecordingRenderer::at(18.0, 1024);
    let mut session = start(&mut renderer);

    let outcome = session
        .handle_event(&MapEvent::MarkerClicked("loc-1-2".to_string()), &mut renderer)
        .unwrap();
    assert_eq!(outcome, SessionOutcome::Selected("loc-1-2".to_string()));
    assert_eq!(session.selected().unwrap().name, "Building 12");

    // No live position yet, so nothing to route from.
    assert!(session.route_endpoints().is_none());
    session.handle_event(&fix(40.7280, -73.9990, 1), &mut renderer).unwrap();
    let (from, to) = session.route_endpoints().unwrap();
    assert_eq!(from, GeoPoint::new(40.7280, -73.9990));
    assert_eq!(to, session.selected().unwrap().position());
    assert!((to.lat - 40.7340).abs() < 1e-9);

    let link = session.share_link("https://map.example.edu/").unwrap();
    assert!(link.contains("sharedLat=40.734000"));

    let err = session
        .handle_event(&MapEvent::MarkerClicked("ghost".to_string()), &mut renderer)
        .unwrap_err();
    assert_eq!(err, MapError::UnknownLocation("ghost".to_string()));
}

#[test]
fn test_follow_sequence_recenters_once() {
    let mut renderer = RecordingRenderer::at(15.0, 1024);
    let mut session = start(&mut renderer);

    let events = [
        fix(40.7589, -73.9851, 1_000),
        fix(40.7589, -73.9851, 2_000),
        MapEvent::InteractionStart(InteractionKind::Pan),
        fix(40.7600, -73.9800, 3_000),
    ];
    let outcomes: Vec<SessionOutcome> = events
        .iter()
        .map(|e| session.handle_event(e, &mut renderer).unwrap())
        .collect();

    let recenters = outcomes
        .iter()
        .filter(|o| matches!(o, SessionOutcome::Recentered(_)))
        .count();
    assert_eq!(recenters, 1);
    assert_eq!(renderer.fly_tos, vec![(GeoPoint::new(40.7589, -73.9851), 17.0)]);
    assert_eq!(session.follow().state(), FollowState::Manual);

    // The user marker tracks the newest fix.
    let (position, visual) = &renderer.markers["@user-position"];
    assert_eq!(*position, GeoPoint::new(40.7600, -73.9800));
    assert_eq!(*visual, MarkerVisual::UserPosition);

    session.handle_event(&MapEvent::RecenterRequested, &mut renderer).unwrap();
    assert_eq!(renderer.fly_tos.len(), 2);
    assert_eq!(session.follow().state(), FollowState::Following);
}

#[test]
fn test_user_marker_survives_reclustering() {
    let mut renderer = RecordingRenderer::at(3.0, 1024);
    let mut session = start(&mut renderer);
    session.handle_event(&fix(40.7300, -73.9950, 1), &mut renderer).unwrap();

    session.handle_event(&world_at(18.0), &mut renderer).unwrap();
    session.handle_event(&world_at(2.0), &mut renderer).unwrap();
    assert!(renderer.markers.contains_key("@user-position"));
}

#[test]
fn test_permission_denied() {
    let mut renderer = RecordingRenderer::at(3.0, 1024);
    let mut session = start(&mut renderer);

    session
        .handle_event(&MapEvent::PositionError(PositionError::PermissionDenied), &mut renderer)
        .unwrap();
    session
        .handle_event(&MapEvent::PositionError(PositionError::PermissionDenied), &mut renderer)
        .unwrap();
    assert_eq!(session.notices(), &[SessionNotice::PositionDenied]);

    let outcome = session.handle_event(&MapEvent::RecenterRequested, &mut renderer).unwrap();
    assert_eq!(outcome, SessionOutcome::Idle);
    assert!(renderer.fly_tos.is_empty());
}

#[test]
fn test_deep_link_without_live_position() {
    let mut renderer = RecordingRenderer::at(3.0, 1024);
    let mut session = start(&mut renderer);
    let before = renderer.markers.len();

    let shared = session
        .apply_deep_link("https://map.example.edu/?sharedLat=40.7320&sharedLng=-73.9930", &mut renderer)
        .unwrap();
    assert_eq!(shared.position, GeoPoint::new(40.7320, -73.9930));

    let shared_markers = renderer.keys_with_visual(|v| *v == MarkerVisual::SharedLocation);
    assert_eq!(shared_markers.len(), 1);
    assert_eq!(renderer.markers.len(), before + 1);
    assert_eq!(renderer.fly_tos, vec![(GeoPoint::new(40.7320, -73.9930), 17.0)]);
    assert!(renderer.fits.is_empty());
}

#[test]
fn test_deep_link_with_live_position_fits_both() {
    let mut renderer = RecordingRenderer::at(3.0, 1024);
    let mut session = start(&mut renderer);
    session.handle_event(&fix(40.7280, -73.9990, 1), &mut renderer).unwrap();
    let fly_tos = renderer.fly_tos.len();

    session
        .apply_deep_link("?sharedLat=40.7320&sharedLng=-73.9930", &mut renderer)
        .unwrap();
    assert_eq!(renderer.fly_tos.len(), fly_tos);
    assert_eq!(renderer.fits.len(), 1);
    let (bounds, padding) = renderer.fits[0];
    assert_eq!(bounds, BBox::from_corners(GeoPoint::new(40.7280, -73.9990), GeoPoint::new(40.7320, -73.9930)));
    assert_eq!(padding, 80.0);

    // Later fixes do not pull the camera away from the shared location.
    session.handle_event(&fix(40.7290, -73.9990, 2), &mut renderer).unwrap();
    assert_eq!(renderer.fly_tos.len(), fly_tos);
}

#[test]
fn test_invalid_deep_link_draws_nothing() {
    let mut renderer = RecordingRenderer::at(3.0, 1024);
    let mut session = start(&mut renderer);
    let calls = renderer.set_calls;

    assert!(session.apply_deep_link("?sharedLat=40.7", &mut renderer).is_none());
    assert!(session.apply_deep_link("?sharedLat=abc&sharedLng=1", &mut renderer).is_none());
    assert_eq!(renderer.set_calls, calls);
    assert!(renderer.fly_tos.is_empty());
    assert!(session.shared_location().is_none());
}

#[test]
fn test_category_filter_rebuilds_index() {
    let mut renderer = RecordingRenderer::at(18.0, 1024);
    let mut session = start(&mut renderer);
    assert_eq!(renderer.location_keys().len(), 12);

    session
        .handle_event(&MapEvent::MarkerClicked("loc-0-1".to_string()), &mut renderer)
        .unwrap();

    let dining: HashSet<Category> = [Category::Dining].into_iter().collect();
    session.set_category_filter(Some(dining), &mut renderer).unwrap();
    assert_eq!(renderer.location_keys().len(), 6);
    assert_eq!(session.index().len(), 6);
    // loc-0-1 is academic and got filtered out
    assert!(session.selected().is_none());

    session.set_category_filter(None, &mut renderer).unwrap();
    assert_eq!(renderer.location_keys().len(), 12);
}

#[test]
fn test_narrow_viewport_uses_mobile_radius() {
    let mut renderer = RecordingRenderer::at(3.0, 1024);
    let mut session = start(&mut renderer);
    assert_eq!(session.index().config().radius, 50.0);

    let narrow = MapEvent::ViewportChanged(Viewport::new(BBox::WORLD, 3.0, 375));
    session.handle_event(&narrow, &mut renderer).unwrap();
    assert_eq!(session.index().config().radius, 35.0);
}

struct FixedBackend;

impl DirectionsBackend for FixedBackend {
    async fn directions(&self, profile: TravelProfile, from: GeoPoint, to: GeoPoint) -> Result<RouteLeg, MapError> {
        match profile {
            TravelProfile::Driving => Err(MapError::NoRoute { profile }),
            _ => Ok(RouteLeg {
                profile,
                geometry: RouteGeometry::new(vec![from.to_lon_lat(), to.to_lon_lat()]),
                duration_seconds: if profile == TravelProfile::Walking { 300.0 } else { 120.0 },
                distance_meters: None,
            }),
        }
    }
}

#[tokio::test]
async fn test_selection_to_route_overlay() {
    let mut renderer = RecordingRenderer::at(18.0, 1024);
    let mut session = start(&mut renderer);
    session.handle_event(&fix(40.7280, -73.9990, 1), &mut renderer).unwrap();
    session
        .handle_event(&MapEvent::MarkerClicked("loc-2-3".to_string()), &mut renderer)
        .unwrap();
    let (from, to) = session.route_endpoints().unwrap();

    let aggregator = RoutingAggregator::new(FixedBackend, RoutingConfig::default());
    let times = aggregator.get_travel_times(from, to).await.unwrap();
    assert!(aggregator.is_current_times(&times));
    let summary = TravelSummary::new(times.results, from, to);
    assert!(summary.to_string().starts_with("Walk 5 min · Cycle 2 min · Drive N/A"));

    let plan = aggregator.get_route(from, to).await.unwrap();
    assert!(aggregator.apply_route(&plan, &mut renderer));
    assert_eq!(renderer.overlay.as_ref().map(|g| g.coordinates.len()), Some(2));
    assert_eq!(renderer.fits.last().map(|(b, _)| *b), Some(BBox::from_corners(from, to)));
}
