//! A map session: one catalogue, one renderer, every component wired together.
//!
//! The session owns the clustering index, the marker set and the follow
//! state, and feeds every [`MapEvent`] through them in delivery order. Routing
//! is async and stays with the host; the session only exposes the endpoints
//! for the current selection.
//!
//! Setup failures never abort a session. An unreachable or empty catalogue
//! leaves an empty map with a [`SessionNotice`] for the host to show.

use log::{debug, info, warn};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use crate::config::MapConfig;
use crate::deeplink::{encode_share_link, SharedLocation};
use crate::follow::{FollowController, PositionError};
use crate::index::{parse_cluster_key, SpatialIndex};
use crate::projector::{ClusterProjector, MarkerVisual};
use crate::reconcile::{MarkerKind, MarkerReconciler, SHARED_LOCATION_KEY, USER_POSITION_KEY};
use crate::renderer::{MapEvent, Renderer};
use crate::{BBox, Catalogue, Category, GeoPoint, Location, MapError, Viewport};

/// Environment variable holding the Mapbox token.
pub const ROUTING_TOKEN_VAR: &str = "MAPBOX_ACCESS_TOKEN";

// ============================================================================
// Providers
// ============================================================================

/// Source of the location catalogue, queried once at session start.
pub trait CatalogueProvider {
    fn list_locations(&self) -> Result<Vec<Location>, MapError>;
}

impl<F> CatalogueProvider for F
where
    F: Fn() -> Result<Vec<Location>, MapError>,
{
    fn list_locations(&self) -> Result<Vec<Location>, MapError> {
        self()
    }
}

/// Source of the routing credential.
pub trait CredentialProvider {
    fn routing_token(&self) -> Option<String>;
}

/// A credential fixed at construction.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    token: Option<String>,
}

impl StaticCredentials {
    pub fn new(token: Option<&str>) -> Self {
        Self { token: token.map(str::to_string) }
    }
}

impl CredentialProvider for StaticCredentials {
    fn routing_token(&self) -> Option<String> {
        self.token.clone().filter(|t| !t.trim().is_empty())
    }
}

/// Reads the token from the environment, loading `.env` first if present.
#[derive(Debug, Clone)]
pub struct EnvCredentials {
    var: String,
}

impl Default for EnvCredentials {
    fn default() -> Self {
        Self { var: ROUTING_TOKEN_VAR.to_string() }
    }
}

impl EnvCredentials {
    pub fn new(var: &str) -> Self {
        Self { var: var.to_string() }
    }
}

impl CredentialProvider for EnvCredentials {
    fn routing_token(&self) -> Option<String> {
        dotenvy::dotenv().ok();
        std::env::var(&self.var).ok().filter(|t| !t.trim().is_empty())
    }
}

/// Resolve the routing token: the provider's value, else a manually entered
/// one, else [`MapError::MissingCredential`].
pub fn resolve_routing_token<P: CredentialProvider + ?Sized>(
    primary: &P,
    manual: Option<&str>,
) -> Result<String, MapError> {
    if let Some(token) = primary.routing_token() {
        return Ok(token);
    }
    match manual.map(str::trim).filter(|t| !t.is_empty()) {
        Some(token) => {
            info!("[Session] Using manually entered routing token");
            Ok(token.to_string())
        }
        None => Err(MapError::MissingCredential),
    }
}

// ============================================================================
// Session
// ============================================================================

/// Banner-level condition the host should surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionNotice {
    /// The catalogue could not be loaded; the map runs empty.
    CatalogueUnavailable(String),
    /// The catalogue loaded but has no locations.
    EmptyCatalogue,
    /// The user denied the position source; live tracking is off.
    PositionDenied,
}

/// What handling one event did, beyond drawing.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionOutcome {
    /// Nothing the host needs to react to.
    Idle,
    /// Markers were reconciled for a new viewport.
    Reclustered { created: usize, updated: usize, removed: usize },
    /// The camera was moved to the live position.
    Recentered(GeoPoint),
    /// A cluster was tapped and the camera zoomed to split it.
    ClusterExpanded { cluster_id: usize, zoom: u8 },
    /// A location was tapped and is now selected.
    Selected(String),
}

pub struct Session {
    config: MapConfig,
    /// Everything the provider returned
    catalogue: Arc<Catalogue>,
    category_filter: Option<HashSet<Category>>,
    index: SpatialIndex,
    projector: ClusterProjector,
    reconciler: MarkerReconciler,
    follow: FollowController,
    notices: Vec<SessionNotice>,
    selected: Option<String>,
    shared: Option<SharedLocation>,
}

impl Session {
    /// Load the catalogue, build the index and draw the initial viewport.
    ///
    /// Catalogue failures become notices. Errors are returned only for input
    /// the session cannot index: invalid configuration, duplicate ids or
    /// invalid coordinates.
    pub fn start<P, R>(provider: &P, config: MapConfig, renderer: &mut R) -> Result<Self, MapError>
    where
        P: CatalogueProvider + ?Sized,
        R: Renderer,
    {
        config.cluster.validate()?;
        let start = Instant::now();
        let mut notices = Vec::new();

        let catalogue = match provider.list_locations() {
            Ok(locations) => Catalogue::new(locations)?,
            Err(e) => {
                warn!("[Session] Catalogue unavailable, starting empty: {}", e);
                notices.push(SessionNotice::CatalogueUnavailable(e.to_string()));
                Catalogue::empty()
            }
        };
        if catalogue.is_empty() && notices.is_empty() {
            notices.push(SessionNotice::EmptyCatalogue);
        }

        let viewport = renderer.viewport();
        let catalogue = Arc::new(catalogue);
        let cluster_config = config.cluster.for_viewport_width(viewport.width_px);
        let index = SpatialIndex::build(Arc::clone(&catalogue), &cluster_config)?;

        let mut session = Self {
            follow: FollowController::new(config.follow.clone()),
            config,
            catalogue,
            category_filter: None,
            index,
            projector: ClusterProjector::default(),
            reconciler: MarkerReconciler::new(),
            notices,
            selected: None,
            shared: None,
        };
        session.refresh(&viewport, renderer)?;

        info!(
            "[Session] Started with {} locations in {:?}",
            session.catalogue.len(),
            start.elapsed()
        );
        Ok(session)
    }

    /// Replace the default projector (strictness follows the build profile).
    pub fn with_projector(mut self, projector: ClusterProjector) -> Self {
        self.projector = projector;
        self
    }

    pub fn notices(&self) -> &[SessionNotice] {
        &self.notices
    }

    pub fn catalogue(&self) -> &Arc<Catalogue> {
        &self.catalogue
    }

    pub fn index(&self) -> &SpatialIndex {
        &self.index
    }

    pub fn reconciler(&self) -> &MarkerReconciler {
        &self.reconciler
    }

    pub fn follow(&self) -> &FollowController {
        &self.follow
    }

    pub fn shared_location(&self) -> Option<SharedLocation> {
        self.shared
    }

    pub fn selected(&self) -> Option<&Location> {
        self.selected.as_deref().and_then(|id| self.catalogue.get(id))
    }

    pub fn clear_selection(&mut self) {
        self.selected = None;
    }

    /// Route endpoints for the selection: live position to selected location.
    pub fn route_endpoints(&self) -> Option<(GeoPoint, GeoPoint)> {
        let from = self.follow.position()?;
        let to = self.selected()?.position();
        Some((from, to))
    }

    /// Share link for the selected location.
    pub fn share_link(&self, base_url: &str) -> Option<String> {
        self.selected().map(|l| encode_share_link(base_url, &l.position()))
    }

    /// Feed one event through follow mode, clustering and selection.
    pub fn handle_event<R: Renderer>(&mut self, event: &MapEvent, renderer: &mut R) -> Result<SessionOutcome, MapError> {
        let follow = self.follow.handle(event);
        if let Some(position) = follow.marker_position {
            self.reconciler.pin(
                USER_POSITION_KEY,
                MarkerKind::UserPosition,
                position,
                MarkerVisual::UserPosition,
                renderer,
            );
        }
        if let Some(recenter) = follow.recenter {
            renderer.fly_to(recenter.center, recenter.zoom);
            return Ok(SessionOutcome::Recentered(recenter.center));
        }

        match event {
            MapEvent::ViewportChanged(viewport) => self.refresh(viewport, renderer),
            MapEvent::MarkerClicked(key) => self.on_marker_click(key, renderer),
            MapEvent::PositionError(PositionError::PermissionDenied) => {
                if !self.notices.contains(&SessionNotice::PositionDenied) {
                    self.notices.push(SessionNotice::PositionDenied);
                }
                self.reconciler.unpin(USER_POSITION_KEY, renderer);
                Ok(SessionOutcome::Idle)
            }
            MapEvent::InteractionStart(_)
            | MapEvent::Position(_)
            | MapEvent::PositionError(_)
            | MapEvent::RecenterRequested => Ok(SessionOutcome::Idle),
        }
    }

    /// Show a location received through a share link.
    ///
    /// Draws one pinned marker. With no live position the camera flies to it;
    /// with one, the camera fits both. Returns `None` and draws nothing if the
    /// link carries no valid location.
    pub fn apply_deep_link<R: Renderer>(&mut self, url: &str, renderer: &mut R) -> Option<SharedLocation> {
        let shared = SharedLocation::from_url(url)?;
        let position = shared.position;

        self.reconciler.pin(
            SHARED_LOCATION_KEY,
            MarkerKind::SharedLocation,
            position,
            MarkerVisual::SharedLocation,
            renderer,
        );

        match self.follow.position() {
            Some(live) => {
                renderer.fit_bounds(BBox::from_corners(live, position), self.config.routing.share_fit_padding);
            }
            None => renderer.fly_to(position, self.config.routing.focus_zoom),
        }
        self.follow.release();
        self.shared = Some(shared);

        info!("[Session] Showing shared location {:.6},{:.6}", position.lat, position.lon);
        Some(shared)
    }

    /// Remove the shared-location marker.
    pub fn dismiss_shared_location<R: Renderer>(&mut self, renderer: &mut R) -> bool {
        self.shared = None;
        self.reconciler.unpin(SHARED_LOCATION_KEY, renderer)
    }

    /// Restrict the map to the given categories; `None` shows everything.
    ///
    /// Rebuilds the index so cluster counts only include visible locations.
    /// A selection outside the filter is cleared.
    pub fn set_category_filter<R: Renderer>(
        &mut self,
        categories: Option<HashSet<Category>>,
        renderer: &mut R,
    ) -> Result<(), MapError> {
        self.category_filter = categories;
        let viewport = renderer.viewport();
        self.rebuild_index(viewport.width_px)?;

        if let Some(location) = self.selected() {
            if !self.is_visible(location.category) {
                self.selected = None;
            }
        }

        self.refresh(&viewport, renderer).map(|_| ())
    }

    pub fn category_filter(&self) -> Option<&HashSet<Category>> {
        self.category_filter.as_ref()
    }

    fn is_visible(&self, category: Category) -> bool {
        self.category_filter
            .as_ref()
            .map_or(true, |allowed| allowed.contains(&category))
    }

    fn rebuild_index(&mut self, width_px: u32) -> Result<(), MapError> {
        let visible: Arc<Catalogue> = match &self.category_filter {
            None => Arc::clone(&self.catalogue),
            Some(allowed) => {
                let locations: Vec<Location> = self
                    .catalogue
                    .locations()
                    .iter()
                    .filter(|l| allowed.contains(&l.category))
                    .cloned()
                    .collect();
                Arc::new(Catalogue::new(locations)?)
            }
        };

        let config = self.config.cluster.for_viewport_width(width_px);
        debug!(
            "[Session] Rebuilding index: {} of {} locations, radius {}px",
            visible.len(),
            self.catalogue.len(),
            config.radius
        );
        self.index = SpatialIndex::build(visible, &config)?;
        Ok(())
    }

    fn refresh<R: Renderer>(&mut self, viewport: &Viewport, renderer: &mut R) -> Result<SessionOutcome, MapError> {
        let radius = self.config.cluster.radius_for_width(viewport.width_px);
        if self.index.config().radius != radius {
            self.rebuild_index(viewport.width_px)?;
        }

        let nodes = self.index.query(&viewport.bounds, viewport.zoom);
        let specs = self.projector.project(&nodes, self.index.catalogue())?;
        let plan = self.reconciler.apply(&specs, renderer);

        Ok(SessionOutcome::Reclustered {
            created: plan.to_create.len(),
            updated: plan.to_update.len(),
            removed: plan.to_remove.len(),
        })
    }

    fn on_marker_click<R: Renderer>(&mut self, key: &str, renderer: &mut R) -> Result<SessionOutcome, MapError> {
        if let Some(cluster_id) = parse_cluster_key(key) {
            let node = self.index.cluster_node(cluster_id)?;
            let zoom = self.index.expansion_zoom(cluster_id)?;
            renderer.fly_to(node.position(), zoom as f64);
            self.follow.release();
            debug!("[Session] Expanding cluster {} at zoom {}", cluster_id, zoom);
            return Ok(SessionOutcome::ClusterExpanded { cluster_id, zoom });
        }

        if key == USER_POSITION_KEY || key == SHARED_LOCATION_KEY {
            return Ok(SessionOutcome::Idle);
        }

        match self.index.catalogue().get(key) {
            Some(location) => {
                self.selected = Some(location.id.clone());
                Ok(SessionOutcome::Selected(location.id.clone()))
            }
            None => Err(MapError::UnknownLocation(key.to_string())),
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("locations", &self.catalogue.len())
            .field("indexed", &self.index.len())
            .field("markers", &self.reconciler.len())
            .field("follow", &self.follow.state())
            .field("notices", &self.notices)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_token_prefers_primary() {
        let primary = StaticCredentials::new(Some("pk.primary"));
        assert_eq!(resolve_routing_token(&primary, Some("pk.manual")).unwrap(), "pk.primary");
    }

    #[test]
    fn test_resolve_token_manual_fallback() {
        let primary = StaticCredentials::new(None);
        assert_eq!(resolve_routing_token(&primary, Some(" pk.manual ")).unwrap(), "pk.manual");
        assert_eq!(resolve_routing_token(&primary, Some("  ")), Err(MapError::MissingCredential));
        assert_eq!(resolve_routing_token(&primary, None), Err(MapError::MissingCredential));
    }

    #[test]
    fn test_blank_static_token_is_absent() {
        assert!(StaticCredentials::new(Some("")).routing_token().is_none());
    }

    #[test]
    fn test_env_credentials_unset_var() {
        let creds = EnvCredentials::new("CAMPUS_MAP_TEST_TOKEN_THAT_IS_NEVER_SET");
        assert!(creds.routing_token().is_none());
    }
}
