//! Key-based marker reconciliation.
//!
//! The reconciler owns every marker handle drawn on the renderer. Each
//! viewport change produces a new spec list; [`reconcile`] diffs it against
//! the drawn set by key in `O(|previous| + |next|)`:
//!
//! - keys in both sets are updated in place (position/visual only), which
//!   keeps the renderer's handle and any click handlers attached to it
//! - keys only in the previous set are removed
//! - keys only in the new set are created
//!
//! [`MarkerReconciler::apply`] executes removals before creations, so a
//! marker leaving a screen position is always detached before a new one is
//! attached there.

use log::{debug, warn};
use std::collections::{HashMap, HashSet};

use crate::index::{ClusterNode, CLUSTER_KEY_PREFIX};
use crate::projector::{MarkerVisual, RenderSpec};
use crate::renderer::Renderer;
use crate::GeoPoint;

/// Prefix shared by every pinned-marker key.
pub const PINNED_KEY_PREFIX: &str = "@";
/// Reserved key for the live-position marker.
pub const USER_POSITION_KEY: &str = "@user-position";
/// Reserved key for the shared-location marker.
pub const SHARED_LOCATION_KEY: &str = "@shared-location";

/// Whether `key` belongs to the synthetic marker namespace (cluster badges
/// and pinned markers). Location ids must stay outside it, since a leaf's
/// marker key is its location id.
pub fn is_reserved_key(key: &str) -> bool {
    key.is_empty() || key.starts_with(CLUSTER_KEY_PREFIX) || key.starts_with(PINNED_KEY_PREFIX)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarkerKind {
    Location,
    Cluster,
    UserPosition,
    SharedLocation,
}

impl MarkerKind {
    pub fn of(node: &ClusterNode) -> Self {
        if node.is_cluster() {
            MarkerKind::Cluster
        } else {
            MarkerKind::Location
        }
    }
}

/// A marker currently drawn on the renderer.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedMarker {
    pub key: String,
    pub position: GeoPoint,
    pub kind: MarkerKind,
    pub visual: MarkerVisual,
}

impl RenderedMarker {
    fn from_spec(key: String, spec: &RenderSpec) -> Self {
        Self {
            key,
            position: spec.node.position(),
            kind: MarkerKind::of(&spec.node),
            visual: spec.visual.clone(),
        }
    }
}

/// Instructions that turn the previous marker set into the next one.
///
/// No key appears in more than one list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcilePlan {
    pub to_create: Vec<RenderedMarker>,
    pub to_update: Vec<RenderedMarker>,
    pub to_remove: Vec<String>,
}

impl ReconcilePlan {
    pub fn is_empty(&self) -> bool {
        self.to_create.is_empty() && self.to_update.is_empty() && self.to_remove.is_empty()
    }
}

/// Diff the drawn markers against the next spec list.
///
/// Duplicate keys in `next` keep their first occurrence. Removals are sorted
/// by key so the plan is deterministic.
pub fn reconcile(previous: &HashMap<String, RenderedMarker>, next: &[RenderSpec]) -> ReconcilePlan {
    let mut plan = ReconcilePlan::default();
    let mut seen: HashSet<String> = HashSet::with_capacity(next.len());

    for spec in next {
        let key = spec.key();
        if !seen.insert(key.clone()) {
            warn!("[MarkerReconciler] Duplicate marker key {} in next set, keeping first", key);
            continue;
        }

        let marker = RenderedMarker::from_spec(key, spec);
        if previous.contains_key(&marker.key) {
            plan.to_update.push(marker);
        } else {
            plan.to_create.push(marker);
        }
    }

    plan.to_remove = previous
        .keys()
        .filter(|key| !seen.contains(*key))
        .cloned()
        .collect();
    plan.to_remove.sort_unstable();

    plan
}

/// Owner of every renderer-side marker handle.
#[derive(Debug, Default)]
pub struct MarkerReconciler {
    markers: HashMap<String, RenderedMarker>,
    /// Markers outside the cluster set (live position, shared location)
    pinned: HashMap<String, RenderedMarker>,
}

impl MarkerReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cluster and location markers currently drawn.
    pub fn markers(&self) -> &HashMap<String, RenderedMarker> {
        &self.markers
    }

    pub fn pinned(&self) -> &HashMap<String, RenderedMarker> {
        &self.pinned
    }

    pub fn get(&self, key: &str) -> Option<&RenderedMarker> {
        self.markers.get(key).or_else(|| self.pinned.get(key))
    }

    /// Total markers drawn, pinned included.
    pub fn len(&self) -> usize {
        self.markers.len() + self.pinned.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty() && self.pinned.is_empty()
    }

    /// Reconcile the drawn cluster markers against `next` and push the
    /// changes to the renderer. Pinned markers are left alone.
    pub fn apply<R: Renderer>(&mut self, next: &[RenderSpec], renderer: &mut R) -> ReconcilePlan {
        let plan = reconcile(&self.markers, next);

        for key in &plan.to_remove {
            renderer.remove_marker(key);
            self.markers.remove(key);
        }

        let mut unchanged = 0;
        for marker in &plan.to_update {
            let changed = self
                .markers
                .get(&marker.key)
                .map_or(true, |old| old.position != marker.position || old.visual != marker.visual);
            if changed {
                renderer.set_marker(&marker.key, marker.position, &marker.visual);
                self.markers.insert(marker.key.clone(), marker.clone());
            } else {
                unchanged += 1;
            }
        }

        for marker in &plan.to_create {
            renderer.set_marker(&marker.key, marker.position, &marker.visual);
            self.markers.insert(marker.key.clone(), marker.clone());
        }

        debug!(
            "[MarkerReconciler] +{} ~{} (={}) -{} -> {} drawn",
            plan.to_create.len(),
            plan.to_update.len() - unchanged,
            unchanged,
            plan.to_remove.len(),
            self.markers.len()
        );

        plan
    }

    /// Draw or move a marker that is not part of the cluster set.
    pub fn pin<R: Renderer>(
        &mut self,
        key: &str,
        kind: MarkerKind,
        position: GeoPoint,
        visual: MarkerVisual,
        renderer: &mut R,
    ) {
        if let Some(existing) = self.pinned.get(key) {
            if existing.position == position && existing.visual == visual {
                return;
            }
        }
        renderer.set_marker(key, position, &visual);
        self.pinned.insert(
            key.to_string(),
            RenderedMarker { key: key.to_string(), position, kind, visual },
        );
    }

    /// Remove a pinned marker. Returns whether one was drawn.
    pub fn unpin<R: Renderer>(&mut self, key: &str, renderer: &mut R) -> bool {
        if self.pinned.remove(key).is_some() {
            renderer.remove_marker(key);
            true
        } else {
            false
        }
    }

    /// Remove every marker this reconciler drew.
    pub fn clear<R: Renderer>(&mut self, renderer: &mut R) {
        let mut keys: Vec<String> = self.markers.keys().chain(self.pinned.keys()).cloned().collect();
        keys.sort_unstable();
        for key in &keys {
            renderer.remove_marker(key);
        }
        self.markers.clear();
        self.pinned.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projector::BadgeSize;
    use crate::routing::RouteGeometry;
    use crate::{BBox, Viewport};

    #[derive(Default)]
    struct LogRenderer {
        calls: Vec<String>,
        drawn: HashSet<String>,
    }

    impl Renderer for LogRenderer {
        fn viewport(&self) -> Viewport {
            Viewport::new(BBox::WORLD, 0.0, 1024)
        }
        fn set_marker(&mut self, key: &str, _position: GeoPoint, _visual: &MarkerVisual) {
            self.calls.push(format!("set {}", key));
            self.drawn.insert(key.to_string());
        }
        fn remove_marker(&mut self, key: &str) {
            self.calls.push(format!("remove {}", key));
            assert!(self.drawn.remove(key), "removed marker {} that was never drawn", key);
        }
        fn fly_to(&mut self, _center: GeoPoint, _zoom: f64) {}
        fn fit_bounds(&mut self, _bounds: BBox, _padding: f64) {}
        fn set_route_overlay(&mut self, _geometry: Option<&RouteGeometry>) {}
    }

    fn leaf(id: &str, lat: f64) -> RenderSpec {
        RenderSpec {
            node: ClusterNode::Leaf { position: GeoPoint::new(lat, 0.0), location_id: id.to_string() },
            visual: MarkerVisual::SharedLocation,
        }
    }

    fn cluster(id: usize, count: u32) -> RenderSpec {
        RenderSpec {
            node: ClusterNode::Cluster {
                cluster_id: id,
                position: GeoPoint::new(1.0, 1.0),
                point_count: count,
                expansion_zoom: 4,
            },
            visual: MarkerVisual::Cluster { label: count.to_string(), size: BadgeSize::Small, color: "#000" },
        }
    }

    fn keys(markers: &[RenderedMarker]) -> Vec<&str> {
        let mut k: Vec<&str> = markers.iter().map(|m| m.key.as_str()).collect();
        k.sort_unstable();
        k
    }

    #[test]
    fn test_reconcile_splits_by_key() {
        let mut reconciler = MarkerReconciler::new();
        let mut renderer = LogRenderer::default();
        reconciler.apply(&[leaf("a", 0.0), leaf("b", 0.0), cluster(1, 3)], &mut renderer);

        let plan = reconcile(reconciler.markers(), &[leaf("b", 0.5), leaf("c", 0.0), cluster(2, 5)]);
        assert_eq!(keys(&plan.to_create), vec!["c", "cluster:2"]);
        assert_eq!(keys(&plan.to_update), vec!["b"]);
        assert_eq!(plan.to_remove, vec!["a".to_string(), "cluster:1".to_string()]);
    }

    #[test]
    fn test_conservation_and_disjointness() {
        let previous_specs = vec![leaf("a", 0.0), leaf("b", 0.0), leaf("c", 0.0), cluster(7, 2)];
        let cases = vec![
            vec![],
            vec![leaf("a", 0.0)],
            vec![leaf("d", 0.0), leaf("e", 0.0), cluster(7, 2), cluster(8, 9)],
            previous_specs.clone(),
        ];

        for next in cases {
            let mut reconciler = MarkerReconciler::new();
            let mut renderer = LogRenderer::default();
            reconciler.apply(&previous_specs, &mut renderer);

            let plan = reconcile(reconciler.markers(), &next);
            assert_eq!(
                plan.to_create.len() as i64 - plan.to_remove.len() as i64,
                next.len() as i64 - previous_specs.len() as i64
            );

            let mut all: Vec<String> = plan.to_create.iter().map(|m| m.key.clone()).collect();
            all.extend(plan.to_update.iter().map(|m| m.key.clone()));
            all.extend(plan.to_remove.iter().cloned());
            let unique: HashSet<&String> = all.iter().collect();
            assert_eq!(unique.len(), all.len(), "a key appeared in two lists");
        }
    }

    #[test]
    fn test_apply_removes_before_creating() {
        let mut reconciler = MarkerReconciler::new();
        let mut renderer = LogRenderer::default();
        reconciler.apply(&[cluster(1, 4)], &mut renderer);
        renderer.calls.clear();

        reconciler.apply(&[leaf("a", 1.0), leaf("b", 1.0)], &mut renderer);
        assert_eq!(renderer.calls, vec!["remove cluster:1", "set a", "set b"]);
        assert_eq!(renderer.drawn.len(), 2);
    }

    #[test]
    fn test_apply_updates_in_place_and_skips_unchanged() {
        let mut reconciler = MarkerReconciler::new();
        let mut renderer = LogRenderer::default();
        reconciler.apply(&[leaf("a", 0.0), leaf("b", 0.0)], &mut renderer);
        renderer.calls.clear();

        let plan = reconciler.apply(&[leaf("a", 0.0), leaf("b", 2.0)], &mut renderer);
        assert_eq!(plan.to_update.len(), 2);
        assert_eq!(renderer.calls, vec!["set b"]);
        assert_eq!(reconciler.markers()["b"].position.lat, 2.0);
    }

    #[test]
    fn test_duplicate_keys_keep_first() {
        let plan = reconcile(&HashMap::new(), &[leaf("a", 0.0), leaf("a", 5.0)]);
        assert_eq!(plan.to_create.len(), 1);
        assert_eq!(plan.to_create[0].position.lat, 0.0);
    }

    #[test]
    fn test_pinned_markers_survive_reconcile() {
        let mut reconciler = MarkerReconciler::new();
        let mut renderer = LogRenderer::default();
        reconciler.pin(
            USER_POSITION_KEY,
            MarkerKind::UserPosition,
            GeoPoint::new(1.0, 1.0),
            MarkerVisual::UserPosition,
            &mut renderer,
        );
        reconciler.apply(&[leaf("a", 0.0)], &mut renderer);
        reconciler.apply(&[], &mut renderer);

        assert!(reconciler.get(USER_POSITION_KEY).is_some());
        assert_eq!(reconciler.len(), 1);

        // Same position again is not redrawn
        renderer.calls.clear();
        reconciler.pin(
            USER_POSITION_KEY,
            MarkerKind::UserPosition,
            GeoPoint::new(1.0, 1.0),
            MarkerVisual::UserPosition,
            &mut renderer,
        );
        assert!(renderer.calls.is_empty());

        assert!(reconciler.unpin(USER_POSITION_KEY, &mut renderer));
        assert!(!reconciler.unpin(USER_POSITION_KEY, &mut renderer));
        assert!(reconciler.is_empty());
    }

    #[test]
    fn test_clear_detaches_everything() {
        let mut reconciler = MarkerReconciler::new();
        let mut renderer = LogRenderer::default();
        reconciler.apply(&[leaf("a", 0.0), cluster(2, 3)], &mut renderer);
        reconciler.pin(
            SHARED_LOCATION_KEY,
            MarkerKind::SharedLocation,
            GeoPoint::new(0.0, 0.0),
            MarkerVisual::SharedLocation,
            &mut renderer,
        );
        reconciler.clear(&mut renderer);
        assert!(renderer.drawn.is_empty());
        assert!(reconciler.is_empty());
    }
}
