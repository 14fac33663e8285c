//! Follow-mode state machine.
//!
//! Decides whether a live position fix should move the camera. Two states:
//!
//! | state | position fix | interaction start | recenter request | `release()` |
//! |-------|--------------|-------------------|------------------|-------------|
//! | `Following` | move marker, recenter at `follow_zoom` | → `Manual` | recenter | → `Manual` |
//! | `Manual` | move marker only | stays `Manual` | → `Following`, recenter | stays `Manual` |
//!
//! `release()` is the programmatic counterpart of an interaction, called when
//! the session moves the camera itself (deep link, cluster zoom).
//!
//! Position fixes never change the state. Fixes older than the newest
//! accepted one are dropped, so out-of-order delivery cannot drag the camera
//! backwards. While following, a fix within `min_recenter_distance_m` of the
//! last recenter target moves the marker without re-issuing a recenter.
//! So fix, fix, interaction, fix yields a single recenter only when the
//! second fix lands within that distance of the first; two distinct fixes
//! recenter twice before the interaction stops it.
//!
//! A missing fix (permission denied, timeout) is not an error: the machine
//! stays where it is and simply has nothing to recenter on.

use log::{debug, info, warn};

use crate::config::FollowConfig;
use crate::geo_utils::haversine_distance;
use crate::renderer::MapEvent;
use crate::GeoPoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FollowState {
    #[default]
    Following,
    Manual,
}

/// One fix from the position source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionSample {
    pub position: GeoPoint,
    /// Fix time in milliseconds since the epoch
    pub timestamp_ms: u64,
    /// Reported accuracy radius in meters, if known
    pub accuracy_m: Option<f64>,
}

impl PositionSample {
    pub fn new(lat: f64, lon: f64, timestamp_ms: u64) -> Self {
        Self {
            position: GeoPoint::new(lat, lon),
            timestamp_ms,
            accuracy_m: None,
        }
    }
}

/// Failure reported by the position source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PositionError {
    PermissionDenied,
    Unavailable,
    Timeout,
}

/// Whether the position source has produced anything usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PositionStatus {
    #[default]
    Waiting,
    Available,
    Denied,
}

/// Camera instruction produced by a transition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Recenter {
    pub center: GeoPoint,
    pub zoom: f64,
}

/// Result of one transition.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FollowOutput {
    pub recenter: Option<Recenter>,
    /// New position for the live-position marker
    pub marker_position: Option<GeoPoint>,
}

#[derive(Debug, Clone, Default)]
pub struct FollowController {
    config: FollowConfig,
    state: FollowState,
    status: PositionStatus,
    last_sample: Option<PositionSample>,
    last_recenter: Option<GeoPoint>,
}

impl FollowController {
    pub fn new(config: FollowConfig) -> Self {
        Self { config, ..Self::default() }
    }

    pub fn state(&self) -> FollowState {
        self.state
    }

    pub fn status(&self) -> PositionStatus {
        self.status
    }

    /// Most recent accepted position.
    pub fn position(&self) -> Option<GeoPoint> {
        self.last_sample.map(|s| s.position)
    }

    /// Transition on one event. Events that do not concern follow mode are ignored.
    pub fn handle(&mut self, event: &MapEvent) -> FollowOutput {
        match event {
            MapEvent::Position(sample) => self.on_position(sample),
            MapEvent::PositionError(error) => {
                self.on_position_error(*error);
                FollowOutput::default()
            }
            MapEvent::InteractionStart(kind) => {
                if self.state == FollowState::Following {
                    debug!("[FollowController] {:?} interaction, leaving follow mode", kind);
                }
                self.state = FollowState::Manual;
                FollowOutput::default()
            }
            MapEvent::RecenterRequested => self.on_recenter_request(),
            MapEvent::ViewportChanged(_) | MapEvent::MarkerClicked(_) => FollowOutput::default(),
        }
    }

    /// Hand the camera to something other than the live position (a shared
    /// location, a cluster zoom) without a user gesture. Same effect as an
    /// interaction: later fixes move the marker only.
    pub fn release(&mut self) {
        self.state = FollowState::Manual;
    }

    fn on_position(&mut self, sample: &PositionSample) -> FollowOutput {
        if !sample.position.is_valid() {
            warn!("[FollowController] Dropping invalid fix {:?}", sample.position);
            return FollowOutput::default();
        }
        if let Some(last) = self.last_sample {
            if sample.timestamp_ms <= last.timestamp_ms {
                debug!(
                    "[FollowController] Dropping stale fix @{} (latest @{})",
                    sample.timestamp_ms, last.timestamp_ms
                );
                return FollowOutput::default();
            }
        }

        self.last_sample = Some(*sample);
        self.status = PositionStatus::Available;

        let mut out = FollowOutput {
            marker_position: Some(sample.position),
            recenter: None,
        };

        if self.state == FollowState::Following {
            let moved = self.last_recenter.map_or(true, |prev| {
                haversine_distance(&prev, &sample.position) >= self.config.min_recenter_distance_m
            });
            if moved {
                out.recenter = Some(self.recenter_to(sample.position));
            }
        }

        out
    }

    fn on_position_error(&mut self, error: PositionError) {
        match error {
            PositionError::PermissionDenied => {
                info!("[FollowController] Position permission denied, live tracking disabled");
                self.status = PositionStatus::Denied;
            }
            PositionError::Unavailable | PositionError::Timeout => {
                debug!("[FollowController] No fix ({:?}), keeping {:?}", error, self.state);
            }
        }
    }

    fn on_recenter_request(&mut self) -> FollowOutput {
        self.state = FollowState::Following;
        match self.position() {
            Some(position) => FollowOutput {
                recenter: Some(self.recenter_to(position)),
                marker_position: None,
            },
            None => {
                debug!("[FollowController] Recenter requested without a fix");
                FollowOutput::default()
            }
        }
    }

    fn recenter_to(&mut self, center: GeoPoint) -> Recenter {
        self.last_recenter = Some(center);
        Recenter {
            center,
            zoom: self.config.follow_zoom,
        }
    }
}
