//! Route and travel-time aggregation.
//!
//! Travel times are requested for every [`TravelProfile`] at once; the
//! aggregate settles when all profiles have either answered or failed, and a
//! failed or timed-out profile becomes a `None` duration without affecting
//! the others.
//!
//! Both kinds of request are superseding: starting a new one aborts the one
//! in flight, and an answer that arrives after a newer request started is
//! stale. Stale route plans are discarded by
//! [`RoutingAggregator::apply_route`]; stale travel times fail
//! [`RoutingAggregator::is_current_times`]. Each profile of a travel-time
//! query can also be cancelled on its own.

use futures::future::{abortable, join_all, AbortHandle};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use crate::config::RoutingConfig;
use crate::error::ErrorKind;
use crate::geo_utils::{haversine_distance, line_bounds};
use crate::renderer::Renderer;
use crate::{BBox, GeoPoint, MapError};

/// A travel mode with its own route and duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TravelProfile {
    Walking,
    Cycling,
    Driving,
}

impl TravelProfile {
    /// Every profile, in the order results are reported.
    pub const ALL: [TravelProfile; 3] = [TravelProfile::Walking, TravelProfile::Cycling, TravelProfile::Driving];

    /// Profile name on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            TravelProfile::Walking => "walking",
            TravelProfile::Cycling => "cycling",
            TravelProfile::Driving => "driving",
        }
    }

    /// Short label for summaries.
    pub fn label(&self) -> &'static str {
        match self {
            TravelProfile::Walking => "Walk",
            TravelProfile::Cycling => "Cycle",
            TravelProfile::Driving => "Drive",
        }
    }
}

impl fmt::Display for TravelProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered `[lon, lat]` pairs of a route.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RouteGeometry {
    pub coordinates: Vec<[f64; 2]>,
}

impl RouteGeometry {
    pub fn new(coordinates: Vec<[f64; 2]>) -> Self {
        Self { coordinates }
    }

    pub fn bounds(&self) -> Option<BBox> {
        line_bounds(&self.coordinates)
    }

    pub fn is_empty(&self) -> bool {
        self.coordinates.is_empty()
    }
}

/// One profile's answer from the directions backend.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteLeg {
    pub profile: TravelProfile,
    pub geometry: RouteGeometry,
    pub duration_seconds: f64,
    pub distance_meters: Option<f64>,
}

impl RouteLeg {
    pub fn duration_minutes(&self) -> u32 {
        seconds_to_minutes(self.duration_seconds)
    }
}

/// Travel time for one profile; `None` when that request failed or found no route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteResult {
    pub profile: TravelProfile,
    pub duration_minutes: Option<u32>,
}

/// Travel times for one query, one entry per profile in [`TravelProfile::ALL`] order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TravelTimes {
    /// Query generation; only the newest generation should be shown
    pub generation: u64,
    pub results: Vec<RouteResult>,
}

impl TravelTimes {
    pub fn duration_minutes(&self, profile: TravelProfile) -> Option<u32> {
        self.results
            .iter()
            .find(|r| r.profile == profile)
            .and_then(|r| r.duration_minutes)
    }
}

/// A fetched route waiting to be drawn.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutePlan {
    /// Request generation; only the newest generation may be drawn
    pub generation: u64,
    pub leg: RouteLeg,
    pub bounds: BBox,
}

/// Source of per-profile directions.
pub trait DirectionsBackend: Send + Sync {
    fn directions(
        &self,
        profile: TravelProfile,
        from: GeoPoint,
        to: GeoPoint,
    ) -> impl Future<Output = Result<RouteLeg, MapError>> + Send;

    /// Whether a routing credential is configured.
    fn has_credential(&self) -> bool {
        true
    }
}

/// Round a duration in seconds to whole minutes.
pub fn seconds_to_minutes(seconds: f64) -> u32 {
    if !seconds.is_finite() || seconds <= 0.0 {
        return 0;
    }
    (seconds / 60.0).round() as u32
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Issues directions requests and owns the route overlay.
pub struct RoutingAggregator<B> {
    backend: B,
    config: RoutingConfig,
    primary: TravelProfile,
    generation: AtomicU64,
    in_flight: Mutex<Option<AbortHandle>>,
    times_generation: AtomicU64,
    /// Per-profile handles of the newest travel-time query
    times_in_flight: Mutex<Vec<(TravelProfile, AbortHandle)>>,
    /// Generation of the overlay currently drawn
    overlay: Mutex<Option<u64>>,
}

impl<B: DirectionsBackend> RoutingAggregator<B> {
    /// Create an aggregator that draws walking routes.
    pub fn new(backend: B, config: RoutingConfig) -> Self {
        Self::with_primary(backend, config, TravelProfile::Walking)
    }

    /// Create an aggregator whose overlay uses `primary`.
    pub fn with_primary(backend: B, config: RoutingConfig, primary: TravelProfile) -> Self {
        Self {
            backend,
            config,
            primary,
            generation: AtomicU64::new(0),
            in_flight: Mutex::new(None),
            times_generation: AtomicU64::new(0),
            times_in_flight: Mutex::new(Vec::new()),
            overlay: Mutex::new(None),
        }
    }

    pub fn primary(&self) -> TravelProfile {
        self.primary
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Travel time for every profile, queried concurrently.
    ///
    /// Starting a query aborts the previous one, which then returns
    /// [`MapError::Superseded`]. Otherwise one entry per profile is returned
    /// in [`TravelProfile::ALL`] order; a failed, timed-out or individually
    /// cancelled profile has a `None` duration. A precondition failure
    /// (missing or rejected credential) from any profile fails the query.
    pub async fn get_travel_times(&self, from: GeoPoint, to: GeoPoint) -> Result<TravelTimes, MapError> {
        self.require_credential()?;
        let start = Instant::now();
        let generation = self.times_generation.fetch_add(1, Ordering::SeqCst) + 1;

        let mut handles = Vec::with_capacity(TravelProfile::ALL.len());
        let queries: Vec<_> = TravelProfile::ALL
            .into_iter()
            .map(|profile| {
                let (query, handle) = abortable(self.query_profile(profile, from, to));
                handles.push((profile, handle));
                async move { (profile, query.await) }
            })
            .collect();

        {
            let mut in_flight = lock(&self.times_in_flight);
            if !in_flight.is_empty() {
                debug!("[Routing] Travel-time query #{} supersedes the one in flight", generation);
            }
            for (_, previous) in in_flight.drain(..) {
                previous.abort();
            }
            *in_flight = handles;
        }

        let settled = join_all(queries).await;

        {
            let mut in_flight = lock(&self.times_in_flight);
            let current = self.times_generation.load(Ordering::SeqCst);
            if generation != current {
                debug!("[Routing] Travel-time query #{} superseded by #{}", generation, current);
                return Err(MapError::Superseded);
            }
            in_flight.clear();
        }

        let mut results = Vec::with_capacity(settled.len());
        for (profile, outcome) in settled {
            let duration_minutes = match outcome {
                Ok(Ok(leg)) => Some(leg.duration_minutes()),
                Ok(Err(e)) if e.kind() == ErrorKind::Precondition => {
                    warn!("[Routing] {} travel time blocked: {}", profile, e);
                    return Err(e);
                }
                Ok(Err(e)) => {
                    warn!("[Routing] {} travel time unavailable: {}", profile, e);
                    None
                }
                Err(_aborted) => {
                    debug!("[Routing] {} travel time cancelled", profile);
                    None
                }
            };
            results.push(RouteResult { profile, duration_minutes });
        }

        info!(
            "[Routing] Travel times #{} settled in {:?}: {}",
            generation,
            start.elapsed(),
            results
                .iter()
                .map(|r| format!("{}={:?}", r.profile, r.duration_minutes))
                .collect::<Vec<_>>()
                .join(" ")
        );

        Ok(TravelTimes { generation, results })
    }

    /// Whether `times` answers the newest travel-time query.
    pub fn is_current_times(&self, times: &TravelTimes) -> bool {
        times.generation == self.times_generation.load(Ordering::SeqCst)
    }

    /// Abort one profile of the travel-time query in flight; that profile
    /// reports `None` and the others carry on. Returns `false` when no query
    /// is in flight or the profile was already cancelled.
    pub fn cancel_travel_time(&self, profile: TravelProfile) -> bool {
        let in_flight = lock(&self.times_in_flight);
        match in_flight.iter().find(|(p, _)| *p == profile) {
            Some((_, handle)) if !handle.is_aborted() => {
                handle.abort();
                true
            }
            _ => false,
        }
    }

    /// Fetch the primary profile's route, superseding any request in flight.
    ///
    /// Returns [`MapError::Superseded`] if a newer request aborts this one.
    /// The returned plan still has to pass [`Self::apply_route`], which
    /// discards it if a newer request started meanwhile.
    pub async fn get_route(&self, from: GeoPoint, to: GeoPoint) -> Result<RoutePlan, MapError> {
        self.require_credential()?;

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (query, handle) = abortable(self.query_profile(self.primary, from, to));

        if let Some(previous) = lock(&self.in_flight).replace(handle) {
            debug!("[Routing] Route request #{} supersedes the one in flight", generation);
            previous.abort();
        }

        let leg = match query.await {
            Ok(result) => result?,
            Err(_aborted) => {
                debug!("[Routing] Route request #{} aborted", generation);
                return Err(MapError::Superseded);
            }
        };

        let bounds = leg
            .geometry
            .bounds()
            .ok_or(MapError::NoRoute { profile: leg.profile })?;

        Ok(RoutePlan { generation, leg, bounds })
    }

    /// Draw a plan: remove the previous overlay, draw the new one, fit the
    /// camera to it. Returns `false` and draws nothing if the plan is stale.
    pub fn apply_route<R: Renderer>(&self, plan: &RoutePlan, renderer: &mut R) -> bool {
        let current = self.generation.load(Ordering::SeqCst);
        if plan.generation != current {
            debug!(
                "[Routing] Discarding stale route #{} (current #{})",
                plan.generation, current
            );
            return false;
        }

        let mut overlay = lock(&self.overlay);
        if overlay.is_some() {
            renderer.set_route_overlay(None);
        }
        renderer.set_route_overlay(Some(&plan.leg.geometry));
        renderer.fit_bounds(plan.bounds, self.config.fit_padding);
        *overlay = Some(plan.generation);

        info!(
            "[Routing] Drew {} route #{} ({} points, {} min)",
            plan.leg.profile,
            plan.generation,
            plan.leg.geometry.coordinates.len(),
            plan.leg.duration_minutes()
        );
        true
    }

    /// Abort every request in flight and make outstanding plans and travel
    /// times stale.
    pub fn cancel(&self) {
        self.cancel_route();
        self.times_generation.fetch_add(1, Ordering::SeqCst);
        for (_, handle) in lock(&self.times_in_flight).drain(..) {
            handle.abort();
        }
    }

    fn cancel_route(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(handle) = lock(&self.in_flight).take() {
            handle.abort();
        }
    }

    /// Cancel the route request in flight and remove the overlay if one is drawn.
    pub fn clear_route<R: Renderer>(&self, renderer: &mut R) {
        self.cancel_route();
        if lock(&self.overlay).take().is_some() {
            renderer.set_route_overlay(None);
        }
    }

    pub fn has_overlay(&self) -> bool {
        lock(&self.overlay).is_some()
    }

    async fn query_profile(&self, profile: TravelProfile, from: GeoPoint, to: GeoPoint) -> Result<RouteLeg, MapError> {
        let timeout = self.config.request_timeout();
        match tokio::time::timeout(timeout, self.backend.directions(profile, from, to)).await {
            Ok(result) => result,
            Err(_) => Err(MapError::Timeout { profile }),
        }
    }

    fn require_credential(&self) -> Result<(), MapError> {
        if self.backend.has_credential() {
            Ok(())
        } else {
            Err(MapError::MissingCredential)
        }
    }
}

/// Toast-style summary of a travel-time query.
#[derive(Debug, Clone, PartialEq)]
pub struct TravelSummary {
    pub results: Vec<RouteResult>,
    /// Straight-line distance between the endpoints
    pub distance_meters: f64,
}

impl TravelSummary {
    pub fn new(results: Vec<RouteResult>, from: GeoPoint, to: GeoPoint) -> Self {
        Self {
            results,
            distance_meters: haversine_distance(&from, &to),
        }
    }

    /// Whether at least one profile produced a duration.
    pub fn any_available(&self) -> bool {
        self.results.iter().any(|r| r.duration_minutes.is_some())
    }
}

impl fmt::Display for TravelSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .results
            .iter()
            .map(|r| match r.duration_minutes {
                Some(minutes) => format!("{} {} min", r.profile.label(), minutes),
                None => format!("{} N/A", r.profile.label()),
            })
            .collect();

        write!(f, "{}", parts.join(" · "))?;
        if self.distance_meters >= 1000.0 {
            write!(f, " ({:.1} km away)", self.distance_meters / 1000.0)
        } else {
            write!(f, " ({:.0} m away)", self.distance_meters)
        }
    }
}
