//! Mapbox Directions client.
//!
//! One GET per profile against the Directions v5 API, with:
//! - Connection pooling so the three profile requests share a connection
//! - Automatic retry with exponential backoff on 429
//! - Retry with backoff on connection errors
//!
//! Per-request timeouts are applied by the aggregator, not here, so a slow
//! retry loop is still bounded.

use log::{debug, info, warn};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use crate::routing::{DirectionsBackend, RouteGeometry, RouteLeg, TravelProfile};
use crate::{GeoPoint, MapError};

const DEFAULT_BASE_URL: &str = "https://api.mapbox.com/directions/v5/mapbox";
const MAX_IDLE_PER_HOST: usize = 4;
const MAX_RETRIES: u32 = 3;

/// API response for the directions endpoint
#[derive(Debug, Deserialize)]
struct DirectionsResponse {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    routes: Vec<ApiRoute>,
}

#[derive(Debug, Deserialize)]
struct ApiRoute {
    duration: f64,
    #[serde(default)]
    distance: Option<f64>,
    geometry: ApiGeometry,
}

#[derive(Debug, Deserialize)]
struct ApiGeometry {
    coordinates: Vec<[f64; 2]>,
}

/// Tracks consecutive 429s across the profile requests so they back off together.
struct BackoffTracker {
    consecutive_429s: AtomicU32,
}

impl BackoffTracker {
    fn new() -> Self {
        Self { consecutive_429s: AtomicU32::new(0) }
    }

    fn record_success(&self) {
        self.consecutive_429s.store(0, Ordering::Relaxed);
    }

    fn record_429(&self) -> Duration {
        let count = self.consecutive_429s.fetch_add(1, Ordering::Relaxed) + 1;
        // 500ms, 1s, 2s, 4s max
        let backoff = Duration::from_millis(500 * (1 << count.min(3)));
        warn!("[MapboxDirections] Got 429, consecutive: {}, backing off {:?}", count, backoff);
        backoff
    }
}

/// [`DirectionsBackend`] backed by the Mapbox Directions API.
pub struct MapboxDirections {
    client: Client,
    token: Option<String>,
    base_url: String,
    backoff: BackoffTracker,
}

impl MapboxDirections {
    /// Create a client. A `None` or blank token is accepted here; routing
    /// operations then fail with [`MapError::MissingCredential`].
    pub fn new(token: Option<String>) -> Result<Self, MapError> {
        let client = Client::builder()
            .pool_max_idle_per_host(MAX_IDLE_PER_HOST)
            .pool_idle_timeout(Duration::from_secs(60))
            .tcp_keepalive(Duration::from_secs(30))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| MapError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            token: token.filter(|t| !t.trim().is_empty()),
            base_url: DEFAULT_BASE_URL.to_string(),
            backoff: BackoffTracker::new(),
        })
    }

    /// Point the client at another Directions-compatible server.
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    fn request_url(&self, token: &str, profile: TravelProfile, from: GeoPoint, to: GeoPoint) -> String {
        format!(
            "{}/{}/{},{};{},{}?geometries=geojson&overview=full&access_token={}",
            self.base_url,
            profile.as_str(),
            from.lon,
            from.lat,
            to.lon,
            to.lat,
            urlencoding::encode(token)
        )
    }

    async fn fetch(&self, profile: TravelProfile, from: GeoPoint, to: GeoPoint) -> Result<RouteLeg, MapError> {
        let token = self.token.as_deref().ok_or(MapError::MissingCredential)?;
        let url = self.request_url(token, profile, from, to);

        let mut retries = 0;
        let req_start = Instant::now();

        loop {
            match self.client.get(&url).send().await {
                Ok(resp) => {
                    let status = resp.status();

                    if status == StatusCode::TOO_MANY_REQUESTS {
                        retries += 1;
                        if retries > MAX_RETRIES {
                            return Err(MapError::Transport {
                                profile,
                                message: "Max retries exceeded (429)".to_string(),
                            });
                        }
                        let wait = self.backoff.record_429();
                        tokio::time::sleep(wait).await;
                        continue;
                    }

                    self.backoff.record_success();

                    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                        warn!("[MapboxDirections] {} rejected the access token (HTTP {})", profile, status);
                        return Err(MapError::MissingCredential);
                    }
                    if !status.is_success() {
                        return Err(MapError::Transport { profile, message: format!("HTTP {}", status) });
                    }

                    let bytes = resp.bytes().await.map_err(|e| MapError::Transport {
                        profile,
                        message: format!("Body download error: {}", e),
                    })?;

                    let leg = parse_directions(profile, &bytes)?;
                    info!(
                        "[MapboxDirections] {} total={:?} points={} duration={:.0}s",
                        profile,
                        req_start.elapsed(),
                        leg.geometry.coordinates.len(),
                        leg.duration_seconds
                    );
                    return Ok(leg);
                }
                Err(e) => {
                    retries += 1;
                    if retries > MAX_RETRIES {
                        return Err(MapError::Transport { profile, message: format!("Request error: {}", e) });
                    }
                    let wait = Duration::from_millis(200 * (1 << retries));
                    warn!("[MapboxDirections] {} error: {}, retry {} after {:?}", profile, e, retries, wait);
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }
}

impl DirectionsBackend for MapboxDirections {
    async fn directions(&self, profile: TravelProfile, from: GeoPoint, to: GeoPoint) -> Result<RouteLeg, MapError> {
        self.fetch(profile, from, to).await
    }

    fn has_credential(&self) -> bool {
        self.token.is_some()
    }
}

/// Parse a Directions response body into the first route.
pub fn parse_directions(profile: TravelProfile, body: &[u8]) -> Result<RouteLeg, MapError> {
    let data: DirectionsResponse = serde_json::from_slice(body).map_err(|e| MapError::Transport {
        profile,
        message: format!("JSON parse error: {}", e),
    })?;

    if let Some(code) = data.code.as_deref() {
        if code != "Ok" {
            debug!("[MapboxDirections] {} responded with code {}", profile, code);
            return Err(MapError::NoRoute { profile });
        }
    }

    let route = data
        .routes
        .into_iter()
        .next()
        .ok_or(MapError::NoRoute { profile })?;

    if !route.duration.is_finite() || route.duration < 0.0 || route.geometry.coordinates.is_empty() {
        return Err(MapError::NoRoute { profile });
    }

    Ok(RouteLeg {
        profile,
        geometry: RouteGeometry::new(route.geometry.coordinates),
        duration_seconds: route.duration,
        distance_meters: route.distance,
    })
}
