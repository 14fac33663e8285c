//! Share links carrying a single location.
//!
//! A link is any URL whose query has `sharedLat` and `sharedLng`. Both must
//! be present, parse as finite numbers and lie in range; anything else means
//! the link carries no location and is ignored.

use log::debug;

use crate::GeoPoint;

const LAT_PARAM: &str = "sharedLat";
const LNG_PARAM: &str = "sharedLng";

/// A location received through a share link.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SharedLocation {
    pub position: GeoPoint,
}

impl SharedLocation {
    /// Extract a shared location from a full URL or a bare query string.
    ///
    /// ```rust
    /// use campus_map::SharedLocation;
    ///
    /// let shared = SharedLocation::from_url("https://map.example.edu/?sharedLat=40.7295&sharedLng=-73.9965").unwrap();
    /// assert_eq!(shared.position.lat, 40.7295);
    /// assert!(SharedLocation::from_url("https://map.example.edu/?sharedLat=40.7").is_none());
    /// ```
    pub fn from_url(url: &str) -> Option<Self> {
        let query = match url.split_once('?') {
            Some((_, query)) => query,
            None => url,
        };
        // Fragments are not part of the query.
        let query = query.split('#').next().unwrap_or_default();
        Self::from_query(query)
    }

    /// Extract a shared location from a `key=value&...` query string.
    pub fn from_query(query: &str) -> Option<Self> {
        let mut lat = None;
        let mut lng = None;

        for pair in query.trim_start_matches('?').split('&') {
            let Some((key, value)) = pair.split_once('=') else {
                continue;
            };
            match key {
                LAT_PARAM => lat = Some(decode_number(value)?),
                LNG_PARAM => lng = Some(decode_number(value)?),
                _ => {}
            }
        }

        let position = GeoPoint::new(lat?, lng?);
        if !position.is_valid() {
            debug!("[DeepLink] Ignoring out-of-range shared location {:?}", position);
            return None;
        }
        Some(Self { position })
    }
}

fn decode_number(raw: &str) -> Option<f64> {
    let decoded = urlencoding::decode(raw).ok()?;
    match decoded.trim().parse::<f64>() {
        Ok(value) if value.is_finite() => Some(value),
        _ => {
            debug!("[DeepLink] Ignoring unparseable coordinate {:?}", raw);
            None
        }
    }
}

/// Build a link that opens the map on `position`.
///
/// Existing query parameters on `base_url` are kept; a previous shared
/// location is replaced.
pub fn encode_share_link(base_url: &str, position: &GeoPoint) -> String {
    let (base, fragment) = match base_url.split_once('#') {
        Some((base, fragment)) => (base, Some(fragment)),
        None => (base_url, None),
    };
    let (path, query) = match base.split_once('?') {
        Some((path, query)) => (path, query),
        None => (base, ""),
    };

    let mut params: Vec<String> = query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .filter(|pair| {
            let key = pair.split('=').next().unwrap_or_default();
            key != LAT_PARAM && key != LNG_PARAM
        })
        .map(str::to_string)
        .collect();
    params.push(format!("{}={:.6}", LAT_PARAM, position.lat));
    params.push(format!("{}={:.6}", LNG_PARAM, position.lon));

    let mut link = format!("{}?{}", path, params.join("&"));
    if let Some(fragment) = fragment {
        link.push('#');
        link.push_str(fragment);
    }
    link
}
