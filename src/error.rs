//! Error types shared by every component.

use thiserror::Error;

use crate::TravelProfile;

/// Broad failure classes. Callers use these to decide how a failure is
/// surfaced: setup prompt, degraded result, or rejected input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Missing credential or catalogue. Blocks setup, never retried automatically.
    Precondition,
    /// A single network request failed. Recovered locally as a partial result.
    TransientIo,
    /// Malformed input handed to the core.
    InputRejected,
    /// The position source was denied by the user.
    PermissionDenied,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum MapError {
    #[error("location {id}: invalid coordinates (lat {lat}, lon {lon})")]
    InvalidCoordinate { id: String, lat: f64, lon: f64 },

    #[error("duplicate location id: {0}")]
    DuplicateLocation(String),

    #[error("location id {0:?} collides with a reserved marker key")]
    ReservedLocationId(String),

    #[error("location {id}: unknown category")]
    UnknownCategory { id: String },

    #[error("unknown location: {0}")]
    UnknownLocation(String),

    #[error("unknown cluster: {0}")]
    UnknownCluster(usize),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("routing credential is missing")]
    MissingCredential,

    #[error("catalogue is empty")]
    EmptyCatalogue,

    #[error("catalogue unavailable: {0}")]
    CatalogueUnavailable(String),

    #[error("{profile} request failed: {message}")]
    Transport { profile: TravelProfile, message: String },

    #[error("{profile} request timed out")]
    Timeout { profile: TravelProfile },

    #[error("{profile}: no route found")]
    NoRoute { profile: TravelProfile },

    #[error("route request superseded")]
    Superseded,

    #[error("position permission denied")]
    PermissionDenied,
}

impl MapError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            MapError::MissingCredential
            | MapError::EmptyCatalogue
            | MapError::CatalogueUnavailable(_) => ErrorKind::Precondition,
            MapError::Transport { .. }
            | MapError::Timeout { .. }
            | MapError::NoRoute { .. }
            | MapError::Superseded => ErrorKind::TransientIo,
            MapError::InvalidCoordinate { .. }
            | MapError::DuplicateLocation(_)
            | MapError::ReservedLocationId(_)
            | MapError::UnknownCategory { .. }
            | MapError::UnknownLocation(_)
            | MapError::UnknownCluster(_)
            | MapError::Config(_) => ErrorKind::InputRejected,
            MapError::PermissionDenied => ErrorKind::PermissionDenied,
        }
    }

    /// Whether the failure should block the UI behind a setup prompt.
    pub fn is_blocking(&self) -> bool {
        self.kind() == ErrorKind::Precondition
    }
}
