//! Errors surfaced by the orchestrator to the host.

use thiserror::Error;
use wayfarer_weather::LocationError;

/// Why `start_tracking` did not produce an active subscription.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TrackingError {
    #[error(transparent)]
    Location(#[from] LocationError),

    /// A later start or stop replaced this request before it completed.
    #[error("Tracking request superseded")]
    Superseded,
}

impl TrackingError {
    pub fn user_message(&self) -> &'static str {
        match self {
            TrackingError::Location(e) => e.user_message(),
            TrackingError::Superseded => "Location tracking was restarted.",
        }
    }
}

/// Why `search` did not produce an active subscription.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SearchError {
    #[error("No location matches '{0}'")]
    NotFound(String),

    #[error("Search for '{0}' superseded")]
    Superseded(String),
}

impl SearchError {
    pub fn user_message(&self) -> &'static str {
        match self {
            SearchError::NotFound(_) => "Location not found. Try a different search.",
            SearchError::Superseded(_) => "A newer search replaced this one.",
        }
    }

    pub fn query(&self) -> &str {
        match self {
            SearchError::NotFound(q) | SearchError::Superseded(q) => q,
        }
    }
}
