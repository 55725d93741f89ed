//! Subscription records and the views handed to the host.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use wayfarer_weather::{Coordinate, LocationError, WeatherSample};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one subscription. Ids are never reused within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub(crate) fn next() -> Self {
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionKind {
    TrackedLocation,
    SearchedLocation,
    GlobalDataset,
}

impl fmt::Display for SubscriptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SubscriptionKind::TrackedLocation => "tracked",
            SubscriptionKind::SearchedLocation => "searched",
            SubscriptionKind::GlobalDataset => "global",
        };
        f.write_str(name)
    }
}

/// Lifecycle state of a subscription.
///
/// Tracked subscriptions pass through `Requesting` while the initial position is
/// obtained; searched ones pass through `Resolving` while the query is geocoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SubscriptionState {
    #[default]
    Idle,
    Requesting,
    Resolving,
    Active,
}

/// Snapshot of one subscription.
#[derive(Debug, Clone, PartialEq)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub kind: SubscriptionKind,
    pub state: SubscriptionState,
    pub last_sample: Option<WeatherSample>,
    pub last_coordinate: Option<Coordinate>,
    /// Resolved or reverse-geocoded place name, when known
    pub place_name: Option<String>,
    /// Search text, for searched subscriptions
    pub query: Option<String>,
}

impl Subscription {
    pub(crate) fn new(id: SubscriptionId, kind: SubscriptionKind, state: SubscriptionState) -> Self {
        Self {
            id,
            kind,
            state,
            last_sample: None,
            last_coordinate: None,
            place_name: None,
            query: None,
        }
    }
}

/// Everything the host may display, copied out under the state lock.
#[derive(Debug, Clone, Default)]
pub struct LiveSnapshot {
    pub tracked: Option<Subscription>,
    pub searched: Option<Subscription>,
    pub global: Option<Subscription>,
    /// Global table entries sorted by name
    pub table: Vec<(String, WeatherSample)>,
    /// Error that ended the most recent tracking attempt
    pub tracking_error: Option<LocationError>,
    /// Query of the most recent search that found nothing
    pub not_found: Option<String>,
}

impl LiveSnapshot {
    /// State of the subscription of `kind`; `Idle` when there is none.
    pub fn state(&self, kind: SubscriptionKind) -> SubscriptionState {
        let sub = match kind {
            SubscriptionKind::TrackedLocation => &self.tracked,
            SubscriptionKind::SearchedLocation => &self.searched,
            SubscriptionKind::GlobalDataset => &self.global,
        };
        sub.as_ref().map(|s| s.state).unwrap_or_default()
    }
}

/// Notifications published as subscriptions change.
#[derive(Debug, Clone, PartialEq)]
pub enum LiveEvent {
    /// A new sample was committed to a location subscription
    SampleUpdated {
        kind: SubscriptionKind,
        id: SubscriptionId,
    },
    /// Tracking ended, with the error when it was not a requested stop
    TrackingStopped {
        id: SubscriptionId,
        error: Option<LocationError>,
    },
    SearchResolved {
        id: SubscriptionId,
        place_name: String,
    },
    SearchNotFound {
        query: String,
    },
    TableTicked {
        updated: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_increase() {
        let a = SubscriptionId::next();
        let b = SubscriptionId::next();
        assert!(b > a);
        assert_ne!(a, b);
    }

    #[test]
    fn test_empty_snapshot_is_idle() {
        let snapshot = LiveSnapshot::default();
        assert_eq!(
            snapshot.state(SubscriptionKind::TrackedLocation),
            SubscriptionState::Idle
        );
        assert_eq!(
            snapshot.state(SubscriptionKind::GlobalDataset),
            SubscriptionState::Idle
        );
    }
}
