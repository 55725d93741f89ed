//! Owner of the three live subscriptions and the global table.
//!
//! All mutation goes through one mutex that is never held across an await. Every
//! task that resumes after I/O re-checks that its subscription id is still the
//! current one for its kind before it commits anything, so results that arrive
//! after a stop or replace are dropped.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use wayfarer_core::Config;
use wayfarer_weather::{
    Coordinate, GeocodeSource, GlobalTemperatureTable, LocationError, LocationTracker,
    LocationWatch, Place, PositionOptions, PositionSource, WatchStopper, WeatherSample,
    WeatherSource,
};

use crate::error::{SearchError, TrackingError};
use crate::scheduler::{PollToken, PollingScheduler};
use crate::subscription::{
    LiveEvent, LiveSnapshot, Subscription, SubscriptionId, SubscriptionKind, SubscriptionState,
};

const EVENT_CAPACITY: usize = 64;

/// External collaborators, injected so hosts and tests can substitute them.
#[derive(Clone)]
pub struct LiveServices {
    pub weather: Arc<dyn WeatherSource>,
    pub geocoder: Arc<dyn GeocodeSource>,
    pub position: Arc<dyn PositionSource>,
}

/// Refresh intervals and position request options.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LiveConfig {
    pub tracked_refresh: Duration,
    pub searched_refresh: Duration,
    pub global_tick: Duration,
    pub position: PositionOptions,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            tracked_refresh: Duration::from_secs(600),
            searched_refresh: Duration::from_secs(600),
            global_tick: Duration::from_secs(60),
            position: PositionOptions::default(),
        }
    }
}

impl From<&Config> for LiveConfig {
    fn from(config: &Config) -> Self {
        Self {
            tracked_refresh: Duration::from_secs(config.polling.tracked_refresh_secs),
            searched_refresh: Duration::from_secs(config.polling.searched_refresh_secs),
            global_tick: Duration::from_secs(config.polling.global_tick_secs),
            position: PositionOptions::from(&config.location),
        }
    }
}

/// A live subscription plus the handles needed to tear it down.
struct Slot {
    record: Subscription,
    poll: Option<PollToken>,
    watch: Option<WatchStopper>,
    /// Fetches dispatched so far
    issued: u64,
    /// Dispatch number of the last committed fetch
    applied: u64,
}

impl Slot {
    fn new(id: SubscriptionId, kind: SubscriptionKind, state: SubscriptionState) -> Self {
        Self {
            record: Subscription::new(id, kind, state),
            poll: None,
            watch: None,
            issued: 0,
            applied: 0,
        }
    }

    fn teardown(self, scheduler: &PollingScheduler) -> Subscription {
        if let Some(poll) = &self.poll {
            scheduler.cancel(poll);
        }
        if let Some(watch) = &self.watch {
            watch.stop();
        }
        self.record
    }
}

struct LiveState {
    tracked: Option<Slot>,
    searched: Option<Slot>,
    global: Option<Slot>,
    table: GlobalTemperatureTable,
    tracking_error: Option<LocationError>,
    not_found: Option<String>,
}

impl LiveState {
    fn slot_mut(&mut self, kind: SubscriptionKind) -> &mut Option<Slot> {
        match kind {
            SubscriptionKind::TrackedLocation => &mut self.tracked,
            SubscriptionKind::SearchedLocation => &mut self.searched,
            SubscriptionKind::GlobalDataset => &mut self.global,
        }
    }

    /// The slot of `kind`, only if it still belongs to `id`.
    fn current(&mut self, kind: SubscriptionKind, id: SubscriptionId) -> Option<&mut Slot> {
        self.slot_mut(kind)
            .as_mut()
            .filter(|slot| slot.record.id == id)
    }

    fn is_current(&mut self, kind: SubscriptionKind, id: SubscriptionId) -> bool {
        self.current(kind, id).is_some()
    }
}

struct Inner {
    services: LiveServices,
    config: LiveConfig,
    tracker: LocationTracker,
    scheduler: PollingScheduler,
    state: Mutex<LiveState>,
    events: broadcast::Sender<LiveEvent>,
}

impl Inner {
    fn emit(&self, event: LiveEvent) {
        // no receivers is fine
        let _ = self.events.send(event);
    }

    /// Reserve a dispatch number and read the coordinate to fetch for.
    fn begin_fetch(&self, kind: SubscriptionKind, id: SubscriptionId) -> Option<(u64, Coordinate)> {
        let mut state = self.state.lock();
        let slot = state.current(kind, id)?;
        if slot.record.state != SubscriptionState::Active {
            return None;
        }
        let at = slot.record.last_coordinate?;
        slot.issued += 1;
        Some((slot.issued, at))
    }

    fn commit_sample(
        &self,
        kind: SubscriptionKind,
        id: SubscriptionId,
        seq: u64,
        sample: WeatherSample,
    ) {
        let committed = {
            let mut state = self.state.lock();
            match state.current(kind, id) {
                Some(slot) if seq > slot.applied => {
                    slot.applied = seq;
                    slot.record.last_sample = Some(sample);
                    true
                }
                Some(slot) => {
                    tracing::debug!(
                        "Discarding out-of-order sample {} for {} {} (applied {})",
                        seq,
                        kind,
                        id,
                        slot.applied
                    );
                    false
                }
                None => {
                    tracing::debug!("Discarding sample for replaced {} subscription {}", kind, id);
                    false
                }
            }
        };

        if committed {
            self.emit(LiveEvent::SampleUpdated { kind, id });
        }
    }

    /// Record a new tracked position. Returns false once `id` is no longer tracked.
    fn update_coordinate(&self, id: SubscriptionId, coordinate: Coordinate) -> bool {
        let mut state = self.state.lock();
        match state.current(SubscriptionKind::TrackedLocation, id) {
            Some(slot) if slot.record.state == SubscriptionState::Active => {
                slot.record.last_coordinate = Some(coordinate);
                true
            }
            _ => false,
        }
    }

    /// Tear down tracking after a fatal watch error.
    fn end_tracking(&self, id: SubscriptionId, error: LocationError) {
        let slot = {
            let mut state = self.state.lock();
            if !state.is_current(SubscriptionKind::TrackedLocation, id) {
                return;
            }
            state.tracking_error = Some(error.clone());
            state.tracked.take()
        };

        if let Some(slot) = slot {
            slot.teardown(&self.scheduler);
        }
        tracing::warn!("Tracking {} stopped: {}", id, error);
        self.emit(LiveEvent::TrackingStopped {
            id,
            error: Some(error),
        });
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.tracker.stop();
    }
}

/// Coordinates tracked location, searched location and the global dataset.
///
/// Cloning yields another handle to the same orchestrator.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn new(services: LiveServices, config: LiveConfig) -> Self {
        Self::with_table(services, config, GlobalTemperatureTable::world())
    }

    pub fn with_table(
        services: LiveServices,
        config: LiveConfig,
        table: GlobalTemperatureTable,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let tracker = LocationTracker::new(services.position.clone(), config.position);

        Self {
            inner: Arc::new(Inner {
                services,
                config,
                tracker,
                scheduler: PollingScheduler::new(),
                state: Mutex::new(LiveState {
                    tracked: None,
                    searched: None,
                    global: None,
                    table,
                    tracking_error: None,
                    not_found: None,
                }),
                events,
            }),
        }
    }

    /// Receive events published from now on.
    pub fn events(&self) -> broadcast::Receiver<LiveEvent> {
        self.inner.events.subscribe()
    }

    pub fn snapshot(&self) -> LiveSnapshot {
        let state = self.inner.state.lock();
        LiveSnapshot {
            tracked: state.tracked.as_ref().map(|s| s.record.clone()),
            searched: state.searched.as_ref().map(|s| s.record.clone()),
            global: state.global.as_ref().map(|s| s.record.clone()),
            table: state.table.snapshot(),
            tracking_error: state.tracking_error.clone(),
            not_found: state.not_found.clone(),
        }
    }

    /// Start following the device position, replacing any current tracking.
    ///
    /// Resolves once the initial position is known and the subscription is
    /// `Active`. Weather for that position is fetched immediately, then on every
    /// refresh interval and after every position update.
    pub async fn start_tracking(&self) -> Result<SubscriptionId, TrackingError> {
        let inner = &self.inner;

        if !inner.services.position.is_secure_context() {
            tracing::warn!("Tracking refused outside a secure context");
            inner.state.lock().tracking_error = Some(LocationError::InsecureContext);
            return Err(LocationError::InsecureContext.into());
        }

        self.stop_tracking();

        let id = SubscriptionId::next();
        {
            let mut state = inner.state.lock();
            state.tracking_error = None;
            state.tracked = Some(Slot::new(
                id,
                SubscriptionKind::TrackedLocation,
                SubscriptionState::Requesting,
            ));
        }
        tracing::info!("Tracking {} requesting position", id);

        let watch = match inner.tracker.start().await {
            Ok(watch) => watch,
            Err(e) => {
                let current = {
                    let mut state = inner.state.lock();
                    let current = state.is_current(SubscriptionKind::TrackedLocation, id);
                    if current {
                        state.tracked = None;
                        state.tracking_error = Some(e.clone());
                    }
                    current
                };
                if !current {
                    return Err(TrackingError::Superseded);
                }
                tracing::warn!("Tracking {} failed: {}", id, e);
                inner.emit(LiveEvent::TrackingStopped {
                    id,
                    error: Some(e.clone()),
                });
                return Err(e.into());
            }
        };

        let initial = watch.initial();
        let stopper = watch.stopper();
        let activated = {
            let mut state = inner.state.lock();
            match state.current(SubscriptionKind::TrackedLocation, id) {
                Some(slot) => {
                    slot.record.state = SubscriptionState::Active;
                    slot.record.last_coordinate = Some(initial);
                    slot.watch = Some(stopper.clone());
                    slot.poll = Some(self.poll_weather(
                        SubscriptionKind::TrackedLocation,
                        id,
                        inner.config.tracked_refresh,
                    ));
                    true
                }
                None => false,
            }
        };

        if !activated {
            stopper.stop();
            tracing::debug!("Tracking {} superseded before activation", id);
            return Err(TrackingError::Superseded);
        }

        tracing::info!("Tracking {} active at {}", id, initial);
        tokio::spawn(name_tracked(Arc::downgrade(inner), id, initial));
        tokio::spawn(follow_watch(Arc::downgrade(inner), id, watch));
        Ok(id)
    }

    /// Stop tracking. Results still in flight are discarded.
    pub fn stop_tracking(&self) {
        let slot = self.inner.state.lock().tracked.take();
        self.inner.tracker.stop();

        if let Some(slot) = slot {
            let record = slot.teardown(&self.inner.scheduler);
            tracing::info!("Tracking {} stopped", record.id);
            self.inner.emit(LiveEvent::TrackingStopped {
                id: record.id,
                error: None,
            });
        }
    }

    /// Resolve `query` and follow the weather there, replacing any current search.
    ///
    /// A query with no match leaves the searched subscription `Idle` and records
    /// the query as not found.
    pub async fn search(&self, query: &str) -> Result<Place, SearchError> {
        let inner = &self.inner;
        self.clear_search();

        let id = SubscriptionId::next();
        {
            let mut state = inner.state.lock();
            let mut slot = Slot::new(
                id,
                SubscriptionKind::SearchedLocation,
                SubscriptionState::Resolving,
            );
            slot.record.query = Some(query.to_string());
            state.searched = Some(slot);
        }
        tracing::info!("Search {} resolving '{}'", id, query);

        let resolved = inner.services.geocoder.resolve(query).await;

        let outcome = {
            let mut state = inner.state.lock();
            if !state.is_current(SubscriptionKind::SearchedLocation, id) {
                tracing::debug!("Search {} for '{}' superseded", id, query);
                return Err(SearchError::Superseded(query.to_string()));
            }

            match resolved {
                None => {
                    state.searched = None;
                    state.not_found = Some(query.to_string());
                    Err(SearchError::NotFound(query.to_string()))
                }
                Some(place) => {
                    let poll = self.poll_weather(
                        SubscriptionKind::SearchedLocation,
                        id,
                        inner.config.searched_refresh,
                    );
                    if let Some(slot) = state.current(SubscriptionKind::SearchedLocation, id) {
                        slot.record.state = SubscriptionState::Active;
                        slot.record.last_coordinate = Some(place.coordinate);
                        slot.record.place_name = Some(place.display_name.clone());
                        slot.poll = Some(poll);
                    }
                    Ok(place)
                }
            }
        };

        match &outcome {
            Ok(place) => {
                tracing::info!("Search {} active at {} ({})", id, place.coordinate, place.display_name);
                inner.emit(LiveEvent::SearchResolved {
                    id,
                    place_name: place.display_name.clone(),
                });
            }
            Err(_) => {
                tracing::info!("Search {}: no location matches '{}'", id, query);
                inner.emit(LiveEvent::SearchNotFound {
                    query: query.to_string(),
                });
            }
        }
        outcome
    }

    /// Drop the searched subscription and any not-found notice.
    pub fn clear_search(&self) {
        let slot = {
            let mut state = self.inner.state.lock();
            state.not_found = None;
            state.searched.take()
        };

        if let Some(slot) = slot {
            let record = slot.teardown(&self.inner.scheduler);
            tracing::info!("Search {} cleared", record.id);
        }
    }

    /// Start ticking the global table, replacing any current global subscription.
    pub fn start_global(&self) -> SubscriptionId {
        self.stop_global();

        let id = SubscriptionId::next();
        let weak = Arc::downgrade(&self.inner);
        {
            let mut state = self.inner.state.lock();
            let mut slot = Slot::new(
                id,
                SubscriptionKind::GlobalDataset,
                SubscriptionState::Active,
            );
            slot.poll = Some(
                self.inner
                    .scheduler
                    .subscribe(self.inner.config.global_tick, move || {
                        tick_table(weak.clone(), id)
                    }),
            );
            state.global = Some(slot);
        }

        tracing::info!("Global dataset {} active", id);
        id
    }

    pub fn stop_global(&self) {
        let slot = self.inner.state.lock().global.take();
        if let Some(slot) = slot {
            let record = slot.teardown(&self.inner.scheduler);
            tracing::info!("Global dataset {} stopped", record.id);
        }
    }

    /// Cancel every subscription.
    pub fn shutdown(&self) {
        self.stop_tracking();
        self.clear_search();
        self.stop_global();
        self.inner.scheduler.cancel_all();
        tracing::info!("Live subscriptions shut down");
    }

    fn poll_weather(
        &self,
        kind: SubscriptionKind,
        id: SubscriptionId,
        every: Duration,
    ) -> PollToken {
        let weak = Arc::downgrade(&self.inner);
        self.inner
            .scheduler
            .subscribe(every, move || refresh(weak.clone(), kind, id))
    }
}

/// Fetch weather for the subscription's current coordinate and commit it.
async fn refresh(inner: Weak<Inner>, kind: SubscriptionKind, id: SubscriptionId) {
    let Some(inner) = inner.upgrade() else {
        return;
    };
    let Some((seq, at)) = inner.begin_fetch(kind, id) else {
        return;
    };

    let sample = inner.services.weather.fetch(at).await;
    inner.commit_sample(kind, id, seq, sample);
}

/// Feed position updates into the tracked subscription until the watch ends.
async fn follow_watch(inner: Weak<Inner>, id: SubscriptionId, mut watch: LocationWatch) {
    while let Some(update) = watch.next().await {
        let Some(inner) = inner.upgrade() else {
            return;
        };

        match update {
            Ok(coordinate) => {
                if !inner.update_coordinate(id, coordinate) {
                    return;
                }
                tracing::debug!("Tracking {} moved to {}", id, coordinate);
                tokio::spawn(refresh(
                    Arc::downgrade(&inner),
                    SubscriptionKind::TrackedLocation,
                    id,
                ));
            }
            Err(e) => {
                inner.end_tracking(id, e);
                return;
            }
        }
    }
}

/// Attach a place name to the tracked subscription.
async fn name_tracked(inner: Weak<Inner>, id: SubscriptionId, at: Coordinate) {
    let Some(inner) = inner.upgrade() else {
        return;
    };
    let Some(name) = inner.services.geocoder.reverse(at).await else {
        return;
    };

    let mut state = inner.state.lock();
    if let Some(slot) = state.current(SubscriptionKind::TrackedLocation, id) {
        slot.record.place_name = Some(name);
    }
}

async fn tick_table(inner: Weak<Inner>, id: SubscriptionId) {
    let Some(inner) = inner.upgrade() else {
        return;
    };

    let updated = {
        let mut state = inner.state.lock();
        if !state.is_current(SubscriptionKind::GlobalDataset, id) {
            return;
        }
        state.table.tick(&mut rand::thread_rng())
    };

    tracing::debug!("Global table tick updated {} entries", updated);
    inner.emit(LiveEvent::TableTicked { updated });
}
