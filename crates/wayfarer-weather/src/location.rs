//! Continuous device position observation.
//!
//! A [`PositionSource`] stands in for the platform geolocation service. The
//! [`LocationTracker`] turns it into a cancellable [`LocationWatch`]: one initial
//! fix followed by a feed of updates that ends at the first error or at `stop()`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use wayfarer_core::LocationConfig;

use crate::types::{Coordinate, LocationError, PositionOptions};

const FEED_CAPACITY: usize = 16;

/// Platform geolocation service.
#[async_trait]
pub trait PositionSource: Send + Sync {
    /// Whether the host permits position access at all.
    fn is_secure_context(&self) -> bool;

    /// One-shot position request.
    async fn current_position(&self, options: PositionOptions)
        -> Result<Coordinate, LocationError>;

    /// Begin continuous observation. The source must stop feeding once `cancel` fires.
    fn watch_position(
        &self,
        options: PositionOptions,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<Result<Coordinate, LocationError>>;
}

impl From<&LocationConfig> for PositionOptions {
    fn from(config: &LocationConfig) -> Self {
        Self {
            high_accuracy: config.high_accuracy,
            timeout: Duration::from_millis(config.timeout_ms),
            max_cache_age: Duration::from_millis(config.max_cache_age_ms),
        }
    }
}

/// A fixed position re-reported on an interval, for hosts without positioning hardware.
#[derive(Debug, Clone)]
pub struct ConfiguredPosition {
    coordinate: Coordinate,
    secure_context: bool,
    interval: Duration,
}

impl ConfiguredPosition {
    pub fn new(coordinate: Coordinate, secure_context: bool, interval: Duration) -> Self {
        Self {
            coordinate,
            secure_context,
            interval,
        }
    }

    pub fn from_config(config: &LocationConfig) -> Self {
        Self::new(
            Coordinate::new(config.latitude, config.longitude),
            config.secure_context,
            Duration::from_secs(config.watch_interval_secs.max(1)),
        )
    }
}

#[async_trait]
impl PositionSource for ConfiguredPosition {
    fn is_secure_context(&self) -> bool {
        self.secure_context
    }

    async fn current_position(
        &self,
        _options: PositionOptions,
    ) -> Result<Coordinate, LocationError> {
        Ok(self.coordinate)
    }

    fn watch_position(
        &self,
        _options: PositionOptions,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<Result<Coordinate, LocationError>> {
        let (tx, rx) = mpsc::channel(FEED_CAPACITY);
        let coordinate = self.coordinate;
        let interval = self.interval;

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {
                        if tx.send(Ok(coordinate)).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        rx
    }
}

/// Handle that ends a watch from outside the task consuming it.
#[derive(Debug, Clone)]
pub struct WatchStopper(CancellationToken);

impl WatchStopper {
    pub fn stop(&self) {
        self.0.cancel();
    }
}

/// An active position observation.
#[derive(Debug)]
pub struct LocationWatch {
    initial: Coordinate,
    updates: mpsc::Receiver<Result<Coordinate, LocationError>>,
    cancel: CancellationToken,
}

impl LocationWatch {
    /// The position obtained by the initial request.
    pub fn initial(&self) -> Coordinate {
        self.initial
    }

    pub fn stopper(&self) -> WatchStopper {
        WatchStopper(self.cancel.clone())
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Next observed position.
    ///
    /// Returns `None` once the watch is stopped. An error stops the watch before it
    /// is returned, so it is always the last item. A feed that closes on its own is
    /// reported as `PositionUnavailable`.
    pub async fn next(&mut self) -> Option<Result<Coordinate, LocationError>> {
        if self.cancel.is_cancelled() {
            return None;
        }

        let item = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return None,
            item = self.updates.recv() => item,
        };

        // stop() may have landed while the item was in the channel
        if self.cancel.is_cancelled() {
            return None;
        }

        match item {
            Some(Ok(coordinate)) => Some(Ok(coordinate)),
            Some(Err(e)) => {
                self.cancel.cancel();
                Some(Err(e))
            }
            None => {
                self.cancel.cancel();
                Some(Err(LocationError::PositionUnavailable))
            }
        }
    }
}

impl Drop for LocationWatch {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Wraps a [`PositionSource`] with secure-context, timeout and stop handling.
pub struct LocationTracker {
    source: Arc<dyn PositionSource>,
    options: PositionOptions,
    watches: Mutex<Vec<CancellationToken>>,
}

impl LocationTracker {
    pub fn new(source: Arc<dyn PositionSource>, options: PositionOptions) -> Self {
        Self {
            source,
            options,
            watches: Mutex::new(Vec::new()),
        }
    }

    /// Request an initial fix and begin continuous observation.
    ///
    /// Watches started by earlier calls are stopped before the new request is made;
    /// a call that completes later never cancels a newer watch. Errors here are
    /// terminal for this call.
    pub async fn start(&self) -> Result<LocationWatch, LocationError> {
        if !self.source.is_secure_context() {
            tracing::warn!("Location requested outside a secure context");
            return Err(LocationError::InsecureContext);
        }

        self.stop();

        let initial = match tokio::time::timeout(
            self.options.timeout,
            self.source.current_position(self.options),
        )
        .await
        {
            Ok(Ok(coordinate)) => coordinate,
            Ok(Err(e)) => {
                tracing::warn!("Initial position request failed: {}", e);
                return Err(e);
            }
            Err(_) => {
                tracing::warn!("Initial position request timed out");
                return Err(LocationError::Timeout);
            }
        };

        let cancel = CancellationToken::new();
        let updates = self.source.watch_position(self.options, cancel.clone());
        {
            let mut watches = self.watches.lock();
            watches.retain(|w| !w.is_cancelled());
            watches.push(cancel.clone());
        }

        tracing::info!("Location watch started at {}", initial);
        Ok(LocationWatch {
            initial,
            updates,
            cancel,
        })
    }

    /// Stop every watch. None of them yields an update after this returns.
    pub fn stop(&self) {
        let watches: Vec<_> = self.watches.lock().drain(..).collect();
        for cancel in watches.iter().filter(|c| !c.is_cancelled()) {
            cancel.cancel();
            tracing::info!("Location watch stopped");
        }
    }

    /// True while a watch started by this tracker is still running.
    pub fn is_active(&self) -> bool {
        self.watches.lock().iter().any(|c| !c.is_cancelled())
    }
}
