//! Fixed-interval polling with cancellable tokens
//!
//! Each subscription runs an action immediately and then on every interval tick.
//! Actions return a future that is spawned on its own task, so a slow invocation
//! never delays the next dispatch and invocations may overlap in flight.
//!
//! ```ignore
//! let scheduler = PollingScheduler::new();
//! let token = scheduler.subscribe(Duration::from_secs(60), move || {
//!     let fetcher = fetcher.clone();
//!     async move { fetcher.fetch(at).await; }
//! });
//! scheduler.cancel(&token);
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Shortest interval a subscription may use.
pub const MIN_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug)]
struct TokenState {
    /// Held while an action is being invoked, so `cancel` waits out a dispatch
    /// that already passed its liveness check.
    live: Mutex<bool>,
    wake: CancellationToken,
}

/// Handle for one scheduled subscription.
///
/// Clones refer to the same subscription. Tokens from different `subscribe`
/// calls are unrelated even when they drive the same logical work.
#[derive(Debug, Clone)]
pub struct PollToken {
    id: u64,
    state: Arc<TokenState>,
}

impl PollToken {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Stop future dispatches. Once this returns the action is never invoked again;
    /// invocations already spawned run to completion.
    pub fn cancel(&self) {
        let mut live = self.state.live.lock();
        *live = false;
        self.state.wake.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        !*self.state.live.lock()
    }
}

/// Issues and tracks polling subscriptions.
#[derive(Debug, Default)]
pub struct PollingScheduler {
    next_id: AtomicU64,
    tokens: Mutex<HashMap<u64, PollToken>>,
}

impl PollingScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Invoke `action` now and then every `every` until the returned token is cancelled.
    ///
    /// Must be called from within a tokio runtime.
    pub fn subscribe<F, Fut>(&self, every: Duration, action: F) -> PollToken
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let every = every.max(MIN_INTERVAL);
        let token = PollToken {
            id: self.next_id.fetch_add(1, Ordering::Relaxed) + 1,
            state: Arc::new(TokenState {
                live: Mutex::new(true),
                wake: CancellationToken::new(),
            }),
        };

        let state = token.state.clone();
        let id = token.id;
        tokio::spawn(async move {
            // first tick completes immediately
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;
                    _ = state.wake.cancelled() => break,
                    _ = interval.tick() => {
                        if !dispatch(&state, &action) {
                            break;
                        }
                    }
                }
            }

            tracing::debug!("Poll subscription {} finished", id);
        });

        self.tokens.lock().insert(token.id, token.clone());
        tracing::debug!("Poll subscription {} started, every {:?}", token.id, every);
        token
    }

    /// Cancel `token`. Cancelling an already-cancelled token is a no-op.
    pub fn cancel(&self, token: &PollToken) {
        token.cancel();
        self.tokens.lock().remove(&token.id);
    }

    /// Cancel every token this scheduler has issued.
    pub fn cancel_all(&self) {
        for (_, token) in self.tokens.lock().drain() {
            token.cancel();
        }
    }

    /// Number of tokens that have not been cancelled.
    pub fn active(&self) -> usize {
        let mut tokens = self.tokens.lock();
        tokens.retain(|_, t| !t.is_cancelled());
        tokens.len()
    }
}

/// Invoke `action` unless the token was cancelled. Returns false once cancelled.
fn dispatch<F, Fut>(state: &TokenState, action: &F) -> bool
where
    F: Fn() -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    let live = state.live.lock();
    if !*live {
        return false;
    }
    tokio::spawn(action());
    true
}

impl Drop for PollingScheduler {
    fn drop(&mut self) {
        for (_, token) in self.tokens.get_mut().drain() {
            token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    fn counting(counter: &Arc<AtomicUsize>) -> impl Fn() -> std::future::Ready<()> + Send {
        let counter = counter.clone();
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
            std::future::ready(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_invokes_immediately_then_on_interval() {
        let scheduler = PollingScheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let _token = scheduler.subscribe(Duration::from_secs(10), counting(&counter));

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 2);

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_dispatch() {
        let scheduler = PollingScheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let token = scheduler.subscribe(Duration::from_secs(1), counting(&counter));
        tokio::time::sleep(Duration::from_millis(1500)).await;
        let before = counter.load(Ordering::SeqCst);
        assert_eq!(before, 2);

        scheduler.cancel(&token);
        assert!(token.is_cancelled());
        assert_eq!(scheduler.active(), 0);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(counter.load(Ordering::SeqCst), before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_flight_invocation_finishes_after_cancel() {
        let scheduler = PollingScheduler::new();
        let release = Arc::new(Notify::new());
        let finished = Arc::new(AtomicUsize::new(0));

        let token = {
            let release = release.clone();
            let finished = finished.clone();
            scheduler.subscribe(Duration::from_secs(60), move || {
                let release = release.clone();
                let finished = finished.clone();
                async move {
                    release.notified().await;
                    finished.fetch_add(1, Ordering::SeqCst);
                }
            })
        };

        tokio::time::sleep(Duration::from_millis(1)).await;
        scheduler.cancel(&token);
        release.notify_one();
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_invocations_overlap() {
        let scheduler = PollingScheduler::new();
        let started = Arc::new(AtomicUsize::new(0));

        let _token = {
            let started = started.clone();
            scheduler.subscribe(Duration::from_secs(1), move || {
                started.fetch_add(1, Ordering::SeqCst);
                async move {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                }
            })
        };

        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(started.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokens_are_independent() {
        let scheduler = PollingScheduler::new();
        let a = Arc::new(AtomicUsize::new(0));
        let b = Arc::new(AtomicUsize::new(0));

        let first = scheduler.subscribe(Duration::from_secs(1), counting(&a));
        let second = scheduler.subscribe(Duration::from_secs(1), counting(&b));
        assert_ne!(first.id(), second.id());
        assert_eq!(scheduler.active(), 2);

        scheduler.cancel(&first);
        let a_before = a.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(2500)).await;

        assert_eq!(a.load(Ordering::SeqCst), a_before);
        assert!(b.load(Ordering::SeqCst) >= 3);
        assert!(!second.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_all_and_drop() {
        let counter = Arc::new(AtomicUsize::new(0));
        let scheduler = PollingScheduler::new();
        let t1 = scheduler.subscribe(Duration::from_secs(5), counting(&counter));
        let t2 = scheduler.subscribe(Duration::from_secs(5), counting(&counter));

        scheduler.cancel_all();
        assert!(t1.is_cancelled() && t2.is_cancelled());
        assert_eq!(scheduler.active(), 0);

        let dropped = PollingScheduler::new();
        let t3 = dropped.subscribe(Duration::from_secs(5), counting(&counter));
        drop(dropped);
        assert!(t3.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_is_clamped() {
        let scheduler = PollingScheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let token = scheduler.subscribe(Duration::ZERO, counting(&counter));

        tokio::time::sleep(Duration::from_millis(5)).await;
        scheduler.cancel(&token);
        assert!(counter.load(Ordering::SeqCst) >= 1);
    }
}
