//! Live location and weather subscriptions
//!
//! The [`Orchestrator`] owns three independent subscriptions: the tracked device
//! location, one searched location and the simulated global dataset. Each refreshes
//! on its own [`PollingScheduler`] token and can be stopped or replaced at any time.

pub mod error;
pub mod orchestrator;
pub mod scheduler;
pub mod subscription;

pub use error::{SearchError, TrackingError};
pub use orchestrator::{LiveConfig, LiveServices, Orchestrator};
pub use scheduler::{PollToken, PollingScheduler};
pub use subscription::{
    LiveEvent, LiveSnapshot, Subscription, SubscriptionId, SubscriptionKind, SubscriptionState,
};
