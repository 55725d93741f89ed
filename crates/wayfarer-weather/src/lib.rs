//! Weather, geocoding and position services for Wayfarer
//!
//! Provides current weather via an OpenWeatherMap-compatible API with a simulated
//! fallback, place search via Nominatim, continuous position observation, and the
//! simulated global temperature table.

pub mod geocode;
pub mod location;
pub mod provider;
pub mod table;
pub mod types;

pub use geocode::{GeocodeSource, GeocodingResolver};
pub use location::{ConfiguredPosition, LocationTracker, LocationWatch, PositionSource, WatchStopper};
pub use provider::{WeatherFetcher, WeatherSource};
pub use table::GlobalTemperatureTable;
pub use types::*;
