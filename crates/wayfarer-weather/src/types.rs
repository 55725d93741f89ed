use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use wayfarer_core::NetworkError;

/// Geographic coordinate in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

impl std::fmt::Display for Coordinate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.4}, {:.4}", self.latitude, self.longitude)
    }
}

/// Temperature band of a sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    VeryCold,
    Cold,
    Cool,
    Pleasant,
    Warm,
    Hot,
    VeryHot,
}

impl Condition {
    /// Classify a temperature in °C.
    ///
    /// Thresholds are inclusive lower bounds: ≥35 very hot, ≥30 hot, ≥25 warm,
    /// ≥15 pleasant, ≥5 cool, anything else cold. `VeryCold` is never produced here;
    /// it only arrives through deserialized data.
    pub fn from_temperature(celsius: f64) -> Self {
        if celsius >= 35.0 {
            Self::VeryHot
        } else if celsius >= 30.0 {
            Self::Hot
        } else if celsius >= 25.0 {
            Self::Warm
        } else if celsius >= 15.0 {
            Self::Pleasant
        } else if celsius >= 5.0 {
            Self::Cool
        } else {
            Self::Cold
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::VeryCold => "Very Cold",
            Self::Cold => "Cold",
            Self::Cool => "Cool",
            Self::Pleasant => "Pleasant",
            Self::Warm => "Warm",
            Self::Hot => "Hot",
            Self::VeryHot => "Very Hot",
        }
    }
}

/// Where a sample came from. Diagnostic only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleSource {
    Remote,
    Simulated,
}

/// A single weather reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherSample {
    pub temperature: f64,
    pub condition: Condition,
    pub humidity: u8,
    pub wind_speed: f64,
    /// Provider label ("Clouds") or a simulated one
    pub summary: String,
    pub source: SampleSource,
    pub captured_at: DateTime<Utc>,
}

impl WeatherSample {
    /// Build a sample whose condition is derived from `temperature`.
    pub fn new(
        temperature: f64,
        humidity: u8,
        wind_speed: f64,
        summary: impl Into<String>,
        source: SampleSource,
    ) -> Self {
        Self {
            temperature,
            condition: Condition::from_temperature(temperature),
            humidity: humidity.min(100),
            wind_speed: wind_speed.max(0.0),
            summary: summary.into(),
            source,
            captured_at: Utc::now(),
        }
    }
}

/// A resolved search result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Place {
    pub coordinate: Coordinate,
    pub display_name: String,
}

/// Options passed to the device position source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionOptions {
    pub high_accuracy: bool,
    pub timeout: Duration,
    pub max_cache_age: Duration,
}

impl Default for PositionOptions {
    fn default() -> Self {
        Self {
            high_accuracy: true,
            timeout: Duration::from_secs(10),
            max_cache_age: Duration::ZERO,
        }
    }
}

/// Location service errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LocationError {
    #[error("Location requires a secure context")]
    InsecureContext,
    #[error("Location permission denied")]
    PermissionDenied,
    #[error("Location position unavailable")]
    PositionUnavailable,
    #[error("Location request timed out")]
    Timeout,
    #[error("Location error: {0}")]
    Unknown(String),
}

impl LocationError {
    /// Message for display, distinct per error code.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::InsecureContext => {
                "Location access is only available over a secure connection."
            }
            Self::PermissionDenied => {
                "Location access was denied. Allow location access to see local weather."
            }
            Self::PositionUnavailable => "Your location could not be determined right now.",
            Self::Timeout => "Finding your location took too long. Please try again.",
            Self::Unknown(_) => "An unknown error occurred while finding your location.",
        }
    }
}

/// Weather provider errors. Never leaves `WeatherFetcher::fetch`; used to log why a
/// sample was simulated.
#[derive(Debug, thiserror::Error)]
pub enum WeatherError {
    #[error("No API key configured")]
    MissingApiKey,
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),
    #[error("Parse error: {0}")]
    Parse(String),
}
