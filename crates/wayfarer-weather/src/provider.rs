//! Weather-by-coordinate lookup with a simulated fallback.
//!
//! `fetch` never fails: a missing key, transport error, non-success status or
//! unparseable body all degrade to a locally simulated sample.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::seq::SliceRandom;
use rand::Rng;
use reqwest::Client;
use serde::Deserialize;
use tracing::instrument;
use wayfarer_core::{NetworkError, ReqwestErrorExt, WeatherConfig};

use crate::types::{Coordinate, SampleSource, WeatherError, WeatherSample};

/// Simulated temperature range, °C
pub const SIMULATED_TEMPERATURE: std::ops::RangeInclusive<f64> = 20.0..=35.0;
/// Simulated relative humidity range, %
pub const SIMULATED_HUMIDITY: std::ops::RangeInclusive<u8> = 50..=80;
/// Simulated wind speed range, m/s
pub const SIMULATED_WIND: std::ops::RangeInclusive<f64> = 3.0..=10.0;

const SIMULATED_SUMMARIES: [&str; 4] = ["Clear", "Partly Cloudy", "Cloudy", "Haze"];

/// Anything that can turn a coordinate into a sample without failing.
#[async_trait]
pub trait WeatherSource: Send + Sync {
    async fn fetch(&self, at: Coordinate) -> WeatherSample;
}

#[derive(Debug, Deserialize)]
struct CurrentResponse {
    #[serde(default)]
    weather: Vec<ConditionEntry>,
    main: MainBlock,
    #[serde(default)]
    wind: Option<WindBlock>,
}

#[derive(Debug, Deserialize)]
struct ConditionEntry {
    main: String,
}

#[derive(Debug, Deserialize)]
struct MainBlock {
    temp: f64,
    humidity: f64,
}

#[derive(Debug, Deserialize)]
struct WindBlock {
    speed: f64,
}

#[derive(Debug, Clone)]
pub struct WeatherFetcher {
    client: Arc<Client>,
    base_url: String,
    api_key: String,
}

impl WeatherFetcher {
    pub fn new(config: &WeatherConfig) -> Result<Self, WeatherError> {
        Self::with_base_url(&config.base_url, &config.api_key, config.timeout())
    }

    pub fn with_base_url(
        base_url: &str,
        api_key: &str,
        timeout: Duration,
    ) -> Result<Self, WeatherError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(ReqwestErrorExt::into_network_error)?;

        Ok(Self {
            client: Arc::new(client),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.trim().to_string(),
        })
    }

    /// Fetch current weather, falling back to a simulated sample on any failure.
    #[instrument(skip(self), level = "debug")]
    pub async fn fetch(&self, at: Coordinate) -> WeatherSample {
        match self.fetch_remote(at).await {
            Ok(sample) => sample,
            Err(e) => {
                tracing::debug!("Weather unavailable for {} ({}), simulating", at, e);
                simulate(&mut rand::thread_rng())
            }
        }
    }

    async fn fetch_remote(&self, at: Coordinate) -> Result<WeatherSample, WeatherError> {
        if self.api_key.is_empty() {
            return Err(WeatherError::MissingApiKey);
        }

        let url = format!("{}/data/2.5/weather", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("lat", at.latitude.to_string()),
                ("lon", at.longitude.to_string()),
                ("appid", self.api_key.clone()),
                ("units", "metric".to_string()),
            ])
            .send()
            .await
            .map_err(ReqwestErrorExt::into_network_error)?;

        if !response.status().is_success() {
            return Err(NetworkError::from_status(response.status()).into());
        }

        let body: CurrentResponse = response
            .json()
            .await
            .map_err(|e| WeatherError::Parse(e.to_string()))?;

        let summary = body
            .weather
            .first()
            .map(|c| c.main.clone())
            .unwrap_or_else(|| "Unknown".to_string());
        let humidity = body.main.humidity.clamp(0.0, 100.0).round() as u8;
        let wind = body.wind.map(|w| w.speed).unwrap_or(0.0);

        Ok(WeatherSample::new(
            body.main.temp,
            humidity,
            wind,
            summary,
            SampleSource::Remote,
        ))
    }
}

#[async_trait]
impl WeatherSource for WeatherFetcher {
    async fn fetch(&self, at: Coordinate) -> WeatherSample {
        WeatherFetcher::fetch(self, at).await
    }
}

/// Synthesize a sample within the documented simulated ranges.
pub fn simulate<R: Rng>(rng: &mut R) -> WeatherSample {
    let temperature = rng.gen_range(SIMULATED_TEMPERATURE);
    let humidity = rng.gen_range(SIMULATED_HUMIDITY);
    let wind = rng.gen_range(SIMULATED_WIND);
    let summary = SIMULATED_SUMMARIES
        .choose(rng)
        .copied()
        .unwrap_or("Clear");

    WeatherSample::new(temperature, humidity, wind, summary, SampleSource::Simulated)
}
