//! Geocoding against Nominatim (OpenStreetMap): free-text search to coordinates,
//! and coordinates back to a short place name.
//!
//! Neither direction caches or retries. Every failure collapses to `None`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::instrument;
use wayfarer_core::{GeocodingConfig, ReqwestErrorExt};

use crate::types::{Coordinate, Place, WeatherError};

/// Resolves place names. `None` means "not found", whatever the cause.
#[async_trait]
pub trait GeocodeSource: Send + Sync {
    async fn resolve(&self, query: &str) -> Option<Place>;

    /// Human-readable name for a coordinate, when the source supports it.
    async fn reverse(&self, _at: Coordinate) -> Option<String> {
        None
    }
}

#[derive(Debug, Deserialize)]
struct SearchMatch {
    lat: String,
    lon: String,
    display_name: String,
}

#[derive(Debug, Deserialize)]
struct NominatimResponse {
    address: Option<NominatimAddress>,
}

#[derive(Debug, Deserialize)]
struct NominatimAddress {
    city: Option<String>,
    town: Option<String>,
    village: Option<String>,
    municipality: Option<String>,
    state_district: Option<String>,
    state: Option<String>,
    county: Option<String>,
    country: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GeocodingResolver {
    client: Arc<Client>,
    base_url: String,
}

impl GeocodingResolver {
    pub fn new(config: &GeocodingConfig) -> Result<Self, WeatherError> {
        Self::with_base_url(&config.base_url, &config.user_agent, config.timeout())
    }

    pub fn with_base_url(
        base_url: &str,
        user_agent: &str,
        timeout: Duration,
    ) -> Result<Self, WeatherError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .map_err(ReqwestErrorExt::into_network_error)?;

        Ok(Self {
            client: Arc::new(client),
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Resolve a free-text query to its first match.
    #[instrument(skip(self), level = "debug")]
    pub async fn resolve(&self, query: &str) -> Option<Place> {
        let query = query.trim();
        if query.is_empty() {
            return None;
        }

        let url = format!("{}/search", self.base_url);
        let response = match self
            .client
            .get(&url)
            .query(&[("q", query), ("format", "json"), ("limit", "1")])
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!("Geocode request failed: {}", e.into_network_error());
                return None;
            }
        };

        if !response.status().is_success() {
            tracing::debug!("Geocode returned status {}", response.status());
            return None;
        }

        let matches: Vec<SearchMatch> = match response.json().await {
            Ok(m) => m,
            Err(e) => {
                tracing::debug!("Geocode parse error: {}", e);
                return None;
            }
        };

        let first = matches.into_iter().next()?;
        let latitude = first.lat.trim().parse::<f64>().ok()?;
        let longitude = first.lon.trim().parse::<f64>().ok()?;

        tracing::info!("Resolved '{}' to {}", query, first.display_name);
        Some(Place {
            coordinate: Coordinate::new(latitude, longitude),
            display_name: first.display_name,
        })
    }

    /// Reverse geocode coordinates to a short place name (e.g. "Bengaluru, Karnataka").
    #[instrument(skip(self), level = "debug")]
    pub async fn reverse(&self, at: Coordinate) -> Option<String> {
        let url = format!("{}/reverse", self.base_url);
        let lat = at.latitude.to_string();
        let lon = at.longitude.to_string();

        let response = match self
            .client
            .get(&url)
            .query(&[
                ("lat", lat.as_str()),
                ("lon", lon.as_str()),
                ("format", "json"),
                ("addressdetails", "1"),
                ("zoom", "10"),
            ])
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!("Reverse geocode request failed: {}", e);
                return None;
            }
        };

        if !response.status().is_success() {
            tracing::debug!("Reverse geocode returned status {}", response.status());
            return None;
        }

        let body: NominatimResponse = match response.json().await {
            Ok(b) => b,
            Err(e) => {
                tracing::debug!("Reverse geocode parse error: {}", e);
                return None;
            }
        };

        short_name(body.address?)
    }
}

#[async_trait]
impl GeocodeSource for GeocodingResolver {
    async fn resolve(&self, query: &str) -> Option<Place> {
        GeocodingResolver::resolve(self, query).await
    }

    async fn reverse(&self, at: Coordinate) -> Option<String> {
        GeocodingResolver::reverse(self, at).await
    }
}

fn short_name(addr: NominatimAddress) -> Option<String> {
    let state = addr.state.clone();
    let country = addr.country.clone();

    // city > town > village > municipality for the primary name
    let place = addr
        .city
        .or(addr.town)
        .or(addr.village)
        .or(addr.municipality)
        .or(addr.state_district)
        .or(addr.county)
        .or(addr.state)
        .or(addr.country)?;

    let suffix = state
        .filter(|s| !s.is_empty() && *s != place)
        .or_else(|| country.filter(|c| !c.is_empty() && *c != place));

    Some(match suffix {
        Some(s) => format!("{}, {}", place, s),
        None => place,
    })
}
