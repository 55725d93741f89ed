use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::error::ConfigError;

/// Environment variable that overrides `weather.api_key`.
pub const WEATHER_API_KEY_ENV: &str = "WAYFARER_WEATHER_API_KEY";

/// Configuration validation errors
#[derive(Debug, Clone)]
pub struct ConfigValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Result of config validation
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<ConfigValidationError>,
}

impl ValidationResult {
    /// Returns true if there are no errors (warnings are OK)
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    pub fn add_warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Get a user-friendly message summarizing all errors
    pub fn error_summary(&self) -> String {
        self.errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Remote weather-by-coordinate service
    #[serde(default)]
    pub weather: WeatherConfig,

    /// Remote geocoding-by-name service
    #[serde(default)]
    pub geocoding: GeocodingConfig,

    /// Refresh cadence of the three live subscriptions
    #[serde(default)]
    pub polling: PollingConfig,

    /// Device position settings
    #[serde(default)]
    pub location: LocationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeatherConfig {
    /// Base URL of an OpenWeatherMap-compatible API
    pub base_url: String,

    /// API key; when empty every sample is simulated
    #[serde(default)]
    pub api_key: String,

    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openweathermap.org".to_string(),
            api_key: String::new(),
            timeout_secs: 10,
        }
    }
}

impl WeatherConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn has_api_key(&self) -> bool {
        !self.api_key.trim().is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeocodingConfig {
    /// Base URL of a Nominatim-compatible search API
    pub base_url: String,

    /// Nominatim requires an identifying user agent
    pub user_agent: String,

    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for GeocodingConfig {
    fn default() -> Self {
        Self {
            base_url: "https://nominatim.openstreetmap.org".to_string(),
            user_agent: "Wayfarer/0.1.0 (https://github.com/wayfarer)".to_string(),
            timeout_secs: 10,
        }
    }
}

impl GeocodingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    /// Weather refresh for the tracked position, in seconds
    #[serde(default = "default_refresh_secs")]
    pub tracked_refresh_secs: u64,

    /// Weather refresh for the searched place, in seconds
    #[serde(default = "default_refresh_secs")]
    pub searched_refresh_secs: u64,

    /// Global dataset simulation tick, in seconds
    #[serde(default = "default_global_tick_secs")]
    pub global_tick_secs: u64,
}

fn default_refresh_secs() -> u64 {
    600
}

fn default_global_tick_secs() -> u64 {
    60
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            tracked_refresh_secs: default_refresh_secs(),
            searched_refresh_secs: default_refresh_secs(),
            global_tick_secs: default_global_tick_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationConfig {
    /// Whether the host grants position access at all
    #[serde(default = "default_true")]
    pub secure_context: bool,

    /// Position reported by the configured source
    pub latitude: f64,
    pub longitude: f64,

    #[serde(default = "default_true")]
    pub high_accuracy: bool,

    /// Initial position request timeout, in milliseconds
    #[serde(default = "default_position_timeout_ms")]
    pub timeout_ms: u64,

    /// Maximum age of a cached position, in milliseconds
    #[serde(default)]
    pub max_cache_age_ms: u64,

    /// How often the configured source re-reports its position, in seconds
    #[serde(default = "default_watch_interval_secs")]
    pub watch_interval_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_position_timeout_ms() -> u64 {
    10_000
}

fn default_watch_interval_secs() -> u64 {
    30
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            secure_context: true,
            latitude: 12.9716,
            longitude: 77.5946,
            high_accuracy: true,
            timeout_ms: default_position_timeout_ms(),
            max_cache_age_ms: 0,
            watch_interval_secs: default_watch_interval_secs(),
        }
    }
}

impl Config {
    /// Load configuration from the default location, creating it if it doesn't exist
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;
        Self::load_from(&config_path)
    }

    /// Load configuration from `path`, writing defaults there on first run.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            let config = Self::default();
            config.save_to(path)?;
            return Ok(config.with_env_overrides());
        }

        let contents = std::fs::read_to_string(path).context("Failed to read config file")?;
        let config = Self::parse(&contents)?;

        Ok(config.with_env_overrides())
    }

    /// Parse a TOML document.
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Load configuration and validate it
    ///
    /// Returns the config along with any validation warnings.
    /// Returns an error if validation fails with critical errors.
    pub fn load_validated() -> Result<(Self, ValidationResult)> {
        Self::load_validated_from(&Self::config_path()?)
    }

    /// Like [`Config::load_validated`], reading from `path`.
    ///
    /// Parse and validation failures carry a [`ConfigError`] that callers can
    /// downcast to for a display message.
    pub fn load_validated_from(path: &Path) -> Result<(Self, ValidationResult)> {
        let config = Self::load_from(path)?;
        let validation = config.validate();

        if !validation.is_valid() {
            return Err(ConfigError::Invalid(validation.error_summary()).into());
        }

        for warning in &validation.warnings {
            tracing::warn!("Config warning: {}", warning);
        }

        Ok((config, validation))
    }

    fn with_env_overrides(mut self) -> Self {
        if let Ok(key) = std::env::var(WEATHER_API_KEY_ENV) {
            if !key.trim().is_empty() {
                self.weather.api_key = key;
            }
        }
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        validate_url(&self.weather.base_url, "weather.base_url", &mut result);
        validate_url(&self.geocoding.base_url, "geocoding.base_url", &mut result);

        if !self.weather.has_api_key() {
            result.add_warning(
                "weather.api_key",
                "No weather API key - all samples will be simulated",
            );
        }

        if self.weather.timeout_secs == 0 {
            result.add_error("weather.timeout_secs", "Timeout must be greater than 0");
        }
        if self.geocoding.timeout_secs == 0 {
            result.add_error("geocoding.timeout_secs", "Timeout must be greater than 0");
        }
        if self.geocoding.user_agent.trim().is_empty() {
            result.add_error("geocoding.user_agent", "Geocoding requires a user agent");
        }

        for (field, secs) in [
            ("polling.tracked_refresh_secs", self.polling.tracked_refresh_secs),
            ("polling.searched_refresh_secs", self.polling.searched_refresh_secs),
            ("polling.global_tick_secs", self.polling.global_tick_secs),
            ("location.watch_interval_secs", self.location.watch_interval_secs),
        ] {
            if secs == 0 {
                result.add_error(field, "Interval must be greater than 0");
            } else if secs > 86_400 {
                result.add_warning(field, "Interval is more than 24 hours");
            }
        }

        if !(-90.0..=90.0).contains(&self.location.latitude) {
            result.add_error("location.latitude", "Latitude must be within [-90, 90]");
        }
        if !(-180.0..=180.0).contains(&self.location.longitude) {
            result.add_error("location.longitude", "Longitude must be within [-180, 180]");
        }
        if self.location.timeout_ms == 0 {
            result.add_error("location.timeout_ms", "Timeout must be greater than 0");
        }
        if !self.location.secure_context {
            result.add_warning(
                "location.secure_context",
                "Position access disabled - tracking will refuse to start",
            );
        }

        result
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, contents).context("Failed to write config file")?;

        Ok(())
    }

    /// Get the path to the configuration file
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join("wayfarer");

        Ok(config_dir.join("config.toml"))
    }
}

fn validate_url(url_str: &str, field_name: &str, result: &mut ValidationResult) {
    match Url::parse(url_str) {
        Ok(url) => {
            if url.scheme() != "http" && url.scheme() != "https" {
                result.add_error(
                    field_name,
                    format!("URL must use http or https scheme, got: {}", url.scheme()),
                );
            }
            if url.host().is_none() {
                result.add_error(field_name, "URL must have a host");
            }
        }
        Err(e) => {
            result.add_error(field_name, format!("Invalid URL: {}", e));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_default_config() {
        let config = Config::default();
        let result = config.validate();
        assert!(result.is_valid(), "Default config should be valid: {:?}", result.errors);
        assert_eq!(config.polling.global_tick_secs, 60);
    }

    #[test]
    fn test_missing_api_key_is_warning() {
        let config = Config::default();
        let result = config.validate();
        assert!(result.is_valid());
        assert!(result.warnings.iter().any(|w| w.field == "weather.api_key"));
    }

    #[test]
    fn test_invalid_url_scheme() {
        let mut config = Config::default();
        config.weather.base_url = "ftp://localhost:8080".to_string();
        let result = config.validate();
        assert!(!result.is_valid());
        assert!(result.errors.iter().any(|e| e.message.contains("http or https")));
    }

    #[test]
    fn test_zero_interval_is_error() {
        let mut config = Config::default();
        config.polling.global_tick_secs = 0;
        let result = config.validate();
        assert!(!result.is_valid());
        assert!(result.errors.iter().any(|e| e.field == "polling.global_tick_secs"));
    }

    #[test]
    fn test_out_of_range_latitude() {
        let mut config = Config::default();
        config.location.latitude = 91.0;
        let result = config.validate();
        assert!(result.errors.iter().any(|e| e.field == "location.latitude"));
    }

    #[test]
    fn test_partial_document_uses_defaults() {
        let config = Config::parse(
            r#"
            [polling]
            global_tick_secs = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.polling.global_tick_secs, 5);
        assert_eq!(config.polling.tracked_refresh_secs, 600);
        assert!(config.location.secure_context);
    }

    #[test]
    fn test_malformed_document() {
        let err = Config::parse("[polling\nbroken").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn test_load_from_creates_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let first = Config::load_from(&path).unwrap();
        assert!(path.exists());

        let second = Config::load_from(&path).unwrap();
        assert_eq!(first.polling.global_tick_secs, second.polling.global_tick_secs);
        assert_eq!(first.location.latitude, second.location.latitude);
    }

    #[test]
    fn test_load_validated_reports_config_error() {
        let dir = tempfile::tempdir().unwrap();

        let malformed = dir.path().join("malformed.toml");
        std::fs::write(&malformed, "[polling\nbroken").unwrap();
        let err = Config::load_validated_from(&malformed).unwrap_err();
        let config_err = err.downcast_ref::<ConfigError>().unwrap();
        assert!(matches!(config_err, ConfigError::ParseError(_)));
        assert!(config_err.user_message().contains("malformed"));

        let invalid = dir.path().join("invalid.toml");
        std::fs::write(&invalid, "[polling]\nglobal_tick_secs = 0\n").unwrap();
        let err = Config::load_validated_from(&invalid).unwrap_err();
        let config_err = err.downcast_ref::<ConfigError>().unwrap();
        assert!(matches!(config_err, ConfigError::Invalid(_)));
        assert!(config_err.user_message().contains("Invalid"));
    }
}
