use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::retry::RetryPolicy;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub bus_api: BusApiConfig,
    #[serde(default)]
    pub overpass: OverpassConfig,
    pub bounding_box: BoundingBox,
    /// Cadence of the bus-position poll, in milliseconds. Must be > 0.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default)]
    pub location: LocationConfig,
    #[serde(default)]
    pub geocoding: GeocodingConfig,
    /// JSON file holding the static destination list. A relative path is
    /// taken from the config file's directory when loaded with [`Config::load`].
    pub destinations_path: PathBuf,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BusApiConfig {
    #[serde(default = "default_bus_api_base_url")]
    pub base_url: String,
    #[serde(default = "default_bus_api_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for BusApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_bus_api_base_url(),
            timeout_secs: default_bus_api_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OverpassConfig {
    #[serde(default = "default_overpass_endpoint")]
    pub endpoint: String,
    /// Value of the `[timeout:..]` setting inside the query itself.
    #[serde(default = "default_query_timeout_secs")]
    pub query_timeout_secs: u32,
    /// HTTP client timeout. Must exceed the query timeout.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
}

impl Default for OverpassConfig {
    fn default() -> Self {
        Self {
            endpoint: default_overpass_endpoint(),
            query_timeout_secs: default_query_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
        }
    }
}

impl OverpassConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
pub struct BoundingBox {
    pub south: f64,
    pub west: f64,
    pub north: f64,
    pub east: f64,
}

impl BoundingBox {
    /// Returns bbox as Overpass API format string: "south,west,north,east"
    pub fn to_overpass_string(&self) -> String {
        format!("{},{},{},{}", self.south, self.west, self.north, self.east)
    }

    fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.south)
            && (-90.0..=90.0).contains(&self.north)
            && (-180.0..=180.0).contains(&self.west)
            && (-180.0..=180.0).contains(&self.east)
            && self.south < self.north
            && self.west < self.east
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LocationConfig {
    #[serde(default = "default_location_time_interval_ms")]
    pub time_interval_ms: u64,
    #[serde(default = "default_location_distance_interval_m")]
    pub distance_interval_m: f64,
    /// How long `current_position` waits for the first fix.
    #[serde(default = "default_first_fix_timeout_secs")]
    pub first_fix_timeout_secs: u64,
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            time_interval_ms: default_location_time_interval_ms(),
            distance_interval_m: default_location_distance_interval_m(),
            first_fix_timeout_secs: default_first_fix_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeocodingConfig {
    #[serde(default = "default_geocoding_base_url")]
    pub base_url: String,
    #[serde(default = "default_geocoding_timeout_secs")]
    pub timeout_secs: u64,
    /// Nominatim `countrycodes` filter; empty disables it.
    #[serde(default = "default_country_filter")]
    pub country_filter: String,
}

impl Default for GeocodingConfig {
    fn default() -> Self {
        Self {
            base_url: default_geocoding_base_url(),
            timeout_secs: default_geocoding_timeout_secs(),
            country_filter: default_country_filter(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Allowed CORS origins. Required unless cors_permissive is true.
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// Explicitly allow all origins (development only). Defaults to false.
    #[serde(default)]
    pub cors_permissive: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            cors_origins: Vec::new(),
            cors_permissive: false,
        }
    }
}

fn default_bus_api_base_url() -> String {
    "https://api-bus-w29v.onrender.com/api/v1".to_string()
}

fn default_bus_api_timeout_secs() -> u64 {
    10
}

fn default_overpass_endpoint() -> String {
    "https://overpass-api.de/api/interpreter".to_string()
}

fn default_query_timeout_secs() -> u32 {
    60
}

fn default_request_timeout_secs() -> u64 {
    90
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    10_000
}

fn default_poll_interval_ms() -> u64 {
    5_000
}

fn default_location_time_interval_ms() -> u64 {
    5_000
}

fn default_location_distance_interval_m() -> f64 {
    2.0
}

fn default_first_fix_timeout_secs() -> u64 {
    30
}

fn default_geocoding_base_url() -> String {
    "https://nominatim.openstreetmap.org".to_string()
}

fn default_geocoding_timeout_secs() -> u64 {
    5
}

fn default_country_filter() -> String {
    "ve".to_string()
}

fn default_bind_addr() -> String {
    "127.0.0.1:3000".to_string()
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError(e.to_string()))?;

        let mut config = Self::from_yaml(&content)?;
        if config.destinations_path.is_relative() {
            if let Some(dir) = path.parent() {
                config.destinations_path = dir.join(&config.destinations_path);
            }
        }
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            serde_yaml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("poll_interval_ms must be > 0".to_string()));
        }
        if !self.bounding_box.is_valid() {
            return Err(ConfigError::Invalid(format!(
                "bounding_box {} is inverted or out of range",
                self.bounding_box.to_overpass_string()
            )));
        }
        if self.overpass.max_retries > 10 {
            return Err(ConfigError::Invalid("overpass.max_retries must be <= 10".to_string()));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(String),
    #[error("Failed to parse config: {0}")]
    ParseError(String),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
bounding_box: { south: 8.21, west: -62.88, north: 8.39, east: -62.60 }
destinations_path: data/destinations.json
"#;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = Config::from_yaml(MINIMAL).unwrap();
        assert_eq!(config.poll_interval_ms, 5000);
        assert_eq!(config.overpass.max_retries, 3);
        assert_eq!(config.overpass.retry_base_delay_ms, 10_000);
        assert_eq!(config.geocoding.country_filter, "ve");
        assert_eq!(config.server.bind_addr, "127.0.0.1:3000");
        assert!(!config.server.cors_permissive);
    }

    #[test]
    fn test_bounding_box_overpass_string() {
        let config = Config::from_yaml(MINIMAL).unwrap();
        assert_eq!(config.bounding_box.to_overpass_string(), "8.21,-62.88,8.39,-62.6");
    }

    #[test]
    fn test_zero_poll_interval_rejected() {
        let yaml = format!("{MINIMAL}poll_interval_ms: 0\n");
        let err = Config::from_yaml(&yaml).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_inverted_bounding_box_rejected() {
        let yaml = r#"
bounding_box: { south: 8.39, west: -62.88, north: 8.21, east: -62.60 }
destinations_path: d.json
"#;
        assert!(matches!(Config::from_yaml(yaml), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_missing_bounding_box_is_parse_error() {
        let err = Config::from_yaml("destinations_path: d.json\n").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn test_retry_policy_from_overpass_config() {
        let policy = OverpassConfig::default().retry_policy();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.base_delay, Duration::from_secs(10));
    }

    #[test]
    fn test_load_resolves_destinations_next_to_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, MINIMAL).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.destinations_path, dir.path().join("data/destinations.json"));

        let absolute = "bounding_box: { south: 8.21, west: -62.88, north: 8.39, east: -62.60 }\n\
             destinations_path: /srv/bus-tracker/destinations.json\n";
        std::fs::write(&path, absolute).unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.destinations_path, PathBuf::from("/srv/bus-tracker/destinations.json"));
    }

    #[test]
    fn test_load_missing_file() {
        let err = Config::load("/nonexistent/bus-tracker.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::ReadError(_)));
    }
}
