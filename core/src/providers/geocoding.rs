//! Forward and reverse geocoding against Nominatim (OpenStreetMap).
//!
//! "No match" is a valid outcome and comes back as `Ok(None)`; only transport
//! and decoding problems are errors.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, instrument};

use crate::config::GeocodingConfig;
use crate::error::ProviderError;
use crate::models::Coordinate;

/// Structured address of a reverse-geocoded position.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Address {
    pub street_number: Option<String>,
    pub street: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,
}

impl Address {
    /// "number, street, city, country", skipping blank parts.
    pub fn formatted(&self) -> String {
        [&self.street_number, &self.street, &self.city, &self.country]
            .into_iter()
            .filter_map(|part| part.as_deref())
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[async_trait]
pub trait Geocoder: Send + Sync {
    /// Best single match for a free-form address.
    async fn geocode(&self, address: &str) -> Result<Option<Coordinate>, ProviderError>;

    /// Best single address for a position.
    async fn reverse_geocode(&self, coordinate: Coordinate) -> Result<Option<Address>, ProviderError>;
}

#[derive(Debug, Clone)]
pub struct NominatimGeocoder {
    client: Client,
    config: GeocodingConfig,
}

impl NominatimGeocoder {
    pub fn new(config: &GeocodingConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("bus-tracker/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ProviderError::NetworkFailure(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    async fn get<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T, ProviderError> {
        let url = format!("{}/{}", self.config.base_url.trim_end_matches('/'), path);

        let response = self
            .client
            .get(&url)
            .query(params)
            .send()
            .await
            .map_err(ProviderError::from_reqwest)?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ProviderError::RateLimited);
        }
        if !status.is_success() {
            return Err(ProviderError::UnexpectedStatus(status.as_u16()));
        }

        response.json().await.map_err(ProviderError::from_reqwest)
    }
}

#[async_trait]
impl Geocoder for NominatimGeocoder {
    #[instrument(skip(self))]
    async fn geocode(&self, address: &str) -> Result<Option<Coordinate>, ProviderError> {
        let address = address.trim();
        if address.is_empty() {
            return Ok(None);
        }

        let mut params = vec![
            ("q", address.to_string()),
            ("format", "jsonv2".to_string()),
            ("limit", "1".to_string()),
        ];
        if !self.config.country_filter.is_empty() {
            params.push(("countrycodes", self.config.country_filter.clone()));
        }

        let results: Vec<SearchResult> = self.get("search", &params).await?;

        let Some(result) = results.first() else {
            debug!(%address, "No geocoding match");
            return Ok(None);
        };

        let lat: f64 = result
            .lat
            .parse()
            .map_err(|_| ProviderError::MalformedResponse("Invalid latitude".to_string()))?;
        let lon: f64 = result
            .lon
            .parse()
            .map_err(|_| ProviderError::MalformedResponse("Invalid longitude".to_string()))?;

        debug!(%address, %lat, %lon, "Geocoded address");
        Coordinate::new(lat, lon)
            .map(Some)
            .map_err(ProviderError::MalformedResponse)
    }

    #[instrument(skip(self))]
    async fn reverse_geocode(&self, coordinate: Coordinate) -> Result<Option<Address>, ProviderError> {
        let params = [
            ("lat", coordinate.latitude().to_string()),
            ("lon", coordinate.longitude().to_string()),
            ("format", "jsonv2".to_string()),
            ("addressdetails", "1".to_string()),
        ];

        let result: ReverseResult = self.get("reverse", &params).await?;

        if let Some(error) = result.error {
            debug!(%error, "No reverse geocoding match");
            return Ok(None);
        }

        Ok(result.address.map(Address::from))
    }
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    lat: String,
    lon: String,
}

#[derive(Debug, Deserialize)]
struct ReverseResult {
    #[serde(default)]
    address: Option<NominatimAddress>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NominatimAddress {
    house_number: Option<String>,
    road: Option<String>,
    city: Option<String>,
    town: Option<String>,
    village: Option<String>,
    country: Option<String>,
}

impl From<NominatimAddress> for Address {
    fn from(raw: NominatimAddress) -> Self {
        Address {
            street_number: raw.house_number,
            street: raw.road,
            city: raw.city.or(raw.town).or(raw.village),
            country: raw.country,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_formatting_skips_blanks() {
        let address = Address {
            street_number: None,
            street: Some("Avenida Guayana".to_string()),
            city: Some("Ciudad Guayana".to_string()),
            country: Some(" ".to_string()),
        };
        assert_eq!(address.formatted(), "Avenida Guayana, Ciudad Guayana");
    }

    #[test]
    fn test_address_formatting_empty() {
        assert_eq!(Address::default().formatted(), "");
    }

    #[test]
    fn test_reverse_result_parsing_town_alias() {
        let json = r#"{"address":{"house_number":"12","road":"Calle Bolívar","town":"San Félix","country":"Venezuela"}}"#;
        let result: ReverseResult = serde_json::from_str(json).unwrap();
        let address = Address::from(result.address.unwrap());
        assert_eq!(address.formatted(), "12, Calle Bolívar, San Félix, Venezuela");
    }

    #[test]
    fn test_reverse_result_error_body() {
        let result: ReverseResult = serde_json::from_str(r#"{"error":"Unable to geocode"}"#).unwrap();
        assert!(result.address.is_none());
        assert_eq!(result.error.as_deref(), Some("Unable to geocode"));
    }
}
