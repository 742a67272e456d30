use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::config::{BoundingBox, OverpassConfig};
use crate::error::ProviderError;
use crate::models::BusStop;
use crate::retry::{self, RetryPolicy};

/// Source of the one-time bus-stop overlay.
#[async_trait]
pub trait StopSource: Send + Sync {
    async fn fetch_bus_stops(&self) -> Result<Vec<BusStop>, ProviderError>;
}

/// Client for the Overpass API, limited to the bus-stop overlay query.
#[derive(Debug, Clone)]
pub struct OverpassClient {
    client: reqwest::Client,
    endpoint: String,
    query_timeout_secs: u32,
    bounding_box: BoundingBox,
    retry_policy: RetryPolicy,
}

impl OverpassClient {
    pub fn new(config: &OverpassConfig, bounding_box: BoundingBox) -> Result<Self, ProviderError> {
        // Client timeout must exceed the [timeout:..] inside the query
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ProviderError::NetworkFailure(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            query_timeout_secs: config.query_timeout_secs,
            bounding_box,
            retry_policy: config.retry_policy(),
        })
    }

    /// Query text for every `highway=bus_stop` node inside the bounding box.
    pub fn bus_stop_query(&self) -> String {
        format!(
            r#"[out:json][timeout:{timeout}];
node[highway=bus_stop]({bounds});
out center;"#,
            timeout = self.query_timeout_secs,
            bounds = self.bounding_box.to_overpass_string()
        )
    }

    /// Run the bus-stop query, retrying rate-limited requests with linear backoff.
    pub async fn query_bus_stops(&self) -> Result<OverpassResponse, ProviderError> {
        let url = format!(
            "{}?data={}",
            self.endpoint,
            urlencoding::encode(&self.bus_stop_query())
        );

        retry::with_linear_backoff(&self.retry_policy, |attempt| {
            let url = url.clone();
            async move {
                let response = self.execute_request(&url, attempt).await?;
                tracing::info!(
                    attempt = attempt + 1,
                    elements = response.elements.len(),
                    "Fetched bus stops from Overpass"
                );
                Ok(response)
            }
        })
        .await
    }

    /// Execute a single HTTP request
    async fn execute_request(&self, url: &str, attempt: u32) -> Result<OverpassResponse, ProviderError> {
        tracing::debug!(attempt = attempt + 1, "Executing Overpass query");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(ProviderError::from_reqwest)?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ProviderError::RateLimited);
        }

        let text = response.text().await.map_err(ProviderError::from_reqwest)?;

        if !status.is_success() {
            tracing::error!(status = %status, body_preview = %text.chars().take(200).collect::<String>(), "Overpass API error");
            return Err(ProviderError::UnexpectedStatus(status.as_u16()));
        }

        serde_json::from_str(&text).map_err(|e| {
            tracing::error!(
                error = %e,
                body_preview = %text.chars().take(500).collect::<String>(),
                "Failed to parse Overpass response"
            );
            ProviderError::MalformedResponse(e.to_string())
        })
    }
}

#[async_trait]
impl StopSource for OverpassClient {
    async fn fetch_bus_stops(&self) -> Result<Vec<BusStop>, ProviderError> {
        Ok(self.query_bus_stops().await?.bus_stops())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OverpassResponse {
    pub elements: Vec<OsmElement>,
}

impl OverpassResponse {
    /// Elements that carry a usable position, as map overlay stops.
    pub fn bus_stops(&self) -> Vec<BusStop> {
        self.elements
            .iter()
            .filter_map(|element| {
                let lat = element.latitude()?;
                let lon = element.longitude()?;
                Some(BusStop {
                    id: element.id,
                    lat,
                    lon,
                    name: element.tag("name").cloned(),
                })
            })
            .collect()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OsmElement {
    #[serde(rename = "type")]
    pub element_type: String,
    pub id: i64,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub center: Option<Center>,
    pub tags: Option<HashMap<String, String>>,
}

impl OsmElement {
    /// Get the latitude, preferring center for ways/relations
    pub fn latitude(&self) -> Option<f64> {
        self.lat.or_else(|| self.center.as_ref().map(|c| c.lat))
    }

    /// Get the longitude, preferring center for ways/relations
    pub fn longitude(&self) -> Option<f64> {
        self.lon.or_else(|| self.center.as_ref().map(|c| c.lon))
    }

    pub fn tag(&self, key: &str) -> Option<&String> {
        self.tags.as_ref().and_then(|t| t.get(key))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Center {
    pub lat: f64,
    pub lon: f64,
}
