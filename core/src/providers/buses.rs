use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use crate::config::BusApiConfig;
use crate::error::ProviderError;
use crate::models::RawBus;

/// Anything the synchronizer can poll for bus positions.
#[async_trait]
pub trait BusSource: Send + Sync {
    async fn fetch_buses(&self) -> Result<Vec<RawBus>, ProviderError>;
}

/// Client for the public bus-location API (`GET {base}/buses`).
#[derive(Debug, Clone)]
pub struct BusApiClient {
    client: reqwest::Client,
    buses_url: String,
}

impl BusApiClient {
    pub fn new(config: &BusApiConfig) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ProviderError::NetworkFailure(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            buses_url: format!("{}/buses", config.base_url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl BusSource for BusApiClient {
    async fn fetch_buses(&self) -> Result<Vec<RawBus>, ProviderError> {
        debug!(url = %self.buses_url, "Fetching bus locations");

        let response = self
            .client
            .get(&self.buses_url)
            .send()
            .await
            .map_err(ProviderError::from_reqwest)?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(ProviderError::UnexpectedStatus(status.as_u16()));
        }

        let text = response.text().await.map_err(ProviderError::from_reqwest)?;

        serde_json::from_str(&text).map_err(|e| {
            debug!(
                error = %e,
                body_preview = %text.chars().take(200).collect::<String>(),
                "Failed to parse bus API response"
            );
            ProviderError::MalformedResponse(e.to_string())
        })
    }
}
