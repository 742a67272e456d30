use axum::{extract::State, Json};
use bus_tracker_core::models::{transform_buses, BusMarker};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;
use utoipa::ToSchema;

use crate::api::AppState;

#[derive(Debug, Serialize, ToSchema)]
pub struct BusItem {
    pub bus_id: String,
    /// Route label, "Desconocida" when the source has none
    pub route: String,
    /// Speed with one decimal, or "N/A"
    pub velocity: String,
    pub lat: f64,
    pub lon: f64,
}

impl From<BusMarker> for BusItem {
    fn from(marker: BusMarker) -> Self {
        Self {
            bus_id: marker.bus_id,
            route: marker.route,
            velocity: marker.velocity,
            lat: marker.lat,
            lon: marker.lon,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct BusListResponse {
    pub buses: Vec<BusItem>,
    pub fetched_at: DateTime<Utc>,
}

/// Current bus positions, fetched on demand
///
/// Upstream failures are not surfaced: the list is simply empty.
#[utoipa::path(
    get,
    path = "/api/buses",
    responses(
        (status = 200, description = "Current bus markers", body = BusListResponse)
    ),
    tag = "buses"
)]
pub async fn get_buses(State(state): State<AppState>) -> Json<BusListResponse> {
    let buses = match state.buses.fetch_buses().await.and_then(|raw| transform_buses(&raw)) {
        Ok(markers) => markers.into_iter().map(BusItem::from).collect(),
        Err(e) => {
            warn!(error = %e, "Failed to fetch buses, returning empty list");
            Vec::new()
        }
    };

    Json(BusListResponse {
        buses,
        fetched_at: Utc::now(),
    })
}
