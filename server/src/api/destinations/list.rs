use axum::{
    extract::{Path, State},
    Json,
};
use bus_tracker_core::Destination;
use serde::Serialize;
use utoipa::ToSchema;

use crate::api::{not_found, ApiError, AppState, ErrorResponse};

#[derive(Debug, Serialize, ToSchema)]
pub struct DestinationItem {
    pub name: String,
    pub lat: f64,
    pub lon: f64,
}

impl From<&Destination> for DestinationItem {
    fn from(destination: &Destination) -> Self {
        Self {
            name: destination.name.clone(),
            lat: destination.coordinate.latitude(),
            lon: destination.coordinate.longitude(),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DestinationListResponse {
    pub destinations: Vec<DestinationItem>,
}

/// List the static destinations a route can be drawn to
#[utoipa::path(
    get,
    path = "/api/destinations",
    responses(
        (status = 200, description = "All destinations", body = DestinationListResponse)
    ),
    tag = "destinations"
)]
pub async fn list_destinations(State(state): State<AppState>) -> Json<DestinationListResponse> {
    Json(DestinationListResponse {
        destinations: state.catalog.all().iter().map(DestinationItem::from).collect(),
    })
}

/// Get one destination by its exact name
#[utoipa::path(
    get,
    path = "/api/destinations/{name}",
    params(
        ("name" = String, Path, description = "Destination name")
    ),
    responses(
        (status = 200, description = "Destination found", body = DestinationItem),
        (status = 404, description = "Unknown destination", body = ErrorResponse)
    ),
    tag = "destinations"
)]
pub async fn get_destination(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<DestinationItem>, ApiError> {
    state
        .catalog
        .find(&name)
        .map(|destination| Json(DestinationItem::from(destination)))
        .ok_or_else(|| not_found(format!("Destination not found: {}", name)))
}
