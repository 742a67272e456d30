use axum::{
    extract::{Query, State},
    Json,
};
use bus_tracker_core::lookup::{locate_destination, LookupError};
use bus_tracker_core::Coordinate;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::api::{bad_gateway, bad_request, not_found, ApiError, AppState, ErrorResponse};

#[derive(Debug, Deserialize, IntoParams)]
pub struct GeocodeQuery {
    /// Free-form address, e.g. "Plaza Bolívar, Caracas"
    pub q: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct GeocodeResponse {
    pub address: String,
    pub lat: f64,
    pub lon: f64,
}

/// Resolve an address to its best matching coordinate
#[utoipa::path(
    get,
    path = "/api/geocode",
    params(GeocodeQuery),
    responses(
        (status = 200, description = "Best match", body = GeocodeResponse),
        (status = 400, description = "Empty address", body = ErrorResponse),
        (status = 404, description = "No match", body = ErrorResponse),
        (status = 502, description = "Geocoding service failed", body = ErrorResponse)
    ),
    tag = "geocode"
)]
pub async fn geocode(
    State(state): State<AppState>,
    Query(query): Query<GeocodeQuery>,
) -> Result<Json<GeocodeResponse>, ApiError> {
    match locate_destination(state.geocoder.as_ref(), &query.q).await {
        Ok(place) => Ok(Json(GeocodeResponse {
            address: place.address,
            lat: place.coordinate.latitude(),
            lon: place.coordinate.longitude(),
        })),
        Err(e @ LookupError::EmptyInput) => Err(bad_request(e.to_string())),
        Err(e @ LookupError::NotFound) => Err(not_found(e.to_string())),
        Err(LookupError::Failed(e)) => Err(bad_gateway(e)),
    }
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct ReverseQuery {
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ReverseResponse {
    pub address: String,
}

/// Describe a coordinate as a street address
#[utoipa::path(
    get,
    path = "/api/geocode/reverse",
    params(ReverseQuery),
    responses(
        (status = 200, description = "Formatted address", body = ReverseResponse),
        (status = 400, description = "Coordinate out of range", body = ErrorResponse),
        (status = 404, description = "No address for this position", body = ErrorResponse),
        (status = 502, description = "Geocoding service failed", body = ErrorResponse)
    ),
    tag = "geocode"
)]
pub async fn reverse_geocode(
    State(state): State<AppState>,
    Query(query): Query<ReverseQuery>,
) -> Result<Json<ReverseResponse>, ApiError> {
    let coordinate = Coordinate::new(query.lat, query.lon).map_err(bad_request)?;

    let address = state
        .geocoder
        .reverse_geocode(coordinate)
        .await
        .map_err(bad_gateway)?
        .map(|address| address.formatted())
        .filter(|formatted| !formatted.is_empty())
        .ok_or_else(|| not_found("Dirección no disponible"))?;

    Ok(Json(ReverseResponse { address }))
}
