//! Origin description and free-form destination search.

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::error::ProviderError;
use crate::models::Coordinate;
use crate::providers::geocoding::Geocoder;
use crate::providers::location::{LocationProvider, PermissionStatus};

pub const PERMISSION_DENIED_TEXT: &str = "Permiso de ubicación denegado";

#[derive(Debug, Error)]
pub enum LookupError {
    #[error("Por favor, ingresa una dirección de destino.")]
    EmptyInput,
    #[error("No se pudieron encontrar coordenadas para la dirección ingresada.")]
    NotFound,
    #[error("Geocoding failed: {0}")]
    Failed(#[from] ProviderError),
}

/// A destination resolved from user input.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeocodedPlace {
    pub address: String,
    pub coordinate: Coordinate,
}

fn unavailable_text(position: Coordinate) -> String {
    format!(
        "Dirección no disponible. Lat/Lon: {:.4}/{:.4}",
        position.latitude(),
        position.longitude()
    )
}

/// Human-readable description of where the rider currently is.
pub async fn describe_origin(location: &dyn LocationProvider, geocoder: &dyn Geocoder) -> String {
    if location.request_permission().await != PermissionStatus::Granted {
        return PERMISSION_DENIED_TEXT.to_string();
    }

    let position = match location.current_position().await {
        Ok(position) => position,
        Err(ProviderError::PermissionDenied) => return PERMISSION_DENIED_TEXT.to_string(),
        Err(e) => {
            warn!(error = %e, "Failed to read current position");
            return format!("Error: {}", e);
        }
    };

    match geocoder.reverse_geocode(position).await {
        Ok(Some(address)) => {
            let formatted = address.formatted();
            if formatted.is_empty() {
                unavailable_text(position)
            } else {
                formatted
            }
        }
        Ok(None) => unavailable_text(position),
        Err(e) => {
            warn!(error = %e, "Reverse geocoding failed");
            unavailable_text(position)
        }
    }
}

pub async fn locate_destination(
    geocoder: &dyn Geocoder,
    input: &str,
) -> Result<GeocodedPlace, LookupError> {
    let address = input.trim();
    if address.is_empty() {
        return Err(LookupError::EmptyInput);
    }

    match geocoder.geocode(address).await {
        Ok(Some(coordinate)) => Ok(GeocodedPlace {
            address: address.to_string(),
            coordinate,
        }),
        Ok(None) => {
            debug!(%address, "Destination not found");
            Err(LookupError::NotFound)
        }
        Err(e) => {
            warn!(error = %e, %address, "Destination lookup failed");
            Err(LookupError::Failed(e))
        }
    }
}
