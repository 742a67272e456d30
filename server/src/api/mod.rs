pub mod buses;
pub mod destinations;
pub mod error;
pub mod geocode;
pub mod surface;

pub use error::{bad_gateway, bad_request, not_found, ApiError, ErrorResponse};

use axum::{routing::get, Router};
use bus_tracker_core::config::Config;
use bus_tracker_core::providers::{BusSource, Geocoder, LocationProvider, StopSource, WatchOptions};
use bus_tracker_core::routing::DestinationCatalog;
use bus_tracker_core::SessionDeps;
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_axum::{router::OpenApiRouter, routes};
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Bus Tracker API",
        description = "Live bus positions, destinations and geocoding for the bus map"
    ),
    tags(
        (name = "destinations", description = "Static destination list"),
        (name = "buses", description = "Current bus positions"),
        (name = "geocode", description = "Address lookup")
    )
)]
pub struct ApiDoc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub catalog: Arc<DestinationCatalog>,
    pub buses: Arc<dyn BusSource>,
    pub stops: Arc<dyn StopSource>,
    pub geocoder: Arc<dyn Geocoder>,
}

impl AppState {
    /// Collaborators for one map session, with its own location provider.
    pub fn session_deps(&self, location: Arc<dyn LocationProvider>) -> SessionDeps {
        SessionDeps {
            buses: self.buses.clone(),
            stops: self.stops.clone(),
            location,
            catalog: self.catalog.clone(),
            poll_interval: self.config.poll_interval(),
            watch_options: WatchOptions::from(&self.config.location),
        }
    }
}

pub fn router(state: AppState) -> Router {
    let (router, api) = OpenApiRouter::with_openapi(ApiDoc::openapi())
        .routes(routes!(destinations::list::list_destinations))
        .routes(routes!(destinations::list::get_destination))
        .routes(routes!(buses::get_buses))
        .routes(routes!(geocode::geocode))
        .routes(routes!(geocode::reverse_geocode))
        .split_for_parts();

    router
        .route("/ws", get(surface::surface_socket))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", api))
        .with_state(state)
}
