mod api;

use axum::http::{header, HeaderValue, Method};
use bus_tracker_core::config::{Config, ServerConfig};
use bus_tracker_core::providers::{BusApiClient, NominatimGeocoder, OverpassClient};
use bus_tracker_core::routing::DestinationCatalog;
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use api::AppState;

const CONFIG_ENV: &str = "BUS_TRACKER_CONFIG";

fn build_cors(config: &ServerConfig) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET])
        .allow_headers([header::CONTENT_TYPE]);

    if config.cors_permissive {
        warn!("CORS is permissive, allowing any origin");
        return cors.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(%origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    cors.allow_origin(origins)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "bus_tracker_server=debug,bus_tracker_core=debug,tower_http=debug,axum::rejection=trace".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var(CONFIG_ENV).ok())
        .unwrap_or_else(|| "config.yaml".to_string());

    info!(path = %config_path, "Loading configuration");
    let config = Config::load(&config_path)?;

    let catalog = DestinationCatalog::load(&config.destinations_path)?;
    let buses = BusApiClient::new(&config.bus_api)?;
    let stops = OverpassClient::new(&config.overpass, config.bounding_box)?;
    let geocoder = NominatimGeocoder::new(&config.geocoding)?;

    let cors = build_cors(&config.server);
    let bind_addr = config.server.bind_addr.clone();

    let state = AppState {
        config: Arc::new(config),
        catalog: Arc::new(catalog),
        buses: Arc::new(buses),
        stops: Arc::new(stops),
        geocoder: Arc::new(geocoder),
    };

    let app = api::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "Bus tracker server listening");

    axum::serve(listener, app).await?;

    Ok(())
}
