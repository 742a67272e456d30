use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, ProviderError};

/// Route label used when the bus API does not report one.
pub const UNKNOWN_ROUTE: &str = "Desconocida";

/// Velocity label used when the bus API does not report a speed.
pub const UNKNOWN_VELOCITY: &str = "N/A";

const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// A WGS84 position, always within range once constructed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawCoordinate")]
pub struct Coordinate {
    latitude: f64,
    longitude: f64,
}

#[derive(Deserialize)]
struct RawCoordinate {
    #[serde(alias = "lat")]
    latitude: f64,
    #[serde(alias = "lon")]
    longitude: f64,
}

impl TryFrom<RawCoordinate> for Coordinate {
    type Error = String;

    fn try_from(raw: RawCoordinate) -> Result<Self, Self::Error> {
        Coordinate::new(raw.latitude, raw.longitude)
    }
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, String> {
        if !(-90.0..=90.0).contains(&latitude) {
            return Err(format!("latitude {latitude} out of range"));
        }
        if !(-180.0..=180.0).contains(&longitude) {
            return Err(format!("longitude {longitude} out of range"));
        }
        Ok(Self {
            latitude,
            longitude,
        })
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }

    /// Great-circle distance in meters (haversine).
    pub fn distance_to(&self, other: &Coordinate) -> f64 {
        let lat1 = self.latitude.to_radians();
        let lat2 = other.latitude.to_radians();
        let d_lat = (other.latitude - self.latitude).to_radians();
        let d_lon = (other.longitude - self.longitude).to_radians();

        let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_METERS * a.sqrt().asin()
    }
}

/// Bus record as returned by `GET {base}/buses`.
#[derive(Debug, Clone, Deserialize)]
pub struct RawBus {
    #[serde(alias = "_id")]
    pub id: String,
    #[serde(default)]
    pub route: Option<String>,
    #[serde(default)]
    pub last_speed: Option<f64>,
    pub last_location: GeoPoint,
}

/// GeoJSON point; `coordinates` is `[longitude, latitude, ..]`.
#[derive(Debug, Clone, Deserialize)]
pub struct GeoPoint {
    pub coordinates: Vec<f64>,
}

/// Map-marker payload for one bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusMarker {
    pub bus_id: String,
    pub route: String,
    pub velocity: String,
    pub lat: f64,
    pub lon: f64,
}

impl BusMarker {
    pub fn from_raw(bus: &RawBus) -> Result<Self, ProviderError> {
        let (lon, lat) = match bus.last_location.coordinates.as_slice() {
            [lon, lat, ..] => (*lon, *lat),
            _ => {
                return Err(ProviderError::MalformedResponse(format!(
                    "bus {} has fewer than two coordinates",
                    bus.id
                )))
            }
        };
        let coordinate = Coordinate::new(lat, lon)
            .map_err(|e| ProviderError::MalformedResponse(format!("bus {}: {e}", bus.id)))?;

        let route = match bus.route.as_deref() {
            Some(route) if !route.is_empty() => route.to_string(),
            _ => UNKNOWN_ROUTE.to_string(),
        };

        Ok(BusMarker {
            bus_id: bus.id.clone(),
            route,
            velocity: format_velocity(bus.last_speed),
            lat: coordinate.latitude(),
            lon: coordinate.longitude(),
        })
    }
}

pub fn format_velocity(speed: Option<f64>) -> String {
    match speed {
        Some(speed) => {
            let scaled = speed * 10.0;
            // Exact binary ties (x.25, x.75) round away from zero; `{:.1}` alone
            // would round them to even.
            if (speed * 4.0).fract() == 0.0 && scaled.fract().abs() == 0.5 {
                format!("{:.1}", scaled.round() / 10.0)
            } else {
                format!("{:.1}", speed)
            }
        }
        None => UNKNOWN_VELOCITY.to_string(),
    }
}

/// Transform a whole bus API response. One bad record rejects the response.
pub fn transform_buses(buses: &[RawBus]) -> Result<Vec<BusMarker>, ProviderError> {
    buses.iter().map(BusMarker::from_raw).collect()
}

/// One complete set of bus markers produced by a single poll cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    /// Monotonic per synchronizer; used by the sink to discard stale deliveries.
    pub sequence: u64,
    pub buses: Vec<BusMarker>,
    pub fetched_at: DateTime<Utc>,
}

impl Snapshot {
    pub fn empty(sequence: u64) -> Self {
        Self {
            sequence,
            buses: Vec::new(),
            fetched_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Destination {
    pub name: String,
    #[serde(flatten)]
    pub coordinate: Coordinate,
}

/// Bus stop extracted from an Overpass response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusStop {
    pub id: i64,
    pub lat: f64,
    pub lon: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PollState {
    pub interval_ms: u64,
    pub last_successful_fetch_at: Option<DateTime<Utc>>,
    pub last_error: Option<ErrorKind>,
}

impl PollState {
    pub fn new(interval_ms: u64) -> Self {
        Self {
            interval_ms,
            last_successful_fetch_at: None,
            last_error: None,
        }
    }
}
