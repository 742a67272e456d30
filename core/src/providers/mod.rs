pub mod buses;
pub mod geocoding;
pub mod location;
pub mod overpass;

pub use buses::{BusApiClient, BusSource};
pub use geocoding::{Address, Geocoder, NominatimGeocoder};
pub use location::{LocationProvider, LocationSubscription, PermissionStatus, ReportedLocationProvider, WatchOptions};
pub use overpass::{OverpassClient, StopSource};
