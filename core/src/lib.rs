//! Live bus map core: polling, bounded-retry fetching, the presentation sink
//! and the screen lifecycle that ties them together.

pub mod config;
pub mod error;
pub mod lookup;
pub mod models;
pub mod providers;
pub mod retry;
pub mod routing;
pub mod session;
pub mod sink;
pub mod sync;

pub use config::{Config, ConfigError};
pub use error::{ErrorKind, ProviderError};
pub use models::{BusMarker, BusStop, Coordinate, Destination, Snapshot};
pub use session::{Alerts, MapSession, Notice, SessionDeps};
pub use sink::{MapCommand, SurfaceTransport};
