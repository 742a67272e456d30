//! Lifecycle of one live-map screen.
//!
//! A [`MapSession`] wires the bus poller, the device location watch and the
//! bus-stop overlay into one [`PresentationSink`]. The sink is shared by all
//! of those paths and is nulled out on unmount, so every path checks for it
//! before use.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::ErrorKind;
use crate::models::{BusStop, Coordinate};
use crate::providers::buses::BusSource;
use crate::providers::location::{LocationProvider, LocationSubscription, PermissionStatus, WatchOptions};
use crate::providers::overpass::StopSource;
use crate::routing::{plan_route, DestinationCatalog, RouteError, RouteRequest};
use crate::sink::{PresentationSink, ReadinessState, SurfaceEvent, SurfaceMessage, SurfaceTransport};
use crate::sync::{BusPoller, PollHandle, SyncError};

/// Blocking, user-visible notices raised by the screen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "notice", rename_all = "snake_case")]
pub enum Notice {
    PermissionDenied,
    NoUserLocation,
    DestinationNotFound { name: String },
}

impl Notice {
    pub fn title(&self) -> &'static str {
        match self {
            Notice::PermissionDenied => "Permiso denegado",
            Notice::NoUserLocation | Notice::DestinationNotFound { .. } => "Error",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            Notice::PermissionDenied => {
                "Necesitamos permiso para acceder a la ubicación y mostrar tu posición en el mapa."
            }
            Notice::NoUserLocation => "No se ha podido obtener tu ubicación actual.",
            Notice::DestinationNotFound { .. } => "El destino seleccionado no fue encontrado.",
        }
    }
}

pub trait Alerts: Send + Sync {
    fn notify(&self, notice: Notice);
}

/// Collaborators a session needs. Cheap to clone; shared between sessions.
#[derive(Clone)]
pub struct SessionDeps {
    pub buses: Arc<dyn BusSource>,
    pub stops: Arc<dyn StopSource>,
    pub location: Arc<dyn LocationProvider>,
    pub catalog: Arc<DestinationCatalog>,
    pub poll_interval: Duration,
    pub watch_options: WatchOptions,
}

type SharedSink = Arc<Mutex<Option<PresentationSink>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Run `f` against the sink if the screen is still mounted.
fn with_sink<R>(sink: &Mutex<Option<PresentationSink>>, f: impl FnOnce(&mut PresentationSink) -> R) -> Option<R> {
    lock(sink).as_mut().map(f)
}

pub struct MapSession {
    deps: SessionDeps,
    alerts: Arc<dyn Alerts>,
    sink: SharedSink,
    user_position: Arc<Mutex<Option<Coordinate>>>,
    subscription: Arc<Mutex<Option<LocationSubscription>>>,
    stops: Arc<Mutex<Option<Vec<BusStop>>>>,
    stops_fetching: Arc<AtomicBool>,
    poller: Option<PollHandle>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl MapSession {
    /// Mount the screen: create the sink, start polling and ask for location
    /// access. The surface is considered loading from here on.
    pub fn mount(
        deps: SessionDeps,
        transport: Box<dyn SurfaceTransport>,
        alerts: Arc<dyn Alerts>,
    ) -> Result<Self, SyncError> {
        let mut sink = PresentationSink::new(transport);
        sink.begin_load();
        let sink: SharedSink = Arc::new(Mutex::new(Some(sink)));

        let poller = {
            let sink = sink.clone();
            Arc::new(BusPoller::new(deps.buses.clone())).start(
                deps.poll_interval,
                Box::new(move |snapshot| {
                    with_sink(&sink, |sink| sink.push_markers(&snapshot));
                }),
            )?
        };

        let mut session = Self {
            deps,
            alerts,
            sink,
            user_position: Arc::new(Mutex::new(None)),
            subscription: Arc::new(Mutex::new(None)),
            stops: Arc::new(Mutex::new(None)),
            stops_fetching: Arc::new(AtomicBool::new(false)),
            poller: Some(poller),
            tasks: Mutex::new(Vec::new()),
        };
        session.start_location_watch();

        info!("Map session mounted");
        Ok(session)
    }

    fn start_location_watch(&mut self) {
        let location = self.deps.location.clone();
        let options = self.deps.watch_options;
        let alerts = self.alerts.clone();
        let sink = self.sink.clone();
        let user_position = self.user_position.clone();
        let subscription = self.subscription.clone();

        let task = tokio::spawn(async move {
            if location.request_permission().await != PermissionStatus::Granted {
                info!("Location permission denied");
                alerts.notify(Notice::PermissionDenied);
                return;
            }

            let on_update = {
                let sink = sink.clone();
                Box::new(move |position: Coordinate| {
                    *lock(&user_position) = Some(position);
                    with_sink(&sink, |sink| sink.push_user_position(position));
                })
            };

            match location.watch_position(options, on_update) {
                Ok(watch) => {
                    let mut slot = lock(&subscription);
                    // Unmounted while waiting for permission: dropping removes it.
                    if lock(&sink).is_some() {
                        *slot = Some(watch);
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Failed to start location watch");
                    if e.kind() == ErrorKind::PermissionDenied {
                        alerts.notify(Notice::PermissionDenied);
                    }
                }
            }
        });
        lock(&self.tasks).push(task);
    }

    pub fn readiness(&self) -> Option<ReadinessState> {
        with_sink(&self.sink, |sink| sink.state())
    }

    pub fn user_position(&self) -> Option<Coordinate> {
        *lock(&self.user_position)
    }

    pub fn is_mounted(&self) -> bool {
        lock(&self.sink).is_some()
    }

    /// Feed one raw message from the surface.
    ///
    /// Device reports (position, permission) and origin requests are returned
    /// for the location layer; everything else is handled here.
    pub fn handle_surface_message(&self, raw: &str) -> Option<SurfaceEvent> {
        let message = SurfaceMessage::parse(raw)?;
        let is_loaded = message == SurfaceMessage::Loaded;

        let event = with_sink(&self.sink, |sink| sink.on_message(message))?;
        if is_loaded && self.readiness() == Some(ReadinessState::Ready) {
            self.on_ready();
        }

        match event? {
            SurfaceEvent::MapClick { lat, lon } => {
                debug!(lat, lon, "Map clicked");
                None
            }
            SurfaceEvent::SelectDestination { name } => {
                let _ = self.search_destination(&name);
                None
            }
            event @ (SurfaceEvent::UserPosition { .. }
            | SurfaceEvent::LocationPermission { .. }
            | SurfaceEvent::DescribeOrigin) => Some(event),
        }
    }

    fn on_ready(&self) {
        if let Some(position) = self.user_position() {
            with_sink(&self.sink, |sink| sink.push_user_position(position));
        }

        let cached = lock(&self.stops).clone();
        match cached {
            Some(stops) => {
                with_sink(&self.sink, |sink| sink.push_bus_stops(&stops));
            }
            None => self.fetch_bus_stops(),
        }
    }

    /// Fetch the bus-stop overlay once; later reloads reuse the cached result.
    fn fetch_bus_stops(&self) {
        if self.stops_fetching.swap(true, Ordering::SeqCst) {
            return;
        }

        let source = self.deps.stops.clone();
        let cache = self.stops.clone();
        let fetching = self.stops_fetching.clone();
        let sink = self.sink.clone();

        let task = tokio::spawn(async move {
            match source.fetch_bus_stops().await {
                Ok(stops) => {
                    info!(count = stops.len(), "Loaded bus-stop overlay");
                    // Cache first: a reload racing this push then delivers from
                    // the cache, and the apply-once guard drops the duplicate.
                    *lock(&cache) = Some(stops.clone());
                    with_sink(&sink, |sink| sink.push_bus_stops(&stops));
                }
                Err(e) => {
                    // Treated as "no data"; a later reload tries again.
                    warn!(error = %e, "Failed to load bus stops");
                    fetching.store(false, Ordering::SeqCst);
                }
            }
        });
        lock(&self.tasks).push(task);
    }

    /// Plan a route to a catalog destination and ask the surface to draw it.
    pub fn search_destination(&self, name: &str) -> Result<RouteRequest, RouteError> {
        match plan_route(self.user_position(), &self.deps.catalog, name) {
            Ok(route) => {
                info!(destination = %name, "Drawing route");
                with_sink(&self.sink, |sink| sink.draw_route(&route));
                Ok(route)
            }
            Err(e) => {
                match &e {
                    RouteError::NoSelection => debug!("No destination selected"),
                    RouteError::NoUserLocation => self.alerts.notify(Notice::NoUserLocation),
                    RouteError::DestinationNotFound(name) => {
                        self.alerts.notify(Notice::DestinationNotFound { name: name.clone() })
                    }
                }
                Err(e)
            }
        }
    }

    /// Tear the screen down. Safe to call more than once.
    pub fn unmount(&mut self) {
        let was_mounted = lock(&self.sink).take().is_some();

        if let Some(mut poller) = self.poller.take() {
            poller.stop();
        }
        if let Some(mut subscription) = lock(&self.subscription).take() {
            subscription.remove();
        }
        for task in lock(&self.tasks).drain(..) {
            task.abort();
        }

        if was_mounted {
            info!("Map session unmounted");
        }
    }
}

impl Drop for MapSession {
    fn drop(&mut self) {
        self.unmount();
    }
}
