//! Presentation sink: the map surface, seen as a black box that runs structured
//! commands and reports back over a one-way message channel.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::models::{BusMarker, BusStop, Coordinate, Snapshot};
use crate::routing::RouteRequest;

/// Literal readiness signal sent by the surface once the map has loaded.
pub const MAP_LOADED: &str = "MAP_LOADED";

/// Commands understood by the map surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum MapCommand {
    UpdateUserMarker {
        lat: f64,
        lon: f64,
    },
    RenderBusLocations {
        sequence: u64,
        buses: Vec<BusMarker>,
    },
    RenderBusStops {
        stops: Vec<BusStop>,
    },
    DrawRouteAndAnimate {
        user_lat: f64,
        user_lon: f64,
        dest_lat: f64,
        dest_lon: f64,
    },
}

/// Structured events the surface may send besides the readiness signal.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SurfaceEvent {
    MapClick { lat: f64, lon: f64 },
    UserPosition { lat: f64, lon: f64 },
    LocationPermission { granted: bool },
    SelectDestination { name: String },
    /// Ask for a readable description of the rider's current position.
    DescribeOrigin,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SurfaceMessage {
    Loaded,
    Event(SurfaceEvent),
}

impl SurfaceMessage {
    /// Parse an inbound message. Unparseable payloads are logged and dropped.
    pub fn parse(raw: &str) -> Option<Self> {
        if raw == MAP_LOADED {
            return Some(SurfaceMessage::Loaded);
        }
        match serde_json::from_str::<SurfaceEvent>(raw) {
            Ok(event) => Some(SurfaceMessage::Event(event)),
            Err(e) => {
                warn!(
                    error = %e,
                    payload = %raw.chars().take(200).collect::<String>(),
                    "Ignoring unparseable surface message"
                );
                None
            }
        }
    }
}

/// Outbound half of the surface: fire-and-forget, no acknowledgement.
pub trait SurfaceTransport: Send + Sync {
    fn send(&self, command: &MapCommand);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadinessState {
    NotLoaded,
    Loading,
    Ready,
}

/// Readiness-gated adapter in front of a [`SurfaceTransport`].
///
/// Commands issued before the surface signalled readiness are dropped, not
/// queued.
pub struct PresentationSink {
    transport: Box<dyn SurfaceTransport>,
    state: ReadinessState,
    last_sequence: Option<u64>,
    stops_applied: bool,
}

impl PresentationSink {
    pub fn new(transport: Box<dyn SurfaceTransport>) -> Self {
        Self {
            transport,
            state: ReadinessState::NotLoaded,
            last_sequence: None,
            stops_applied: false,
        }
    }

    pub fn state(&self) -> ReadinessState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == ReadinessState::Ready
    }

    /// The surface started (re)loading. Surface-local state is gone, so
    /// apply-once overlays have to be delivered again.
    pub fn begin_load(&mut self) {
        if self.state == ReadinessState::Ready {
            debug!("Map surface reloading");
        }
        self.state = ReadinessState::Loading;
        self.stops_applied = false;
    }

    /// Feed an inbound message. Returns structured events for the caller; the
    /// readiness signal is consumed here.
    pub fn on_message(&mut self, message: SurfaceMessage) -> Option<SurfaceEvent> {
        match message {
            SurfaceMessage::Loaded => {
                if self.state == ReadinessState::Ready {
                    // A second readiness signal means the page reloaded.
                    self.begin_load();
                }
                if self.state == ReadinessState::Loading {
                    self.state = ReadinessState::Ready;
                    debug!("Map surface ready");
                } else {
                    debug!(state = ?self.state, "Ignoring readiness signal before load started");
                }
                None
            }
            SurfaceMessage::Event(event) => Some(event),
        }
    }

    fn send(&self, command: MapCommand) -> bool {
        if !self.is_ready() {
            debug!(state = ?self.state, "Dropping map command, surface not ready");
            return false;
        }
        self.transport.send(&command);
        true
    }

    /// Replace all bus markers. Snapshots older than the last delivered one
    /// are dropped.
    pub fn push_markers(&mut self, snapshot: &Snapshot) -> bool {
        if self.last_sequence.is_some_and(|last| snapshot.sequence <= last) {
            debug!(sequence = snapshot.sequence, "Dropping stale snapshot");
            return false;
        }
        let delivered = self.send(MapCommand::RenderBusLocations {
            sequence: snapshot.sequence,
            buses: snapshot.buses.clone(),
        });
        if delivered {
            self.last_sequence = Some(snapshot.sequence);
        }
        delivered
    }

    pub fn push_user_position(&mut self, position: Coordinate) -> bool {
        self.send(MapCommand::UpdateUserMarker {
            lat: position.latitude(),
            lon: position.longitude(),
        })
    }

    pub fn stops_applied(&self) -> bool {
        self.stops_applied
    }

    /// Deliver the bus-stop overlay once per surface load.
    pub fn push_bus_stops(&mut self, stops: &[BusStop]) -> bool {
        if self.stops_applied {
            return false;
        }
        let delivered = self.send(MapCommand::RenderBusStops {
            stops: stops.to_vec(),
        });
        self.stops_applied = delivered;
        delivered
    }

    pub fn draw_route(&mut self, route: &RouteRequest) -> bool {
        self.send(MapCommand::DrawRouteAndAnimate {
            user_lat: route.user_lat,
            user_lon: route.user_lon,
            dest_lat: route.dest_lat,
            dest_lon: route.dest_lon,
        })
    }
}

impl std::fmt::Debug for PresentationSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PresentationSink")
            .field("state", &self.state)
            .field("last_sequence", &self.last_sequence)
            .field("stops_applied", &self.stops_applied)
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::{Arc, Mutex};

    /// Transport that records every command it is asked to send.
    #[derive(Clone, Default)]
    pub(crate) struct RecordingTransport {
        pub(crate) sent: Arc<Mutex<Vec<MapCommand>>>,
    }

    impl RecordingTransport {
        pub(crate) fn commands(&self) -> Vec<MapCommand> {
            self.sent.lock().unwrap().clone()
        }
    }

    impl SurfaceTransport for RecordingTransport {
        fn send(&self, command: &MapCommand) {
            self.sent.lock().unwrap().push(command.clone());
        }
    }

    fn snapshot(sequence: u64) -> Snapshot {
        Snapshot {
            sequence,
            buses: vec![BusMarker {
                bus_id: format!("bus-{sequence}"),
                route: "Ruta 1".into(),
                velocity: "10.0".into(),
                lat: 8.3,
                lon: -62.7,
            }],
            fetched_at: Utc::now(),
        }
    }

    fn ready_sink() -> (PresentationSink, RecordingTransport) {
        let transport = RecordingTransport::default();
        let mut sink = PresentationSink::new(Box::new(transport.clone()));
        sink.begin_load();
        sink.on_message(SurfaceMessage::Loaded);
        (sink, transport)
    }

    #[test]
    fn test_commands_dropped_until_ready() {
        let transport = RecordingTransport::default();
        let mut sink = PresentationSink::new(Box::new(transport.clone()));
        let position = Coordinate::new(8.3, -62.7).unwrap();

        assert_eq!(sink.state(), ReadinessState::NotLoaded);
        assert!(!sink.push_user_position(position));
        assert!(!sink.push_markers(&snapshot(1)));

        sink.begin_load();
        assert_eq!(sink.state(), ReadinessState::Loading);
        assert!(!sink.push_user_position(position));

        sink.on_message(SurfaceMessage::Loaded);
        assert_eq!(sink.state(), ReadinessState::Ready);
        // Nothing queued from before readiness
        assert!(transport.commands().is_empty());

        assert!(sink.push_user_position(position));
        assert_eq!(
            transport.commands(),
            vec![MapCommand::UpdateUserMarker { lat: 8.3, lon: -62.7 }]
        );
    }

    #[test]
    fn test_readiness_signal_ignored_when_not_loading() {
        let transport = RecordingTransport::default();
        let mut sink = PresentationSink::new(Box::new(transport));
        sink.on_message(SurfaceMessage::Loaded);
        assert_eq!(sink.state(), ReadinessState::NotLoaded);
    }

    #[test]
    fn test_stale_snapshots_dropped() {
        let (mut sink, transport) = ready_sink();

        assert!(sink.push_markers(&snapshot(2)));
        assert!(!sink.push_markers(&snapshot(1)));
        assert!(!sink.push_markers(&snapshot(2)));
        assert!(sink.push_markers(&snapshot(3)));

        let sequences: Vec<u64> = transport
            .commands()
            .into_iter()
            .filter_map(|c| match c {
                MapCommand::RenderBusLocations { sequence, .. } => Some(sequence),
                _ => None,
            })
            .collect();
        assert_eq!(sequences, vec![2, 3]);
    }

    #[test]
    fn test_dropped_snapshot_does_not_advance_sequence() {
        let transport = RecordingTransport::default();
        let mut sink = PresentationSink::new(Box::new(transport.clone()));
        assert!(!sink.push_markers(&snapshot(5)));

        sink.begin_load();
        sink.on_message(SurfaceMessage::Loaded);
        assert!(sink.push_markers(&snapshot(3)));
    }

    #[test]
    fn test_bus_stops_applied_once_per_load() {
        let (mut sink, transport) = ready_sink();
        let stops = vec![BusStop {
            id: 1,
            lat: 8.3,
            lon: -62.7,
            name: None,
        }];

        assert!(sink.push_bus_stops(&stops));
        assert!(!sink.push_bus_stops(&stops));
        assert!(sink.stops_applied());

        // Reload loses the overlay
        sink.begin_load();
        assert!(!sink.stops_applied());
        assert!(!sink.push_bus_stops(&stops));
        sink.on_message(SurfaceMessage::Loaded);
        assert!(sink.push_bus_stops(&stops));

        assert_eq!(transport.commands().len(), 2);
    }

    #[test]
    fn test_second_loaded_signal_counts_as_reload() {
        let (mut sink, _transport) = ready_sink();
        sink.push_bus_stops(&[]);
        assert!(sink.stops_applied());

        sink.on_message(SurfaceMessage::Loaded);
        assert!(sink.is_ready());
        assert!(!sink.stops_applied());
    }

    #[test]
    fn test_parse_surface_messages() {
        assert_eq!(SurfaceMessage::parse("MAP_LOADED"), Some(SurfaceMessage::Loaded));
        assert_eq!(
            SurfaceMessage::parse(r#"{"type":"map_click","lat":8.3,"lon":-62.7}"#),
            Some(SurfaceMessage::Event(SurfaceEvent::MapClick { lat: 8.3, lon: -62.7 }))
        );
        assert_eq!(
            SurfaceMessage::parse(r#"{"type":"location_permission","granted":false}"#),
            Some(SurfaceMessage::Event(SurfaceEvent::LocationPermission { granted: false }))
        );
        assert_eq!(SurfaceMessage::parse("map_loaded"), None);
        assert_eq!(SurfaceMessage::parse(r#"{"type":"unknown"}"#), None);
    }

    #[test]
    fn test_command_wire_format() {
        let command = MapCommand::DrawRouteAndAnimate {
            user_lat: 8.3,
            user_lon: -62.7,
            dest_lat: 10.5,
            dest_lon: -66.9,
        };
        let json = serde_json::to_value(&command).unwrap();
        assert_eq!(json["command"], "draw_route_and_animate");
        assert_eq!(json["dest_lat"], 10.5);
        assert_eq!(json["dest_lon"], -66.9);
    }
}
