//! WebSocket carrying the map surface: inbound frames are surface messages,
//! outbound frames are map commands and notices.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use bus_tracker_core::lookup::describe_origin;
use bus_tracker_core::providers::{Geocoder, ReportedLocationProvider};
use bus_tracker_core::sink::SurfaceEvent;
use bus_tracker_core::{Alerts, Coordinate, MapCommand, MapSession, Notice, SurfaceTransport};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::api::AppState;

/// Frames buffered per connection before new ones are dropped.
const OUTBOUND_CAPACITY: usize = 64;

/// Encode and queue one outbound frame. Frames are fire-and-forget: a full
/// queue (slow reader) drops the frame, a closed one means the socket is gone.
fn queue_frame<T: Serialize>(tx: &mpsc::Sender<String>, frame: &T) {
    let frame = match serde_json::to_string(frame) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(error = %e, "Failed to encode surface frame");
            return;
        }
    };
    match tx.try_send(frame) {
        Ok(()) | Err(TrySendError::Closed(_)) => {}
        Err(TrySendError::Full(_)) => debug!("Surface writer backlogged, dropping frame"),
    }
}

/// Outbound frames queued for the socket writer.
struct WsTransport {
    tx: mpsc::Sender<String>,
}

impl SurfaceTransport for WsTransport {
    fn send(&self, command: &MapCommand) {
        queue_frame(&self.tx, command);
    }
}

#[derive(Serialize)]
struct NoticeFrame<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(flatten)]
    notice: &'a Notice,
    title: &'static str,
    message: &'static str,
}

struct WsAlerts {
    tx: mpsc::Sender<String>,
}

impl Alerts for WsAlerts {
    fn notify(&self, notice: Notice) {
        queue_frame(
            &self.tx,
            &NoticeFrame {
                kind: "notice",
                notice: &notice,
                title: notice.title(),
                message: notice.message(),
            },
        );
    }
}

#[derive(Serialize)]
struct OriginFrame {
    #[serde(rename = "type")]
    kind: &'static str,
    description: String,
}

/// Describe where the rider is and queue the answer as an `origin` frame.
async fn send_origin(
    location: ReportedLocationProvider,
    geocoder: Arc<dyn Geocoder>,
    tx: mpsc::Sender<String>,
) {
    let description = describe_origin(&location, geocoder.as_ref()).await;
    queue_frame(
        &tx,
        &OriginFrame {
            kind: "origin",
            description,
        },
    );
}

/// Feed a device report from the surface into the session's location provider.
fn apply_device_event(location: &ReportedLocationProvider, event: SurfaceEvent) {
    match event {
        SurfaceEvent::UserPosition { lat, lon } => match Coordinate::new(lat, lon) {
            Ok(position) => location.report(position),
            Err(e) => warn!(error = %e, "Ignoring invalid position report"),
        },
        SurfaceEvent::LocationPermission { granted } => location.set_permission(granted),
        other => debug!(event = ?other, "Unhandled surface event"),
    }
}

pub async fn surface_socket(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| run_session(socket, state))
}

async fn run_session(socket: WebSocket, state: AppState) {
    let session_id = Uuid::new_v4();
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<String>(OUTBOUND_CAPACITY);

    let location = ReportedLocationProvider::new(&state.config.location);
    let deps = state.session_deps(Arc::new(location.clone()));
    let mut session = match MapSession::mount(
        deps,
        Box::new(WsTransport { tx: tx.clone() }),
        Arc::new(WsAlerts { tx: tx.clone() }),
    ) {
        Ok(session) => session,
        Err(e) => {
            error!(%session_id, error = %e, "Failed to mount map session");
            return;
        }
    };
    info!(%session_id, "Surface connected");

    let mut writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if sender.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    let mut lookups = JoinSet::new();
    loop {
        tokio::select! {
            frame = receiver.next() => match frame {
                Some(Ok(Message::Text(text))) => match session.handle_surface_message(text.as_str()) {
                    Some(SurfaceEvent::DescribeOrigin) => {
                        lookups.spawn(send_origin(location.clone(), state.geocoder.clone(), tx.clone()));
                    }
                    Some(event) => apply_device_event(&location, event),
                    None => {}
                },
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(%session_id, error = %e, "Surface socket error");
                    break;
                }
            },
            Some(_) = lookups.join_next(), if !lookups.is_empty() => {}
            _ = &mut writer => break,
        }
    }

    session.unmount();
    lookups.abort_all();
    writer.abort();
    info!(%session_id, "Surface disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bus_tracker_core::config::LocationConfig;
    use bus_tracker_core::error::ProviderError;
    use bus_tracker_core::providers::{Address, LocationProvider};

    struct StreetGeocoder;

    #[async_trait]
    impl Geocoder for StreetGeocoder {
        async fn geocode(&self, _address: &str) -> Result<Option<Coordinate>, ProviderError> {
            Ok(None)
        }

        async fn reverse_geocode(&self, _coordinate: Coordinate) -> Result<Option<Address>, ProviderError> {
            Ok(Some(Address {
                street_number: None,
                street: Some("Avenida Guayana".into()),
                city: Some("Ciudad Guayana".into()),
                country: None,
            }))
        }
    }

    #[test]
    fn test_notice_frame_shape() {
        let (tx, mut rx) = mpsc::channel(OUTBOUND_CAPACITY);
        WsAlerts { tx }.notify(Notice::DestinationNotFound {
            name: "Atlantis".into(),
        });

        let frame: serde_json::Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(frame["type"], "notice");
        assert_eq!(frame["notice"], "destination_not_found");
        assert_eq!(frame["name"], "Atlantis");
        assert_eq!(frame["message"], "El destino seleccionado no fue encontrado.");
    }

    #[test]
    fn test_command_frame_shape() {
        let (tx, mut rx) = mpsc::channel(OUTBOUND_CAPACITY);
        WsTransport { tx }.send(&MapCommand::UpdateUserMarker { lat: 8.3, lon: -62.7 });

        let frame: serde_json::Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(frame["command"], "update_user_marker");
        assert_eq!(frame["lat"], 8.3);
    }

    #[test]
    fn test_frames_dropped_when_writer_backlogged() {
        let (tx, mut rx) = mpsc::channel(1);
        let transport = WsTransport { tx };
        transport.send(&MapCommand::UpdateUserMarker { lat: 8.3, lon: -62.7 });
        transport.send(&MapCommand::UpdateUserMarker { lat: 8.4, lon: -62.7 });

        let frame: serde_json::Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(frame["lat"], 8.3);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_origin_frame_describes_reported_position() {
        let location = ReportedLocationProvider::new(&LocationConfig::default());
        location.report(Coordinate::new(8.29, -62.72).unwrap());
        let (tx, mut rx) = mpsc::channel(OUTBOUND_CAPACITY);

        send_origin(location, Arc::new(StreetGeocoder), tx).await;

        let frame: serde_json::Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(frame["type"], "origin");
        assert_eq!(frame["description"], "Avenida Guayana, Ciudad Guayana");
    }

    #[tokio::test]
    async fn test_origin_frame_when_permission_denied() {
        let location = ReportedLocationProvider::new(&LocationConfig::default());
        location.set_permission(false);
        let (tx, mut rx) = mpsc::channel(OUTBOUND_CAPACITY);

        send_origin(location, Arc::new(StreetGeocoder), tx).await;

        let frame: serde_json::Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(frame["description"], "Permiso de ubicación denegado");
    }

    #[tokio::test]
    async fn test_device_events_feed_location() {
        let location = ReportedLocationProvider::new(&LocationConfig::default());
        apply_device_event(&location, SurfaceEvent::UserPosition { lat: 8.3, lon: -62.7 });
        assert_eq!(
            location.current_position().await.unwrap(),
            Coordinate::new(8.3, -62.7).unwrap()
        );

        apply_device_event(&location, SurfaceEvent::LocationPermission { granted: false });
        assert!(location.current_position().await.is_err());
    }
}
