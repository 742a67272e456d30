//! Device location: permission, one-shot reads and a filtered position stream.
//!
//! The server has no GPS of its own; [`ReportedLocationProvider`] is fed with
//! whatever the presentation surface reports (browser geolocation) and exposes
//! it through the same contract a native location service would.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

use crate::config::LocationConfig;
use crate::error::ProviderError;
use crate::models::Coordinate;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionStatus {
    Undetermined,
    Granted,
    Denied,
}

/// Minimum spacing between two delivered position updates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WatchOptions {
    pub time_interval: Duration,
    pub distance_interval_m: f64,
}

impl From<&LocationConfig> for WatchOptions {
    fn from(config: &LocationConfig) -> Self {
        Self {
            time_interval: Duration::from_millis(config.time_interval_ms),
            distance_interval_m: config.distance_interval_m,
        }
    }
}

impl WatchOptions {
    /// Whether `candidate` may be delivered after `last` was.
    pub fn admits(&self, last: Option<(Instant, Coordinate)>, candidate: (Instant, Coordinate)) -> bool {
        match last {
            None => true,
            Some((at, position)) => {
                candidate.0.duration_since(at) >= self.time_interval
                    && position.distance_to(&candidate.1) >= self.distance_interval_m
            }
        }
    }
}

pub type PositionCallback = Box<dyn Fn(Coordinate) + Send + Sync>;

#[async_trait]
pub trait LocationProvider: Send + Sync {
    /// Resolves once the user has granted or denied access.
    async fn request_permission(&self) -> PermissionStatus;

    async fn current_position(&self) -> Result<Coordinate, ProviderError>;

    fn watch_position(
        &self,
        options: WatchOptions,
        on_update: PositionCallback,
    ) -> Result<LocationSubscription, ProviderError>;
}

/// Handle to a running position watch. Removing it twice is harmless.
#[derive(Debug)]
pub struct LocationSubscription {
    task: Option<JoinHandle<()>>,
}

impl LocationSubscription {
    pub fn new(task: JoinHandle<()>) -> Self {
        Self { task: Some(task) }
    }

    pub fn remove(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            debug!("Location subscription removed");
        }
    }

    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl Drop for LocationSubscription {
    fn drop(&mut self) {
        self.remove();
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Fix {
    at: Instant,
    position: Coordinate,
}

/// Location provider fed by reports from the client.
#[derive(Debug, Clone)]
pub struct ReportedLocationProvider {
    permission: Arc<watch::Sender<PermissionStatus>>,
    fixes: Arc<watch::Sender<Option<Fix>>>,
    first_fix_timeout: Duration,
}

impl ReportedLocationProvider {
    pub fn new(config: &LocationConfig) -> Self {
        Self {
            permission: Arc::new(watch::Sender::new(PermissionStatus::Undetermined)),
            fixes: Arc::new(watch::Sender::new(None)),
            first_fix_timeout: Duration::from_secs(config.first_fix_timeout_secs),
        }
    }

    pub fn set_permission(&self, granted: bool) {
        let status = if granted {
            PermissionStatus::Granted
        } else {
            PermissionStatus::Denied
        };
        self.permission.send_replace(status);
    }

    /// Record a new position. Ignored while permission is denied.
    pub fn report(&self, position: Coordinate) {
        if *self.permission.borrow() == PermissionStatus::Denied {
            debug!("Dropping position report, permission denied");
            return;
        }
        // A device that reports a position has implicitly been granted access.
        self.permission.send_if_modified(|status| {
            if *status == PermissionStatus::Undetermined {
                *status = PermissionStatus::Granted;
                true
            } else {
                false
            }
        });
        self.fixes.send_replace(Some(Fix {
            at: Instant::now(),
            position,
        }));
    }
}

#[async_trait]
impl LocationProvider for ReportedLocationProvider {
    async fn request_permission(&self) -> PermissionStatus {
        let mut rx = self.permission.subscribe();
        let status = match rx.wait_for(|status| *status != PermissionStatus::Undetermined).await {
            Ok(status) => *status,
            // Sender lives as long as self; treat a closed channel as undecided.
            Err(_) => PermissionStatus::Undetermined,
        };
        status
    }

    async fn current_position(&self) -> Result<Coordinate, ProviderError> {
        if *self.permission.borrow() == PermissionStatus::Denied {
            return Err(ProviderError::PermissionDenied);
        }

        let mut rx = self.fixes.subscribe();
        let wait = rx.wait_for(|fix| fix.is_some());
        let position = match tokio::time::timeout(self.first_fix_timeout, wait).await {
            Ok(Ok(fix)) => fix.map(|fix| fix.position),
            _ => None,
        };
        position.ok_or(ProviderError::PositionUnavailable)
    }

    fn watch_position(
        &self,
        options: WatchOptions,
        on_update: PositionCallback,
    ) -> Result<LocationSubscription, ProviderError> {
        if *self.permission.borrow() == PermissionStatus::Denied {
            return Err(ProviderError::PermissionDenied);
        }

        let mut rx = self.fixes.subscribe();
        let task = tokio::spawn(async move {
            let mut last_delivered: Option<(Instant, Coordinate)> = None;
            // Deliver a fix that is already known, then every admitted change.
            rx.mark_changed();
            while rx.changed().await.is_ok() {
                let Some(fix) = *rx.borrow_and_update() else {
                    continue;
                };
                if options.admits(last_delivered, (fix.at, fix.position)) {
                    last_delivered = Some((fix.at, fix.position));
                    on_update(fix.position);
                }
            }
        });

        Ok(LocationSubscription::new(task))
    }
}
