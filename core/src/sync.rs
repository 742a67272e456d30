//! Background polling of the bus-location API.
//!
//! One [`BusPoller`] drives one poll stream. Cycles never overlap: the loop
//! awaits each fetch before waiting for the next tick, and ticks missed while a
//! slow fetch is in flight are skipped rather than bunched up.

use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::models::{transform_buses, PollState, Snapshot};
use crate::providers::buses::BusSource;

pub type SnapshotCallback = Box<dyn Fn(Snapshot) + Send + Sync>;

/// Polls a [`BusSource`] on a fixed cadence and hands each snapshot to a consumer.
pub struct BusPoller {
    source: Arc<dyn BusSource>,
    sequence: AtomicU64,
}

impl BusPoller {
    pub fn new(source: Arc<dyn BusSource>) -> Self {
        Self {
            source,
            sequence: AtomicU64::new(0),
        }
    }

    /// Start polling. The first fetch fires immediately, then every `interval`.
    pub fn start(
        self: Arc<Self>,
        interval: Duration,
        on_snapshot: SnapshotCallback,
    ) -> Result<PollHandle, SyncError> {
        if interval.is_zero() {
            return Err(SyncError::InvalidInterval);
        }

        let interval_ms = interval.as_millis() as u64;
        let state = Arc::new(RwLock::new(PollState::new(interval_ms)));
        let consumer = Arc::new(Mutex::new(Some(on_snapshot)));
        let (stop_tx, mut stop_rx) = watch::channel(false);

        info!(interval_ms, "Starting bus poller");

        let task = {
            let state = state.clone();
            let consumer = consumer.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

                loop {
                    tokio::select! {
                        biased;
                        _ = stop_rx.changed() => break,
                        _ = ticker.tick() => {}
                    }

                    // Stopping does not cancel an in-flight fetch; its result is
                    // dropped below if the consumer detached meanwhile.
                    let snapshot = self.poll_once(&state).await;
                    if !deliver(&consumer, snapshot) {
                        break;
                    }
                }

                debug!("Bus poller loop exited");
            })
        };

        Ok(PollHandle {
            state,
            consumer,
            stop_tx,
            task: Some(task),
        })
    }

    /// Run one poll cycle. Failures produce an empty snapshot and are only logged.
    pub async fn poll_once(&self, state: &RwLock<PollState>) -> Snapshot {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;

        let result = self
            .source
            .fetch_buses()
            .await
            .and_then(|raw| transform_buses(&raw));

        match result {
            Ok(buses) => {
                debug!(sequence, count = buses.len(), "Fetched bus locations");
                let now = Utc::now();
                if let Ok(mut state) = state.write() {
                    state.last_successful_fetch_at = Some(now);
                    state.last_error = None;
                }
                Snapshot {
                    sequence,
                    buses,
                    fetched_at: now,
                }
            }
            Err(e) => {
                warn!(sequence, error = %e, "Failed to fetch bus locations, emitting empty snapshot");
                if let Ok(mut state) = state.write() {
                    state.last_error = Some(e.kind());
                }
                Snapshot::empty(sequence)
            }
        }
    }
}

/// Hand `snapshot` to the consumer unless it has detached. Returns false once
/// the consumer is gone.
fn deliver(consumer: &Mutex<Option<SnapshotCallback>>, snapshot: Snapshot) -> bool {
    let guard = match consumer.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    match guard.as_ref() {
        Some(on_snapshot) => {
            on_snapshot(snapshot);
            true
        }
        None => {
            debug!(sequence = snapshot.sequence, "Discarding snapshot, consumer detached");
            false
        }
    }
}

/// Handle returned by [`BusPoller::start`].
pub struct PollHandle {
    state: Arc<RwLock<PollState>>,
    consumer: Arc<Mutex<Option<SnapshotCallback>>>,
    stop_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl PollHandle {
    /// Cancel future polls and detach the consumer.
    ///
    /// Once this returns no snapshot is delivered anymore, even from a fetch
    /// that was already in flight. Calling it again is a no-op.
    pub fn stop(&mut self) {
        let detached = match self.consumer.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        let _ = self.stop_tx.send(true);
        if detached.is_some() {
            info!("Bus poller stopped");
        }
        // Dropping our JoinHandle detaches the task; it exits on its own.
        self.task.take();
    }

    pub fn is_stopped(&self) -> bool {
        self.task.is_none()
    }

    pub fn state(&self) -> PollState {
        match self.state.read() {
            Ok(state) => state.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for PollHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollHandle")
            .field("state", &self.state())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Poll interval must be greater than zero")]
    InvalidInterval,
}
