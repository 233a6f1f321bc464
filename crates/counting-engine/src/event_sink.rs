//! Forwards confirmed crossings to the event store without blocking workers.

use common::{CrossingEvent, EventStore, PersistenceError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use telemetry::metrics::{EVENTS_DROPPED, EVENTS_PERSISTED};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::worker::backoff_delay;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventSinkConfig {
    /// Total tries per event, including the first
    pub max_attempts: u32,
    /// Delay before the first retry; doubles per retry
    pub retry_backoff_ms: u64,
    /// Events buffered per camera before new ones are dropped
    pub queue_capacity: usize,
}

impl Default for EventSinkConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_backoff_ms: 100,
            queue_capacity: 256,
        }
    }
}

#[derive(Clone)]
pub struct EventSink {
    store: Arc<dyn EventStore>,
    config: EventSinkConfig,
}

impl EventSink {
    pub fn new(store: Arc<dyn EventStore>, config: EventSinkConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &Arc<dyn EventStore> {
        &self.store
    }

    /// Persist one event, retrying transient failures a bounded number of times.
    pub async fn record(&self, event: &CrossingEvent) -> Result<(), PersistenceError> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match self.store.insert_event(event).await {
                Ok(()) => {
                    debug!(
                        camera_id = %event.camera_id,
                        event_id = %event.event_id,
                        attempt,
                        "crossing event persisted"
                    );
                    return Ok(());
                }
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    let delay = backoff_delay(
                        self.config.retry_backoff_ms,
                        self.config.retry_backoff_ms.saturating_mul(8),
                        attempt,
                    );
                    warn!(
                        camera_id = %event.camera_id,
                        event_id = %event.event_id,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "event persistence failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Start a queue and delivery task for one camera
    pub fn camera_sink(&self, camera_id: &str) -> CameraEventSink {
        let (tx, mut rx) = mpsc::channel::<CrossingEvent>(self.config.queue_capacity.max(1));
        let sink = self.clone();
        let id = camera_id.to_string();

        let task = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match sink.record(&event).await {
                    Ok(()) => {
                        EVENTS_PERSISTED.with_label_values(&[id.as_str()]).inc();
                    }
                    Err(e) => {
                        EVENTS_DROPPED.with_label_values(&[id.as_str(), "persistence"]).inc();
                        error!(
                            camera_id = %id,
                            event_id = %event.event_id,
                            track_id = event.track_id,
                            vehicle_class = %event.vehicle_class,
                            error = %e,
                            "dropping crossing event after failed persistence"
                        );
                    }
                }
            }
            debug!(camera_id = %id, "event delivery task finished");
        });

        CameraEventSink {
            camera_id: camera_id.to_string(),
            tx,
            task,
        }
    }
}

/// A worker's handle to its camera's event queue.
pub struct CameraEventSink {
    camera_id: String,
    tx: mpsc::Sender<CrossingEvent>,
    task: JoinHandle<()>,
}

impl CameraEventSink {
    /// Queue an event without waiting; a full queue drops it. `QueueClosed`
    /// means the delivery task died and this sink is unusable.
    pub fn submit(&self, event: CrossingEvent) -> Result<(), PersistenceError> {
        match self.tx.try_send(event) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(event)) => {
                EVENTS_DROPPED
                    .with_label_values(&[self.camera_id.as_str(), "queue_full"])
                    .inc();
                error!(
                    camera_id = %self.camera_id,
                    event_id = %event.event_id,
                    track_id = event.track_id,
                    "event queue full, dropping crossing event"
                );
                Err(PersistenceError::QueueFull(self.camera_id.clone()))
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                EVENTS_DROPPED
                    .with_label_values(&[self.camera_id.as_str(), "queue_closed"])
                    .inc();
                error!(
                    camera_id = %self.camera_id,
                    event_id = %event.event_id,
                    track_id = event.track_id,
                    "event delivery task is gone, dropping crossing event"
                );
                Err(PersistenceError::QueueClosed(self.camera_id.clone()))
            }
        }
    }

    /// Close the queue and wait until everything queued has been handled
    pub async fn close(self) {
        drop(self.tx);
        if let Err(e) = self.task.await {
            error!(camera_id = %self.camera_id, error = %e, "event delivery task failed");
        }
    }

    /// Like `close`, but gives up waiting after `timeout`
    pub async fn close_within(self, timeout: Duration) {
        let camera_id = self.camera_id.clone();
        if tokio::time::timeout(timeout, self.close()).await.is_err() {
            warn!(camera_id = %camera_id, "timed out draining event queue");
        }
    }
}
