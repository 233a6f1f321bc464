use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;

use crate::cameras::CameraConfig;
use crate::events::{CrossingEvent, DailyStats};

/// Failure talking to the configuration or event store.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("invalid record: {0}")]
    Invalid(String),

    #[error("event queue full for camera {0}")]
    QueueFull(String),

    #[error("event queue closed for camera {0}")]
    QueueClosed(String),
}

impl PersistenceError {
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }

    /// Whether retrying the same operation can succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, PersistenceError::Unavailable(_))
    }
}

/// Source of camera configurations
#[async_trait]
pub trait CameraConfigStore: Send + Sync {
    async fn list_cameras(&self) -> Result<Vec<CameraConfig>, PersistenceError>;
    async fn insert_camera(&self, camera: &CameraConfig) -> Result<(), PersistenceError>;
}

/// Append-only history of crossing events
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Insert an event; inserting the same `event_id` twice is a no-op.
    async fn insert_event(&self, event: &CrossingEvent) -> Result<(), PersistenceError>;
    async fn list_events(
        &self,
        camera_id: &str,
        date: NaiveDate,
    ) -> Result<Vec<CrossingEvent>, PersistenceError>;
    async fn daily_stats(
        &self,
        camera_id: &str,
        date: NaiveDate,
    ) -> Result<DailyStats, PersistenceError> {
        let events = self.list_events(camera_id, date).await?;
        Ok(DailyStats::from_events(camera_id, date, &events))
    }

    /// Drop events from local days before `date` and return how many went.
    /// Durable stores keep their history and report 0.
    async fn prune_events_before(&self, _date: NaiveDate) -> Result<u64, PersistenceError> {
        Ok(0)
    }

    async fn health_check(&self) -> Result<bool, PersistenceError> {
        Ok(true)
    }
}
