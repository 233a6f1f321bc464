use super::local_date;
use async_trait::async_trait;
use chrono::NaiveDate;
use common::{CameraConfig, CameraConfigStore, CrossingEvent, EventStore, PersistenceError};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::RwLock;

/// In-process camera and event store.
///
/// Used when no database is configured and by tests, which can make the next
/// inserts fail to exercise retry paths.
#[derive(Default)]
pub struct MemoryStore {
    cameras: RwLock<Vec<CameraConfig>>,
    events: RwLock<EventLog>,
    failing_inserts: AtomicU32,
    failing_lists: AtomicU32,
}

#[derive(Default)]
struct EventLog {
    events: Vec<CrossingEvent>,
    ids: HashSet<uuid::Uuid>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cameras(cameras: Vec<CameraConfig>) -> Self {
        Self {
            cameras: RwLock::new(cameras),
            ..Default::default()
        }
    }

    /// Replace the whole camera list
    pub async fn set_cameras(&self, cameras: Vec<CameraConfig>) {
        *self.cameras.write().await = cameras;
    }

    pub async fn remove_camera(&self, camera_id: &str) {
        self.cameras.write().await.retain(|c| c.camera_id != camera_id);
    }

    /// Make the next `n` event inserts fail as unavailable
    pub fn fail_next_inserts(&self, n: u32) {
        self.failing_inserts.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` camera listings fail as unavailable
    pub fn fail_next_lists(&self, n: u32) {
        self.failing_lists.store(n, Ordering::SeqCst);
    }

    /// Every stored event in insertion order
    pub async fn events(&self) -> Vec<CrossingEvent> {
        self.events.read().await.events.clone()
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl CameraConfigStore for MemoryStore {
    async fn list_cameras(&self) -> Result<Vec<CameraConfig>, PersistenceError> {
        if Self::take_failure(&self.failing_lists) {
            return Err(PersistenceError::unavailable("memory store: injected list failure"));
        }
        Ok(self.cameras.read().await.clone())
    }

    async fn insert_camera(&self, camera: &CameraConfig) -> Result<(), PersistenceError> {
        let mut cameras = self.cameras.write().await;
        match cameras.iter_mut().find(|c| c.camera_id == camera.camera_id) {
            Some(existing) => *existing = camera.clone(),
            None => cameras.push(camera.clone()),
        }
        Ok(())
    }
}

#[async_trait]
impl EventStore for MemoryStore {
    async fn insert_event(&self, event: &CrossingEvent) -> Result<(), PersistenceError> {
        if Self::take_failure(&self.failing_inserts) {
            return Err(PersistenceError::unavailable("memory store: injected insert failure"));
        }
        let mut log = self.events.write().await;
        if log.ids.insert(event.event_id) {
            log.events.push(event.clone());
        }
        Ok(())
    }

    async fn list_events(
        &self,
        camera_id: &str,
        date: NaiveDate,
    ) -> Result<Vec<CrossingEvent>, PersistenceError> {
        let log = self.events.read().await;
        Ok(log
            .events
            .iter()
            .filter(|e| e.camera_id == camera_id && local_date(e.timestamp) == date)
            .cloned()
            .collect())
    }

    async fn prune_events_before(&self, date: NaiveDate) -> Result<u64, PersistenceError> {
        let mut log = self.events.write().await;
        let before = log.events.len();
        let EventLog { events, ids } = &mut *log;
        events.retain(|e| {
            let keep = local_date(e.timestamp) >= date;
            if !keep {
                ids.remove(&e.event_id);
            }
            keep
        });
        Ok((before - log.events.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use common::CrossingDirection;

    #[tokio::test]
    async fn test_insert_event_is_idempotent() {
        let store = MemoryStore::new();
        let event = CrossingEvent::new("cam-1", "car", Utc::now(), 1, CrossingDirection::Down);

        store.insert_event(&event).await.unwrap();
        store.insert_event(&event).await.unwrap();
        assert_eq!(store.events().await.len(), 1);
    }

    #[tokio::test]
    async fn test_list_events_filters_camera_and_day() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let today = local_date(now);

        store
            .insert_event(&CrossingEvent::new("cam-1", "car", now, 1, CrossingDirection::Down).with_speed(Some(30.0)))
            .await
            .unwrap();
        store
            .insert_event(&CrossingEvent::new("cam-1", "bus", now, 2, CrossingDirection::Up).with_speed(Some(50.0)))
            .await
            .unwrap();
        store
            .insert_event(&CrossingEvent::new("cam-2", "car", now, 1, CrossingDirection::Down))
            .await
            .unwrap();
        store
            .insert_event(&CrossingEvent::new("cam-1", "car", now - Duration::days(2), 9, CrossingDirection::Down))
            .await
            .unwrap();

        let events = store.list_events("cam-1", today).await.unwrap();
        assert_eq!(events.len(), 2);

        let stats = store.daily_stats("cam-1", today).await.unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.counts.get("bus"), Some(&1));
        assert_eq!(stats.average_speed_kmh, 40.0);
    }

    #[tokio::test]
    async fn test_prune_drops_days_before_cutoff() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let today = local_date(now);
        for (track_id, age) in [(1, 10), (2, 3), (3, 0)] {
            store
                .insert_event(&CrossingEvent::new(
                    "cam-1",
                    "car",
                    now - Duration::days(age),
                    track_id,
                    CrossingDirection::Down,
                ))
                .await
                .unwrap();
        }

        let cutoff = today - Duration::days(7);
        assert_eq!(store.prune_events_before(cutoff).await.unwrap(), 1);
        assert_eq!(store.prune_events_before(cutoff).await.unwrap(), 0);
        let remaining: Vec<u64> = store.events().await.iter().map(|e| e.track_id).collect();
        assert_eq!(remaining, vec![2, 3]);
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let store = MemoryStore::new();
        store.fail_next_inserts(1);
        let event = CrossingEvent::new("cam-1", "car", Utc::now(), 1, CrossingDirection::Down);

        let err = store.insert_event(&event).await.unwrap_err();
        assert!(err.is_transient());
        assert!(store.insert_event(&event).await.is_ok());

        store.fail_next_lists(1);
        assert!(store.list_cameras().await.is_err());
        assert!(store.list_cameras().await.is_ok());
    }

    #[tokio::test]
    async fn test_insert_camera_upserts() {
        let store = MemoryStore::new();
        store.insert_camera(&CameraConfig::new("cam-1", "rtsp://a")).await.unwrap();
        store
            .insert_camera(&CameraConfig::new("cam-1", "rtsp://b").with_line_position(0.3))
            .await
            .unwrap();

        let cameras = store.list_cameras().await.unwrap();
        assert_eq!(cameras.len(), 1);
        assert_eq!(cameras[0].source_uri, "rtsp://b");
    }
}
