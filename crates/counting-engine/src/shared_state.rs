//! Concurrency-safe registry of every camera's latest frame and today's counts.
//!
//! The outer map is only locked long enough to find or insert an entry. Each
//! camera has its own async lock, so publishing from one camera never waits on
//! another and readers always see a frame together with the counts that were
//! published with it.

use bytes::Bytes;
use chrono::{DateTime, Local, NaiveDate, Utc};
use common::{CameraStateView, WorkerState};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock as StdRwLock};
use telemetry::metrics::DAILY_RESETS;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Per-class increments produced by one frame
pub type CountDelta = BTreeMap<String, u64>;

#[derive(Debug)]
struct CameraSlot {
    latest_frame: Option<Bytes>,
    today_count: BTreeMap<String, u64>,
    counts_date: NaiveDate,
    last_update: Option<DateTime<Utc>>,
    stream_state: WorkerState,
    frames_processed: u64,
}

impl CameraSlot {
    fn new(today: NaiveDate) -> Self {
        Self {
            latest_frame: None,
            today_count: BTreeMap::new(),
            counts_date: today,
            last_update: None,
            stream_state: WorkerState::Connecting,
            frames_processed: 0,
        }
    }

    /// Clear the counts if they belong to an earlier day
    fn roll_over(&mut self, today: NaiveDate) -> bool {
        if self.counts_date == today {
            return false;
        }
        self.today_count.clear();
        self.counts_date = today;
        true
    }
}

/// Point-in-time copy of a camera's public state.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraPublicState {
    pub camera_id: String,
    pub latest_frame: Option<Bytes>,
    pub today_count: BTreeMap<String, u64>,
    pub counts_date: NaiveDate,
    pub last_update_timestamp: Option<DateTime<Utc>>,
    pub stream_state: WorkerState,
    pub frames_processed: u64,
}

impl CameraPublicState {
    pub fn total(&self) -> u64 {
        self.today_count.values().sum()
    }

    pub fn view(&self) -> CameraStateView {
        CameraStateView {
            camera_id: self.camera_id.clone(),
            stream_state: self.stream_state,
            today_count: self.today_count.clone(),
            counts_date: self.counts_date,
            last_update_timestamp: self.last_update_timestamp,
            frames_processed: self.frames_processed,
            has_frame: self.latest_frame.is_some(),
        }
    }
}

#[derive(Clone, Default)]
pub struct SharedStateStore {
    slots: Arc<StdRwLock<HashMap<String, Arc<RwLock<CameraSlot>>>>>,
}

impl SharedStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, camera_id: &str) -> Option<Arc<RwLock<CameraSlot>>> {
        let slots = self.slots.read().unwrap_or_else(|e| e.into_inner());
        slots.get(camera_id).cloned()
    }

    fn slot_or_insert(&self, camera_id: &str, today: NaiveDate) -> Arc<RwLock<CameraSlot>> {
        if let Some(slot) = self.slot(camera_id) {
            return slot;
        }
        let mut slots = self.slots.write().unwrap_or_else(|e| e.into_inner());
        slots
            .entry(camera_id.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(CameraSlot::new(today))))
            .clone()
    }

    /// Create an empty entry so readers see the camera before its first frame
    pub fn register(&self, camera_id: &str) {
        self.slot_or_insert(camera_id, Local::now().date_naive());
    }

    /// Replace the latest frame and merge the count delta in one step
    pub async fn publish(&self, camera_id: &str, frame: Bytes, delta: &CountDelta) {
        self.publish_at(camera_id, Some(frame), delta, Local::now()).await;
    }

    /// Merge counts while keeping the previous frame (annotation failed)
    pub async fn publish_counts(&self, camera_id: &str, delta: &CountDelta) {
        self.publish_at(camera_id, None, delta, Local::now()).await;
    }

    pub async fn publish_at(
        &self,
        camera_id: &str,
        frame: Option<Bytes>,
        delta: &CountDelta,
        now: DateTime<Local>,
    ) {
        let today = now.date_naive();
        let slot = self.slot_or_insert(camera_id, today);
        let mut slot = slot.write().await;

        if slot.roll_over(today) {
            DAILY_RESETS.inc();
            info!(camera_id = %camera_id, date = %today, "daily counts reset");
        }

        for (class, count) in delta {
            *slot.today_count.entry(class.clone()).or_insert(0) += count;
        }
        if let Some(frame) = frame {
            slot.latest_frame = Some(frame);
        }
        slot.last_update = Some(now.with_timezone(&Utc));
        slot.frames_processed += 1;
    }

    pub async fn set_stream_state(&self, camera_id: &str, state: WorkerState) {
        let slot = self.slot_or_insert(camera_id, Local::now().date_naive());
        let mut slot = slot.write().await;
        if slot.stream_state != state {
            debug!(camera_id = %camera_id, state = state.as_str(), "worker state changed");
            slot.stream_state = state;
        }
    }

    pub async fn read(&self, camera_id: &str) -> Option<CameraPublicState> {
        self.read_at(camera_id, Local::now()).await
    }

    /// Snapshot as of `now`. Counts left over from an earlier day read as
    /// empty even before the next publish or sweep clears them.
    pub async fn read_at(&self, camera_id: &str, now: DateTime<Local>) -> Option<CameraPublicState> {
        let slot = self.slot(camera_id)?;
        let slot = slot.read().await;
        let today = now.date_naive();

        let (today_count, counts_date) = if slot.counts_date == today {
            (slot.today_count.clone(), slot.counts_date)
        } else {
            (BTreeMap::new(), today)
        };

        Some(CameraPublicState {
            camera_id: camera_id.to_string(),
            latest_frame: slot.latest_frame.clone(),
            today_count,
            counts_date,
            last_update_timestamp: slot.last_update,
            stream_state: slot.stream_state,
            frames_processed: slot.frames_processed,
        })
    }

    /// Snapshots of every camera, ordered by id
    pub async fn list(&self) -> Vec<CameraPublicState> {
        let now = Local::now();
        let mut ids: Vec<String> = {
            let slots = self.slots.read().unwrap_or_else(|e| e.into_inner());
            slots.keys().cloned().collect()
        };
        ids.sort();

        let mut states = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(state) = self.read_at(&id, now).await {
                states.push(state);
            }
        }
        states
    }

    pub async fn sweep(&self) -> usize {
        self.sweep_at(Local::now()).await
    }

    /// Reset every camera whose counts belong to an earlier day. Returns how
    /// many were reset.
    pub async fn sweep_at(&self, now: DateTime<Local>) -> usize {
        let today = now.date_naive();
        let slots: Vec<(String, Arc<RwLock<CameraSlot>>)> = {
            let slots = self.slots.read().unwrap_or_else(|e| e.into_inner());
            slots.iter().map(|(id, slot)| (id.clone(), slot.clone())).collect()
        };

        let mut reset = 0;
        for (camera_id, slot) in slots {
            if slot.write().await.roll_over(today) {
                DAILY_RESETS.inc();
                info!(camera_id = %camera_id, date = %today, "daily counts reset by sweep");
                reset += 1;
            }
        }
        reset
    }

    pub fn remove(&self, camera_id: &str) -> bool {
        let mut slots = self.slots.write().unwrap_or_else(|e| e.into_inner());
        slots.remove(camera_id).is_some()
    }

    pub fn camera_ids(&self) -> Vec<String> {
        let slots = self.slots.read().unwrap_or_else(|e| e.into_inner());
        let mut ids: Vec<String> = slots.keys().cloned().collect();
        ids.sort();
        ids
    }
}
