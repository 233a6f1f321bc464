/// End-to-end tests for a single camera worker: frames in, counts and events out
use async_trait::async_trait;
use chrono::NaiveDate;
use common::{CameraConfig, CrossingDirection, CrossingEvent, EventStore, PersistenceError, WorkerState};
use counting_engine::{
    detector::ScriptedDetector,
    source::{OpenOutcome, SyntheticSourceFactory},
    store::MemoryStore,
    BoundingBox, CameraWorker, Detection, EventSink, EventSinkConfig, PipelineConfig,
    SharedStateStore, WorkerContext,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use telemetry::metrics::EVENTS_DROPPED;
use tokio_util::sync::CancellationToken;

const WIDTH: u32 = 160;
const HEIGHT: u32 = 100;

fn car_at(cy: f32) -> Vec<Detection> {
    vec![Detection::new(BoundingBox::centered(80.0, cy, 20.0, 12.0), "car", 0.9)]
}

fn pipeline(track_staleness_secs: u64) -> PipelineConfig {
    let mut pipeline = PipelineConfig::new();
    pipeline.worker.backoff_start_ms = 1;
    pipeline.worker.backoff_max_ms = 5;
    pipeline.worker.track_staleness_secs = track_staleness_secs;
    pipeline
}

struct Harness {
    shared: SharedStateStore,
    store: Arc<MemoryStore>,
}

impl Harness {
    /// Run a worker until it has processed `frames` frames, then stop it and
    /// wait for its event queue to drain.
    async fn run(
        factory: SyntheticSourceFactory,
        detector: ScriptedDetector,
        pipeline: PipelineConfig,
        frames: u64,
    ) -> Self {
        let shared = SharedStateStore::new();
        let store = Arc::new(MemoryStore::new());
        let ctx = WorkerContext {
            source_factory: Arc::new(factory),
            detector: Arc::new(detector),
            shared: shared.clone(),
            events: EventSink::new(store.clone(), EventSinkConfig::default()),
            pipeline,
        };

        let camera = CameraConfig::new("cam-1", "synthetic://cam-1");
        let token = CancellationToken::new();
        let worker = tokio::spawn(CameraWorker::new(camera, ctx).run(token.clone()));

        let reached = wait_until(Duration::from_secs(10), || async {
            shared
                .read("cam-1")
                .await
                .map(|s| s.frames_processed >= frames)
                .unwrap_or(false)
        })
        .await;
        assert!(reached, "worker did not process {} frames in time", frames);

        token.cancel();
        worker.await.unwrap().unwrap();

        Self { shared, store }
    }

    async fn events(&self) -> Vec<CrossingEvent> {
        self.store.events().await
    }
}

async fn wait_until<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}

#[tokio::test]
async fn test_car_crossing_line_counts_once() {
    // Centroid moves from 0.3h to 0.7h and stays below the line
    let detector = ScriptedDetector::new().with_frames(
        0,
        vec![car_at(30.0), car_at(70.0), car_at(72.0), car_at(75.0)],
    );
    let harness = Harness::run(SyntheticSourceFactory::new(WIDTH, HEIGHT), detector, pipeline(5), 6).await;

    let events = harness.events().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].vehicle_class, "car");
    assert_eq!(events[0].direction, CrossingDirection::Down);
    assert_eq!(events[0].camera_id, "cam-1");

    let state = harness.shared.read("cam-1").await.unwrap();
    assert_eq!(state.today_count.get("car"), Some(&1));
    assert_eq!(state.total(), 1);
    assert_eq!(state.stream_state, WorkerState::Stopped);
}

#[tokio::test]
async fn test_approach_and_retreat_is_not_counted() {
    let detector = ScriptedDetector::new().with_frames(
        0,
        vec![car_at(30.0), car_at(45.0), car_at(30.0)],
    );
    let harness = Harness::run(SyntheticSourceFactory::new(WIDTH, HEIGHT), detector, pipeline(5), 4).await;

    assert!(harness.events().await.is_empty());
    let state = harness.shared.read("cam-1").await.unwrap();
    assert_eq!(state.total(), 0);
}

#[tokio::test]
async fn test_empty_frames_still_publish() {
    let harness = Harness::run(
        SyntheticSourceFactory::new(WIDTH, HEIGHT),
        ScriptedDetector::new(),
        pipeline(5),
        20,
    )
    .await;

    let state = harness.shared.read("cam-1").await.unwrap();
    assert!(state.frames_processed >= 20);
    assert!(state.today_count.is_empty());
    assert!(state.last_update_timestamp.is_some());

    let jpeg = state.latest_frame.unwrap();
    let decoded = image::load_from_memory(&jpeg).unwrap();
    assert_eq!(decoded.width(), WIDTH);
    assert_eq!(decoded.height(), HEIGHT);
    assert!(harness.events().await.is_empty());
}

#[tokio::test]
async fn test_detection_failure_skips_frame() {
    // Frame 1 fails; the track bridges the gap and still crosses once
    let detector = ScriptedDetector::new()
        .with_frame(0, car_at(30.0))
        .with_failure(1)
        .with_frame(2, car_at(70.0));
    let harness = Harness::run(SyntheticSourceFactory::new(WIDTH, HEIGHT), detector, pipeline(5), 4).await;

    assert_eq!(harness.events().await.len(), 1);
}

#[tokio::test]
async fn test_evicted_track_returns_with_new_id() {
    // Crosses, disappears past the missed-frame limit, then crosses again
    let mut frames = vec![car_at(30.0), car_at(70.0)];
    frames.extend(std::iter::repeat(Vec::new()).take(15));
    frames.push(car_at(30.0));
    frames.push(car_at(70.0));
    let total = frames.len() as u64;

    let detector = ScriptedDetector::new().with_frames(0, frames);
    let harness = Harness::run(SyntheticSourceFactory::new(WIDTH, HEIGHT), detector, pipeline(5), total + 1).await;

    let events = harness.events().await;
    assert_eq!(events.len(), 2);
    assert_ne!(events[0].track_id, events[1].track_id);
    let state = harness.shared.read("cam-1").await.unwrap();
    assert_eq!(state.today_count.get("car"), Some(&2));
}

#[tokio::test]
async fn test_short_reconnect_keeps_tracks() {
    // The stream drops right after the first sighting
    let factory = SyntheticSourceFactory::new(WIDTH, HEIGHT)
        .with_script("cam-1", vec![OpenOutcome::EndAfter(1), OpenOutcome::Fail]);
    let detector = ScriptedDetector::new().with_frames(0, vec![car_at(30.0), car_at(70.0)]);

    let harness = Harness::run(factory.clone(), detector, pipeline(60), 3).await;

    assert!(factory.open_count() >= 3);
    let events = harness.events().await;
    assert_eq!(events.len(), 1);
}

#[tokio::test]
async fn test_crossed_vehicle_not_recounted_after_short_reconnect() {
    // Crosses, the stream drops, and the same vehicle is seen again on both
    // sides of the line after resuming
    let factory = SyntheticSourceFactory::new(WIDTH, HEIGHT)
        .with_script("cam-1", vec![OpenOutcome::EndAfter(2)]);
    let detector = ScriptedDetector::new().with_frames(
        0,
        vec![car_at(30.0), car_at(70.0), car_at(40.0), car_at(70.0)],
    );

    let harness = Harness::run(factory.clone(), detector, pipeline(60), 5).await;

    assert!(factory.open_count() >= 2);
    let events = harness.events().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].direction, CrossingDirection::Down);
    let state = harness.shared.read("cam-1").await.unwrap();
    assert_eq!(state.today_count.get("car"), Some(&1));
    assert_eq!(state.total(), 1);
}

#[tokio::test]
async fn test_long_reconnect_discards_tracks() {
    let factory = SyntheticSourceFactory::new(WIDTH, HEIGHT)
        .with_script("cam-1", vec![OpenOutcome::EndAfter(1), OpenOutcome::Fail]);
    let detector = ScriptedDetector::new().with_frames(0, vec![car_at(30.0), car_at(70.0)]);

    // A zero staleness window means any outage is too long
    let harness = Harness::run(factory, detector, pipeline(0), 3).await;

    assert!(harness.events().await.is_empty());
    let state = harness.shared.read("cam-1").await.unwrap();
    assert_eq!(state.total(), 0);
}

#[tokio::test]
async fn test_invalid_camera_config_is_rejected() {
    let shared = SharedStateStore::new();
    let store = Arc::new(MemoryStore::new());
    let ctx = WorkerContext {
        source_factory: Arc::new(SyntheticSourceFactory::new(WIDTH, HEIGHT)),
        detector: Arc::new(ScriptedDetector::new()),
        shared: shared.clone(),
        events: EventSink::new(store, EventSinkConfig::default()),
        pipeline: pipeline(5),
    };

    let camera = CameraConfig::new("cam-1", "synthetic://cam-1").with_line_position(1.5);
    let result = CameraWorker::new(camera, ctx).run(CancellationToken::new()).await;
    assert!(result.is_err());
    assert!(shared.read("cam-1").await.is_none());
}

/// Panics on the first insert, then stores normally
#[derive(Default)]
struct PanicOnceStore {
    inner: MemoryStore,
    panicked: AtomicBool,
}

#[async_trait]
impl EventStore for PanicOnceStore {
    async fn insert_event(&self, event: &CrossingEvent) -> Result<(), PersistenceError> {
        if !self.panicked.swap(true, Ordering::SeqCst) {
            panic!("event store crashed");
        }
        self.inner.insert_event(event).await
    }

    async fn list_events(&self, camera_id: &str, date: NaiveDate) -> Result<Vec<CrossingEvent>, PersistenceError> {
        self.inner.list_events(camera_id, date).await
    }
}

#[tokio::test]
async fn test_lost_event_queue_stops_worker() {
    // Two vehicles cross one after the other; the store dies on the first
    let mut frames = vec![car_at(30.0), car_at(70.0)];
    frames.extend(std::iter::repeat(Vec::new()).take(15));
    frames.push(car_at(30.0));
    frames.push(car_at(70.0));

    let shared = SharedStateStore::new();
    let store = Arc::new(PanicOnceStore::default());
    let ctx = WorkerContext {
        source_factory: Arc::new(
            SyntheticSourceFactory::new(WIDTH, HEIGHT).with_frame_interval(Duration::from_millis(2)),
        ),
        detector: Arc::new(ScriptedDetector::new().with_frames(0, frames)),
        shared: shared.clone(),
        events: EventSink::new(store.clone(), EventSinkConfig::default()),
        pipeline: pipeline(5),
    };

    let camera = CameraConfig::new("cam-lost", "synthetic://cam-lost");
    let result = tokio::time::timeout(
        Duration::from_secs(10),
        CameraWorker::new(camera, ctx).run(CancellationToken::new()),
    )
    .await
    .expect("worker kept running after its event queue closed");

    let err = result.unwrap_err();
    assert!(format!("{:#}", err).contains("event queue closed"));
    assert_eq!(
        EVENTS_DROPPED.with_label_values(&["cam-lost", "queue_closed"]).get(),
        1
    );
    assert!(store.inner.events().await.is_empty());

    let state = shared.read("cam-lost").await.unwrap();
    assert_eq!(state.stream_state, WorkerState::Stopped);
}
