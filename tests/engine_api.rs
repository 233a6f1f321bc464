/// Integration tests for the HTTP API over a running engine with synthetic traffic
use axum_test::TestServer;
use common::{cameras::CameraListResponse, CameraConfig, CameraStateView, DailyStats};
use counting_engine::{
    api,
    detector::{DetectionFilter, FilteredDetector, SyntheticTrafficDetector},
    source::SyntheticSourceFactory,
    store::MemoryStore,
    ApiState, EventSink, EventSinkConfig, PipelineConfig, SharedStateStore, Supervisor,
    SupervisorConfig, WorkerContext,
};
use std::sync::Arc;
use std::time::Duration;

async fn setup_engine(cameras: Vec<CameraConfig>) -> (TestServer, Supervisor, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::with_cameras(cameras));
    let shared = SharedStateStore::new();
    let detector = FilteredDetector::new(
        Arc::new(SyntheticTrafficDetector::default()),
        DetectionFilter::default(),
    );
    let ctx = WorkerContext {
        source_factory: Arc::new(
            SyntheticSourceFactory::new(640, 480).with_frame_interval(Duration::from_millis(1)),
        ),
        detector: Arc::new(detector),
        shared: shared.clone(),
        events: EventSink::new(store.clone(), EventSinkConfig::default()),
        pipeline: PipelineConfig::new(),
    };

    let supervisor = Supervisor::new(store.clone(), ctx, SupervisorConfig::default());
    supervisor.start().await.unwrap();

    let state = ApiState::new(supervisor.clone(), shared, store.clone());
    let server = TestServer::new(api::router(state)).unwrap();
    (server, supervisor, store)
}

async fn camera_total(server: &TestServer, camera_id: &str) -> u64 {
    let response = server.get(&format!("/v1/cameras/{}/state", camera_id)).await;
    if response.status_code() != 200 {
        return 0;
    }
    let view: CameraStateView = response.json();
    view.today_count.values().sum()
}

#[tokio::test]
async fn test_list_configured_cameras() {
    let (server, supervisor, _) = setup_engine(vec![
        CameraConfig::new("1002", "synthetic://1002").with_location("Jl. Merdeka", -6.91, 107.61),
        CameraConfig::new("1001", "synthetic://1001").with_line_position(0.6),
    ])
    .await;

    let response = server.get("/v1/cameras").await;
    assert_eq!(response.status_code(), 200);
    let list: CameraListResponse = response.json();
    assert_eq!(list.cameras.len(), 2);
    assert_eq!(list.cameras[0].camera_id, "1001");
    assert_eq!(list.cameras[0].calibration_line_position, 0.6);
    assert_eq!(list.cameras[1].location_name, "Jl. Merdeka");

    supervisor.shutdown().await;
}

#[tokio::test]
async fn test_traffic_is_counted_and_served() {
    let (server, supervisor, store) =
        setup_engine(vec![CameraConfig::new("cam-1", "synthetic://cam-1")]).await;

    let mut counted = 0;
    for _ in 0..500 {
        counted = camera_total(&server, "cam-1").await;
        if counted >= 3 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(counted >= 3, "expected at least three crossings, saw {}", counted);

    let frame = server.get("/v1/cameras/cam-1/frame").await;
    assert_eq!(frame.status_code(), 200);
    assert_eq!(frame.header("content-type"), "image/jpeg");
    let decoded = image::load_from_memory(frame.as_bytes()).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (640, 480));

    supervisor.shutdown().await;

    // Every counted crossing reached the store once the queues drained
    let view: CameraStateView = server.get("/v1/cameras/cam-1/state").await.json();
    let published: u64 = view.today_count.values().sum();
    assert_eq!(store.events().await.len() as u64, published);

    let stats: DailyStats = server.get("/v1/cameras/cam-1/stats").await.json();
    assert_eq!(stats.total, published);
    assert_eq!(stats.counts, view.today_count);
    assert!(stats.average_speed_kmh > 0.0);
}

#[tokio::test]
async fn test_two_cameras_count_independently() {
    let (server, supervisor, store) = setup_engine(vec![
        CameraConfig::new("north", "synthetic://north"),
        CameraConfig::new("south", "synthetic://south").with_line_position(0.25),
    ])
    .await;

    let mut ready = false;
    for _ in 0..500 {
        if camera_total(&server, "north").await >= 2 && camera_total(&server, "south").await >= 2 {
            ready = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(ready);
    supervisor.shutdown().await;

    let events = store.events().await;
    for camera_id in ["north", "south"] {
        let view: CameraStateView = server
            .get(&format!("/v1/cameras/{}/state", camera_id))
            .await
            .json();
        let persisted = events.iter().filter(|e| e.camera_id == camera_id).count() as u64;
        assert_eq!(persisted, view.today_count.values().sum::<u64>());
    }
}

#[tokio::test]
async fn test_health_and_metrics() {
    let (server, supervisor, _) =
        setup_engine(vec![CameraConfig::new("cam-1", "synthetic://cam-1")]).await;

    assert_eq!(server.get("/healthz").await.status_code(), 200);

    let ready = server.get("/readyz").await;
    assert_eq!(ready.status_code(), 200);
    let body: serde_json::Value = ready.json();
    assert_eq!(body["workers"], 1);

    tokio::time::sleep(Duration::from_millis(50)).await;
    let metrics = server.get("/metrics").await.text();
    assert!(metrics.contains("engine_frames_processed_total"));
    assert!(metrics.contains("engine_workers_running"));

    supervisor.shutdown().await;
}
