/// Integration tests for running the engine from a YAML camera file
use common::{CameraConfig, CameraConfigStore};
use counting_engine::{
    detector::ScriptedDetector,
    source::SyntheticSourceFactory,
    store::{FileCameraStore, MemoryStore},
    EventSink, EventSinkConfig, PipelineConfig, SharedStateStore, Supervisor, SupervisorConfig,
    WorkerContext,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

fn supervisor_for(store: Arc<FileCameraStore>) -> (Supervisor, SharedStateStore) {
    let shared = SharedStateStore::new();
    let ctx = WorkerContext {
        source_factory: Arc::new(
            SyntheticSourceFactory::new(64, 48).with_frame_interval(Duration::from_millis(2)),
        ),
        detector: Arc::new(ScriptedDetector::new()),
        shared: shared.clone(),
        events: EventSink::new(Arc::new(MemoryStore::new()), EventSinkConfig::default()),
        pipeline: PipelineConfig::new(),
    };
    (Supervisor::new(store, ctx, SupervisorConfig::default()), shared)
}

#[tokio::test]
async fn test_engine_starts_from_yaml_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("cameras.yaml");
    tokio::fs::write(
        &path,
        r#"
cameras:
  - camera_id: "1001"
    rtsp_url: synthetic://1001
    location_name: Simpang Dago
    latitude: -6.885
    longitude: 107.613
  - camera_id: "1002"
    source_uri: synthetic://1002
    calibration_line_position: 0.65
"#,
    )
    .await
    .unwrap();

    let store = Arc::new(FileCameraStore::new(&path));
    let (supervisor, shared) = supervisor_for(store.clone());
    assert_eq!(supervisor.start().await.unwrap(), 2);

    let cameras = supervisor.list_cameras().await;
    assert_eq!(cameras[0].source_uri, "synthetic://1001");
    assert_eq!(cameras[0].location_name, "Simpang Dago");
    assert_eq!(cameras[1].calibration_line_position, 0.65);

    // Add a camera through the store and re-read the file
    store
        .insert_camera(&CameraConfig::new("1003", "synthetic://1003"))
        .await
        .unwrap();
    supervisor.refresh().await.unwrap();
    assert_eq!(supervisor.worker_count().await, 3);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(shared.read("1003").await.is_some());

    // A corrupted file is reported and the running set is kept
    tokio::fs::write(&path, "cameras: [ {camera_id: ").await.unwrap();
    assert!(supervisor.refresh().await.is_err());
    assert_eq!(supervisor.worker_count().await, 3);

    supervisor.shutdown().await;
}

#[tokio::test]
async fn test_missing_file_fails_startup() {
    let dir = tempdir().unwrap();
    let store = Arc::new(FileCameraStore::new(dir.path().join("absent.yaml")));
    let (supervisor, _) = supervisor_for(store);

    let err = supervisor.start().await.unwrap_err();
    assert!(format!("{:#}", err).contains("camera configuration"));
}
