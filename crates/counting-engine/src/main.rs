use anyhow::{Context, Result};
use common::{CameraConfig, CameraConfigStore, EventStore};
use counting_engine::{
    api,
    config::{CameraStoreKind, DetectorKind, EngineConfig, SourceKind},
    detector::{Detector, FilteredDetector, RemoteDetector, SyntheticTrafficDetector},
    source::{FfmpegSourceFactory, FrameSourceFactory, SyntheticSourceFactory},
    store::{FileCameraStore, MemoryStore, PgStore},
    ApiState, EventSink, SharedStateStore, Supervisor, WorkerContext,
};
use std::sync::Arc;
use std::time::Duration;
use telemetry::LogConfig;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let _log_guard = telemetry::init_structured_logging(
        LogConfig::new("counting-engine").with_version(common::VERSION),
    );

    info!("Starting counting engine...");

    let config = EngineConfig::from_env()?;
    info!(
        bind = %config.bind_addr,
        camera_store = ?config.camera_store,
        source = ?config.source,
        "engine configuration loaded"
    );

    let pg = match &config.database_url {
        Some(url) => {
            let store = PgStore::connect(url, config.database_max_connections)
                .await
                .context("failed to connect to database")?;
            store.migrate().await.context("failed to prepare database schema")?;
            Some(Arc::new(store))
        }
        None => None,
    };

    let events: Arc<dyn EventStore> = match &pg {
        Some(store) => store.clone(),
        None => {
            warn!("DATABASE_URL not set, crossing events are kept in memory only");
            Arc::new(MemoryStore::new())
        }
    };

    let camera_store: Arc<dyn CameraConfigStore> = match &config.camera_store {
        CameraStoreKind::Memory { demo_cameras } => {
            let cameras = (1..=*demo_cameras)
                .map(|i| {
                    let id = format!("demo-{}", i);
                    let uri = format!("synthetic://{}", id);
                    CameraConfig::new(id, uri)
                })
                .collect();
            Arc::new(MemoryStore::with_cameras(cameras))
        }
        CameraStoreKind::File { path } => Arc::new(FileCameraStore::new(path.clone())),
        CameraStoreKind::Postgres => match &pg {
            Some(store) => store.clone(),
            None => anyhow::bail!("postgres camera store selected without a database"),
        },
    };

    let raw_detector: Arc<dyn Detector> = match &config.detector {
        DetectorKind::Synthetic => Arc::new(SyntheticTrafficDetector::default()),
        DetectorKind::Remote { url, timeout } => {
            info!(url = %url, "using remote detector");
            Arc::new(
                RemoteDetector::new(url.clone(), *timeout, config.pipeline.worker.jpeg_quality)
                    .context("failed to build detector client")?,
            )
        }
    };
    let detector: Arc<dyn Detector> = Arc::new(FilteredDetector::new(raw_detector, config.filter.clone()));

    let source_factory: Arc<dyn FrameSourceFactory> = match config.source {
        SourceKind::Ffmpeg => Arc::new(FfmpegSourceFactory::new(config.ffmpeg.clone())),
        SourceKind::Synthetic => Arc::new(
            SyntheticSourceFactory::new(config.ffmpeg.width, config.ffmpeg.height)
                .with_frame_interval(Duration::from_millis(100)),
        ),
    };

    let shared = SharedStateStore::new();
    let ctx = WorkerContext {
        source_factory,
        detector,
        shared: shared.clone(),
        events: EventSink::new(events.clone(), config.events.clone()),
        pipeline: config.pipeline.clone(),
    };

    let supervisor = Supervisor::new(camera_store, ctx, config.supervisor.clone());
    let cameras = supervisor.start().await?;
    info!("Supervising {} cameras", cameras);

    let state = ApiState::new(supervisor.clone(), shared, events);
    let streams = state.streams.clone();
    let app = api::router(state);

    info!("Binding to {}", config.bind_addr);
    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    info!("Counting engine listening on {}", config.bind_addr);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            streams.cancel();
        })
        .await;

    supervisor.shutdown().await;
    served?;

    info!("Counting engine stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }

    info!("Shutting down gracefully...");
}
