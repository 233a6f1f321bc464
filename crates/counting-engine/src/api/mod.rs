pub mod routes;

use crate::shared_state::SharedStateStore;
use crate::supervisor::Supervisor;
use axum::{routing::get, Router};
use common::EventStore;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

/// Read-side handles the HTTP layer needs
#[derive(Clone)]
pub struct ApiState {
    pub supervisor: Supervisor,
    pub shared: SharedStateStore,
    pub events: Arc<dyn EventStore>,
    /// Ends open video feeds so graceful shutdown can finish
    pub streams: CancellationToken,
}

impl ApiState {
    pub fn new(supervisor: Supervisor, shared: SharedStateStore, events: Arc<dyn EventStore>) -> Self {
        Self {
            supervisor,
            shared,
            events,
            streams: CancellationToken::new(),
        }
    }
}

/// Build the API router
pub fn router(state: ApiState) -> Router {
    Router::new()
        // Health and metrics endpoints
        .route("/healthz", get(routes::healthz))
        .route("/readyz", get(routes::readyz))
        .route("/metrics", get(routes::metrics))
        // Camera endpoints
        .route("/v1/cameras", get(routes::list_cameras))
        .route("/v1/cameras/:id/state", get(routes::camera_state))
        .route("/v1/cameras/:id/frame", get(routes::camera_frame))
        .route("/v1/cameras/:id/stats", get(routes::camera_stats))
        .route("/v1/cameras/:id/video_feed", get(routes::camera_video_feed))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
