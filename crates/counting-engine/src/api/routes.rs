use super::ApiState;
use crate::error::ApiError;
use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use bytes::{Bytes, BytesMut};
use chrono::{Local, NaiveDate};
use common::cameras::CameraListResponse;
use common::{CameraStateView, DailyStats};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

const MJPEG_BOUNDARY: &str = "frame";
const MJPEG_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Health check endpoint
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "counting-engine"
        })),
    )
}

/// Ready once the event store answers
pub async fn readyz(State(state): State<ApiState>) -> impl IntoResponse {
    let store_ok = match state.events.health_check().await {
        Ok(ok) => ok,
        Err(e) => {
            tracing::warn!(error = %e, "event store health check failed");
            false
        }
    };
    let workers = state.supervisor.worker_count().await;

    let status = if store_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(json!({
            "status": if store_ok { "ready" } else { "not ready" },
            "event_store": store_ok,
            "workers": workers
        })),
    )
}

/// Metrics endpoint (Prometheus format)
pub async fn metrics() -> impl IntoResponse {
    match telemetry::metrics::encode_metrics() {
        Ok(body) => body.into_response(),
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics").into_response()
        }
    }
}

pub async fn list_cameras(State(state): State<ApiState>) -> Json<CameraListResponse> {
    Json(CameraListResponse {
        cameras: state.supervisor.list_cameras().await,
    })
}

pub async fn camera_state(
    State(state): State<ApiState>,
    Path(camera_id): Path<String>,
) -> Result<Json<CameraStateView>, ApiError> {
    state
        .shared
        .read(&camera_id)
        .await
        .map(|s| Json(s.view()))
        .ok_or_else(|| ApiError::not_found(format!("camera '{}' not found", camera_id)))
}

/// Latest annotated frame as JPEG
pub async fn camera_frame(
    State(state): State<ApiState>,
    Path(camera_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let camera = state
        .shared
        .read(&camera_id)
        .await
        .ok_or_else(|| ApiError::not_found(format!("camera '{}' not found", camera_id)))?;

    let frame = camera
        .latest_frame
        .ok_or_else(|| ApiError::not_found(format!("no frame yet for camera '{}'", camera_id)))?;

    Ok((
        [
            (header::CONTENT_TYPE, "image/jpeg"),
            (header::CACHE_CONTROL, "no-store"),
        ],
        frame,
    ))
}

/// One multipart section carrying a JPEG
pub fn mjpeg_part(jpeg: &[u8]) -> Bytes {
    let preamble = format!(
        "--{}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        MJPEG_BOUNDARY,
        jpeg.len()
    );
    let mut part = BytesMut::with_capacity(preamble.len() + jpeg.len() + 2);
    part.extend_from_slice(preamble.as_bytes());
    part.extend_from_slice(jpeg);
    part.extend_from_slice(b"\r\n");
    part.freeze()
}

/// Live MJPEG stream of the annotated frames.
///
/// Each new frame is sent once. The stream ends when the client goes away,
/// the camera is removed or the server shuts down.
pub async fn camera_video_feed(
    State(state): State<ApiState>,
    Path(camera_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    if state.shared.read(&camera_id).await.is_none() {
        return Err(ApiError::not_found(format!("camera '{}' not found", camera_id)));
    }

    let (tx, rx) = mpsc::channel::<Result<Bytes, std::io::Error>>(2);
    let shared = state.shared.clone();
    let streams = state.streams.clone();

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(MJPEG_POLL_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut last_sent = None;

        loop {
            tokio::select! {
                biased;
                _ = streams.cancelled() => break,
                _ = tx.closed() => break,
                _ = interval.tick() => {}
            }

            let Some(camera) = shared.read(&camera_id).await else {
                break;
            };
            let Some(frame) = camera.latest_frame else {
                continue;
            };
            if last_sent.is_some() && last_sent == camera.last_update_timestamp {
                continue;
            }
            last_sent = camera.last_update_timestamp;

            if tx.send(Ok(mjpeg_part(&frame))).await.is_err() {
                break;
            }
        }
        tracing::debug!(camera_id = %camera_id, "video feed closed");
    });

    Ok((
        [
            (
                header::CONTENT_TYPE,
                format!("multipart/x-mixed-replace; boundary={}", MJPEG_BOUNDARY),
            ),
            (header::CACHE_CONTROL, "no-store".to_string()),
        ],
        Body::from_stream(ReceiverStream::new(rx)),
    ))
}

#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    pub date: Option<String>,
}

/// Per-class counts and average speed for one local day
pub async fn camera_stats(
    State(state): State<ApiState>,
    Path(camera_id): Path<String>,
    Query(query): Query<StatsQuery>,
) -> Result<Json<DailyStats>, ApiError> {
    let date = match query.date.as_deref() {
        Some(raw) => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .map_err(|_| ApiError::bad_request(format!("invalid date '{}', expected YYYY-MM-DD", raw)))?,
        None => Local::now().date_naive(),
    };

    let stats = state.events.daily_stats(&camera_id, date).await?;
    Ok(Json(stats))
}
