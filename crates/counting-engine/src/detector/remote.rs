//! Client for an external inference service.
//!
//! The frame is JPEG-encoded, base64-wrapped and POSTed to `{base}/v1/detect`.

use super::{vehicle_class_name, Detector};
use crate::annotation::encode_jpeg;
use crate::error::DetectionError;
use crate::frame::{BoundingBox, Detection, Frame};
use async_trait::async_trait;
use base64::Engine;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Serialize)]
struct DetectRequest<'a> {
    camera_id: &'a str,
    sequence: u64,
    timestamp: i64,
    width: u32,
    height: u32,
    format: &'static str,
    data: String,
}

#[derive(Debug, Deserialize)]
struct DetectResponse {
    #[serde(default)]
    detections: Vec<RemoteDetection>,
}

#[derive(Debug, Deserialize)]
struct RemoteDetection {
    #[serde(default)]
    class: Option<String>,
    #[serde(default)]
    class_id: Option<u32>,
    confidence: f32,
    bbox: BoundingBox,
}

impl RemoteDetection {
    /// Prefer the service's label; fall back to the COCO vehicle id
    fn into_detection(self) -> Option<Detection> {
        let label = match (self.class, self.class_id) {
            (Some(class), _) => class,
            (None, Some(id)) => vehicle_class_name(id)?.to_string(),
            (None, None) => return None,
        };
        Some(Detection::new(self.bbox, label, self.confidence))
    }
}

pub struct RemoteDetector {
    client: Client,
    endpoint: Url,
    jpeg_quality: u8,
}

impl RemoteDetector {
    pub fn new(base_url: Url, timeout: Duration, jpeg_quality: u8) -> anyhow::Result<Self> {
        let endpoint = base_url.join("v1/detect")?;
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint,
            jpeg_quality,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl Detector for RemoteDetector {
    fn name(&self) -> &'static str {
        "remote"
    }

    async fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, DetectionError> {
        let image = frame.image.clone();
        let quality = self.jpeg_quality;
        let jpeg = tokio::task::spawn_blocking(move || encode_jpeg(&image, quality))
            .await
            .map_err(|e| DetectionError::failed(format!("encode task failed: {}", e)))?
            .map_err(|e| DetectionError::failed(format!("jpeg encode failed: {}", e)))?;

        let request = DetectRequest {
            camera_id: &frame.camera_id,
            sequence: frame.sequence,
            timestamp: frame.timestamp.timestamp_millis(),
            width: frame.width(),
            height: frame.height(),
            format: "jpeg",
            data: base64::engine::general_purpose::STANDARD.encode(&jpeg),
        };

        let response: DetectResponse = self
            .client
            .post(self.endpoint.clone())
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let detections: Vec<Detection> = response
            .detections
            .into_iter()
            .filter_map(RemoteDetection::into_detection)
            .collect();

        debug!(
            camera_id = %frame.camera_id,
            sequence = frame.sequence,
            count = detections.len(),
            "remote detections received"
        );

        Ok(detections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::post, Json, Router};
    use serde_json::json;

    #[test]
    fn test_endpoint_join() {
        let base = Url::parse("http://inference:8084/").unwrap();
        let detector = RemoteDetector::new(base, Duration::from_secs(1), 80).unwrap();
        assert_eq!(detector.endpoint().as_str(), "http://inference:8084/v1/detect");
    }

    #[test]
    fn test_class_id_fallback() {
        let parsed: DetectResponse = serde_json::from_value(json!({
            "detections": [
                {"class_id": 5, "confidence": 0.7, "bbox": {"x": 1.0, "y": 2.0, "width": 3.0, "height": 4.0}},
                {"class_id": 0, "confidence": 0.9, "bbox": {"x": 1.0, "y": 2.0, "width": 3.0, "height": 4.0}},
                {"class": "truck", "class_id": 2, "confidence": 0.6, "bbox": {"x": 0.0, "y": 0.0, "width": 1.0, "height": 1.0}}
            ]
        }))
        .unwrap();

        let detections: Vec<_> = parsed
            .detections
            .into_iter()
            .filter_map(RemoteDetection::into_detection)
            .collect();
        assert_eq!(detections.len(), 2);
        assert_eq!(detections[0].label, "bus");
        assert_eq!(detections[1].label, "truck");
    }

    #[tokio::test]
    async fn test_round_trip_against_local_service() {
        let app = Router::new().route(
            "/v1/detect",
            post(|Json(body): Json<serde_json::Value>| async move {
                let width = body["width"].as_f64().unwrap_or(0.0);
                Json(json!({
                    "detections": [
                        {"class": "car", "confidence": 0.92, "bbox": {"x": width / 2.0, "y": 10.0, "width": 20.0, "height": 10.0}}
                    ]
                }))
            }),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        let base = Url::parse(&format!("http://{}/", addr)).unwrap();
        let detector = RemoteDetector::new(base, Duration::from_secs(5), 70).unwrap();
        let detections = detector.detect(&Frame::blank("cam-1", 64, 32)).await.unwrap();

        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].label, "car");
        assert_eq!(detections[0].bbox.x, 32.0);
    }

    #[tokio::test]
    async fn test_unreachable_service_is_unavailable() {
        let base = Url::parse("http://127.0.0.1:1/").unwrap();
        let detector = RemoteDetector::new(base, Duration::from_millis(500), 70).unwrap();
        let result = detector.detect(&Frame::blank("cam-1", 8, 8)).await;
        assert!(matches!(result, Err(DetectionError::Unavailable(_))));
    }
}
