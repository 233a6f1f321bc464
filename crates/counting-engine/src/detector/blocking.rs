use super::Detector;
use crate::error::DetectionError;
use crate::frame::{Detection, Frame};
use async_trait::async_trait;
use std::sync::Arc;

type DetectFn = dyn Fn(&Frame) -> Result<Vec<Detection>, DetectionError> + Send + Sync;

/// Runs a synchronous model on the blocking thread pool so that a slow
/// inference call never stalls other cameras' tasks.
#[derive(Clone)]
pub struct BlockingDetector {
    name: &'static str,
    detect_fn: Arc<DetectFn>,
}

impl BlockingDetector {
    pub fn new<F>(name: &'static str, detect_fn: F) -> Self
    where
        F: Fn(&Frame) -> Result<Vec<Detection>, DetectionError> + Send + Sync + 'static,
    {
        Self {
            name,
            detect_fn: Arc::new(detect_fn),
        }
    }
}

#[async_trait]
impl Detector for BlockingDetector {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, DetectionError> {
        let detect_fn = self.detect_fn.clone();
        let frame = frame.clone();

        tokio::task::spawn_blocking(move || detect_fn(&frame))
            .await
            .map_err(|e| DetectionError::failed(format!("detector task panicked: {}", e)))?
    }
}
