use super::Detector;
use crate::error::DetectionError;
use crate::frame::{Detection, Frame};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};

/// Returns programmed detections keyed by frame sequence.
///
/// Frames without an entry yield no detections; sequences marked as failing
/// return a `DetectionError`.
#[derive(Debug, Clone, Default)]
pub struct ScriptedDetector {
    frames: HashMap<u64, Vec<Detection>>,
    failures: HashSet<u64>,
}

impl ScriptedDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_frame(mut self, sequence: u64, detections: Vec<Detection>) -> Self {
        self.frames.insert(sequence, detections);
        self
    }

    /// Program consecutive frames starting at `first_sequence`
    pub fn with_frames(mut self, first_sequence: u64, frames: impl IntoIterator<Item = Vec<Detection>>) -> Self {
        for (offset, detections) in frames.into_iter().enumerate() {
            self.frames.insert(first_sequence + offset as u64, detections);
        }
        self
    }

    pub fn with_failure(mut self, sequence: u64) -> Self {
        self.failures.insert(sequence);
        self
    }
}

#[async_trait]
impl Detector for ScriptedDetector {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, DetectionError> {
        if self.failures.contains(&frame.sequence) {
            return Err(DetectionError::failed(format!(
                "scripted failure at frame {}",
                frame.sequence
            )));
        }
        Ok(self.frames.get(&frame.sequence).cloned().unwrap_or_default())
    }
}
