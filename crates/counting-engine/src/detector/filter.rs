use super::{Detector, VEHICLE_CLASSES};
use crate::error::DetectionError;
use crate::frame::{Detection, Frame};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Confidence threshold and class allow-list applied to raw detections
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionFilter {
    pub min_confidence: f32,
    /// Empty means every class is allowed
    pub classes: BTreeSet<String>,
}

impl Default for DetectionFilter {
    fn default() -> Self {
        Self {
            min_confidence: 0.25,
            classes: VEHICLE_CLASSES
                .iter()
                .map(|(_, name)| name.to_string())
                .collect(),
        }
    }
}

impl DetectionFilter {
    pub fn new(min_confidence: f32, classes: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            min_confidence,
            classes: classes.into_iter().map(Into::into).collect(),
        }
    }

    pub fn accepts(&self, detection: &Detection) -> bool {
        detection.confidence >= self.min_confidence
            && detection.bbox.is_finite()
            && (self.classes.is_empty() || self.classes.contains(&detection.label))
    }

    /// Drop rejected detections, keeping the order of the rest
    pub fn apply(&self, detections: Vec<Detection>) -> Vec<Detection> {
        detections.into_iter().filter(|d| self.accepts(d)).collect()
    }
}

/// Wraps a detector so the tracker only ever sees accepted detections.
pub struct FilteredDetector {
    inner: Arc<dyn Detector>,
    filter: DetectionFilter,
}

impl FilteredDetector {
    pub fn new(inner: Arc<dyn Detector>, filter: DetectionFilter) -> Self {
        Self { inner, filter }
    }

    pub fn filter(&self) -> &DetectionFilter {
        &self.filter
    }
}

#[async_trait]
impl Detector for FilteredDetector {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    async fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, DetectionError> {
        let raw = self.inner.detect(frame).await?;
        Ok(self.filter.apply(raw))
    }
}
