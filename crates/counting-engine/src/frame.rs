//! Per-frame data flowing through a camera pipeline.

use chrono::{DateTime, Utc};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A decoded video frame.
///
/// The pixel buffer sits behind an `Arc` so the detector and annotation stages
/// can run on the blocking pool without copying it.
#[derive(Debug, Clone)]
pub struct Frame {
    pub camera_id: String,
    /// Monotonic per-worker frame index
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub image: Arc<RgbImage>,
}

impl Frame {
    pub fn new(camera_id: impl Into<String>, timestamp: DateTime<Utc>, image: RgbImage) -> Self {
        Self {
            camera_id: camera_id.into(),
            sequence: 0,
            timestamp,
            image: Arc::new(image),
        }
    }

    /// A black frame of the given size
    pub fn blank(camera_id: impl Into<String>, width: u32, height: u32) -> Self {
        Self::new(camera_id, Utc::now(), RgbImage::new(width, height))
    }

    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Axis-aligned box in pixel coordinates (top-left origin).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Box of the given size centred on (cx, cy)
    pub fn centered(cx: f32, cy: f32, width: f32, height: f32) -> Self {
        Self::new(cx - width / 2.0, cy - height / 2.0, width, height)
    }

    pub fn centroid(&self) -> (f32, f32) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.width.is_finite() && self.height.is_finite()
    }
}

/// One object found in one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BoundingBox,
    #[serde(rename = "class")]
    pub label: String,
    pub confidence: f32,
}

impl Detection {
    pub fn new(bbox: BoundingBox, label: impl Into<String>, confidence: f32) -> Self {
        Self {
            bbox,
            label: label.into(),
            confidence,
        }
    }

    pub fn centroid(&self) -> (f32, f32) {
        self.bbox.centroid()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_centroid() {
        let bbox = BoundingBox::new(10.0, 20.0, 40.0, 60.0);
        assert_eq!(bbox.centroid(), (30.0, 50.0));

        let centered = BoundingBox::centered(100.0, 200.0, 50.0, 30.0);
        assert_eq!(centered.centroid(), (100.0, 200.0));
        assert_eq!(centered.x, 75.0);
    }

    #[test]
    fn test_blank_frame_dimensions() {
        let frame = Frame::blank("cam-1", 64, 48).with_sequence(7);
        assert_eq!(frame.width(), 64);
        assert_eq!(frame.height(), 48);
        assert_eq!(frame.sequence, 7);
    }

    #[test]
    fn test_detection_serializes_class_field() {
        let detection = Detection::new(BoundingBox::new(0.0, 0.0, 1.0, 1.0), "car", 0.9);
        let value = serde_json::to_value(&detection).unwrap();
        assert_eq!(value["class"], "car");
    }
}
