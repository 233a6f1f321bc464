use super::{Detector, VEHICLE_CLASSES};
use crate::error::DetectionError;
use crate::frame::{BoundingBox, Detection, Frame};
use async_trait::async_trait;

/// Deterministic traffic for running the engine without a model.
///
/// Vehicle `k` enters at the top of lane `k % lanes` on frame
/// `k * spawn_every` and reaches the bottom `transit_frames` later. Classes
/// rotate through the vehicle classes.
#[derive(Debug, Clone)]
pub struct SyntheticTrafficDetector {
    pub spawn_every: u64,
    pub transit_frames: u64,
    pub lanes: u32,
}

impl Default for SyntheticTrafficDetector {
    fn default() -> Self {
        Self {
            spawn_every: 15,
            transit_frames: 40,
            lanes: 3,
        }
    }
}

impl SyntheticTrafficDetector {
    pub fn detections_for(&self, sequence: u64, width: u32, height: u32) -> Vec<Detection> {
        let spawn_every = self.spawn_every.max(1);
        let transit = self.transit_frames.max(1);
        let lanes = self.lanes.max(1);

        let lane_width = width as f32 / lanes as f32;
        let box_w = (lane_width * 0.5).max(1.0);
        let box_h = (height as f32 / 8.0).max(1.0);

        let first = sequence.saturating_sub(transit) / spawn_every;
        let last = sequence / spawn_every;

        (first..=last)
            .filter_map(|k| {
                let age = sequence.checked_sub(k * spawn_every)?;
                if age > transit {
                    return None;
                }
                let cy = age as f32 / transit as f32 * height as f32;
                let lane = (k % lanes as u64) as f32;
                let cx = (lane + 0.5) * lane_width;
                let (_, label) = VEHICLE_CLASSES[(k % VEHICLE_CLASSES.len() as u64) as usize];
                Some(Detection::new(
                    BoundingBox::centered(cx, cy, box_w, box_h),
                    label,
                    0.9,
                ))
            })
            .collect()
    }
}

#[async_trait]
impl Detector for SyntheticTrafficDetector {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    async fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, DetectionError> {
        Ok(self.detections_for(frame.sequence, frame.width(), frame.height()))
    }
}
