pub mod blocking;
pub mod filter;
pub mod remote;
pub mod scripted;
pub mod synthetic;

pub use blocking::BlockingDetector;
pub use filter::{DetectionFilter, FilteredDetector};
pub use remote::RemoteDetector;
pub use scripted::ScriptedDetector;
pub use synthetic::SyntheticTrafficDetector;

use crate::error::DetectionError;
use crate::frame::{Detection, Frame};
use async_trait::async_trait;

/// COCO class ids the counter cares about by default
pub const VEHICLE_CLASSES: [(u32, &str); 4] = [(2, "car"), (3, "motorcycle"), (5, "bus"), (7, "truck")];

/// Label for a COCO vehicle class id
pub fn vehicle_class_name(class_id: u32) -> Option<&'static str> {
    VEHICLE_CLASSES
        .iter()
        .find(|(id, _)| *id == class_id)
        .map(|(_, name)| *name)
}

/// Maps a frame to the objects visible in it.
///
/// Must not mutate the frame. Implementations may be slow; the worker awaits
/// them between shutdown checks and never cancels a call midway.
#[async_trait]
pub trait Detector: Send + Sync {
    fn name(&self) -> &'static str;

    async fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, DetectionError>;
}
