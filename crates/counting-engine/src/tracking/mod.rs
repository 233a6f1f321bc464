pub mod crossing;
pub mod tracker;

pub use crossing::{estimate_speed_kmh, CountingRule, CrossingEvaluator};
pub use tracker::{CrossingState, Track, TrackPoint, Tracker, TrackerConfig};
