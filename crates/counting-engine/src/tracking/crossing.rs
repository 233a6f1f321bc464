//! Line-crossing decisions and speed estimates.

use super::tracker::{CrossingState, Track, TrackPoint};
use common::{CrossingDirection, CrossingEvent};
use serde::{Deserialize, Serialize};

/// Which crossings count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountingRule {
    pub directional: bool,
    /// Only consulted when `directional` is set
    pub count_direction: CrossingDirection,
}

impl Default for CountingRule {
    fn default() -> Self {
        Self {
            directional: false,
            count_direction: CrossingDirection::Down,
        }
    }
}

impl CountingRule {
    pub fn only(direction: CrossingDirection) -> Self {
        Self {
            directional: true,
            count_direction: direction,
        }
    }

    pub fn counts(&self, direction: CrossingDirection) -> bool {
        !self.directional || self.count_direction == direction
    }
}

/// Speed between two samples, or `None` without a positive time delta.
pub fn estimate_speed_kmh(prev: &TrackPoint, curr: &TrackPoint, meters_per_pixel: f64) -> Option<f64> {
    let dt_ms = (curr.timestamp - prev.timestamp).num_milliseconds();
    if dt_ms <= 0 {
        return None;
    }
    let dx = (curr.x - prev.x) as f64;
    let dy = (curr.y - prev.y) as f64;
    let meters = (dx * dx + dy * dy).sqrt() * meters_per_pixel;
    let speed = meters / (dt_ms as f64 / 1000.0) * 3.6;
    speed.is_finite().then_some(speed)
}

/// Decides, per track, whether its latest move crossed the calibration line.
///
/// The line position is fixed when the evaluator is built, which happens once
/// per worker lifetime.
#[derive(Debug, Clone)]
pub struct CrossingEvaluator {
    camera_id: String,
    line_position: f64,
    rule: CountingRule,
    meters_per_pixel: f64,
}

impl CrossingEvaluator {
    pub fn new(camera_id: impl Into<String>, line_position: f64, rule: CountingRule, meters_per_pixel: f64) -> Self {
        Self {
            camera_id: camera_id.into(),
            line_position: line_position.clamp(0.0, 1.0),
            rule,
            meters_per_pixel,
        }
    }

    pub fn line_position(&self) -> f64 {
        self.line_position
    }

    pub fn line_y(&self, frame_height: u32) -> f64 {
        self.line_position * frame_height as f64
    }

    /// Direction of the latest move across the line, if any
    pub fn crossing_direction(&self, track: &Track, frame_height: u32) -> Option<CrossingDirection> {
        let prev = track.previous_position()?.y as f64;
        let curr = track.last_position()?.y as f64;
        let line = self.line_y(frame_height);

        if prev < line && curr >= line {
            Some(CrossingDirection::Down)
        } else if prev > line && curr <= line {
            Some(CrossingDirection::Up)
        } else {
            None
        }
    }

    /// Mark the track crossed and build its event, at most once per track.
    pub fn evaluate(&self, track: &mut Track, frame_height: u32) -> Option<CrossingEvent> {
        if track.crossing_state == CrossingState::Crossed {
            return None;
        }

        let direction = self.crossing_direction(track, frame_height)?;
        if !self.rule.counts(direction) {
            return None;
        }

        let prev = track.previous_position()?;
        let curr = track.last_position()?;
        let speed = estimate_speed_kmh(prev, curr, self.meters_per_pixel);
        let timestamp = curr.timestamp;

        track.crossing_state = CrossingState::Crossed;

        Some(
            CrossingEvent::new(
                self.camera_id.clone(),
                track.class_label(),
                timestamp,
                track.track_id,
                direction,
            )
            .with_speed(speed),
        )
    }
}
