//! Crossing events and the daily statistics derived from them.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Direction in which a track passed the calibration line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrossingDirection {
    /// Top to bottom (increasing y)
    Down,
    /// Bottom to top (decreasing y)
    Up,
}

impl CrossingDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            CrossingDirection::Down => "down",
            CrossingDirection::Up => "up",
        }
    }
}

impl std::str::FromStr for CrossingDirection {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "down" => Ok(CrossingDirection::Down),
            "up" => Ok(CrossingDirection::Up),
            other => Err(anyhow::anyhow!("unknown crossing direction '{}'", other)),
        }
    }
}

/// A confirmed line crossing. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossingEvent {
    /// Deduplication key for persistence
    pub event_id: Uuid,
    pub camera_id: String,
    pub vehicle_class: String,
    pub timestamp: DateTime<Utc>,
    pub track_id: u64,
    pub direction: CrossingDirection,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed_kmh: Option<f64>,
}

impl CrossingEvent {
    pub fn new(
        camera_id: impl Into<String>,
        vehicle_class: impl Into<String>,
        timestamp: DateTime<Utc>,
        track_id: u64,
        direction: CrossingDirection,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            camera_id: camera_id.into(),
            vehicle_class: vehicle_class.into(),
            timestamp,
            track_id,
            direction,
            speed_kmh: None,
        }
    }

    pub fn with_speed(mut self, speed_kmh: Option<f64>) -> Self {
        self.speed_kmh = speed_kmh;
        self
    }
}

/// Per-camera, per-day aggregate served to dashboards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyStats {
    pub camera_id: String,
    pub date: NaiveDate,
    pub counts: BTreeMap<String, u64>,
    pub total: u64,
    pub average_speed_kmh: f64,
}

impl DailyStats {
    /// Aggregate a day's events. Events without a speed estimate do not affect
    /// the average.
    pub fn from_events<'a>(
        camera_id: &str,
        date: NaiveDate,
        events: impl IntoIterator<Item = &'a CrossingEvent>,
    ) -> Self {
        let mut counts = BTreeMap::new();
        let mut total = 0u64;
        let mut speed_sum = 0.0;
        let mut speed_samples = 0u64;

        for event in events {
            *counts.entry(event.vehicle_class.clone()).or_insert(0) += 1;
            total += 1;
            if let Some(speed) = event.speed_kmh {
                speed_sum += speed;
                speed_samples += 1;
            }
        }

        let average_speed_kmh = if speed_samples > 0 {
            ((speed_sum / speed_samples as f64) * 100.0).round() / 100.0
        } else {
            0.0
        };

        Self {
            camera_id: camera_id.to_string(),
            date,
            counts,
            total,
            average_speed_kmh,
        }
    }
}
