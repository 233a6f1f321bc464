//! Camera contracts shared between the counting engine, its stores and the
//! serving layer.

use crate::validation;
use anyhow::{anyhow, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Static configuration of one monitored camera.
///
/// Loaded by the supervisor and handed to exactly one worker, which keeps it
/// unchanged for its whole lifetime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CameraConfig {
    /// Unique, stable camera identifier
    pub camera_id: String,

    /// Connection string of the video feed (RTSP, HLS, file path, ...)
    #[serde(alias = "rtsp_url")]
    pub source_uri: String,

    /// Human readable location label
    #[serde(default)]
    pub location_name: String,

    #[serde(default)]
    pub latitude: f64,

    #[serde(default)]
    pub longitude: f64,

    /// Normalized vertical position of the counting line (0.0 = top, 1.0 = bottom)
    #[serde(default = "default_line_position")]
    pub calibration_line_position: f64,
}

fn default_line_position() -> f64 {
    0.5
}

impl CameraConfig {
    pub fn new(camera_id: impl Into<String>, source_uri: impl Into<String>) -> Self {
        Self {
            camera_id: camera_id.into(),
            source_uri: source_uri.into(),
            location_name: String::new(),
            latitude: 0.0,
            longitude: 0.0,
            calibration_line_position: default_line_position(),
        }
    }

    pub fn with_line_position(mut self, position: f64) -> Self {
        self.calibration_line_position = position;
        self
    }

    pub fn with_location(mut self, name: impl Into<String>, latitude: f64, longitude: f64) -> Self {
        self.location_name = name.into();
        self.latitude = latitude;
        self.longitude = longitude;
        self
    }

    /// Check the fields a worker relies on.
    pub fn validate(&self) -> Result<()> {
        validation::validate_id(&self.camera_id, "camera_id")?;
        validation::validate_uri(&self.source_uri, "source_uri")?;
        if !self.calibration_line_position.is_finite() {
            return Err(anyhow!("calibration_line_position must be a finite number"));
        }
        validation::validate_range(
            self.calibration_line_position,
            0.0,
            1.0,
            "calibration_line_position",
        )?;
        Ok(())
    }
}

/// Lifecycle state of a camera worker, as seen by readers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Connecting,
    Streaming,
    Reconnecting,
    Stopped,
}

impl WorkerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerState::Connecting => "connecting",
            WorkerState::Streaming => "streaming",
            WorkerState::Reconnecting => "reconnecting",
            WorkerState::Stopped => "stopped",
        }
    }
}

/// JSON view of a camera's public state (the frame itself is served separately).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraStateView {
    pub camera_id: String,
    pub stream_state: WorkerState,
    pub today_count: BTreeMap<String, u64>,
    pub counts_date: NaiveDate,
    pub last_update_timestamp: Option<DateTime<Utc>>,
    pub frames_processed: u64,
    pub has_frame: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraListResponse {
    pub cameras: Vec<CameraConfig>,
}
