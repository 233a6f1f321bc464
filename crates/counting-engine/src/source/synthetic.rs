//! Deterministic in-process frame source for demos and tests.

use super::{FrameSource, FrameSourceFactory};
use crate::error::SourceError;
use crate::frame::Frame;
use async_trait::async_trait;
use chrono::Utc;
use common::CameraConfig;
use image::RgbImage;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Scripted result of one `open` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenOutcome {
    /// Refuse the connection
    Fail,
    /// Connect and end the stream after this many frames
    EndAfter(u64),
    /// Connect and stream until closed
    Unlimited,
}

/// Produces black frames of a fixed size.
///
/// Per-camera scripts control what successive `open` calls do; once a
/// camera's script is exhausted every open yields an unlimited stream.
#[derive(Clone)]
pub struct SyntheticSourceFactory {
    width: u32,
    height: u32,
    frame_interval: Duration,
    scripts: Arc<Mutex<HashMap<String, VecDeque<OpenOutcome>>>>,
    opens: Arc<AtomicU64>,
}

impl SyntheticSourceFactory {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            frame_interval: Duration::ZERO,
            scripts: Arc::new(Mutex::new(HashMap::new())),
            opens: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Pace frames like a live camera
    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = interval;
        self
    }

    pub fn with_script(self, camera_id: &str, outcomes: impl IntoIterator<Item = OpenOutcome>) -> Self {
        self.push_script(camera_id, outcomes);
        self
    }

    pub fn push_script(&self, camera_id: &str, outcomes: impl IntoIterator<Item = OpenOutcome>) {
        let mut scripts = self.scripts.lock().unwrap_or_else(|e| e.into_inner());
        scripts
            .entry(camera_id.to_string())
            .or_default()
            .extend(outcomes);
    }

    /// Number of `open` calls seen so far, across all cameras
    pub fn open_count(&self) -> u64 {
        self.opens.load(Ordering::SeqCst)
    }

    fn next_outcome(&self, camera_id: &str) -> OpenOutcome {
        let mut scripts = self.scripts.lock().unwrap_or_else(|e| e.into_inner());
        scripts
            .get_mut(camera_id)
            .and_then(|script| script.pop_front())
            .unwrap_or(OpenOutcome::Unlimited)
    }
}

#[async_trait]
impl FrameSourceFactory for SyntheticSourceFactory {
    async fn open(&self, camera: &CameraConfig) -> Result<Box<dyn FrameSource>, SourceError> {
        self.opens.fetch_add(1, Ordering::SeqCst);

        let remaining = match self.next_outcome(&camera.camera_id) {
            OpenOutcome::Fail => {
                return Err(SourceError::connection(format!(
                    "synthetic connection to {} refused",
                    camera.source_uri
                )))
            }
            OpenOutcome::EndAfter(frames) => Some(frames),
            OpenOutcome::Unlimited => None,
        };

        Ok(Box::new(SyntheticSource {
            camera_id: camera.camera_id.clone(),
            width: self.width,
            height: self.height,
            frame_interval: self.frame_interval,
            remaining,
        }))
    }
}

struct SyntheticSource {
    camera_id: String,
    width: u32,
    height: u32,
    frame_interval: Duration,
    remaining: Option<u64>,
}

#[async_trait]
impl FrameSource for SyntheticSource {
    async fn next_frame(&mut self) -> Result<Frame, SourceError> {
        if let Some(remaining) = self.remaining.as_mut() {
            if *remaining == 0 {
                return Err(SourceError::stream_ended("synthetic stream finished"));
            }
            *remaining -= 1;
        }

        if !self.frame_interval.is_zero() {
            tokio::time::sleep(self.frame_interval).await;
        } else {
            tokio::task::yield_now().await;
        }

        Ok(Frame::new(
            self.camera_id.clone(),
            Utc::now(),
            RgbImage::new(self.width, self.height),
        ))
    }
}
