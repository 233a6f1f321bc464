pub mod ffmpeg;
pub mod synthetic;

pub use ffmpeg::{FfmpegSourceConfig, FfmpegSourceFactory};
pub use synthetic::{OpenOutcome, SyntheticSourceFactory};

use crate::error::SourceError;
use crate::frame::Frame;
use async_trait::async_trait;
use common::CameraConfig;

/// An open video connection.
///
/// Holds its transport resources until `close` is called or it is dropped.
/// Implementations never retry; reconnecting is the worker's job.
#[async_trait]
pub trait FrameSource: Send {
    /// Next decoded frame in capture order
    async fn next_frame(&mut self) -> Result<Frame, SourceError>;

    /// Release the connection
    async fn close(&mut self) {}
}

/// Opens frame sources from camera connection strings.
#[async_trait]
pub trait FrameSourceFactory: Send + Sync {
    async fn open(&self, camera: &CameraConfig) -> Result<Box<dyn FrameSource>, SourceError>;
}
