//! Frame source backed by an `ffmpeg` subprocess.
//!
//! ffmpeg decodes the camera URI and writes raw RGB24 frames of a fixed size to
//! stdout; every frame is exactly `width * height * 3` bytes.

use super::{FrameSource, FrameSourceFactory};
use crate::error::SourceError;
use crate::frame::Frame;
use async_trait::async_trait;
use chrono::Utc;
use common::CameraConfig;
use image::RgbImage;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct FfmpegSourceConfig {
    /// ffmpeg executable
    pub binary: String,
    /// Output frame width after scaling
    pub width: u32,
    /// Output frame height after scaling
    pub height: u32,
    /// Maximum wait for the first frame after spawning
    pub connect_timeout: Duration,
}

impl Default for FfmpegSourceConfig {
    fn default() -> Self {
        Self {
            binary: "ffmpeg".to_string(),
            width: 1280,
            height: 720,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FfmpegSourceFactory {
    config: FfmpegSourceConfig,
}

impl FfmpegSourceFactory {
    pub fn new(config: FfmpegSourceConfig) -> Self {
        Self { config }
    }

    fn build_args(&self, uri: &str) -> Vec<String> {
        let mut args = vec![
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-nostdin".to_string(),
        ];

        if uri.starts_with("rtsp://") || uri.starts_with("rtsps://") {
            args.push("-rtsp_transport".to_string());
            args.push("tcp".to_string());
        }

        args.extend([
            "-i".to_string(),
            uri.to_string(),
            "-an".to_string(),
            "-vf".to_string(),
            format!("scale={}:{}", self.config.width, self.config.height),
            "-pix_fmt".to_string(),
            "rgb24".to_string(),
            "-f".to_string(),
            "rawvideo".to_string(),
            "pipe:1".to_string(),
        ]);

        args
    }
}

#[async_trait]
impl FrameSourceFactory for FfmpegSourceFactory {
    async fn open(&self, camera: &CameraConfig) -> Result<Box<dyn FrameSource>, SourceError> {
        let args = self.build_args(&camera.source_uri);
        debug!(camera_id = %camera.camera_id, args = ?args, "spawning ffmpeg");

        let mut child = Command::new(&self.config.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SourceError::connection(format!("spawn {} failed: {}", self.config.binary, e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SourceError::connection("ffmpeg stdout not captured"))?;

        let mut source = FfmpegSource {
            camera_id: camera.camera_id.clone(),
            width: self.config.width,
            height: self.config.height,
            child,
            stdout,
            pending: None,
        };

        // A source counts as connected once the first frame arrives.
        let first = match tokio::time::timeout(self.config.connect_timeout, source.read_frame()).await {
            Ok(Ok(frame)) => frame,
            Ok(Err(e)) => {
                source.close().await;
                return Err(SourceError::connection(e.to_string()));
            }
            Err(_) => {
                source.close().await;
                return Err(SourceError::connection(format!(
                    "no frame within {:?}",
                    self.config.connect_timeout
                )));
            }
        };
        source.pending = Some(first);

        info!(camera_id = %camera.camera_id, "ffmpeg source connected");
        Ok(Box::new(source))
    }
}

pub struct FfmpegSource {
    camera_id: String,
    width: u32,
    height: u32,
    child: Child,
    stdout: ChildStdout,
    pending: Option<Frame>,
}

impl FfmpegSource {
    async fn read_frame(&mut self) -> Result<Frame, SourceError> {
        let frame_len = self.width as usize * self.height as usize * 3;
        let mut buf = vec![0u8; frame_len];

        self.stdout.read_exact(&mut buf).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                SourceError::stream_ended("ffmpeg closed its output")
            } else {
                SourceError::stream_ended(format!("read failed: {}", e))
            }
        })?;

        let image = RgbImage::from_raw(self.width, self.height, buf)
            .ok_or_else(|| SourceError::stream_ended("short frame buffer"))?;

        Ok(Frame::new(self.camera_id.clone(), Utc::now(), image))
    }
}

#[async_trait]
impl FrameSource for FfmpegSource {
    async fn next_frame(&mut self) -> Result<Frame, SourceError> {
        if let Some(frame) = self.pending.take() {
            return Ok(frame);
        }
        self.read_frame().await
    }

    async fn close(&mut self) {
        if let Err(e) = self.child.kill().await {
            warn!(camera_id = %self.camera_id, error = %e, "failed to stop ffmpeg");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rtsp_uses_tcp_transport() {
        let factory = FfmpegSourceFactory::new(FfmpegSourceConfig {
            width: 640,
            height: 360,
            ..Default::default()
        });

        let args = factory.build_args("rtsp://10.0.0.5:554/live");
        let transport = args.iter().position(|a| a == "-rtsp_transport").unwrap();
        assert_eq!(args[transport + 1], "tcp");
        assert!(args.contains(&"scale=640:360".to_string()));
        assert_eq!(args.last().unwrap(), "pipe:1");
    }

    #[test]
    fn test_file_source_has_no_rtsp_flags() {
        let factory = FfmpegSourceFactory::default();
        let args = factory.build_args("/var/video/sample.mp4");
        assert!(!args.contains(&"-rtsp_transport".to_string()));
        assert!(args.contains(&"rawvideo".to_string()));
    }

    #[tokio::test]
    async fn test_missing_binary_is_connection_error() {
        let factory = FfmpegSourceFactory::new(FfmpegSourceConfig {
            binary: "/nonexistent/ffmpeg-binary".to_string(),
            ..Default::default()
        });

        let camera = CameraConfig::new("cam-1", "rtsp://10.0.0.5/live");
        let result = factory.open(&camera).await;
        assert!(matches!(result, Err(SourceError::Connection(_))));
    }
}
