//! Per-camera control loop: connect, then pull, detect, track, count and
//! publish until the stream drops or shutdown is requested.

use crate::annotation::{annotate, load_label_font, TrackOverlay};
use crate::detector::Detector;
use crate::error::SourceError;
use crate::event_sink::{CameraEventSink, EventSink};
use crate::frame::Frame;
use crate::shared_state::{CountDelta, SharedStateStore};
use crate::source::{FrameSource, FrameSourceFactory};
use crate::tracking::{CountingRule, CrossingEvaluator, Tracker, TrackerConfig};
use ab_glyph::FontArc;
use anyhow::Result;
use common::{CameraConfig, CrossingEvent, PersistenceError, WorkerState};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use telemetry::metrics::{
    ACTIVE_TRACKS, CROSSINGS, DETECTIONS, DETECTION_LATENCY, FRAMES_PROCESSED, FRAMES_SKIPPED,
    RECONNECTS,
};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Exponential backoff: `start * 2^(attempt-1)`, capped at `max`.
pub fn backoff_delay(start_ms: u64, max_ms: u64, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(32);
    let delay = start_ms.saturating_mul(1u64 << exponent).min(max_ms.max(start_ms));
    Duration::from_millis(delay)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub backoff_start_ms: u64,
    pub backoff_max_ms: u64,
    /// Tracks survive a reconnect shorter than this
    pub track_staleness_secs: u64,
    pub jpeg_quality: u8,
    /// TTF for box captions; `None` draws boxes only
    pub label_font: Option<PathBuf>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            backoff_start_ms: 500,
            backoff_max_ms: 10_000,
            track_staleness_secs: 5,
            jpeg_quality: 80,
            label_font: None,
        }
    }
}

/// Settings shared by every camera's pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub tracker: TrackerConfig,
    pub rule: CountingRule,
    pub meters_per_pixel: f64,
    pub worker: WorkerConfig,
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self {
            meters_per_pixel: 0.1,
            ..Default::default()
        }
    }
}

/// Everything a worker borrows from the engine.
#[derive(Clone)]
pub struct WorkerContext {
    pub source_factory: Arc<dyn FrameSourceFactory>,
    pub detector: Arc<dyn Detector>,
    pub shared: SharedStateStore,
    pub events: EventSink,
    pub pipeline: PipelineConfig,
}

enum StreamOutcome {
    Shutdown,
    Ended { error: SourceError, frames: u64 },
    /// The camera's event queue is closed; a fresh worker gets a new one
    EventsLost(PersistenceError),
}

pub struct CameraWorker {
    camera: CameraConfig,
    ctx: WorkerContext,
    tracker: Tracker,
    evaluator: CrossingEvaluator,
    label_font: Option<FontArc>,
    sequence: u64,
}

impl CameraWorker {
    pub fn new(camera: CameraConfig, ctx: WorkerContext) -> Self {
        let tracker = Tracker::new(ctx.pipeline.tracker.clone());
        let evaluator = CrossingEvaluator::new(
            camera.camera_id.clone(),
            camera.calibration_line_position,
            ctx.pipeline.rule,
            ctx.pipeline.meters_per_pixel,
        );
        let label_font = ctx.pipeline.worker.label_font.as_deref().and_then(load_label_font);
        Self {
            camera,
            ctx,
            tracker,
            evaluator,
            label_font,
            sequence: 0,
        }
    }

    pub fn camera_id(&self) -> &str {
        &self.camera.camera_id
    }

    async fn set_state(&self, state: WorkerState) {
        self.ctx
            .shared
            .set_stream_state(&self.camera.camera_id, state)
            .await;
    }

    /// Run until `shutdown` fires. Returns `Err` only for abnormal stops,
    /// including loss of the camera's event delivery task.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<()> {
        self.camera.validate()?;

        let camera_id = self.camera.camera_id.clone();
        self.ctx.shared.register(&camera_id);
        let sink = self.ctx.events.camera_sink(&camera_id);

        info!(
            camera_id = %camera_id,
            line_position = self.evaluator.line_position(),
            detector = self.ctx.detector.name(),
            "camera worker started"
        );

        let result = self.connection_loop(&sink, &shutdown).await;

        self.set_state(WorkerState::Stopped).await;
        ACTIVE_TRACKS.with_label_values(&[camera_id.as_str()]).set(0);
        sink.close_within(Duration::from_secs(10)).await;
        info!(camera_id = %camera_id, frames = self.sequence, "camera worker stopped");
        result?;
        Ok(())
    }

    async fn connection_loop(
        &mut self,
        sink: &CameraEventSink,
        shutdown: &CancellationToken,
    ) -> Result<(), PersistenceError> {
        let config = self.ctx.pipeline.worker.clone();
        let staleness = Duration::from_secs(config.track_staleness_secs);
        let mut attempts: u32 = 0;
        let mut disconnected_at: Option<Instant> = None;

        loop {
            self.set_state(WorkerState::Connecting).await;

            let opened = tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                opened = self.ctx.source_factory.open(&self.camera) => opened,
            };

            let error = match opened {
                Ok(mut source) => {
                    if let Some(since) = disconnected_at.take() {
                        let outage = since.elapsed();
                        if outage > staleness && !self.tracker.is_empty() {
                            info!(
                                camera_id = %self.camera.camera_id,
                                outage_ms = outage.as_millis() as u64,
                                dropped_tracks = self.tracker.len(),
                                "reconnect exceeded staleness window, discarding tracks"
                            );
                            self.tracker.clear();
                        }
                    }

                    self.set_state(WorkerState::Streaming).await;
                    info!(camera_id = %self.camera.camera_id, "streaming");

                    let outcome = self.stream(source.as_mut(), sink, shutdown).await;
                    source.close().await;

                    match outcome {
                        StreamOutcome::Shutdown => return Ok(()),
                        StreamOutcome::EventsLost(e) => return Err(e),
                        StreamOutcome::Ended { error, frames } => {
                            attempts = if frames > 0 { 1 } else { attempts + 1 };
                            disconnected_at = Some(Instant::now());
                            error
                        }
                    }
                }
                Err(error) => {
                    attempts += 1;
                    disconnected_at.get_or_insert_with(Instant::now);
                    error
                }
            };

            self.set_state(WorkerState::Reconnecting).await;
            RECONNECTS
                .with_label_values(&[self.camera.camera_id.as_str()])
                .inc();

            let delay = backoff_delay(config.backoff_start_ms, config.backoff_max_ms, attempts);
            warn!(
                camera_id = %self.camera.camera_id,
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "stream unavailable, reconnecting"
            );

            tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn stream(
        &mut self,
        source: &mut dyn FrameSource,
        sink: &CameraEventSink,
        shutdown: &CancellationToken,
    ) -> StreamOutcome {
        let mut frames = 0u64;

        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return StreamOutcome::Shutdown,
                next = source.next_frame() => next,
            };

            let frame = match next {
                Ok(frame) => frame.with_sequence(self.sequence),
                Err(error) => return StreamOutcome::Ended { error, frames },
            };
            self.sequence += 1;
            frames += 1;

            if let Err(e) = self.process_frame(frame, sink, shutdown).await {
                return StreamOutcome::EventsLost(e);
            }

            if shutdown.is_cancelled() {
                return StreamOutcome::Shutdown;
            }
        }
    }

    /// Detect, track, count, annotate and publish one frame.
    async fn process_frame(
        &mut self,
        frame: Frame,
        sink: &CameraEventSink,
        shutdown: &CancellationToken,
    ) -> Result<(), PersistenceError> {
        let camera_id = self.camera.camera_id.clone();
        let labels = [camera_id.as_str()];

        let started = Instant::now();
        let detections = match self.ctx.detector.detect(&frame).await {
            Ok(detections) => detections,
            Err(e) => {
                FRAMES_SKIPPED.with_label_values(&[camera_id.as_str(), "detect"]).inc();
                warn!(
                    camera_id = %camera_id,
                    sequence = frame.sequence,
                    error = %e,
                    "detection failed, skipping frame"
                );
                return Ok(());
            }
        };
        DETECTION_LATENCY
            .with_label_values(&labels)
            .observe(started.elapsed().as_secs_f64());
        DETECTIONS.with_label_values(&labels).inc_by(detections.len() as u64);

        if shutdown.is_cancelled() {
            return Ok(());
        }

        let matched = self.tracker.update(&detections, frame.sequence, frame.timestamp);
        let height = frame.height();
        let mut events: Vec<CrossingEvent> = Vec::new();
        for track_id in matched {
            if let Some(track) = self.tracker.get_mut(track_id) {
                if let Some(event) = self.evaluator.evaluate(track, height) {
                    events.push(event);
                }
            }
        }
        ACTIVE_TRACKS
            .with_label_values(&labels)
            .set(self.tracker.len() as i64);

        let mut delta = CountDelta::new();
        for event in &events {
            *delta.entry(event.vehicle_class.clone()).or_insert(0) += 1;
            CROSSINGS
                .with_label_values(&[camera_id.as_str(), event.vehicle_class.as_str()])
                .inc();
            info!(
                camera_id = %camera_id,
                track_id = event.track_id,
                vehicle_class = %event.vehicle_class,
                direction = event.direction.as_str(),
                speed_kmh = ?event.speed_kmh,
                "vehicle crossed counting line"
            );
        }

        let meters_per_pixel = self.ctx.pipeline.meters_per_pixel;
        let overlays: Vec<TrackOverlay> = self
            .tracker
            .tracks()
            .map(|track| TrackOverlay::new(track, meters_per_pixel))
            .collect();
        let line_position = self.evaluator.line_position();
        let quality = self.ctx.pipeline.worker.jpeg_quality;
        let font = self.label_font.clone();
        let sequence = frame.sequence;
        let annotated = tokio::task::spawn_blocking(move || {
            annotate(&frame, line_position, &overlays, font.as_ref(), quality)
        })
        .await;

        match annotated {
            Ok(Ok(jpeg)) => self.ctx.shared.publish(&camera_id, jpeg, &delta).await,
            Ok(Err(e)) => {
                FRAMES_SKIPPED.with_label_values(&[camera_id.as_str(), "annotate"]).inc();
                warn!(camera_id = %camera_id, sequence, error = %e, "annotation failed, keeping previous frame");
                self.ctx.shared.publish_counts(&camera_id, &delta).await;
            }
            Err(e) => {
                FRAMES_SKIPPED.with_label_values(&[camera_id.as_str(), "annotate"]).inc();
                warn!(camera_id = %camera_id, sequence, error = %e, "annotation task failed, keeping previous frame");
                self.ctx.shared.publish_counts(&camera_id, &delta).await;
            }
        }
        FRAMES_PROCESSED.with_label_values(&labels).inc();

        // The sink logs and counts every drop; only a closed queue stops the worker
        let mut closed = None;
        for event in events {
            if let Err(e @ PersistenceError::QueueClosed(_)) = sink.submit(event) {
                closed = Some(e);
            }
        }
        if let Some(e) = closed {
            return Err(e);
        }

        debug!(camera_id = %camera_id, sequence, tracks = self.tracker.len(), "frame processed");
        Ok(())
    }
}
