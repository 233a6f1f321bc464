use crate::detector::DetectionFilter;
use crate::event_sink::EventSinkConfig;
use crate::source::FfmpegSourceConfig;
use crate::supervisor::{RestartPolicy, SupervisorConfig};
use crate::tracking::{CountingRule, TrackerConfig};
use crate::worker::{PipelineConfig, WorkerConfig};
use anyhow::{anyhow, bail, Context, Result};
use common::CrossingDirection;
use reqwest::Url;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_LABEL_FONT: &str = "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf";

#[derive(Debug, Clone, PartialEq)]
pub enum CameraStoreKind {
    /// Synthetic demo cameras held in memory
    Memory { demo_cameras: usize },
    /// YAML file
    File { path: PathBuf },
    /// PostgreSQL `cameras` table
    Postgres,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DetectorKind {
    Synthetic,
    Remote { url: Url, timeout: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Ffmpeg,
    Synthetic,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub bind_addr: String,
    pub camera_store: CameraStoreKind,
    /// Events go to PostgreSQL when set, otherwise to memory
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub detector: DetectorKind,
    pub filter: DetectionFilter,
    pub source: SourceKind,
    pub ffmpeg: FfmpegSourceConfig,
    pub pipeline: PipelineConfig,
    pub events: EventSinkConfig,
    pub supervisor: SupervisorConfig,
}

fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .with_context(|| format!("invalid {}: '{}'", key, value)),
        _ => Ok(default),
    }
}

fn env_opt<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("invalid {}: '{}'", key, value)),
        _ => Ok(None),
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self> {
        let bind_addr = env::var("ENGINE_ADDR").unwrap_or_else(|_| "0.0.0.0:8090".to_string());

        let database_url = env::var("DATABASE_URL").ok().filter(|s| !s.is_empty());
        let camera_store = match env::var("CAMERA_STORE")
            .unwrap_or_else(|_| "memory".to_string())
            .to_lowercase()
            .as_str()
        {
            "memory" => CameraStoreKind::Memory {
                demo_cameras: env_parse("DEMO_CAMERAS", 2)?,
            },
            "file" => CameraStoreKind::File {
                path: PathBuf::from(
                    env::var("CAMERAS_FILE").unwrap_or_else(|_| "cameras.yaml".to_string()),
                ),
            },
            "postgres" => {
                if database_url.is_none() {
                    bail!("CAMERA_STORE=postgres requires DATABASE_URL");
                }
                CameraStoreKind::Postgres
            }
            other => bail!("unknown CAMERA_STORE '{}'", other),
        };

        let detector = match env::var("DETECTOR")
            .unwrap_or_else(|_| "synthetic".to_string())
            .to_lowercase()
            .as_str()
        {
            "synthetic" => DetectorKind::Synthetic,
            "remote" => {
                let url = env::var("DETECTOR_URL").context("DETECTOR=remote requires DETECTOR_URL")?;
                DetectorKind::Remote {
                    url: Url::parse(&url).context("Invalid DETECTOR_URL")?,
                    timeout: Duration::from_millis(env_parse("DETECTOR_TIMEOUT_MS", 5_000)?),
                }
            }
            other => bail!("unknown DETECTOR '{}'", other),
        };

        let mut filter = DetectionFilter {
            min_confidence: env_parse("DETECTOR_MIN_CONFIDENCE", 0.25)?,
            ..Default::default()
        };
        if let Ok(classes) = env::var("DETECTOR_CLASSES") {
            filter.classes = classes
                .split(',')
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())
                .collect();
        }

        // Demo cameras only make sense with synthetic frames
        let default_source = match camera_store {
            CameraStoreKind::Memory { .. } => "synthetic",
            _ => "ffmpeg",
        };
        let source = match env::var("FRAME_SOURCE")
            .unwrap_or_else(|_| default_source.to_string())
            .to_lowercase()
            .as_str()
        {
            "ffmpeg" => SourceKind::Ffmpeg,
            "synthetic" => SourceKind::Synthetic,
            other => bail!("unknown FRAME_SOURCE '{}'", other),
        };

        let ffmpeg = FfmpegSourceConfig {
            binary: env::var("FFMPEG_BIN").unwrap_or_else(|_| "ffmpeg".to_string()),
            width: env_parse("FRAME_WIDTH", 1280)?,
            height: env_parse("FRAME_HEIGHT", 720)?,
            connect_timeout: Duration::from_secs(env_parse("SOURCE_CONNECT_TIMEOUT_SECS", 10)?),
        };
        if ffmpeg.width == 0 || ffmpeg.height == 0 {
            bail!("FRAME_WIDTH and FRAME_HEIGHT must be positive");
        }

        let tracker_defaults = TrackerConfig::default();
        let tracker = TrackerConfig {
            max_match_distance: env_parse("TRACKER_MAX_MATCH_DISTANCE", tracker_defaults.max_match_distance)?,
            class_mismatch_weight: env_parse(
                "TRACKER_CLASS_MISMATCH_WEIGHT",
                tracker_defaults.class_mismatch_weight,
            )?,
            max_missed_frames: env_parse("TRACKER_MAX_MISSED_FRAMES", tracker_defaults.max_missed_frames)?,
            history_len: env_parse("TRACKER_HISTORY_LEN", tracker_defaults.history_len)?,
        };

        let rule = match env_opt::<String>("COUNT_DIRECTION")? {
            None => CountingRule::default(),
            Some(value) if value.eq_ignore_ascii_case("both") => CountingRule::default(),
            Some(value) => CountingRule::only(
                value
                    .parse::<CrossingDirection>()
                    .map_err(|e| anyhow!("invalid COUNT_DIRECTION: {}", e))?,
            ),
        };

        let worker_defaults = WorkerConfig::default();
        let worker = WorkerConfig {
            backoff_start_ms: env_parse("WORKER_BACKOFF_START_MS", worker_defaults.backoff_start_ms)?,
            backoff_max_ms: env_parse("WORKER_BACKOFF_MAX_MS", worker_defaults.backoff_max_ms)?,
            track_staleness_secs: env_parse(
                "WORKER_TRACK_STALENESS_SECS",
                worker_defaults.track_staleness_secs,
            )?,
            jpeg_quality: env_parse("WORKER_JPEG_QUALITY", worker_defaults.jpeg_quality)?,
            label_font: match env::var("LABEL_FONT") {
                Ok(path) if path.trim().is_empty() => None,
                Ok(path) => Some(PathBuf::from(path)),
                Err(_) => Some(PathBuf::from(DEFAULT_LABEL_FONT)),
            },
        };

        let pipeline = PipelineConfig {
            tracker,
            rule,
            meters_per_pixel: env_parse("METERS_PER_PIXEL", 0.1)?,
            worker,
        };

        let event_defaults = EventSinkConfig::default();
        let events = EventSinkConfig {
            max_attempts: env_parse("EVENT_MAX_ATTEMPTS", event_defaults.max_attempts)?,
            retry_backoff_ms: env_parse("EVENT_RETRY_BACKOFF_MS", event_defaults.retry_backoff_ms)?,
            queue_capacity: env_parse("EVENT_QUEUE_CAPACITY", event_defaults.queue_capacity)?,
        };

        let restart_defaults = RestartPolicy::default();
        let supervisor = SupervisorConfig {
            restart: RestartPolicy {
                max_restarts: env_parse("RESTART_MAX_RETRIES", restart_defaults.max_restarts)?,
                backoff_start_ms: env_parse("RESTART_BACKOFF_MS_START", restart_defaults.backoff_start_ms)?,
                backoff_max_ms: env_parse("RESTART_BACKOFF_MS_MAX", restart_defaults.backoff_max_ms)?,
            },
            refresh_interval_secs: env_opt("CONFIG_REFRESH_SECS")?,
            sweep_interval_secs: env_parse("SWEEP_INTERVAL_SECS", 60)?,
            event_retention_days: env_parse("EVENT_RETENTION_DAYS", 7)?,
        };

        Ok(Self {
            bind_addr,
            camera_store,
            database_url,
            database_max_connections: env_parse("DATABASE_MAX_CONNECTIONS", 5)?,
            detector,
            filter,
            source,
            ffmpeg,
            pipeline,
            events,
            supervisor,
        })
    }
}
