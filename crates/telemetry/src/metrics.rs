use lazy_static::lazy_static;
use prometheus::core::{Collector, MetricVec, MetricVecBuilder};
use prometheus::{
    HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry,
};
use std::collections::HashMap;

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // ==== Worker pipeline ====
    pub static ref FRAMES_PROCESSED: IntCounterVec = {
        let metric = IntCounterVec::new(
            Opts::new("engine_frames_processed_total", "Frames published per camera"),
            &["camera_id"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref FRAMES_SKIPPED: IntCounterVec = {
        let metric = IntCounterVec::new(
            Opts::new(
                "engine_frames_skipped_total",
                "Frames dropped because a pipeline stage failed",
            ),
            &["camera_id", "stage"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref DETECTIONS: IntCounterVec = {
        let metric = IntCounterVec::new(
            Opts::new("engine_detections_total", "Detections accepted by the filter"),
            &["camera_id"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref DETECTION_LATENCY: HistogramVec = {
        let metric = HistogramVec::new(
            HistogramOpts::new(
                "engine_detection_latency_seconds",
                "Time spent in the detector per frame",
            )
            .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]),
            &["camera_id"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref ACTIVE_TRACKS: IntGaugeVec = {
        let metric = IntGaugeVec::new(
            Opts::new("engine_active_tracks", "Live tracks per camera"),
            &["camera_id"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref CROSSINGS: IntCounterVec = {
        let metric = IntCounterVec::new(
            Opts::new("engine_crossings_total", "Confirmed line crossings"),
            &["camera_id", "vehicle_class"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    // ==== Connection lifecycle ====
    pub static ref RECONNECTS: IntCounterVec = {
        let metric = IntCounterVec::new(
            Opts::new("engine_reconnects_total", "Stream reconnect attempts"),
            &["camera_id"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref WORKER_RESTARTS: IntCounterVec = {
        let metric = IntCounterVec::new(
            Opts::new(
                "engine_worker_restarts_total",
                "Workers restarted after an abnormal stop",
            ),
            &["camera_id"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref WORKERS_RUNNING: IntGauge = {
        let metric = IntGauge::new("engine_workers_running", "Camera workers currently running")
            .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    // ==== Event persistence ====
    pub static ref EVENTS_PERSISTED: IntCounterVec = {
        let metric = IntCounterVec::new(
            Opts::new("engine_events_persisted_total", "Crossing events written to the store"),
            &["camera_id"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref EVENTS_DROPPED: IntCounterVec = {
        let metric = IntCounterVec::new(
            Opts::new(
                "engine_events_dropped_total",
                "Crossing events dropped after retries, on a full queue or a closed one",
            ),
            &["camera_id", "reason"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref DAILY_RESETS: IntCounter = {
        let metric = IntCounter::new("engine_daily_resets_total", "Per-camera count resets at day change")
            .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };
}

/// Remove every series of `vec` whose `camera_id` label matches
fn remove_camera_series<T: MetricVecBuilder>(vec: &MetricVec<T>, camera_id: &str) {
    let series: Vec<HashMap<String, String>> = vec
        .collect()
        .iter()
        .flat_map(|family| family.get_metric().iter())
        .map(|metric| {
            metric
                .get_label()
                .iter()
                .map(|pair| (pair.get_name().to_string(), pair.get_value().to_string()))
                .collect::<HashMap<_, _>>()
        })
        .filter(|labels| labels.get("camera_id").map(String::as_str) == Some(camera_id))
        .collect();

    for labels in &series {
        let labels: HashMap<&str, &str> = labels
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
            .collect();
        vec.remove(&labels).ok();
    }
}

/// Forget a removed camera's per-camera series
pub fn remove_camera_metrics(camera_id: &str) {
    remove_camera_series(&*FRAMES_PROCESSED, camera_id);
    remove_camera_series(&*FRAMES_SKIPPED, camera_id);
    remove_camera_series(&*DETECTIONS, camera_id);
    remove_camera_series(&*DETECTION_LATENCY, camera_id);
    remove_camera_series(&*ACTIVE_TRACKS, camera_id);
    remove_camera_series(&*CROSSINGS, camera_id);
    remove_camera_series(&*RECONNECTS, camera_id);
    remove_camera_series(&*WORKER_RESTARTS, camera_id);
    remove_camera_series(&*EVENTS_PERSISTED, camera_id);
    remove_camera_series(&*EVENTS_DROPPED, camera_id);
}

/// Encode the registry for Prometheus scraping
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| {
        prometheus::Error::Msg(format!("Failed to convert metrics to UTF-8: {}", e))
    })
}
