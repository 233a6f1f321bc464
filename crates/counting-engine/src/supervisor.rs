//! Owns the camera workers: spawns one per configured camera, restarts the
//! ones that stop abnormally, follows configuration changes and runs the
//! daily reset sweep.

use crate::worker::{backoff_delay, CameraWorker, WorkerContext};
use anyhow::{Context, Result};
use chrono::{Days, Local};
use common::{CameraConfig, CameraConfigStore, PersistenceError, WorkerState};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use telemetry::metrics::{remove_camera_metrics, WORKERS_RUNNING, WORKER_RESTARTS};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestartPolicy {
    /// 0 means restart forever
    pub max_restarts: u32,
    pub backoff_start_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            max_restarts: 0,
            backoff_start_ms: 500,
            backoff_max_ms: 30_000,
        }
    }
}

impl RestartPolicy {
    fn allows(&self, restarts: u32) -> bool {
        self.max_restarts == 0 || restarts <= self.max_restarts
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupervisorConfig {
    pub restart: RestartPolicy,
    /// Re-read camera configuration this often; `None` reads it once
    pub refresh_interval_secs: Option<u64>,
    pub sweep_interval_secs: u64,
    /// Days of event history the sweep keeps in stores that prune; 0 keeps everything
    pub event_retention_days: u32,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            restart: RestartPolicy::default(),
            refresh_interval_secs: None,
            sweep_interval_secs: 60,
            event_retention_days: 7,
        }
    }
}

struct WorkerHandle {
    camera: CameraConfig,
    token: CancellationToken,
    task: JoinHandle<()>,
}

#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<SupervisorInner>,
}

struct SupervisorInner {
    config_store: Arc<dyn CameraConfigStore>,
    ctx: WorkerContext,
    config: SupervisorConfig,
    workers: RwLock<HashMap<String, WorkerHandle>>,
    background: Mutex<Vec<JoinHandle<()>>>,
    /// Held for a whole reconcile and while shutdown takes the workers
    reconcile_lock: Mutex<()>,
    shutdown: CancellationToken,
}

impl Supervisor {
    pub fn new(
        config_store: Arc<dyn CameraConfigStore>,
        ctx: WorkerContext,
        config: SupervisorConfig,
    ) -> Self {
        Self {
            inner: Arc::new(SupervisorInner {
                config_store,
                ctx,
                config,
                workers: RwLock::new(HashMap::new()),
                background: Mutex::new(Vec::new()),
                reconcile_lock: Mutex::new(()),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Read the camera list, spawn workers and start the background loops.
    ///
    /// Failing to read the configuration here is fatal.
    pub async fn start(&self) -> Result<usize> {
        let cameras = self
            .inner
            .config_store
            .list_cameras()
            .await
            .context("failed to read camera configuration")?;

        self.reconcile(cameras).await;
        let running = self.worker_count().await;
        WORKERS_RUNNING.set(running as i64);
        info!(cameras = running, "supervisor started");

        let mut background = self.inner.background.lock().await;
        background.push(self.spawn_sweep_loop());
        if let Some(secs) = self.inner.config.refresh_interval_secs.filter(|s| *s > 0) {
            background.push(self.spawn_refresh_loop(Duration::from_secs(secs)));
        }

        Ok(running)
    }

    /// Re-read the configuration store and apply the differences
    pub async fn refresh(&self) -> Result<(), PersistenceError> {
        let cameras = self.inner.config_store.list_cameras().await?;
        self.reconcile(cameras).await;
        Ok(())
    }

    /// Bring the running workers in line with `cameras`.
    ///
    /// Invalid and duplicate entries are skipped. Removed cameras are stopped;
    /// changed ones are restarted so a worker never sees its config change.
    pub async fn reconcile(&self, cameras: Vec<CameraConfig>) {
        let _guard = self.inner.reconcile_lock.lock().await;
        if self.inner.shutdown.is_cancelled() {
            return;
        }

        let mut desired: Vec<CameraConfig> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        for camera in cameras {
            if let Err(e) = camera.validate() {
                warn!(camera_id = %camera.camera_id, error = %e, "skipping invalid camera config");
                continue;
            }
            if !seen.insert(camera.camera_id.clone()) {
                warn!(camera_id = %camera.camera_id, "skipping duplicate camera config");
                continue;
            }
            desired.push(camera);
        }

        let current: HashMap<String, CameraConfig> = {
            let workers = self.inner.workers.read().await;
            workers
                .iter()
                .map(|(id, handle)| (id.clone(), handle.camera.clone()))
                .collect()
        };

        for camera_id in current.keys() {
            if !seen.contains(camera_id) {
                info!(camera_id = %camera_id, "camera removed from configuration");
                self.stop_camera(camera_id).await;
            }
        }

        for camera in desired {
            match current.get(&camera.camera_id) {
                Some(existing) if *existing == camera => {}
                Some(_) => {
                    info!(camera_id = %camera.camera_id, "camera configuration changed, restarting worker");
                    self.stop_worker(&camera.camera_id).await;
                    self.spawn_worker(camera).await;
                }
                None => self.spawn_worker(camera).await,
            }
        }

        WORKERS_RUNNING.set(self.worker_count().await as i64);
    }

    async fn spawn_worker(&self, camera: CameraConfig) {
        let mut workers = self.inner.workers.write().await;
        if self.inner.shutdown.is_cancelled() {
            return;
        }

        let camera_id = camera.camera_id.clone();
        let token = self.inner.shutdown.child_token();
        let task = tokio::spawn(supervise_camera(
            camera.clone(),
            self.inner.ctx.clone(),
            self.inner.config.restart.clone(),
            token.clone(),
        ));

        info!(camera_id = %camera_id, uri = %camera.source_uri, "camera worker spawned");
        workers.insert(camera_id, WorkerHandle { camera, token, task });
    }

    /// Stop the worker and wait for it to release its resources
    async fn stop_worker(&self, camera_id: &str) -> bool {
        let handle = self.inner.workers.write().await.remove(camera_id);
        match handle {
            Some(handle) => {
                handle.token.cancel();
                if let Err(e) = handle.task.await {
                    error!(camera_id = %camera_id, error = %e, "worker supervision task failed");
                }
                true
            }
            None => false,
        }
    }

    /// Stop a camera and drop its public state and metric series
    pub async fn stop_camera(&self, camera_id: &str) -> bool {
        let stopped = self.stop_worker(camera_id).await;
        self.inner.ctx.shared.remove(camera_id);
        remove_camera_metrics(camera_id);
        WORKERS_RUNNING.set(self.worker_count().await as i64);
        stopped
    }

    /// Configurations currently supervised, ordered by camera id
    pub async fn list_cameras(&self) -> Vec<CameraConfig> {
        let workers = self.inner.workers.read().await;
        let mut cameras: Vec<CameraConfig> = workers.values().map(|h| h.camera.clone()).collect();
        cameras.sort_by(|a, b| a.camera_id.cmp(&b.camera_id));
        cameras
    }

    pub async fn worker_count(&self) -> usize {
        self.inner.workers.read().await.len()
    }

    /// Whether the camera's supervision task is still alive
    pub async fn is_running(&self, camera_id: &str) -> bool {
        let workers = self.inner.workers.read().await;
        workers
            .get(camera_id)
            .map(|h| !h.task.is_finished())
            .unwrap_or(false)
    }

    /// Stop every worker and background loop, waiting for all of them
    pub async fn shutdown(&self) {
        info!("supervisor shutting down");
        self.inner.shutdown.cancel();

        let handles: Vec<(String, WorkerHandle)> = {
            let _guard = self.inner.reconcile_lock.lock().await;
            let mut workers = self.inner.workers.write().await;
            workers.drain().collect()
        };
        for (camera_id, handle) in handles {
            handle.token.cancel();
            if let Err(e) = handle.task.await {
                error!(camera_id = %camera_id, error = %e, "worker supervision task failed");
            }
        }

        let background: Vec<JoinHandle<()>> = self.inner.background.lock().await.drain(..).collect();
        for task in background {
            task.await.ok();
        }

        WORKERS_RUNNING.set(0);
        info!("supervisor stopped");
    }

    /// Reset counts left over from an earlier day and prune old events.
    /// Returns how many cameras were reset.
    pub async fn sweep(&self) -> usize {
        let reset = self.inner.ctx.shared.sweep().await;

        let retention = self.inner.config.event_retention_days;
        if retention > 0 {
            if let Some(cutoff) = Local::now().date_naive().checked_sub_days(Days::new(retention as u64)) {
                match self.inner.ctx.events.store().prune_events_before(cutoff).await {
                    Ok(0) => {}
                    Ok(pruned) => info!(pruned, cutoff = %cutoff, "pruned old crossing events"),
                    Err(e) => warn!(error = %e, "event pruning failed"),
                }
            }
        }
        reset
    }

    fn spawn_sweep_loop(&self) -> JoinHandle<()> {
        let supervisor = self.clone();
        let shutdown = self.inner.shutdown.clone();
        let period = Duration::from_secs(self.inner.config.sweep_interval_secs.max(1));

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        supervisor.sweep().await;
                    }
                }
            }
        })
    }

    fn spawn_refresh_loop(&self, period: Duration) -> JoinHandle<()> {
        let supervisor = self.clone();
        let shutdown = self.inner.shutdown.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; start() already loaded the list.
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        if let Err(e) = supervisor.refresh().await {
                            warn!(error = %e, "camera configuration refresh failed, keeping current workers");
                        }
                    }
                }
            }
        })
    }
}

/// Run one camera's worker, restarting it after abnormal stops.
async fn supervise_camera(
    camera: CameraConfig,
    ctx: WorkerContext,
    policy: RestartPolicy,
    token: CancellationToken,
) {
    let camera_id = camera.camera_id.clone();
    let shared = ctx.shared.clone();
    let mut restarts: u32 = 0;

    loop {
        let worker = CameraWorker::new(camera.clone(), ctx.clone());
        let result = tokio::spawn(worker.run(token.clone())).await;

        let failure = match result {
            Ok(Ok(())) => return,
            Ok(Err(e)) => format!("{:#}", e),
            Err(e) => format!("worker task failed: {}", e),
        };

        if token.is_cancelled() {
            return;
        }

        restarts += 1;
        if !policy.allows(restarts) {
            error!(
                camera_id = %camera_id,
                restarts = restarts - 1,
                error = %failure,
                "worker stopped abnormally, restart limit reached"
            );
            shared.set_stream_state(&camera_id, WorkerState::Stopped).await;
            return;
        }

        let delay = backoff_delay(policy.backoff_start_ms, policy.backoff_max_ms, restarts);
        warn!(
            camera_id = %camera_id,
            restarts,
            delay_ms = delay.as_millis() as u64,
            error = %failure,
            "worker stopped abnormally, restarting"
        );
        WORKER_RESTARTS
            .with_label_values(&[camera_id.as_str()])
            .inc();
        shared.set_stream_state(&camera_id, WorkerState::Stopped).await;

        tokio::select! {
            _ = token.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
