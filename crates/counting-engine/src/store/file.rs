//! Camera configuration kept in a YAML file:
//!
//! ```yaml
//! cameras:
//!   - camera_id: "1001"
//!     source_uri: rtsp://10.0.0.5/live
//!     location_name: Jl. Asia Afrika
//!     calibration_line_position: 0.6
//! ```

use async_trait::async_trait;
use common::{CameraConfig, CameraConfigStore, PersistenceError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Debug, Default, Serialize, Deserialize)]
struct CameraFile {
    #[serde(default)]
    cameras: Vec<CameraConfig>,
}

pub struct FileCameraStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileCameraStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<CameraFile, PersistenceError> {
        let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            PersistenceError::unavailable(format!("read {}: {}", self.path.display(), e))
        })?;

        if content.trim().is_empty() {
            return Ok(CameraFile::default());
        }

        serde_yaml::from_str(&content).map_err(|e| {
            PersistenceError::invalid(format!("parse {}: {}", self.path.display(), e))
        })
    }
}

#[async_trait]
impl CameraConfigStore for FileCameraStore {
    async fn list_cameras(&self) -> Result<Vec<CameraConfig>, PersistenceError> {
        let file = self.load().await?;
        debug!(path = %self.path.display(), count = file.cameras.len(), "loaded camera file");
        Ok(file.cameras)
    }

    async fn insert_camera(&self, camera: &CameraConfig) -> Result<(), PersistenceError> {
        let _guard = self.write_lock.lock().await;

        let mut file = match tokio::fs::try_exists(&self.path).await {
            Ok(true) => self.load().await?,
            _ => CameraFile::default(),
        };

        match file.cameras.iter_mut().find(|c| c.camera_id == camera.camera_id) {
            Some(existing) => *existing = camera.clone(),
            None => file.cameras.push(camera.clone()),
        }

        let content = serde_yaml::to_string(&file)
            .map_err(|e| PersistenceError::invalid(format!("serialize cameras: {}", e)))?;
        tokio::fs::write(&self.path, content).await.map_err(|e| {
            PersistenceError::unavailable(format!("write {}: {}", self.path.display(), e))
        })
    }
}
