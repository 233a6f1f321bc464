use super::local_day_bounds;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use common::{CameraConfig, CameraConfigStore, CrossingDirection, CrossingEvent, EventStore, PersistenceError};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS cameras (
        camera_id TEXT PRIMARY KEY,
        source_uri TEXT NOT NULL,
        location_name TEXT NOT NULL DEFAULT '',
        latitude DOUBLE PRECISION NOT NULL DEFAULT 0,
        longitude DOUBLE PRECISION NOT NULL DEFAULT 0,
        calibration_line_position DOUBLE PRECISION NOT NULL DEFAULT 0.5,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS crossing_events (
        event_id UUID PRIMARY KEY,
        camera_id TEXT NOT NULL,
        vehicle_class TEXT NOT NULL,
        track_id BIGINT NOT NULL,
        direction TEXT NOT NULL,
        speed_kmh DOUBLE PRECISION,
        occurred_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_crossing_events_camera_time
        ON crossing_events (camera_id, occurred_at)
    "#,
];

/// PostgreSQL-backed camera and event store
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, PersistenceError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await
            .map_err(|e| PersistenceError::unavailable(format!("connect to database: {}", e)))?;
        Ok(Self::new(pool))
    }

    /// Create the tables if they do not exist yet
    pub async fn migrate(&self) -> Result<(), PersistenceError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(map_sqlx_error)?;
        }
        info!("database schema ready");
        Ok(())
    }

    fn camera_from_row(row: &PgRow) -> Result<CameraConfig, sqlx::Error> {
        Ok(CameraConfig {
            camera_id: row.try_get("camera_id")?,
            source_uri: row.try_get("source_uri")?,
            location_name: row.try_get("location_name")?,
            latitude: row.try_get("latitude")?,
            longitude: row.try_get("longitude")?,
            calibration_line_position: row.try_get("calibration_line_position")?,
        })
    }

    fn event_from_row(row: &PgRow) -> Result<CrossingEvent, PersistenceError> {
        let direction: String = row.try_get("direction").map_err(map_sqlx_error)?;
        let direction = direction.parse::<CrossingDirection>().unwrap_or_else(|_| {
            warn!(direction = %direction, "unknown crossing direction, defaulting to down");
            CrossingDirection::Down
        });
        let track_id: i64 = row.try_get("track_id").map_err(map_sqlx_error)?;
        let event_id: Uuid = row.try_get("event_id").map_err(map_sqlx_error)?;
        let timestamp: DateTime<Utc> = row.try_get("occurred_at").map_err(map_sqlx_error)?;

        Ok(CrossingEvent {
            event_id,
            camera_id: row.try_get("camera_id").map_err(map_sqlx_error)?,
            vehicle_class: row.try_get("vehicle_class").map_err(map_sqlx_error)?,
            timestamp,
            track_id: track_id.max(0) as u64,
            direction,
            speed_kmh: row.try_get("speed_kmh").map_err(map_sqlx_error)?,
        })
    }
}

fn map_sqlx_error(err: sqlx::Error) -> PersistenceError {
    match err {
        sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::Decode(_)
        | sqlx::Error::TypeNotFound { .. } => PersistenceError::invalid(err.to_string()),
        other => PersistenceError::unavailable(other.to_string()),
    }
}

#[async_trait]
impl CameraConfigStore for PgStore {
    async fn list_cameras(&self) -> Result<Vec<CameraConfig>, PersistenceError> {
        let rows = sqlx::query(
            r#"
            SELECT camera_id, source_uri, location_name, latitude, longitude, calibration_line_position
            FROM cameras
            ORDER BY created_at, camera_id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.iter()
            .map(|row| Self::camera_from_row(row).map_err(map_sqlx_error))
            .collect()
    }

    async fn insert_camera(&self, camera: &CameraConfig) -> Result<(), PersistenceError> {
        sqlx::query(
            r#"
            INSERT INTO cameras (camera_id, source_uri, location_name, latitude, longitude, calibration_line_position)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (camera_id) DO UPDATE SET
                source_uri = EXCLUDED.source_uri,
                location_name = EXCLUDED.location_name,
                latitude = EXCLUDED.latitude,
                longitude = EXCLUDED.longitude,
                calibration_line_position = EXCLUDED.calibration_line_position
            "#,
        )
        .bind(&camera.camera_id)
        .bind(&camera.source_uri)
        .bind(&camera.location_name)
        .bind(camera.latitude)
        .bind(camera.longitude)
        .bind(camera.calibration_line_position)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }
}

#[async_trait]
impl EventStore for PgStore {
    async fn insert_event(&self, event: &CrossingEvent) -> Result<(), PersistenceError> {
        let track_id = i64::try_from(event.track_id)
            .map_err(|_| PersistenceError::invalid(format!("track_id {} out of range", event.track_id)))?;

        sqlx::query(
            r#"
            INSERT INTO crossing_events (event_id, camera_id, vehicle_class, track_id, direction, speed_kmh, occurred_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (event_id) DO NOTHING
            "#,
        )
        .bind(event.event_id)
        .bind(&event.camera_id)
        .bind(&event.vehicle_class)
        .bind(track_id)
        .bind(event.direction.as_str())
        .bind(event.speed_kmh)
        .bind(event.timestamp)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn list_events(
        &self,
        camera_id: &str,
        date: NaiveDate,
    ) -> Result<Vec<CrossingEvent>, PersistenceError> {
        let (start, end) = local_day_bounds(date)
            .ok_or_else(|| PersistenceError::invalid(format!("no local midnight for {}", date)))?;

        let rows = sqlx::query(
            r#"
            SELECT event_id, camera_id, vehicle_class, track_id, direction, speed_kmh, occurred_at
            FROM crossing_events
            WHERE camera_id = $1 AND occurred_at >= $2 AND occurred_at < $3
            ORDER BY occurred_at
            "#,
        )
        .bind(camera_id)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.iter().map(Self::event_from_row).collect()
    }

    async fn health_check(&self) -> Result<bool, PersistenceError> {
        Ok(sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .is_ok())
    }
}
