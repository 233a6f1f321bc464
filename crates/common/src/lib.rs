pub mod cameras;
pub mod events;
pub mod store;
pub mod validation;

pub use cameras::{CameraConfig, CameraStateView, WorkerState};
pub use events::{CrossingDirection, CrossingEvent, DailyStats};
pub use store::{CameraConfigStore, EventStore, PersistenceError};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
