pub mod annotation;
pub mod api;
pub mod config;
pub mod detector;
pub mod error;
pub mod event_sink;
pub mod frame;
pub mod shared_state;
pub mod source;
pub mod store;
pub mod supervisor;
pub mod tracking;
pub mod worker;

pub use api::ApiState;
pub use config::EngineConfig;
pub use event_sink::{EventSink, EventSinkConfig};
pub use frame::{BoundingBox, Detection, Frame};
pub use shared_state::{CameraPublicState, SharedStateStore};
pub use supervisor::{RestartPolicy, Supervisor, SupervisorConfig};
pub use worker::{CameraWorker, PipelineConfig, WorkerConfig, WorkerContext};
