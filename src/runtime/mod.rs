//! Runtime adapters and API surface.

pub mod api;
pub mod tokio_spawner;

pub use api::{cancel_job, execution_status, execution_status_json, health, CancelResponse, Health};
pub use tokio_spawner::TokioSpawner;
