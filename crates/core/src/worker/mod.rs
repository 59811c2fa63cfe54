//! Background workers: the job worker pool and the maintenance loop.

mod config;
mod maintenance;
mod pool;

pub use config::{MaintenanceConfig, QueueConfig};
pub use maintenance::{MaintenanceLoop, MaintenanceReport};
pub use pool::WorkerPool;
