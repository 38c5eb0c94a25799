//! Infrastructure layer: indexed storage, the task queue, projections and
//! workers.

pub mod config;
pub mod projections;
pub mod queue;
pub mod storage;
pub mod tasks;
pub mod workers;


pub use config::{ConfigError, QueueConfig};
