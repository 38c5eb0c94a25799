//! Background workers.

pub mod queue_worker;

pub use queue_worker::{QueueWorkerPool, WorkerPoolConfig, WorkerPoolHandle, WorkerPoolStats};
