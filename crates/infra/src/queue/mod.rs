//! Task execution queue.
//!
//! Producers [`enqueue`](QueueService::enqueue) typed [`Task`]s; workers
//! [`claim_next`](QueueService::claim_next) and
//! [`execute`](QueueService::execute) them. Each transition of a
//! [`QueueItem`] is persisted and then announced as a [`QueueEvent`] on the
//! event bus, which is how projections such as the transaction log follow
//! the queue without the queue knowing about them.

pub mod error;
pub mod events;
pub mod lifecycle;
pub mod registry;
pub mod service;
pub mod store;
pub mod task;
pub mod types;

pub use error::QueueError;
pub use events::{QueueEvent, QueueEventKind};
pub use lifecycle::{Transition, TransitionError};
pub use registry::{CodecError, RegistryError, TaskRegistry};
pub use service::{DEFAULT_MAX_RETRIES, INACTIVE_REASON, QueueService};
pub use store::QueueStore;
pub use task::{DynTask, ProgressSink, Task, TaskContext, TaskEnvironment, TaskError, TransactionData};
pub use types::{EnqueueOptions, MAX_PROGRESS, QueueItem, QueueStats, QueueStatus};
