//! Task abstraction: typed tasks, their object-safe erasure and the context
//! they execute in.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use super::error::QueueError;
use super::registry::CodecError;
use super::types::QueueItem;

/// Business data a transaction log row is built from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionData {
    /// Business reference (e.g. merchant order number).
    pub correlation_key: String,
    pub event_code: String,
    pub payment_method: Option<String>,
    pub is_successful: bool,
    pub reason: Option<String>,
}

/// How a task attempt ended, when it did not succeed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TaskError {
    /// Transient failure; the attempt is retried while retries remain.
    #[error("task execution failed: {0}")]
    Execution(String),

    /// The task asked to stop for good; never retried.
    #[error("task aborted: {0}")]
    Abort(String),
}

impl TaskError {
    pub fn execution(msg: impl Into<String>) -> Self {
        Self::Execution(msg.into())
    }

    pub fn abort(msg: impl Into<String>) -> Self {
        Self::Abort(msg.into())
    }

    pub fn reason(&self) -> &str {
        match self {
            TaskError::Execution(reason) | TaskError::Abort(reason) => reason,
        }
    }
}

/// A typed unit of deferred work.
///
/// Tasks are stored serialized and rebuilt through the
/// [`TaskRegistry`](super::registry::TaskRegistry) under their `TYPE`, so the
/// serde representation must round-trip without loss. Collaborators a task
/// needs at execution time come from the [`TaskEnvironment`], not from the
/// task's own fields.
pub trait Task: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Stable type discriminator stored with every queue item.
    const TYPE: &'static str;

    fn execute(&self, ctx: &mut TaskContext<'_>) -> Result<(), TaskError>;

    /// Data for the transaction log, for tasks that have one.
    fn transaction_data(&self) -> Option<TransactionData> {
        None
    }
}

/// Object-safe view of a [`Task`].
pub trait DynTask: Send + Sync {
    fn task_type(&self) -> &'static str;

    fn run(&self, ctx: &mut TaskContext<'_>) -> Result<(), TaskError>;

    fn transaction(&self) -> Option<TransactionData>;

    fn encode(&self) -> Result<JsonValue, CodecError>;
}

impl<T: Task> DynTask for T {
    fn task_type(&self) -> &'static str {
        T::TYPE
    }

    fn run(&self, ctx: &mut TaskContext<'_>) -> Result<(), TaskError> {
        Task::execute(self, ctx)
    }

    fn transaction(&self) -> Option<TransactionData> {
        Task::transaction_data(self)
    }

    fn encode(&self) -> Result<JsonValue, CodecError> {
        serde_json::to_value(self).map_err(|e| CodecError::Encode {
            task_type: T::TYPE.to_string(),
            message: e.to_string(),
        })
    }
}

/// Typed container of the services tasks may use while executing.
///
/// Built once at startup and shared (as `Arc`) by every execution. Values are
/// keyed by their type, so store trait objects wrapped in `Arc`
/// (`Arc<dyn OrderService>`).
#[derive(Default)]
pub struct TaskEnvironment {
    services: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl TaskEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value`, replacing any earlier value of the same type.
    pub fn insert<T: Any + Send + Sync>(&mut self, value: T) {
        self.services.insert(TypeId::of::<T>(), Arc::new(value));
    }

    pub fn with<T: Any + Send + Sync>(mut self, value: T) -> Self {
        self.insert(value);
        self
    }

    pub fn get<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.services
            .get(&TypeId::of::<T>())
            .and_then(|service| service.downcast_ref::<T>())
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

impl core::fmt::Debug for TaskEnvironment {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TaskEnvironment")
            .field("services", &self.services.len())
            .finish()
    }
}

/// Where progress reports and keep-alives of a running item go.
pub trait ProgressSink: Send + Sync {
    /// Persist new progress; returns the updated item.
    fn progress(&self, item: &QueueItem, base_points: u32) -> Result<QueueItem, QueueError>;

    /// Refresh the item's activity timestamp; returns the updated item.
    fn keep_alive(&self, item: &QueueItem) -> Result<QueueItem, QueueError>;
}

/// Applies reports to the in-memory snapshot only.
struct Detached;

impl ProgressSink for Detached {
    fn progress(&self, item: &QueueItem, base_points: u32) -> Result<QueueItem, QueueError> {
        let now = item.last_update_at;
        Ok(super::lifecycle::report_progress(item, base_points, now)?.item)
    }

    fn keep_alive(&self, item: &QueueItem) -> Result<QueueItem, QueueError> {
        Ok(item.clone())
    }
}

/// Execution context handed to [`Task::execute`].
pub struct TaskContext<'a> {
    item: QueueItem,
    environment: &'a TaskEnvironment,
    sink: &'a dyn ProgressSink,
}

impl<'a> TaskContext<'a> {
    pub fn new(item: QueueItem, environment: &'a TaskEnvironment, sink: &'a dyn ProgressSink) -> Self {
        Self {
            item,
            environment,
            sink,
        }
    }

    /// A context whose reports are not persisted anywhere.
    pub fn detached(item: QueueItem, environment: &'a TaskEnvironment) -> Self {
        Self::new(item, environment, &Detached)
    }

    /// The item being executed, as last persisted.
    pub fn item(&self) -> &QueueItem {
        &self.item
    }

    pub fn environment(&self) -> &TaskEnvironment {
        self.environment
    }

    /// Shorthand for `environment().get::<T>()`.
    pub fn service<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.environment.get::<T>()
    }

    /// Report progress in base points (`10_000` = done).
    pub fn report_progress(&mut self, base_points: u32) -> Result<(), TaskError> {
        self.item = self
            .sink
            .progress(&self.item, base_points)
            .map_err(|e| TaskError::execution(format!("failed to report progress: {e}")))?;
        Ok(())
    }

    /// Signal that a long-running task is still alive.
    pub fn keep_alive(&mut self) -> Result<(), TaskError> {
        self.item = self
            .sink
            .keep_alive(&self.item)
            .map_err(|e| TaskError::execution(format!("failed to keep alive: {e}")))?;
        Ok(())
    }

    pub fn into_item(self) -> QueueItem {
        self.item
    }
}
