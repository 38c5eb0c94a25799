//! Queue item envelope and status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use payqueue_core::{Entity, EntityId, IndexMap, IndexValue, QueueItemId};

use super::task::TransactionData;

/// Progress of a finished task, in base points (1/100 of a percent).
pub const MAX_PROGRESS: u32 = 10_000;

/// Queue item execution status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    /// Waiting to be claimed
    Queued,
    /// Claimed by a worker and executing
    InProgress,
    /// Finished successfully
    Completed,
    /// Exhausted its retries
    Failed,
    /// Stopped on purpose; never retried
    Aborted,
}

impl QueueStatus {
    pub const ALL: [QueueStatus; 5] = [
        QueueStatus::Queued,
        QueueStatus::InProgress,
        QueueStatus::Completed,
        QueueStatus::Failed,
        QueueStatus::Aborted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Queued => "queued",
            QueueStatus::InProgress => "in_progress",
            QueueStatus::Completed => "completed",
            QueueStatus::Failed => "failed",
            QueueStatus::Aborted => "aborted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            QueueStatus::Completed | QueueStatus::Failed | QueueStatus::Aborted
        )
    }
}

impl std::fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<QueueStatus> for IndexValue {
    fn from(status: QueueStatus) -> Self {
        IndexValue::from(status.as_str())
    }
}

/// Per-item options given at enqueue time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnqueueOptions {
    pub parent_id: Option<QueueItemId>,
    /// Business reference (e.g. order number) the item can be looked up by.
    pub correlation_tag: Option<String>,
    /// Overrides the service default.
    pub max_retries: Option<u32>,
}

impl EnqueueOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_parent(mut self, parent_id: QueueItemId) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    pub fn with_correlation_tag(mut self, tag: impl Into<String>) -> Self {
        self.correlation_tag = Some(tag.into());
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}

/// A persisted unit of deferred work.
///
/// The task itself is kept serialized (`task`) next to its type discriminator
/// (`task_type`) and is only decoded when the item is executed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    /// Assigned on first persist.
    #[serde(skip)]
    pub id: Option<QueueItemId>,
    pub parent_id: Option<QueueItemId>,
    pub task_type: String,
    pub task: JsonValue,
    pub status: QueueStatus,
    /// Failed attempts so far.
    pub retries: u32,
    pub max_retries: u32,
    pub created_at: DateTime<Utc>,
    /// Most recent transition into `queued`; the FIFO key.
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub last_update_at: DateTime<Utc>,
    pub progress_base_points: u32,
    pub failure_description: Option<String>,
    pub correlation_tag: Option<String>,
    /// Transaction log data of the task, captured at enqueue time so every
    /// lifecycle event can build the item's row.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction: Option<TransactionData>,
}

impl QueueItem {
    /// A fresh, not yet persisted item in `queued`.
    pub fn new(
        task_type: impl Into<String>,
        task: JsonValue,
        max_retries: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: None,
            parent_id: None,
            task_type: task_type.into(),
            task,
            status: QueueStatus::Queued,
            retries: 0,
            max_retries,
            created_at: now,
            queued_at: now,
            started_at: None,
            finished_at: None,
            last_update_at: now,
            progress_base_points: 0,
            failure_description: None,
            correlation_tag: None,
            transaction: None,
        }
    }

    pub fn with_parent(mut self, parent_id: Option<QueueItemId>) -> Self {
        self.parent_id = parent_id;
        self
    }

    pub fn with_correlation_tag(mut self, tag: Option<String>) -> Self {
        self.correlation_tag = tag;
        self
    }

    pub fn with_transaction(mut self, transaction: Option<TransactionData>) -> Self {
        self.transaction = transaction;
        self
    }

    pub fn is_child(&self) -> bool {
        self.parent_id.is_some()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Progress as a percentage (0.0..=100.0).
    pub fn progress_percent(&self) -> f64 {
        f64::from(self.progress_base_points) / 100.0
    }
}

impl Entity for QueueItem {
    const ENTITY_TYPE: &'static str = "queue_item";

    fn entity_id(&self) -> Option<EntityId> {
        self.id.map(EntityId::from)
    }

    fn set_entity_id(&mut self, id: EntityId) {
        self.id = Some(QueueItemId::from(id));
    }

    fn index_map() -> IndexMap {
        IndexMap::new()
            .add_string("status")
            .add_string("task_type")
            .add_integer("parent_id")
            .add_string("correlation_tag")
            .add_datetime("created_at")
            .add_datetime("queued_at")
            .add_datetime("last_update_at")
            .add_integer("retries")
    }

    fn index_values(&self) -> Vec<(&'static str, IndexValue)> {
        vec![
            ("status", self.status.into()),
            ("task_type", self.task_type.as_str().into()),
            ("parent_id", self.parent_id.map(|p| p.get()).into()),
            ("correlation_tag", self.correlation_tag.clone().into()),
            ("created_at", self.created_at.into()),
            ("queued_at", self.queued_at.into()),
            ("last_update_at", self.last_update_at.into()),
            ("retries", self.retries.into()),
        ]
    }
}

/// Number of items per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub queued: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub failed: usize,
    pub aborted: usize,
}

impl QueueStats {
    pub fn set(&mut self, status: QueueStatus, count: usize) {
        match status {
            QueueStatus::Queued => self.queued = count,
            QueueStatus::InProgress => self.in_progress = count,
            QueueStatus::Completed => self.completed = count,
            QueueStatus::Failed => self.failed = count,
            QueueStatus::Aborted => self.aborted = count,
        }
    }

    /// Items that are waiting or running.
    pub fn pending(&self) -> usize {
        self.queued + self.in_progress
    }

    pub fn total(&self) -> usize {
        self.pending() + self.completed + self.failed + self.aborted
    }
}
