//! Queue item persistence on top of indexed storage.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use payqueue_core::{EntityId, QueueItemId};

use super::types::{QueueItem, QueueStats, QueueStatus};
use crate::storage::{Condition, IndexedStorage, QueryFilter, Repository, SortOrder, StorageError};

/// Queue item store.
///
/// Every lookup here runs on declared indexes (`status`, `queued_at`,
/// `parent_id`, ...), so claiming and reaping stay cheap as completed items
/// pile up.
#[derive(Debug, Clone)]
pub struct QueueStore {
    items: Repository<QueueItem>,
}

impl QueueStore {
    pub fn new(storage: Arc<dyn IndexedStorage>) -> Result<Self, StorageError> {
        Ok(Self {
            items: Repository::new(storage)?,
        })
    }

    /// Persist a new item and assign its id.
    pub fn insert(&self, item: &mut QueueItem) -> Result<QueueItemId, StorageError> {
        Ok(self.items.insert(item)?.into())
    }

    pub fn get(&self, id: QueueItemId) -> Result<Option<QueueItem>, StorageError> {
        self.items.get(EntityId::from(id))
    }

    /// Unconditional write.
    pub fn update(&self, item: &QueueItem) -> Result<(), StorageError> {
        self.items.update(item)
    }

    /// Write `item` only if the stored row is still in `expected` status.
    pub fn swap_status(&self, item: &QueueItem, expected: QueueStatus) -> Result<bool, StorageError> {
        self.items
            .update_if(item, &[Condition::eq("status", expected)])
    }

    /// Write `item` only if the stored row is still exactly the running
    /// attempt `previous` (same status and same last activity).
    pub fn swap_running(&self, item: &QueueItem, previous: &QueueItem) -> Result<bool, StorageError> {
        self.items.update_if(
            item,
            &[
                Condition::eq("status", QueueStatus::InProgress),
                Condition::eq("last_update_at", previous.last_update_at),
            ],
        )
    }

    /// Oldest waiting items: `queued_at` ascending, ties by id.
    pub fn next_queued(&self, limit: usize) -> Result<Vec<QueueItem>, StorageError> {
        self.items.find(
            &QueryFilter::new()
                .where_eq("status", QueueStatus::Queued)
                .order_by("queued_at", SortOrder::Asc)
                .with_limit(limit),
        )
    }

    /// Running items with no activity since `cutoff`.
    pub fn stale(&self, cutoff: DateTime<Utc>, limit: usize) -> Result<Vec<QueueItem>, StorageError> {
        self.items.find(
            &QueryFilter::new()
                .where_eq("status", QueueStatus::InProgress)
                .where_lt("last_update_at", cutoff)
                .order_by("last_update_at", SortOrder::Asc)
                .with_limit(limit),
        )
    }

    /// Items carrying `tag`, most recently created first.
    pub fn find_by_correlation_tag(&self, tag: &str) -> Result<Vec<QueueItem>, StorageError> {
        self.items.find(
            &QueryFilter::new()
                .where_eq("correlation_tag", tag)
                .order_by("created_at", SortOrder::Desc),
        )
    }

    /// Children of `parent` in creation order, optionally only those in `status`.
    pub fn find_children(
        &self,
        parent: QueueItemId,
        status: Option<QueueStatus>,
    ) -> Result<Vec<QueueItem>, StorageError> {
        let mut filter = QueryFilter::new().where_eq("parent_id", parent.get());
        if let Some(status) = status {
            filter = filter.where_eq("status", status);
        }
        self.items
            .find(&filter.order_by("created_at", SortOrder::Asc))
    }

    pub fn count_by_status(&self, status: QueueStatus) -> Result<usize, StorageError> {
        self.items
            .count(&QueryFilter::new().where_eq("status", status))
    }

    pub fn stats(&self) -> Result<QueueStats, StorageError> {
        let mut stats = QueueStats::default();
        for status in QueueStatus::ALL {
            stats.set(status, self.count_by_status(status)?);
        }
        Ok(stats)
    }
}
