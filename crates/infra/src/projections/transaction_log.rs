//! Transaction log projection: one auditable row per payment-related queue
//! item, mirroring the item's queue status.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use payqueue_core::{
    Clock, DomainError, Entity, EntityId, IndexMap, IndexValue, QueueItemId, SystemClock,
    TransactionLogId,
};

use crate::queue::{QueueItem, QueueStatus, TransactionData};
use crate::storage::{IndexedStorage, QueryFilter, Repository, SortOrder, StorageError};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProjectionError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Invalid(#[from] DomainError),

    #[error("correlation key '{correlation_key}' already has an active log for queue item {execution_id}")]
    ActiveLogExists {
        correlation_key: String,
        execution_id: QueueItemId,
    },

    #[error("a transaction log for queue item {0} already exists")]
    DuplicateExecution(QueueItemId),

    #[error("transaction log {0} not found")]
    NotFound(TransactionLogId),

    #[error("queue item has not been persisted yet")]
    UnpersistedItem,
}

/// A transaction log row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionLog {
    #[serde(skip)]
    pub id: Option<TransactionLogId>,
    pub correlation_key: String,
    /// Queue item the row follows.
    pub execution_id: QueueItemId,
    pub is_successful: bool,
    pub reason: Option<String>,
    pub event_code: String,
    pub payment_method: Option<String>,
    pub queue_status: QueueStatus,
    pub failure_description: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Version of the last mirrored item snapshot: its `last_update_at` and
    /// its `retries`.
    pub queue_updated_at: DateTime<Utc>,
    pub queue_retries: u32,
}

impl TransactionLog {
    /// A new row for `item`, built from the task's transaction data.
    pub fn new(
        item: &QueueItem,
        data: &TransactionData,
        now: DateTime<Utc>,
    ) -> Result<Self, ProjectionError> {
        let execution_id = item.id.ok_or(ProjectionError::UnpersistedItem)?;
        if data.correlation_key.trim().is_empty() {
            return Err(DomainError::validation("correlation key must not be empty").into());
        }
        if data.event_code.trim().is_empty() {
            return Err(DomainError::validation("event code must not be empty").into());
        }

        Ok(Self {
            id: None,
            correlation_key: data.correlation_key.clone(),
            execution_id,
            is_successful: data.is_successful,
            reason: data.reason.clone(),
            event_code: data.event_code.clone(),
            payment_method: data.payment_method.clone(),
            queue_status: item.status,
            failure_description: item.failure_description.clone(),
            timestamp: now,
            updated_at: now,
            queue_updated_at: item.last_update_at,
            queue_retries: item.retries,
        })
    }

    /// Whether the followed item has not reached a terminal state yet.
    pub fn is_active(&self) -> bool {
        !self.queue_status.is_terminal()
    }

    /// Copy the status of `item` onto the row.
    ///
    /// Terminal rows never change, and snapshots older than the last one
    /// mirrored are ignored, so redelivered or out-of-order events are
    /// harmless. Returns whether the row changed.
    pub fn mirror(&mut self, item: &QueueItem, now: DateTime<Utc>) -> bool {
        if self.queue_status.is_terminal() {
            return false;
        }
        let incoming = (item.last_update_at, item.retries, status_rank(item.status));
        let current = (self.queue_updated_at, self.queue_retries, status_rank(self.queue_status));
        if incoming < current {
            return false;
        }
        if item.status == self.queue_status
            && item.failure_description == self.failure_description
        {
            return false;
        }

        self.queue_status = item.status;
        self.failure_description = item.failure_description.clone();
        self.queue_updated_at = item.last_update_at;
        self.queue_retries = item.retries;
        self.updated_at = now;
        true
    }
}

/// Position of a status within one attempt.
fn status_rank(status: QueueStatus) -> u8 {
    match status {
        QueueStatus::Queued => 0,
        QueueStatus::InProgress => 1,
        QueueStatus::Completed | QueueStatus::Failed | QueueStatus::Aborted => 2,
    }
}

impl Entity for TransactionLog {
    const ENTITY_TYPE: &'static str = "transaction_log";

    fn entity_id(&self) -> Option<EntityId> {
        self.id.map(EntityId::from)
    }

    fn set_entity_id(&mut self, id: EntityId) {
        self.id = Some(TransactionLogId::from(id));
    }

    fn index_map() -> IndexMap {
        IndexMap::new()
            .add_string("correlation_key")
            .add_integer("execution_id")
            .add_string("queue_status")
            .add_string("event_code")
            .add_string("payment_method")
            .add_boolean("is_successful")
            .add_datetime("timestamp")
    }

    fn index_values(&self) -> Vec<(&'static str, IndexValue)> {
        vec![
            ("correlation_key", self.correlation_key.as_str().into()),
            ("execution_id", self.execution_id.get().into()),
            ("queue_status", self.queue_status.into()),
            ("event_code", self.event_code.as_str().into()),
            ("payment_method", self.payment_method.clone().into()),
            ("is_successful", self.is_successful.into()),
            ("timestamp", self.timestamp.into()),
        ]
    }
}

/// Reads and writes transaction log rows.
///
/// Row writes are serialized inside one service instance: the "one row per
/// execution, one active row per correlation key" checks and every
/// read-mirror-write of a row's status happen under the same lock, so
/// listeners running on different workers cannot overwrite each other.
pub struct TransactionLogService<C: Clock = SystemClock> {
    logs: Repository<TransactionLog>,
    clock: C,
    /// Executions whose row was refused, until they finish.
    refused: Mutex<HashSet<QueueItemId>>,
}

impl<C: Clock> core::fmt::Debug for TransactionLogService<C> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TransactionLogService")
            .field("logs", &self.logs)
            .finish_non_exhaustive()
    }
}

impl<C: Clock> TransactionLogService<C> {
    pub fn new(storage: Arc<dyn IndexedStorage>, clock: C) -> Result<Self, StorageError> {
        Ok(Self {
            logs: Repository::new(storage)?,
            clock,
            refused: Mutex::new(HashSet::new()),
        })
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Most recent row for a correlation key.
    pub fn get(&self, correlation_key: &str) -> Result<Option<TransactionLog>, ProjectionError> {
        Ok(self.logs.find_one(
            &QueryFilter::new()
                .where_eq("correlation_key", correlation_key)
                .order_by("timestamp", SortOrder::Desc)
                .order_by("id", SortOrder::Desc),
        )?)
    }

    /// The non-terminal row of a correlation key, if any.
    pub fn get_active(&self, correlation_key: &str) -> Result<Option<TransactionLog>, ProjectionError> {
        Ok(self.logs.find_one(
            &QueryFilter::new()
                .where_eq("correlation_key", correlation_key)
                .where_in("queue_status", [QueueStatus::Queued, QueueStatus::InProgress]),
        )?)
    }

    pub fn get_by_execution_id(
        &self,
        execution_id: QueueItemId,
    ) -> Result<Option<TransactionLog>, ProjectionError> {
        Ok(self
            .logs
            .find_one(&QueryFilter::new().where_eq("execution_id", execution_id.get()))?)
    }

    pub fn find_by_id(&self, id: TransactionLogId) -> Result<Option<TransactionLog>, ProjectionError> {
        Ok(self.logs.get(EntityId::from(id))?)
    }

    /// A page of rows, oldest first, optionally only rows older than `older_than`.
    pub fn find(
        &self,
        limit: usize,
        offset: usize,
        older_than: Option<DateTime<Utc>>,
    ) -> Result<Vec<TransactionLog>, ProjectionError> {
        let filter = Self::older_than(older_than)
            .order_by("timestamp", SortOrder::Asc)
            .with_limit(limit)
            .with_offset(offset);
        Ok(self.logs.find(&filter)?)
    }

    pub fn count(&self, older_than: Option<DateTime<Utc>>) -> Result<usize, ProjectionError> {
        Ok(self.logs.count(&Self::older_than(older_than))?)
    }

    /// Insert a new row.
    ///
    /// Refuses a second row for the same execution and a second active row
    /// for the same correlation key. The refused item still runs; it just
    /// has no row of its own. A capture notification arriving while the
    /// authorisation of the same order is still pending is therefore not
    /// audited, and the refusal is logged with both execution ids.
    pub fn create(&self, log: &mut TransactionLog) -> Result<TransactionLogId, ProjectionError> {
        let _guard = self.write_guard();
        self.insert_new(log)
    }

    pub fn update(&self, log: &TransactionLog) -> Result<(), ProjectionError> {
        match self.logs.update(log) {
            Err(StorageError::NotFound { id, .. }) => Err(ProjectionError::NotFound(id.into())),
            other => Ok(other?),
        }
    }

    /// Create the row of `item`, or mirror `item` onto the existing one.
    ///
    /// A redelivered creation event only re-mirrors the row. A status event
    /// that overtakes the creation event creates the row from its own, newer
    /// snapshot, and the late creation event is then ignored as older.
    pub fn record_created(
        &self,
        item: &QueueItem,
        data: &TransactionData,
    ) -> Result<TransactionLog, ProjectionError> {
        let mut refused = self.write_guard();
        self.upsert(&mut refused, item, data)
    }

    /// Follow a status transition of `item`.
    ///
    /// Items carrying transaction data get their row created when it is
    /// still missing, unless their row was already refused. Other items are
    /// only mirrored. Returns `None` when the item has no row.
    pub fn record_status(&self, item: &QueueItem) -> Result<Option<TransactionLog>, ProjectionError> {
        let Some(data) = &item.transaction else {
            return self.mirror_status(item);
        };
        let execution_id = item.id.ok_or(ProjectionError::UnpersistedItem)?;

        let mut refused = self.write_guard();
        if refused.contains(&execution_id) {
            if item.is_terminal() {
                refused.remove(&execution_id);
            }
            return Ok(None);
        }
        self.upsert(&mut refused, item, data).map(Some)
    }

    /// Mirror the status of `item` onto its row.
    ///
    /// Returns `None` when the item has no row (children, tasks without
    /// transaction data).
    pub fn mirror_status(&self, item: &QueueItem) -> Result<Option<TransactionLog>, ProjectionError> {
        let execution_id = item.id.ok_or(ProjectionError::UnpersistedItem)?;
        let _guard = self.write_guard();

        let Some(mut log) = self.get_by_execution_id(execution_id)? else {
            return Ok(None);
        };
        self.apply_mirror(&mut log, item)?;
        Ok(Some(log))
    }

    /// Delete up to `limit` rows whose timestamp is strictly before `before`,
    /// oldest first.
    pub fn delete_logs(&self, before: DateTime<Utc>, limit: usize) -> Result<usize, ProjectionError> {
        let filter = QueryFilter::new()
            .where_lt("timestamp", before)
            .order_by("timestamp", SortOrder::Asc);
        Ok(self.logs.delete_matching(&filter, limit)?)
    }

    pub fn logs_exist(&self, before: DateTime<Utc>) -> Result<bool, ProjectionError> {
        let filter = QueryFilter::new().where_lt("timestamp", before);
        Ok(self.logs.find_one(&filter)?.is_some())
    }

    fn write_guard(&self) -> MutexGuard<'_, HashSet<QueueItemId>> {
        self.refused.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Caller holds the write lock and passes in its refused set.
    fn upsert(
        &self,
        refused: &mut HashSet<QueueItemId>,
        item: &QueueItem,
        data: &TransactionData,
    ) -> Result<TransactionLog, ProjectionError> {
        let execution_id = item.id.ok_or(ProjectionError::UnpersistedItem)?;
        if let Some(mut existing) = self.get_by_execution_id(execution_id)? {
            debug!(execution_id = %execution_id, "transaction log already exists, resuming");
            self.apply_mirror(&mut existing, item)?;
            return Ok(existing);
        }

        let mut log = TransactionLog::new(item, data, self.clock.now())?;
        match self.insert_new(&mut log) {
            Ok(_) => {}
            Err(err @ ProjectionError::ActiveLogExists { .. }) => {
                refused.insert(execution_id);
                return Err(err);
            }
            Err(err) => return Err(err),
        }
        if item.status != QueueStatus::Queued {
            debug!(
                execution_id = %execution_id,
                queue_status = %item.status,
                "transaction log created ahead of its creation event"
            );
        }
        Ok(log)
    }

    /// Caller holds the write lock.
    fn insert_new(&self, log: &mut TransactionLog) -> Result<TransactionLogId, ProjectionError> {
        if self.get_by_execution_id(log.execution_id)?.is_some() {
            return Err(ProjectionError::DuplicateExecution(log.execution_id));
        }
        if log.is_active() {
            if let Some(active) = self.get_active(&log.correlation_key)? {
                info!(
                    correlation_key = %log.correlation_key,
                    active_execution_id = %active.execution_id,
                    refused_execution_id = %log.execution_id,
                    event_code = %log.event_code,
                    "correlation key already has an active transaction log, no row recorded"
                );
                return Err(ProjectionError::ActiveLogExists {
                    correlation_key: log.correlation_key.clone(),
                    execution_id: active.execution_id,
                });
            }
        }

        let id = TransactionLogId::from(self.logs.insert(log)?);
        info!(
            log_id = %id,
            execution_id = %log.execution_id,
            correlation_key = %log.correlation_key,
            event_code = %log.event_code,
            "transaction log created"
        );
        Ok(id)
    }

    /// Caller holds the write lock.
    fn apply_mirror(&self, log: &mut TransactionLog, item: &QueueItem) -> Result<(), ProjectionError> {
        if log.mirror(item, self.clock.now()) {
            self.update(log)?;
            debug!(
                execution_id = %log.execution_id,
                queue_status = %log.queue_status,
                "transaction log status mirrored"
            );
        }
        Ok(())
    }

    fn older_than(older_than: Option<DateTime<Utc>>) -> QueryFilter {
        match older_than {
            Some(at) => QueryFilter::new().where_lt("timestamp", at),
            None => QueryFilter::new(),
        }
    }
}
