//! Event bus listeners that keep the transaction log in step with the queue.

use std::sync::Arc;

use tracing::debug;

use payqueue_core::Clock;
use payqueue_events::{EventBus, Listener, ListenerError};

use super::transaction_log::{ProjectionError, TransactionLogService};
use crate::queue::{QueueEvent, QueueEventKind};

/// Kinds that move a row's `queue_status`.
pub const STATUS_KINDS: [QueueEventKind; 4] = [
    QueueEventKind::Started,
    QueueEventKind::RetryScheduled,
    QueueEventKind::Finished,
    QueueEventKind::Aborted,
];

impl From<ProjectionError> for ListenerError {
    fn from(err: ProjectionError) -> Self {
        ListenerError::new(err.to_string())
    }
}

/// Creates a row when a root item carrying transaction data is enqueued.
#[derive(Debug)]
pub struct TransactionLogCreationListener<C: Clock> {
    logs: Arc<TransactionLogService<C>>,
}

impl<C: Clock> TransactionLogCreationListener<C> {
    pub fn new(logs: Arc<TransactionLogService<C>>) -> Self {
        Self { logs }
    }
}

impl<C: Clock + 'static> Listener<QueueEvent> for TransactionLogCreationListener<C> {
    fn name(&self) -> &str {
        "transaction_log.creation"
    }

    fn on_event(&self, event: &QueueEvent) -> Result<(), ListenerError> {
        let item = event.item();
        if item.is_child() {
            return Ok(());
        }
        let Some(data) = event.transaction() else {
            return Ok(());
        };
        self.logs.record_created(item, data)?;
        Ok(())
    }
}

/// Mirrors status transitions of root items onto their rows, creating the
/// row when a transition overtakes the creation event.
#[derive(Debug)]
pub struct TransactionLogStatusListener<C: Clock> {
    logs: Arc<TransactionLogService<C>>,
}

impl<C: Clock> TransactionLogStatusListener<C> {
    pub fn new(logs: Arc<TransactionLogService<C>>) -> Self {
        Self { logs }
    }
}

impl<C: Clock + 'static> Listener<QueueEvent> for TransactionLogStatusListener<C> {
    fn name(&self) -> &str {
        "transaction_log.status"
    }

    fn on_event(&self, event: &QueueEvent) -> Result<(), ListenerError> {
        let item = event.item();
        if item.is_child() {
            return Ok(());
        }
        if self.logs.record_status(item)?.is_none() {
            debug!(
                item_id = ?item.id,
                task_type = %item.task_type,
                "no transaction log for queue item"
            );
        }
        Ok(())
    }
}

/// Subscribe both transaction log listeners to `bus`.
pub fn register_transaction_log_listeners<C, B>(bus: &B, logs: Arc<TransactionLogService<C>>)
where
    C: Clock + 'static,
    B: EventBus<QueueEvent> + ?Sized,
{
    bus.subscribe(
        QueueEventKind::Created,
        Arc::new(TransactionLogCreationListener::new(logs.clone())),
    );
    let status: Arc<dyn Listener<QueueEvent>> = Arc::new(TransactionLogStatusListener::new(logs));
    for kind in STATUS_KINDS {
        bus.subscribe(kind, status.clone());
    }
}
