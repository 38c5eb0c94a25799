//! Lifecycle events published by the queue service.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use payqueue_core::QueueItemId;
use payqueue_events::Event;

use super::task::TransactionData;
use super::types::QueueItem;

/// Routing key of a [`QueueEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueEventKind {
    Created,
    Started,
    Progress,
    RetryScheduled,
    /// Terminal `completed` or `failed`.
    Finished,
    Aborted,
}

impl QueueEventKind {
    pub const ALL: [QueueEventKind; 6] = [
        QueueEventKind::Created,
        QueueEventKind::Started,
        QueueEventKind::Progress,
        QueueEventKind::RetryScheduled,
        QueueEventKind::Finished,
        QueueEventKind::Aborted,
    ];

    pub fn event_type(&self) -> &'static str {
        match self {
            QueueEventKind::Created => "queue.item.created",
            QueueEventKind::Started => "queue.item.started",
            QueueEventKind::Progress => "queue.item.progress",
            QueueEventKind::RetryScheduled => "queue.item.retry_scheduled",
            QueueEventKind::Finished => "queue.item.finished",
            QueueEventKind::Aborted => "queue.item.aborted",
        }
    }
}

/// A queue item transition, with the item as it was persisted by it.
#[derive(Debug, Clone)]
pub struct QueueEvent {
    event_id: Uuid,
    occurred_at: DateTime<Utc>,
    kind: QueueEventKind,
    item: QueueItem,
}

impl QueueEvent {
    pub fn new(kind: QueueEventKind, item: QueueItem, occurred_at: DateTime<Utc>) -> Self {
        Self {
            event_id: Uuid::now_v7(),
            occurred_at,
            kind,
            item,
        }
    }

    pub fn item(&self) -> &QueueItem {
        &self.item
    }

    pub fn item_id(&self) -> Option<QueueItemId> {
        self.item.id
    }

    /// Business data the item's transaction log row is built from.
    pub fn transaction(&self) -> Option<&TransactionData> {
        self.item.transaction.as_ref()
    }

    pub fn into_item(self) -> QueueItem {
        self.item
    }
}

impl Event for QueueEvent {
    type Kind = QueueEventKind;

    fn kind(&self) -> QueueEventKind {
        self.kind
    }

    fn event_type(&self) -> &'static str {
        self.kind.event_type()
    }

    fn event_id(&self) -> Uuid {
        self.event_id
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }
}
