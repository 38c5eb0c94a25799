//! Queue item state machine.
//!
//! ```text
//! queued ──start──▶ in_progress ──complete──▶ completed
//!                        │
//!                        ├──fail, retries left──▶ queued
//!                        └──fail, none left─────▶ failed
//!
//! queued | in_progress ──abort──▶ aborted
//! ```
//!
//! Every function here is pure: it takes the current item and the time of
//! the transition and returns the next item together with the event that
//! announces it. Persisting the item and publishing the event is the caller's
//! job, in that order.

use chrono::{DateTime, Utc};
use thiserror::Error;

use super::events::{QueueEvent, QueueEventKind};
use super::types::{MAX_PROGRESS, QueueItem, QueueStatus};

/// The next state of an item and the event announcing it.
#[derive(Debug, Clone)]
pub struct Transition {
    pub item: QueueItem,
    pub event: QueueEvent,
}

impl Transition {
    fn new(kind: QueueEventKind, item: QueueItem, now: DateTime<Utc>) -> Self {
        Self {
            event: QueueEvent::new(kind, item.clone(), now),
            item,
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("cannot {action} a queue item in status {from}")]
    Illegal {
        from: QueueStatus,
        action: &'static str,
    },

    #[error("progress cannot go back from {current} to {requested} base points")]
    ProgressRegression { current: u32, requested: u32 },
}

fn require(item: &QueueItem, expected: QueueStatus, action: &'static str) -> Result<(), TransitionError> {
    if item.status == expected {
        Ok(())
    } else {
        Err(TransitionError::Illegal {
            from: item.status,
            action,
        })
    }
}

/// `queued` → `in_progress`.
pub fn start(item: &QueueItem, now: DateTime<Utc>) -> Result<Transition, TransitionError> {
    require(item, QueueStatus::Queued, "start")?;
    let mut next = item.clone();
    next.status = QueueStatus::InProgress;
    next.started_at = Some(now);
    next.finished_at = None;
    next.last_update_at = now;
    next.progress_base_points = 0;
    Ok(Transition::new(QueueEventKind::Started, next, now))
}

/// Record progress of a running item. Values above the maximum are clamped.
pub fn report_progress(
    item: &QueueItem,
    base_points: u32,
    now: DateTime<Utc>,
) -> Result<Transition, TransitionError> {
    require(item, QueueStatus::InProgress, "report progress on")?;
    let requested = base_points.min(MAX_PROGRESS);
    if requested < item.progress_base_points {
        return Err(TransitionError::ProgressRegression {
            current: item.progress_base_points,
            requested,
        });
    }
    let mut next = item.clone();
    next.progress_base_points = requested;
    next.last_update_at = now;
    Ok(Transition::new(QueueEventKind::Progress, next, now))
}

/// Refresh the activity timestamp of a running item. Publishes nothing.
pub fn keep_alive(item: &QueueItem, now: DateTime<Utc>) -> Result<QueueItem, TransitionError> {
    require(item, QueueStatus::InProgress, "keep alive")?;
    let mut next = item.clone();
    next.last_update_at = now;
    Ok(next)
}

/// `in_progress` → `completed`.
pub fn complete(item: &QueueItem, now: DateTime<Utc>) -> Result<Transition, TransitionError> {
    require(item, QueueStatus::InProgress, "complete")?;
    let mut next = item.clone();
    next.status = QueueStatus::Completed;
    next.progress_base_points = MAX_PROGRESS;
    next.finished_at = Some(now);
    next.last_update_at = now;
    next.failure_description = None;
    Ok(Transition::new(QueueEventKind::Finished, next, now))
}

/// A failed attempt: back to `queued` while retries remain, `failed` otherwise.
///
/// A retried item gets a fresh `queued_at`, which moves it behind everything
/// already waiting.
pub fn fail(
    item: &QueueItem,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<Transition, TransitionError> {
    require(item, QueueStatus::InProgress, "fail")?;
    let mut next = item.clone();
    next.retries = item.retries.saturating_add(1);
    next.failure_description = Some(reason.to_string());
    next.last_update_at = now;

    if next.retries <= next.max_retries {
        next.status = QueueStatus::Queued;
        next.queued_at = now;
        next.started_at = None;
        next.progress_base_points = 0;
        Ok(Transition::new(QueueEventKind::RetryScheduled, next, now))
    } else {
        next.status = QueueStatus::Failed;
        next.finished_at = Some(now);
        Ok(Transition::new(QueueEventKind::Finished, next, now))
    }
}

/// Stop an item for good. Allowed while it waits or runs.
pub fn abort(
    item: &QueueItem,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<Transition, TransitionError> {
    if item.status.is_terminal() {
        return Err(TransitionError::Illegal {
            from: item.status,
            action: "abort",
        });
    }
    let mut next = item.clone();
    next.status = QueueStatus::Aborted;
    next.failure_description = Some(reason.to_string());
    next.finished_at = Some(now);
    next.last_update_at = now;
    Ok(Transition::new(QueueEventKind::Aborted, next, now))
}
