//! Event publishing/subscription abstraction (mechanics only).
//!
//! This module provides the **event bus pattern**: a pub/sub mechanism that
//! distributes lifecycle events to any number of listeners (projections,
//! audit writers, notifiers) without the publisher knowing who they are.
//!
//! ## Delivery semantics
//!
//! - **Synchronous**: `publish` returns after every subscribed listener ran, on
//!   the caller's thread.
//! - **Isolated failures**: a failing (or panicking) listener is logged and
//!   reported; remaining listeners still run and the publisher is not aborted.
//! - **At-least-once**: the same event may be published again (e.g. after a
//!   crash between a state change and its event); listeners must be idempotent.

use std::sync::Arc;

use crate::{Event, Listener};

/// A listener that failed while handling an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerFailure {
    pub listener: String,
    pub error: String,
}

/// Outcome of dispatching one event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Listeners that handled the event successfully.
    pub delivered: usize,
    /// Listeners that returned an error or panicked.
    pub failures: Vec<ListenerFailure>,
}

impl PublishReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn attempted(&self) -> usize {
        self.delivered + self.failures.len()
    }
}

/// Domain-agnostic, in-process event bus.
///
/// An explicit bus object is constructed at startup and handed to the
/// components that publish (the queue engine) and subscribe (projections).
/// There is no process-wide registry.
///
/// ## Thread Safety
///
/// The trait requires `Send + Sync`: the same bus is shared by every worker
/// thread, and publishing from several threads at once is allowed.
pub trait EventBus<E: Event>: Send + Sync {
    /// Register `listener` for events of `kind`. Listeners for one kind run in
    /// subscription order.
    fn subscribe(&self, kind: E::Kind, listener: Arc<dyn Listener<E>>);

    /// Dispatch `event` to every listener subscribed to its kind.
    fn publish(&self, event: &E) -> PublishReport;
}

impl<E, B> EventBus<E> for Arc<B>
where
    E: Event,
    B: EventBus<E> + ?Sized,
{
    fn subscribe(&self, kind: E::Kind, listener: Arc<dyn Listener<E>>) {
        (**self).subscribe(kind, listener)
    }

    fn publish(&self, event: &E) -> PublishReport {
        (**self).publish(event)
    }
}
