use thiserror::Error;

use crate::Event;

/// Error raised by a listener while handling an event.
///
/// Listener errors never propagate to the publisher; the bus logs them and
/// reports them in the [`crate::PublishReport`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct ListenerError(String);

impl ListenerError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }

    pub fn message(&self) -> &str {
        &self.0
    }
}

/// Reacts to published events of the kinds it was subscribed to.
///
/// Listeners run inline with the publisher (the queue engine thread that caused
/// the transition), so they must not block indefinitely. Delivery is
/// at-least-once: handling the same event twice must be harmless.
pub trait Listener<E: Event>: Send + Sync {
    /// Name used in logs and failure reports.
    fn name(&self) -> &str;

    fn on_event(&self, event: &E) -> Result<(), ListenerError>;
}

/// Closure-backed listener.
pub struct FnListener<F> {
    name: String,
    f: F,
}

impl<F> core::fmt::Debug for FnListener<F> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FnListener").field("name", &self.name).finish()
    }
}

impl<E, F> Listener<E> for FnListener<F>
where
    E: Event,
    F: Fn(&E) -> Result<(), ListenerError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn on_event(&self, event: &E) -> Result<(), ListenerError> {
        (self.f)(event)
    }
}

/// Wrap a closure as a named listener.
pub fn listener_fn<E, F>(name: impl Into<String>, f: F) -> FnListener<F>
where
    E: Event,
    F: Fn(&E) -> Result<(), ListenerError> + Send + Sync,
{
    FnListener {
        name: name.into(),
        f,
    }
}
