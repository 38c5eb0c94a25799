use chrono::{DateTime, Utc};
use uuid::Uuid;

/// A domain-agnostic lifecycle event.
///
/// Events are:
/// - **immutable** (treat them as facts)
/// - **routed by kind**: listeners subscribe to a kind, not to a concrete value
/// - **uniquely identified**, so redelivery of the same fact is detectable
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Routing key listeners subscribe to.
    type Kind: Copy + Eq + core::hash::Hash + core::fmt::Debug + Send + Sync + 'static;

    fn kind(&self) -> Self::Kind;

    /// Stable event name/type identifier (e.g. "queue.item.created").
    fn event_type(&self) -> &'static str;

    /// Unique id of this event instance.
    fn event_id(&self) -> Uuid;

    /// When the event occurred.
    fn occurred_at(&self) -> DateTime<Utc>;
}
