//! Synchronous in-process listener bus.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, RwLock};

use tracing::{debug, warn};

use crate::bus::{EventBus, ListenerFailure, PublishReport};
use crate::{Event, Listener};

/// In-process pub/sub bus with per-kind listener lists.
///
/// - No IO / no async
/// - Dispatch happens on the publishing thread
/// - The listener list is snapshotted before dispatch, so a listener may
///   itself publish or subscribe without deadlocking
pub struct ListenerBus<E: Event> {
    listeners: RwLock<HashMap<E::Kind, Vec<Arc<dyn Listener<E>>>>>,
}

impl<E: Event> ListenerBus<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Number of listeners registered for `kind`.
    pub fn listener_count(&self, kind: E::Kind) -> usize {
        let listeners = self.listeners.read().unwrap_or_else(|e| e.into_inner());
        listeners.get(&kind).map_or(0, Vec::len)
    }

    fn snapshot(&self, kind: E::Kind) -> Vec<Arc<dyn Listener<E>>> {
        let listeners = self.listeners.read().unwrap_or_else(|e| e.into_inner());
        listeners.get(&kind).cloned().unwrap_or_default()
    }
}

impl<E: Event> Default for ListenerBus<E> {
    fn default() -> Self {
        Self {
            listeners: RwLock::new(HashMap::new()),
        }
    }
}

impl<E: Event> core::fmt::Debug for ListenerBus<E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let listeners = self.listeners.read().unwrap_or_else(|e| e.into_inner());
        let counts: HashMap<&E::Kind, usize> =
            listeners.iter().map(|(k, v)| (k, v.len())).collect();
        f.debug_struct("ListenerBus").field("listeners", &counts).finish()
    }
}

impl<E: Event> EventBus<E> for ListenerBus<E> {
    fn subscribe(&self, kind: E::Kind, listener: Arc<dyn Listener<E>>) {
        // Lock poisoning only happens if a thread panicked mid-insert; the map
        // itself is still consistent, so keep going with the inner value.
        let mut listeners = self.listeners.write().unwrap_or_else(|e| e.into_inner());
        listeners.entry(kind).or_default().push(listener);
    }

    fn publish(&self, event: &E) -> PublishReport {
        let mut report = PublishReport::default();

        for listener in self.snapshot(event.kind()) {
            let outcome = catch_unwind(AssertUnwindSafe(|| listener.on_event(event)));

            let error = match outcome {
                Ok(Ok(())) => {
                    report.delivered += 1;
                    continue;
                }
                Ok(Err(err)) => err.to_string(),
                Err(panic) => panic_message(panic.as_ref()),
            };

            warn!(
                listener = listener.name(),
                event_type = event.event_type(),
                event_id = %event.event_id(),
                error = %error,
                "event listener failed"
            );
            report.failures.push(ListenerFailure {
                listener: listener.name().to_string(),
                error,
            });
        }

        debug!(
            event_type = event.event_type(),
            event_id = %event.event_id(),
            delivered = report.delivered,
            failed = report.failures.len(),
            "event published"
        );

        report
    }
}

fn panic_message(panic: &(dyn core::any::Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        format!("listener panicked: {msg}")
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        format!("listener panicked: {msg}")
    } else {
        "listener panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::{DateTime, Utc};
    use uuid::Uuid;

    use super::*;
    use crate::{ListenerError, listener_fn};

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum Kind {
        Ping,
        Pong,
    }

    #[derive(Debug, Clone)]
    struct TestEvent {
        id: Uuid,
        kind: Kind,
        at: DateTime<Utc>,
    }

    impl TestEvent {
        fn new(kind: Kind) -> Self {
            Self {
                id: Uuid::now_v7(),
                kind,
                at: Utc::now(),
            }
        }
    }

    impl Event for TestEvent {
        type Kind = Kind;

        fn kind(&self) -> Kind {
            self.kind
        }

        fn event_type(&self) -> &'static str {
            match self.kind {
                Kind::Ping => "test.ping",
                Kind::Pong => "test.pong",
            }
        }

        fn event_id(&self) -> Uuid {
            self.id
        }

        fn occurred_at(&self) -> DateTime<Utc> {
            self.at
        }
    }

    fn counting(name: &str, counter: Arc<AtomicUsize>) -> Arc<dyn Listener<TestEvent>> {
        Arc::new(listener_fn(name, move |_e: &TestEvent| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }))
    }

    #[test]
    fn dispatches_only_to_listeners_of_the_event_kind() {
        let bus = ListenerBus::new();
        let pings = Arc::new(AtomicUsize::new(0));
        let pongs = Arc::new(AtomicUsize::new(0));
        bus.subscribe(Kind::Ping, counting("pings", pings.clone()));
        bus.subscribe(Kind::Pong, counting("pongs", pongs.clone()));

        let report = bus.publish(&TestEvent::new(Kind::Ping));

        assert_eq!(report.delivered, 1);
        assert!(report.is_clean());
        assert_eq!(pings.load(Ordering::SeqCst), 1);
        assert_eq!(pongs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn listeners_run_in_subscription_order() {
        let bus = ListenerBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for name in ["first", "second", "third"] {
            let seen = seen.clone();
            bus.subscribe(
                Kind::Ping,
                Arc::new(listener_fn(name, move |_e: &TestEvent| {
                    seen.lock().unwrap().push(name);
                    Ok(())
                })),
            );
        }

        bus.publish(&TestEvent::new(Kind::Ping));

        assert_eq!(*seen.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn failing_listener_does_not_stop_dispatch() {
        let bus = ListenerBus::new();
        let after = Arc::new(AtomicUsize::new(0));
        bus.subscribe(
            Kind::Ping,
            Arc::new(listener_fn("broken", |_e: &TestEvent| {
                Err(ListenerError::new("projection unavailable"))
            })),
        );
        bus.subscribe(Kind::Ping, counting("after", after.clone()));

        let report = bus.publish(&TestEvent::new(Kind::Ping));

        assert_eq!(report.delivered, 1);
        assert_eq!(report.attempted(), 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].listener, "broken");
        assert_eq!(report.failures[0].error, "projection unavailable");
        assert_eq!(after.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_listener_is_isolated() {
        let bus = ListenerBus::new();
        let after = Arc::new(AtomicUsize::new(0));
        bus.subscribe(
            Kind::Pong,
            Arc::new(listener_fn("panics", |_e: &TestEvent| -> Result<(), ListenerError> {
                panic!("boom")
            })),
        );
        bus.subscribe(Kind::Pong, counting("after", after.clone()));

        let report = bus.publish(&TestEvent::new(Kind::Pong));

        assert_eq!(report.failures.len(), 1);
        assert!(report.failures[0].error.contains("boom"));
        assert_eq!(after.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn listener_may_subscribe_while_handling() {
        let bus = ListenerBus::arc();
        let inner_bus = bus.clone();
        bus.subscribe(
            Kind::Ping,
            Arc::new(listener_fn("subscriber", move |_e: &TestEvent| {
                inner_bus.subscribe(
                    Kind::Pong,
                    Arc::new(listener_fn("late", |_e: &TestEvent| Ok(()))),
                );
                Ok(())
            })),
        );

        bus.publish(&TestEvent::new(Kind::Ping));

        assert_eq!(bus.listener_count(Kind::Pong), 1);
    }

    #[test]
    fn publishing_without_listeners_is_a_no_op() {
        let bus: ListenerBus<TestEvent> = ListenerBus::new();
        let report = bus.publish(&TestEvent::new(Kind::Ping));
        assert_eq!(report, PublishReport::default());
    }
}
