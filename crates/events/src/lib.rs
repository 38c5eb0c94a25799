//! In-process lifecycle events.
//!
//! Mechanics only: an [`Event`] contract, a [`Listener`] contract and a
//! synchronous [`ListenerBus`] that dispatches each published event to the
//! listeners subscribed to its kind, on the publisher's own thread.

pub mod bus;
pub mod event;
pub mod listener;
pub mod listener_bus;

pub use bus::{EventBus, ListenerFailure, PublishReport};
pub use event::Event;
pub use listener::{FnListener, Listener, ListenerError, listener_fn};
pub use listener_bus::ListenerBus;
