//! Application tasks run by the queue.

pub mod order_update;

pub use order_update::{
    InMemoryOrderService, Notification, OrderService, OrderServiceError, OrderUpdateOutcome,
    OrderUpdateTask,
};
