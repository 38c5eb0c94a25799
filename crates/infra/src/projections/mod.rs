//! Projection implementations (read model builders).
//!
//! Projections consume queue lifecycle events and build query-optimized read
//! models. All projections are:
//! - **Idempotent**: safe for at-least-once delivery
//! - **Monotonic**: a stale snapshot never overwrites a newer one
//! - **Passive**: the queue never depends on them; their failures are reported
//!   by the bus and otherwise ignored

pub mod listeners;
pub mod retention;
pub mod transaction_log;

pub use listeners::{
    STATUS_KINDS, TransactionLogCreationListener, TransactionLogStatusListener,
    register_transaction_log_listeners,
};
pub use retention::{RetentionJob, RetentionPolicy};
pub use transaction_log::{ProjectionError, TransactionLog, TransactionLogService};
