//! `payqueue-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! identifiers, the injectable clock, index declarations and the persisted
//! entity contract.

pub mod clock;
pub mod entity;
pub mod error;
pub mod id;
pub mod index;

pub use clock::{Clock, ManualClock, SystemClock};
pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{EntityId, QueueItemId, TransactionLogId};
pub use index::{IndexMap, IndexType, IndexValue};
