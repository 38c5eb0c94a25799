//! Indexed storage boundary.
//!
//! Entities are stored as opaque JSON bodies next to a set of declared,
//! typed index values. Queries (filter, order, paginate, count, bulk delete)
//! may only touch declared indexes, which keeps every query answerable without
//! a full table scan on any backend that honors the declarations.

pub mod in_memory;
pub mod query;
pub mod repository;
pub mod r#trait;

pub use in_memory::InMemoryIndexedStorage;
pub use query::{Condition, OrderBy, Predicate, QueryFilter, SortOrder};
pub use repository::Repository;
pub use r#trait::{ID_COLUMN, IndexedStorage, RawRecord, StorageError};
