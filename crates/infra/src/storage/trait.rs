use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use payqueue_core::{EntityId, IndexMap, IndexType, IndexValue};

use super::query::{Condition, QueryFilter};

/// Name of the pseudo-column every entity type can be filtered and ordered by.
pub const ID_COLUMN: &str = "id";

/// A stored row: identity, indexed attribute values and the opaque body.
///
/// `RawRecord` is what backends persist. The body is the full serialized
/// entity; the index values are a projection of it that queries can see.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    /// Assigned by storage on insert; required for updates.
    pub id: Option<EntityId>,
    pub indexes: BTreeMap<String, IndexValue>,
    pub body: JsonValue,
}

impl RawRecord {
    pub fn new(indexes: BTreeMap<String, IndexValue>, body: JsonValue) -> Self {
        Self {
            id: None,
            indexes,
            body,
        }
    }

    pub fn with_id(mut self, id: EntityId) -> Self {
        self.id = Some(id);
        self
    }

    /// Value of an indexed column (`Null` when the record does not carry it).
    pub fn index_value(&self, column: &str) -> IndexValue {
        if column == ID_COLUMN {
            return self.id.map_or(IndexValue::Null, |id| IndexValue::from(id.get()));
        }
        self.indexes.get(column).cloned().unwrap_or(IndexValue::Null)
    }
}

/// Storage operation error.
///
/// `UnindexedFilter`, `TypeMismatch` and `UnknownEntityType` are programming
/// errors: the query or registration is wrong and retrying cannot help.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("entity type '{entity_type}' has no index on '{column}'")]
    UnindexedFilter { entity_type: String, column: String },

    #[error("column '{column}' of '{entity_type}' is indexed as {expected:?}, got {found:?}")]
    TypeMismatch {
        entity_type: String,
        column: String,
        expected: IndexType,
        found: Option<IndexType>,
    },

    #[error("entity type '{0}' is not registered")]
    UnknownEntityType(String),

    #[error("{entity_type} {id} not found")]
    NotFound { entity_type: String, id: EntityId },

    #[error("{0} record has no id; insert it before updating")]
    MissingId(String),

    #[error("serialization failed: {0}")]
    Serialization(String),

    #[error("storage lock poisoned")]
    Poisoned,
}

impl StorageError {
    pub fn is_programming_error(&self) -> bool {
        matches!(
            self,
            StorageError::UnindexedFilter { .. }
                | StorageError::TypeMismatch { .. }
                | StorageError::UnknownEntityType(_)
        )
    }
}

/// Key/value persistence with declared secondary indexes per entity type.
///
/// ## Contract
///
/// - Filters and orderings may only reference columns declared in the entity
///   type's [`IndexMap`] (plus the `id` pseudo-column); anything else fails
///   fast with [`StorageError::UnindexedFilter`].
/// - `find`, `count` and `delete_matching` must stay cheap on large tables:
///   callers that walk a whole table page through it with `limit`/`offset`.
/// - Writes are visible to subsequent reads on the same instance. Nothing is
///   promised across instances.
/// - `update_if` is atomic with respect to every other operation on the same
///   instance. It is the primitive exclusive claims are built on.
pub trait IndexedStorage: Send + Sync {
    /// Declare the indexes of `entity_type`. Re-registering replaces the
    /// declaration and rebuilds the indexes of rows already stored.
    fn register(&self, entity_type: &str, index_map: IndexMap) -> Result<(), StorageError>;

    fn insert(&self, entity_type: &str, record: RawRecord) -> Result<EntityId, StorageError>;

    fn update(&self, entity_type: &str, record: RawRecord) -> Result<(), StorageError>;

    /// Replace the stored row only if it currently satisfies every condition.
    ///
    /// Returns `false` (and changes nothing) when a condition does not hold.
    fn update_if(
        &self,
        entity_type: &str,
        record: RawRecord,
        conditions: &[Condition],
    ) -> Result<bool, StorageError>;

    fn get(&self, entity_type: &str, id: EntityId) -> Result<Option<RawRecord>, StorageError>;

    /// Matching rows in the filter's order, paginated by its limit/offset.
    fn find(&self, entity_type: &str, filter: &QueryFilter) -> Result<Vec<RawRecord>, StorageError>;

    /// Number of matching rows (ordering and pagination are ignored).
    fn count(&self, entity_type: &str, filter: &QueryFilter) -> Result<usize, StorageError>;

    /// Delete at most `limit` matching rows, taken in the filter's order.
    fn delete_matching(
        &self,
        entity_type: &str,
        filter: &QueryFilter,
        limit: usize,
    ) -> Result<usize, StorageError>;
}
