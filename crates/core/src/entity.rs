//! Entity trait: identity + index declarations for persisted records.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::id::EntityId;
use crate::index::{IndexMap, IndexValue};

/// A persisted entity.
///
/// The identity is assigned by storage on first insert (`id()` is `None`
/// before that). Everything else about the entity round-trips through serde;
/// the values returned by `index_values` are what queries can see.
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Stable entity type name (storage namespace).
    const ENTITY_TYPE: &'static str;

    /// Returns the storage identifier, if persisted.
    fn entity_id(&self) -> Option<EntityId>;

    /// Assigns the storage identifier after insert/load.
    fn set_entity_id(&mut self, id: EntityId);

    /// Declared secondary indexes for this entity type.
    fn index_map() -> IndexMap;

    /// Current values of the indexed attributes.
    ///
    /// Attributes missing from the result are indexed as `Null`.
    fn index_values(&self) -> Vec<(&'static str, IndexValue)>;
}
