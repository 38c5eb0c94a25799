use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::sync::Arc;

use payqueue_core::{Entity, EntityId};

use super::query::{Condition, QueryFilter};
use super::r#trait::{IndexedStorage, RawRecord, StorageError};

/// Typed access to one entity type stored in an [`IndexedStorage`].
///
/// Construction registers the entity's index declaration, so every filter the
/// repository runs is checked against it.
pub struct Repository<E: Entity> {
    storage: Arc<dyn IndexedStorage>,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> Clone for Repository<E> {
    fn clone(&self) -> Self {
        Self {
            storage: self.storage.clone(),
            _entity: PhantomData,
        }
    }
}

impl<E: Entity> core::fmt::Debug for Repository<E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Repository")
            .field("entity_type", &E::ENTITY_TYPE)
            .finish()
    }
}

impl<E: Entity> Repository<E> {
    pub fn new(storage: Arc<dyn IndexedStorage>) -> Result<Self, StorageError> {
        storage.register(E::ENTITY_TYPE, E::index_map())?;
        Ok(Self {
            storage,
            _entity: PhantomData,
        })
    }

    pub fn storage(&self) -> &Arc<dyn IndexedStorage> {
        &self.storage
    }

    /// Insert a new entity and assign it the storage id.
    pub fn insert(&self, entity: &mut E) -> Result<EntityId, StorageError> {
        let id = self.storage.insert(E::ENTITY_TYPE, Self::to_record(entity)?)?;
        entity.set_entity_id(id);
        Ok(id)
    }

    pub fn update(&self, entity: &E) -> Result<(), StorageError> {
        self.storage.update(E::ENTITY_TYPE, Self::to_record(entity)?)
    }

    /// Replace the stored entity only if the stored row satisfies `conditions`.
    pub fn update_if(&self, entity: &E, conditions: &[Condition]) -> Result<bool, StorageError> {
        self.storage
            .update_if(E::ENTITY_TYPE, Self::to_record(entity)?, conditions)
    }

    pub fn get(&self, id: EntityId) -> Result<Option<E>, StorageError> {
        self.storage
            .get(E::ENTITY_TYPE, id)?
            .map(Self::from_record)
            .transpose()
    }

    pub fn find(&self, filter: &QueryFilter) -> Result<Vec<E>, StorageError> {
        self.storage
            .find(E::ENTITY_TYPE, filter)?
            .into_iter()
            .map(Self::from_record)
            .collect()
    }

    /// First entity in the filter's order.
    pub fn find_one(&self, filter: &QueryFilter) -> Result<Option<E>, StorageError> {
        let filter = filter.clone().with_limit(1);
        Ok(self.find(&filter)?.into_iter().next())
    }

    pub fn count(&self, filter: &QueryFilter) -> Result<usize, StorageError> {
        self.storage.count(E::ENTITY_TYPE, filter)
    }

    pub fn delete_matching(&self, filter: &QueryFilter, limit: usize) -> Result<usize, StorageError> {
        self.storage.delete_matching(E::ENTITY_TYPE, filter, limit)
    }

    fn to_record(entity: &E) -> Result<RawRecord, StorageError> {
        let body =
            serde_json::to_value(entity).map_err(|e| StorageError::Serialization(e.to_string()))?;
        let indexes: BTreeMap<String, _> = entity
            .index_values()
            .into_iter()
            .map(|(column, value)| (column.to_string(), value))
            .collect();
        Ok(RawRecord {
            id: entity.entity_id(),
            indexes,
            body,
        })
    }

    fn from_record(record: RawRecord) -> Result<E, StorageError> {
        let mut entity: E = serde_json::from_value(record.body)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        if let Some(id) = record.id {
            entity.set_entity_id(id);
        }
        Ok(entity)
    }
}

#[cfg(test)]
mod tests {
    use payqueue_core::{IndexMap, IndexValue};
    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::storage::{InMemoryIndexedStorage, SortOrder};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Refund {
        #[serde(skip)]
        id: Option<EntityId>,
        reference: String,
        amount_minor: i64,
    }

    impl Entity for Refund {
        const ENTITY_TYPE: &'static str = "refund";

        fn entity_id(&self) -> Option<EntityId> {
            self.id
        }

        fn set_entity_id(&mut self, id: EntityId) {
            self.id = Some(id);
        }

        fn index_map() -> IndexMap {
            IndexMap::new().add_string("reference").add_integer("amount_minor")
        }

        fn index_values(&self) -> Vec<(&'static str, IndexValue)> {
            vec![
                ("reference", self.reference.as_str().into()),
                ("amount_minor", self.amount_minor.into()),
            ]
        }
    }

    fn refund(reference: &str, amount_minor: i64) -> Refund {
        Refund {
            id: None,
            reference: reference.into(),
            amount_minor,
        }
    }

    fn repo() -> Repository<Refund> {
        Repository::new(Arc::new(InMemoryIndexedStorage::new())).unwrap()
    }

    #[test]
    fn insert_assigns_the_id_and_get_restores_it() {
        let repo = repo();
        let mut r = refund("R-1", 500);
        let id = repo.insert(&mut r).unwrap();

        assert_eq!(r.id, Some(id));
        assert_eq!(repo.get(id).unwrap(), Some(r));
    }

    #[test]
    fn find_uses_declared_indexes() {
        let repo = repo();
        for (reference, amount) in [("R-1", 500), ("R-2", 100), ("R-3", 300)] {
            repo.insert(&mut refund(reference, amount)).unwrap();
        }

        let filter = QueryFilter::new()
            .where_ge("amount_minor", 300_i64)
            .order_by("amount_minor", SortOrder::Asc);
        let found: Vec<_> = repo
            .find(&filter)
            .unwrap()
            .into_iter()
            .map(|r| r.reference)
            .collect();
        assert_eq!(found, vec!["R-3", "R-1"]);

        let largest = repo
            .find_one(&QueryFilter::new().order_by("amount_minor", SortOrder::Desc))
            .unwrap()
            .unwrap();
        assert_eq!(largest.reference, "R-1");
    }

    #[test]
    fn update_if_guards_on_stored_state() {
        let repo = repo();
        let mut r = refund("R-1", 500);
        repo.insert(&mut r).unwrap();

        let mut changed = r.clone();
        changed.amount_minor = 450;
        assert!(repo
            .update_if(&changed, &[Condition::eq("amount_minor", 500_i64)])
            .unwrap());
        assert!(!repo
            .update_if(&r, &[Condition::eq("amount_minor", 500_i64)])
            .unwrap());
        assert_eq!(repo.get(r.id.unwrap()).unwrap().unwrap().amount_minor, 450);
    }
}
