use std::borrow::Cow;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Bound;
use std::sync::RwLock;

use payqueue_core::{EntityId, IndexMap, IndexType, IndexValue};

use super::query::{Condition, OrderBy, Predicate, QueryFilter, SortOrder};
use super::r#trait::{ID_COLUMN, IndexedStorage, RawRecord, StorageError};

type PostingLists = BTreeMap<IndexValue, BTreeSet<EntityId>>;

#[derive(Debug, Default)]
struct Table {
    index_map: IndexMap,
    rows: BTreeMap<EntityId, RawRecord>,
    /// One ordered posting list per declared column.
    indexes: HashMap<String, PostingLists>,
    next_id: u64,
}

impl Table {
    fn new(index_map: IndexMap) -> Self {
        let indexes = index_map
            .columns()
            .map(|(column, _)| (column.to_string(), PostingLists::new()))
            .collect();
        Self {
            index_map,
            indexes,
            ..Self::default()
        }
    }

    fn column_type(&self, column: &str) -> Option<IndexType> {
        if column == ID_COLUMN {
            Some(IndexType::Integer)
        } else {
            self.index_map.get(column)
        }
    }

    fn validate_conditions(
        &self,
        entity_type: &str,
        conditions: &[Condition],
    ) -> Result<(), StorageError> {
        for condition in conditions {
            let expected = self.require_column(entity_type, &condition.column)?;
            if let Some(bad) = condition
                .predicate
                .operands()
                .iter()
                .find(|v| !v.is_compatible_with(expected))
            {
                return Err(StorageError::TypeMismatch {
                    entity_type: entity_type.to_string(),
                    column: condition.column.clone(),
                    expected,
                    found: bad.index_type(),
                });
            }
        }
        Ok(())
    }

    fn validate(&self, entity_type: &str, filter: &QueryFilter) -> Result<(), StorageError> {
        self.validate_conditions(entity_type, filter.conditions())?;
        for key in filter.ordering() {
            self.require_column(entity_type, &key.column)?;
        }
        Ok(())
    }

    fn require_column(&self, entity_type: &str, column: &str) -> Result<IndexType, StorageError> {
        self.column_type(column)
            .ok_or_else(|| StorageError::UnindexedFilter {
                entity_type: entity_type.to_string(),
                column: column.to_string(),
            })
    }

    /// Type-check declared columns; undeclared values are kept but not indexed.
    fn check_record(&self, entity_type: &str, record: &RawRecord) -> Result<(), StorageError> {
        for (column, expected) in self.index_map.columns() {
            let Some(value) = record.indexes.get(column) else {
                continue;
            };
            if !value.is_compatible_with(expected) {
                return Err(StorageError::TypeMismatch {
                    entity_type: entity_type.to_string(),
                    column: column.to_string(),
                    expected,
                    found: value.index_type(),
                });
            }
        }
        Ok(())
    }

    fn index_add(&mut self, id: EntityId, record: &RawRecord) {
        for (column, postings) in self.indexes.iter_mut() {
            let value = record.indexes.get(column).cloned().unwrap_or(IndexValue::Null);
            postings.entry(value).or_default().insert(id);
        }
    }

    fn index_remove(&mut self, id: EntityId, record: &RawRecord) {
        for (column, postings) in self.indexes.iter_mut() {
            let value = record.indexes.get(column).cloned().unwrap_or(IndexValue::Null);
            if let Some(ids) = postings.get_mut(&value) {
                ids.remove(&id);
                if ids.is_empty() {
                    postings.remove(&value);
                }
            }
        }
    }

    fn reindex(&mut self, index_map: IndexMap) {
        let rows = std::mem::take(&mut self.rows);
        let next_id = self.next_id;
        *self = Table::new(index_map);
        self.next_id = next_id;
        for (id, record) in rows {
            self.index_add(id, &record);
            self.rows.insert(id, record);
        }
    }

    fn remove(&mut self, id: EntityId) -> Option<RawRecord> {
        let record = self.rows.remove(&id)?;
        self.index_remove(id, &record);
        Some(record)
    }

    /// Candidate ids from the cheapest usable index, `None` for a full scan.
    ///
    /// Candidates are a superset of the result; every condition is re-checked
    /// on the rows afterwards.
    fn plan(&self, conditions: &[Condition]) -> Option<BTreeSet<EntityId>> {
        let mut best: Option<BTreeSet<EntityId>> = None;
        for condition in conditions {
            if !matches!(condition.predicate, Predicate::Eq(_) | Predicate::In(_)) {
                continue;
            }
            let ids = self.point_lookup(&condition.column, condition.predicate.operands());
            if best.as_ref().is_none_or(|b| ids.len() < b.len()) {
                best = Some(ids);
            }
        }
        if best.is_some() {
            return best;
        }

        let ranged = conditions
            .iter()
            .find(|c| c.predicate.is_range() && c.column != ID_COLUMN)?;
        Some(self.range_lookup(&ranged.column, conditions))
    }

    fn point_lookup(&self, column: &str, values: &[IndexValue]) -> BTreeSet<EntityId> {
        if column == ID_COLUMN {
            return values
                .iter()
                .filter_map(|v| match v {
                    IndexValue::Integer(raw) if *raw >= 0 => Some(EntityId::new(*raw as u64)),
                    _ => None,
                })
                .filter(|id| self.rows.contains_key(id))
                .collect();
        }
        let Some(postings) = self.indexes.get(column) else {
            return BTreeSet::new();
        };
        values
            .iter()
            .filter_map(|v| postings.get(v))
            .flatten()
            .copied()
            .collect()
    }

    fn range_lookup(&self, column: &str, conditions: &[Condition]) -> BTreeSet<EntityId> {
        let Some(postings) = self.indexes.get(column) else {
            return BTreeSet::new();
        };

        // Null sorts first and never satisfies a range.
        let mut lower = Bound::Excluded(IndexValue::Null);
        let mut upper = Bound::Unbounded;
        for condition in conditions.iter().filter(|c| c.column == column) {
            match &condition.predicate {
                Predicate::Gt(v) => lower = tighter_lower(lower, Bound::Excluded(v.clone())),
                Predicate::Ge(v) => lower = tighter_lower(lower, Bound::Included(v.clone())),
                Predicate::Lt(v) => upper = tighter_upper(upper, Bound::Excluded(v.clone())),
                Predicate::Le(v) => upper = tighter_upper(upper, Bound::Included(v.clone())),
                _ => {}
            }
        }
        if bound_value(&upper).is_some_and(IndexValue::is_null) || is_empty_range(&lower, &upper) {
            return BTreeSet::new();
        }

        postings
            .range((lower, upper))
            .flat_map(|(_, ids)| ids.iter().copied())
            .collect()
    }

    /// Matching rows in id order.
    fn matching(&self, conditions: &[Condition]) -> Vec<&RawRecord> {
        let keep = |record: &&RawRecord| matches_all(record, conditions);
        match self.plan(conditions) {
            Some(ids) => ids
                .iter()
                .filter_map(|id| self.rows.get(id))
                .filter(keep)
                .collect(),
            None => self.rows.values().filter(keep).collect(),
        }
    }

    /// Matching rows ordered and paginated.
    fn select(&self, filter: &QueryFilter, limit: Option<usize>) -> Vec<&RawRecord> {
        let mut rows = self.matching(filter.conditions());
        let offset = filter.offset();
        let order = filter.ordering();

        if !order.is_empty() {
            let cmp = |a: &&RawRecord, b: &&RawRecord| compare_rows(a, b, order);
            match limit.map(|l| offset.saturating_add(l)) {
                // Only the first `wanted` rows matter: partition, then sort that prefix.
                Some(wanted) if wanted < rows.len() => {
                    if wanted == 0 {
                        return Vec::new();
                    }
                    rows.select_nth_unstable_by(wanted - 1, cmp);
                    rows.truncate(wanted);
                    rows.sort_by(cmp);
                }
                _ => rows.sort_by(cmp),
            }
        }

        rows.into_iter()
            .skip(offset)
            .take(limit.unwrap_or(usize::MAX))
            .collect()
    }
}

fn matches_all(record: &RawRecord, conditions: &[Condition]) -> bool {
    conditions
        .iter()
        .all(|c| c.predicate.matches(&column_value(record, &c.column)))
}

fn column_value<'r>(record: &'r RawRecord, column: &str) -> Cow<'r, IndexValue> {
    if column == ID_COLUMN {
        return Cow::Owned(record.index_value(ID_COLUMN));
    }
    match record.indexes.get(column) {
        Some(value) => Cow::Borrowed(value),
        None => Cow::Owned(IndexValue::Null),
    }
}

fn compare_rows(a: &RawRecord, b: &RawRecord, order: &[OrderBy]) -> Ordering {
    for key in order {
        let ord = column_value(a, &key.column).cmp(&column_value(b, &key.column));
        let ord = match key.order {
            SortOrder::Asc => ord,
            SortOrder::Desc => ord.reverse(),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a.id.cmp(&b.id)
}

fn bound_value(bound: &Bound<IndexValue>) -> Option<&IndexValue> {
    match bound {
        Bound::Included(v) | Bound::Excluded(v) => Some(v),
        Bound::Unbounded => None,
    }
}

fn tighter_lower(current: Bound<IndexValue>, candidate: Bound<IndexValue>) -> Bound<IndexValue> {
    match (bound_value(&current), bound_value(&candidate)) {
        (Some(c), Some(n)) if n > c => candidate,
        (Some(c), Some(n)) if n == c && matches!(candidate, Bound::Excluded(_)) => candidate,
        (None, Some(_)) => candidate,
        _ => current,
    }
}

fn tighter_upper(current: Bound<IndexValue>, candidate: Bound<IndexValue>) -> Bound<IndexValue> {
    match (bound_value(&current), bound_value(&candidate)) {
        (Some(c), Some(n)) if n < c => candidate,
        (Some(c), Some(n)) if n == c && matches!(candidate, Bound::Excluded(_)) => candidate,
        (None, Some(_)) => candidate,
        _ => current,
    }
}

/// `BTreeMap::range` panics on inverted or empty-exclusive bounds.
fn is_empty_range(lower: &Bound<IndexValue>, upper: &Bound<IndexValue>) -> bool {
    match (bound_value(lower), bound_value(upper)) {
        (Some(l), Some(u)) => {
            l > u
                || (l == u
                    && !(matches!(lower, Bound::Included(_)) && matches!(upper, Bound::Included(_))))
        }
        _ => false,
    }
}

/// In-memory indexed storage.
///
/// Rows live in a B-tree keyed by id; every declared column keeps an ordered
/// posting list (value -> ids), so equality, `IN` and range filters touch
/// only the matching slice of the table instead of scanning it.
///
/// A single `RwLock` guards all tables: writes, including `update_if`, are
/// serialized, which is what makes conditional updates atomic.
#[derive(Debug, Default)]
pub struct InMemoryIndexedStorage {
    tables: RwLock<HashMap<String, Table>>,
}

impl InMemoryIndexedStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows stored for `entity_type` (0 when unregistered).
    pub fn len(&self, entity_type: &str) -> usize {
        self.tables
            .read()
            .map(|tables| tables.get(entity_type).map_or(0, |t| t.rows.len()))
            .unwrap_or(0)
    }

    fn read<T>(
        &self,
        entity_type: &str,
        f: impl FnOnce(&Table) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let tables = self.tables.read().map_err(|_| StorageError::Poisoned)?;
        let table = tables
            .get(entity_type)
            .ok_or_else(|| StorageError::UnknownEntityType(entity_type.to_string()))?;
        f(table)
    }

    fn write<T>(
        &self,
        entity_type: &str,
        f: impl FnOnce(&mut Table) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let mut tables = self.tables.write().map_err(|_| StorageError::Poisoned)?;
        let table = tables
            .get_mut(entity_type)
            .ok_or_else(|| StorageError::UnknownEntityType(entity_type.to_string()))?;
        f(table)
    }
}

impl IndexedStorage for InMemoryIndexedStorage {
    fn register(&self, entity_type: &str, index_map: IndexMap) -> Result<(), StorageError> {
        let mut tables = self.tables.write().map_err(|_| StorageError::Poisoned)?;
        match tables.get_mut(entity_type) {
            Some(table) if table.index_map == index_map => {}
            Some(table) => table.reindex(index_map),
            None => {
                tables.insert(entity_type.to_string(), Table::new(index_map));
            }
        }
        Ok(())
    }

    fn insert(&self, entity_type: &str, record: RawRecord) -> Result<EntityId, StorageError> {
        self.write(entity_type, |table| {
            table.check_record(entity_type, &record)?;
            table.next_id += 1;
            let id = EntityId::new(table.next_id);
            let record = record.with_id(id);
            table.index_add(id, &record);
            table.rows.insert(id, record);
            Ok(id)
        })
    }

    fn update(&self, entity_type: &str, record: RawRecord) -> Result<(), StorageError> {
        self.update_if(entity_type, record, &[]).map(|_| ())
    }

    fn update_if(
        &self,
        entity_type: &str,
        record: RawRecord,
        conditions: &[Condition],
    ) -> Result<bool, StorageError> {
        self.write(entity_type, |table| {
            let id = record
                .id
                .ok_or_else(|| StorageError::MissingId(entity_type.to_string()))?;
            table.validate_conditions(entity_type, conditions)?;
            table.check_record(entity_type, &record)?;

            let current = table.rows.get(&id).ok_or_else(|| StorageError::NotFound {
                entity_type: entity_type.to_string(),
                id,
            })?;
            if !matches_all(current, conditions) {
                return Ok(false);
            }

            table.remove(id);
            table.index_add(id, &record);
            table.rows.insert(id, record);
            Ok(true)
        })
    }

    fn get(&self, entity_type: &str, id: EntityId) -> Result<Option<RawRecord>, StorageError> {
        self.read(entity_type, |table| Ok(table.rows.get(&id).cloned()))
    }

    fn find(&self, entity_type: &str, filter: &QueryFilter) -> Result<Vec<RawRecord>, StorageError> {
        self.read(entity_type, |table| {
            table.validate(entity_type, filter)?;
            Ok(table
                .select(filter, filter.limit())
                .into_iter()
                .cloned()
                .collect())
        })
    }

    fn count(&self, entity_type: &str, filter: &QueryFilter) -> Result<usize, StorageError> {
        self.read(entity_type, |table| {
            table.validate(entity_type, filter)?;
            Ok(table.matching(filter.conditions()).len())
        })
    }

    fn delete_matching(
        &self,
        entity_type: &str,
        filter: &QueryFilter,
        limit: usize,
    ) -> Result<usize, StorageError> {
        self.write(entity_type, |table| {
            table.validate(entity_type, filter)?;
            let ids: Vec<EntityId> = table
                .select(filter, Some(limit))
                .into_iter()
                .filter_map(|r| r.id)
                .collect();
            for id in &ids {
                table.remove(*id);
            }
            Ok(ids.len())
        })
    }
}
