//! Secondary index declarations.
//!
//! Every persisted entity type declares which of its attributes are indexed
//! and under what semantic type. Storage backends only allow filtering and
//! ordering on declared attributes.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Semantic type of an indexed attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexType {
    Boolean,
    Integer,
    Double,
    DateTime,
    String,
}

/// A value stored in (or compared against) a secondary index.
///
/// Values are totally ordered: first by variant (`Null` sorts first), then by
/// value. Doubles use IEEE total ordering so they can live in a B-tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum IndexValue {
    Null,
    Boolean(bool),
    Integer(i64),
    Double(f64),
    DateTime(DateTime<Utc>),
    String(String),
}

impl IndexValue {
    /// The index type this value belongs to (`None` for `Null`).
    pub fn index_type(&self) -> Option<IndexType> {
        match self {
            IndexValue::Null => None,
            IndexValue::Boolean(_) => Some(IndexType::Boolean),
            IndexValue::Integer(_) => Some(IndexType::Integer),
            IndexValue::Double(_) => Some(IndexType::Double),
            IndexValue::DateTime(_) => Some(IndexType::DateTime),
            IndexValue::String(_) => Some(IndexType::String),
        }
    }

    /// `Null` is compatible with every column type.
    pub fn is_compatible_with(&self, column: IndexType) -> bool {
        self.index_type().is_none_or(|t| t == column)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, IndexValue::Null)
    }

    fn rank(&self) -> u8 {
        match self {
            IndexValue::Null => 0,
            IndexValue::Boolean(_) => 1,
            IndexValue::Integer(_) => 2,
            IndexValue::Double(_) => 3,
            IndexValue::DateTime(_) => 4,
            IndexValue::String(_) => 5,
        }
    }
}

impl Ord for IndexValue {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (IndexValue::Null, IndexValue::Null) => Ordering::Equal,
            (IndexValue::Boolean(a), IndexValue::Boolean(b)) => a.cmp(b),
            (IndexValue::Integer(a), IndexValue::Integer(b)) => a.cmp(b),
            (IndexValue::Double(a), IndexValue::Double(b)) => a.total_cmp(b),
            (IndexValue::DateTime(a), IndexValue::DateTime(b)) => a.cmp(b),
            (IndexValue::String(a), IndexValue::String(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for IndexValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for IndexValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for IndexValue {}

impl From<bool> for IndexValue {
    fn from(value: bool) -> Self {
        IndexValue::Boolean(value)
    }
}

impl From<i64> for IndexValue {
    fn from(value: i64) -> Self {
        IndexValue::Integer(value)
    }
}

impl From<u32> for IndexValue {
    fn from(value: u32) -> Self {
        IndexValue::Integer(i64::from(value))
    }
}

impl From<u64> for IndexValue {
    fn from(value: u64) -> Self {
        IndexValue::Integer(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<f64> for IndexValue {
    fn from(value: f64) -> Self {
        IndexValue::Double(value)
    }
}

impl From<DateTime<Utc>> for IndexValue {
    fn from(value: DateTime<Utc>) -> Self {
        IndexValue::DateTime(value)
    }
}

impl From<String> for IndexValue {
    fn from(value: String) -> Self {
        IndexValue::String(value)
    }
}

impl From<&str> for IndexValue {
    fn from(value: &str) -> Self {
        IndexValue::String(value.to_string())
    }
}

impl<T> From<Option<T>> for IndexValue
where
    T: Into<IndexValue>,
{
    fn from(value: Option<T>) -> Self {
        value.map_or(IndexValue::Null, Into::into)
    }
}

/// Declaration of the indexed attributes of one entity type.
///
/// Declaring an attribute twice overwrites the earlier declaration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexMap {
    columns: BTreeMap<String, IndexType>,
}

impl IndexMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(mut self, column: impl Into<String>, index_type: IndexType) -> Self {
        self.columns.insert(column.into(), index_type);
        self
    }

    pub fn add_boolean(self, column: impl Into<String>) -> Self {
        self.add(column, IndexType::Boolean)
    }

    pub fn add_integer(self, column: impl Into<String>) -> Self {
        self.add(column, IndexType::Integer)
    }

    pub fn add_double(self, column: impl Into<String>) -> Self {
        self.add(column, IndexType::Double)
    }

    pub fn add_datetime(self, column: impl Into<String>) -> Self {
        self.add(column, IndexType::DateTime)
    }

    pub fn add_string(self, column: impl Into<String>) -> Self {
        self.add(column, IndexType::String)
    }

    pub fn get(&self, column: &str) -> Option<IndexType> {
        self.columns.get(column).copied()
    }

    pub fn contains(&self, column: &str) -> bool {
        self.columns.contains_key(column)
    }

    pub fn columns(&self) -> impl Iterator<Item = (&str, IndexType)> {
        self.columns.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn redeclaring_a_column_overwrites_it() {
        let map = IndexMap::new()
            .add_integer("retries")
            .add_string("status")
            .add_string("retries");

        assert_eq!(map.len(), 2);
        assert_eq!(map.get("retries"), Some(IndexType::String));
        assert_eq!(map.get("status"), Some(IndexType::String));
        assert!(!map.contains("missing"));
    }

    #[test]
    fn null_is_compatible_with_any_column() {
        assert!(IndexValue::Null.is_compatible_with(IndexType::DateTime));
        assert!(IndexValue::from(3_i64).is_compatible_with(IndexType::Integer));
        assert!(!IndexValue::from("x").is_compatible_with(IndexType::Integer));
    }

    #[test]
    fn optional_values_map_to_null() {
        assert_eq!(IndexValue::from(None::<String>), IndexValue::Null);
        assert_eq!(IndexValue::from(Some(5_u32)), IndexValue::Integer(5));
    }

    #[test]
    fn null_sorts_before_values() {
        assert!(IndexValue::Null < IndexValue::Integer(i64::MIN));
        assert!(IndexValue::Null < IndexValue::String(String::new()));
    }

    proptest! {
        #[test]
        fn double_ordering_is_total(a in any::<f64>(), b in any::<f64>()) {
            let left = IndexValue::Double(a);
            let right = IndexValue::Double(b);
            prop_assert_eq!(left.cmp(&right), a.total_cmp(&b));
            prop_assert_eq!(left.cmp(&right).reverse(), right.cmp(&left));
        }

        #[test]
        fn integer_ordering_matches_i64(a in any::<i64>(), b in any::<i64>()) {
            prop_assert_eq!(IndexValue::Integer(a).cmp(&IndexValue::Integer(b)), a.cmp(&b));
        }
    }
}
