//! Filter, ordering and pagination over indexed attributes.
//!
//! A [`QueryFilter`] is a conjunction of [`Condition`]s plus an ordering and
//! an optional page. Filters are plain data: backends validate the referenced
//! columns against the entity type's index declarations before running them.

use std::cmp::Ordering;

use payqueue_core::IndexValue;

/// Comparison applied to one indexed column.
///
/// Equality treats `Null` as a regular value (`Eq(Null)` finds rows where the
/// column is unset). Range comparisons never match `Null` on either side.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Eq(IndexValue),
    Ne(IndexValue),
    Gt(IndexValue),
    Ge(IndexValue),
    Lt(IndexValue),
    Le(IndexValue),
    In(Vec<IndexValue>),
}

impl Predicate {
    pub fn matches(&self, value: &IndexValue) -> bool {
        match self {
            Predicate::Eq(expected) => value == expected,
            Predicate::Ne(expected) => value != expected,
            Predicate::In(options) => options.contains(value),
            Predicate::Gt(bound) => Self::ranged(value, bound, |o| o == Ordering::Greater),
            Predicate::Ge(bound) => Self::ranged(value, bound, |o| o != Ordering::Less),
            Predicate::Lt(bound) => Self::ranged(value, bound, |o| o == Ordering::Less),
            Predicate::Le(bound) => Self::ranged(value, bound, |o| o != Ordering::Greater),
        }
    }

    /// Values the predicate compares against.
    pub fn operands(&self) -> &[IndexValue] {
        match self {
            Predicate::Eq(v)
            | Predicate::Ne(v)
            | Predicate::Gt(v)
            | Predicate::Ge(v)
            | Predicate::Lt(v)
            | Predicate::Le(v) => core::slice::from_ref(v),
            Predicate::In(values) => values,
        }
    }

    pub fn is_range(&self) -> bool {
        matches!(
            self,
            Predicate::Gt(_) | Predicate::Ge(_) | Predicate::Lt(_) | Predicate::Le(_)
        )
    }

    fn ranged(value: &IndexValue, bound: &IndexValue, accept: impl Fn(Ordering) -> bool) -> bool {
        if value.is_null() || bound.is_null() {
            return false;
        }
        accept(value.cmp(bound))
    }
}

/// One column constraint.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub column: String,
    pub predicate: Predicate,
}

impl Condition {
    pub fn new(column: impl Into<String>, predicate: Predicate) -> Self {
        Self {
            column: column.into(),
            predicate,
        }
    }

    pub fn eq(column: impl Into<String>, value: impl Into<IndexValue>) -> Self {
        Self::new(column, Predicate::Eq(value.into()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

/// Ordering key: an indexed column and a direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub column: String,
    pub order: SortOrder,
}

/// Conjunctive filter with ordering and pagination.
///
/// Results are ordered by the declared keys, then by id ascending, so paging
/// through a stable table never repeats or skips a row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryFilter {
    conditions: Vec<Condition>,
    order: Vec<OrderBy>,
    limit: Option<usize>,
    offset: usize,
}

impl QueryFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn where_eq(self, column: impl Into<String>, value: impl Into<IndexValue>) -> Self {
        self.with_condition(Condition::new(column, Predicate::Eq(value.into())))
    }

    pub fn where_ne(self, column: impl Into<String>, value: impl Into<IndexValue>) -> Self {
        self.with_condition(Condition::new(column, Predicate::Ne(value.into())))
    }

    pub fn where_gt(self, column: impl Into<String>, value: impl Into<IndexValue>) -> Self {
        self.with_condition(Condition::new(column, Predicate::Gt(value.into())))
    }

    pub fn where_ge(self, column: impl Into<String>, value: impl Into<IndexValue>) -> Self {
        self.with_condition(Condition::new(column, Predicate::Ge(value.into())))
    }

    pub fn where_lt(self, column: impl Into<String>, value: impl Into<IndexValue>) -> Self {
        self.with_condition(Condition::new(column, Predicate::Lt(value.into())))
    }

    pub fn where_le(self, column: impl Into<String>, value: impl Into<IndexValue>) -> Self {
        self.with_condition(Condition::new(column, Predicate::Le(value.into())))
    }

    pub fn where_in<I, V>(self, column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<IndexValue>,
    {
        let values = values.into_iter().map(Into::into).collect();
        self.with_condition(Condition::new(column, Predicate::In(values)))
    }

    pub fn order_by(mut self, column: impl Into<String>, order: SortOrder) -> Self {
        self.order.push(OrderBy {
            column: column.into(),
            order,
        });
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn ordering(&self) -> &[OrderBy] {
        &self.order
    }

    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Every column the filter references (conditions first, then ordering).
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.conditions
            .iter()
            .map(|c| c.column.as_str())
            .chain(self.order.iter().map(|o| o.column.as_str()))
    }
}
