//! Call-boundary input types for lookups, writes and searches.
//!
//! Polymorphic arguments are modelled as small sum types built with `From`
//! conversions, so repositories resolve them once instead of inspecting
//! runtime types.

use crate::entity::Entity;
use crate::query::{Condition, Order};
use crate::value::{PrimaryKey, Row, Value};

/// Identifies one row for `find`-style operations.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<'a> {
    /// Scalar or positional composite key.
    Key(PrimaryKey),
    /// Mapping containing every key column; extra columns are ignored.
    Mapping(Row),
    /// Entity of the repository's own table, resolved by its persisted key.
    Reference(&'a Entity),
}

impl From<PrimaryKey> for Lookup<'_> {
    fn from(value: PrimaryKey) -> Self {
        Self::Key(value)
    }
}

impl From<i64> for Lookup<'_> {
    fn from(value: i64) -> Self {
        Self::Key(value.into())
    }
}

impl From<i32> for Lookup<'_> {
    fn from(value: i32) -> Self {
        Self::Key(value.into())
    }
}

impl From<&str> for Lookup<'_> {
    fn from(value: &str) -> Self {
        Self::Key(value.into())
    }
}

impl From<String> for Lookup<'_> {
    fn from(value: String) -> Self {
        Self::Key(value.into())
    }
}

impl From<Value> for Lookup<'_> {
    fn from(value: Value) -> Self {
        Self::Key(value.into())
    }
}

impl From<Vec<Value>> for Lookup<'_> {
    fn from(values: Vec<Value>) -> Self {
        Self::Key(values.into())
    }
}

impl From<Row> for Lookup<'_> {
    fn from(mapping: Row) -> Self {
        Self::Mapping(mapping)
    }
}

impl<'a> From<&'a Entity> for Lookup<'a> {
    fn from(entity: &'a Entity) -> Self {
        Self::Reference(entity)
    }
}

/// Row selection for `update` and `delete`.
#[derive(Debug, Clone, PartialEq)]
pub enum RowSelector<'a> {
    Key(PrimaryKey),
    Reference(&'a Entity),
    /// Must contain only `Reference` items.
    List(Vec<RowSelector<'a>>),
    /// Mapping-as-where; must not be empty.
    Conditions(Row),
}

impl From<PrimaryKey> for RowSelector<'_> {
    fn from(value: PrimaryKey) -> Self {
        Self::Key(value)
    }
}

impl From<i64> for RowSelector<'_> {
    fn from(value: i64) -> Self {
        Self::Key(value.into())
    }
}

impl From<i32> for RowSelector<'_> {
    fn from(value: i32) -> Self {
        Self::Key(value.into())
    }
}

impl From<&str> for RowSelector<'_> {
    fn from(value: &str) -> Self {
        Self::Key(value.into())
    }
}

impl<'a> From<&'a Entity> for RowSelector<'a> {
    fn from(entity: &'a Entity) -> Self {
        Self::Reference(entity)
    }
}

impl<'a> From<&'a [Entity]> for RowSelector<'a> {
    fn from(entities: &'a [Entity]) -> Self {
        Self::List(entities.iter().map(Self::Reference).collect())
    }
}

impl From<Row> for RowSelector<'_> {
    fn from(mapping: Row) -> Self {
        Self::Conditions(mapping)
    }
}

/// Filtering, ordering and paging for `Repository::search`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchCriteria {
    pub conditions: Vec<Condition>,
    pub order_by: Vec<(String, Order)>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl SearchCriteria {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn order_by(mut self, column: impl Into<String>, order: Order) -> Self {
        self.order_by.push((column.into(), order));
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }
}
