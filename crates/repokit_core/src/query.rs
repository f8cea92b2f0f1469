//! Structured query builder handed to drivers.
//!
//! # Responsibility
//! - Describe one not-yet-executed operation against one table.
//! - Stay mutable until execution so behaviors can narrow or enrich it.
//!
//! # Invariants
//! - Top-level conditions are ANDed.
//! - A query never changes table or operation kind after construction.
//! - This module never renders SQL; drivers own that.

use crate::repo::error::{RepoError, RepoResult};
use crate::scope::Scope;
use crate::value::{PrimaryKey, Row, Value};

/// Column alias drivers must use for aggregate projections.
pub const AGGREGATE_ALIAS: &str = "aggregate";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Lt,
    Lte,
    Gt,
    Gte,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregate {
    Count,
    Sum,
    Min,
    Max,
    Avg,
}

/// Column selection for select queries.
#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    All,
    Columns(Vec<String>),
    /// Aggregate over a column, or over all rows when the column is `None`.
    Aggregate(Aggregate, Option<String>),
}

/// Operation kind plus its payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Select(Projection),
    Insert(Vec<Row>),
    Update(Row),
    Delete,
}

/// Predicate tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Eq(String, Value),
    NotEq(String, Value),
    Compare(String, CompareOp, Value),
    In(String, Vec<Value>),
    IsNull(String),
    IsNotNull(String),
    Like(String, String),
    /// Driver-native fragment with positional parameters.
    Raw(String, Vec<Value>),
    All(Vec<Condition>),
    Any(Vec<Condition>),
}

impl Condition {
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Eq(column.into(), value.into())
    }

    pub fn not_eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::NotEq(column.into(), value.into())
    }

    pub fn is_null(column: impl Into<String>) -> Self {
        Self::IsNull(column.into())
    }

    pub fn is_not_null(column: impl Into<String>) -> Self {
        Self::IsNotNull(column.into())
    }

    pub fn one_of(column: impl Into<String>, values: Vec<Value>) -> Self {
        Self::In(column.into(), values)
    }

    /// Mapping-as-where: every pair must match, NULL matches `IS NULL`.
    pub fn from_mapping(mapping: &Row) -> Self {
        Self::All(
            mapping
                .iter()
                .map(|(column, value)| match value {
                    Value::Null => Self::IsNull(column.clone()),
                    other => Self::Eq(column.clone(), other.clone()),
                })
                .collect(),
        )
    }

    /// Predicate matching exactly the given keys.
    ///
    /// Callers must ensure every key has one value per column.
    pub fn for_keys(columns: &[String], keys: &[PrimaryKey]) -> Self {
        if let [column] = columns {
            let mut values: Vec<Value> = keys
                .iter()
                .filter_map(|key| key.values().first().cloned())
                .collect();
            return if values.len() == 1 {
                Self::Eq(column.clone(), values.remove(0))
            } else {
                Self::In(column.clone(), values)
            };
        }

        let mut alternatives: Vec<Self> = keys
            .iter()
            .map(|key| {
                Self::All(
                    columns
                        .iter()
                        .zip(key.values())
                        .map(|(column, value)| Self::Eq(column.clone(), value.clone()))
                        .collect(),
                )
            })
            .collect();
        if alternatives.len() == 1 {
            alternatives.remove(0)
        } else {
            Self::Any(alternatives)
        }
    }
}

/// One operation against one table, scoped to one repository.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    table: String,
    scope: Scope,
    operation: Operation,
    conditions: Vec<Condition>,
    order_by: Vec<(String, Order)>,
    limit: Option<u64>,
    offset: Option<u64>,
}

impl Query {
    fn with_operation(table: impl Into<String>, scope: Scope, operation: Operation) -> Self {
        Self {
            table: table.into(),
            scope,
            operation,
            conditions: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    pub fn select(table: impl Into<String>, scope: Scope) -> Self {
        Self::with_operation(table, scope, Operation::Select(Projection::All))
    }

    pub fn insert(table: impl Into<String>, scope: Scope, rows: Vec<Row>) -> Self {
        Self::with_operation(table, scope, Operation::Insert(rows))
    }

    pub fn update(table: impl Into<String>, scope: Scope, values: Row) -> Self {
        Self::with_operation(table, scope, Operation::Update(values))
    }

    pub fn delete(table: impl Into<String>, scope: Scope) -> Self {
        Self::with_operation(table, scope, Operation::Delete)
    }

    pub fn filter(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// Adds every pair of `mapping` as an equality predicate.
    pub fn filter_by(self, mapping: &Row) -> Self {
        if mapping.is_empty() {
            return self;
        }
        self.filter(Condition::from_mapping(mapping))
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

    /// Replaces the projection of a select query; no-op for writes.
    pub fn project(mut self, projection: Projection) -> Self {
        if let Operation::Select(current) = &mut self.operation {
            *current = projection;
        }
        self
    }

    /// In-place predicate push used by filter behaviors.
    pub fn push_condition(&mut self, condition: Condition) -> &mut Self {
        self.conditions.push(condition);
        self
    }

    pub fn set_pagination(&mut self, limit: Option<u64>, offset: Option<u64>) -> &mut Self {
        self.limit = limit;
        self.offset = offset;
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn operation(&self) -> &Operation {
        &self.operation
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn ordering(&self) -> &[(String, Order)] {
        &self.order_by
    }

    pub fn pagination(&self) -> (Option<u64>, Option<u64>) {
        (self.limit, self.offset)
    }

    /// Rows of an insert query, for behaviors that stamp values.
    pub fn insert_rows_mut(&mut self) -> Option<&mut Vec<Row>> {
        match &mut self.operation {
            Operation::Insert(rows) => Some(rows),
            _ => None,
        }
    }

    /// Assignments of an update query, for behaviors that stamp values.
    pub fn update_values_mut(&mut self) -> Option<&mut Row> {
        match &mut self.operation {
            Operation::Update(values) => Some(values),
            _ => None,
        }
    }
}

/// Driver (or short-circuiting subscriber) answer to one query.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Rows(Vec<Row>),
    Affected(usize),
    Inserted { ids: Vec<i64>, affected: usize },
}

impl Response {
    pub fn into_rows(self) -> RepoResult<Vec<Row>> {
        match self {
            Self::Rows(rows) => Ok(rows),
            other => Err(RepoError::Logic(format!(
                "expected row set response, got {other:?}"
            ))),
        }
    }

    pub fn affected(&self) -> usize {
        match self {
            Self::Rows(rows) => rows.len(),
            Self::Affected(count) => *count,
            Self::Inserted { affected, .. } => *affected,
        }
    }

    pub fn into_inserted_ids(self) -> RepoResult<Vec<i64>> {
        match self {
            Self::Inserted { ids, .. } => Ok(ids),
            other => Err(RepoError::Logic(format!(
                "expected insert response, got {other:?}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Condition, Operation, Projection, Query};
    use crate::scope::Scope;
    use crate::value::{row, text, PrimaryKey, Value};

    #[test]
    fn single_column_keys_collapse_to_in_list() {
        let columns = vec!["id".to_string()];
        let keys = vec![PrimaryKey::from(1), PrimaryKey::from(2)];
        assert_eq!(
            Condition::for_keys(&columns, &keys),
            Condition::In("id".to_string(), vec![Value::Integer(1), Value::Integer(2)])
        );
        assert_eq!(
            Condition::for_keys(&columns, &keys[..1]),
            Condition::eq("id", 1)
        );
    }

    #[test]
    fn composite_keys_expand_to_any_of_all() {
        let columns = vec!["post_id".to_string(), "lang".to_string()];
        let keys = vec![
            PrimaryKey::from(vec![Value::Integer(1), text("en")]),
            PrimaryKey::from(vec![Value::Integer(1), text("de")]),
        ];
        let Condition::Any(alternatives) = Condition::for_keys(&columns, &keys) else {
            panic!("composite keys must produce an Any predicate");
        };
        assert_eq!(alternatives.len(), 2);
        assert_eq!(
            alternatives[1],
            Condition::All(vec![Condition::eq("post_id", 1), Condition::eq("lang", text("de"))])
        );
    }

    #[test]
    fn mapping_null_becomes_is_null() {
        let mapping = row([("deleted_at", Value::Null), ("owner", text("ann"))]);
        assert_eq!(
            Condition::from_mapping(&mapping),
            Condition::All(vec![
                Condition::is_null("deleted_at"),
                Condition::eq("owner", text("ann")),
            ])
        );
    }

    #[test]
    fn project_only_touches_select_queries() {
        let select = Query::select("users", Scope::Default).project(Projection::Columns(vec![
            "id".to_string(),
        ]));
        assert_eq!(
            select.operation(),
            &Operation::Select(Projection::Columns(vec!["id".to_string()]))
        );

        let delete = Query::delete("users", Scope::Default).project(Projection::All);
        assert_eq!(delete.operation(), &Operation::Delete);
    }
}
