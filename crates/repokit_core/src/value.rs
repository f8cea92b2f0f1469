//! Row values and primary-key tuples.
//!
//! # Responsibility
//! - Provide the value vocabulary shared by queries, entities and drivers.
//!
//! # Invariants
//! - `Row` is key-sorted, so two rows with the same pairs compare equal no
//!   matter in which order the pairs were inserted.
//! - `PrimaryKey` has tuple semantics: positional, one value per key column.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

pub use rusqlite::types::Value;

/// One row (or partial row) keyed by column name.
pub type Row = BTreeMap<String, Value>;

/// Builds a row from column/value pairs.
pub fn row<K, V, I>(pairs: I) -> Row
where
    K: Into<String>,
    V: Into<Value>,
    I: IntoIterator<Item = (K, V)>,
{
    pairs
        .into_iter()
        .map(|(column, value)| (column.into(), value.into()))
        .collect()
}

/// Shorthand for a text value.
pub fn text(value: impl Into<String>) -> Value {
    Value::Text(value.into())
}

/// Renders one value for diagnostics and error messages.
pub fn display_value(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Integer(v) => v.to_string(),
        Value::Real(v) => v.to_string(),
        Value::Text(v) => format!("'{v}'"),
        Value::Blob(v) => format!("<blob {} bytes>", v.len()),
    }
}

/// Primary-key value tuple, one entry per key column.
#[derive(Debug, Clone, PartialEq)]
pub struct PrimaryKey(Vec<Value>);

impl PrimaryKey {
    pub fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    pub fn values(&self) -> &[Value] {
        &self.0
    }

    pub fn into_values(self) -> Vec<Value> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Display for PrimaryKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self.0.iter().map(display_value).collect();
        if parts.len() == 1 {
            write!(f, "{}", parts[0])
        } else {
            write!(f, "({})", parts.join(", "))
        }
    }
}

impl From<Value> for PrimaryKey {
    fn from(value: Value) -> Self {
        Self(vec![value])
    }
}

impl From<i64> for PrimaryKey {
    fn from(value: i64) -> Self {
        Self(vec![Value::Integer(value)])
    }
}

impl From<i32> for PrimaryKey {
    fn from(value: i32) -> Self {
        Self(vec![Value::Integer(i64::from(value))])
    }
}

impl From<&str> for PrimaryKey {
    fn from(value: &str) -> Self {
        Self(vec![text(value)])
    }
}

impl From<String> for PrimaryKey {
    fn from(value: String) -> Self {
        Self(vec![Value::Text(value)])
    }
}

impl From<Vec<Value>> for PrimaryKey {
    fn from(values: Vec<Value>) -> Self {
        Self(values)
    }
}
