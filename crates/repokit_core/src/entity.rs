//! Loaded (or freshly constructed) table rows with change tracking.
//!
//! # Responsibility
//! - Hold one row's values together with its table identity.
//! - Track the diff against the last persisted state.
//!
//! # Invariants
//! - `diff()` contains exactly the fields changed since load or last save.
//! - A never-persisted entity reports every field as changed.
//! - Diffs are `Row`s, so equal diffs compare equal regardless of the order
//!   in which fields were set.

use crate::value::{PrimaryKey, Row, Value};

#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    table: String,
    primary: Vec<String>,
    values: Row,
    snapshot: Row,
    persisted: bool,
}

impl Entity {
    /// Builds an entity from a fetched row; the row is its persisted state.
    pub fn hydrate(table: impl Into<String>, primary: Vec<String>, row: Row) -> Self {
        Self {
            table: table.into(),
            primary,
            snapshot: row.clone(),
            values: row,
            persisted: true,
        }
    }

    /// Builds an entity that has not been written yet.
    pub fn unsaved(table: impl Into<String>, primary: Vec<String>, row: Row) -> Self {
        Self {
            table: table.into(),
            primary,
            values: row,
            snapshot: Row::new(),
            persisted: false,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn primary_columns(&self) -> &[String] {
        &self.primary
    }

    pub fn values(&self) -> &Row {
        &self.values
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.values.get(column)
    }

    pub fn get_i64(&self, column: &str) -> Option<i64> {
        match self.values.get(column) {
            Some(Value::Integer(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn get_str(&self, column: &str) -> Option<&str> {
        match self.values.get(column) {
            Some(Value::Text(value)) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn set(&mut self, column: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.values.insert(column.into(), value.into());
        self
    }

    pub fn is_persisted(&self) -> bool {
        self.persisted
    }

    /// Key tuple in key-column order; `None` while any key column is unset.
    pub fn primary_key(&self) -> Option<PrimaryKey> {
        if self.primary.is_empty() {
            return None;
        }
        let mut values = Vec::with_capacity(self.primary.len());
        for column in &self.primary {
            match self.values.get(column) {
                None | Some(Value::Null) => return None,
                Some(value) => values.push(value.clone()),
            }
        }
        Some(PrimaryKey::new(values))
    }

    /// Key tuple as last persisted; differs from `primary_key()` while a key
    /// column has an unsaved change.
    pub fn persisted_primary_key(&self) -> Option<PrimaryKey> {
        if !self.persisted || self.primary.is_empty() {
            return None;
        }
        let mut values = Vec::with_capacity(self.primary.len());
        for column in &self.primary {
            match self.snapshot.get(column) {
                None | Some(Value::Null) => return None,
                Some(value) => values.push(value.clone()),
            }
        }
        Some(PrimaryKey::new(values))
    }

    pub fn diff(&self) -> Row {
        if !self.persisted {
            return self.values.clone();
        }
        self.values
            .iter()
            .filter(|&(column, value)| self.snapshot.get(column) != Some(value))
            .map(|(column, value)| (column.clone(), value.clone()))
            .collect()
    }

    pub fn is_dirty(&self) -> bool {
        !self.persisted || !self.diff().is_empty()
    }

    /// Records current values as the persisted state.
    pub fn mark_persisted(&mut self) {
        self.snapshot = self.values.clone();
        self.persisted = true;
    }

    pub fn into_row(self) -> Row {
        self.values
    }
}
