//! Stock behaviors covering the common cross-cutting concerns.

use super::{Behavior, Capability, CapabilitySet};
use crate::query::{Condition, Query};
use crate::repo::error::{RepoError, RepoResult};
use crate::scope::Scope;
use crate::value::{Row, Value};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Hides rows whose tombstone column is set, unless the scope is `Full`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoftDelete {
    column: String,
}

impl SoftDelete {
    pub fn new(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
        }
    }
}

impl Default for SoftDelete {
    fn default() -> Self {
        Self::new("deleted_at")
    }
}

impl Behavior for SoftDelete {
    fn name(&self) -> &str {
        "soft_delete"
    }

    fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::of(&[Capability::FilterSelect])
    }

    fn filter_select(&self, query: &mut Query) -> RepoResult<()> {
        if query.scope() == Scope::Full {
            return Ok(());
        }
        query.push_condition(Condition::is_null(self.column.clone()));
        Ok(())
    }
}

/// Stamps creation/modification times as Unix epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timestamps {
    created: String,
    updated: String,
}

impl Timestamps {
    pub fn new(created: impl Into<String>, updated: impl Into<String>) -> Self {
        Self {
            created: created.into(),
            updated: updated.into(),
        }
    }
}

impl Default for Timestamps {
    fn default() -> Self {
        Self::new("created_at", "updated_at")
    }
}

fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}

impl Behavior for Timestamps {
    fn name(&self) -> &str {
        "timestamps"
    }

    fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::of(&[Capability::PrepareInsert, Capability::PrepareUpdate])
    }

    fn prepare_insert(&self, row: &mut Row) -> RepoResult<()> {
        let now = Value::Integer(now_epoch_ms());
        row.entry(self.created.clone()).or_insert_with(|| now.clone());
        row.entry(self.updated.clone()).or_insert(now);
        Ok(())
    }

    fn prepare_update(&self, values: &mut Row) -> RepoResult<()> {
        values.insert(self.updated.clone(), Value::Integer(now_epoch_ms()));
        Ok(())
    }
}

/// Assigns a random v4 UUID to the key column when an insert omits it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UuidPrimaryKey {
    column: String,
}

impl UuidPrimaryKey {
    pub fn new(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
        }
    }
}

impl Behavior for UuidPrimaryKey {
    fn name(&self) -> &str {
        "uuid_primary_key"
    }

    fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::of(&[Capability::PrepareInsert])
    }

    fn prepare_insert(&self, row: &mut Row) -> RepoResult<()> {
        let missing = matches!(row.get(&self.column), None | Some(Value::Null));
        if missing {
            row.insert(self.column.clone(), Value::Text(Uuid::new_v4().to_string()));
        }
        Ok(())
    }
}

/// Vetoes every delete issued through the repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteGuard {
    reason: String,
}

impl DeleteGuard {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl Behavior for DeleteGuard {
    fn name(&self) -> &str {
        "delete_guard"
    }

    fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::of(&[Capability::GuardDelete])
    }

    fn guard_delete(&self, query: &Query) -> RepoResult<()> {
        Err(RepoError::extension(
            self.name(),
            format!("delete on `{}` denied: {}", query.table(), self.reason),
        ))
    }
}
