//! Behaviors: cross-cutting logic a repository declares.
//!
//! # Responsibility
//! - Define capability tags and the `Behavior` hook contract.
//! - Keep the per-repository, ordered behavior registry together with the
//!   repository's scope.
//!
//! # Invariants
//! - Capabilities are captured once, at registration.
//! - Iteration order is registration order.
//! - Cloning a `RepositoryBehaviors` yields an independent collection.
//! - Under `Scope::Raw`, filtering capabilities match no behavior.

use crate::entity::Entity;
use crate::query::Query;
use crate::repo::error::{RepoError, RepoResult};
use crate::scope::Scope;
use crate::value::Row;
use std::collections::BTreeSet;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

mod builtin;

pub use builtin::{DeleteGuard, SoftDelete, Timestamps, UuidPrimaryKey};

/// Capability tag a behavior may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Capability {
    /// Narrows select queries.
    FilterSelect,
    /// Adjusts rows before insert.
    PrepareInsert,
    /// Adjusts assignments before update.
    PrepareUpdate,
    /// May veto deletes.
    GuardDelete,
    /// Observes entities after hydration or construction.
    OnLoad,
}

impl Capability {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FilterSelect => "filter_select",
            Self::PrepareInsert => "prepare_insert",
            Self::PrepareUpdate => "prepare_update",
            Self::GuardDelete => "guard_delete",
            Self::OnLoad => "on_load",
        }
    }

    /// Filtering capabilities are the ones `Scope::Raw` switches off.
    pub fn is_filter(self) -> bool {
        matches!(self, Self::FilterSelect)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilitySet(BTreeSet<Capability>);

impl CapabilitySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn of(capabilities: &[Capability]) -> Self {
        capabilities.iter().copied().collect()
    }

    pub fn with(mut self, capability: Capability) -> Self {
        self.0.insert(capability);
        self
    }

    pub fn contains(&self, capability: Capability) -> bool {
        self.0.contains(&capability)
    }

    pub fn intersects(&self, other: &CapabilitySet) -> bool {
        self.0.iter().any(|capability| other.0.contains(capability))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Cross-cutting strategy object registered on a repository.
///
/// Hooks are only called for capabilities listed in `capabilities()`; the
/// defaults are no-ops so a behavior overrides just what it declares.
pub trait Behavior: Send + Sync {
    /// Stable name, unique within one repository.
    fn name(&self) -> &str;

    fn capabilities(&self) -> CapabilitySet;

    fn filter_select(&self, _query: &mut Query) -> RepoResult<()> {
        Ok(())
    }

    fn prepare_insert(&self, _row: &mut Row) -> RepoResult<()> {
        Ok(())
    }

    fn prepare_update(&self, _values: &mut Row) -> RepoResult<()> {
        Ok(())
    }

    /// Returns an error to veto the delete.
    fn guard_delete(&self, _query: &Query) -> RepoResult<()> {
        Ok(())
    }

    fn on_load(&self, _entity: &mut Entity) -> RepoResult<()> {
        Ok(())
    }
}

#[derive(Clone)]
struct RegisteredBehavior {
    behavior: Arc<dyn Behavior>,
    capabilities: CapabilitySet,
}

/// Active behaviors of one repository plus its current scope.
#[derive(Clone, Default)]
pub struct RepositoryBehaviors {
    entries: Vec<RegisteredBehavior>,
    scope: Scope,
}

impl RepositoryBehaviors {
    pub fn new(scope: Scope) -> Self {
        Self {
            entries: Vec::new(),
            scope,
        }
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    /// Independent copy carrying `scope`.
    pub fn with_scope(&self, scope: Scope) -> Self {
        Self {
            entries: self.entries.clone(),
            scope,
        }
    }

    /// Appends a behavior; names must be unique.
    pub fn add(&mut self, behavior: Arc<dyn Behavior>) -> RepoResult<()> {
        let name = behavior.name().to_string();
        if self.contains(&name) {
            return Err(RepoError::Logic(format!(
                "behavior already registered: {name}"
            )));
        }
        let capabilities = behavior.capabilities();
        self.entries.push(RegisteredBehavior {
            behavior,
            capabilities,
        });
        Ok(())
    }

    /// Removes a behavior by name; returns whether it was present.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.behavior.name() != name);
        before != self.entries.len()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries
            .iter()
            .any(|entry| entry.behavior.name() == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries
            .iter()
            .map(|entry| entry.behavior.name())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn active(&self, capability: Capability) -> bool {
        !capability.is_filter() || self.scope.applies_filters()
    }

    /// Whether at least one behavior takes part in `capability`.
    pub fn has(&self, capability: Capability) -> bool {
        self.active(capability)
            && self
                .entries
                .iter()
                .any(|entry| entry.capabilities.contains(capability))
    }

    /// Behaviors taking part in `capability`, in registration order.
    pub fn supporting(&self, capability: Capability) -> impl Iterator<Item = &Arc<dyn Behavior>> + '_ {
        let active = self.active(capability);
        self.entries
            .iter()
            .filter(move |entry| active && entry.capabilities.contains(capability))
            .map(|entry| &entry.behavior)
    }
}

impl Debug for RepositoryBehaviors {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepositoryBehaviors")
            .field("behaviors", &self.names())
            .field("scope", &self.scope)
            .finish()
    }
}
