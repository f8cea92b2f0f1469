//! Built-in subscribers bridging events to behavior capabilities.
//!
//! Every subscriber follows the same shape: capability check in `supports`,
//! per-behavior mutation in registration order, then delegation.

use super::{EventKind, EventSubscriber, LoadEvent, Next, QueryEvent};
use crate::behavior::{Capability, RepositoryBehaviors};
use crate::query::Response;
use crate::repo::error::RepoResult;

/// Applies every `FilterSelect` behavior to select queries.
#[derive(Debug, Clone, Copy, Default)]
pub struct FilterEventSubscriber;

impl EventSubscriber for FilterEventSubscriber {
    fn name(&self) -> &str {
        "filter"
    }

    fn supports(&self, kind: EventKind, behaviors: &RepositoryBehaviors) -> bool {
        kind == EventKind::Select && behaviors.has(Capability::FilterSelect)
    }

    fn on_select(&self, event: &mut QueryEvent<'_>, next: Next<'_, '_>) -> RepoResult<Response> {
        for behavior in event.behaviors().supporting(Capability::FilterSelect) {
            behavior.filter_select(event.query_mut())?;
        }
        next.run(event)
    }
}

/// Lets `PrepareInsert`/`PrepareUpdate` behaviors adjust written values.
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteEventSubscriber;

impl EventSubscriber for WriteEventSubscriber {
    fn name(&self) -> &str {
        "write"
    }

    fn supports(&self, kind: EventKind, behaviors: &RepositoryBehaviors) -> bool {
        match kind {
            EventKind::Insert => behaviors.has(Capability::PrepareInsert),
            EventKind::Update => behaviors.has(Capability::PrepareUpdate),
            _ => false,
        }
    }

    fn on_insert(&self, event: &mut QueryEvent<'_>, next: Next<'_, '_>) -> RepoResult<Response> {
        let behaviors = event.behaviors();
        if let Some(rows) = event.query_mut().insert_rows_mut() {
            for row in rows.iter_mut() {
                for behavior in behaviors.supporting(Capability::PrepareInsert) {
                    behavior.prepare_insert(row)?;
                }
            }
        }
        next.run(event)
    }

    fn on_update(&self, event: &mut QueryEvent<'_>, next: Next<'_, '_>) -> RepoResult<Response> {
        let behaviors = event.behaviors();
        if let Some(values) = event.query_mut().update_values_mut() {
            for behavior in behaviors.supporting(Capability::PrepareUpdate) {
                behavior.prepare_update(values)?;
            }
        }
        next.run(event)
    }
}

/// Gives `GuardDelete` behaviors a veto over deletes.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeleteGuardSubscriber;

impl EventSubscriber for DeleteGuardSubscriber {
    fn name(&self) -> &str {
        "delete_guard"
    }

    fn supports(&self, kind: EventKind, behaviors: &RepositoryBehaviors) -> bool {
        kind == EventKind::Delete && behaviors.has(Capability::GuardDelete)
    }

    fn on_delete(&self, event: &mut QueryEvent<'_>, next: Next<'_, '_>) -> RepoResult<Response> {
        for behavior in event.behaviors().supporting(Capability::GuardDelete) {
            behavior.guard_delete(event.query())?;
        }
        next.run(event)
    }
}

/// Runs `OnLoad` behaviors for hydrated and constructed entities.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoadEventSubscriber;

impl EventSubscriber for LoadEventSubscriber {
    fn name(&self) -> &str {
        "load"
    }

    fn supports(&self, kind: EventKind, behaviors: &RepositoryBehaviors) -> bool {
        kind == EventKind::Load && behaviors.has(Capability::OnLoad)
    }

    fn on_load(&self, event: &mut LoadEvent<'_>) -> RepoResult<()> {
        for behavior in event.behaviors().supporting(Capability::OnLoad) {
            behavior.on_load(event.entity_mut())?;
        }
        Ok(())
    }
}
