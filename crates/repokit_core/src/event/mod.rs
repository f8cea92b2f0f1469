//! Repository event pipeline.
//!
//! # Responsibility
//! - Fire one event per query execution (select/insert/update/delete) and
//!   one per entity construction (load).
//! - Walk registered subscribers in order; each may mutate the query and
//!   delegate through [`Next`], or answer on its own.
//!
//! # Invariants
//! - Subscribers run in registration order; non-supporting ones are skipped.
//! - With no supporting subscriber the terminal continuation runs directly.
//! - Subscriber and behavior errors propagate unchanged.

use crate::behavior::RepositoryBehaviors;
use crate::entity::Entity;
use crate::query::{Operation, Query, Response};
use crate::repo::error::{RepoError, RepoResult};
use log::debug;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

mod subscribers;

pub use subscribers::{
    DeleteGuardSubscriber, FilterEventSubscriber, LoadEventSubscriber, WriteEventSubscriber,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Select,
    Insert,
    Update,
    Delete,
    Load,
}

impl EventKind {
    pub fn of(operation: &Operation) -> Self {
        match operation {
            Operation::Select(_) => Self::Select,
            Operation::Insert(_) => Self::Insert,
            Operation::Update(_) => Self::Update,
            Operation::Delete => Self::Delete,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Select => "select",
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Load => "load",
        }
    }
}

/// Event fired for one query on its way to the driver.
pub struct QueryEvent<'a> {
    kind: EventKind,
    query: &'a mut Query,
    behaviors: &'a RepositoryBehaviors,
}

impl<'a> QueryEvent<'a> {
    pub fn new(query: &'a mut Query, behaviors: &'a RepositoryBehaviors) -> Self {
        Self {
            kind: EventKind::of(query.operation()),
            query,
            behaviors,
        }
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn query(&self) -> &Query {
        self.query
    }

    pub fn query_mut(&mut self) -> &mut Query {
        self.query
    }

    /// Behavior set of the firing repository, detached from `self` so it can
    /// be iterated while the query is mutated.
    pub fn behaviors(&self) -> &'a RepositoryBehaviors {
        self.behaviors
    }
}

/// Event fired for every hydrated or freshly constructed entity.
pub struct LoadEvent<'a> {
    entity: &'a mut Entity,
    behaviors: &'a RepositoryBehaviors,
}

impl<'a> LoadEvent<'a> {
    pub fn new(entity: &'a mut Entity, behaviors: &'a RepositoryBehaviors) -> Self {
        Self { entity, behaviors }
    }

    pub fn entity(&self) -> &Entity {
        self.entity
    }

    pub fn entity_mut(&mut self) -> &mut Entity {
        self.entity
    }

    pub fn behaviors(&self) -> &'a RepositoryBehaviors {
        self.behaviors
    }
}

/// Final stage of the pipeline: actual execution.
pub type Terminal<'t> = dyn FnMut(&Query) -> RepoResult<Response> + 't;

/// Remaining pipeline after the current subscriber.
pub struct Next<'s, 't> {
    remaining: &'s [Arc<dyn EventSubscriber>],
    terminal: &'t mut Terminal<'t>,
}

impl<'s, 't> Next<'s, 't> {
    pub fn new(subscribers: &'s [Arc<dyn EventSubscriber>], terminal: &'t mut Terminal<'t>) -> Self {
        Self {
            remaining: subscribers,
            terminal,
        }
    }

    /// Hands the event to the next supporting subscriber, or executes it.
    pub fn run(self, event: &mut QueryEvent<'_>) -> RepoResult<Response> {
        let kind = event.kind();
        let mut remaining = self.remaining;
        while let Some((subscriber, tail)) = remaining.split_first() {
            if subscriber.supports(kind, event.behaviors()) {
                debug!(
                    "event=pipeline_stage module=event kind={} subscriber={}",
                    kind.as_str(),
                    subscriber.name()
                );
                let next = Next {
                    remaining: tail,
                    terminal: self.terminal,
                };
                return match kind {
                    EventKind::Select => subscriber.on_select(event, next),
                    EventKind::Insert => subscriber.on_insert(event, next),
                    EventKind::Update => subscriber.on_update(event, next),
                    EventKind::Delete => subscriber.on_delete(event, next),
                    EventKind::Load => Err(RepoError::Logic(
                        "load events do not carry a query".to_string(),
                    )),
                };
            }
            remaining = tail;
        }
        (self.terminal)(event.query())
    }
}

/// Pipeline participant.
///
/// `supports` must be a pure capability check over the event kind and the
/// repository's behavior set. Handlers default to plain delegation.
pub trait EventSubscriber: Send + Sync {
    fn name(&self) -> &str;

    fn supports(&self, kind: EventKind, behaviors: &RepositoryBehaviors) -> bool;

    fn on_select(&self, event: &mut QueryEvent<'_>, next: Next<'_, '_>) -> RepoResult<Response> {
        next.run(event)
    }

    fn on_insert(&self, event: &mut QueryEvent<'_>, next: Next<'_, '_>) -> RepoResult<Response> {
        next.run(event)
    }

    fn on_update(&self, event: &mut QueryEvent<'_>, next: Next<'_, '_>) -> RepoResult<Response> {
        next.run(event)
    }

    fn on_delete(&self, event: &mut QueryEvent<'_>, next: Next<'_, '_>) -> RepoResult<Response> {
        next.run(event)
    }

    fn on_load(&self, _event: &mut LoadEvent<'_>) -> RepoResult<()> {
        Ok(())
    }
}

/// Ordered subscriber list shared by every repository of one manager.
#[derive(Clone, Default)]
pub struct EventDispatcher {
    subscribers: Vec<Arc<dyn EventSubscriber>>,
}

impl EventDispatcher {
    /// Dispatcher without subscribers: every event runs straight through.
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter, write, delete-guard and load subscribers, in that order.
    pub fn with_default_subscribers() -> Self {
        let mut dispatcher = Self::new();
        dispatcher.subscribe(Arc::new(FilterEventSubscriber));
        dispatcher.subscribe(Arc::new(WriteEventSubscriber));
        dispatcher.subscribe(Arc::new(DeleteGuardSubscriber));
        dispatcher.subscribe(Arc::new(LoadEventSubscriber));
        dispatcher
    }

    pub fn subscribe(&mut self, subscriber: Arc<dyn EventSubscriber>) -> &mut Self {
        self.subscribers.push(subscriber);
        self
    }

    pub fn subscriber_names(&self) -> Vec<&str> {
        self.subscribers
            .iter()
            .map(|subscriber| subscriber.name())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    /// Runs a query event through the pipeline, ending in `terminal`.
    pub fn dispatch<'t>(
        &self,
        event: &mut QueryEvent<'_>,
        terminal: &'t mut Terminal<'t>,
    ) -> RepoResult<Response> {
        Next::new(&self.subscribers, terminal).run(event)
    }

    /// Notifies every load subscriber, in order.
    pub fn dispatch_load(&self, event: &mut LoadEvent<'_>) -> RepoResult<()> {
        for subscriber in &self.subscribers {
            if subscriber.supports(EventKind::Load, event.behaviors()) {
                subscriber.on_load(event)?;
            }
        }
        Ok(())
    }
}

impl Debug for EventDispatcher {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("subscribers", &self.subscriber_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::{EventDispatcher, EventKind, EventSubscriber, Next, QueryEvent};
    use crate::behavior::RepositoryBehaviors;
    use crate::query::{Condition, Query, Response};
    use crate::repo::error::{RepoError, RepoResult};
    use crate::scope::Scope;
    use std::sync::{Arc, Mutex};

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl EventSubscriber for Recorder {
        fn name(&self) -> &str {
            self.name
        }

        fn supports(&self, kind: EventKind, _behaviors: &RepositoryBehaviors) -> bool {
            kind == EventKind::Select
        }

        fn on_select(&self, event: &mut QueryEvent<'_>, next: Next<'_, '_>) -> RepoResult<Response> {
            self.log.lock().unwrap().push(self.name.to_string());
            event
                .query_mut()
                .push_condition(Condition::eq(self.name, 1));
            next.run(event)
        }
    }

    struct ShortCircuit;

    impl EventSubscriber for ShortCircuit {
        fn name(&self) -> &str {
            "short_circuit"
        }

        fn supports(&self, _kind: EventKind, _behaviors: &RepositoryBehaviors) -> bool {
            true
        }

        fn on_select(&self, _event: &mut QueryEvent<'_>, _next: Next<'_, '_>) -> RepoResult<Response> {
            Ok(Response::Rows(Vec::new()))
        }

        fn on_delete(&self, _event: &mut QueryEvent<'_>, _next: Next<'_, '_>) -> RepoResult<Response> {
            Err(RepoError::extension("short_circuit", "denied"))
        }
    }

    #[test]
    fn empty_dispatcher_runs_terminal_directly() {
        let dispatcher = EventDispatcher::new();
        let behaviors = RepositoryBehaviors::new(Scope::Default);
        let mut query = Query::select("users", Scope::Default);
        let mut calls = 0;
        let mut terminal = |_: &Query| {
            calls += 1;
            Ok(Response::Affected(3))
        };
        let mut event = QueryEvent::new(&mut query, &behaviors);
        let response = dispatcher.dispatch(&mut event, &mut terminal).unwrap();
        assert_eq!(response, Response::Affected(3));
        assert_eq!(calls, 1);
    }

    #[test]
    fn subscribers_run_in_registration_order_before_terminal() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut dispatcher = EventDispatcher::new();
        dispatcher.subscribe(Arc::new(Recorder {
            name: "first",
            log: Arc::clone(&log),
        }));
        dispatcher.subscribe(Arc::new(Recorder {
            name: "second",
            log: Arc::clone(&log),
        }));

        let behaviors = RepositoryBehaviors::new(Scope::Default);
        let mut query = Query::select("users", Scope::Default);
        let mut seen = Vec::new();
        let mut terminal = |query: &Query| {
            seen = query.conditions().to_vec();
            Ok(Response::Rows(Vec::new()))
        };
        let mut event = QueryEvent::new(&mut query, &behaviors);
        dispatcher.dispatch(&mut event, &mut terminal).unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["first", "second"]);
        assert_eq!(
            seen,
            vec![Condition::eq("first", 1), Condition::eq("second", 1)]
        );
    }

    #[test]
    fn short_circuit_skips_terminal_and_errors_propagate() {
        let mut dispatcher = EventDispatcher::new();
        dispatcher.subscribe(Arc::new(ShortCircuit));
        let behaviors = RepositoryBehaviors::new(Scope::Default);

        let mut calls = 0;
        let mut terminal = |_: &Query| {
            calls += 1;
            Ok(Response::Affected(1))
        };

        let mut select = Query::select("users", Scope::Default);
        let mut event = QueryEvent::new(&mut select, &behaviors);
        let response = dispatcher.dispatch(&mut event, &mut terminal).unwrap();
        assert_eq!(response, Response::Rows(Vec::new()));

        let mut delete = Query::delete("users", Scope::Default);
        let mut event = QueryEvent::new(&mut delete, &behaviors);
        let err = dispatcher.dispatch(&mut event, &mut terminal).unwrap_err();
        assert!(matches!(err, RepoError::Extension { .. }));

        assert_eq!(calls, 0);
    }

    #[test]
    fn default_dispatcher_registers_builtins_in_order() {
        let dispatcher = EventDispatcher::with_default_subscribers();
        assert_eq!(
            dispatcher.subscriber_names(),
            vec!["filter", "write", "delete_guard", "load"]
        );
    }
}
