mod common;

use common::{harness, DriverStats, Posts, Tags};
use repokit_core::behavior::DeleteGuard;
use repokit_core::{
    row, text, Behavior, Capability, CapabilitySet, Condition, Entity, EventKind, Query,
    RepoError, RepoResult, Repository, RepositoryManager, RowSelector, Scope, SoftDelete, Table,
    Value,
};
use std::sync::Arc;

struct ColumnFilter(&'static str);

impl Behavior for ColumnFilter {
    fn name(&self) -> &str {
        self.0
    }

    fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::of(&[Capability::FilterSelect])
    }

    fn filter_select(&self, query: &mut Query) -> RepoResult<()> {
        query.push_condition(Condition::is_not_null(self.0));
        Ok(())
    }
}

struct Shout;

impl Behavior for Shout {
    fn name(&self) -> &str {
        "shout"
    }

    fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::of(&[Capability::OnLoad])
    }

    fn on_load(&self, entity: &mut Entity) -> RepoResult<()> {
        if let Some(title) = entity.get_str("title").map(str::to_uppercase) {
            entity.set("title", text(title));
        }
        Ok(())
    }
}

fn soft_delete_second(repo: &Repository<Posts>) {
    repo.insert(vec![
        row([("title", text("kept"))]),
        row([("title", text("gone"))]),
    ])
    .unwrap();
    repo.update(2, row([("deleted_at", Value::Integer(1))]))
        .unwrap();
}

#[test]
fn soft_deleted_rows_are_hidden_outside_full_and_raw_scopes() {
    let harness = harness();
    let repo = Repository::<Posts>::new(harness.deps.clone()).unwrap();
    soft_delete_second(&repo);

    assert_eq!(repo.count(repo.query()).unwrap(), 1);
    assert!(repo.find(2).unwrap().is_none());

    let full = repo.scope_full();
    assert_eq!(full.scope(), Scope::Full);
    assert_eq!(full.count(full.query()).unwrap(), 2);
    assert!(full.find(2).unwrap().is_some());

    assert_eq!(repo.count(repo.raw_query()).unwrap(), 2);
    let raw = repo.scope_raw();
    assert_eq!(raw.find_by(&row([("title", text("gone"))])).unwrap().len(), 1);

    assert_eq!(repo.scope(), Scope::Default);
}

#[test]
fn scoped_copies_have_independent_behavior_registries() {
    let harness = harness();
    let original = Repository::<Posts>::new(harness.deps.clone()).unwrap();
    let mut scoped = original.set_scope(Scope::Full);

    scoped
        .behaviors_mut()
        .add(Arc::new(ColumnFilter("title")))
        .unwrap();
    assert!(scoped.behaviors().contains("title"));
    assert!(!original.behaviors().contains("title"));

    let mut original = original;
    assert!(original.behaviors_mut().remove("timestamps"));
    assert!(scoped.behaviors().contains("timestamps"));
    assert_eq!(original.behaviors().names(), vec!["soft_delete"]);
}

struct Filtered;

impl Table for Filtered {
    const NAME: &'static str = "posts";

    fn behaviors() -> Vec<Arc<dyn Behavior>> {
        vec![
            Arc::new(ColumnFilter("created_at")),
            Arc::new(SoftDelete::default()),
            Arc::new(ColumnFilter("updated_at")),
        ]
    }
}

#[test]
fn every_filter_is_applied_once_in_registration_order() {
    let harness = harness();
    let repo = Repository::<Filtered>::new(harness.deps.clone()).unwrap();

    repo.fetch_all(repo.query().filter(Condition::eq("status", text("draft"))))
        .unwrap();
    let executed = harness.recorder.last(EventKind::Select).unwrap();
    assert_eq!(
        executed.conditions(),
        [
            Condition::eq("status", text("draft")),
            Condition::is_not_null("created_at"),
            Condition::is_null("deleted_at"),
            Condition::is_not_null("updated_at"),
        ]
    );

    repo.fetch_all(repo.raw_query()).unwrap();
    let executed = harness.recorder.last(EventKind::Select).unwrap();
    assert!(executed.conditions().is_empty());
}

struct Guarded;

impl Table for Guarded {
    const NAME: &'static str = "tags";

    fn behaviors() -> Vec<Arc<dyn Behavior>> {
        vec![Arc::new(DeleteGuard::new("tags are permanent"))]
    }
}

#[test]
fn delete_guard_vetoes_before_the_driver() {
    let harness = harness();
    let tags = Repository::<Tags>::new(harness.deps.clone()).unwrap();
    tags.insert(vec![row([("name", text("rust"))])]).unwrap();
    let executes = DriverStats::get(&harness.stats.executes);

    let guarded = Repository::<Guarded>::new(harness.deps.clone()).unwrap();
    let err = guarded.delete(&[RowSelector::from(1)]).unwrap_err();
    assert!(matches!(err, RepoError::Extension { .. }));
    assert_eq!(DriverStats::get(&harness.stats.executes), executes);
    assert_eq!(tags.count(tags.query()).unwrap(), 1);
}

struct Loud;

impl Table for Loud {
    const NAME: &'static str = "posts";

    fn behaviors() -> Vec<Arc<dyn Behavior>> {
        vec![Arc::new(Shout)]
    }
}

#[test]
fn load_hooks_run_for_fetched_and_created_entities() {
    let harness = harness();
    let repo = Repository::<Loud>::new(harness.deps.clone()).unwrap();
    repo.insert(vec![row([("title", text("quiet"))])]).unwrap();

    let loaded = repo.find_or_fail(1).unwrap();
    assert_eq!(loaded.get_str("title"), Some("QUIET"));
    assert!(!loaded.is_dirty());

    let created = repo.create(row([("title", text("new"))])).unwrap();
    assert_eq!(created.get_str("title"), Some("NEW"));

    let rows = repo.fetch_rows(repo.query()).unwrap();
    assert_eq!(rows[0].get("title"), Some(&text("quiet")));
}

#[test]
fn manager_shares_one_repository_per_table() {
    let harness = harness();
    let manager = RepositoryManager::new(harness.deps.clone());
    let first = manager.repository::<Posts>().unwrap();
    let second = manager.repository::<Posts>().unwrap();
    assert!(Arc::ptr_eq(&first, &second));

    let full = first.scope_full();
    assert_eq!(full.scope(), Scope::Full);
    assert_eq!(manager.repository::<Posts>().unwrap().scope(), Scope::Default);
    assert_eq!(manager.len(), 1);

    manager.repository::<Tags>().unwrap();
    assert_eq!(manager.len(), 2);
}

#[test]
fn global_manager_installs_once() {
    let harness = harness();
    let installed = RepositoryManager::install(RepositoryManager::new(harness.deps.clone())).unwrap();
    assert!(std::ptr::eq(installed, RepositoryManager::global().unwrap()));

    let err = RepositoryManager::install(RepositoryManager::new(harness.deps.clone())).unwrap_err();
    assert!(matches!(err, RepoError::Logic(_)));
}
