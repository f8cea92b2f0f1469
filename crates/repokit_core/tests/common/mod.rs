#![allow(dead_code)]

use repokit_core::behavior::{Behavior, SoftDelete, Timestamps};
use repokit_core::driver::{Driver, DriverError, DriverResult, SqliteDriver};
use repokit_core::event::{EventDispatcher, EventKind, EventSubscriber, Next, QueryEvent};
use repokit_core::{
    Query, RepoResult, RepositoryBehaviors, RepositoryDependencies, Response, Row, Table, Value,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const SCHEMA: &str = "
CREATE TABLE posts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'draft',
    views INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER,
    updated_at INTEGER,
    deleted_at INTEGER
);
CREATE TABLE translations (
    post_id INTEGER NOT NULL,
    lang TEXT NOT NULL,
    body TEXT,
    PRIMARY KEY (lang, post_id)
);
CREATE TABLE tokens (
    id TEXT PRIMARY KEY,
    label TEXT
);
CREATE TABLE keyless (
    name TEXT
);
CREATE TABLE tags (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL
);
";

pub struct Posts;

impl Table for Posts {
    const NAME: &'static str = "posts";

    fn behaviors() -> Vec<Arc<dyn Behavior>> {
        vec![
            Arc::new(SoftDelete::default()),
            Arc::new(Timestamps::default()),
        ]
    }
}

pub struct Translations;

impl Table for Translations {
    const NAME: &'static str = "translations";
}

pub struct Tags;

impl Table for Tags {
    const NAME: &'static str = "tags";
}

/// Counters observed by [`CountingDriver`].
#[derive(Debug, Default)]
pub struct DriverStats {
    pub executes: AtomicUsize,
    pub begins: AtomicUsize,
    pub commits: AtomicUsize,
    pub rollbacks: AtomicUsize,
    pub reconnects: AtomicUsize,
    /// Remaining `execute` calls that fail before reaching SQLite.
    pub fail_executes: AtomicUsize,
    /// Remaining `reconnect` calls that fail.
    pub fail_reconnects: AtomicUsize,
}

impl DriverStats {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

/// SQLite driver wrapper that counts calls and injects failures.
pub struct CountingDriver {
    inner: SqliteDriver,
    pub stats: Arc<DriverStats>,
}

impl CountingDriver {
    pub fn new(inner: SqliteDriver) -> Self {
        Self {
            inner,
            stats: Arc::new(DriverStats::default()),
        }
    }
}

impl Driver for CountingDriver {
    fn execute(&self, query: &Query) -> DriverResult<Response> {
        self.stats.executes.fetch_add(1, Ordering::SeqCst);
        let pending = self.stats.fail_executes.load(Ordering::SeqCst);
        if pending > 0 {
            self.stats.fail_executes.store(pending - 1, Ordering::SeqCst);
            return Err(DriverError::Unavailable("injected failure".to_string()));
        }
        self.inner.execute(query)
    }

    fn raw(&self, sql: &str, params: &[Value]) -> DriverResult<Vec<Row>> {
        self.inner.raw(sql, params)
    }

    fn begin(&self) -> DriverResult<()> {
        self.stats.begins.fetch_add(1, Ordering::SeqCst);
        self.inner.begin()
    }

    fn commit(&self) -> DriverResult<()> {
        self.stats.commits.fetch_add(1, Ordering::SeqCst);
        self.inner.commit()
    }

    fn rollback(&self) -> DriverResult<()> {
        self.stats.rollbacks.fetch_add(1, Ordering::SeqCst);
        self.inner.rollback()
    }

    fn in_transaction(&self) -> bool {
        self.inner.in_transaction()
    }

    fn reconnect(&self) -> DriverResult<()> {
        self.stats.reconnects.fetch_add(1, Ordering::SeqCst);
        let pending = self.stats.fail_reconnects.load(Ordering::SeqCst);
        if pending > 0 {
            self.stats.fail_reconnects.store(pending - 1, Ordering::SeqCst);
            return Err(DriverError::Unavailable("injected reconnect failure".to_string()));
        }
        self.inner.reconnect()
    }

    fn primary_key(&self, table: &str) -> DriverResult<Vec<String>> {
        self.inner.primary_key(table)
    }
}

/// Records every query kind that reaches the pipeline.
#[derive(Default)]
pub struct QueryRecorder {
    pub seen: Mutex<Vec<(EventKind, Query)>>,
}

impl QueryRecorder {
    pub fn count(&self, kind: EventKind) -> usize {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .filter(|(seen, _)| *seen == kind)
            .count()
    }

    pub fn last(&self, kind: EventKind) -> Option<Query> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(seen, _)| *seen == kind)
            .map(|(_, query)| query.clone())
    }
}

pub struct RecordingSubscriber(pub Arc<QueryRecorder>);

impl RecordingSubscriber {
    fn record(&self, event: &mut QueryEvent<'_>, next: Next<'_, '_>) -> RepoResult<Response> {
        self.0
            .seen
            .lock()
            .unwrap()
            .push((event.kind(), event.query().clone()));
        next.run(event)
    }
}

impl EventSubscriber for RecordingSubscriber {
    fn name(&self) -> &str {
        "recorder"
    }

    fn supports(&self, kind: EventKind, _behaviors: &RepositoryBehaviors) -> bool {
        kind != EventKind::Load
    }

    fn on_select(&self, event: &mut QueryEvent<'_>, next: Next<'_, '_>) -> RepoResult<Response> {
        self.record(event, next)
    }

    fn on_insert(&self, event: &mut QueryEvent<'_>, next: Next<'_, '_>) -> RepoResult<Response> {
        self.record(event, next)
    }

    fn on_update(&self, event: &mut QueryEvent<'_>, next: Next<'_, '_>) -> RepoResult<Response> {
        self.record(event, next)
    }

    fn on_delete(&self, event: &mut QueryEvent<'_>, next: Next<'_, '_>) -> RepoResult<Response> {
        self.record(event, next)
    }
}

pub struct Harness {
    pub deps: RepositoryDependencies,
    pub stats: Arc<DriverStats>,
    pub recorder: Arc<QueryRecorder>,
}

/// In-memory database with the test schema, default subscribers and a
/// trailing recorder that sees queries after every behavior ran.
pub fn harness() -> Harness {
    let sqlite = SqliteDriver::open_in_memory().unwrap();
    sqlite.execute_batch(SCHEMA).unwrap();
    let driver = CountingDriver::new(sqlite);
    let stats = Arc::clone(&driver.stats);

    let recorder = Arc::new(QueryRecorder::default());
    let mut events = EventDispatcher::with_default_subscribers();
    events.subscribe(Arc::new(RecordingSubscriber(Arc::clone(&recorder))));

    Harness {
        deps: RepositoryDependencies::new(Arc::new(driver), Arc::new(events)),
        stats,
        recorder,
    }
}
