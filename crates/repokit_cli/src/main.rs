//! CLI smoke entry point.
//!
//! # Responsibility
//! - Exercise `repokit_core` end to end against an in-memory database.
//! - Keep output deterministic for quick local sanity checks.
//!
//! Set `REPOKIT_LOG_DIR` to an absolute path to also write a log file.

use log::info;
use repokit_core::{
    init_logging, row, text, Behavior, Repository, RepositoryDependencies, RepositoryManager,
    RepoResult, Row, RowSelector, SoftDelete, SqliteDriver, Table, Timestamps, Value,
};
use repokit_core::value::display_value;
use std::process::ExitCode;
use std::sync::Arc;

const SCHEMA: &str = "
CREATE TABLE posts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT NOT NULL,
    views INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER,
    updated_at INTEGER,
    deleted_at INTEGER
);
";

struct Posts;

impl Table for Posts {
    const NAME: &'static str = "posts";

    fn behaviors() -> Vec<Arc<dyn Behavior>> {
        vec![
            Arc::new(SoftDelete::default()),
            Arc::new(Timestamps::default()),
        ]
    }
}

fn run() -> RepoResult<()> {
    let driver = SqliteDriver::open_in_memory()?;
    driver.execute_batch(SCHEMA)?;
    let manager = RepositoryManager::new(RepositoryDependencies::with_default_events(Arc::new(driver)));
    let posts: Arc<Repository<Posts>> = manager.repository::<Posts>()?;

    let ids = posts.insert(vec![
        row([("title", text("hello")), ("views", Value::Integer(3))]),
        row([("title", text("draft")), ("views", Value::Integer(0))]),
    ])?;
    println!("inserted ids={ids:?}");

    let mut first = posts.find_or_fail(ids[0])?;
    first.set("views", 4);
    println!("saved affected={}", posts.save(&mut first)?);

    posts.update(
        RowSelector::from(ids[1]),
        row([("deleted_at", Value::Integer(1))]),
    )?;
    println!("visible={}", posts.count(posts.query())?);
    let everything = posts.scope_full();
    println!("all={}", everything.count(everything.query())?);
    let views = posts.sum_by("views", &Row::new())?;
    println!("views={}", display_value(&views));
    info!("event=cli_done module=cli status=ok");
    Ok(())
}

fn main() -> ExitCode {
    if let Ok(dir) = std::env::var("REPOKIT_LOG_DIR") {
        if let Err(err) = init_logging(repokit_core::default_log_level(), &dir) {
            eprintln!("logging disabled: {err}");
        }
    }

    println!("repokit_core version={}", repokit_core::core_version());
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("repokit_cli failed: {err}");
            ExitCode::FAILURE
        }
    }
}
