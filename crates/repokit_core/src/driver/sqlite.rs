//! SQLite driver backed by a single rusqlite connection.
//!
//! # Responsibility
//! - Open and configure SQLite connections (file or in-memory).
//! - Execute rendered statements and hydrate raw rows.
//! - Provide transaction control, reconnect and key introspection.
//!
//! # Invariants
//! - Returned drivers have `busy_timeout` applied and, when configured,
//!   `foreign_keys=ON`.
//! - The connection is only touched while holding its mutex.

use super::render::{quote, render, RenderedStatement};
use super::{Driver, DriverError, DriverResult};
use crate::query::{Operation, Query, Response};
use crate::value::{Row, Value};
use log::{debug, error, info, warn};
use rusqlite::{params_from_iter, Connection};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// Connection settings for [`SqliteDriver`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SqliteConfig {
    /// Database file; `None` opens a private in-memory database.
    pub path: Option<PathBuf>,
    pub busy_timeout_ms: u64,
    pub foreign_keys: bool,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: None,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            foreign_keys: true,
        }
    }
}

impl SqliteConfig {
    pub fn file(path: impl AsRef<Path>) -> Self {
        Self {
            path: Some(path.as_ref().to_path_buf()),
            ..Self::default()
        }
    }

    fn mode(&self) -> &'static str {
        if self.path.is_some() {
            "file"
        } else {
            "memory"
        }
    }
}

pub struct SqliteDriver {
    config: SqliteConfig,
    conn: Mutex<Connection>,
}

impl SqliteDriver {
    /// Opens a connection according to `config`.
    ///
    /// # Side effects
    /// - Emits `db_open` logging events with duration and status.
    pub fn open(config: SqliteConfig) -> DriverResult<Self> {
        let started_at = Instant::now();
        info!("event=db_open module=driver status=start mode={}", config.mode());

        match connect(&config) {
            Ok(conn) => {
                info!(
                    "event=db_open module=driver status=ok mode={} duration_ms={}",
                    config.mode(),
                    started_at.elapsed().as_millis()
                );
                Ok(Self {
                    config,
                    conn: Mutex::new(conn),
                })
            }
            Err(err) => {
                error!(
                    "event=db_open module=driver status=error mode={} duration_ms={} error={}",
                    config.mode(),
                    started_at.elapsed().as_millis(),
                    err
                );
                Err(err)
            }
        }
    }

    pub fn open_in_memory() -> DriverResult<Self> {
        Self::open(SqliteConfig::default())
    }

    pub fn open_file(path: impl AsRef<Path>) -> DriverResult<Self> {
        Self::open(SqliteConfig::file(path))
    }

    pub fn config(&self) -> &SqliteConfig {
        &self.config
    }

    /// Runs schema/setup SQL outside the repository pipeline.
    pub fn execute_batch(&self, sql: &str) -> DriverResult<()> {
        self.connection()?.execute_batch(sql)?;
        Ok(())
    }

    fn connection(&self) -> DriverResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| DriverError::Poisoned)
    }
}

fn connect(config: &SqliteConfig) -> DriverResult<Connection> {
    let conn = match &config.path {
        Some(path) => Connection::open(path)?,
        None => Connection::open_in_memory()?,
    };
    if config.foreign_keys {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    }
    conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
    Ok(conn)
}

fn query_rows(conn: &Connection, sql: &str, params: &[Value]) -> DriverResult<Vec<Row>> {
    let mut stmt = conn.prepare(sql)?;
    let columns: Vec<String> = stmt
        .column_names()
        .into_iter()
        .map(str::to_string)
        .collect();
    let mut rows = stmt.query(params_from_iter(params.iter()))?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut record = Row::new();
        for (index, column) in columns.iter().enumerate() {
            record.insert(column.clone(), row.get::<_, Value>(index)?);
        }
        out.push(record);
    }
    Ok(out)
}

fn execute_statement(conn: &Connection, statement: &RenderedStatement) -> DriverResult<usize> {
    Ok(conn.execute(&statement.sql, params_from_iter(statement.params.iter()))?)
}

impl Driver for SqliteDriver {
    fn execute(&self, query: &Query) -> DriverResult<Response> {
        let started_at = Instant::now();
        let statements = render(query)?;
        let conn = self.connection()?;

        let response = match query.operation() {
            Operation::Select(_) => {
                let mut rows = Vec::new();
                for statement in &statements {
                    rows.extend(query_rows(&conn, &statement.sql, &statement.params)?);
                }
                Response::Rows(rows)
            }
            Operation::Insert(_) => {
                let mut ids = Vec::with_capacity(statements.len());
                let mut affected = 0;
                for statement in &statements {
                    affected += execute_statement(&conn, statement)?;
                    ids.push(conn.last_insert_rowid());
                }
                Response::Inserted { ids, affected }
            }
            Operation::Update(_) | Operation::Delete => {
                let mut affected = 0;
                for statement in &statements {
                    affected += execute_statement(&conn, statement)?;
                }
                Response::Affected(affected)
            }
        };

        debug!(
            "event=driver_execute module=driver status=ok table={} statements={} affected={} duration_ms={}",
            query.table(),
            statements.len(),
            response.affected(),
            started_at.elapsed().as_millis()
        );
        Ok(response)
    }

    fn raw(&self, sql: &str, params: &[Value]) -> DriverResult<Vec<Row>> {
        let conn = self.connection()?;
        query_rows(&conn, sql, params)
    }

    fn begin(&self) -> DriverResult<()> {
        self.connection()?.execute_batch("BEGIN")?;
        Ok(())
    }

    fn commit(&self) -> DriverResult<()> {
        self.connection()?.execute_batch("COMMIT")?;
        Ok(())
    }

    fn rollback(&self) -> DriverResult<()> {
        self.connection()?.execute_batch("ROLLBACK")?;
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.connection()
            .map(|conn| !conn.is_autocommit())
            .unwrap_or(false)
    }

    fn reconnect(&self) -> DriverResult<()> {
        let mut conn = self.connection()?;
        if self.config.path.is_none() {
            // A new in-memory connection would be a different, empty database.
            warn!("event=db_reconnect module=driver status=skipped mode=memory");
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
            return Ok(());
        }

        let started_at = Instant::now();
        match connect(&self.config) {
            Ok(fresh) => {
                *conn = fresh;
                info!(
                    "event=db_reconnect module=driver status=ok mode=file duration_ms={}",
                    started_at.elapsed().as_millis()
                );
                Ok(())
            }
            Err(err) => {
                error!(
                    "event=db_reconnect module=driver status=error mode=file duration_ms={} error={}",
                    started_at.elapsed().as_millis(),
                    err
                );
                Err(err)
            }
        }
    }

    fn primary_key(&self, table: &str) -> DriverResult<Vec<String>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({});", quote(table)))?;
        let mut rows = stmt.query([])?;
        let mut keyed: Vec<(i64, String)> = Vec::new();
        while let Some(row) = rows.next()? {
            let position: i64 = row.get("pk")?;
            if position > 0 {
                keyed.push((position, row.get("name")?));
            }
        }
        keyed.sort_by_key(|(position, _)| *position);
        Ok(keyed.into_iter().map(|(_, name)| name).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::{SqliteConfig, SqliteDriver};
    use crate::driver::Driver;
    use crate::query::{Query, Response};
    use crate::scope::Scope;
    use crate::value::{row, text, Value};

    fn driver() -> SqliteDriver {
        let driver = SqliteDriver::open_in_memory().unwrap();
        driver
            .execute_batch(
                "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL);
                 CREATE TABLE translations (
                    lang TEXT NOT NULL,
                    post_id INTEGER NOT NULL,
                    body TEXT,
                    PRIMARY KEY (post_id, lang)
                 );",
            )
            .unwrap();
        driver
    }

    #[test]
    fn primary_key_follows_declared_key_order() {
        let driver = driver();
        assert_eq!(driver.primary_key("users").unwrap(), vec!["id".to_string()]);
        assert_eq!(
            driver.primary_key("translations").unwrap(),
            vec!["post_id".to_string(), "lang".to_string()]
        );
        assert!(driver.primary_key("missing").unwrap().is_empty());
    }

    #[test]
    fn insert_reports_generated_ids() {
        let driver = driver();
        let response = driver
            .execute(&Query::insert(
                "users",
                Scope::Default,
                vec![row([("name", text("a"))]), row([("name", text("b"))])],
            ))
            .unwrap();
        assert_eq!(
            response,
            Response::Inserted {
                ids: vec![1, 2],
                affected: 2
            }
        );

        let rows = driver
            .raw("SELECT name FROM users WHERE id = ?", &[Value::Integer(2)])
            .unwrap();
        assert_eq!(rows, vec![row([("name", text("b"))])]);
    }

    #[test]
    fn transaction_flag_tracks_connection_state() {
        let driver = driver();
        assert!(!driver.in_transaction());
        driver.begin().unwrap();
        assert!(driver.in_transaction());
        driver.rollback().unwrap();
        assert!(!driver.in_transaction());
    }

    #[test]
    fn config_defaults_to_memory_with_foreign_keys() {
        let config = SqliteConfig::default();
        assert!(config.path.is_none());
        assert!(config.foreign_keys);
        assert_eq!(config.busy_timeout_ms, 5_000);
    }
}
