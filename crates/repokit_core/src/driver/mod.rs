//! Driver contract consumed by repositories.
//!
//! # Responsibility
//! - Execute structured queries and report rows or affected counts.
//! - Expose transaction control, reconnect and primary-key metadata.
//!
//! # Invariants
//! - Every call blocks until the round-trip completes.
//! - `in_transaction` reflects the connection state, not bookkeeping kept by
//!   callers.

use crate::query::{Query, Response};
use crate::value::{Row, Value};
use thiserror::Error;

mod render;
mod sqlite;

pub use render::{render, RenderedStatement};
pub use sqlite::{SqliteConfig, SqliteDriver};

pub type DriverResult<T> = Result<T, DriverError>;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("{0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("connection lock poisoned")]
    Poisoned,
    #[error("unsupported query: {0}")]
    Unsupported(String),
    #[error("connection unavailable: {0}")]
    Unavailable(String),
}

/// Connection-level collaborator behind every repository.
pub trait Driver: Send + Sync {
    /// Executes one query after the event pipeline is done with it.
    fn execute(&self, query: &Query) -> DriverResult<Response>;
    /// Runs driver-native SQL and returns any produced rows.
    fn raw(&self, sql: &str, params: &[Value]) -> DriverResult<Vec<Row>>;
    fn begin(&self) -> DriverResult<()>;
    fn commit(&self) -> DriverResult<()>;
    fn rollback(&self) -> DriverResult<()>;
    fn in_transaction(&self) -> bool;
    /// Replaces a stale or broken connection.
    fn reconnect(&self) -> DriverResult<()>;
    /// Primary-key column names in key order; empty when the table has none.
    fn primary_key(&self, table: &str) -> DriverResult<Vec<String>>;
}
