//! Repository error taxonomy.
//!
//! # Invariants
//! - `NotFound` is produced only by `Repository::find_or_fail`.
//! - `InvalidArgument` and `Logic` are raised before any driver call.
//! - Driver and extension failures pass through unchanged.

use crate::driver::DriverError;
use thiserror::Error;

pub type RepoResult<T> = Result<T, RepoError>;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("{table} not found: {key}")]
    NotFound { table: String, key: String },
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("logic error: {0}")]
    Logic(String),
    #[error(transparent)]
    Driver(#[from] DriverError),
    #[error("extension `{name}` failed: {message}")]
    Extension { name: String, message: String },
}

impl RepoError {
    /// Failure raised by a behavior or subscriber.
    pub fn extension(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Extension {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_driver(&self) -> bool {
        matches!(self, Self::Driver(_))
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Driver(DriverError::Sqlite(value))
    }
}
