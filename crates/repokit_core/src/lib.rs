//! Behavior-driven repository layer over pluggable SQL drivers.
//!
//! Repositories run every query through an ordered event pipeline whose
//! subscribers let registered behaviors (soft delete, timestamps, generated
//! keys, delete guards) reshape it before the driver executes it.

pub mod behavior;
pub mod driver;
pub mod entity;
pub mod event;
pub mod logging;
pub mod manager;
pub mod query;
pub mod repo;
pub mod scope;
pub mod tx;
pub mod value;

pub use behavior::{
    Behavior, Capability, CapabilitySet, DeleteGuard, RepositoryBehaviors, SoftDelete, Timestamps,
    UuidPrimaryKey,
};
pub use driver::{Driver, DriverError, DriverResult, SqliteConfig, SqliteDriver};
pub use entity::Entity;
pub use event::{EventDispatcher, EventKind, EventSubscriber, LoadEvent, Next, QueryEvent};
pub use logging::{default_log_level, init_logging, logging_status, LogConfig, LoggingError};
pub use manager::{RepositoryDependencies, RepositoryManager};
pub use query::{Aggregate, CompareOp, Condition, Operation, Order, Projection, Query, Response};
pub use repo::error::{RepoError, RepoResult};
pub use repo::{Lookup, Repository, RowSelector, SearchCriteria, Table};
pub use scope::Scope;
pub use tx::EnsurePolicy;
pub use value::{row, text, PrimaryKey, Row, Value};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
