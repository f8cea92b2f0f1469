//! Repository layer: typed table access on top of the event pipeline.
//!
//! # Responsibility
//! - Translate call-boundary arguments into scoped queries.
//! - Hydrate results into change-tracked entities.
//!
//! # Invariants
//! - Repository APIs return semantic errors (`NotFound`, `InvalidArgument`)
//!   in addition to driver transport errors.

pub mod error;
mod repository;
mod selector;

pub use repository::{Repository, Table};
pub use selector::{Lookup, RowSelector, SearchCriteria};
