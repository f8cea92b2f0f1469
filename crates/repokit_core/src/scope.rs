//! Row visibility policy attached to repositories and their queries.
//!
//! # Invariants
//! - A scope is an immutable value; changing it produces a new repository.
//! - `Raw` disables every filtering behavior. `Full` is a signal that filter
//!   behaviors may special-case, not a blanket bypass.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Repository's normal visibility rules.
    #[default]
    Default,
    /// No restriction; behavior-driven filtering is skipped.
    Raw,
    /// Explicit "return everything" override.
    Full,
}

impl Scope {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Raw => "raw",
            Self::Full => "full",
        }
    }

    /// Whether filtering behaviors participate in queries under this scope.
    pub fn applies_filters(self) -> bool {
        !matches!(self, Self::Raw)
    }
}

impl Display for Scope {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
