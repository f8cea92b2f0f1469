//! Transaction coalescing and retry-with-reconnect.
//!
//! # Responsibility
//! - Run a callback inside a transaction, joining one that is already open.
//! - Re-run a callback after failures, optionally reconnecting in between.
//!
//! # Invariants
//! - Only the call that began a transaction commits or rolls it back.
//! - `ensure` makes at least one attempt and at most `retry_times` attempts;
//!   reconnects happen only between attempts.
//! - Callback values and errors pass through unchanged.

use crate::driver::Driver;
use crate::repo::error::RepoError;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::fmt::Display;

const DEFAULT_RETRY_TIMES: u32 = 3;

/// Retry settings for [`ensure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnsurePolicy {
    /// Total attempts, including the first one. `0` behaves like `1`.
    pub retry_times: u32,
    /// Force the driver to reconnect between attempts.
    pub reconnect: bool,
}

impl Default for EnsurePolicy {
    fn default() -> Self {
        Self {
            retry_times: DEFAULT_RETRY_TIMES,
            reconnect: true,
        }
    }
}

impl EnsurePolicy {
    pub fn new(retry_times: u32, reconnect: bool) -> Self {
        Self {
            retry_times,
            reconnect,
        }
    }
}

/// Runs `f` in a transaction, beginning one only if none is active.
///
/// # Errors
/// - Begin/commit failures surface as `RepoError::Driver` converted into `E`.
/// - Errors from `f` are returned unchanged; an owned transaction is rolled
///   back first, a joined one is left to its owner.
pub fn transaction<T, E, F>(driver: &dyn Driver, f: F) -> Result<T, E>
where
    F: FnOnce() -> Result<T, E>,
    E: From<RepoError> + Display,
{
    if driver.in_transaction() {
        debug!("event=tx_join module=tx status=ok");
        return f();
    }

    driver.begin().map_err(|err| E::from(RepoError::from(err)))?;
    info!("event=tx_begin module=tx status=ok");

    match f() {
        Ok(value) => match driver.commit() {
            Ok(()) => {
                info!("event=tx_commit module=tx status=ok");
                Ok(value)
            }
            Err(err) => {
                error!("event=tx_commit module=tx status=error error={err}");
                roll_back(driver);
                Err(E::from(RepoError::from(err)))
            }
        },
        Err(err) => {
            warn!("event=tx_rollback module=tx status=start error={err}");
            roll_back(driver);
            Err(err)
        }
    }
}

fn roll_back(driver: &dyn Driver) {
    if !driver.in_transaction() {
        return;
    }
    match driver.rollback() {
        Ok(()) => info!("event=tx_rollback module=tx status=ok"),
        Err(err) => error!("event=tx_rollback module=tx status=error error={err}"),
    }
}

/// Calls `f` until it succeeds or the policy's attempts are used up.
///
/// Not idempotency-aware: `f` must be safe to run more than once.
///
/// # Errors
/// - The last error of `f` once every attempt failed.
/// - The driver error of a failed reconnect between attempts. Retrying
///   stops there and the error `f` just returned is only logged.
pub fn ensure<T, E, F>(driver: &dyn Driver, policy: EnsurePolicy, mut f: F) -> Result<T, E>
where
    F: FnMut() -> Result<T, E>,
    E: From<RepoError> + Display,
{
    let max_attempts = policy.retry_times.max(1);
    let mut attempt = 1;
    loop {
        match f() {
            Ok(value) => return Ok(value),
            Err(err) if attempt >= max_attempts => {
                error!(
                    "event=ensure_exhausted module=tx status=error attempts={attempt} error={err}"
                );
                return Err(err);
            }
            Err(err) => {
                warn!(
                    "event=ensure_retry module=tx status=retry attempt={attempt} max_attempts={max_attempts} reconnect={} error={err}",
                    policy.reconnect
                );
                if policy.reconnect {
                    driver.reconnect().map_err(|reconnect_err| {
                        error!(
                            "event=ensure_exhausted module=tx status=error attempts={attempt} reconnect=failed error={reconnect_err}"
                        );
                        E::from(RepoError::from(reconnect_err))
                    })?;
                }
                attempt += 1;
            }
        }
    }
}
