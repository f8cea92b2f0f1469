//! Repository registry and shared dependencies.
//!
//! # Responsibility
//! - Hand every repository the same driver and event dispatcher.
//! - Build each table's repository once and reuse it.
//!
//! # Invariants
//! - At most one repository instance per table type per manager.
//! - The process-wide manager can be installed exactly once.

use crate::driver::Driver;
use crate::event::EventDispatcher;
use crate::repo::error::{RepoError, RepoResult};
use crate::repo::{Repository, Table};
use crate::tx::{self, EnsurePolicy};
use log::info;
use once_cell::sync::OnceCell;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt::{Debug, Display, Formatter};
use std::sync::{Arc, Mutex, MutexGuard};

static GLOBAL_MANAGER: OnceCell<RepositoryManager> = OnceCell::new();

/// Driver and event dispatcher shared by repositories.
#[derive(Clone)]
pub struct RepositoryDependencies {
    driver: Arc<dyn Driver>,
    events: Arc<EventDispatcher>,
}

impl RepositoryDependencies {
    pub fn new(driver: Arc<dyn Driver>, events: Arc<EventDispatcher>) -> Self {
        Self { driver, events }
    }

    /// Dependencies with the built-in subscriber chain.
    pub fn with_default_events(driver: Arc<dyn Driver>) -> Self {
        Self::new(driver, Arc::new(EventDispatcher::with_default_subscribers()))
    }

    pub fn driver(&self) -> &dyn Driver {
        self.driver.as_ref()
    }

    pub fn events(&self) -> &EventDispatcher {
        &self.events
    }
}

impl Debug for RepositoryDependencies {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepositoryDependencies")
            .field("events", &self.events)
            .finish_non_exhaustive()
    }
}

type Registry = HashMap<TypeId, Arc<dyn Any + Send + Sync>>;

pub struct RepositoryManager {
    deps: RepositoryDependencies,
    registry: Mutex<Registry>,
}

impl RepositoryManager {
    pub fn new(deps: RepositoryDependencies) -> Self {
        Self {
            deps,
            registry: Mutex::new(HashMap::new()),
        }
    }

    pub fn dependencies(&self) -> &RepositoryDependencies {
        &self.deps
    }

    /// Cached repository for `T`, built on first request.
    ///
    /// Construction errors are returned and nothing is cached, so a later
    /// call retries. The registry is not locked while the repository is
    /// built, so `Table::behaviors` may itself ask this manager for other
    /// repositories. When two callers race, the first registered instance
    /// wins and both receive it.
    pub fn repository<T: Table>(&self) -> RepoResult<Arc<Repository<T>>> {
        if let Some(existing) = self.lock_registry()?.get(&TypeId::of::<T>()) {
            return Self::downcast::<T>(Arc::clone(existing));
        }

        let built = Arc::new(Repository::<T>::new(self.deps.clone())?);
        let mut registry = self.lock_registry()?;
        let mut registered = false;
        let stored = Arc::clone(registry.entry(TypeId::of::<T>()).or_insert_with(|| {
            registered = true;
            built.clone() as Arc<dyn Any + Send + Sync>
        }));
        if registered {
            info!(
                "event=manager_register module=manager status=ok table={} behaviors={} registered={}",
                T::NAME,
                built.behaviors().len(),
                registry.len()
            );
        }
        drop(registry);
        Self::downcast::<T>(stored)
    }

    fn lock_registry(&self) -> RepoResult<MutexGuard<'_, Registry>> {
        self.registry
            .lock()
            .map_err(|_| RepoError::Logic("repository registry lock poisoned".to_string()))
    }

    fn downcast<T: Table>(entry: Arc<dyn Any + Send + Sync>) -> RepoResult<Arc<Repository<T>>> {
        entry.downcast::<Repository<T>>().map_err(|_| {
            RepoError::Logic(format!("registry entry for `{}` has a foreign type", T::NAME))
        })
    }

    /// Number of cached repositories.
    pub fn len(&self) -> usize {
        self.registry.lock().map(|registry| registry.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn transaction<R, E, F>(&self, f: F) -> Result<R, E>
    where
        F: FnOnce() -> Result<R, E>,
        E: From<RepoError> + Display,
    {
        tx::transaction(self.deps.driver(), f)
    }

    pub fn ensure<R, E, F>(&self, policy: EnsurePolicy, f: F) -> Result<R, E>
    where
        F: FnMut() -> Result<R, E>,
        E: From<RepoError> + Display,
    {
        tx::ensure(self.deps.driver(), policy, f)
    }

    /// Installs the process-wide manager.
    ///
    /// # Errors
    /// - `Logic` when a manager is already installed.
    pub fn install(manager: RepositoryManager) -> RepoResult<&'static RepositoryManager> {
        let mut installed = false;
        let global = GLOBAL_MANAGER.get_or_init(|| {
            installed = true;
            manager
        });
        if !installed {
            return Err(RepoError::Logic(
                "repository manager already installed".to_string(),
            ));
        }
        info!("event=manager_install module=manager status=ok");
        Ok(global)
    }

    pub fn global() -> Option<&'static RepositoryManager> {
        GLOBAL_MANAGER.get()
    }
}

impl Debug for RepositoryManager {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepositoryManager")
            .field("deps", &self.deps)
            .field("registered", &self.len())
            .finish()
    }
}
