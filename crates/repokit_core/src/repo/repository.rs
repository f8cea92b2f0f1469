//! Typed repository façade over one table.
//!
//! # Responsibility
//! - Build scoped queries and run them through the event pipeline.
//! - Hydrate rows into entities, firing load hooks for each.
//! - Offer lookup, write, batch-update, transaction and retry helpers.
//!
//! # Invariants
//! - Argument validation happens before any driver call.
//! - `set_scope` never mutates `self`; it returns an independent copy.
//! - `find`-style lookups return `None` for missing rows; only
//!   `find_or_fail` reports `NotFound`.
//! - Read-then-write helpers (`find_or_insert`, `update_or_create`) are not
//!   atomic; concurrent callers can race between the read and the write.

use super::error::{RepoError, RepoResult};
use super::selector::{Lookup, RowSelector, SearchCriteria};
use crate::behavior::{Behavior, RepositoryBehaviors};
use crate::entity::Entity;
use crate::event::{EventKind, LoadEvent, QueryEvent};
use crate::manager::RepositoryDependencies;
use crate::query::{Aggregate, Condition, Operation, Projection, Query, Response, AGGREGATE_ALIAS};
use crate::scope::Scope;
use crate::tx::{self, EnsurePolicy};
use crate::value::{PrimaryKey, Row, Value};
use log::debug;
use std::fmt::{Debug, Display, Formatter};
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Instant;

/// Declares one table and the behaviors its repository carries.
pub trait Table: Send + Sync + 'static {
    const NAME: &'static str;

    /// Behaviors registered at construction, in this order.
    fn behaviors() -> Vec<Arc<dyn Behavior>> {
        Vec::new()
    }
}

pub struct Repository<T: Table> {
    deps: RepositoryDependencies,
    behaviors: RepositoryBehaviors,
    primary: Vec<String>,
    _table: PhantomData<fn() -> T>,
}

impl<T: Table> Clone for Repository<T> {
    fn clone(&self) -> Self {
        Self {
            deps: self.deps.clone(),
            behaviors: self.behaviors.clone(),
            primary: self.primary.clone(),
            _table: PhantomData,
        }
    }
}

impl<T: Table> Debug for Repository<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("table", &T::NAME)
            .field("primary", &self.primary)
            .field("behaviors", &self.behaviors)
            .finish()
    }
}

fn merge(base: &Row, overrides: &Row) -> Row {
    let mut merged = base.clone();
    merged.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}

impl<T: Table> Repository<T> {
    /// Builds a repository, reading key columns from driver metadata.
    ///
    /// # Errors
    /// - `InvalidArgument` when the table has no primary key.
    /// - `Logic` when `T::behaviors()` repeats a behavior name.
    pub fn new(deps: RepositoryDependencies) -> RepoResult<Self> {
        let primary = deps.driver().primary_key(T::NAME)?;
        if primary.is_empty() {
            return Err(RepoError::InvalidArgument(format!(
                "table `{}` has no primary key",
                T::NAME
            )));
        }

        let mut behaviors = RepositoryBehaviors::new(Scope::Default);
        for behavior in T::behaviors() {
            behaviors.add(behavior)?;
        }

        Ok(Self {
            deps,
            behaviors,
            primary,
            _table: PhantomData,
        })
    }

    pub fn table(&self) -> &'static str {
        T::NAME
    }

    pub fn primary_columns(&self) -> &[String] {
        &self.primary
    }

    pub fn scope(&self) -> Scope {
        self.behaviors.scope()
    }

    pub fn behaviors(&self) -> &RepositoryBehaviors {
        &self.behaviors
    }

    pub fn behaviors_mut(&mut self) -> &mut RepositoryBehaviors {
        &mut self.behaviors
    }

    pub fn dependencies(&self) -> &RepositoryDependencies {
        &self.deps
    }

    /// Copy of this repository with another scope.
    pub fn set_scope(&self, scope: Scope) -> Self {
        Self {
            deps: self.deps.clone(),
            behaviors: self.behaviors.with_scope(scope),
            primary: self.primary.clone(),
            _table: PhantomData,
        }
    }

    pub fn scope_raw(&self) -> Self {
        self.set_scope(Scope::Raw)
    }

    pub fn scope_full(&self) -> Self {
        self.set_scope(Scope::Full)
    }

    /// Select query carrying this repository's scope.
    pub fn query(&self) -> Query {
        Query::select(T::NAME, self.scope())
    }

    /// Select query that bypasses filtering behaviors.
    pub fn raw_query(&self) -> Query {
        Query::select(T::NAME, Scope::Raw)
    }

    fn execute(&self, query: &mut Query) -> RepoResult<Response> {
        if query.table() != T::NAME {
            return Err(RepoError::InvalidArgument(format!(
                "query for `{}` passed to `{}` repository",
                query.table(),
                T::NAME
            )));
        }

        let started_at = Instant::now();
        let kind = EventKind::of(query.operation());
        let scope = query.scope();
        let rescoped;
        let behaviors = if scope == self.behaviors.scope() {
            &self.behaviors
        } else {
            rescoped = self.behaviors.with_scope(scope);
            &rescoped
        };

        let driver = self.deps.driver();
        let mut terminal = |query: &Query| driver.execute(query).map_err(RepoError::from);
        let mut event = QueryEvent::new(query, behaviors);
        let result = self.deps.events().dispatch(&mut event, &mut terminal);

        match &result {
            Ok(response) => debug!(
                "event=repo_execute module=repo status=ok table={} kind={} scope={} affected={} duration_ms={}",
                T::NAME,
                kind.as_str(),
                scope,
                response.affected(),
                started_at.elapsed().as_millis()
            ),
            Err(err) => debug!(
                "event=repo_execute module=repo status=error table={} kind={} scope={} duration_ms={} error={}",
                T::NAME,
                kind.as_str(),
                scope,
                started_at.elapsed().as_millis(),
                err
            ),
        }
        result
    }

    fn fire_load(&self, entity: &mut Entity) -> RepoResult<()> {
        let mut event = LoadEvent::new(entity, &self.behaviors);
        self.deps.events().dispatch_load(&mut event)
    }

    fn hydrate(&self, row: Row) -> RepoResult<Entity> {
        let mut entity = Entity::hydrate(T::NAME, self.primary.clone(), row);
        self.fire_load(&mut entity)?;
        entity.mark_persisted();
        Ok(entity)
    }

    /// Unpersisted entity; load hooks run exactly as for fetched rows.
    pub fn create(&self, row: Row) -> RepoResult<Entity> {
        let mut entity = Entity::unsaved(T::NAME, self.primary.clone(), row);
        self.fire_load(&mut entity)?;
        Ok(entity)
    }

    /// Executes a select and returns raw rows without hydration.
    pub fn fetch_rows(&self, mut query: Query) -> RepoResult<Vec<Row>> {
        if !matches!(query.operation(), Operation::Select(_)) {
            return Err(RepoError::InvalidArgument(
                "fetch operations require a select query".to_string(),
            ));
        }
        self.execute(&mut query)?.into_rows()
    }

    pub fn fetch_all(&self, query: Query) -> RepoResult<Vec<Entity>> {
        self.fetch_rows(query)?
            .into_iter()
            .map(|row| self.hydrate(row))
            .collect()
    }

    pub fn fetch_one(&self, query: Query) -> RepoResult<Option<Entity>> {
        Ok(self.fetch_all(query.limit(1))?.into_iter().next())
    }

    /// `(key, value)` pairs in result order.
    pub fn fetch_pairs(&self, query: Query, key: &str, value: &str) -> RepoResult<Vec<(Value, Value)>> {
        let columns = if key == value {
            vec![key.to_string()]
        } else {
            vec![key.to_string(), value.to_string()]
        };
        let rows = self.fetch_rows(query.project(Projection::Columns(columns)))?;
        Ok(rows
            .into_iter()
            .map(|row| {
                (
                    row.get(key).cloned().unwrap_or(Value::Null),
                    row.get(value).cloned().unwrap_or(Value::Null),
                )
            })
            .collect())
    }

    /// Pages through `query` in chunks of `size`; returns the entity count.
    ///
    /// The query's own offset is the starting point and its limit, if any,
    /// caps the total.
    pub fn for_each_chunk<F>(&self, query: Query, size: u64, mut f: F) -> RepoResult<usize>
    where
        F: FnMut(Vec<Entity>) -> RepoResult<()>,
    {
        if size == 0 {
            return Err(RepoError::InvalidArgument(
                "chunk size must be positive".to_string(),
            ));
        }

        let (limit, start) = query.pagination();
        let mut offset = start.unwrap_or(0);
        let mut remaining = limit;
        let mut total = 0;
        loop {
            let page_size = remaining.map_or(size, |left| left.min(size));
            if page_size == 0 {
                break;
            }
            let mut page = query.clone();
            page.set_pagination(Some(page_size), Some(offset));
            let entities = self.fetch_all(page)?;
            let fetched = entities.len();
            if fetched == 0 {
                break;
            }
            total += fetched;
            f(entities)?;
            if (fetched as u64) < page_size {
                break;
            }
            offset += page_size;
            remaining = remaining.map(|left| left - page_size);
        }
        Ok(total)
    }

    /// Runs an aggregate over `query`; NULL when no row qualifies.
    pub fn aggregate(&self, query: Query, aggregate: Aggregate, column: Option<&str>) -> RepoResult<Value> {
        let projection = Projection::Aggregate(aggregate, column.map(str::to_string));
        let rows = self.fetch_rows(query.project(projection))?;
        Ok(rows
            .into_iter()
            .next()
            .and_then(|mut row| row.remove(AGGREGATE_ALIAS))
            .unwrap_or(Value::Null))
    }

    pub fn count(&self, query: Query) -> RepoResult<u64> {
        match self.aggregate(query, Aggregate::Count, None)? {
            Value::Integer(count) => Ok(u64::try_from(count).unwrap_or(0)),
            Value::Null => Ok(0),
            other => Err(RepoError::Logic(format!(
                "count returned a non-integer value: {other:?}"
            ))),
        }
    }

    pub fn count_by(&self, conditions: &Row) -> RepoResult<u64> {
        self.count(self.query().filter_by(conditions))
    }

    pub fn sum_by(&self, column: &str, conditions: &Row) -> RepoResult<Value> {
        self.aggregate(self.query().filter_by(conditions), Aggregate::Sum, Some(column))
    }

    fn check_key(&self, key: &PrimaryKey) -> RepoResult<()> {
        if key.len() != self.primary.len() {
            return Err(RepoError::InvalidArgument(format!(
                "`{}` expects {} key value(s), got {}",
                T::NAME,
                self.primary.len(),
                key.len()
            )));
        }
        Ok(())
    }

    fn key_from_mapping(&self, mapping: &Row) -> RepoResult<PrimaryKey> {
        self.primary
            .iter()
            .map(|column| match mapping.get(column) {
                Some(value) if *value != Value::Null => Ok(value.clone()),
                _ => Err(RepoError::InvalidArgument(format!(
                    "`{}` lookup is missing key column `{column}`",
                    T::NAME
                ))),
            })
            .collect::<RepoResult<Vec<_>>>()
            .map(PrimaryKey::new)
    }

    fn resolve_lookup(&self, lookup: &Lookup<'_>) -> RepoResult<PrimaryKey> {
        let key = match lookup {
            Lookup::Key(key) => key.clone(),
            Lookup::Mapping(mapping) => self.key_from_mapping(mapping)?,
            Lookup::Reference(entity) => self.entity_key(entity)?,
        };
        self.check_key(&key)?;
        Ok(key)
    }

    fn key_condition(&self, key: PrimaryKey) -> Condition {
        Condition::for_keys(&self.primary, &[key])
    }

    fn entity_key(&self, entity: &Entity) -> RepoResult<PrimaryKey> {
        if entity.table() != T::NAME {
            return Err(RepoError::InvalidArgument(format!(
                "entity of `{}` passed to `{}` repository",
                entity.table(),
                T::NAME
            )));
        }
        entity
            .persisted_primary_key()
            .or_else(|| entity.primary_key())
            .ok_or_else(|| {
                RepoError::InvalidArgument(format!("`{}` entity has no primary key value", T::NAME))
            })
    }

    fn selector_condition(&self, selector: &RowSelector<'_>) -> RepoResult<Condition> {
        match selector {
            RowSelector::Key(key) => {
                self.check_key(key)?;
                Ok(self.key_condition(key.clone()))
            }
            RowSelector::Reference(entity) => Ok(self.key_condition(self.entity_key(entity)?)),
            RowSelector::List(items) => {
                if items.is_empty() {
                    return Err(RepoError::InvalidArgument(
                        "row selector list is empty".to_string(),
                    ));
                }
                let keys = items
                    .iter()
                    .map(|item| match item {
                        RowSelector::Reference(entity) => self.entity_key(entity),
                        _ => Err(RepoError::InvalidArgument(
                            "row selector lists accept entity references only".to_string(),
                        )),
                    })
                    .collect::<RepoResult<Vec<_>>>()?;
                Ok(Condition::for_keys(&self.primary, &keys))
            }
            RowSelector::Conditions(mapping) => {
                if mapping.is_empty() {
                    return Err(RepoError::InvalidArgument(
                        "condition mapping must not be empty".to_string(),
                    ));
                }
                Ok(Condition::from_mapping(mapping))
            }
        }
    }

    /// Entity for `lookup`, or `None`.
    pub fn find<'l>(&self, lookup: impl Into<Lookup<'l>>) -> RepoResult<Option<Entity>> {
        let key = self.resolve_lookup(&lookup.into())?;
        self.fetch_one(self.query().filter(self.key_condition(key)))
    }

    /// Entity for `lookup`, or `NotFound`.
    pub fn find_or_fail<'l>(&self, lookup: impl Into<Lookup<'l>>) -> RepoResult<Entity> {
        let key = self.resolve_lookup(&lookup.into())?;
        let described = key.to_string();
        self.fetch_one(self.query().filter(self.key_condition(key)))?
            .ok_or_else(|| RepoError::NotFound {
                table: T::NAME.to_string(),
                key: described,
            })
    }

    pub fn find_one_by(&self, conditions: &Row) -> RepoResult<Option<Entity>> {
        self.fetch_one(self.query().filter_by(conditions))
    }

    pub fn find_by(&self, conditions: &Row) -> RepoResult<Vec<Entity>> {
        self.fetch_all(self.query().filter_by(conditions))
    }

    pub fn search(&self, criteria: SearchCriteria) -> RepoResult<Vec<Entity>> {
        let mut query = self.query();
        for condition in criteria.conditions {
            query = query.filter(condition);
        }
        for (column, order) in criteria.order_by {
            query = query.order_by(column, order);
        }
        query.set_pagination(criteria.limit, criteria.offset);
        self.fetch_all(query)
    }

    fn insert_rows(&self, rows: Vec<Row>) -> RepoResult<(Vec<i64>, Vec<Row>)> {
        if rows.is_empty() {
            return Err(RepoError::InvalidArgument(
                "insert requires at least one row".to_string(),
            ));
        }
        let mut query = Query::insert(T::NAME, self.scope(), rows);
        let ids = self.transaction(|| self.execute(&mut query)?.into_inserted_ids())?;
        let written = query.insert_rows_mut().map(std::mem::take).unwrap_or_default();
        Ok((ids, written))
    }

    /// Inserts rows (after insert behaviors ran) and returns generated row ids.
    ///
    /// The batch is all-or-nothing: a failing row rolls back the rows
    /// written before it.
    pub fn insert(&self, rows: Vec<Row>) -> RepoResult<Vec<i64>> {
        self.insert_rows(rows).map(|(ids, _)| ids)
    }

    fn reload_inserted(&self, row: &Row, id: Option<i64>) -> RepoResult<Entity> {
        let key = match (self.key_from_mapping(row), id) {
            (Ok(key), _) => key,
            (Err(_), Some(id)) if self.primary.len() == 1 => PrimaryKey::from(id),
            (Err(err), _) => return Err(err),
        };
        self.fetch_one(self.raw_query().filter(self.key_condition(key)))?
            .ok_or_else(|| {
                RepoError::Logic(format!("written `{}` row could not be reloaded", T::NAME))
            })
    }

    fn require_conditions(conditions: &Row, operation: &str) -> RepoResult<()> {
        if conditions.is_empty() {
            return Err(RepoError::InvalidArgument(format!(
                "{operation} requires at least one condition"
            )));
        }
        Ok(())
    }

    /// First row matching `conditions`, inserting `conditions ∪ extra` when
    /// none exists.
    pub fn find_or_insert(&self, conditions: &Row, extra: &Row) -> RepoResult<Entity> {
        Self::require_conditions(conditions, "find_or_insert")?;
        if let Some(found) = self.find_one_by(conditions)? {
            return Ok(found);
        }
        let (ids, rows) = self.insert_rows(vec![merge(extra, conditions)])?;
        let row = rows.into_iter().next().unwrap_or_default();
        self.reload_inserted(&row, ids.first().copied())
    }

    /// First row matching `conditions`, or an unsaved entity built from
    /// `conditions ∪ extra`.
    pub fn find_or_new(&self, conditions: &Row, extra: &Row) -> RepoResult<Entity> {
        Self::require_conditions(conditions, "find_or_new")?;
        match self.find_one_by(conditions)? {
            Some(found) => Ok(found),
            None => self.create(merge(extra, conditions)),
        }
    }

    /// Applies `data` to the selected rows; returns affected rows.
    pub fn update<'s>(&self, selector: impl Into<RowSelector<'s>>, data: Row) -> RepoResult<usize> {
        if data.is_empty() {
            return Err(RepoError::InvalidArgument(
                "update requires at least one assignment".to_string(),
            ));
        }
        let condition = self.selector_condition(&selector.into())?;
        let mut query = Query::update(T::NAME, self.scope(), data).filter(condition);
        Ok(self.execute(&mut query)?.affected())
    }

    /// Updates the first row matching `conditions` with `data`, inserting
    /// `conditions ∪ data` when none exists; returns the stored entity.
    pub fn update_or_create(&self, conditions: &Row, data: Row) -> RepoResult<Entity> {
        Self::require_conditions(conditions, "update_or_create")?;
        match self.find_one_by(conditions)? {
            Some(found) => {
                let key = self.entity_key(&found)?;
                if !data.is_empty() {
                    self.update(RowSelector::Key(key.clone()), data)?;
                }
                self.fetch_one(self.raw_query().filter(self.key_condition(key)))?
                    .ok_or_else(|| {
                        RepoError::Logic(format!("updated `{}` row could not be reloaded", T::NAME))
                    })
            }
            None => {
                let (ids, rows) = self.insert_rows(vec![merge(conditions, &data)])?;
                let row = rows.into_iter().next().unwrap_or_default();
                self.reload_inserted(&row, ids.first().copied())
            }
        }
    }

    /// Persists changed entities with one UPDATE per distinct diff.
    ///
    /// Entities with identical diffs share a statement narrowed to their
    /// keys. Unchanged entities are skipped. All statements run in one
    /// transaction; once it succeeds, values stamped by update behaviors are
    /// copied into every member entity and the entities are marked persisted.
    ///
    /// # Errors
    /// - `InvalidArgument` for entities of another table, never-persisted
    ///   entities or entities without a key, before any driver call.
    pub fn update_entities(&self, entities: &mut [Entity]) -> RepoResult<usize> {
        let mut groups: Vec<(Row, Vec<usize>)> = Vec::new();
        for (index, entity) in entities.iter().enumerate() {
            if !entity.is_persisted() {
                return Err(RepoError::InvalidArgument(format!(
                    "update_entities accepts persisted `{}` entities only; use save",
                    T::NAME
                )));
            }
            self.entity_key(entity)?;
            let diff = entity.diff();
            if diff.is_empty() {
                continue;
            }
            match groups.iter_mut().find(|(shared, _)| *shared == diff) {
                Some((_, members)) => members.push(index),
                None => groups.push((diff, vec![index])),
            }
        }
        if groups.is_empty() {
            return Ok(0);
        }

        let (affected, written) = self.transaction(|| {
            let mut affected = 0;
            let mut written = Vec::with_capacity(groups.len());
            for (diff, members) in &groups {
                let keys = members
                    .iter()
                    .map(|&index| self.entity_key(&entities[index]))
                    .collect::<RepoResult<Vec<_>>>()?;
                let mut query = Query::update(T::NAME, self.scope(), diff.clone())
                    .filter(Condition::for_keys(&self.primary, &keys));
                affected += self.execute(&mut query)?.affected();
                written.push(query.update_values_mut().map(std::mem::take).unwrap_or_default());
            }
            Ok::<_, RepoError>((affected, written))
        })?;

        for ((_, members), values) in groups.iter().zip(written) {
            for &index in members {
                let entity = &mut entities[index];
                for (column, value) in &values {
                    entity.set(column.clone(), value.clone());
                }
                entity.mark_persisted();
            }
        }
        debug!(
            "event=repo_update_entities module=repo status=ok table={} entities={} statements={} affected={}",
            T::NAME,
            entities.len(),
            groups.len(),
            affected
        );
        Ok(affected)
    }

    /// Inserts an unsaved entity or writes a persisted entity's diff.
    ///
    /// Values stamped by behaviors and a generated integer key are copied
    /// back into the entity. Returns affected rows.
    pub fn save(&self, entity: &mut Entity) -> RepoResult<usize> {
        if entity.table() != T::NAME {
            return Err(RepoError::InvalidArgument(format!(
                "entity of `{}` passed to `{}` repository",
                entity.table(),
                T::NAME
            )));
        }

        if !entity.is_persisted() {
            let (ids, rows) = self.insert_rows(vec![entity.values().clone()])?;
            for (column, value) in rows.into_iter().next().unwrap_or_default() {
                entity.set(column, value);
            }
            if entity.primary_key().is_none() && self.primary.len() == 1 {
                if let Some(id) = ids.first() {
                    entity.set(self.primary[0].clone(), *id);
                }
            }
            entity.mark_persisted();
            return Ok(ids.len());
        }

        let diff = entity.diff();
        if diff.is_empty() {
            return Ok(0);
        }
        let key = self.entity_key(entity)?;
        let mut query = Query::update(T::NAME, self.scope(), diff).filter(self.key_condition(key));
        let affected = self.execute(&mut query)?.affected();
        if let Some(values) = query.update_values_mut() {
            for (column, value) in std::mem::take(values) {
                entity.set(column, value);
            }
        }
        entity.mark_persisted();
        Ok(affected)
    }

    /// Deletes every row picked by any of `selectors`; returns affected rows.
    pub fn delete(&self, selectors: &[RowSelector<'_>]) -> RepoResult<usize> {
        if selectors.is_empty() {
            return Err(RepoError::InvalidArgument(
                "delete requires at least one row selector".to_string(),
            ));
        }
        let mut conditions = selectors
            .iter()
            .map(|selector| self.selector_condition(selector))
            .collect::<RepoResult<Vec<_>>>()?;
        let condition = if conditions.len() == 1 {
            conditions.remove(0)
        } else {
            Condition::Any(conditions)
        };
        let mut query = Query::delete(T::NAME, self.scope()).filter(condition);
        Ok(self.execute(&mut query)?.affected())
    }

    /// See [`tx::transaction`].
    pub fn transaction<R, E, F>(&self, f: F) -> Result<R, E>
    where
        F: FnOnce() -> Result<R, E>,
        E: From<RepoError> + Display,
    {
        tx::transaction(self.deps.driver(), f)
    }

    /// [`tx::ensure`] with the default policy (3 attempts, reconnect).
    pub fn ensure<R, E, F>(&self, f: F) -> Result<R, E>
    where
        F: FnMut() -> Result<R, E>,
        E: From<RepoError> + Display,
    {
        self.ensure_with(EnsurePolicy::default(), f)
    }

    pub fn ensure_with<R, E, F>(&self, policy: EnsurePolicy, f: F) -> Result<R, E>
    where
        F: FnMut() -> Result<R, E>,
        E: From<RepoError> + Display,
    {
        tx::ensure(self.deps.driver(), policy, f)
    }
}
