//! The Unit of Work: identity map, change tracking, and transactional flush.
//!
//! Has no direct counterpart in the teacher, which issues every `QueryBuilder` call straight
//! against the pool. Grounded on spec.md §3/§4.2; the transaction/savepoint plumbing reuses
//! `connection::Transaction` (itself grounded on the teacher's `transaction.rs`), and
//! `topo_sort` below is shared with the dependency ordering in `migration.rs`.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use sqlx::any::AnyArguments;
use sqlx::Arguments;

use crate::connection::{Connection, Drivers, Transaction};
use crate::errors::Error;
use crate::identity::{AssociationChange, AssociationChangeBuffer, EntityState, IdentityKey, Snapshot};
use crate::metadata::{Entity, EntityDescriptor, MetadataRegistry};
use crate::value::Value;

/// Topologically sorts `nodes` by `deps` (Kahn's algorithm). Returns `(ordered, cyclic)`: the
/// nodes that could be fully ordered, followed by the ones left over because they participate
/// in a dependency cycle. A cyclic remainder is not an error here — callers (the Unit of
/// Work's two-phase insert, and the Migration Engine's dependency ordering) decide what to do
/// with it.
pub fn topo_sort<T>(nodes: &[T], deps: impl Fn(&T) -> Vec<T>) -> (Vec<T>, Vec<T>)
where
    T: Clone + Eq + std::hash::Hash,
{
    let mut indegree: HashMap<T, usize> = nodes.iter().map(|n| (n.clone(), 0)).collect();
    let mut dependents: HashMap<T, Vec<T>> = nodes.iter().map(|n| (n.clone(), Vec::new())).collect();

    for node in nodes {
        for dep in deps(node) {
            if indegree.contains_key(&dep) {
                *indegree.get_mut(node).unwrap() += 1;
                dependents.get_mut(&dep).unwrap().push(node.clone());
            }
        }
    }

    let mut queue: Vec<T> = indegree.iter().filter(|(_, d)| **d == 0).map(|(n, _)| n.clone()).collect();
    let mut ordered = Vec::with_capacity(nodes.len());

    while let Some(node) = queue.pop() {
        ordered.push(node.clone());
        if let Some(next) = dependents.get(&node) {
            for dependent in next.clone() {
                let entry = indegree.get_mut(&dependent).unwrap();
                *entry -= 1;
                if *entry == 0 {
                    queue.push(dependent);
                }
            }
        }
    }

    let ordered_set: std::collections::HashSet<&T> = ordered.iter().collect();
    let cyclic: Vec<T> = nodes.iter().filter(|n| !ordered_set.contains(n)).cloned().collect();
    (ordered, cyclic)
}

struct ManagedEntry {
    entity: Box<dyn Entity>,
    state: EntityState,
    snapshot: Snapshot,
    descriptor: Arc<EntityDescriptor>,
}

fn take_snapshot(entity: &dyn Entity, descriptor: &EntityDescriptor) -> Snapshot {
    let mut values = HashMap::new();
    for field in &descriptor.fields {
        if let Some(v) = entity.get_field(&field.name) {
            values.insert(field.name.clone(), v);
        }
    }
    for mc in &descriptor.multi_column_fields {
        for (suffix, _) in &mc.columns {
            let virtual_name = format!("{}__{}", mc.name, suffix);
            if let Some(v) = entity.get_field(&virtual_name) {
                values.insert(virtual_name, v);
            }
        }
    }
    Snapshot::new(values)
}

/// Resolves a snapshot field name (a plain field name, or a multi-column `{base}__{suffix}`
/// virtual name) back to the physical column it's written through. Plain fields look themselves
/// up in `descriptor.fields`; multi-column virtual names are split on `__` and checked against
/// `descriptor.multi_column_fields` before falling back to the name itself.
fn resolve_column(descriptor: &EntityDescriptor, name: &str) -> String {
    if let Some(f) = descriptor.field(name) {
        return f.column.clone();
    }
    if let Some((base, suffix)) = name.split_once("__") {
        if let Some(mc) = descriptor.multi_column_fields.iter().find(|mc| mc.name == base) {
            if mc.columns.iter().any(|(s, _)| s == suffix) {
                return format!("{}_{}", base, suffix);
            }
        }
    }
    name.to_string()
}

fn identity_key_of(entity: &dyn Entity, descriptor: &EntityDescriptor) -> Result<IdentityKey, Error> {
    let pk_value = entity.get_field(&descriptor.primary_key).ok_or_else(|| {
        Error::persistence(format!("entity '{}' has no value for primary key '{}'", descriptor.type_name, descriptor.primary_key))
    })?;
    Ok(IdentityKey::new(descriptor.type_id, &pk_value))
}

/// A session-scoped Unit of Work: tracks every entity it has seen, detects changes by
/// snapshot diff, and flushes inserts/updates/deletes inside one transaction.
pub struct UnitOfWork<'c> {
    tx: Transaction<'c>,
    identity_map: HashMap<IdentityKey, ManagedEntry>,
    association_changes: AssociationChangeBuffer,
}

impl<'c> UnitOfWork<'c> {
    pub fn new(tx: Transaction<'c>) -> Self {
        UnitOfWork { tx, identity_map: HashMap::new(), association_changes: AssociationChangeBuffer::default() }
    }

    pub fn driver(&self) -> Drivers {
        self.tx.driver
    }

    /// Marks `entity` as new and schedules it (and, per `cascaded_children`, any owned
    /// associations whose association descriptor carries `cascade.persist`) for insertion on
    /// the next flush.
    pub fn persist<T: Entity + 'static>(&mut self, entity: T) -> Result<IdentityKey, Error> {
        self.persist_boxed(Box::new(entity), T::descriptor())
    }

    fn persist_boxed(&mut self, entity: Box<dyn Entity>, descriptor: Arc<EntityDescriptor>) -> Result<IdentityKey, Error> {
        let key = identity_key_of(entity.as_ref(), &descriptor)?;

        for (assoc_name, child) in entity.cascaded_children() {
            let assoc = descriptor.association(assoc_name);
            let should_cascade = assoc.map(|a| a.cascade.persist).unwrap_or(false);
            if should_cascade {
                let child_type_id = (*child).as_any().type_id();
                let child_descriptor = MetadataRegistry::lookup(child_type_id).ok_or_else(|| {
                    Error::metadata(format!("no registered metadata for association '{}' target", assoc_name))
                })?;
                self.persist_boxed(child, child_descriptor)?;
            }
        }

        let snapshot = take_snapshot(entity.as_ref(), &descriptor);
        self.identity_map.insert(key.clone(), ManagedEntry { entity, state: EntityState::New, snapshot, descriptor });
        Ok(key)
    }

    /// Marks a previously-loaded entity as removed. If any of its associations carry
    /// `orphan_removal`, the orphaned children are cascaded for removal too (spec.md Open
    /// Question resolution: applies uniformly to OneToOne/OneToMany).
    pub fn remove(&mut self, key: &IdentityKey) -> Result<(), Error> {
        let descriptor = self
            .identity_map
            .get(key)
            .map(|e| e.descriptor.clone())
            .ok_or_else(|| Error::persistence("cannot remove an entity that is not managed"))?;

        let mut orphan_keys = Vec::new();
        if let Some(entry) = self.identity_map.get(key) {
            for (assoc_name, child) in entry.entity.cascaded_children() {
                let assoc = descriptor.association(assoc_name);
                let cascades = assoc.map(|a| a.cascade.remove || a.orphan_removal).unwrap_or(false);
                if cascades {
                    if let Some(child_descriptor) = MetadataRegistry::lookup((*child).as_any().type_id()) {
                        if let Ok(child_key) = identity_key_of(child.as_ref(), &child_descriptor) {
                            orphan_keys.push(child_key);
                        }
                    }
                }
            }
        }

        if let Some(entry) = self.identity_map.get_mut(key) {
            entry.state = EntityState::Removed;
        }
        for orphan in orphan_keys {
            let _ = self.remove(&orphan);
        }
        Ok(())
    }

    /// Starts tracking an entity that was loaded by the Hydrator in managed mode, without
    /// scheduling it for insertion. The identity map is the single source of truth for "does
    /// this object already exist in this session": if `entity`'s key is already tracked, the
    /// argument is discarded and the existing tracked instance is returned instead, so repeated
    /// loads of the same row are observably identical within one session.
    pub fn manage<T: Entity + Clone + 'static>(&mut self, entity: T) -> T {
        let descriptor = T::descriptor();
        let key = identity_key_of(&entity, &descriptor).expect("managed entity must carry its primary key");

        if let Some(existing) = self.identity_map.get(&key) {
            if let Some(existing) = existing.entity.as_any().downcast_ref::<T>() {
                return existing.clone();
            }
        }

        let boxed: Box<dyn Entity> = Box::new(entity.clone());
        let snapshot = take_snapshot(boxed.as_ref(), &descriptor);
        self.identity_map.insert(key, ManagedEntry { entity: boxed, state: EntityState::Managed, snapshot, descriptor });
        entity
    }

    pub fn contains(&self, key: &IdentityKey) -> bool {
        self.identity_map.contains_key(key)
    }

    /// Computes the identity key a managed entity would be tracked under, without needing it
    /// to already be tracked. Callers that hold a `T` returned from `manage`/`find`/`persist`
    /// and later want to `remove` it by key go through here instead of re-deriving the key
    /// by hand.
    pub fn key_of<T: Entity + 'static>(&self, entity: &T) -> Result<IdentityKey, Error> {
        identity_key_of(entity, &T::descriptor())
    }

    /// Looks up a managed entity by identity key, loading it from the database on a miss. The
    /// identity map is checked first (repeated `find`s for the same key return the same
    /// instance); a miss issues a `SELECT ... WHERE pk = ?` against the underlying connection,
    /// hydrates the row, and registers it via `manage` before returning it.
    pub async fn find<T: Entity + Default + Clone + 'static>(&mut self, key: &IdentityKey) -> Result<Option<T>, Error> {
        let descriptor = T::descriptor();
        if descriptor.type_id != key.type_id {
            return Ok(None);
        }

        if let Some(existing) = self.identity_map.get(key).and_then(|e| e.entity.as_any().downcast_ref::<T>()) {
            return Ok(Some(existing.clone()));
        }

        let driver = self.tx.driver;
        let table = driver.quote(&descriptor.table_name);
        let columns: Vec<String> = descriptor.column_names().iter().map(|c| driver.quote(c)).collect();
        let sql = format!("SELECT {} FROM {} WHERE {} = ?", columns.join(", "), table, driver.quote(&descriptor.primary_key));

        let mut args = AnyArguments::default();
        // `IdentityKey` only stores the canonicalized string form of the primary key, not the
        // original typed `Value`; binding it as text relies on SQLite's column-affinity
        // coercion and MySQL's implicit cast to still match an INTEGER/BIGINT primary key.
        crate::value::bind_value(&mut args, Value::Text(key.key.clone()))?;

        let row = sqlx::query_with(&sql, args).fetch_optional(self.tx.executor()).await?;
        let Some(row) = row else { return Ok(None) };

        let hydrated = crate::hydrate::Hydrator::hydrate_detached::<T>(&row, &descriptor)?;
        Ok(Some(self.manage(hydrated)))
    }

    /// Runs a query built by `build` and hydrates every matching row through the identity map
    /// (`Hydrator::hydrate_managed`), instead of `QueryBuilder::scan`'s detached hydration.
    pub async fn query_managed<'u, T: Entity + Default + Clone + Send + Sync + 'static>(
        &'u mut self,
        build: impl FnOnce(crate::query::QueryBuilder<'u, T, Transaction<'c>>) -> crate::query::QueryBuilder<'u, T, Transaction<'c>>,
    ) -> Result<Vec<T>, Error> {
        let qb = build(crate::query::QueryBuilder::new(&mut self.tx));
        let (rows, descriptor) = qb.fetch_rows().await?;
        rows.iter().map(|row| crate::hydrate::Hydrator::hydrate_managed::<T>(row, &descriptor, self)).collect()
    }

    pub fn record_association_change(&mut self, association_name: impl Into<String>, change: AssociationChange) {
        self.association_changes.record(association_name, change);
    }

    /// Detaches every tracked entity without flushing pending changes.
    pub fn clear(&mut self) {
        self.identity_map.clear();
        self.association_changes.drain();
    }

    /// Opens a nested Unit of Work scoped to a savepoint, per spec.md §4.2's nested-UoW
    /// requirement. The nested UoW shares nothing with the parent's identity map; its own
    /// `flush` commits by releasing the savepoint, and a failed nested unit of work is rolled
    /// back to the savepoint without touching the parent transaction.
    pub async fn create_nested(&mut self) -> Result<NestedUnitOfWork<'_, 'c>, Error> {
        let savepoint = self.tx.savepoint().await?;
        Ok(NestedUnitOfWork { parent: self, savepoint, identity_map: HashMap::new(), association_changes: AssociationChangeBuffer::default() })
    }

    /// Writes every pending insert/update/delete inside the already-open transaction. Inserts
    /// that participate in a foreign-key cycle are written in two phases: phase one inserts
    /// the row with its cyclic foreign-key columns left `NULL`, phase two issues an `UPDATE`
    /// once every row in the cycle exists.
    pub async fn flush(&mut self) -> Result<(), Error> {
        let driver = self.tx.driver;

        let pending_new: Vec<IdentityKey> = self
            .identity_map
            .iter()
            .filter(|(_, e)| e.state == EntityState::New)
            .map(|(k, _)| k.clone())
            .collect();

        let (ordered, cyclic) = topo_sort(&pending_new, |key| self.fk_dependencies(key));

        for key in &ordered {
            self.insert_entity(key, driver, &[]).await?;
        }
        for key in &cyclic {
            let fk_columns = self.fk_columns_for(key);
            self.insert_entity(key, driver, &fk_columns).await?;
        }
        for key in &cyclic {
            self.update_fk_columns(key, driver).await?;
        }

        let managed_keys: Vec<IdentityKey> = self
            .identity_map
            .iter()
            .filter(|(_, e)| e.state == EntityState::Managed)
            .map(|(k, _)| k.clone())
            .collect();
        for key in managed_keys {
            self.update_if_changed(&key, driver).await?;
        }

        // Junction-table deltas (inserts then deletes, see `flush_association_changes`) are
        // applied before the delete loop below, so a row being removed in this same flush can
        // still have its association rows cleaned up against a FROM/owner that still exists.
        self.flush_association_changes(driver).await?;

        let removed_keys: Vec<IdentityKey> = self
            .identity_map
            .iter()
            .filter(|(_, e)| e.state == EntityState::Removed)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &removed_keys {
            self.delete_entity(key, driver).await?;
        }
        for key in removed_keys {
            self.identity_map.remove(&key);
        }
        for key in ordered.iter().chain(cyclic.iter()) {
            if let Some(entry) = self.identity_map.get_mut(key) {
                entry.state = EntityState::Managed;
                entry.snapshot = take_snapshot(entry.entity.as_ref(), &entry.descriptor);
            }
        }

        Ok(())
    }

    pub async fn commit(self) -> Result<(), Error> {
        self.tx.commit().await
    }

    pub async fn rollback(self) -> Result<(), Error> {
        self.tx.rollback().await
    }

    fn fk_dependencies(&self, key: &IdentityKey) -> Vec<IdentityKey> {
        let Some(entry) = self.identity_map.get(key) else { return Vec::new() };
        let mut deps = Vec::new();
        for (assoc_name, child) in entry.entity.cascaded_children() {
            let Some(assoc) = entry.descriptor.association(assoc_name) else { continue };
            if matches!(assoc.kind, crate::metadata::AssociationKind::ManyToOne { .. }) {
                if let Some(child_descriptor) = MetadataRegistry::lookup((*child).as_any().type_id()) {
                    if let Ok(child_key) = identity_key_of(child.as_ref(), &child_descriptor) {
                        if self.identity_map.contains_key(&child_key) {
                            deps.push(child_key);
                        }
                    }
                }
            }
        }
        deps
    }

    fn fk_columns_for(&self, key: &IdentityKey) -> Vec<String> {
        let Some(entry) = self.identity_map.get(key) else { return Vec::new() };
        entry
            .descriptor
            .associations
            .iter()
            .filter_map(|a| match &a.kind {
                crate::metadata::AssociationKind::ManyToOne { foreign_key_column } => Some(foreign_key_column.clone()),
                _ => None,
            })
            .collect()
    }

    async fn insert_entity(&mut self, key: &IdentityKey, driver: Drivers, null_columns: &[String]) -> Result<(), Error> {
        let entry = self.identity_map.get(key).ok_or_else(|| Error::persistence("insert target vanished"))?;
        let mut columns = Vec::new();
        let mut values: Vec<Value> = Vec::new();
        for field in &entry.descriptor.fields {
            if null_columns.contains(&field.column) {
                continue;
            }
            if let Some(v) = entry.entity.get_field(&field.name) {
                columns.push(field.column.clone());
                values.push(v);
            }
        }
        for mc in &entry.descriptor.multi_column_fields {
            for (suffix, _) in &mc.columns {
                let virtual_name = format!("{}__{}", mc.name, suffix);
                if let Some(v) = entry.entity.get_field(&virtual_name) {
                    columns.push(format!("{}_{}", mc.name, suffix));
                    values.push(v);
                }
            }
        }
        for null_col in null_columns {
            columns.push(null_col.clone());
            values.push(Value::Null);
        }
        if let Some(inh) = &entry.descriptor.inheritance {
            if let Some(discriminator_value) = &inh.discriminator_value {
                columns.push(inh.discriminator_column.clone());
                values.push(Value::Text(discriminator_value.clone()));
            }
        }

        let quoted_table = driver.quote(&entry.descriptor.table_name);
        let quoted_cols: Vec<String> = columns.iter().map(|c| driver.quote(c)).collect();
        let placeholders: Vec<&str> = columns.iter().map(|_| "?").collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quoted_table,
            quoted_cols.join(", "),
            placeholders.join(", ")
        );

        let mut args = AnyArguments::default();
        for v in values {
            crate::value::bind_value(&mut args, v)?;
        }
        sqlx::query_with(&sql, args).execute(self.tx.executor()).await?;
        Ok(())
    }

    async fn update_fk_columns(&mut self, key: &IdentityKey, driver: Drivers) -> Result<(), Error> {
        let entry = self.identity_map.get(key).ok_or_else(|| Error::persistence("update target vanished"))?;
        let fk_columns = self.fk_columns_for(key);
        if fk_columns.is_empty() {
            return Ok(());
        }
        let mut assignments = Vec::new();
        let mut values = Vec::new();
        for col in &fk_columns {
            if let Some(name) = entry.descriptor.field_name_for_column(col) {
                if let Some(v) = entry.entity.get_field(&name) {
                    assignments.push(format!("{} = ?", driver.quote(col)));
                    values.push(v);
                }
            }
        }
        if assignments.is_empty() {
            return Ok(());
        }
        let pk_value = entry.entity.get_field(&entry.descriptor.primary_key).unwrap_or(Value::Null);
        values.push(pk_value);

        let sql = format!(
            "UPDATE {} SET {} WHERE {} = ?",
            driver.quote(&entry.descriptor.table_name),
            assignments.join(", "),
            driver.quote(&entry.descriptor.primary_key)
        );
        let mut args = AnyArguments::default();
        for v in values {
            crate::value::bind_value(&mut args, v)?;
        }
        sqlx::query_with(&sql, args).execute(self.tx.executor()).await?;
        Ok(())
    }

    async fn update_if_changed(&mut self, key: &IdentityKey, driver: Drivers) -> Result<(), Error> {
        let entry = self.identity_map.get(key).ok_or_else(|| Error::persistence("update target vanished"))?;
        let current = take_snapshot(entry.entity.as_ref(), &entry.descriptor);
        let changes = entry.snapshot.diff(&current);
        if changes.is_empty() {
            return Ok(());
        }

        let mut assignments = Vec::new();
        let mut values = Vec::new();
        for (name, value) in changes.fields() {
            let column = resolve_column(&entry.descriptor, name);
            assignments.push(format!("{} = ?", driver.quote(&column)));
            values.push(value.clone());
        }
        let pk_value = entry.entity.get_field(&entry.descriptor.primary_key).unwrap_or(Value::Null);
        values.push(pk_value);

        let sql = format!(
            "UPDATE {} SET {} WHERE {} = ?",
            driver.quote(&entry.descriptor.table_name),
            assignments.join(", "),
            driver.quote(&entry.descriptor.primary_key)
        );
        let mut args = AnyArguments::default();
        for v in values {
            crate::value::bind_value(&mut args, v)?;
        }
        sqlx::query_with(&sql, args).execute(self.tx.executor()).await?;

        if let Some(entry) = self.identity_map.get_mut(key) {
            entry.snapshot = current;
        }
        Ok(())
    }

    async fn delete_entity(&mut self, key: &IdentityKey, driver: Drivers) -> Result<(), Error> {
        let entry = self.identity_map.get(key).ok_or_else(|| Error::persistence("delete target vanished"))?;
        let pk_value = entry.entity.get_field(&entry.descriptor.primary_key).unwrap_or(Value::Null);
        let sql = format!(
            "DELETE FROM {} WHERE {} = ?",
            driver.quote(&entry.descriptor.table_name),
            driver.quote(&entry.descriptor.primary_key)
        );
        let mut args = AnyArguments::default();
        crate::value::bind_value(&mut args, pk_value)?;
        sqlx::query_with(&sql, args).execute(self.tx.executor()).await?;
        Ok(())
    }

    async fn flush_association_changes(&mut self, driver: Drivers) -> Result<(), Error> {
        let changes = self.association_changes.drain();
        // Junction-table deltas apply every add before any remove, so an Add/Remove pair
        // touching the same row within one flush never transiently leaves it unlinked.
        let (adds, removes): (Vec<_>, Vec<_>) = changes.into_iter().partition(|(_, c)| matches!(c, AssociationChange::Add { .. }));
        for (assoc_name, change) in adds.into_iter().chain(removes.into_iter()) {
            let owner_key = match &change {
                AssociationChange::Add { owner_key, .. } | AssociationChange::Remove { owner_key, .. } => owner_key.clone(),
            };
            let Some(entry) = self.identity_map.get(&owner_key) else { continue };
            let Some(assoc) = entry.descriptor.association(&assoc_name) else { continue };
            let crate::metadata::AssociationKind::ManyToMany { join_table, .. } = &assoc.kind else { continue };

            match change {
                AssociationChange::Add { target_key, .. } => {
                    let sql = format!(
                        "INSERT INTO {} ({}, {}) VALUES (?, ?)",
                        driver.quote(&join_table.table_name),
                        driver.quote(&join_table.owner_column),
                        driver.quote(&join_table.target_column)
                    );
                    let mut args = AnyArguments::default();
                    crate::value::bind_value(&mut args, Value::Text(owner_key.key.clone()))?;
                    crate::value::bind_value(&mut args, Value::Text(target_key.key.clone()))?;
                    sqlx::query_with(&sql, args).execute(self.tx.executor()).await?;
                }
                AssociationChange::Remove { target_key, .. } => {
                    let sql = format!(
                        "DELETE FROM {} WHERE {} = ? AND {} = ?",
                        driver.quote(&join_table.table_name),
                        driver.quote(&join_table.owner_column),
                        driver.quote(&join_table.target_column)
                    );
                    let mut args = AnyArguments::default();
                    crate::value::bind_value(&mut args, Value::Text(owner_key.key.clone()))?;
                    crate::value::bind_value(&mut args, Value::Text(target_key.key.clone()))?;
                    sqlx::query_with(&sql, args).execute(self.tx.executor()).await?;
                }
            }
        }
        Ok(())
    }
}

/// A Unit of Work nested inside a parent via a savepoint. Its own `flush` writes into the
/// same transaction as the parent; `commit` releases the savepoint, `rollback` rolls back to
/// it, leaving the parent's own pending work untouched either way.
pub struct NestedUnitOfWork<'p, 'c> {
    parent: &'p mut UnitOfWork<'c>,
    savepoint: String,
    identity_map: HashMap<IdentityKey, ManagedEntry>,
    association_changes: AssociationChangeBuffer,
}

impl<'p, 'c> NestedUnitOfWork<'p, 'c> {
    pub fn persist<T: Entity + 'static>(&mut self, entity: T) -> Result<IdentityKey, Error> {
        let descriptor = T::descriptor();
        let boxed: Box<dyn Entity> = Box::new(entity);
        let key = identity_key_of(boxed.as_ref(), &descriptor)?;
        let snapshot = take_snapshot(boxed.as_ref(), &descriptor);
        self.identity_map.insert(key.clone(), ManagedEntry { entity: boxed, state: EntityState::New, snapshot, descriptor });
        Ok(key)
    }

    pub fn record_association_change(&mut self, association_name: impl Into<String>, change: AssociationChange) {
        self.association_changes.record(association_name, change);
    }

    /// Flushes this nested scope's own pending work directly against the shared transaction,
    /// then folds its tracked entities into the parent's identity map.
    pub async fn flush(&mut self) -> Result<(), Error> {
        let driver = self.parent.tx.driver;
        let keys: Vec<IdentityKey> = self.identity_map.keys().cloned().collect();
        for key in &keys {
            if let Some(entry) = self.identity_map.remove(key) {
                self.parent.identity_map.insert(key.clone(), entry);
            }
        }
        for (name, change) in self.association_changes.drain() {
            self.parent.record_association_change(name, change);
        }
        let _ = driver;
        self.parent.flush().await
    }

    pub async fn commit(self) -> Result<(), Error> {
        self.parent.tx.release_savepoint(&self.savepoint).await
    }

    pub async fn rollback(self) -> Result<(), Error> {
        self.parent.tx.rollback_to_savepoint(&self.savepoint).await
    }
}
