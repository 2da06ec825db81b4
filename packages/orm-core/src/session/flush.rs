//! Flush: writes pending changes of the persistence context to storage.
//!
//! Order within one flush:
//! 1. persist cascades are re-applied to pick up instances added since
//! 2. references to transient instances are rejected
//! 3. inserts, parents before children by foreign key
//! 4. post-persist hooks, children before parents
//! 5. updates of dirty instances, with version check
//! 6. deletes, children before parents

use std::collections::HashSet;

use crate::error::{OrmError, Result};
use crate::mapping::{EntityMapping, IdStrategy, LifecycleEvent};
use crate::storage::{Outcome, Row, Statement, VersionCheck};
use crate::types::{EntityKey, Value};

use super::entity::EntityState;
use super::lazy::{AssociationValue, Lazy};
use super::Session;

impl Session {
    /// Writes pending inserts, updates and deletes.
    ///
    /// Requires an active transaction. Any error aborts the flush; the
    /// caller is expected to roll back.
    pub fn flush(&mut self) -> Result<()> {
        self.require_transaction()?;

        let mut visited = HashSet::new();
        for slot in 0..self.entries.len() {
            if matches!(
                self.entries[slot].state,
                EntityState::PersistPending | EntityState::Managed
            ) {
                self.cascade_persist(slot, &mut visited)?;
            }
        }
        self.check_transient_references()?;

        let persist_order: Vec<usize> = self.insert_queue.clone();
        let inserted = self.flush_inserts()?;
        for &slot in persist_order.iter().rev() {
            if inserted.contains(&slot) {
                self.fire(slot, LifecycleEvent::PostPersist)?;
            }
        }
        let updated = self.flush_updates()?;
        let deleted = self.flush_deletes()?;

        self.stats.flushes += 1;
        tracing::debug!(
            "Session {:?} flushed: {} inserts, {} updates, {} deletes",
            self.id,
            inserted.len(),
            updated,
            deleted
        );
        Ok(())
    }

    fn check_transient_references(&self) -> Result<()> {
        let registry = self.registry();
        for (slot, entry) in self.entries.iter().enumerate() {
            if !matches!(entry.state, EntityState::PersistPending | EntityState::Managed) {
                continue;
            }
            let mapping = self.mapping_for(&registry, slot)?;
            for association in mapping.to_one_associations() {
                let Some(AssociationValue::ToOne(Lazy::Resolved(Some(target)))) =
                    entry.associations.get(&association.name)
                else {
                    continue;
                };
                let target_entry = &self.entries[self.slot(*target)?];
                let unsaved = match target_entry.state {
                    EntityState::Transient => true,
                    EntityState::Detached => target_entry.data.id.is_none(),
                    _ => false,
                };
                if unsaved {
                    return Err(OrmError::TransientReference {
                        entity: mapping.name.clone(),
                        association: association.name.clone(),
                        target: association.target.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Foreign key value a to-one association currently stands for.
    fn foreign_key_value(&self, slot: usize, association: &str) -> Value {
        match self.entries[slot].associations.get(association) {
            Some(AssociationValue::ToOne(Lazy::Resolved(Some(target)))) => self
                .entries
                .get(target.slot)
                .map_or(Value::Null, |t| Value::from(t.data.id)),
            Some(AssociationValue::ToOne(Lazy::Unresolved(key))) => Value::Int(key.id),
            _ => Value::Null,
        }
    }

    /// Non-key columns as they should be stored. Associations named in
    /// `deferred` are written as NULL.
    fn column_values(&self, mapping: &EntityMapping, slot: usize, deferred: &[String]) -> Row {
        let data = &self.entries[slot].data;
        let mut row = Row::new();
        for field in &mapping.fields {
            row.insert(field.column.clone(), data.get(&field.name).clone());
        }
        for association in mapping.to_one_associations() {
            if let Some(column) = association.fk_column() {
                let value = if deferred.contains(&association.name) {
                    Value::Null
                } else {
                    self.foreign_key_value(slot, &association.name)
                };
                row.insert(column.to_string(), value);
            }
        }
        row
    }

    fn check_not_null(mapping: &EntityMapping, row: &Row) -> Result<()> {
        let violated = mapping
            .fields
            .iter()
            .filter(|f| !f.nullable)
            .map(|f| f.column.as_str())
            .chain(mapping.to_one_associations().filter_map(|a| match &a.kind {
                crate::mapping::AssociationKind::ManyToOne { column, nullable: false } => Some(column.as_str()),
                _ => None,
            }))
            .find(|column| row.get(*column).map_or(false, Value::is_null));
        match violated {
            Some(column) => Err(OrmError::ConstraintViolation {
                table: mapping.table.clone(),
                constraint: format!("not null({})", column),
                detail: format!("{}.{} is null", mapping.name, column),
            }),
            None => Ok(()),
        }
    }

    /// To-one associations of `slot` pointing at instances in `pending`.
    fn pending_dependencies(&self, slot: usize, pending: &[usize]) -> Vec<String> {
        self.entries[slot]
            .associations
            .iter()
            .filter_map(|(name, value)| match value {
                AssociationValue::ToOne(Lazy::Resolved(Some(target))) if pending.contains(&target.slot) => {
                    Some(name.clone())
                }
                _ => None,
            })
            .collect()
    }

    /// Inserts every pending instance, returning the inserted slots.
    ///
    /// An instance is inserted once the instances it references are. When
    /// only cycles remain, the first pending instance is inserted with the
    /// offending foreign keys NULL and fixed by an update afterwards.
    fn flush_inserts(&mut self) -> Result<Vec<usize>> {
        let mut pending: Vec<usize> = self
            .insert_queue
            .iter()
            .copied()
            .filter(|s| self.entries[*s].state == EntityState::PersistPending)
            .collect();
        let mut inserted = Vec::with_capacity(pending.len());
        let mut fixups: Vec<(usize, String)> = Vec::new();

        while !pending.is_empty() {
            let ready = pending
                .iter()
                .position(|&s| self.pending_dependencies(s, &pending).is_empty());
            let (slot, deferred) = match ready {
                Some(position) => (pending.remove(position), Vec::new()),
                None => {
                    let deferred = self.pending_dependencies(pending[0], &pending);
                    (pending.remove(0), deferred)
                }
            };
            if !deferred.is_empty() {
                tracing::debug!(
                    "Breaking insert cycle at {} by deferring {:?}",
                    self.entries[slot].data.entity,
                    deferred
                );
            }
            self.insert_entity(slot, &deferred)?;
            fixups.extend(deferred.into_iter().map(|name| (slot, name)));
            inserted.push(slot);
        }
        self.insert_queue.clear();

        for (slot, association) in fixups {
            self.fixup_foreign_key(slot, &association)?;
        }
        Ok(inserted)
    }

    fn insert_entity(&mut self, slot: usize, deferred: &[String]) -> Result<()> {
        let registry = self.registry();
        let mapping = self.mapping_for(&registry, slot)?;
        let mut values = self.column_values(mapping, slot, deferred);
        Self::check_not_null(mapping, &values)?;
        if let Some(column) = &mapping.version_column {
            values.insert(column.clone(), Value::Int(0));
        }
        let assigned = match mapping.id_strategy {
            IdStrategy::Generated => None,
            IdStrategy::Assigned => self.entries[slot].data.id,
        };

        let outcome = self.execute(&Statement::Insert {
            table: mapping.table.clone(),
            id_column: mapping.id_column.clone(),
            id: assigned,
            values: values.clone(),
        })?;
        let Outcome::Inserted { id } = outcome else {
            return Err(OrmError::illegal_state("driver returned no id for insert"));
        };

        values.insert(mapping.id_column.clone(), Value::Int(id));
        let entry = &mut self.entries[slot];
        entry.data.id = Some(id);
        entry.data.version = mapping.version_column.as_ref().map(|_| 0);
        entry.loaded = Some(values);
        entry.state = EntityState::Managed;
        self.identity_map.insert(EntityKey::new(mapping.name.clone(), id), slot)?;
        self.inserted_in_tx.push(slot);
        self.stats.inserts += 1;
        Ok(())
    }

    fn fixup_foreign_key(&mut self, slot: usize, association: &str) -> Result<()> {
        let registry = self.registry();
        let mapping = self.mapping_for(&registry, slot)?;
        let column = mapping
            .association(association)?
            .fk_column()
            .ok_or_else(|| OrmError::illegal_state("deferred association owns no foreign key"))?;
        let id = self.entries[slot]
            .data
            .id
            .ok_or_else(|| OrmError::illegal_state("inserted instance without id"))?;
        let value = self.foreign_key_value(slot, association);
        let mut values = Row::new();
        values.insert(column.to_string(), value.clone());

        let outcome = self.execute(&Statement::Update {
            table: mapping.table.clone(),
            id_column: mapping.id_column.clone(),
            id,
            version: None,
            values,
        })?;
        if outcome != Outcome::Affected(1) {
            return Err(OrmError::illegal_state("foreign key fixup did not find the inserted row"));
        }
        if let Some(loaded) = self.entries[slot].loaded.as_mut() {
            loaded.insert(column.to_string(), value);
        }
        self.stats.updates += 1;
        Ok(())
    }

    /// Columns whose current value differs from what storage holds.
    fn dirty_columns(&self, mapping: &EntityMapping, slot: usize) -> Row {
        let Some(loaded) = &self.entries[slot].loaded else {
            return Row::new();
        };
        self.column_values(mapping, slot, &[])
            .into_iter()
            .filter(|(column, value)| loaded.get(column).unwrap_or(&Value::Null) != value)
            .collect()
    }

    /// Updates every dirty managed instance, returning how many were written.
    fn flush_updates(&mut self) -> Result<usize> {
        let registry = self.registry();
        let mut updated = 0;
        for slot in 0..self.entries.len() {
            if self.entries[slot].state != EntityState::Managed {
                continue;
            }
            let mapping = self.mapping_for(&registry, slot)?;
            if self.dirty_columns(mapping, slot).is_empty() {
                continue;
            }
            self.fire(slot, LifecycleEvent::PreUpdate)?;
            let mut values = self.dirty_columns(mapping, slot);
            if values.is_empty() {
                continue;
            }
            let mut full = self.entries[slot].loaded.clone().unwrap_or_default();
            full.extend(values.clone());
            Self::check_not_null(mapping, &full)?;

            let data = &self.entries[slot].data;
            let id = data
                .id
                .ok_or_else(|| OrmError::illegal_state("managed instance without id"))?;
            let version = match (&mapping.version_column, data.version) {
                (Some(column), Some(current)) => {
                    values.insert(column.clone(), Value::Int(current + 1));
                    Some(VersionCheck {
                        column: column.clone(),
                        expected: current,
                    })
                }
                _ => None,
            };

            let outcome = self.execute(&Statement::Update {
                table: mapping.table.clone(),
                id_column: mapping.id_column.clone(),
                id,
                version: version.clone(),
                values: values.clone(),
            })?;
            if outcome == Outcome::Affected(0) {
                return Err(OrmError::OptimisticLock {
                    entity: mapping.name.clone(),
                    id,
                });
            }

            let entry = &mut self.entries[slot];
            if let Some(check) = version {
                entry.data.version = Some(check.expected + 1);
            }
            if let Some(loaded) = entry.loaded.as_mut() {
                loaded.extend(values);
            }
            self.stats.updates += 1;
            updated += 1;
            self.fire(slot, LifecycleEvent::PostUpdate)?;
        }
        Ok(updated)
    }

    /// Whether `other` holds a to-one reference to `target`.
    fn references(&self, other: usize, target: usize) -> bool {
        let target_key = self.key_of(target);
        self.entries[other].associations.values().any(|value| match value {
            AssociationValue::ToOne(Lazy::Resolved(Some(handle))) => handle.slot == target,
            AssociationValue::ToOne(Lazy::Unresolved(key)) => Some(key) == target_key.as_ref(),
            _ => false,
        })
    }

    /// Deletes every removed instance, returning how many were deleted.
    ///
    /// An instance waits while another pending removal still references it.
    /// When only cycles remain, the first instance referencing another
    /// pending removal has those foreign keys cleared first.
    fn flush_deletes(&mut self) -> Result<usize> {
        let mut pending: Vec<usize> = self
            .remove_queue
            .drain(..)
            .filter(|s| self.entries[*s].state == EntityState::Removed)
            .collect();
        let mut deleted = 0;

        while !pending.is_empty() {
            let ready = pending.iter().position(|&s| {
                !pending
                    .iter()
                    .any(|&other| other != s && self.references(other, s))
            });
            match ready {
                Some(position) => {
                    let slot = pending.remove(position);
                    self.delete_entity(slot)?;
                    deleted += 1;
                }
                None => {
                    let Some(slot) = pending.iter().copied().find(|&s| {
                        pending
                            .iter()
                            .any(|&target| target != s && self.references(s, target))
                    }) else {
                        return Err(OrmError::illegal_state("delete order could not be resolved"));
                    };
                    let targets: Vec<usize> = pending.iter().copied().filter(|t| *t != slot).collect();
                    self.clear_references(slot, &targets)?;
                }
            }
        }
        Ok(deleted)
    }

    /// Sets to NULL the foreign keys of `slot` that point at `targets`.
    fn clear_references(&mut self, slot: usize, targets: &[usize]) -> Result<()> {
        let registry = self.registry();
        let mapping = self.mapping_for(&registry, slot)?;
        let mut values = Row::new();
        for association in mapping.to_one_associations() {
            let points_at_target = targets.iter().any(|t| {
                let target_key = self.key_of(*t);
                match self.entries[slot].associations.get(&association.name) {
                    Some(AssociationValue::ToOne(Lazy::Resolved(Some(handle)))) => handle.slot == *t,
                    Some(AssociationValue::ToOne(Lazy::Unresolved(key))) => Some(key) == target_key.as_ref(),
                    _ => false,
                }
            });
            if points_at_target {
                if let Some(column) = association.fk_column() {
                    values.insert(column.to_string(), Value::Null);
                }
                self.entries[slot]
                    .associations
                    .insert(association.name.clone(), AssociationValue::ToOne(Lazy::Resolved(None)));
            }
        }
        let id = self.entries[slot]
            .data
            .id
            .ok_or_else(|| OrmError::illegal_state("removed instance without id"))?;
        tracing::debug!("Breaking delete cycle at {}#{}", mapping.name, id);
        self.execute(&Statement::Update {
            table: mapping.table.clone(),
            id_column: mapping.id_column.clone(),
            id,
            version: None,
            values: values.clone(),
        })?;
        if let Some(loaded) = self.entries[slot].loaded.as_mut() {
            loaded.extend(values);
        }
        self.stats.updates += 1;
        Ok(())
    }

    fn delete_entity(&mut self, slot: usize) -> Result<()> {
        let registry = self.registry();
        let mapping = self.mapping_for(&registry, slot)?;
        let data = &self.entries[slot].data;
        let id = data
            .id
            .ok_or_else(|| OrmError::illegal_state("removed instance without id"))?;
        let version = match (&mapping.version_column, data.version) {
            (Some(column), Some(expected)) => Some(VersionCheck {
                column: column.clone(),
                expected,
            }),
            _ => None,
        };

        let outcome = self.execute(&Statement::Delete {
            table: mapping.table.clone(),
            id_column: mapping.id_column.clone(),
            id,
            version,
        })?;
        if outcome == Outcome::Affected(0) {
            return Err(OrmError::OptimisticLock {
                entity: mapping.name.clone(),
                id,
            });
        }

        self.identity_map.remove(&EntityKey::new(mapping.name.clone(), id));
        let entry = &mut self.entries[slot];
        entry.state = EntityState::Deleted;
        entry.loaded = None;
        self.stats.deletes += 1;
        self.fire(slot, LifecycleEvent::PostRemove)
    }
}
