//! Persist, remove and refresh with cascading along association edges.
//!
//! Cascades walk only values already resolved in memory, except remove,
//! which loads lazy associations carrying `REMOVE` so that every affected
//! instance is found. A visited set keyed by slot stops cycles.

use std::collections::HashSet;

use crate::error::{OrmError, Result};
use crate::mapping::{CascadeOp, IdStrategy, LifecycleEvent};
use crate::types::Value;

use super::entity::{EntityHandle, EntityState};
use super::Session;

impl Session {
    /// Schedules a transient instance for insertion and cascades along
    /// `PERSIST` edges.
    ///
    /// Pre-persist hooks fire top-down: an instance before the instances it
    /// cascades to. Generated ids are assigned when the insert is flushed.
    ///
    /// # Errors
    /// `IllegalState` for handles of another session, detached or deleted
    /// instances, and assigned-id entities without an id.
    pub fn persist(&mut self, handle: EntityHandle) -> Result<()> {
        self.ensure_open()?;
        let slot = self.slot(handle)?;
        let mut visited = HashSet::new();
        self.cascade_persist(slot, &mut visited)
    }

    pub(crate) fn cascade_persist(&mut self, slot: usize, visited: &mut HashSet<usize>) -> Result<()> {
        if !visited.insert(slot) {
            return Ok(());
        }
        match self.entries[slot].state {
            EntityState::Transient => self.schedule_insert(slot)?,
            EntityState::PersistPending | EntityState::Managed => {}
            EntityState::Removed => {
                self.entries[slot].state = EntityState::Managed;
                self.remove_queue.retain(|s| *s != slot);
            }
            EntityState::Deleted => {
                return Err(OrmError::illegal_state("deleted instance passed to persist"));
            }
            EntityState::Detached => {
                return Err(OrmError::IllegalState(format!(
                    "detached instance of '{}' passed to persist",
                    self.entries[slot].data.entity
                )));
            }
        }
        for target in self.cascade_targets(slot, CascadeOp::Persist)? {
            self.cascade_persist(target, visited)?;
        }
        Ok(())
    }

    fn schedule_insert(&mut self, slot: usize) -> Result<()> {
        let registry = self.registry();
        let mapping = self.mapping_for(&registry, slot)?;
        let assigned_key = match mapping.id_strategy {
            IdStrategy::Generated => None,
            IdStrategy::Assigned => {
                let key = self.key_of(slot).ok_or_else(|| {
                    OrmError::IllegalState(format!(
                        "id of '{}' must be assigned before persist",
                        mapping.name
                    ))
                })?;
                if self.identity_map.contains(&key) {
                    return Err(OrmError::IllegalState(format!(
                        "a different instance with identity {} is already associated with the session",
                        key
                    )));
                }
                Some(key)
            }
        };
        self.fire(slot, LifecycleEvent::PrePersist)?;
        if let Some(key) = assigned_key {
            self.identity_map.insert(key, slot)?;
        }
        self.entries[slot].state = EntityState::PersistPending;
        self.insert_queue.push(slot);
        Ok(())
    }

    /// Slots held by resolved associations of `slot` that carry `op`.
    pub(crate) fn cascade_targets(&self, slot: usize, op: CascadeOp) -> Result<Vec<usize>> {
        let registry = self.registry();
        let mapping = self.mapping_for(&registry, slot)?;
        let mut targets = Vec::new();
        for association in mapping.associations.iter().filter(|a| a.cascade.contains(op)) {
            if let Some(value) = self.entries[slot].associations.get(&association.name) {
                for handle in value.resolved_handles() {
                    targets.push(self.slot(handle)?);
                }
            }
        }
        Ok(targets)
    }

    /// Schedules a managed instance for deletion and cascades along
    /// `REMOVE` edges, loading lazy ones.
    ///
    /// Pre-remove hooks fire now; the delete and post-remove run on flush.
    /// Removing an instance whose insert is still pending cancels the insert.
    pub fn remove(&mut self, handle: EntityHandle) -> Result<()> {
        self.ensure_open()?;
        let slot = self.slot(handle)?;
        let mut visited = HashSet::new();
        self.cascade_remove(slot, &mut visited)
    }

    fn cascade_remove(&mut self, slot: usize, visited: &mut HashSet<usize>) -> Result<()> {
        if !visited.insert(slot) {
            return Ok(());
        }
        match self.entries[slot].state {
            EntityState::Managed => {
                self.fire(slot, LifecycleEvent::PreRemove)?;
                self.entries[slot].state = EntityState::Removed;
                self.remove_queue.push(slot);
            }
            EntityState::PersistPending => {
                self.entries[slot].state = EntityState::Transient;
                self.insert_queue.retain(|s| *s != slot);
                if let Some(key) = self.key_of(slot) {
                    if self.identity_map.get(&key) == Some(slot) {
                        self.identity_map.remove(&key);
                    }
                }
            }
            EntityState::Transient | EntityState::Removed | EntityState::Deleted => return Ok(()),
            EntityState::Detached => {
                return Err(OrmError::IllegalState(format!(
                    "detached instance of '{}' passed to remove",
                    self.entries[slot].data.entity
                )));
            }
        }

        if self.entries[slot].state == EntityState::Removed {
            let registry = self.registry();
            let mapping = self.mapping_for(&registry, slot)?;
            for association in mapping
                .associations
                .iter()
                .filter(|a| a.cascade.contains(CascadeOp::Remove))
            {
                self.resolve_association(slot, &association.name)?;
            }
        }
        for target in self.cascade_targets(slot, CascadeOp::Remove)? {
            self.cascade_remove(target, visited)?;
        }
        Ok(())
    }

    /// Re-reads an instance and everything reachable along `REFRESH` edges.
    ///
    /// Field values and versions are overwritten, collections reset to
    /// unresolved and post-load hooks fired. Unflushed changes are lost.
    ///
    /// # Errors
    /// `EntityNotFound` if a row vanished; `IllegalState` if the instance
    /// is not managed.
    pub fn refresh(&mut self, handle: EntityHandle) -> Result<()> {
        self.ensure_open()?;
        let slot = self.slot(handle)?;
        if self.entries[slot].state != EntityState::Managed {
            return Err(OrmError::IllegalState(format!(
                "cannot refresh a {:?} instance of '{}'",
                self.entries[slot].state, self.entries[slot].data.entity
            )));
        }
        let mut visited = HashSet::new();
        let mut order = Vec::new();
        self.collect_refresh(slot, &mut visited, &mut order)?;
        for slot in order {
            self.refresh_one(slot)?;
        }
        Ok(())
    }

    fn collect_refresh(&self, slot: usize, visited: &mut HashSet<usize>, order: &mut Vec<usize>) -> Result<()> {
        if !visited.insert(slot) || self.entries[slot].state != EntityState::Managed {
            return Ok(());
        }
        order.push(slot);
        for target in self.cascade_targets(slot, CascadeOp::Refresh)? {
            self.collect_refresh(target, visited, order)?;
        }
        Ok(())
    }

    fn refresh_one(&mut self, slot: usize) -> Result<()> {
        let registry = self.registry();
        let mapping = self.mapping_for(&registry, slot)?;
        let id = self.entries[slot]
            .data
            .id
            .ok_or_else(|| OrmError::illegal_state("managed instance without id"))?;
        let rows = self.select_by_ids(mapping, &[id])?;
        self.stats.entity_fetches += 1;
        let row = rows.into_iter().next().ok_or_else(|| OrmError::EntityNotFound {
            entity: mapping.name.clone(),
            id,
        })?;

        let associations = self.fresh_associations(mapping, id, &row);
        let entry = &mut self.entries[slot];
        for field in &mapping.fields {
            entry
                .data
                .fields
                .insert(field.name.clone(), row.get(&field.column).cloned().unwrap_or(Value::Null));
        }
        entry.data.version = mapping
            .version_column
            .as_ref()
            .and_then(|column| row.get(column))
            .and_then(Value::as_i64);
        entry.associations = associations;
        entry.loaded = Some(row);
        tracing::debug!("Refreshed {}#{}", mapping.name, id);

        self.resolve_eager(mapping, slot)?;
        self.fire(slot, LifecycleEvent::PostLoad)
    }
}
