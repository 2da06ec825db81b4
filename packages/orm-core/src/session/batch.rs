//! Batch loader for lazy associations.
//!
//! Resolving one lazy value also resolves up to `batch_size - 1` sibling
//! values of the same kind with the same fetch. The triggering owner always
//! comes first, followed by other pending siblings in arena order. With
//! `BatchFetchStyle::Padded` the key list is padded with its last key up to
//! the batch size.

use crate::config::BatchFetchStyle;
use crate::error::{OrmError, Result};
use crate::mapping::AssociationKind;
use crate::storage::{Direction, Select, Statement};
use crate::types::{EntityKey, Value};

use super::entity::EntityHandle;
use super::lazy::{AssociationValue, Lazy};
use super::query::id_filter;
use super::Session;

impl Session {
    fn effective_batch_size(&self, configured: Option<usize>) -> usize {
        configured
            .unwrap_or(self.factory.config.default_batch_size)
            .max(1)
    }

    /// Key list sent to storage for `ids`.
    pub(crate) fn batch_keys(&self, ids: &[i64], batch_size: usize) -> Vec<i64> {
        let mut keys = ids.to_vec();
        if self.factory.config.batch_fetch_style == BatchFetchStyle::Padded {
            if let Some(&last) = ids.last() {
                keys.resize(batch_size.max(ids.len()), last);
            }
        }
        keys
    }

    /// Owners whose `association` collection is initialized by the next fetch.
    fn collection_batch(&self, slot: usize, association: &str, batch_size: usize) -> Vec<usize> {
        let entity = &self.entries[slot].data.entity;
        let mut owners = vec![slot];
        for (other, entry) in self.entries.iter().enumerate() {
            if owners.len() >= batch_size {
                break;
            }
            if other == slot || &entry.data.entity != entity || !entry.is_attached() || entry.data.id.is_none() {
                continue;
            }
            if matches!(
                entry.associations.get(association),
                Some(AssociationValue::ToMany(Lazy::Unresolved(_)))
            ) {
                owners.push(other);
            }
        }
        owners
    }

    /// Initializes a lazy one-to-many, batching pending sibling collections.
    pub(crate) fn load_collection(&mut self, slot: usize, association: &str) -> Result<()> {
        let registry = self.registry();
        let owner_mapping = self.mapping_for(&registry, slot)?;
        let declared = owner_mapping.association(association)?;
        let AssociationKind::OneToMany { mapped_by } = &declared.kind else {
            return Err(OrmError::illegal_state("not a collection association"));
        };
        let target_mapping = registry.get(&declared.target)?;
        let fk_column = target_mapping
            .association(mapped_by)?
            .fk_column()
            .ok_or_else(|| OrmError::InvalidMapping(format!("'{}' owns no foreign key", mapped_by)))?;

        let batch_size = self.effective_batch_size(declared.batch_size);
        let owners = self.collection_batch(slot, association, batch_size);
        let owner_ids: Vec<i64> = owners.iter().filter_map(|s| self.entries[*s].data.id).collect();
        if owner_ids.is_empty() {
            return Err(OrmError::illegal_state("cannot initialize a collection of an instance without id"));
        }
        let keys = self.batch_keys(&owner_ids, batch_size);
        let select = Select::from(target_mapping.table.clone())
            .filter(id_filter(fk_column, &keys))
            .order_by(target_mapping.id_column.clone(), Direction::Asc);
        let rows = self.execute(&Statement::Select(select))?.into_rows();
        self.stats.collection_fetches += 1;
        if owners.len() > 1 {
            self.stats.batch_fetches += 1;
        }
        tracing::debug!(
            "Initializing {}.{} for {} owner(s) with one fetch ({} keys, {} rows)",
            owner_mapping.name,
            association,
            owners.len(),
            keys.len(),
            rows.len()
        );

        let owner_of: Vec<Option<i64>> = rows
            .iter()
            .map(|row| row.get(fk_column).and_then(Value::as_i64))
            .collect();
        let members = self.load_rows(target_mapping, rows)?;

        for owner in owners {
            let owner_id = self.entries[owner].data.id;
            let handles: Vec<EntityHandle> = members
                .iter()
                .zip(&owner_of)
                .filter(|(_, fk)| owner_id.is_some() && **fk == owner_id)
                .map(|(member, _)| self.handle(*member))
                .collect();
            if let Some(value) = self.entries[owner].associations.get_mut(association) {
                if !value.is_resolved() {
                    *value = AssociationValue::ToMany(Lazy::Resolved(handles));
                    self.stats.collections_initialized += 1;
                }
            }
        }
        Ok(())
    }

    /// Target ids fetched together with `key`: pending proxies to the same
    /// entity that are not managed yet, distinct, in arena order.
    fn proxy_batch(&self, key: &EntityKey, batch_size: usize) -> Vec<i64> {
        let mut ids = vec![key.id];
        for entry in self.entries.iter().filter(|e| e.is_attached()) {
            for value in entry.associations.values() {
                if ids.len() >= batch_size {
                    return ids;
                }
                if let AssociationValue::ToOne(Lazy::Unresolved(other)) = value {
                    if other.entity == key.entity && !ids.contains(&other.id) && !self.identity_map.contains(other) {
                        ids.push(other.id);
                    }
                }
            }
        }
        ids
    }

    /// Resolves a lazy many-to-one, batching pending proxies to the same entity.
    pub(crate) fn load_to_one(&mut self, slot: usize, association: &str) -> Result<()> {
        let key = match self.entries[slot].association(association)? {
            AssociationValue::ToOne(Lazy::Unresolved(key)) => key.clone(),
            _ => return Ok(()),
        };

        if !self.identity_map.contains(&key) {
            let registry = self.registry();
            let target_mapping = registry.get(&key.entity)?;
            let batch_size = self.effective_batch_size(target_mapping.batch_size);
            let ids = self.proxy_batch(&key, batch_size);
            let keys = self.batch_keys(&ids, batch_size);
            let rows = self.select_by_ids(target_mapping, &keys)?;
            self.stats.entity_fetches += 1;
            if ids.len() > 1 {
                self.stats.batch_fetches += 1;
            }
            tracing::debug!(
                "Loading {} {} proxies with one fetch ({} keys)",
                ids.len(),
                key.entity,
                keys.len()
            );
            self.load_rows(target_mapping, rows)?;
        }

        let target = self.identity_map.get(&key).ok_or_else(|| OrmError::EntityNotFound {
            entity: key.entity.clone(),
            id: key.id,
        })?;
        let target = self.handle(target);
        self.link_loaded_proxies(&key.entity);
        if let Some(value) = self.entries[slot].associations.get_mut(association) {
            *value = AssociationValue::ToOne(Lazy::Resolved(Some(target)));
        }
        Ok(())
    }

    /// Resolves every attached proxy to `entity` whose target is now managed.
    fn link_loaded_proxies(&mut self, entity: &str) {
        let session = self.id;
        for entry in self.entries.iter_mut().filter(|e| e.is_attached()) {
            for value in entry.associations.values_mut() {
                let AssociationValue::ToOne(Lazy::Unresolved(key)) = value else {
                    continue;
                };
                if key.entity != entity {
                    continue;
                }
                if let Some(target) = self.identity_map.get(key) {
                    *value = AssociationValue::ToOne(Lazy::Resolved(Some(EntityHandle { session, slot: target })));
                }
            }
        }
    }
}
