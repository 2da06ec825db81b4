//! Finds, criteria queries and row hydration.

use std::collections::BTreeMap;

use crate::config::FlushMode;
use crate::error::{OrmError, Result};
use crate::mapping::{AssociationKind, EntityMapping, FetchType, LifecycleEvent};
use crate::storage::{Direction, Filter, FilterOp, Row, Select, Statement};
use crate::types::{EntityKey, Value};

use super::entity::{EntityData, EntityEntry, EntityHandle, EntityState};
use super::lazy::{AssociationValue, Lazy};
use super::Session;

/// Criteria query over one entity.
///
/// Criteria names are `id`, mapped field names and many-to-one association
/// names; associations compare by foreign key.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    entity: String,
    filters: Vec<(String, FilterOp)>,
    order_by: Vec<(String, Direction)>,
    limit: Option<usize>,
    offset: Option<usize>,
}

impl Query {
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            filters: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn filter(mut self, name: impl Into<String>, op: FilterOp) -> Self {
        self.filters.push((name.into(), op));
        self
    }

    pub fn order_by(mut self, name: impl Into<String>, direction: Direction) -> Self {
        self.order_by.push((name.into(), direction));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    fn to_select(&self, mapping: &EntityMapping) -> Result<Select> {
        let mut select = Select::from(mapping.table.clone());
        for (name, op) in &self.filters {
            select = select.filter(Filter::new(mapping.column_for(name)?, op.clone()));
        }
        for (name, direction) in &self.order_by {
            select = select.order_by(mapping.column_for(name)?, *direction);
        }
        select.limit = self.limit;
        select.offset = self.offset;
        Ok(select)
    }
}

/// Filter matching one id or any of several.
pub(crate) fn id_filter(column: &str, ids: &[i64]) -> Filter {
    match ids {
        [id] => Filter::new(column, FilterOp::Eq(Value::Int(*id))),
        _ => Filter::new(column, FilterOp::In(ids.iter().map(|id| Value::Int(*id)).collect())),
    }
}

impl Session {
    /// Runs a criteria query.
    ///
    /// In `FlushMode::Auto` pending changes are flushed first when a
    /// transaction is active. Rows whose identity is already managed return
    /// the existing handle with its in-memory state untouched.
    pub fn query(&mut self, query: &Query) -> Result<Vec<EntityHandle>> {
        self.ensure_open()?;
        if self.flush_mode == FlushMode::Auto && self.in_transaction() {
            self.flush()?;
        }
        let registry = self.registry();
        let mapping = registry.get(&query.entity)?;
        let select = query.to_select(mapping)?;
        let rows = self.execute(&Statement::Select(select))?.into_rows();
        self.stats.queries += 1;
        let slots = self.load_rows(mapping, rows)?;
        Ok(slots.into_iter().map(|slot| self.handle(slot)).collect())
    }

    /// Looks up an instance by identity.
    ///
    /// Returns the managed instance when the identity map has it, otherwise
    /// loads it. Instances scheduled for removal are not returned.
    pub fn find(&mut self, entity: &str, id: i64) -> Result<Option<EntityHandle>> {
        self.ensure_open()?;
        let registry = self.registry();
        let mapping = registry.get(entity)?;
        if let Some(slot) = self.identity_map.get(&EntityKey::new(entity, id)) {
            return Ok(match self.entries[slot].state {
                EntityState::Removed | EntityState::Deleted => None,
                _ => Some(self.handle(slot)),
            });
        }
        let rows = self.select_by_ids(mapping, &[id])?;
        self.stats.entity_fetches += 1;
        let slots = self.load_rows(mapping, rows)?;
        Ok(slots.first().map(|slot| self.handle(*slot)))
    }

    pub(crate) fn select_by_ids(&mut self, mapping: &EntityMapping, ids: &[i64]) -> Result<Vec<Row>> {
        let select = Select::from(mapping.table.clone())
            .filter(id_filter(&mapping.id_column, ids))
            .order_by(mapping.id_column.clone(), Direction::Asc);
        Ok(self.execute(&Statement::Select(select))?.into_rows())
    }

    /// Turns rows into managed instances.
    ///
    /// New instances get their eager associations resolved, then their
    /// post-load hooks fired, in row order.
    pub(crate) fn load_rows(&mut self, mapping: &EntityMapping, rows: Vec<Row>) -> Result<Vec<usize>> {
        let mut slots = Vec::with_capacity(rows.len());
        let mut loaded = Vec::new();
        for row in rows {
            let (slot, created) = self.hydrate(mapping, row)?;
            if created {
                loaded.push(slot);
            }
            slots.push(slot);
        }
        for &slot in &loaded {
            self.resolve_eager(mapping, slot)?;
        }
        for &slot in &loaded {
            self.fire(slot, LifecycleEvent::PostLoad)?;
        }
        Ok(slots)
    }

    fn hydrate(&mut self, mapping: &EntityMapping, row: Row) -> Result<(usize, bool)> {
        let id = row
            .get(&mapping.id_column)
            .and_then(Value::as_i64)
            .ok_or_else(|| OrmError::TypeMismatch {
                expected: format!("integer id in {}.{}", mapping.table, mapping.id_column),
                got: format!("{:?}", row.get(&mapping.id_column)),
            })?;
        let key = EntityKey::new(mapping.name.clone(), id);
        if let Some(slot) = self.identity_map.get(&key) {
            return Ok((slot, false));
        }

        let mut data = EntityData::new(mapping.name.clone());
        data.id = Some(id);
        data.version = mapping
            .version_column
            .as_ref()
            .and_then(|column| row.get(column))
            .and_then(Value::as_i64);
        for field in &mapping.fields {
            data.fields
                .insert(field.name.clone(), row.get(&field.column).cloned().unwrap_or(Value::Null));
        }
        let mut entry = EntityEntry::new(data, EntityState::Managed);
        entry.associations = self.fresh_associations(mapping, id, &row);
        entry.loaded = Some(row);

        self.entries.push(entry);
        let slot = self.entries.len() - 1;
        self.identity_map.insert(key, slot)?;
        self.stats.entity_loads += 1;
        Ok((slot, true))
    }

    /// Association values for an instance just read from `row`.
    ///
    /// To-one targets already managed are linked directly; everything else
    /// starts unresolved.
    pub(crate) fn fresh_associations(
        &self,
        mapping: &EntityMapping,
        id: i64,
        row: &Row,
    ) -> BTreeMap<String, AssociationValue> {
        let mut associations = BTreeMap::new();
        for association in &mapping.associations {
            let value = match &association.kind {
                AssociationKind::ManyToOne { column, .. } => match row.get(column).and_then(Value::as_i64) {
                    None => AssociationValue::ToOne(Lazy::Resolved(None)),
                    Some(target_id) => {
                        let key = EntityKey::new(association.target.clone(), target_id);
                        match self.identity_map.get(&key) {
                            Some(target) => AssociationValue::ToOne(Lazy::Resolved(Some(self.handle(target)))),
                            None => AssociationValue::ToOne(Lazy::Unresolved(key)),
                        }
                    }
                },
                AssociationKind::OneToMany { .. } => {
                    AssociationValue::ToMany(Lazy::Unresolved(EntityKey::new(mapping.name.clone(), id)))
                }
            };
            associations.insert(association.name.clone(), value);
        }
        associations
    }

    pub(crate) fn resolve_eager(&mut self, mapping: &EntityMapping, slot: usize) -> Result<()> {
        for association in &mapping.associations {
            if association.fetch == FetchType::Eager {
                self.resolve_association(slot, &association.name)?;
            }
        }
        Ok(())
    }
}
