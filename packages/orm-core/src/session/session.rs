//! Unit of work: entity arena, identity map and transaction control.

use std::fmt;
use std::sync::Arc;

use crate::config::FlushMode;
use crate::error::{OrmError, Result};
use crate::mapping::{AssociationKind, EntityMapping, IdStrategy, MappingRegistry};
use crate::storage::{Connection, Outcome, Statement};
use crate::types::{EntityKey, Value};

use super::entity::{EntityData, EntityEntry, EntityHandle, EntityState, SessionId};
use super::factory::FactoryShared;
use super::identity_map::IdentityMap;
use super::lazy::{AssociationValue, Lazy};
use super::stats::SessionStatistics;

/// One unit of work.
///
/// A session is owned by one caller at a time; every operation takes
/// `&mut self` and no internal locking is done. Entities are addressed
/// through [`EntityHandle`]s issued by this session.
pub struct Session {
    pub(crate) id: SessionId,
    pub(crate) factory: Arc<FactoryShared>,
    /// `None` once closed
    pub(crate) connection: Option<Box<dyn Connection>>,
    pub(crate) entries: Vec<EntityEntry>,
    pub(crate) identity_map: IdentityMap,
    /// Slots awaiting insert, in persist order
    pub(crate) insert_queue: Vec<usize>,
    /// Slots awaiting delete, in remove order
    pub(crate) remove_queue: Vec<usize>,
    /// Slots inserted by flushes of the active transaction
    pub(crate) inserted_in_tx: Vec<usize>,
    pub(crate) flush_mode: FlushMode,
    pub(crate) stats: SessionStatistics,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .field("entities", &self.entries.len())
            .field("managed", &self.identity_map.len())
            .field("flush_mode", &self.flush_mode)
            .finish()
    }
}

impl Session {
    pub(crate) fn new(factory: Arc<FactoryShared>, connection: Box<dyn Connection>) -> Self {
        let id = SessionId::next();
        let flush_mode = factory.config.flush_mode;
        tracing::debug!("Opened session {:?}", id);
        Self {
            id,
            factory,
            connection: Some(connection),
            entries: Vec::new(),
            identity_map: IdentityMap::default(),
            insert_queue: Vec::new(),
            remove_queue: Vec::new(),
            inserted_in_tx: Vec::new(),
            flush_mode,
            stats: SessionStatistics::default(),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn is_closed(&self) -> bool {
        self.connection.is_none()
    }

    pub fn flush_mode(&self) -> FlushMode {
        self.flush_mode
    }

    pub fn set_flush_mode(&mut self, mode: FlushMode) {
        self.flush_mode = mode;
    }

    pub fn statistics(&self) -> SessionStatistics {
        self.stats
    }

    /// Number of entities tracked by the identity map.
    pub fn managed_count(&self) -> usize {
        self.identity_map.len()
    }

    pub(crate) fn registry(&self) -> Arc<MappingRegistry> {
        Arc::clone(&self.factory.registry)
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(OrmError::illegal_state("session is closed"));
        }
        Ok(())
    }

    pub(crate) fn handle(&self, slot: usize) -> EntityHandle {
        EntityHandle { session: self.id, slot }
    }

    /// Arena slot of a handle issued by this session.
    pub(crate) fn slot(&self, handle: EntityHandle) -> Result<usize> {
        if handle.session != self.id {
            return Err(OrmError::IllegalState(format!(
                "entity handle belongs to session {:?}, not {:?}",
                handle.session, self.id
            )));
        }
        if handle.slot >= self.entries.len() {
            return Err(OrmError::illegal_state("entity handle out of range"));
        }
        Ok(handle.slot)
    }

    pub(crate) fn connection(&mut self) -> Result<&mut Box<dyn Connection>> {
        self.connection
            .as_mut()
            .ok_or_else(|| OrmError::illegal_state("session is closed"))
    }

    pub fn in_transaction(&self) -> bool {
        self.connection.as_ref().map_or(false, |c| c.in_transaction())
    }

    pub(crate) fn require_transaction(&self) -> Result<()> {
        self.ensure_open()?;
        if !self.in_transaction() {
            return Err(OrmError::illegal_state(
                "writing to storage requires an active transaction",
            ));
        }
        Ok(())
    }

    /// Sends one statement to the driver.
    pub(crate) fn execute(&mut self, statement: &Statement) -> Result<Outcome> {
        if self.factory.config.log_statements {
            tracing::debug!("Session {:?}: {}", self.id, statement);
        }
        self.connection()?.execute(statement)
    }

    /// Starts an empty in-memory instance of an entity.
    ///
    /// Fields start as `Null`, to-one associations as empty, collections as
    /// initialized and empty.
    pub fn create(&mut self, entity: &str) -> Result<EntityHandle> {
        self.ensure_open()?;
        let registry = self.registry();
        let mapping = registry.get(entity)?;
        let mut entry = EntityEntry::new(EntityData::new(entity), EntityState::Transient);
        for field in &mapping.fields {
            entry.data.fields.insert(field.name.clone(), Value::Null);
        }
        for association in &mapping.associations {
            let value = match association.kind {
                AssociationKind::ManyToOne { .. } => AssociationValue::ToOne(Lazy::Resolved(None)),
                AssociationKind::OneToMany { .. } => AssociationValue::ToMany(Lazy::Resolved(Vec::new())),
            };
            entry.associations.insert(association.name.clone(), value);
        }
        self.entries.push(entry);
        Ok(self.handle(self.entries.len() - 1))
    }

    pub fn data(&self, handle: EntityHandle) -> Result<&EntityData> {
        let slot = self.slot(handle)?;
        Ok(&self.entries[slot].data)
    }

    pub fn state(&self, handle: EntityHandle) -> Result<EntityState> {
        let slot = self.slot(handle)?;
        Ok(self.entries[slot].state)
    }

    pub fn entity_id(&self, handle: EntityHandle) -> Result<Option<i64>> {
        Ok(self.data(handle)?.id)
    }

    pub fn version(&self, handle: EntityHandle) -> Result<Option<i64>> {
        Ok(self.data(handle)?.version)
    }

    /// Reads a mapped field. Works on detached instances too.
    pub fn get(&self, handle: EntityHandle, field: &str) -> Result<&Value> {
        let slot = self.slot(handle)?;
        let registry = self.registry();
        registry.get(&self.entries[slot].data.entity)?.field(field)?;
        Ok(self.entries[slot].data.get(field))
    }

    /// Writes a mapped field. Kinds are checked here, nullability on flush.
    pub fn set(&mut self, handle: EntityHandle, field: &str, value: impl Into<Value>) -> Result<()> {
        let slot = self.slot(handle)?;
        let value = value.into();
        let registry = self.registry();
        let mapping = registry.get(&self.entries[slot].data.entity)?;
        let declared = mapping.field(field)?;
        if !value.conforms_to(declared.kind) {
            return Err(OrmError::TypeMismatch {
                expected: declared.kind.to_string(),
                got: value.kind().map_or_else(|| "null".to_string(), |k| k.to_string()),
            });
        }
        let entry = &mut self.entries[slot];
        if entry.state == EntityState::Deleted {
            return Err(OrmError::illegal_state("cannot modify a deleted instance"));
        }
        entry.data.set(field, value);
        Ok(())
    }

    /// Sets the id of a transient instance with an assigned id strategy.
    pub fn set_id(&mut self, handle: EntityHandle, id: i64) -> Result<()> {
        let slot = self.slot(handle)?;
        let registry = self.registry();
        let mapping = registry.get(&self.entries[slot].data.entity)?;
        if mapping.id_strategy != IdStrategy::Assigned {
            return Err(OrmError::IllegalState(format!(
                "entity '{}' uses generated ids",
                mapping.name
            )));
        }
        let entry = &mut self.entries[slot];
        if entry.state != EntityState::Transient {
            return Err(OrmError::illegal_state("id can only be assigned to a transient instance"));
        }
        entry.data.id = Some(id);
        Ok(())
    }

    /// Business key values in declaration order.
    ///
    /// Falls back to the id for entities without a business key.
    pub fn business_key(&self, handle: EntityHandle) -> Result<Vec<Value>> {
        let slot = self.slot(handle)?;
        let data = &self.entries[slot].data;
        let registry = self.registry();
        let mapping = registry.get(&data.entity)?;
        if mapping.business_key.is_empty() {
            return Ok(vec![Value::from(data.id)]);
        }
        Ok(mapping
            .business_key
            .iter()
            .map(|field| data.get(field).clone())
            .collect())
    }

    /// Starts a storage transaction.
    pub fn begin(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.connection()?.begin()?;
        self.inserted_in_tx.clear();
        Ok(())
    }

    /// Flushes pending changes and commits the transaction.
    ///
    /// On any error the transaction is rolled back, the persistence context
    /// is detached and the error is returned.
    pub fn commit(&mut self) -> Result<()> {
        self.require_transaction()?;
        let result = self.flush().and_then(|_| self.connection()?.commit());
        match result {
            Ok(()) => {
                self.inserted_in_tx.clear();
                tracing::debug!("Session {:?} committed", self.id);
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Session {:?} commit failed, rolling back: {}", self.id, e);
                if let Err(rollback_error) = self.rollback() {
                    tracing::warn!("Rollback after failed commit failed: {}", rollback_error);
                }
                Err(e)
            }
        }
    }

    /// Discards the transaction and every pending operation.
    ///
    /// Managed instances become detached. Instances whose insert was never
    /// committed return to transient, losing generated ids.
    pub fn rollback(&mut self) -> Result<()> {
        if let Some(connection) = self.connection.as_mut() {
            connection.rollback()?;
        }
        let registry = self.registry();
        let uncommitted: Vec<usize> = self
            .insert_queue
            .drain(..)
            .chain(self.inserted_in_tx.drain(..))
            .collect();
        for slot in uncommitted {
            let entry = &mut self.entries[slot];
            if entry.state == EntityState::Transient {
                continue;
            }
            if registry
                .get(&entry.data.entity)
                .map_or(true, |m| m.id_strategy == IdStrategy::Generated)
            {
                entry.data.id = None;
            }
            entry.data.version = None;
            entry.loaded = None;
            entry.state = EntityState::Transient;
        }
        self.remove_queue.clear();
        self.detach_all();
        tracing::debug!("Session {:?} rolled back", self.id);
        Ok(())
    }

    /// Rolls back any open transaction and releases the connection.
    ///
    /// Instances stay readable; lazy associations that were never resolved
    /// fail with `DetachedEntity` from now on.
    pub fn close(&mut self) -> Result<()> {
        if self.is_closed() {
            return Ok(());
        }
        let result = if self.in_transaction() {
            self.rollback()
        } else {
            self.detach_all();
            Ok(())
        };
        self.connection = None;
        tracing::debug!("Closed session {:?}", self.id);
        result
    }

    /// Stops tracking one instance. Pending changes to it are dropped.
    pub fn evict(&mut self, handle: EntityHandle) -> Result<()> {
        let slot = self.slot(handle)?;
        self.detach(slot);
        Ok(())
    }

    /// Detaches every instance and drops pending changes.
    pub fn clear(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.insert_queue.clear();
        self.remove_queue.clear();
        self.detach_all();
        Ok(())
    }

    fn detach(&mut self, slot: usize) {
        let entry = &mut self.entries[slot];
        if let Some(key) = entry.data.key() {
            if self.identity_map.get(&key) == Some(slot) {
                self.identity_map.remove(&key);
            }
        }
        if entry.state != EntityState::Transient && entry.state != EntityState::Deleted {
            entry.state = EntityState::Detached;
        }
        self.insert_queue.retain(|s| *s != slot);
        self.remove_queue.retain(|s| *s != slot);
    }

    fn detach_all(&mut self) {
        for entry in &mut self.entries {
            if !matches!(entry.state, EntityState::Transient | EntityState::Deleted) {
                entry.state = EntityState::Detached;
            }
        }
        self.identity_map.clear();
    }

    /// Key an attached instance is tracked under, if any.
    pub(crate) fn key_of(&self, slot: usize) -> Option<EntityKey> {
        self.entries[slot].data.key()
    }

    pub(crate) fn mapping_for<'r>(&self, registry: &'r MappingRegistry, slot: usize) -> Result<&'r EntityMapping> {
        registry.get(&self.entries[slot].data.entity)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.in_transaction() {
            tracing::debug!("Session {:?} dropped with an active transaction", self.id);
        }
    }
}
