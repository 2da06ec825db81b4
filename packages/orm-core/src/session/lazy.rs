//! Lazy association values and their accessors.
//!
//! An association value is either still unresolved, holding the key needed
//! to load it, or resolved to real handles. Every access that needs the data
//! resolves it in place, exactly once; `is_initialized` only looks.

use crate::error::{OrmError, Result};
use crate::mapping::AssociationKind;
use crate::types::EntityKey;

use super::entity::{EntityEntry, EntityHandle};
use super::Session;

/// Deferred association value.
#[derive(Debug, Clone, PartialEq)]
pub enum Lazy<T> {
    /// Not loaded yet. Holds the target key for to-one values and the
    /// owner key for collections.
    Unresolved(EntityKey),
    Resolved(T),
}

impl<T> Lazy<T> {
    pub fn is_resolved(&self) -> bool {
        matches!(self, Lazy::Resolved(_))
    }

    pub fn resolved(&self) -> Option<&T> {
        match self {
            Lazy::Resolved(value) => Some(value),
            Lazy::Unresolved(_) => None,
        }
    }

    pub fn unresolved_key(&self) -> Option<&EntityKey> {
        match self {
            Lazy::Unresolved(key) => Some(key),
            Lazy::Resolved(_) => None,
        }
    }
}

/// Runtime value of one association of one entity.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum AssociationValue {
    ToOne(Lazy<Option<EntityHandle>>),
    ToMany(Lazy<Vec<EntityHandle>>),
}

impl AssociationValue {
    pub(crate) fn is_resolved(&self) -> bool {
        match self {
            AssociationValue::ToOne(lazy) => lazy.is_resolved(),
            AssociationValue::ToMany(lazy) => lazy.is_resolved(),
        }
    }

    /// Handles currently held, without resolving anything.
    pub(crate) fn resolved_handles(&self) -> Vec<EntityHandle> {
        match self {
            AssociationValue::ToOne(Lazy::Resolved(Some(handle))) => vec![*handle],
            AssociationValue::ToMany(Lazy::Resolved(handles)) => handles.clone(),
            _ => Vec::new(),
        }
    }
}

impl EntityEntry {
    pub(crate) fn association(&self, name: &str) -> Result<&AssociationValue> {
        self.associations
            .get(name)
            .ok_or_else(|| OrmError::UnknownAssociation {
                entity: self.data.entity.clone(),
                association: name.to_string(),
            })
    }
}

impl Session {
    fn detached_error(&self, slot: usize, association: &str) -> OrmError {
        let entry = &self.entries[slot];
        OrmError::DetachedEntity {
            entity: entry.data.entity.clone(),
            id: entry.data.id,
            association: association.to_string(),
        }
    }

    /// Resolves an association in place if it is not resolved yet.
    pub(crate) fn resolve_association(&mut self, slot: usize, association: &str) -> Result<()> {
        if self.entries[slot].association(association)?.is_resolved() {
            return Ok(());
        }
        if self.is_closed() || !self.entries[slot].is_attached() {
            return Err(self.detached_error(slot, association));
        }
        match self.entries[slot].association(association)? {
            AssociationValue::ToOne(_) => self.load_to_one(slot, association),
            AssociationValue::ToMany(_) => self.load_collection(slot, association),
        }
    }

    fn expect_kind(&self, slot: usize, association: &str, to_one: bool) -> Result<()> {
        let registry = self.registry();
        let mapping = registry.get(&self.entries[slot].data.entity)?;
        let declared = mapping.association(association)?;
        if declared.is_to_one() != to_one {
            let (expected, got) = match declared.kind {
                AssociationKind::ManyToOne { .. } => ("to-many association", "many-to-one"),
                AssociationKind::OneToMany { .. } => ("to-one association", "one-to-many"),
            };
            return Err(OrmError::TypeMismatch {
                expected: expected.to_string(),
                got: format!("{} '{}'", got, association),
            });
        }
        Ok(())
    }

    /// Target of a many-to-one, loading it on first access.
    ///
    /// # Arguments
    /// * `handle` - Owning entity
    /// * `association` - Many-to-one association name
    ///
    /// # Returns
    /// `Result<Option<EntityHandle>>`; `DetachedEntity` if the value is
    /// unresolved and the entity's session is gone.
    pub fn to_one(&mut self, handle: EntityHandle, association: &str) -> Result<Option<EntityHandle>> {
        let slot = self.slot(handle)?;
        self.expect_kind(slot, association, true)?;
        self.resolve_association(slot, association)?;
        match self.entries[slot].association(association)? {
            AssociationValue::ToOne(Lazy::Resolved(target)) => Ok(*target),
            _ => Err(OrmError::illegal_state("to-one association left unresolved")),
        }
    }

    /// Points a many-to-one at another entity, or clears it.
    pub fn set_to_one(
        &mut self,
        handle: EntityHandle,
        association: &str,
        target: Option<EntityHandle>,
    ) -> Result<()> {
        let slot = self.slot(handle)?;
        self.expect_kind(slot, association, true)?;
        if let Some(target) = target {
            let target_slot = self.slot(target)?;
            let registry = self.registry();
            let declared = registry
                .get(&self.entries[slot].data.entity)?
                .association(association)?;
            let target_entity = &self.entries[target_slot].data.entity;
            if target_entity != &declared.target {
                return Err(OrmError::TypeMismatch {
                    expected: declared.target.clone(),
                    got: target_entity.clone(),
                });
            }
        }
        self.entries[slot]
            .associations
            .insert(association.to_string(), AssociationValue::ToOne(Lazy::Resolved(target)));
        Ok(())
    }

    /// Members of a one-to-many, initializing the collection on first access.
    pub fn to_many(&mut self, handle: EntityHandle, association: &str) -> Result<Vec<EntityHandle>> {
        let slot = self.slot(handle)?;
        self.collection(slot, association).map(<[EntityHandle]>::to_vec)
    }

    fn collection(&mut self, slot: usize, association: &str) -> Result<&[EntityHandle]> {
        self.expect_kind(slot, association, false)?;
        self.resolve_association(slot, association)?;
        match self.entries[slot].association(association)? {
            AssociationValue::ToMany(Lazy::Resolved(members)) => Ok(members.as_slice()),
            _ => Err(OrmError::illegal_state("collection left uninitialized")),
        }
    }

    fn collection_mut(&mut self, slot: usize, association: &str) -> Result<&mut Vec<EntityHandle>> {
        self.collection(slot, association)?;
        match self.entries[slot].associations.get_mut(association) {
            Some(AssociationValue::ToMany(Lazy::Resolved(members))) => Ok(members),
            _ => Err(OrmError::illegal_state("collection left uninitialized")),
        }
    }

    /// Appends to a one-to-many. The collection is initialized first.
    ///
    /// Collections are the inverse side: the member's own many-to-one decides
    /// what is stored.
    pub fn add_to_many(&mut self, handle: EntityHandle, association: &str, member: EntityHandle) -> Result<()> {
        let slot = self.slot(handle)?;
        let member_slot = self.slot(member)?;
        let registry = self.registry();
        let declared = registry
            .get(&self.entries[slot].data.entity)?
            .association(association)?;
        let member_entity = &self.entries[member_slot].data.entity;
        if member_entity != &declared.target {
            return Err(OrmError::TypeMismatch {
                expected: declared.target.clone(),
                got: member_entity.clone(),
            });
        }
        let members = self.collection_mut(slot, association)?;
        if !members.contains(&member) {
            members.push(member);
        }
        Ok(())
    }

    /// Removes a member from a one-to-many. Returns whether it was present.
    pub fn remove_from_many(
        &mut self,
        handle: EntityHandle,
        association: &str,
        member: EntityHandle,
    ) -> Result<bool> {
        let slot = self.slot(handle)?;
        self.slot(member)?;
        let members = self.collection_mut(slot, association)?;
        let before = members.len();
        members.retain(|m| *m != member);
        Ok(members.len() != before)
    }

    /// Collection size. Initializes the collection.
    pub fn size(&mut self, handle: EntityHandle, association: &str) -> Result<usize> {
        let slot = self.slot(handle)?;
        Ok(self.collection(slot, association)?.len())
    }

    /// Collection membership. Initializes the collection.
    pub fn contains(&mut self, handle: EntityHandle, association: &str, member: EntityHandle) -> Result<bool> {
        let slot = self.slot(handle)?;
        Ok(self.collection(slot, association)?.contains(&member))
    }

    /// Whether an association has been resolved.
    ///
    /// Never touches storage and also answers after the session was closed.
    pub fn is_initialized(&self, handle: EntityHandle, association: &str) -> Result<bool> {
        let slot = self.slot(handle)?;
        Ok(self.entries[slot].association(association)?.is_resolved())
    }

    /// Current value of a many-to-one without resolving it.
    pub fn peek_to_one(&self, handle: EntityHandle, association: &str) -> Result<Lazy<Option<EntityHandle>>> {
        let slot = self.slot(handle)?;
        match self.entries[slot].association(association)? {
            AssociationValue::ToOne(value) => Ok(value.clone()),
            AssociationValue::ToMany(_) => Err(OrmError::TypeMismatch {
                expected: "to-one association".to_string(),
                got: format!("one-to-many '{}'", association),
            }),
        }
    }

    /// Forces resolution of an association.
    pub fn initialize(&mut self, handle: EntityHandle, association: &str) -> Result<()> {
        let slot = self.slot(handle)?;
        self.resolve_association(slot, association)
    }
}
