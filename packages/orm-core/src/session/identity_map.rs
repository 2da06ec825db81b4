//! Identity map: at most one arena slot per entity identity.

use std::collections::HashMap;

use crate::error::{OrmError, Result};
use crate::types::EntityKey;

#[derive(Debug, Default)]
pub(crate) struct IdentityMap {
    slots: HashMap<EntityKey, usize>,
}

impl IdentityMap {
    pub(crate) fn get(&self, key: &EntityKey) -> Option<usize> {
        self.slots.get(key).copied()
    }

    pub(crate) fn contains(&self, key: &EntityKey) -> bool {
        self.slots.contains_key(key)
    }

    /// Registers a slot under its identity.
    ///
    /// Fails if a different slot already represents the same identity.
    pub(crate) fn insert(&mut self, key: EntityKey, slot: usize) -> Result<()> {
        match self.slots.get(&key) {
            Some(existing) if *existing != slot => Err(OrmError::IllegalState(format!(
                "a different instance with identity {} is already associated with the session",
                key
            ))),
            _ => {
                self.slots.insert(key, slot);
                Ok(())
            }
        }
    }

    pub(crate) fn remove(&mut self, key: &EntityKey) -> Option<usize> {
        self.slots.remove(key)
    }

    pub(crate) fn clear(&mut self) {
        self.slots.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }
}
