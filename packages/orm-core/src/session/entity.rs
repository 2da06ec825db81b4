//! Entity state held in a session's arena.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::storage::Row;
use crate::types::{EntityKey, Value};

use super::lazy::AssociationValue;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique session identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    pub(crate) fn next() -> Self {
        SessionId(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Reference to an entity instance inside one session.
///
/// Handles are cheap to copy. Using a handle with a session other than the
/// one that issued it fails with `IllegalState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityHandle {
    pub(crate) session: SessionId,
    pub(crate) slot: usize,
}

impl EntityHandle {
    pub fn session(&self) -> SessionId {
        self.session
    }
}

/// Lifecycle state of an entity instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityState {
    /// Created in memory, never persisted
    Transient,
    /// Persisted, insert not yet flushed
    PersistPending,
    /// Backed by a row and tracked by the identity map
    Managed,
    /// Scheduled for deletion
    Removed,
    /// Row deleted by a flush
    Deleted,
    /// No longer tracked by its session
    Detached,
}

/// Scalar state of an entity instance, as seen by lifecycle hooks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityData {
    /// Entity name
    pub entity: String,
    pub id: Option<i64>,
    pub version: Option<i64>,
    /// Mapped field values by field name
    pub fields: BTreeMap<String, Value>,
    /// Unmapped values; never read from or written to storage
    pub transient: BTreeMap<String, Value>,
}

impl EntityData {
    pub(crate) fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            ..Default::default()
        }
    }

    /// Field value, `Null` when unset.
    pub fn get(&self, field: &str) -> &Value {
        const NULL: &Value = &Value::Null;
        self.fields.get(field).unwrap_or(NULL)
    }

    /// Sets a field value. The session checks field names and kinds on flush.
    pub fn set(&mut self, field: &str, value: impl Into<Value>) {
        self.fields.insert(field.to_string(), value.into());
    }

    /// Unmapped value, `Null` when unset.
    pub fn transient(&self, name: &str) -> &Value {
        const NULL: &Value = &Value::Null;
        self.transient.get(name).unwrap_or(NULL)
    }

    pub fn set_transient(&mut self, name: &str, value: impl Into<Value>) {
        self.transient.insert(name.to_string(), value.into());
    }

    /// Identity, once an id is known.
    pub fn key(&self) -> Option<EntityKey> {
        self.id.map(|id| EntityKey::new(self.entity.clone(), id))
    }
}

/// One arena slot.
#[derive(Debug, Clone)]
pub(crate) struct EntityEntry {
    pub(crate) data: EntityData,
    pub(crate) state: EntityState,
    /// Association values by association name
    pub(crate) associations: BTreeMap<String, AssociationValue>,
    /// Columns as last read from or written to storage, for dirty checking
    pub(crate) loaded: Option<Row>,
}

impl EntityEntry {
    pub(crate) fn new(data: EntityData, state: EntityState) -> Self {
        Self {
            data,
            state,
            associations: BTreeMap::new(),
            loaded: None,
        }
    }

    /// Whether lazy associations of this entry may still be resolved.
    pub(crate) fn is_attached(&self) -> bool {
        matches!(
            self.state,
            EntityState::PersistPending | EntityState::Managed | EntityState::Removed
        )
    }
}
