//! Session and storage error types.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, OrmError>;

/// Errors raised by the session, mapping layer and storage drivers.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OrmError {
    /// Operation not allowed in the current session, factory or entity state
    #[error("Illegal state: {0}")]
    IllegalState(String),

    /// Lazy association triggered after its session was closed or cleared
    #[error("Cannot initialize '{association}' of {entity}#{id:?}: entity is detached from its session")]
    DetachedEntity {
        entity: String,
        id: Option<i64>,
        association: String,
    },

    /// Association without the needed cascade points at an unsaved instance
    #[error("{entity}.{association} references an unsaved transient instance of '{target}'")]
    TransientReference {
        entity: String,
        association: String,
        target: String,
    },

    /// Stored version differs from the in-memory version
    #[error("Row was updated or deleted by another transaction: {entity}#{id}")]
    OptimisticLock { entity: String, id: i64 },

    /// Storage-level uniqueness or foreign-key failure
    #[error("Constraint '{constraint}' violated on table '{table}': {detail}")]
    ConstraintViolation {
        table: String,
        constraint: String,
        detail: String,
    },

    /// Entity type is not part of the mapping
    #[error("Entity '{0}' is not mapped")]
    UnknownEntity(String),

    /// Field not declared on the entity mapping
    #[error("Field '{field}' not mapped on entity '{entity}'")]
    UnknownField { entity: String, field: String },

    /// Association not declared on the entity mapping
    #[error("Association '{association}' not mapped on entity '{entity}'")]
    UnknownAssociation { entity: String, association: String },

    /// Mapping descriptor failed validation
    #[error("Invalid mapping: {0}")]
    InvalidMapping(String),

    /// Session factory configuration failed validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Value kind does not match the declared field kind
    #[error("Type mismatch: expected {expected}, got {got}")]
    TypeMismatch { expected: String, got: String },

    /// Row addressed by identity no longer exists
    #[error("No row with id {id} for entity '{entity}'")]
    EntityNotFound { entity: String, id: i64 },

    /// Table not known to the storage driver
    #[error("Table '{table}' not found")]
    TableNotFound { table: String },

    /// Lifecycle hook returned an error
    #[error("{event} callback failed for '{entity}': {message}")]
    Callback {
        entity: String,
        event: String,
        message: String,
    },

    /// Lock poisoned (RwLock or Mutex poisoned)
    #[error("Lock poisoned")]
    LockPoisoned,

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O error while reading configuration or schema files
    #[error("I/O error: {0}")]
    Io(String),
}

impl OrmError {
    pub(crate) fn illegal_state(message: impl Into<String>) -> Self {
        OrmError::IllegalState(message.into())
    }
}

/// Classifies I/O errors into `OrmError::Io` with the operation context.
pub(crate) fn classify_io_error(error: std::io::Error, context: &str) -> OrmError {
    match error.kind() {
        std::io::ErrorKind::NotFound => OrmError::Io(format!("{}: file not found ({})", context, error)),
        std::io::ErrorKind::PermissionDenied => {
            OrmError::Io(format!("{}: permission denied ({})", context, error))
        }
        _ => OrmError::Io(format!("{}: {}", context, error)),
    }
}

impl From<serde_json::Error> for OrmError {
    fn from(error: serde_json::Error) -> Self {
        OrmError::Serialization(error.to_string())
    }
}
