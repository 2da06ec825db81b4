//! Storage driver interface and the in-memory transactional driver.
//!
//! The session talks to storage only through [`Connection::execute`] and the
//! transaction primitives. Drivers own id generation, constraint checks and
//! transaction isolation.

mod memory;
mod statement;

pub use memory::{ForeignKey, MemoryDriver, StatementCounts, TableDef};
pub use statement::{
    Direction, Filter, FilterOp, OrderBy, Outcome, Row, Select, Statement, VersionCheck,
};

use crate::error::OrmError;

/// One session's channel to storage.
///
/// Outside an explicit transaction every statement commits on its own.
pub trait Connection: Send {
    /// Executes a statement.
    fn execute(&mut self, statement: &Statement) -> Result<Outcome, OrmError>;

    /// Starts a transaction. Fails if one is already active.
    fn begin(&mut self) -> Result<(), OrmError>;

    /// Commits the active transaction atomically.
    fn commit(&mut self) -> Result<(), OrmError>;

    /// Discards the active transaction. A no-op when none is active.
    fn rollback(&mut self) -> Result<(), OrmError>;

    fn in_transaction(&self) -> bool;
}

/// Factory of connections, shared by every session of a factory.
pub trait StorageDriver: Send + Sync + std::fmt::Debug {
    fn connect(&self) -> Result<Box<dyn Connection>, OrmError>;
}
