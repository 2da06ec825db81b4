//! Unit-of-work persistence core.
//!
//! Provides data-driven entity mappings, a session with an identity map,
//! lazy associations with batch loading, lifecycle callbacks, cascades and
//! an in-memory transactional storage driver.

pub mod config;
pub mod error;
pub mod mapping;
pub mod session;
pub mod storage;
pub mod types;

pub use config::{BatchFetchStyle, FlushMode, OrmConfig};
pub use error::{OrmError, Result};
pub use session::{EntityHandle, EntityState, Query, Session, SessionFactory};
