//! Session factory: mapping, driver and configuration shared by sessions.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::OrmConfig;
use crate::error::{OrmError, Result};
use crate::mapping::MappingRegistry;
use crate::storage::StorageDriver;

use super::Session;

/// State shared by a factory and every session it opened.
#[derive(Debug)]
pub(crate) struct FactoryShared {
    pub(crate) registry: Arc<MappingRegistry>,
    pub(crate) driver: Arc<dyn StorageDriver>,
    pub(crate) config: OrmConfig,
}

/// Opens sessions over one mapping and one storage driver.
///
/// Cheap to clone and safe to share across threads; each session it opens
/// is owned by a single unit of work.
#[derive(Debug, Clone)]
pub struct SessionFactory {
    shared: Arc<FactoryShared>,
    closed: Arc<AtomicBool>,
}

impl SessionFactory {
    /// Creates a factory.
    ///
    /// # Arguments
    /// * `registry` - Validated entity mappings
    /// * `driver` - Storage driver holding the mapped tables
    /// * `config` - Session configuration
    ///
    /// # Returns
    /// `Result<SessionFactory>`; fails on invalid configuration.
    pub fn new(
        registry: Arc<MappingRegistry>,
        driver: Arc<dyn StorageDriver>,
        config: OrmConfig,
    ) -> Result<Self> {
        config.validate()?;
        tracing::debug!(
            "Session factory created for {} entities (flush mode {:?}, batch size {})",
            registry.len(),
            config.flush_mode,
            config.default_batch_size
        );
        Ok(Self {
            shared: Arc::new(FactoryShared {
                registry,
                driver,
                config,
            }),
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn registry(&self) -> &Arc<MappingRegistry> {
        &self.shared.registry
    }

    pub fn config(&self) -> &OrmConfig {
        &self.shared.config
    }

    /// Opens a session with its own storage connection.
    pub fn open_session(&self) -> Result<Session> {
        if self.is_closed() {
            return Err(OrmError::illegal_state("session factory is closed"));
        }
        let connection = self.shared.driver.connect()?;
        Ok(Session::new(Arc::clone(&self.shared), connection))
    }

    /// Closes the factory. Sessions already open keep working.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            tracing::debug!("Session factory closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
