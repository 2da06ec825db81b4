//! Lifecycle hook dispatch.

use crate::error::{OrmError, Result};
use crate::mapping::LifecycleEvent;

use super::Session;

impl Session {
    /// Runs the hooks registered for `event` on one instance.
    ///
    /// Hooks run in registration order. The first failure stops the
    /// remaining hooks and is returned as `OrmError::Callback`.
    pub(crate) fn fire(&mut self, slot: usize, event: LifecycleEvent) -> Result<()> {
        let registry = self.registry();
        let entity = self.entries[slot].data.entity.clone();
        let hooks = registry.get(&entity)?.callbacks.hooks(event);
        if hooks.is_empty() {
            return Ok(());
        }
        tracing::trace!("Firing {} for {}#{:?}", event, entity, self.entries[slot].data.id);
        for hook in hooks {
            hook(&mut self.entries[slot].data).map_err(|e| OrmError::Callback {
                entity: entity.clone(),
                event: event.to_string(),
                message: e.to_string(),
            })?;
        }
        Ok(())
    }
}
