//! Lifecycle hook registrations.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::session::EntityData;

/// Entity state transition a hook can observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleEvent {
    PrePersist,
    PostPersist,
    PreUpdate,
    PostUpdate,
    PreRemove,
    PostRemove,
    PostLoad,
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleEvent::PrePersist => "pre-persist",
            LifecycleEvent::PostPersist => "post-persist",
            LifecycleEvent::PreUpdate => "pre-update",
            LifecycleEvent::PostUpdate => "post-update",
            LifecycleEvent::PreRemove => "pre-remove",
            LifecycleEvent::PostRemove => "post-remove",
            LifecycleEvent::PostLoad => "post-load",
        };
        f.write_str(name)
    }
}

/// Hook outcome. An error aborts the enclosing operation.
pub type HookResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Lifecycle hook function.
pub type Hook = Arc<dyn Fn(&mut EntityData) -> HookResult + Send + Sync>;

/// Hooks registered per event, run in registration order.
#[derive(Clone, Default)]
pub struct Callbacks {
    hooks: HashMap<LifecycleEvent, Vec<Hook>>,
}

impl Callbacks {
    pub fn register(&mut self, event: LifecycleEvent, hook: Hook) {
        self.hooks.entry(event).or_default().push(hook);
    }

    pub fn hooks(&self, event: LifecycleEvent) -> &[Hook] {
        self.hooks.get(&event).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.values().all(Vec::is_empty)
    }
}

impl fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut counts: Vec<(String, usize)> = self
            .hooks
            .iter()
            .map(|(event, hooks)| (event.to_string(), hooks.len()))
            .collect();
        counts.sort();
        f.debug_struct("Callbacks").field("hooks", &counts).finish()
    }
}
