//! Entity mapping descriptors: fields, associations, cascade and fetch
//! policy, lifecycle hooks.
//!
//! Mappings are plain data built once and consulted by the session at
//! runtime; nothing is discovered by reflection.

mod association;
mod callbacks;
mod entity;
mod field;
mod registry;
pub mod schema;
pub(crate) mod validation;

pub use association::{Association, AssociationKind, CascadeOp, CascadeSet, FetchType};
pub use callbacks::{Callbacks, Hook, HookResult, LifecycleEvent};
pub use entity::{EntityMapping, EntityMappingBuilder, IdStrategy};
pub use field::FieldMapping;
pub use registry::{MappingRegistry, MappingRegistryBuilder};
pub use schema::MappingSchema;

#[cfg(test)]
mod tests {
    include!("tests.rs");
}
