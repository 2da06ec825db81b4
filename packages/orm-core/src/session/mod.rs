//! Sessions: identity map, lazy associations, lifecycle callbacks,
//! cascades, batch loading and flush.

mod batch;
mod cascade;
mod entity;
mod factory;
mod flush;
mod identity_map;
mod lazy;
mod lifecycle;
mod merge;
mod query;
#[allow(clippy::module_inception)]
mod session;
mod stats;

pub use entity::{EntityData, EntityHandle, EntityState, SessionId};
pub use factory::SessionFactory;
pub use lazy::Lazy;
pub use merge::{DetachedEntity, DetachedGraph};
pub use query::Query;
pub use session::Session;
pub use stats::SessionStatistics;
