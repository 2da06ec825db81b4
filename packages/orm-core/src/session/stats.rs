use serde::Serialize;

/// Counters of what one session did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionStatistics {
    /// Entity instances created from rows
    pub entity_loads: u64,
    /// Selects issued by `find` and lazy to-one resolution
    pub entity_fetches: u64,
    /// Selects issued to initialize collections
    pub collection_fetches: u64,
    /// Fetches that covered more than one owner or target
    pub batch_fetches: u64,
    pub collections_initialized: u64,
    pub queries: u64,
    pub flushes: u64,
    pub inserts: u64,
    pub updates: u64,
    pub deletes: u64,
}
