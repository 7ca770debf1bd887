//! STRATA Storage - Cache Tiers and Resilience
//!
//! The fast and durable cache tiers, the cache manager that orchestrates
//! them, circuit breaking and request coalescing for slow dependencies, and
//! two concrete persistent stores.

pub mod cache;
pub mod lmdb;
pub mod memory;
pub mod resilience;
pub mod store;

pub use cache::{
    CacheManager, ClearReport, DurableRecord, DurableTier, DurableTierStats, FastTier,
    FastTierStats, FillTicket, InvalidationLog, SweeperMetrics, SweeperSnapshot,
};
pub use lmdb::{LmdbStore, LmdbStoreError};
pub use memory::MemoryStore;
pub use resilience::{
    CallPermit, CircuitBreaker, CircuitBreakerRegistry, DedupStats, RequestDeduplicator,
};
pub use store::{PersistentStore, WriteOptions};
