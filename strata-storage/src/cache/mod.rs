//! Two-tier cache.
//!
//! [`FastTier`] is a bounded in-process map; [`DurableTier`] reaches a
//! [`PersistentStore`](crate::store::PersistentStore) through a circuit
//! breaker. [`CacheManager`] composes the two and is what callers use.
//!
//! # Example
//!
//! ```ignore
//! let manager = CacheManager::new(Arc::new(MemoryStore::new()), CacheManagerConfig::default())?;
//! let config = CacheConfig::new(60).with_stale_while_revalidate(30).with_namespace("price");
//!
//! manager.set("AAPL", &quote, &config).await?;
//! let lookup = manager.get::<Quote>("AAPL", &config).await?;
//! assert_eq!(lookup.provenance, Some(Provenance::Fast));
//! ```

pub mod durable_tier;
pub mod fast_tier;
pub mod fence;
pub mod manager;
pub mod sweeper;

pub use durable_tier::{DurableRecord, DurableTier, DurableTierStats};
pub use fast_tier::{FastTier, FastTierStats};
pub use fence::{FillTicket, InvalidationLog};
pub use manager::{CacheManager, ClearReport};
pub use sweeper::{SweeperMetrics, SweeperSnapshot};
