//! Cache usage counters.

use serde::{Deserialize, Serialize};

/// Snapshot of cache counters exposed to monitoring.
///
/// Counters only ever increase over the life of a manager. Every read probes
/// the fast tier first, so `fast_hits + fast_misses` is the total read count.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheMetrics {
    pub fast_hits: u64,
    pub fast_misses: u64,
    pub durable_hits: u64,
    pub durable_misses: u64,
    /// Durable hits copied back into the fast tier
    pub promotions: u64,
    /// Entries dropped to make room in the fast tier
    pub evictions: u64,
    /// Expired entries removed, lazily or by the sweeper
    pub expirations: u64,
    pub durable_write_failures: u64,
    pub background_refreshes: u64,
    pub background_refresh_failures: u64,
    /// Fetched values dropped because their key was invalidated mid-fill
    pub superseded_fills: u64,
    pub sweep_cycles: u64,
    /// Expired entries removed by the sweeper alone
    pub sweep_entries_removed: u64,
    /// Entries currently held by the fast tier
    pub fast_entries: usize,
    /// Key bytes + serialized value bytes + fixed overhead, over the fast tier
    pub estimated_memory_bytes: usize,
}

impl CacheMetrics {
    /// Total reads observed.
    pub fn requests(&self) -> u64 {
        self.fast_hits + self.fast_misses
    }

    /// Reads served by either tier, as a fraction of all reads (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.requests();
        if total == 0 {
            0.0
        } else {
            (self.fast_hits + self.durable_hits) as f64 / total as f64
        }
    }

    /// Reads served by the fast tier alone.
    pub fn fast_hit_rate(&self) -> f64 {
        let total = self.requests();
        if total == 0 {
            0.0
        } else {
            self.fast_hits as f64 / total as f64
        }
    }
}
