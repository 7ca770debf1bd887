//! STRATA Core - Shared Types
//!
//! Entries, keys, configuration, errors and monitoring snapshots used by every
//! other strata crate. No I/O lives here.

use chrono::{DateTime, Utc};

pub mod clock;
pub mod config;
pub mod constants;
pub mod entry;
pub mod error;
pub mod health;
pub mod metrics;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

pub use clock::{elapsed_between, Clock, ManualClock, SharedClock, SystemClock};
pub use config::{
    CacheConfig, CacheManagerConfig, CircuitBreakerConfig, DedupConfig, DurableTierConfig,
    FastTierConfig,
};
pub use entry::{CacheEntry, CacheKey, CacheLookup, Cacheable, Provenance};
pub use error::{
    ConfigError, ResilienceError, SerializationError, StoreError, StrataError, StrataResult,
    ValidationError,
};
pub use health::{CircuitBreakerState, CircuitState, HealthCheck, HealthStatus};
pub use metrics::CacheMetrics;
