//! STRATA Access - Cache-Aware Data Access
//!
//! [`CachedAccess`] puts a [`CacheManager`](strata_storage::CacheManager) in
//! front of a source of truth: reads fall through to the source on a full
//! miss and fill the cache, writes go to the source and then invalidate.
//!
//! # Example
//!
//! ```ignore
//! let quotes: CachedAccess<Quote> = CachedAccess::new(manager, CacheConfig::new(60));
//!
//! let response = quotes
//!     .cached_read("price", "AAPL", || async { api.fetch_quote("AAPL").await })
//!     .await?;
//! ```

pub mod access;
pub mod response;
pub mod telemetry;

pub use access::CachedAccess;
pub use response::{ReadResponse, WriteResponse};
pub use telemetry::{init_tracing, LogFormat, TelemetryConfig, TelemetryError};
