//! Failure isolation for slow or unreliable dependencies.
//!
//! - [`CircuitBreaker`] fails fast while a dependency is unhealthy and probes
//!   it again after a cooldown.
//! - [`CircuitBreakerRegistry`] hands out one breaker per dependency name.
//! - [`RequestDeduplicator`] collapses concurrent fetches of the same key into
//!   a single call.

pub mod circuit_breaker;
pub mod dedup;
pub mod registry;

pub use circuit_breaker::{CallPermit, CircuitBreaker};
pub use dedup::{DedupStats, RequestDeduplicator};
pub use registry::CircuitBreakerRegistry;
