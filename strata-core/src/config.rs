//! Configuration types

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::error::{ConfigError, StrataResult};

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn invalid(field: &str, value: impl ToString, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

// ============================================================================
// PER-CALL CACHE CONFIG
// ============================================================================

/// Per-call cache configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Fast tier lifetime, and the freshness window for staleness checks.
    pub ttl_seconds: u64,
    /// Grace window during which an aging entry is served while being refreshed.
    pub stale_while_revalidate_seconds: Option<u64>,
    /// Namespace prefixed to the key as `namespace:key`.
    pub namespace: Option<String>,
    /// Durable tier lifetime. Defaults to `ttl_seconds + stale_while_revalidate_seconds`.
    pub durable_ttl_seconds: Option<u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::new(DEFAULT_TTL_SECONDS)
    }
}

impl CacheConfig {
    /// Create a config with the given TTL and no grace window.
    pub fn new(ttl_seconds: u64) -> Self {
        Self {
            ttl_seconds,
            stale_while_revalidate_seconds: None,
            namespace: None,
            durable_ttl_seconds: None,
        }
    }

    /// Set the stale-while-revalidate grace window.
    pub fn with_stale_while_revalidate(mut self, seconds: u64) -> Self {
        self.stale_while_revalidate_seconds = Some(seconds);
        self
    }

    /// Set the namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Override the durable tier TTL.
    pub fn with_durable_ttl(mut self, seconds: u64) -> Self {
        self.durable_ttl_seconds = Some(seconds);
        self
    }

    /// Grace window in seconds, zero when unset.
    pub fn grace_seconds(&self) -> u64 {
        self.stale_while_revalidate_seconds.unwrap_or(0)
    }

    /// Lifetime of the durable copy.
    pub fn effective_durable_ttl(&self) -> u64 {
        self.durable_ttl_seconds
            .unwrap_or_else(|| self.ttl_seconds.saturating_add(self.grace_seconds()))
    }
}

// ============================================================================
// CIRCUIT BREAKER
// ============================================================================

/// Configuration for one circuit breaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub open_timeout: Duration,
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_CIRCUIT_FAILURE_THRESHOLD,
            success_threshold: DEFAULT_CIRCUIT_SUCCESS_THRESHOLD,
            open_timeout: Duration::from_millis(DEFAULT_CIRCUIT_OPEN_TIMEOUT_MS),
            half_open_max_calls: DEFAULT_CIRCUIT_HALF_OPEN_MAX_CALLS,
        }
    }
}

impl CircuitBreakerConfig {
    /// Create CircuitBreakerConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `STRATA_CIRCUIT_FAILURE_THRESHOLD`: Failures before opening (default: 5)
    /// - `STRATA_CIRCUIT_SUCCESS_THRESHOLD`: Half-open successes needed to close (default: 3)
    /// - `STRATA_CIRCUIT_OPEN_TIMEOUT_MS`: How long the circuit stays open (default: 30000)
    /// - `STRATA_CIRCUIT_HALF_OPEN_MAX_CALLS`: Concurrent half-open trials (default: 1)
    pub fn from_env() -> Self {
        Self {
            failure_threshold: env_or(
                "STRATA_CIRCUIT_FAILURE_THRESHOLD",
                DEFAULT_CIRCUIT_FAILURE_THRESHOLD,
            ),
            success_threshold: env_or(
                "STRATA_CIRCUIT_SUCCESS_THRESHOLD",
                DEFAULT_CIRCUIT_SUCCESS_THRESHOLD,
            ),
            open_timeout: Duration::from_millis(env_or(
                "STRATA_CIRCUIT_OPEN_TIMEOUT_MS",
                DEFAULT_CIRCUIT_OPEN_TIMEOUT_MS,
            )),
            half_open_max_calls: env_or(
                "STRATA_CIRCUIT_HALF_OPEN_MAX_CALLS",
                DEFAULT_CIRCUIT_HALF_OPEN_MAX_CALLS,
            ),
        }
    }

    /// Reject thresholds that would wedge the state machine.
    pub fn validate(&self) -> StrataResult<()> {
        if self.failure_threshold == 0 {
            return Err(invalid("failure_threshold", 0, "must be at least 1").into());
        }
        if self.success_threshold == 0 {
            return Err(invalid("success_threshold", 0, "must be at least 1").into());
        }
        if self.half_open_max_calls == 0 {
            return Err(invalid("half_open_max_calls", 0, "must be at least 1").into());
        }
        Ok(())
    }
}

// ============================================================================
// TIERS
// ============================================================================

/// Fast tier sizing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FastTierConfig {
    pub max_entries: usize,
    /// Fraction of held entries removed when full. `0.25` drops the oldest quarter.
    pub eviction_fraction: f64,
}

impl Default for FastTierConfig {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_FAST_TIER_MAX_ENTRIES,
            eviction_fraction: DEFAULT_EVICTION_FRACTION,
        }
    }
}

impl FastTierConfig {
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    pub fn validate(&self) -> StrataResult<()> {
        if self.max_entries == 0 {
            return Err(invalid("max_entries", 0, "must be at least 1").into());
        }
        if !(self.eviction_fraction > 0.0 && self.eviction_fraction <= 1.0) {
            return Err(invalid(
                "eviction_fraction",
                self.eviction_fraction,
                "must be in (0, 1]",
            )
            .into());
        }
        Ok(())
    }
}

/// Durable tier call deadlines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DurableTierConfig {
    pub operation_timeout: Duration,
}

impl Default for DurableTierConfig {
    fn default() -> Self {
        Self {
            operation_timeout: Duration::from_millis(DEFAULT_DURABLE_OPERATION_TIMEOUT_MS),
        }
    }
}

/// Request deduplicator settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedupConfig {
    /// Registrations older than this no longer capture new callers.
    pub request_timeout: Duration,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_millis(DEFAULT_DEDUP_REQUEST_TIMEOUT_MS),
        }
    }
}

// ============================================================================
// CACHE MANAGER
// ============================================================================

/// Configuration for a cache manager instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheManagerConfig {
    pub fast_tier: FastTierConfig,
    pub durable_tier: DurableTierConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    /// Interval of the proactive fast-tier sweep. `None` disables the sweeper.
    pub cleanup_interval: Option<Duration>,
    /// Cap on concurrently running background refreshes.
    pub max_background_refreshes: usize,
    /// Deadline for background refreshes, and the default deadline for
    /// source calls made through the data access layer.
    pub source_timeout: Duration,
}

impl Default for CacheManagerConfig {
    fn default() -> Self {
        Self {
            fast_tier: FastTierConfig::default(),
            durable_tier: DurableTierConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            cleanup_interval: Some(Duration::from_secs(DEFAULT_CLEANUP_INTERVAL_SECS)),
            max_background_refreshes: DEFAULT_MAX_BACKGROUND_REFRESHES,
            source_timeout: Duration::from_millis(DEFAULT_SOURCE_TIMEOUT_MS),
        }
    }
}

impl CacheManagerConfig {
    /// Create CacheManagerConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `STRATA_FAST_TIER_MAX_ENTRIES`: Fast tier capacity (default: 10000)
    /// - `STRATA_DURABLE_TIMEOUT_MS`: Durable call deadline (default: 2000)
    /// - `STRATA_CLEANUP_INTERVAL_SECS`: Sweep interval, `0` disables (default: 60)
    /// - `STRATA_MAX_BACKGROUND_REFRESHES`: Concurrent refresh cap (default: 16)
    /// - `STRATA_SOURCE_TIMEOUT_MS`: Source and refresh deadline (default: 10000)
    /// - `STRATA_CIRCUIT_*`: see [`CircuitBreakerConfig::from_env`]
    pub fn from_env() -> Self {
        let cleanup_secs = env_or("STRATA_CLEANUP_INTERVAL_SECS", DEFAULT_CLEANUP_INTERVAL_SECS);

        Self {
            fast_tier: FastTierConfig {
                max_entries: env_or("STRATA_FAST_TIER_MAX_ENTRIES", DEFAULT_FAST_TIER_MAX_ENTRIES),
                eviction_fraction: DEFAULT_EVICTION_FRACTION,
            },
            durable_tier: DurableTierConfig {
                operation_timeout: Duration::from_millis(env_or(
                    "STRATA_DURABLE_TIMEOUT_MS",
                    DEFAULT_DURABLE_OPERATION_TIMEOUT_MS,
                )),
            },
            circuit_breaker: CircuitBreakerConfig::from_env(),
            cleanup_interval: (cleanup_secs > 0).then(|| Duration::from_secs(cleanup_secs)),
            max_background_refreshes: env_or(
                "STRATA_MAX_BACKGROUND_REFRESHES",
                DEFAULT_MAX_BACKGROUND_REFRESHES,
            ),
            source_timeout: Duration::from_millis(env_or(
                "STRATA_SOURCE_TIMEOUT_MS",
                DEFAULT_SOURCE_TIMEOUT_MS,
            )),
        }
    }

    /// Small, quick-cycling configuration for development and tests.
    pub fn development() -> Self {
        Self {
            fast_tier: FastTierConfig::default().with_max_entries(1_000),
            durable_tier: DurableTierConfig {
                operation_timeout: Duration::from_millis(500),
            },
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: 3,
                success_threshold: 1,
                open_timeout: Duration::from_secs(5),
                half_open_max_calls: 1,
            },
            cleanup_interval: None,
            max_background_refreshes: 4,
            source_timeout: Duration::from_secs(2),
        }
    }

    pub fn validate(&self) -> StrataResult<()> {
        self.fast_tier.validate()?;
        self.circuit_breaker.validate()?;
        if self.durable_tier.operation_timeout.is_zero() {
            return Err(invalid("durable_tier.operation_timeout", "0", "must be positive").into());
        }
        if self.source_timeout.is_zero() {
            return Err(invalid("source_timeout", "0", "must be positive").into());
        }
        if self.max_background_refreshes == 0 {
            return Err(invalid("max_background_refreshes", 0, "must be at least 1").into());
        }
        Ok(())
    }
}
