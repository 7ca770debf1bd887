//! Default values for strata configuration.
//!
//! Centralizing constants makes them easy to find, modify, and test.

// ============================================================================
// FAST TIER
// ============================================================================

/// Default maximum number of entries held in the fast tier
pub const DEFAULT_FAST_TIER_MAX_ENTRIES: usize = 10_000;

/// Fraction of held entries removed when the fast tier is full
pub const DEFAULT_EVICTION_FRACTION: f64 = 0.25;

/// Fixed bookkeeping overhead counted per fast-tier entry in memory estimates
pub const FAST_TIER_ENTRY_OVERHEAD_BYTES: usize = 64;

// ============================================================================
// DURABLE TIER
// ============================================================================

/// Default deadline for a single durable tier call (milliseconds)
pub const DEFAULT_DURABLE_OPERATION_TIMEOUT_MS: u64 = 2_000;

// ============================================================================
// CIRCUIT BREAKER
// ============================================================================

/// Consecutive failures before a circuit opens
pub const DEFAULT_CIRCUIT_FAILURE_THRESHOLD: u32 = 5;

/// Consecutive half-open successes before a circuit closes
pub const DEFAULT_CIRCUIT_SUCCESS_THRESHOLD: u32 = 3;

/// How long an open circuit rejects calls (milliseconds)
pub const DEFAULT_CIRCUIT_OPEN_TIMEOUT_MS: u64 = 30_000;

/// Concurrent trial calls allowed while half-open
pub const DEFAULT_CIRCUIT_HALF_OPEN_MAX_CALLS: u32 = 1;

// ============================================================================
// REQUEST DEDUPLICATION
// ============================================================================

/// Pending request registrations older than this are ignored (milliseconds)
pub const DEFAULT_DEDUP_REQUEST_TIMEOUT_MS: u64 = 30_000;

// ============================================================================
// CACHE MANAGER
// ============================================================================

/// Default fast-tier sweep interval (seconds)
pub const DEFAULT_CLEANUP_INTERVAL_SECS: u64 = 60;

/// Maximum concurrently running stale-while-revalidate refreshes
pub const DEFAULT_MAX_BACKGROUND_REFRESHES: usize = 16;

/// Deadline for caller-supplied source fetches, writes and refreshes (milliseconds)
pub const DEFAULT_SOURCE_TIMEOUT_MS: u64 = 10_000;

/// Default entry TTL (seconds)
pub const DEFAULT_TTL_SECONDS: u64 = 300;

/// Separator between namespace and key
pub const NAMESPACE_SEPARATOR: char = ':';

/// Dependency name used for the durable tier breaker
pub const DURABLE_TIER_DEPENDENCY: &str = "durable-tier";
