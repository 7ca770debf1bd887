//! STRATA Test Utilities
//!
//! Shared test infrastructure for the strata workspace:
//! - A persistent store whose failures and latency can be switched on and off
//! - Fixtures for a manager driven by a manual clock
//! - Proptest generators for keys, namespaces and configs

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// Re-export core types for convenience
pub use strata_core::{
    CacheConfig, CacheEntry, CacheKey, CacheLookup, CacheManagerConfig, CircuitBreakerConfig,
    CircuitState, FastTierConfig, ManualClock, Provenance, SharedClock, StoreError, StrataError,
    StrataResult,
};
pub use strata_storage::{CacheManager, MemoryStore, PersistentStore, WriteOptions};

// ============================================================================
// FLAKY STORE
// ============================================================================

/// Calls seen by a [`FlakyStore`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCalls {
    pub reads: u64,
    pub writes: u64,
    pub deletes: u64,
    pub lists: u64,
}

/// A [`MemoryStore`] that can be told to fail or stall.
///
/// Calls are counted whether or not they fail.
#[derive(Debug)]
pub struct FlakyStore {
    inner: MemoryStore,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    delay: Mutex<Option<Duration>>,
    reads: AtomicU64,
    writes: AtomicU64,
    deletes: AtomicU64,
    lists: AtomicU64,
}

impl FlakyStore {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            inner: MemoryStore::with_clock(clock).named("flaky"),
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            delay: Mutex::new(None),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
            lists: AtomicU64::new(0),
        }
    }

    /// Make every call fail, or recover.
    pub fn set_down(&self, down: bool) {
        self.fail_reads.store(down, Ordering::SeqCst);
        self.fail_writes.store(down, Ordering::SeqCst);
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Writes, deletes and listings.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Sleep this long before answering any call.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock().unwrap_or_else(|e| e.into_inner()) = delay;
    }

    pub fn calls(&self) -> StoreCalls {
        StoreCalls {
            reads: self.reads.load(Ordering::SeqCst),
            writes: self.writes.load(Ordering::SeqCst),
            deletes: self.deletes.load(Ordering::SeqCst),
            lists: self.lists.load(Ordering::SeqCst),
        }
    }

    /// The values behind the failure switches.
    pub fn backing(&self) -> &MemoryStore {
        &self.inner
    }

    async fn enter(&self, counter: &AtomicU64, fail: &AtomicBool) -> StrataResult<()> {
        counter.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if fail.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable {
                dependency: "flaky".to_string(),
                reason: "injected failure".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

#[async_trait]
impl PersistentStore for FlakyStore {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn read(&self, key: &str) -> StrataResult<Option<Value>> {
        self.enter(&self.reads, &self.fail_reads).await?;
        self.inner.read(key).await
    }

    async fn write(&self, key: &str, value: &Value, options: WriteOptions) -> StrataResult<()> {
        self.enter(&self.writes, &self.fail_writes).await?;
        self.inner.write(key, value, options).await
    }

    async fn delete(&self, key: &str) -> StrataResult<bool> {
        self.enter(&self.deletes, &self.fail_writes).await?;
        self.inner.delete(key).await
    }

    async fn list_keys(&self, prefix: &str) -> StrataResult<Vec<String>> {
        self.enter(&self.lists, &self.fail_writes).await?;
        self.inner.list_keys(prefix).await
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

/// Market quote used as a cached value throughout the tests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub price: u32,
}

impl Quote {
    pub fn new(symbol: &str, price: u32) -> Self {
        Self {
            symbol: symbol.to_string(),
            price,
        }
    }
}

/// A manager over a [`FlakyStore`], both on one manual clock.
pub struct Harness {
    pub manager: CacheManager,
    pub store: Arc<FlakyStore>,
    pub clock: Arc<ManualClock>,
}

impl Harness {
    /// Development config: no sweeper, breaker opens after three failures.
    pub fn new() -> Self {
        Self::with_config(CacheManagerConfig::development())
    }

    pub fn with_config(config: CacheManagerConfig) -> Self {
        let clock = Arc::new(ManualClock::starting_now());
        let store = Arc::new(FlakyStore::new(clock.clone()));
        let manager = CacheManager::with_clock(store.clone(), config, clock.clone())
            .unwrap_or_else(|e| panic!("invalid test config: {e}"));
        Self {
            manager,
            store,
            clock,
        }
    }

    /// Harness whose fast tier holds at most `max_entries`.
    pub fn with_max_entries(max_entries: usize) -> Self {
        let mut config = CacheManagerConfig::development();
        config.fast_tier = config.fast_tier.with_max_entries(max_entries);
        Self::with_config(config)
    }

    pub fn advance_secs(&self, secs: u64) {
        self.clock.advance_secs(secs);
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

/// Install a test subscriber once per process. Honors `RUST_LOG`.
pub fn init_test_tracing() {
    static INIT: OnceCell<()> = OnceCell::new();
    INIT.get_or_init(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for strata inputs.

    use super::*;
    use proptest::prelude::*;

    /// A key that passes validation.
    pub fn arb_key() -> impl Strategy<Value = String> {
        "[a-zA-Z0-9_.-]{1,16}"
    }

    /// A namespace that passes validation.
    pub fn arb_namespace() -> impl Strategy<Value = String> {
        "[a-z]{1,8}"
    }

    pub fn arb_ttl() -> impl Strategy<Value = u64> {
        1u64..=3600
    }

    pub fn arb_quote() -> impl Strategy<Value = Quote> {
        ("[A-Z]{1,5}", any::<u32>()).prop_map(|(symbol, price)| Quote { symbol, price })
    }

    /// TTL plus a grace window no longer than the TTL.
    pub fn arb_cache_config() -> impl Strategy<Value = CacheConfig> {
        (arb_ttl(), 0u64..=100, proptest::option::of(arb_namespace())).prop_map(
            |(ttl, swr_pct, namespace)| {
                let config = CacheConfig::new(ttl).with_stale_while_revalidate(ttl * swr_pct / 100);
                match namespace {
                    Some(ns) => config.with_namespace(ns),
                    None => config,
                }
            },
        )
    }
}
