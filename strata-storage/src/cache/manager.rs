//! Two-tier cache manager.
//!
//! Reads try the fast tier, then the durable tier through its breaker; a
//! durable hit is promoted back into the fast tier. Writes land in the fast
//! tier first and are then copied to the durable tier on a best-effort basis.
//! Durable failures never surface from a read: the caller sees a miss and
//! falls through to its source of truth.
//!
//! # Staleness
//!
//! With a grace window of `swr` seconds and a durable lifetime of `L`
//! seconds, a value older than `L - swr` is stale. Stale values are still
//! served; [`CacheManager::get_with_stale_revalidate`] also schedules a
//! detached refresh. Refreshes are capped by a semaphore, deduplicated per
//! key, and abandoned once they run past `source_timeout`.
//!
//! # Writes racing fills
//!
//! A fill that awaits a source (a background refresh, or a read-through
//! fetch holding a [`FillTicket`]) only stores its value if the key was not
//! deleted or cleared since the ticket was taken. Otherwise the value may
//! predate a write and is dropped.
//!
//! # Lifecycle
//!
//! Construct one manager per process and share clones of it. When a cleanup
//! interval is configured and a Tokio runtime is running, construction starts
//! the sweeper; [`CacheManager::shutdown`] stops it and aborts outstanding
//! refreshes.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashSet;
use serde::Serialize;
use serde_json::Value;
use strata_core::constants::DURABLE_TIER_DEPENDENCY;
use strata_core::{
    CacheConfig, CacheEntry, CacheKey, CacheLookup, CacheManagerConfig, CacheMetrics, Cacheable,
    CircuitBreakerState, CircuitState, HealthCheck, Provenance, SerializationError, SharedClock,
    StrataError, StrataResult, SystemClock, ValidationError,
};
use tokio::sync::{watch, Semaphore};
use tokio::task::{JoinHandle, JoinSet};

use super::durable_tier::DurableTier;
use super::fast_tier::FastTier;
use super::fence::{FillTicket, InvalidationLog};
use super::sweeper::{sweep_once, sweep_task, SweeperMetrics};
use crate::resilience::CircuitBreaker;
use crate::store::PersistentStore;

/// Entries removed by a clear operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClearReport {
    pub fast_removed: usize,
    pub durable_removed: usize,
}

#[derive(Debug, Default)]
struct ManagerCounters {
    promotions: AtomicU64,
    background_refreshes: AtomicU64,
    background_refresh_failures: AtomicU64,
    superseded_fills: AtomicU64,
}

struct ManagerInner {
    clock: SharedClock,
    fast: Arc<FastTier<Value>>,
    durable: DurableTier,
    invalidations: InvalidationLog,
    source_timeout: Duration,
    refresh_permits: Arc<Semaphore>,
    refreshing: DashSet<String>,
    refresh_tasks: Mutex<JoinSet<()>>,
    counters: ManagerCounters,
    sweeper: Mutex<Option<JoinHandle<()>>>,
    sweeper_metrics: Arc<SweeperMetrics>,
    shutdown_tx: watch::Sender<bool>,
}

/// Releases the per-key refresh guard when a refresh ends or is aborted.
struct RefreshGuard {
    inner: Arc<ManagerInner>,
    key: String,
}

impl Drop for RefreshGuard {
    fn drop(&mut self) {
        self.inner.refreshing.remove(&self.key);
    }
}

/// Fast + durable cache with stale-while-revalidate.
#[derive(Clone)]
pub struct CacheManager {
    inner: Arc<ManagerInner>,
}

impl CacheManager {
    /// Create a manager on the system clock.
    pub fn new(store: Arc<dyn PersistentStore>, config: CacheManagerConfig) -> StrataResult<Self> {
        Self::with_clock(store, config, SystemClock::shared())
    }

    /// Create a manager reading time from `clock`.
    pub fn with_clock(
        store: Arc<dyn PersistentStore>,
        config: CacheManagerConfig,
        clock: SharedClock,
    ) -> StrataResult<Self> {
        let breaker = Arc::new(CircuitBreaker::with_clock(
            DURABLE_TIER_DEPENDENCY,
            config.circuit_breaker.clone(),
            Arc::clone(&clock),
        ));
        Self::with_breaker(store, config, clock, breaker)
    }

    /// Create a manager whose durable tier uses an existing breaker, for
    /// example one handed out by a
    /// [`CircuitBreakerRegistry`](crate::resilience::CircuitBreakerRegistry).
    pub fn with_breaker(
        store: Arc<dyn PersistentStore>,
        config: CacheManagerConfig,
        clock: SharedClock,
        breaker: Arc<CircuitBreaker>,
    ) -> StrataResult<Self> {
        config.validate()?;

        let fast = Arc::new(FastTier::new(config.fast_tier.clone(), Arc::clone(&clock)));
        let durable = DurableTier::new(
            store,
            breaker,
            config.durable_tier.operation_timeout,
            Arc::clone(&clock),
        );
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let sweeper_metrics = Arc::new(SweeperMetrics::new());

        let sweeper = match (config.cleanup_interval, tokio::runtime::Handle::try_current()) {
            (Some(every), Ok(handle)) => Some(handle.spawn(sweep_task(
                Arc::clone(&fast),
                every,
                shutdown_rx,
                Arc::clone(&sweeper_metrics),
            ))),
            (Some(_), Err(_)) => {
                tracing::warn!("No Tokio runtime running, fast tier sweeper not started");
                None
            }
            (None, _) => None,
        };

        tracing::info!(
            max_entries = config.fast_tier.max_entries,
            durable_dependency = durable.dependency(),
            durable_timeout_ms = config.durable_tier.operation_timeout.as_millis() as u64,
            source_timeout_ms = config.source_timeout.as_millis() as u64,
            sweeper = sweeper.is_some(),
            "Cache manager started"
        );

        Ok(Self {
            inner: Arc::new(ManagerInner {
                clock,
                fast,
                durable,
                invalidations: InvalidationLog::new(),
                source_timeout: config.source_timeout,
                refresh_permits: Arc::new(Semaphore::new(config.max_background_refreshes)),
                refreshing: DashSet::new(),
                refresh_tasks: Mutex::new(JoinSet::new()),
                counters: ManagerCounters::default(),
                sweeper: Mutex::new(sweeper),
                sweeper_metrics,
                shutdown_tx,
            }),
        })
    }

    // ========================================================================
    // READS
    // ========================================================================

    /// Look `key` up in the fast tier, then the durable tier.
    ///
    /// Only invalid keys produce an error. Store failures and values that do
    /// not decode as `T` are reported as a miss.
    pub async fn get<T: Cacheable>(
        &self,
        key: &str,
        config: &CacheConfig,
    ) -> StrataResult<CacheLookup<T>> {
        let cache_key = CacheKey::for_config(key, config)?;
        let lookup = self.lookup(&cache_key, config).await;
        Ok(decode(&cache_key, lookup))
    }

    /// Like [`get`](Self::get), and when the value served is stale, refresh it
    /// in the background with `revalidate`.
    ///
    /// The caller gets the stale value immediately. A refresh that returns
    /// `Ok(Some(_))` overwrites both tiers; failures are logged and dropped.
    pub async fn get_with_stale_revalidate<T, F, Fut>(
        &self,
        key: &str,
        config: &CacheConfig,
        revalidate: F,
    ) -> StrataResult<CacheLookup<T>>
    where
        T: Cacheable,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = StrataResult<Option<T>>> + Send + 'static,
    {
        let cache_key = CacheKey::for_config(key, config)?;
        let lookup = self.lookup(&cache_key, config).await;
        if lookup.is_stale {
            self.spawn_refresh(cache_key.clone(), config.clone(), revalidate);
        }
        Ok(decode(&cache_key, lookup))
    }

    async fn lookup(&self, key: &CacheKey, config: &CacheConfig) -> CacheLookup<Value> {
        let grace = config.grace_seconds();

        if let Some(entry) = self.inner.fast.get_entry(key.as_str()) {
            let age = entry.age_at(self.inner.clock.now());
            let stale = is_stale(age, config.effective_durable_ttl(), grace);
            return CacheLookup::hit(entry, stale);
        }

        let Some(entry) = self.inner.durable.get(key).await else {
            return CacheLookup::miss();
        };

        // Time has moved while the durable read was in flight
        let now = self.inner.clock.now();
        if entry.is_expired_at(now) {
            return CacheLookup::miss();
        }
        let stale = is_stale(entry.age_at(now), entry.ttl_seconds, grace);

        match self.inner.fast.promote(key.as_str(), entry.clone()) {
            Ok(true) => {
                self.inner.counters.promotions.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(key = %key, "Promoted durable hit into fast tier");
            }
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(
                    namespace = key.namespace().unwrap_or_default(),
                    key = %key,
                    dependency = "fast-tier",
                    error = %e,
                    "Promotion into fast tier failed"
                );
            }
        }

        CacheLookup::hit(entry, stale)
    }

    fn spawn_refresh<T, F, Fut>(&self, key: CacheKey, config: CacheConfig, revalidate: F)
    where
        T: Cacheable,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = StrataResult<Option<T>>> + Send + 'static,
    {
        if *self.inner.shutdown_tx.borrow() {
            return;
        }
        if tokio::runtime::Handle::try_current().is_err() {
            tracing::warn!(key = %key, "No Tokio runtime running, skipping background refresh");
            return;
        }
        if !self.inner.refreshing.insert(key.as_str().to_string()) {
            tracing::trace!(key = %key, "Refresh already in flight");
            return;
        }
        let guard = RefreshGuard {
            inner: Arc::clone(&self.inner),
            key: key.as_str().to_string(),
        };

        let permit = match Arc::clone(&self.inner.refresh_permits).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                tracing::debug!(
                    key = %key,
                    "Background refresh capacity exhausted, serving stale value without refresh"
                );
                return;
            }
        };

        self.inner
            .counters
            .background_refreshes
            .fetch_add(1, Ordering::Relaxed);

        let ticket = self.fill_ticket();
        let manager = self.clone();
        let mut tasks = lock(&self.inner.refresh_tasks);
        while tasks.try_join_next().is_some() {}
        tasks.spawn(async move {
            let _permit = permit;
            let _guard = guard;
            manager.refresh(key, config, ticket, revalidate).await;
        });
    }

    async fn refresh<T, F, Fut>(
        &self,
        key: CacheKey,
        config: CacheConfig,
        ticket: FillTicket,
        revalidate: F,
    ) where
        T: Cacheable,
        F: FnOnce() -> Fut,
        Fut: Future<Output = StrataResult<Option<T>>>,
    {
        let deadline = self.inner.source_timeout;
        let fetched = match tokio::time::timeout(deadline, revalidate()).await {
            Ok(fetched) => fetched,
            Err(_) => Err(StrataError::source_timeout("revalidate", deadline)),
        };
        let outcome = match fetched {
            Ok(Some(data)) => self.store_value(&key, &data, &config, Some(&ticket)).await,
            Ok(None) => {
                tracing::debug!(key = %key, "Background refresh returned no data");
                return;
            }
            Err(e) => Err(e),
        };

        match outcome {
            Ok(true) => tracing::debug!(key = %key, "Background refresh stored new value"),
            // Logged by record_superseded
            Ok(false) => {}
            Err(e) => {
                self.inner
                    .counters
                    .background_refresh_failures
                    .fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    namespace = key.namespace().unwrap_or_default(),
                    key = %key,
                    dependency = "revalidate",
                    error = %e,
                    "Background refresh failed"
                );
            }
        }
    }

    // ========================================================================
    // WRITES
    // ========================================================================

    /// Store `data` in both tiers.
    ///
    /// The fast tier write is authoritative for this process. A durable write
    /// failure is logged and counted; the call still succeeds.
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        data: &T,
        config: &CacheConfig,
    ) -> StrataResult<()> {
        let cache_key = CacheKey::for_config(key, config)?;
        self.store_value(&cache_key, data, config, None).await.map(|_| ())
    }

    /// Run `validate` on `data` before storing it.
    ///
    /// Rejected data is never written and returns
    /// [`ValidationError::Rejected`].
    pub async fn set_checked<T, V>(
        &self,
        key: &str,
        data: &T,
        config: &CacheConfig,
        validate: V,
    ) -> StrataResult<()>
    where
        T: Serialize + ?Sized,
        V: FnOnce(&T) -> Result<(), String>,
    {
        let cache_key = CacheKey::for_config(key, config)?;
        check(&cache_key, data, validate)?;
        self.store_value(&cache_key, data, config, None).await.map(|_| ())
    }

    /// Ticket for a fill about to await its source. Take it before the
    /// source is called and pass it to [`set_if_current`](Self::set_if_current).
    pub fn fill_ticket(&self) -> FillTicket {
        self.inner.invalidations.ticket()
    }

    /// Validate and store `data` unless `key` was deleted or cleared after
    /// `ticket` was taken. Returns whether the value was stored.
    ///
    /// Validation runs first, so rejected data is reported even when the
    /// key has since been invalidated.
    pub async fn set_if_current<T, V>(
        &self,
        key: &str,
        data: &T,
        config: &CacheConfig,
        ticket: &FillTicket,
        validate: V,
    ) -> StrataResult<bool>
    where
        T: Serialize + ?Sized,
        V: FnOnce(&T) -> Result<(), String>,
    {
        let cache_key = CacheKey::for_config(key, config)?;
        check(&cache_key, data, validate)?;
        self.store_value(&cache_key, data, config, Some(ticket)).await
    }

    async fn store_value<T: Serialize + ?Sized>(
        &self,
        key: &CacheKey,
        data: &T,
        config: &CacheConfig,
        ticket: Option<&FillTicket>,
    ) -> StrataResult<bool> {
        if config.ttl_seconds == 0 {
            return Err(ValidationError::InvalidTtl {
                key: key.to_string(),
                reason: "must be positive".to_string(),
            }
            .into());
        }
        let value = serde_json::to_value(data).map_err(|e| SerializationError::Encode {
            key: key.to_string(),
            reason: e.to_string(),
        })?;

        let now = self.inner.clock.now();
        let fast_entry = CacheEntry::new(value.clone(), now, config.ttl_seconds, Provenance::Fast);
        match ticket {
            None => self.inner.fast.insert_entry(key.as_str(), fast_entry)?,
            Some(ticket) => {
                let stored = self.inner.invalidations.store_if_current(key.as_str(), ticket, || {
                    self.inner.fast.insert_entry(key.as_str(), fast_entry)
                });
                match stored {
                    Some(result) => result?,
                    None => {
                        self.record_superseded(key);
                        return Ok(false);
                    }
                }
            }
        }

        let durable_ttl = config.effective_durable_ttl();
        if durable_ttl == 0 {
            return Ok(true);
        }
        let durable_entry = CacheEntry::new(value, now, durable_ttl, Provenance::Durable);
        // Logged and counted by the durable tier
        let _ = self.inner.durable.set(key, &durable_entry).await;

        // A delete may have run while the durable write was in flight and
        // been overtaken by it; take the value back out of both tiers.
        if let Some(ticket) = ticket {
            if !self.inner.invalidations.is_current(key.as_str(), ticket) {
                self.inner.fast.delete(key.as_str());
                let _ = self.inner.durable.delete(key).await;
                self.record_superseded(key);
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn record_superseded(&self, key: &CacheKey) {
        self.inner
            .counters
            .superseded_fills
            .fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            namespace = key.namespace().unwrap_or_default(),
            key = %key,
            "Key invalidated while its fill was in flight, value not cached"
        );
    }

    /// Remove `key` from both tiers. Returns whether either tier held it.
    ///
    /// The fast tier entry is gone even when the durable delete fails.
    pub async fn delete(&self, key: &str, config: &CacheConfig) -> StrataResult<bool> {
        let cache_key = CacheKey::for_config(key, config)?;
        self.inner.invalidations.invalidate_key(cache_key.as_str());
        let fast_removed = self.inner.fast.delete(cache_key.as_str());
        let durable_removed = self.inner.durable.delete(&cache_key).await?;
        Ok(fast_removed || durable_removed)
    }

    // ========================================================================
    // NAMESPACES
    // ========================================================================

    /// Remove every key in `namespace` from both tiers.
    ///
    /// Other namespaces are untouched.
    pub async fn clear_namespace(&self, namespace: &str) -> StrataResult<ClearReport> {
        let prefix = CacheKey::namespace_prefix(namespace)?;
        self.inner.invalidations.invalidate_prefix(&prefix);
        let fast_removed = self.inner.fast.clear_prefix(&prefix);
        let durable_removed = self.inner.durable.clear_prefix(&prefix).await?;

        tracing::info!(namespace, fast_removed, durable_removed, "Cleared cache namespace");
        Ok(ClearReport {
            fast_removed,
            durable_removed,
        })
    }

    /// Keys currently cached in `namespace`, across both tiers, sorted.
    ///
    /// Falls back to the fast tier alone when the durable tier cannot list.
    pub async fn list_keys(&self, namespace: &str) -> StrataResult<Vec<String>> {
        let prefix = CacheKey::namespace_prefix(namespace)?;
        let mut keys: BTreeSet<String> = self.inner.fast.keys_with_prefix(&prefix).into_iter().collect();
        if let Ok(durable_keys) = self.inner.durable.list_keys(&prefix).await {
            keys.extend(durable_keys);
        }
        Ok(keys.into_iter().collect())
    }

    /// Remove everything from both tiers.
    pub async fn clear_all(&self) -> StrataResult<ClearReport> {
        self.inner.invalidations.invalidate_prefix("");
        let fast_removed = self.inner.fast.clear();
        let durable_removed = self.inner.durable.clear_prefix("").await?;

        tracing::info!(fast_removed, durable_removed, "Cleared all cache entries");
        Ok(ClearReport {
            fast_removed,
            durable_removed,
        })
    }

    // ========================================================================
    // MONITORING
    // ========================================================================

    pub fn get_stats(&self) -> CacheMetrics {
        let fast = self.inner.fast.stats();
        let durable = self.inner.durable.stats();
        let counters = &self.inner.counters;
        let sweeps = self.inner.sweeper_metrics.snapshot();

        CacheMetrics {
            fast_hits: fast.hits,
            fast_misses: fast.misses,
            durable_hits: durable.hits,
            durable_misses: durable.misses,
            promotions: counters.promotions.load(Ordering::Relaxed),
            evictions: fast.evictions,
            expirations: fast.expirations,
            durable_write_failures: durable.write_failures,
            background_refreshes: counters.background_refreshes.load(Ordering::Relaxed),
            background_refresh_failures: counters
                .background_refresh_failures
                .load(Ordering::Relaxed),
            superseded_fills: counters.superseded_fills.load(Ordering::Relaxed),
            sweep_cycles: sweeps.cycles,
            sweep_entries_removed: sweeps.entries_removed,
            fast_entries: fast.entries,
            estimated_memory_bytes: fast.estimated_memory_bytes,
        }
    }

    /// State of the durable tier breaker.
    pub fn circuit_breaker_state(&self) -> CircuitBreakerState {
        self.inner.durable.breaker().state()
    }

    pub fn circuit_breaker(&self) -> &Arc<CircuitBreaker> {
        self.inner.durable.breaker()
    }

    /// Health for monitoring endpoints. Degraded while the durable breaker is
    /// not closed, unhealthy after shutdown.
    pub fn health(&self) -> HealthCheck {
        let breaker = self.circuit_breaker_state();
        let metrics = self.get_stats();

        let check = if *self.inner.shutdown_tx.borrow() {
            HealthCheck::unhealthy("cache", "cache manager has been shut down")
        } else if breaker.state == CircuitState::Closed {
            HealthCheck::healthy("cache")
        } else {
            HealthCheck::degraded(
                "cache",
                format!("durable tier circuit is {}", breaker.state),
            )
        };

        check
            .with_metadata("durable_circuit", serde_json::json!(breaker.state.as_str()))
            .with_metadata("fast_entries", serde_json::json!(metrics.fast_entries))
            .with_metadata("hit_rate", serde_json::json!(metrics.hit_rate()))
    }

    /// Run one fast tier sweep now. Returns how many entries were removed.
    pub fn run_cleanup(&self) -> usize {
        sweep_once(&self.inner.fast, &self.inner.sweeper_metrics)
    }

    /// Deadline applied to background refreshes. The data access layer uses
    /// it as the default for source calls.
    pub fn source_timeout(&self) -> Duration {
        self.inner.source_timeout
    }

    /// Refreshes currently running.
    pub fn background_refreshes_in_flight(&self) -> usize {
        self.inner.refreshing.len()
    }

    // ========================================================================
    // LIFECYCLE
    // ========================================================================

    /// Wait for every background refresh spawned so far, including ones they
    /// cause, to finish.
    pub async fn wait_for_background(&self) {
        loop {
            let mut tasks = std::mem::take(&mut *lock(&self.inner.refresh_tasks));
            if tasks.is_empty() {
                return;
            }
            while let Some(result) = tasks.join_next().await {
                if let Err(e) = result {
                    if e.is_panic() {
                        tracing::error!(error = %e, "Background refresh panicked");
                    }
                }
            }
        }
    }

    /// Stop the sweeper and abort outstanding refreshes.
    ///
    /// Reads and writes keep working afterwards; no new refreshes are started.
    pub async fn shutdown(&self) {
        if self.inner.shutdown_tx.send_replace(true) {
            return;
        }

        let sweeper = lock(&self.inner.sweeper).take();
        if let Some(handle) = sweeper {
            if let Err(e) = handle.await {
                if e.is_panic() {
                    tracing::error!(error = %e, "Fast tier sweeper panicked");
                }
            }
        }

        let mut tasks = std::mem::take(&mut *lock(&self.inner.refresh_tasks));
        let aborted = tasks.len();
        tasks.abort_all();
        while tasks.join_next().await.is_some() {}

        tracing::info!(aborted_refreshes = aborted, "Cache manager shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        *self.inner.shutdown_tx.borrow()
    }

    /// Direct access to the fast tier.
    pub fn fast_tier(&self) -> &FastTier<Value> {
        &self.inner.fast
    }

    /// Direct access to the durable tier adapter.
    pub fn durable_tier(&self) -> &DurableTier {
        &self.inner.durable
    }

    pub fn clock(&self) -> &SharedClock {
        &self.inner.clock
    }
}

impl std::fmt::Debug for CacheManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheManager")
            .field("fast_entries", &self.inner.fast.len())
            .field("durable", &self.inner.durable)
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

fn check<T, V>(key: &CacheKey, data: &T, validate: V) -> StrataResult<()>
where
    T: ?Sized,
    V: FnOnce(&T) -> Result<(), String>,
{
    validate(data).map_err(|reason| {
        tracing::warn!(
            namespace = key.namespace().unwrap_or_default(),
            key = %key,
            reason = %reason,
            "Rejected value before caching"
        );
        StrataError::from(ValidationError::Rejected {
            key: key.to_string(),
            reason,
        })
    })
}

/// A value older than `lifetime - grace` is inside its grace window.
fn is_stale(age: Duration, lifetime_secs: u64, grace_secs: u64) -> bool {
    grace_secs > 0 && age > Duration::from_secs(lifetime_secs.saturating_sub(grace_secs))
}

fn decode<T: Cacheable>(key: &CacheKey, lookup: CacheLookup<Value>) -> CacheLookup<T> {
    let CacheLookup {
        data,
        provenance,
        is_stale,
        created_at,
    } = lookup;

    let Some(value) = data else {
        return CacheLookup::miss();
    };
    match serde_json::from_value::<T>(value) {
        Ok(data) => CacheLookup {
            data: Some(data),
            provenance,
            is_stale,
            created_at,
        },
        Err(e) => {
            tracing::warn!(
                namespace = key.namespace().unwrap_or_default(),
                key = %key,
                dependency = provenance.map(|p| p.as_str()).unwrap_or("cache"),
                error = %e,
                "Cached value does not match requested type, treating as miss"
            );
            CacheLookup::miss()
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
