//! Cache-aware reads and writes over a source of truth.
//!
//! Reads consult the cache first and fall through to the caller's fetch on a
//! full miss. Concurrent misses for one key share a single fetch, and the
//! value it returns is cached once. Writes go to the source first; only after
//! the source accepts them is the cache entry deleted, never overwritten.
//!
//! A fetch still running when a write lands does not put its older value
//! back in the cache, and reads that start after the write do not join it.
//!
//! Every source call runs under a deadline (the manager's `source_timeout`
//! unless overridden); running past it fails with
//! [`StrataError::SourceTimeout`], which a source breaker counts as a
//! failure.
//!
//! Source failures reach the caller unchanged. Cache failures on these paths
//! are logged and do not fail the operation, with one exception: data rejected
//! by a caller's validation is reported as [`ValidationError::Rejected`].

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use strata_core::{
    CacheConfig, CacheKey, Cacheable, DedupConfig, Provenance, StrataError, StrataResult,
    ValidationError,
};
use strata_storage::{CacheManager, CircuitBreaker, DedupStats, FillTicket, RequestDeduplicator};

use crate::response::{ReadResponse, WriteResponse};

/// Data access for one value type `T`, with source errors of type `E`.
///
/// `E` defaults to [`StrataError`]. Any error type works as long as cache
/// errors can be converted into it and it can be cloned out to every caller
/// that joined a shared fetch.
pub struct CachedAccess<T, E = StrataError> {
    cache: CacheManager,
    defaults: CacheConfig,
    inflight: RequestDeduplicator<Result<Option<T>, E>>,
    source_breaker: Option<Arc<CircuitBreaker>>,
    source_timeout: Duration,
}

impl<T, E> CachedAccess<T, E>
where
    T: Cacheable,
    E: From<StrataError> + Clone + Send + Sync + 'static,
{
    /// `defaults` supplies TTL and grace window; the namespace is set per call.
    pub fn new(cache: CacheManager, defaults: CacheConfig) -> Self {
        Self::with_dedup_config(cache, defaults, DedupConfig::default())
    }

    pub fn with_dedup_config(cache: CacheManager, defaults: CacheConfig, dedup: DedupConfig) -> Self {
        Self {
            source_timeout: cache.source_timeout(),
            cache,
            defaults,
            inflight: RequestDeduplicator::new(dedup),
            source_breaker: None,
        }
    }

    /// Deadline for each source fetch and write.
    pub fn with_source_timeout(mut self, timeout: Duration) -> Self {
        self.source_timeout = timeout;
        self
    }

    /// Send source reads and writes through `breaker`.
    pub fn with_source_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.source_breaker = Some(breaker);
        self
    }

    pub fn cache(&self) -> &CacheManager {
        &self.cache
    }

    pub fn source_breaker(&self) -> Option<&Arc<CircuitBreaker>> {
        self.source_breaker.as_ref()
    }

    /// Coalescing counters for source fetches.
    pub fn dedup_stats(&self) -> DedupStats {
        self.inflight.stats()
    }

    fn config_for(&self, namespace: &str) -> CacheConfig {
        self.defaults.clone().with_namespace(namespace)
    }

    // ========================================================================
    // READS
    // ========================================================================

    /// Read `key` from the cache, or from `fetch` on a full miss.
    ///
    /// A value returned by `fetch` is cached before this returns. `fetch`
    /// returning `Ok(None)` caches nothing and yields `data: None`.
    pub async fn cached_read<F, Fut>(
        &self,
        namespace: &str,
        key: &str,
        fetch: F,
    ) -> Result<ReadResponse<T>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<T>, E>> + Send + 'static,
    {
        self.read_through(namespace, key, fetch, |_: &T| Ok(())).await
    }

    /// Like [`cached_read`](Self::cached_read), but fetched data must pass
    /// `validate` before it is cached or returned.
    pub async fn cached_read_checked<F, Fut, V>(
        &self,
        namespace: &str,
        key: &str,
        fetch: F,
        validate: V,
    ) -> Result<ReadResponse<T>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<T>, E>> + Send + 'static,
        V: FnOnce(&T) -> Result<(), String> + Send + 'static,
    {
        self.read_through(namespace, key, fetch, validate).await
    }

    async fn read_through<F, Fut, V>(
        &self,
        namespace: &str,
        key: &str,
        fetch: F,
        validate: V,
    ) -> Result<ReadResponse<T>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<T>, E>> + Send + 'static,
        V: FnOnce(&T) -> Result<(), String> + Send + 'static,
    {
        let started = Instant::now();
        let config = self.config_for(namespace);
        let cache_key = CacheKey::for_config(key, &config).map_err(E::from)?;

        let lookup = self.cache.get::<T>(key, &config).await.map_err(E::from)?;
        if let (Some(data), Some(source)) = (lookup.data, lookup.provenance) {
            return Ok(ReadResponse {
                data: Some(data),
                cache_hit: true,
                cache_source: source,
                response_time_ms: elapsed_ms(started),
            });
        }

        let cache = self.cache.clone();
        let breaker = self.source_breaker.clone();
        let local_key = key.to_string();
        let deadline = self.source_timeout;
        let data = self
            .inflight
            .deduplicate(cache_key.as_str(), move || {
                let ticket = cache.fill_ticket();
                let dependency = source_name(breaker.as_deref());
                let fetched = within(deadline, dependency, fetch());
                fill(cache, breaker, local_key, config, ticket, fetched, validate)
            })
            .await?;

        Ok(ReadResponse {
            data,
            cache_hit: false,
            cache_source: Provenance::Fresh,
            response_time_ms: elapsed_ms(started),
        })
    }

    // ========================================================================
    // WRITES
    // ========================================================================

    /// Hand `data` to `write`, then invalidate the cached copy.
    ///
    /// A failed write returns its error and leaves the cache alone. A failed
    /// invalidation is logged and reported as `cache_invalidated: false`.
    pub async fn cached_write<F, Fut>(
        &self,
        namespace: &str,
        key: &str,
        data: T,
        write: F,
    ) -> Result<WriteResponse, E>
    where
        F: FnOnce(T) -> Fut,
        Fut: Future<Output = Result<(), E>>,
    {
        let started = Instant::now();
        let config = self.config_for(namespace);
        let cache_key = CacheKey::for_config(key, &config).map_err(E::from)?;

        let deadline = self.source_timeout;
        let dependency = source_name(self.source_breaker.as_deref());
        let call = move || within(deadline, dependency, write(data));
        match &self.source_breaker {
            Some(breaker) => breaker.execute(call).await?,
            None => call().await?,
        }

        // A fetch started before the write must not serve later readers
        self.inflight.forget(cache_key.as_str());

        let cache_invalidated = match self.cache.delete(key, &config).await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(
                    namespace,
                    key,
                    dependency = "cache",
                    error = %e,
                    "Cache invalidation after source write failed"
                );
                false
            }
        };

        Ok(WriteResponse {
            success: true,
            cache_invalidated,
            response_time_ms: elapsed_ms(started),
        })
    }

    /// Drop the cached copy of `key` without touching the source.
    pub async fn invalidate(&self, namespace: &str, key: &str) -> StrataResult<bool> {
        self.cache.delete(key, &self.config_for(namespace)).await
    }
}

/// Fetch from the source and cache what comes back, unless the key was
/// invalidated while the fetch ran. Runs once per coalesced miss.
async fn fill<T, E, Fut, V>(
    cache: CacheManager,
    breaker: Option<Arc<CircuitBreaker>>,
    key: String,
    config: CacheConfig,
    ticket: FillTicket,
    fetched: Fut,
    validate: V,
) -> Result<Option<T>, E>
where
    T: Cacheable,
    E: From<StrataError>,
    Fut: Future<Output = Result<Option<T>, E>>,
    V: FnOnce(&T) -> Result<(), String>,
{
    let data = match breaker {
        Some(breaker) => breaker.execute(|| fetched).await?,
        None => fetched.await?,
    };
    let Some(data) = data else {
        return Ok(None);
    };

    match cache
        .set_if_current(&key, &data, &config, &ticket, validate)
        .await
    {
        Ok(_) => {}
        Err(e @ StrataError::Validation(ValidationError::Rejected { .. })) => {
            return Err(E::from(e));
        }
        Err(e) => {
            tracing::warn!(
                namespace = config.namespace.as_deref().unwrap_or_default(),
                key = %key,
                dependency = "cache",
                error = %e,
                "Failed to cache source value"
            );
        }
    }
    Ok(Some(data))
}

/// Run a source call, failing with [`StrataError::SourceTimeout`] once
/// `deadline` passes. The call is dropped at that point.
async fn within<R, E, Fut>(deadline: Duration, dependency: String, call: Fut) -> Result<R, E>
where
    E: From<StrataError>,
    Fut: Future<Output = Result<R, E>>,
{
    match tokio::time::timeout(deadline, call).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(
                dependency = %dependency,
                timeout_ms = deadline.as_millis() as u64,
                "Source call exceeded its deadline"
            );
            Err(E::from(StrataError::source_timeout(dependency, deadline)))
        }
    }
}

fn source_name(breaker: Option<&CircuitBreaker>) -> String {
    breaker.map_or_else(|| "source".to_string(), |b| b.dependency().to_string())
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

impl<T, E> std::fmt::Debug for CachedAccess<T, E>
where
    T: Cacheable,
    E: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedAccess")
            .field("defaults", &self.defaults)
            .field("source_timeout", &self.source_timeout)
            .field("pending_fetches", &self.inflight.pending_count())
            .field(
                "source_breaker",
                &self.source_breaker.as_ref().map(|b| b.dependency()),
            )
            .finish()
    }
}
