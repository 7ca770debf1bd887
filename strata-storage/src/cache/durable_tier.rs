//! Durable tier adapter.
//!
//! Wraps a [`PersistentStore`] so that every call goes through a circuit
//! breaker and carries a deadline. Reads never fail: breaker rejections,
//! timeouts, store errors and undecodable records all come back as a miss.
//! Writes and deletes report failure to the caller after logging it.
//!
//! Values are stored as a JSON record `{ data, created_at, ttl_seconds }`, so
//! a reader can work out how much lifetime an entry has left even after a
//! process restart.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use strata_core::{
    CacheEntry, CacheKey, Provenance, SerializationError, SharedClock, StoreError, StrataResult,
    Timestamp,
};

use crate::resilience::CircuitBreaker;
use crate::store::{PersistentStore, WriteOptions};

/// On-store representation of a cached value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DurableRecord {
    pub data: Value,
    pub created_at: Timestamp,
    pub ttl_seconds: u64,
}

impl From<&CacheEntry<Value>> for DurableRecord {
    fn from(entry: &CacheEntry<Value>) -> Self {
        Self {
            data: entry.data.clone(),
            created_at: entry.created_at,
            ttl_seconds: entry.ttl_seconds,
        }
    }
}

impl DurableRecord {
    pub fn into_entry(self) -> CacheEntry<Value> {
        CacheEntry::new(
            self.data,
            self.created_at,
            self.ttl_seconds,
            Provenance::Durable,
        )
    }
}

/// Counters kept by the durable tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DurableTierStats {
    pub hits: u64,
    pub misses: u64,
    pub write_failures: u64,
}

/// Breaker-protected, deadline-bounded access to the persistent store.
pub struct DurableTier {
    store: Arc<dyn PersistentStore>,
    breaker: Arc<CircuitBreaker>,
    operation_timeout: Duration,
    clock: SharedClock,
    hits: AtomicU64,
    misses: AtomicU64,
    write_failures: AtomicU64,
}

impl DurableTier {
    pub fn new(
        store: Arc<dyn PersistentStore>,
        breaker: Arc<CircuitBreaker>,
        operation_timeout: Duration,
        clock: SharedClock,
    ) -> Self {
        Self {
            store,
            breaker,
            operation_timeout,
            clock,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            write_failures: AtomicU64::new(0),
        }
    }

    pub fn dependency(&self) -> &str {
        self.store.name()
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Route one store call through the breaker with the operation deadline.
    ///
    /// The store future is only polled once the breaker admits the call.
    async fn call<R, Fut>(&self, operation: &'static str, store_call: Fut) -> StrataResult<R>
    where
        Fut: Future<Output = StrataResult<R>>,
    {
        let timeout = self.operation_timeout;
        self.breaker
            .execute(|| async move {
                match tokio::time::timeout(timeout, store_call).await {
                    Ok(result) => result,
                    Err(_) => Err(StoreError::Timeout {
                        dependency: self.dependency().to_string(),
                        operation: operation.to_string(),
                        timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                    }
                    .into()),
                }
            })
            .await
    }

    /// Read a live entry, or `None` on any miss or failure.
    pub async fn get(&self, key: &CacheKey) -> Option<CacheEntry<Value>> {
        let raw = match self.call("read", self.store.read(key.as_str())).await {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(
                    namespace = key.namespace().unwrap_or_default(),
                    key = %key,
                    dependency = self.dependency(),
                    error = %e,
                    "Durable tier read failed, treating as miss"
                );
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        let entry = raw.and_then(|raw| match serde_json::from_value::<DurableRecord>(raw) {
            Ok(record) => Some(record.into_entry()),
            Err(e) => {
                tracing::warn!(
                    namespace = key.namespace().unwrap_or_default(),
                    key = %key,
                    dependency = self.dependency(),
                    error = %e,
                    "Durable record could not be decoded, treating as miss"
                );
                None
            }
        });

        match entry {
            Some(entry) if !entry.is_expired_at(self.clock.now()) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry)
            }
            _ => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Write `entry` with its own TTL.
    pub async fn set(&self, key: &CacheKey, entry: &CacheEntry<Value>) -> StrataResult<()> {
        let result = self.write(key, entry).await;
        if let Err(e) = &result {
            self.write_failures.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                namespace = key.namespace().unwrap_or_default(),
                key = %key,
                dependency = self.dependency(),
                error = %e,
                "Durable tier write failed"
            );
        }
        result
    }

    async fn write(&self, key: &CacheKey, entry: &CacheEntry<Value>) -> StrataResult<()> {
        let record = serde_json::to_value(DurableRecord::from(entry)).map_err(|e| {
            SerializationError::Encode {
                key: key.to_string(),
                reason: e.to_string(),
            }
        })?;
        let options = WriteOptions::with_ttl(entry.ttl_seconds);
        self.call("write", self.store.write(key.as_str(), &record, options))
            .await
    }

    /// Delete `key`. Returns whether a value was present.
    pub async fn delete(&self, key: &CacheKey) -> StrataResult<bool> {
        let result = self.call("delete", self.store.delete(key.as_str())).await;
        if let Err(e) = &result {
            tracing::warn!(
                namespace = key.namespace().unwrap_or_default(),
                key = %key,
                dependency = self.dependency(),
                error = %e,
                "Durable tier delete failed"
            );
        }
        result
    }

    /// Keys starting with `prefix`.
    pub async fn list_keys(&self, prefix: &str) -> StrataResult<Vec<String>> {
        let result = self.call("list_keys", self.store.list_keys(prefix)).await;
        if let Err(e) = &result {
            tracing::warn!(
                prefix,
                dependency = self.dependency(),
                error = %e,
                "Durable tier key listing failed"
            );
        }
        result
    }

    /// Delete every key starting with `prefix`. Returns how many were removed.
    ///
    /// Keeps going past individual delete failures and reports the first one.
    pub async fn clear_prefix(&self, prefix: &str) -> StrataResult<usize> {
        let keys = self.list_keys(prefix).await?;
        let mut removed = 0usize;
        let mut first_error = None;

        for key in keys {
            match self.call("delete", self.store.delete(&key)).await {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(
                        prefix,
                        key = %key,
                        dependency = self.dependency(),
                        error = %e,
                        "Durable tier delete failed during clear"
                    );
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(removed),
        }
    }

    pub fn stats(&self) -> DurableTierStats {
        DurableTierStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for DurableTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableTier")
            .field("dependency", &self.dependency())
            .field("operation_timeout", &self.operation_timeout)
            .field("breaker", &self.breaker)
            .finish()
    }
}
