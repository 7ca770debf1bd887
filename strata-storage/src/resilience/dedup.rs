//! Coalescing of concurrent identical requests.
//!
//! The first caller for a key registers a shared future; callers arriving
//! while it is pending await the same future and observe its single
//! outcome. The registration is removed when the future settles, or once it
//! is older than `request_timeout`: every call drops expired registrations
//! for all keys, so an operation that never settles can neither block its
//! key nor stay registered forever.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures_util::future::{BoxFuture, FutureExt, Shared};
use strata_core::DedupConfig;

struct PendingRequest<V> {
    future: Shared<BoxFuture<'static, V>>,
    created_at: Instant,
    id: u64,
}

type PendingMap<V> = Arc<Mutex<HashMap<String, PendingRequest<V>>>>;

/// Counters kept by the deduplicator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DedupStats {
    /// Operations actually started
    pub executions: u64,
    /// Callers that joined an operation already in flight
    pub coalesced: u64,
    /// Registrations dropped for exceeding the timeout
    pub timed_out: u64,
}

/// Per-key request coalescer.
pub struct RequestDeduplicator<V> {
    pending: PendingMap<V>,
    request_timeout: Duration,
    next_id: AtomicU64,
    executions: AtomicU64,
    coalesced: AtomicU64,
    timed_out: AtomicU64,
}

impl<V> Default for RequestDeduplicator<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new(DedupConfig::default())
    }
}

impl<V> RequestDeduplicator<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(config: DedupConfig) -> Self {
        Self {
            pending: Arc::new(Mutex::new(HashMap::new())),
            request_timeout: config.request_timeout,
            next_id: AtomicU64::new(0),
            executions: AtomicU64::new(0),
            coalesced: AtomicU64::new(0),
            timed_out: AtomicU64::new(0),
        }
    }

    /// Run `operation` for `key`, or join the run already in flight.
    ///
    /// `operation` is only invoked when no live registration exists. It is
    /// invoked while the registration is being made, so it should build its
    /// future cheaply and do the work inside it.
    pub async fn deduplicate<F, Fut>(&self, key: &str, operation: F) -> V
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V> + Send + 'static,
    {
        let shared = {
            let mut pending = lock(&self.pending);
            self.drop_expired(&mut pending);
            let live = pending.get(key).map(|request| request.future.clone());

            match live {
                Some(future) => {
                    self.coalesced.fetch_add(1, Ordering::Relaxed);
                    tracing::trace!(key, "Joining in-flight request");
                    future
                }
                None => {
                    let (id, future) = self.register(key, operation());
                    pending.insert(
                        key.to_string(),
                        PendingRequest {
                            future: future.clone(),
                            created_at: Instant::now(),
                            id,
                        },
                    );
                    future
                }
            }
        };

        shared.await
    }

    fn register<Fut>(&self, key: &str, operation: Fut) -> (u64, Shared<BoxFuture<'static, V>>)
    where
        Fut: Future<Output = V> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.executions.fetch_add(1, Ordering::Relaxed);

        let pending = Arc::clone(&self.pending);
        let key = key.to_string();
        let future = async move {
            let outcome = operation.await;
            let mut pending = lock(&pending);
            if pending.get(&key).is_some_and(|request| request.id == id) {
                pending.remove(&key);
            }
            outcome
        }
        .boxed()
        .shared();
        (id, future)
    }

    /// Drop registrations older than the timeout. Returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        self.drop_expired(&mut lock(&self.pending))
    }

    fn drop_expired(&self, pending: &mut HashMap<String, PendingRequest<V>>) -> usize {
        let before = pending.len();
        pending.retain(|key, request| {
            let live = request.created_at.elapsed() < self.request_timeout;
            if !live {
                tracing::debug!(
                    key = %key,
                    timeout_ms = self.request_timeout.as_millis() as u64,
                    "Pending request exceeded timeout, registration dropped"
                );
            }
            live
        });
        let dropped = before - pending.len();
        self.timed_out.fetch_add(dropped as u64, Ordering::Relaxed);
        dropped
    }

    /// Drop the registration for `key` so the next caller starts a fresh
    /// run. Callers already waiting on the old run still get its outcome.
    pub fn forget(&self, key: &str) -> bool {
        lock(&self.pending).remove(key).is_some()
    }

    /// Registrations currently held.
    pub fn pending_count(&self) -> usize {
        lock(&self.pending).len()
    }

    pub fn is_pending(&self, key: &str) -> bool {
        lock(&self.pending)
            .get(key)
            .is_some_and(|request| request.created_at.elapsed() < self.request_timeout)
    }

    pub fn stats(&self) -> DedupStats {
        DedupStats {
            executions: self.executions.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
        }
    }
}

impl<V> std::fmt::Debug for RequestDeduplicator<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestDeduplicator")
            .field("pending", &lock(&self.pending).len())
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

fn lock<V>(
    pending: &Mutex<HashMap<String, PendingRequest<V>>>,
) -> std::sync::MutexGuard<'_, HashMap<String, PendingRequest<V>>> {
    pending.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use tokio::sync::Notify;

    #[tokio::test]
    async fn test_concurrent_callers_share_one_execution() {
        let dedup: Arc<RequestDeduplicator<u32>> = Arc::new(RequestDeduplicator::default());
        let calls = Arc::new(AtomicU32::new(0));
        let release = Arc::new(Notify::new());

        let mut handles = Vec::new();
        for _ in 0..5 {
            let dedup = Arc::clone(&dedup);
            let calls = Arc::clone(&calls);
            let release = Arc::clone(&release);
            handles.push(tokio::spawn(async move {
                dedup
                    .deduplicate("price:AAPL", move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        release.notified().await;
                        150
                    })
                    .await
            }));
        }

        while dedup.stats().coalesced < 4 {
            tokio::task::yield_now().await;
        }
        release.notify_waiters();

        for handle in handles {
            assert_eq!(handle.await.unwrap(), 150);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(dedup.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_registration_removed_after_settling() {
        let dedup: RequestDeduplicator<Result<u32, String>> = RequestDeduplicator::default();

        let first = dedup
            .deduplicate("k", || async { Err("boom".to_string()) })
            .await;
        assert_eq!(first, Err("boom".to_string()));
        assert!(!dedup.is_pending("k"));

        let second = dedup.deduplicate("k", || async { Ok(2) }).await;
        assert_eq!(second, Ok(2));
        assert_eq!(dedup.stats().executions, 2);
    }

    #[tokio::test]
    async fn test_stale_registration_does_not_capture_new_callers() {
        let dedup: Arc<RequestDeduplicator<u32>> = Arc::new(RequestDeduplicator::new(DedupConfig {
            request_timeout: Duration::from_millis(20),
        }));

        let stuck = {
            let dedup = Arc::clone(&dedup);
            tokio::spawn(async move {
                dedup
                    .deduplicate("k", || futures_util::future::pending::<u32>())
                    .await
            })
        };
        while dedup.pending_count() == 0 {
            tokio::task::yield_now().await;
        }

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!dedup.is_pending("k"));

        let fresh = dedup.deduplicate("k", || async { 9 }).await;
        assert_eq!(fresh, 9);
        assert_eq!(dedup.stats().timed_out, 1);
        stuck.abort();
    }

    #[tokio::test]
    async fn test_forget_detaches_new_callers() {
        let dedup: Arc<RequestDeduplicator<u32>> = Arc::new(RequestDeduplicator::default());
        let release = Arc::new(Notify::new());

        let old = {
            let dedup = Arc::clone(&dedup);
            let release = Arc::clone(&release);
            tokio::spawn(async move {
                dedup
                    .deduplicate("k", move || async move {
                        release.notified().await;
                        1
                    })
                    .await
            })
        };
        while !dedup.is_pending("k") {
            tokio::task::yield_now().await;
        }

        assert!(dedup.forget("k"));
        assert!(!dedup.forget("k"));
        assert_eq!(dedup.deduplicate("k", || async { 2 }).await, 2);

        release.notify_one();
        assert_eq!(old.await.unwrap(), 1);
        assert_eq!(dedup.stats().executions, 2);
        assert_eq!(dedup.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_any_call_drops_expired_registrations() {
        let dedup: Arc<RequestDeduplicator<u32>> = Arc::new(RequestDeduplicator::new(DedupConfig {
            request_timeout: Duration::from_millis(20),
        }));
        let stuck = {
            let dedup = Arc::clone(&dedup);
            tokio::spawn(async move {
                dedup
                    .deduplicate("abandoned", || futures_util::future::pending::<u32>())
                    .await
            })
        };
        while dedup.pending_count() == 0 {
            tokio::task::yield_now().await;
        }

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(dedup.deduplicate("other", || async { 5 }).await, 5);
        assert_eq!(dedup.pending_count(), 0);
        assert_eq!(dedup.stats().timed_out, 1);
        stuck.abort();
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let dedup: Arc<RequestDeduplicator<u32>> = Arc::new(RequestDeduplicator::new(DedupConfig {
            request_timeout: Duration::from_millis(10),
        }));
        let stuck = {
            let dedup = Arc::clone(&dedup);
            tokio::spawn(async move {
                dedup
                    .deduplicate("k", || futures_util::future::pending::<u32>())
                    .await
            })
        };
        while dedup.pending_count() == 0 {
            tokio::task::yield_now().await;
        }

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(dedup.purge_expired(), 1);
        assert_eq!(dedup.pending_count(), 0);
        stuck.abort();
    }
}
