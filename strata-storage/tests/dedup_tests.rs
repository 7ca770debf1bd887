//! Concurrent request coalescing.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use strata_core::{DedupConfig, StrataError, StrataResult};
use strata_storage::RequestDeduplicator;
use tokio::sync::Notify;

#[tokio::test]
async fn test_concurrent_callers_share_one_execution() {
    let dedup: RequestDeduplicator<u32> = RequestDeduplicator::default();
    let calls = Arc::new(AtomicUsize::new(0));

    let callers = (0..10).map(|_| {
        let calls = Arc::clone(&calls);
        dedup.deduplicate("price:AAPL", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            42
        })
    });
    let results = join_all(callers).await;

    assert_eq!(results, vec![42; 10]);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let stats = dedup.stats();
    assert_eq!(stats.executions, 1);
    assert_eq!(stats.coalesced, 9);
    assert_eq!(dedup.pending_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_coalesces_across_worker_threads() {
    let dedup: Arc<RequestDeduplicator<StrataResult<u32>>> =
        Arc::new(RequestDeduplicator::default());
    let release = Arc::new(Notify::new());
    let calls = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let dedup = Arc::clone(&dedup);
        let release = Arc::clone(&release);
        let calls = Arc::clone(&calls);
        handles.push(tokio::spawn(async move {
            dedup
                .deduplicate("k", move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    release.notified().await;
                    Err(StrataError::source("quotes-api", "503"))
                })
                .await
        }));
    }

    while dedup.stats().coalesced < 7 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    release.notify_one();

    for handle in handles {
        let result = handle.await.unwrap();
        assert_eq!(result, Err(StrataError::source("quotes-api", "503")));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_sequential_calls_execute_again() {
    let dedup: RequestDeduplicator<usize> = RequestDeduplicator::default();
    let calls = Arc::new(AtomicUsize::new(0));

    for expected in 1..=3 {
        let calls = Arc::clone(&calls);
        let seen = dedup
            .deduplicate("k", move || async move { calls.fetch_add(1, Ordering::SeqCst) + 1 })
            .await;
        assert_eq!(seen, expected);
    }
    assert_eq!(dedup.stats().coalesced, 0);
}

#[tokio::test]
async fn test_distinct_keys_do_not_coalesce() {
    let dedup: RequestDeduplicator<String> = RequestDeduplicator::default();
    let (a, b) = tokio::join!(
        dedup.deduplicate("a", || async { "a".to_string() }),
        dedup.deduplicate("b", || async { "b".to_string() }),
    );
    assert_eq!((a.as_str(), b.as_str()), ("a", "b"));
    assert_eq!(dedup.stats().executions, 2);
}

#[tokio::test]
async fn test_stuck_registration_stops_capturing_after_timeout() {
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
    while !dedup.is_pending("k") {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    tokio::time::sleep(Duration::from_millis(30)).await;
    let value = dedup.deduplicate("k", || async { 5 }).await;
    assert_eq!(value, 5);
    assert_eq!(dedup.stats().timed_out, 1);

    stuck.abort();
}
