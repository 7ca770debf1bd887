//! End-to-end cache manager timelines driven by a manual clock.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

use strata_core::{CacheConfig, CacheManagerConfig, CircuitState, HealthStatus, Provenance};
use strata_storage::{CacheManager, LmdbStore};
use strata_test_utils::{init_test_tracing, Harness, ManualClock, Quote};

fn aapl(price: u32) -> Quote {
    Quote::new("AAPL", price)
}

#[tokio::test]
async fn test_fast_then_durable_then_promoted_timeline() {
    init_test_tracing();
    let h = Harness::new();
    let config = CacheConfig::new(60).with_durable_ttl(120).with_namespace("price");
    h.manager.set("AAPL", &aapl(150), &config).await.unwrap();

    h.advance_secs(30);
    let lookup = h.manager.get::<Quote>("AAPL", &config).await.unwrap();
    assert_eq!(lookup.data, Some(aapl(150)));
    assert_eq!(lookup.provenance, Some(Provenance::Fast));

    h.advance_secs(35);
    let lookup = h.manager.get::<Quote>("AAPL", &config).await.unwrap();
    assert_eq!(lookup.data, Some(aapl(150)));
    assert_eq!(lookup.provenance, Some(Provenance::Durable));

    h.advance_secs(1);
    let lookup = h.manager.get::<Quote>("AAPL", &config).await.unwrap();
    assert_eq!(lookup.data, Some(aapl(150)));
    assert_eq!(lookup.provenance, Some(Provenance::Fast));

    let stats = h.manager.get_stats();
    assert_eq!(stats.fast_hits, 2);
    assert_eq!(stats.durable_hits, 1);
    assert_eq!(stats.promotions, 1);
}

#[tokio::test]
async fn test_stale_value_served_then_refreshed_in_background() {
    init_test_tracing();
    let h = Harness::new();
    let config = CacheConfig::new(60)
        .with_stale_while_revalidate(30)
        .with_namespace("price");
    h.manager.set("AAPL", &aapl(150), &config).await.unwrap();

    h.advance_secs(75);
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let lookup = h
        .manager
        .get_with_stale_revalidate("AAPL", &config, move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Some(aapl(155)))
        })
        .await
        .unwrap();

    assert_eq!(lookup.data, Some(aapl(150)));
    assert!(lookup.is_stale);
    assert_eq!(lookup.provenance, Some(Provenance::Durable));

    h.manager.wait_for_background().await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let lookup = h.manager.get::<Quote>("AAPL", &config).await.unwrap();
    assert_eq!(lookup.data, Some(aapl(155)));
    assert_eq!(lookup.provenance, Some(Provenance::Fast));
    assert!(!lookup.is_stale);
    assert_eq!(h.manager.get_stats().background_refreshes, 1);
}

#[tokio::test]
async fn test_one_refresh_per_stale_key() {
    let h = Harness::new();
    let config = CacheConfig::new(60).with_stale_while_revalidate(30);
    h.manager.set("k", &aapl(1), &config).await.unwrap();
    h.advance_secs(75);

    let calls = Arc::new(AtomicUsize::new(0));
    for _ in 0..3 {
        let counter = Arc::clone(&calls);
        let lookup = h
            .manager
            .get_with_stale_revalidate("k", &config, move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Some(aapl(2)))
            })
            .await
            .unwrap();
        assert!(lookup.is_hit());
    }

    h.manager.wait_for_background().await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.manager.background_refreshes_in_flight(), 0);
}

#[tokio::test]
async fn test_refresh_cap_serves_stale_without_spawning() {
    let mut config = CacheManagerConfig::development();
    config.max_background_refreshes = 1;
    let h = Harness::with_config(config);
    let cache = CacheConfig::new(60).with_stale_while_revalidate(30);
    h.manager.set("a", &aapl(1), &cache).await.unwrap();
    h.manager.set("b", &aapl(1), &cache).await.unwrap();
    h.advance_secs(75);

    let release = Arc::new(Notify::new());
    let held = Arc::clone(&release);
    let lookup = h
        .manager
        .get_with_stale_revalidate("a", &cache, move || async move {
            held.notified().await;
            Ok(Some(aapl(2)))
        })
        .await
        .unwrap();
    assert!(lookup.is_stale);

    let b_calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&b_calls);
    let lookup = h
        .manager
        .get_with_stale_revalidate("b", &cache, move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Some(aapl(3)))
        })
        .await
        .unwrap();
    assert_eq!(lookup.data, Some(aapl(1)));
    assert!(lookup.is_stale);
    assert_eq!(h.manager.get_stats().background_refreshes, 1);

    release.notify_one();
    h.manager.wait_for_background().await;
    assert_eq!(b_calls.load(Ordering::SeqCst), 0);
    assert_eq!(
        h.manager.get::<Quote>("a", &cache).await.unwrap().data,
        Some(aapl(2))
    );
    assert_eq!(
        h.manager.get::<Quote>("b", &cache).await.unwrap().data,
        Some(aapl(1))
    );
}

#[tokio::test(start_paused = true)]
async fn test_hung_refresh_times_out_and_frees_capacity() {
    let mut config = CacheManagerConfig::development();
    config.max_background_refreshes = 1;
    config.source_timeout = Duration::from_secs(2);
    let h = Harness::with_config(config);
    let cache = CacheConfig::new(60).with_stale_while_revalidate(30);
    h.manager.set("a", &aapl(1), &cache).await.unwrap();
    h.manager.set("b", &aapl(1), &cache).await.unwrap();
    h.advance_secs(75);

    h.manager
        .get_with_stale_revalidate("a", &cache, || {
            futures_util::future::pending::<strata_core::StrataResult<Option<Quote>>>()
        })
        .await
        .unwrap();
    h.manager.wait_for_background().await;

    let stats = h.manager.get_stats();
    assert_eq!(stats.background_refresh_failures, 1);
    assert_eq!(h.manager.background_refreshes_in_flight(), 0);

    let b_calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&b_calls);
    h.manager
        .get_with_stale_revalidate("b", &cache, move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Some(aapl(3)))
        })
        .await
        .unwrap();
    h.manager.wait_for_background().await;

    assert_eq!(b_calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        h.manager.get::<Quote>("b", &cache).await.unwrap().data,
        Some(aapl(3))
    );
    // The stale value for "a" is still served
    assert_eq!(
        h.manager.get::<Quote>("a", &cache).await.unwrap().data,
        Some(aapl(1))
    );
}

#[tokio::test]
async fn test_delete_during_refresh_drops_refreshed_value() {
    let h = Harness::new();
    let config = CacheConfig::new(60).with_stale_while_revalidate(30);
    h.manager.set("k", &aapl(1), &config).await.unwrap();
    h.advance_secs(75);

    let release = Arc::new(Notify::new());
    let held = Arc::clone(&release);
    h.manager
        .get_with_stale_revalidate("k", &config, move || async move {
            held.notified().await;
            Ok(Some(aapl(2)))
        })
        .await
        .unwrap();

    assert!(h.manager.delete("k", &config).await.unwrap());
    release.notify_one();
    h.manager.wait_for_background().await;

    assert!(h.manager.get::<Quote>("k", &config).await.unwrap().is_miss());
    assert!(h.store.backing().is_empty());
    let stats = h.manager.get_stats();
    assert_eq!(stats.superseded_fills, 1);
    assert_eq!(stats.background_refresh_failures, 0);
}

#[tokio::test]
async fn test_failed_refresh_is_not_surfaced() {
    let h = Harness::new();
    let config = CacheConfig::new(60).with_stale_while_revalidate(30);
    h.manager.set("k", &aapl(1), &config).await.unwrap();
    h.advance_secs(75);

    let lookup = h
        .manager
        .get_with_stale_revalidate::<Quote, _, _>("k", &config, || async {
            Err(strata_core::StrataError::source("quotes-api", "503"))
        })
        .await
        .unwrap();
    assert_eq!(lookup.data, Some(aapl(1)));

    h.manager.wait_for_background().await;
    assert_eq!(h.manager.get_stats().background_refresh_failures, 1);
    // The stale value is still there for the next reader
    let lookup = h.manager.get::<Quote>("k", &config).await.unwrap();
    assert_eq!(lookup.data, Some(aapl(1)));
}

#[tokio::test]
async fn test_fresh_value_does_not_trigger_refresh() {
    let h = Harness::new();
    let config = CacheConfig::new(60).with_stale_while_revalidate(30);
    h.manager.set("k", &aapl(1), &config).await.unwrap();
    h.advance_secs(10);

    let lookup = h
        .manager
        .get_with_stale_revalidate::<Quote, _, _>("k", &config, || async {
            panic!("fresh values are not revalidated")
        })
        .await
        .unwrap();
    assert!(!lookup.is_stale);
    h.manager.wait_for_background().await;
    assert_eq!(h.manager.get_stats().background_refreshes, 0);
}

#[tokio::test]
async fn test_get_after_ttl_is_miss_in_both_tiers() {
    let h = Harness::new();
    let config = CacheConfig::new(10);
    h.manager.set("k", &aapl(1), &config).await.unwrap();

    h.advance_secs(11);
    let lookup = h.manager.get::<Quote>("k", &config).await.unwrap();
    assert!(lookup.is_miss());
    assert_eq!(lookup.provenance, None);
}

#[tokio::test]
async fn test_eviction_keeps_tier_below_capacity() {
    let h = Harness::with_max_entries(100);
    let config = CacheConfig::new(600);
    for i in 0..100 {
        h.manager.set(&format!("k{i}"), &i, &config).await.unwrap();
        h.clock.advance(Duration::from_millis(10));
    }
    assert_eq!(h.manager.fast_tier().len(), 100);

    h.manager.set("newest", &1000, &config).await.unwrap();
    let len = h.manager.fast_tier().len();
    assert!(len < 100, "fast tier still holds {len} entries");
    assert!(len <= 76);
    assert!(h.manager.fast_tier().contains("newest"));
    // The oldest entries went first
    assert!(!h.manager.fast_tier().contains("k0"));
    assert!(h.manager.fast_tier().contains("k99"));
    assert!(h.manager.get_stats().evictions >= 25);
}

#[tokio::test]
async fn test_clear_namespace_leaves_other_namespaces() {
    let h = Harness::new();
    let price = CacheConfig::new(60).with_namespace("price");
    let news = CacheConfig::new(60).with_namespace("news");
    h.manager.set("AAPL", &aapl(150), &price).await.unwrap();
    h.manager.set("MSFT", &aapl(300), &price).await.unwrap();
    h.manager.set("AAPL", &"headline", &news).await.unwrap();

    assert_eq!(
        h.manager.list_keys("price").await.unwrap(),
        vec!["price:AAPL".to_string(), "price:MSFT".to_string()]
    );

    let report = h.manager.clear_namespace("price").await.unwrap();
    assert_eq!(report.fast_removed, 2);
    assert_eq!(report.durable_removed, 2);

    assert!(h.manager.list_keys("price").await.unwrap().is_empty());
    assert_eq!(
        h.manager.list_keys("news").await.unwrap(),
        vec!["news:AAPL".to_string()]
    );
    let lookup = h.manager.get::<String>("AAPL", &news).await.unwrap();
    assert_eq!(lookup.data.as_deref(), Some("headline"));

    let report = h.manager.clear_all().await.unwrap();
    assert_eq!(report.fast_removed, 1);
    assert!(h.store.backing().is_empty());
}

#[tokio::test]
async fn test_list_keys_falls_back_to_fast_tier() {
    let h = Harness::new();
    let config = CacheConfig::new(60).with_namespace("price");
    h.manager.set("AAPL", &aapl(150), &config).await.unwrap();

    h.store.fail_writes(true);
    assert_eq!(
        h.manager.list_keys("price").await.unwrap(),
        vec!["price:AAPL".to_string()]
    );
    assert!(h.manager.clear_namespace("price").await.is_err());
}

#[tokio::test]
async fn test_durable_outage_is_a_miss_and_opens_breaker() {
    init_test_tracing();
    let h = Harness::new();
    let config = CacheConfig::new(60).with_namespace("price");
    h.store.set_down(true);

    // Writes still succeed while the durable tier is down
    h.manager.set("AAPL", &aapl(150), &config).await.unwrap();
    let lookup = h.manager.get::<Quote>("AAPL", &config).await.unwrap();
    assert_eq!(lookup.provenance, Some(Provenance::Fast));
    assert_eq!(h.manager.get_stats().durable_write_failures, 1);

    for symbol in ["MSFT", "GOOG"] {
        let lookup = h.manager.get::<Quote>(symbol, &config).await.unwrap();
        assert!(lookup.is_miss());
    }
    assert_eq!(h.manager.circuit_breaker_state().state, CircuitState::Open);
    assert_eq!(h.manager.health().status, HealthStatus::Degraded);

    // Rejected without reaching the store
    let reads = h.store.calls().reads;
    let lookup = h.manager.get::<Quote>("TSLA", &config).await.unwrap();
    assert!(lookup.is_miss());
    assert_eq!(h.store.calls().reads, reads);

    // Recovery after the open timeout
    h.store.set_down(false);
    h.advance_secs(6);
    assert!(h.manager.get::<Quote>("TSLA", &config).await.unwrap().is_miss());
    assert_eq!(h.manager.circuit_breaker_state().state, CircuitState::Closed);
    assert!(h.manager.health().is_healthy());
}

#[tokio::test]
async fn test_durable_delete_failure_still_clears_fast_tier() {
    let h = Harness::new();
    let config = CacheConfig::new(60);
    h.manager.set("k", &aapl(1), &config).await.unwrap();

    h.store.fail_writes(true);
    assert!(h.manager.delete("k", &config).await.is_err());
    assert!(!h.manager.fast_tier().contains("k"));
}

#[tokio::test]
async fn test_newer_local_write_survives_concurrent_promotion() {
    let h = Harness::new();
    let config = CacheConfig::new(60).with_durable_ttl(120);
    h.manager.set("k", &aapl(1), &config).await.unwrap();
    h.advance_secs(65);

    h.store.set_delay(Some(Duration::from_millis(50)));
    let reader = {
        let manager = h.manager.clone();
        let config = config.clone();
        tokio::spawn(async move { manager.get::<Quote>("k", &config).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    // Lands in the fast tier while the durable read is in flight
    h.manager.fast_tier().set("k", serde_json::json!(aapl(2)), 60).unwrap();

    let lookup = reader.await.unwrap().unwrap();
    assert_eq!(lookup.provenance, Some(Provenance::Durable));
    assert_eq!(h.manager.fast_tier().get("k"), Some(serde_json::json!(aapl(2))));
}

#[tokio::test]
async fn test_sweeper_runs_until_shutdown() {
    let mut config = CacheManagerConfig::development();
    config.cleanup_interval = Some(Duration::from_millis(5));
    let h = Harness::with_config(config);
    h.manager.set("k", &1, &CacheConfig::new(1)).await.unwrap();
    h.advance_secs(2);

    while h.manager.get_stats().sweep_cycles == 0 {
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    assert!(h.manager.fast_tier().is_empty());
    assert_eq!(h.manager.get_stats().sweep_entries_removed, 1);

    h.manager.shutdown().await;
    assert_eq!(h.manager.health().status, HealthStatus::Unhealthy);
    // Reads keep working after shutdown
    assert!(h.manager.get::<u32>("k", &CacheConfig::new(1)).await.unwrap().is_miss());
}

#[tokio::test]
async fn test_no_refresh_after_shutdown() {
    let h = Harness::new();
    let config = CacheConfig::new(60).with_stale_while_revalidate(30);
    h.manager.set("k", &aapl(1), &config).await.unwrap();
    h.advance_secs(75);
    h.manager.shutdown().await;

    let lookup = h
        .manager
        .get_with_stale_revalidate::<Quote, _, _>("k", &config, || async {
            Ok(Some(aapl(2)))
        })
        .await
        .unwrap();
    assert!(lookup.is_stale);
    h.manager.wait_for_background().await;
    assert_eq!(h.manager.get_stats().background_refreshes, 0);
}

#[tokio::test]
async fn test_lmdb_durable_tier_serves_after_fast_tier_loss() {
    let dir = tempfile::TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::starting_now());
    let store = Arc::new(LmdbStore::with_clock(dir.path(), 16, clock.clone()).unwrap());
    let manager =
        CacheManager::with_clock(store, CacheManagerConfig::development(), clock.clone()).unwrap();
    let config = CacheConfig::new(60).with_namespace("price");

    manager.set("AAPL", &aapl(150), &config).await.unwrap();
    manager.fast_tier().clear();

    let lookup = manager.get::<Quote>("AAPL", &config).await.unwrap();
    assert_eq!(lookup.data, Some(aapl(150)));
    assert_eq!(lookup.provenance, Some(Provenance::Durable));
    assert_eq!(manager.list_keys("price").await.unwrap(), vec!["price:AAPL".to_string()]);
}
