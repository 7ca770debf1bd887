//! Periodic fast-tier sweep.
//!
//! Removes expired entries on a fixed interval so that values nobody reads
//! again do not hold memory until they are evicted. The task runs until the
//! shutdown signal flips to `true` or its sender is dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

use super::fast_tier::FastTier;

// ============================================================================
// METRICS
// ============================================================================

/// Counters for sweep activity.
#[derive(Debug, Default)]
pub struct SweeperMetrics {
    /// Sweep cycles completed
    pub cycles: AtomicU64,

    /// Expired entries removed by sweeps
    pub entries_removed: AtomicU64,
}

impl SweeperMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> SweeperSnapshot {
        SweeperSnapshot {
            cycles: self.cycles.load(Ordering::Relaxed),
            entries_removed: self.entries_removed.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of sweeper metrics at a point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweeperSnapshot {
    pub cycles: u64,
    pub entries_removed: u64,
}

// ============================================================================
// BACKGROUND TASK
// ============================================================================

/// Run one sweep and record it.
pub fn sweep_once<V: Clone + Serialize>(tier: &FastTier<V>, metrics: &SweeperMetrics) -> usize {
    let removed = tier.cleanup();
    metrics.cycles.fetch_add(1, Ordering::Relaxed);
    metrics
        .entries_removed
        .fetch_add(removed as u64, Ordering::Relaxed);

    if removed > 0 {
        tracing::debug!(removed, remaining = tier.len(), "Fast tier sweep removed expired entries");
    } else {
        tracing::trace!("Fast tier sweep found nothing to remove");
    }
    removed
}

/// Sweep `tier` every `every` until shut down.
pub async fn sweep_task<V>(
    tier: Arc<FastTier<V>>,
    every: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
    metrics: Arc<SweeperMetrics>,
) where
    V: Clone + Serialize + Send + Sync + 'static,
{
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick fires immediately
    ticker.tick().await;

    tracing::info!(interval_ms = every.as_millis() as u64, "Fast tier sweeper started");

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }

            _ = ticker.tick() => {
                sweep_once(&tier, &metrics);
            }
        }
    }

    let snapshot = metrics.snapshot();
    tracing::info!(
        cycles = snapshot.cycles,
        entries_removed = snapshot.entries_removed,
        "Fast tier sweeper stopped"
    );
}
