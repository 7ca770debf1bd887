//! Circuit breaker for one protected dependency.
//!
//! ```text
//! CLOSED --failure_threshold failures--> OPEN
//! OPEN   --open_timeout elapsed, next call--> HALF_OPEN
//! HALF_OPEN --any failure--> OPEN
//! HALF_OPEN --success_threshold successes--> CLOSED
//! ```
//!
//! While half-open at most `half_open_max_calls` trials run at once. Every
//! transition bumps a generation counter, and outcomes reported against an
//! older generation are ignored, so a slow call admitted before the circuit
//! opened cannot close it again.
//!
//! The state lock is never held across an await.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use strata_core::{
    elapsed_between, CircuitBreakerConfig, CircuitBreakerState, CircuitState, ResilienceError,
    SharedClock, StrataError, SystemClock, Timestamp,
};

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    last_failure_at: Option<Timestamp>,
    last_state_change_at: Timestamp,
    half_open_in_flight: u32,
    generation: u64,
    total_opens: u64,
    total_rejections: u64,
}

/// Admission ticket for one call.
///
/// Dropping an unsettled ticket (the caller's future was cancelled) releases
/// its half-open trial slot without counting as a success or failure.
#[must_use = "a permit must be settled with record_success or record_failure"]
pub struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    trial: bool,
    settled: bool,
}

impl CallPermit<'_> {
    /// Whether this call is a half-open trial.
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn record_success(mut self) {
        self.settled = true;
        self.breaker.on_success(self.generation, self.trial);
    }

    pub fn record_failure(mut self) {
        self.settled = true;
        self.breaker.on_failure(self.generation, self.trial);
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.trial {
            self.breaker.release_trial(self.generation);
        }
    }
}

/// Circuit breaker guarding calls to one dependency.
pub struct CircuitBreaker {
    dependency: String,
    config: CircuitBreakerConfig,
    clock: SharedClock,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(dependency: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self::with_clock(dependency, config, SystemClock::shared())
    }

    pub fn with_clock(
        dependency: impl Into<String>,
        config: CircuitBreakerConfig,
        clock: SharedClock,
    ) -> Self {
        let now = clock.now();
        Self {
            dependency: dependency.into(),
            config,
            clock,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                last_failure_at: None,
                last_state_change_at: now,
                half_open_in_flight: 0,
                generation: 0,
                total_opens: 0,
                total_rejections: 0,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn dependency(&self) -> &str {
        &self.dependency
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Run `operation` through the breaker.
    ///
    /// Rejected calls never invoke `operation` and return
    /// [`ResilienceError::CircuitOpen`] or [`ResilienceError::HalfOpenSaturated`]
    /// converted into `E`. Any `Err` from `operation` counts as a failure.
    pub async fn execute<F, Fut, R, E>(&self, operation: F) -> Result<R, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<R, E>>,
        E: From<StrataError>,
    {
        let permit = self
            .try_acquire()
            .map_err(|e| E::from(StrataError::from(e)))?;

        match operation().await {
            Ok(value) => {
                permit.record_success();
                Ok(value)
            }
            Err(e) => {
                permit.record_failure();
                Err(e)
            }
        }
    }

    /// Ask to make one call.
    pub fn try_acquire(&self) -> Result<CallPermit<'_>, ResilienceError> {
        let now = self.clock.now();
        let mut inner = self.lock();

        if inner.state == CircuitState::Open {
            let open_for = elapsed_between(inner.last_state_change_at, now);
            if open_for < self.config.open_timeout {
                inner.total_rejections += 1;
                let retry_after = self.config.open_timeout.saturating_sub(open_for);
                return Err(ResilienceError::CircuitOpen {
                    dependency: self.dependency.clone(),
                    retry_after_ms: duration_ms(retry_after),
                });
            }
            self.transition(&mut inner, CircuitState::HalfOpen, now);
        }

        match inner.state {
            CircuitState::Closed => Ok(CallPermit {
                breaker: self,
                generation: inner.generation,
                trial: false,
                settled: false,
            }),
            CircuitState::HalfOpen if inner.half_open_in_flight < self.config.half_open_max_calls => {
                inner.half_open_in_flight += 1;
                Ok(CallPermit {
                    breaker: self,
                    generation: inner.generation,
                    trial: true,
                    settled: false,
                })
            }
            _ => {
                inner.total_rejections += 1;
                Err(ResilienceError::HalfOpenSaturated {
                    dependency: self.dependency.clone(),
                })
            }
        }
    }

    fn on_success(&self, generation: u64, trial: bool) {
        let now = self.clock.now();
        let mut inner = self.lock();
        if inner.generation != generation {
            return;
        }

        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                if trial {
                    inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
                }
                inner.consecutive_successes += 1;
                if inner.consecutive_successes >= self.config.success_threshold {
                    self.transition(&mut inner, CircuitState::Closed, now);
                }
            }
            CircuitState::Open => {}
        }
    }

    fn on_failure(&self, generation: u64, trial: bool) {
        let now = self.clock.now();
        let mut inner = self.lock();
        if inner.generation != generation {
            return;
        }
        inner.last_failure_at = Some(now);

        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    self.transition(&mut inner, CircuitState::Open, now);
                }
            }
            CircuitState::HalfOpen => {
                if trial {
                    inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
                }
                inner.consecutive_failures += 1;
                self.transition(&mut inner, CircuitState::Open, now);
            }
            CircuitState::Open => {}
        }
    }

    fn release_trial(&self, generation: u64) {
        let mut inner = self.lock();
        if inner.generation == generation && inner.state == CircuitState::HalfOpen {
            inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
        }
    }

    fn transition(&self, inner: &mut BreakerInner, to: CircuitState, now: Timestamp) {
        let from = inner.state;
        inner.state = to;
        inner.last_state_change_at = now;
        inner.generation += 1;
        inner.half_open_in_flight = 0;
        inner.consecutive_successes = 0;

        match to {
            CircuitState::Open => {
                inner.total_opens += 1;
                tracing::warn!(
                    dependency = %self.dependency,
                    from = %from,
                    consecutive_failures = inner.consecutive_failures,
                    open_timeout_ms = duration_ms(self.config.open_timeout),
                    "Circuit opened"
                );
            }
            CircuitState::HalfOpen => {
                tracing::info!(
                    dependency = %self.dependency,
                    from = %from,
                    "Circuit half-open, admitting trial calls"
                );
            }
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
                tracing::info!(
                    dependency = %self.dependency,
                    from = %from,
                    "Circuit closed"
                );
            }
        }
    }

    /// Snapshot for monitoring.
    pub fn state(&self) -> CircuitBreakerState {
        let inner = self.lock();
        CircuitBreakerState {
            dependency: self.dependency.clone(),
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            consecutive_successes: inner.consecutive_successes,
            last_failure_at: inner.last_failure_at,
            last_state_change_at: inner.last_state_change_at,
            total_opens: inner.total_opens,
            total_rejections: inner.total_rejections,
        }
    }

    /// Current state without the rest of the snapshot.
    pub fn current_state(&self) -> CircuitState {
        self.lock().state
    }

    /// Force the breaker back to CLOSED with cleared counters.
    ///
    /// Calls still in flight when this runs report against a stale generation
    /// and are ignored.
    pub fn reset(&self) {
        let now = self.clock.now();
        let mut inner = self.lock();
        inner.consecutive_failures = 0;
        inner.last_failure_at = None;
        if inner.state == CircuitState::Closed {
            inner.generation += 1;
            inner.consecutive_successes = 0;
        } else {
            self.transition(&mut inner, CircuitState::Closed, now);
        }
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("CircuitBreaker")
            .field("dependency", &self.dependency)
            .field("state", &inner.state)
            .field("consecutive_failures", &inner.consecutive_failures)
            .field("consecutive_successes", &inner.consecutive_successes)
            .finish()
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use strata_core::{ManualClock, StrataResult};

    fn breaker(clock: Arc<ManualClock>) -> CircuitBreaker {
        CircuitBreaker::with_clock(
            "quotes-api",
            CircuitBreakerConfig {
                failure_threshold: 5,
                success_threshold: 3,
                open_timeout: Duration::from_secs(30),
                half_open_max_calls: 1,
            },
            clock,
        )
    }

    async fn fail(breaker: &CircuitBreaker) -> StrataResult<()> {
        breaker
            .execute(|| async { Err(StrataError::source("quotes-api", "503")) })
            .await
    }

    async fn succeed(breaker: &CircuitBreaker) -> StrataResult<u32> {
        breaker.execute(|| async { Ok(7) }).await
    }

    #[tokio::test]
    async fn test_opens_after_threshold_and_rejects_without_calling() {
        let clock = Arc::new(ManualClock::starting_now());
        let breaker = breaker(clock.clone());

        for _ in 0..4 {
            assert!(fail(&breaker).await.is_err());
            assert_eq!(breaker.current_state(), CircuitState::Closed);
        }
        assert!(fail(&breaker).await.is_err());
        assert_eq!(breaker.current_state(), CircuitState::Open);

        let calls = AtomicU32::new(0);
        let result: StrataResult<()> = breaker
            .execute(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;

        assert!(matches!(
            result,
            Err(StrataError::Resilience(ResilienceError::CircuitOpen { .. }))
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(breaker.state().total_rejections, 1);
        assert_eq!(breaker.state().total_opens, 1);
    }

    #[tokio::test]
    async fn test_retry_after_reflects_remaining_cooldown() {
        let clock = Arc::new(ManualClock::starting_now());
        let breaker = breaker(clock.clone());
        for _ in 0..5 {
            let _ = fail(&breaker).await;
        }

        clock.advance_secs(10);
        match succeed(&breaker).await {
            Err(StrataError::Resilience(ResilienceError::CircuitOpen {
                retry_after_ms, ..
            })) => assert_eq!(retry_after_ms, 20_000),
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_half_open_closes_after_success_threshold() {
        let clock = Arc::new(ManualClock::starting_now());
        let breaker = breaker(clock.clone());
        for _ in 0..5 {
            let _ = fail(&breaker).await;
        }

        clock.advance_secs(30);
        assert_eq!(succeed(&breaker).await.unwrap(), 7);
        assert_eq!(breaker.current_state(), CircuitState::HalfOpen);
        assert_eq!(succeed(&breaker).await.unwrap(), 7);
        assert_eq!(breaker.current_state(), CircuitState::HalfOpen);
        assert_eq!(succeed(&breaker).await.unwrap(), 7);

        let state = breaker.state();
        assert_eq!(state.state, CircuitState::Closed);
        assert_eq!(state.consecutive_failures, 0);
        assert_eq!(state.consecutive_successes, 0);
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens_and_restarts_cooldown() {
        let clock = Arc::new(ManualClock::starting_now());
        let breaker = breaker(clock.clone());
        for _ in 0..5 {
            let _ = fail(&breaker).await;
        }

        clock.advance_secs(30);
        assert!(succeed(&breaker).await.is_ok());
        assert!(fail(&breaker).await.is_err());
        assert_eq!(breaker.current_state(), CircuitState::Open);
        assert_eq!(breaker.state().total_opens, 2);

        clock.advance_secs(29);
        assert!(succeed(&breaker).await.is_err());
        clock.advance_secs(1);
        assert!(succeed(&breaker).await.is_ok());
        assert_eq!(breaker.current_state(), CircuitState::HalfOpen);
    }

    #[test]
    fn test_half_open_bounds_concurrent_trials() {
        let clock = Arc::new(ManualClock::starting_now());
        let breaker = breaker(clock.clone());
        for _ in 0..5 {
            breaker.try_acquire().unwrap().record_failure();
        }
        clock.advance_secs(30);

        let first = breaker.try_acquire().unwrap();
        assert!(first.is_trial());
        assert!(matches!(
            breaker.try_acquire(),
            Err(ResilienceError::HalfOpenSaturated { .. })
        ));

        // Cancelled trial frees its slot
        drop(first);
        let second = breaker.try_acquire().unwrap();
        second.record_success();
        assert!(breaker.try_acquire().is_ok());
    }

    #[test]
    fn test_success_in_closed_resets_failures() {
        let clock = Arc::new(ManualClock::starting_now());
        let breaker = breaker(clock);
        for _ in 0..4 {
            breaker.try_acquire().unwrap().record_failure();
        }
        breaker.try_acquire().unwrap().record_success();
        assert_eq!(breaker.state().consecutive_failures, 0);

        for _ in 0..4 {
            breaker.try_acquire().unwrap().record_failure();
        }
        assert_eq!(breaker.current_state(), CircuitState::Closed);
    }

    #[test]
    fn test_late_success_from_previous_period_is_ignored() {
        let clock = Arc::new(ManualClock::starting_now());
        let breaker = breaker(clock);

        let slow = breaker.try_acquire().unwrap();
        for _ in 0..5 {
            breaker.try_acquire().unwrap().record_failure();
        }
        assert_eq!(breaker.current_state(), CircuitState::Open);

        slow.record_success();
        let state = breaker.state();
        assert_eq!(state.state, CircuitState::Open);
        assert_eq!(state.consecutive_failures, 5);
    }

    #[test]
    fn test_reset_closes_circuit() {
        let clock = Arc::new(ManualClock::starting_now());
        let breaker = breaker(clock);
        for _ in 0..5 {
            breaker.try_acquire().unwrap().record_failure();
        }
        breaker.reset();

        let state = breaker.state();
        assert_eq!(state.state, CircuitState::Closed);
        assert_eq!(state.consecutive_failures, 0);
        assert!(state.last_failure_at.is_none());
        assert!(breaker.try_acquire().is_ok());
    }
}
