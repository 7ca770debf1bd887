//! One circuit breaker per named dependency.

use std::sync::Arc;

use dashmap::DashMap;
use strata_core::{CircuitBreakerConfig, CircuitBreakerState, SharedClock, SystemClock};

use super::circuit_breaker::CircuitBreaker;

/// Shared lookup of breakers keyed by dependency name.
///
/// Every caller asking for the same dependency gets the same breaker, so
/// failures seen by one code path protect all others.
#[derive(Debug, Clone)]
pub struct CircuitBreakerRegistry {
    default_config: CircuitBreakerConfig,
    clock: SharedClock,
    breakers: Arc<DashMap<String, Arc<CircuitBreaker>>>,
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

impl CircuitBreakerRegistry {
    pub fn new(default_config: CircuitBreakerConfig) -> Self {
        Self::with_clock(default_config, SystemClock::shared())
    }

    pub fn with_clock(default_config: CircuitBreakerConfig, clock: SharedClock) -> Self {
        Self {
            default_config,
            clock,
            breakers: Arc::new(DashMap::new()),
        }
    }

    /// Breaker for `dependency`, created with the default config if new.
    pub fn get_or_create(&self, dependency: &str) -> Arc<CircuitBreaker> {
        self.get_or_create_with(dependency, self.default_config.clone())
    }

    /// Breaker for `dependency`, created with `config` if new.
    ///
    /// An existing breaker keeps the config it was created with.
    pub fn get_or_create_with(
        &self,
        dependency: &str,
        config: CircuitBreakerConfig,
    ) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(dependency) {
            return Arc::clone(existing.value());
        }
        let breaker = self
            .breakers
            .entry(dependency.to_string())
            .or_insert_with(|| {
                tracing::debug!(dependency, "Registering circuit breaker");
                Arc::new(CircuitBreaker::with_clock(
                    dependency,
                    config,
                    Arc::clone(&self.clock),
                ))
            });
        Arc::clone(breaker.value())
    }

    pub fn get(&self, dependency: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers
            .get(dependency)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// State of every registered breaker, sorted by dependency name.
    pub fn snapshot(&self) -> Vec<CircuitBreakerState> {
        let mut states: Vec<CircuitBreakerState> = self
            .breakers
            .iter()
            .map(|entry| entry.value().state())
            .collect();
        states.sort_by(|a, b| a.dependency.cmp(&b.dependency));
        states
    }

    /// Close every breaker.
    pub fn reset_all(&self) {
        for entry in self.breakers.iter() {
            entry.value().reset();
        }
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::CircuitState;

    #[test]
    fn test_same_dependency_shares_breaker() {
        let registry = CircuitBreakerRegistry::default();
        let a = registry.get_or_create("lmdb");
        let b = registry.get_or_create("lmdb");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_snapshot_lists_all_dependencies() {
        let registry = CircuitBreakerRegistry::new(CircuitBreakerConfig {
            failure_threshold: 1,
            ..Default::default()
        });
        registry.get_or_create("quotes-api");
        let store = registry.get_or_create("durable-tier");
        store.try_acquire().unwrap().record_failure();

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].dependency, "durable-tier");
        assert_eq!(snapshot[0].state, CircuitState::Open);
        assert_eq!(snapshot[1].state, CircuitState::Closed);

        registry.reset_all();
        assert_eq!(store.current_state(), CircuitState::Closed);
    }
}
