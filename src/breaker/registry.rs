//! Named circuit breakers shared across call sites.
//!
//! Call sites that talk to the same dependency should trip the same
//! breaker, so breakers are looked up by name. The first caller to ask for a
//! name decides its settings; later callers get the existing breaker.

use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock, Mutex, PoisonError};

use super::circuit::{BreakerConfig, CircuitBreaker, CircuitStats};
use super::error::BreakerConfigError;

/// Name-keyed set of circuit breakers.
///
/// # Examples
///
/// ```rust
/// use dbretry::breaker::{BreakerConfig, BreakerRegistry};
/// use std::sync::Arc;
///
/// let registry = BreakerRegistry::new();
/// let a = registry.get_or_create("users-db", BreakerConfig::default()).unwrap();
/// let b = registry
///     .get_or_create("users-db", BreakerConfig::default().with_failure_threshold(1))
///     .unwrap();
///
/// assert!(Arc::ptr_eq(&a, &b));
/// assert_eq!(b.config().failure_threshold(), 5);
/// ```
#[derive(Debug, Default)]
pub struct BreakerRegistry {
    breakers: Mutex<BTreeMap<String, Arc<CircuitBreaker>>>,
}

static GLOBAL: LazyLock<BreakerRegistry> = LazyLock::new(BreakerRegistry::new);

impl BreakerRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry.
    pub fn global() -> &'static BreakerRegistry {
        &GLOBAL
    }

    /// The breaker named `name`, created with `config` if absent.
    ///
    /// `config` is ignored, and not validated, when the breaker already
    /// exists.
    pub fn get_or_create(
        &self,
        name: &str,
        config: BreakerConfig,
    ) -> Result<Arc<CircuitBreaker>, BreakerConfigError> {
        let mut breakers = self.breakers.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = breakers.get(name) {
            return Ok(Arc::clone(existing));
        }

        let breaker = Arc::new(CircuitBreaker::new(name, config)?);
        tracing::debug!(circuit = name, config = ?breaker.config(), "circuit breaker created");
        breakers.insert(name.to_string(), Arc::clone(&breaker));
        Ok(breaker)
    }

    /// The breaker named `name`, if one was created.
    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Stats for every breaker, ordered by name.
    pub fn stats(&self) -> Vec<CircuitStats> {
        let breakers: Vec<_> = self
            .breakers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        breakers.iter().map(|breaker| breaker.stats()).collect()
    }
}

/// The process-wide breaker named `name`, created with `config` if absent.
pub fn circuit_breaker(
    name: &str,
    config: BreakerConfig,
) -> Result<Arc<CircuitBreaker>, BreakerConfigError> {
    BreakerRegistry::global().get_or_create(name, config)
}

#[cfg(test)]
mod registry_tests {
    use super::*;
    use crate::breaker::CircuitState;
    use std::time::Duration;

    #[test]
    fn test_invalid_config_is_not_registered() {
        let registry = BreakerRegistry::new();
        let err = registry
            .get_or_create("db", BreakerConfig::default().with_recovery_timeout(Duration::ZERO))
            .unwrap_err();

        assert_eq!(err, BreakerConfigError::ZeroRecoveryTimeout);
        assert!(registry.get("db").is_none());
    }

    #[test]
    fn test_stats_are_ordered_by_name() {
        let registry = BreakerRegistry::new();
        for name in ["search", "orders", "billing"] {
            registry.get_or_create(name, BreakerConfig::default()).unwrap();
        }

        let stats = registry.stats();
        let names: Vec<_> = stats.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["billing", "orders", "search"]);
        assert!(stats.iter().all(|s| s.state == CircuitState::Closed));
    }

    #[test]
    fn test_global_registry_shares_breakers() {
        let a = circuit_breaker("registry-tests-shared", BreakerConfig::default()).unwrap();
        let b = BreakerRegistry::global()
            .get("registry-tests-shared")
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
