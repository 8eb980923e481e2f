//! Shared default retry policy.
//!
//! A [`PolicyRegistry`] holds one immutable [`RetryPolicy`] behind an `Arc`.
//! Reconfiguring builds a complete new policy and swaps the `Arc`; readers
//! always see either the old or the new policy, never a mix of fields.
//!
//! The process-wide instance behind [`get_default`] and [`configure_default`]
//! is intentional shared state: set it once at startup, read it afterwards.
//! Code that wants explicit wiring can own a `PolicyRegistry` instead.

use std::sync::{Arc, LazyLock, PoisonError, RwLock};

use super::error::PolicyError;
use super::policy::{PolicyOverrides, RetryPolicy};

/// Holder of a replaceable default policy.
///
/// # Examples
///
/// ```rust
/// use dbretry::{PolicyOverrides, PolicyRegistry, RetryPolicy};
///
/// let registry = PolicyRegistry::new(RetryPolicy::default());
/// let before = registry.get();
///
/// registry.configure(&PolicyOverrides::new().max_attempts(5)).unwrap();
///
/// assert_eq!(before.max_attempts(), 3); // old snapshot is untouched
/// assert_eq!(registry.get().max_attempts(), 5);
/// ```
#[derive(Debug)]
pub struct PolicyRegistry {
    current: RwLock<Arc<RetryPolicy>>,
}

static GLOBAL: LazyLock<PolicyRegistry> =
    LazyLock::new(|| PolicyRegistry::new(RetryPolicy::default()));

impl Default for PolicyRegistry {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

impl PolicyRegistry {
    /// Registry starting out with `policy`.
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            current: RwLock::new(Arc::new(policy)),
        }
    }

    /// The process-wide registry.
    pub fn global() -> &'static PolicyRegistry {
        &GLOBAL
    }

    /// Snapshot of the current policy.
    pub fn get(&self) -> Arc<RetryPolicy> {
        // The guarded value is a single Arc, so a poisoned lock still holds a
        // complete policy.
        let guard = self.current.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    /// Replace the policy wholesale. Returns the previous one.
    pub fn replace(&self, policy: RetryPolicy) -> Arc<RetryPolicy> {
        let policy = Arc::new(policy);
        tracing::info!(policy = ?policy.describe(), "default retry policy replaced");
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *guard, policy)
    }

    /// Build a new policy from the current one plus `overrides`, then swap
    /// it in. On validation failure the current policy is kept.
    pub fn configure(&self, overrides: &PolicyOverrides) -> Result<Arc<RetryPolicy>, PolicyError> {
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let policy = Arc::new(overrides.apply_to(&guard)?);
        *guard = Arc::clone(&policy);
        drop(guard);

        tracing::info!(policy = ?policy.describe(), "default retry policy configured");
        Ok(policy)
    }
}

/// Current process-wide default policy.
pub fn get_default() -> Arc<RetryPolicy> {
    PolicyRegistry::global().get()
}

/// Reconfigure the process-wide default, changing only the overridden fields.
///
/// # Examples
///
/// ```rust
/// use dbretry::{configure_default, get_default, PolicyOverrides};
///
/// let base_delay = get_default().base_delay();
/// configure_default(&PolicyOverrides::new().max_attempts(5)).unwrap();
///
/// assert_eq!(get_default().max_attempts(), 5);
/// assert_eq!(get_default().base_delay(), base_delay);
/// ```
pub fn configure_default(overrides: &PolicyOverrides) -> Result<Arc<RetryPolicy>, PolicyError> {
    PolicyRegistry::global().configure(overrides)
}

/// Replace the process-wide default. Returns the previous one.
pub fn set_default(policy: RetryPolicy) -> Arc<RetryPolicy> {
    PolicyRegistry::global().replace(policy)
}

#[cfg(test)]
mod registry_tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_configure_keeps_unnamed_fields() {
        let registry = PolicyRegistry::new(
            RetryPolicy::builder()
                .jitter(0.3)
                .timeout(Some(Duration::from_secs(9)))
                .build()
                .unwrap(),
        );

        let updated = registry
            .configure(&PolicyOverrides::new().max_attempts(5))
            .unwrap();

        assert_eq!(updated.max_attempts(), 5);
        assert_eq!(updated.base_delay(), Duration::from_millis(100));
        assert_eq!(updated.max_delay(), Duration::from_secs(10));
        assert_eq!(updated.jitter(), 0.3);
        assert_eq!(updated.timeout(), Some(Duration::from_secs(9)));
        assert_eq!(registry.get(), updated);
    }

    #[test]
    fn test_invalid_configure_keeps_current_policy() {
        let registry = PolicyRegistry::default();
        let result = registry.configure(&PolicyOverrides::new().jitter(3.0));

        assert_eq!(result, Err(PolicyError::JitterOutOfRange(3.0)));
        assert_eq!(*registry.get(), RetryPolicy::default());
    }

    #[test]
    fn test_replace_returns_previous() {
        let registry = PolicyRegistry::default();
        let next = RetryPolicy::builder().max_attempts(7).build().unwrap();

        let previous = registry.replace(next.clone());
        assert_eq!(*previous, RetryPolicy::default());
        assert_eq!(*registry.get(), next);
    }

    #[test]
    fn test_readers_see_whole_policies_during_swaps() {
        let registry = Arc::new(PolicyRegistry::default());
        let a = RetryPolicy::builder()
            .max_attempts(2)
            .base_delay(Duration::from_millis(20))
            .build()
            .unwrap();
        let b = RetryPolicy::builder()
            .max_attempts(9)
            .base_delay(Duration::from_millis(90))
            .build()
            .unwrap();

        let writer = {
            let registry = Arc::clone(&registry);
            let (a, b) = (a.clone(), b.clone());
            thread::spawn(move || {
                for i in 0..500 {
                    registry.replace(if i % 2 == 0 { a.clone() } else { b.clone() });
                }
            })
        };

        let defaults = RetryPolicy::default();
        for _ in 0..2000 {
            let seen = registry.get();
            assert!(*seen == a || *seen == b || *seen == defaults);
        }
        writer.join().unwrap();
    }
}
