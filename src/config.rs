//! Startup configuration for the default retry policy.
//!
//! Settings come from `RETRY_*` environment variables (or any deserializable
//! source) and are applied once, at boot, to the process-wide registry.
//!
//! ```rust
//! use dbretry::config::RetrySettings;
//!
//! let settings = RetrySettings::from_lookup(|name| match name {
//!     "RETRY_MAX_ATTEMPTS" => Some("5".to_string()),
//!     "RETRY_TIMEOUT" => Some("30".to_string()),
//!     _ => None,
//! })
//! .unwrap();
//!
//! assert_eq!(settings.max_attempts, 5);
//! assert_eq!(settings.base_delay, 0.1);
//! assert_eq!(settings.timeout, Some(30.0));
//! ```

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::retry::{PolicyError, PolicyOverrides, PolicyRegistry, RetryPolicy};

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "RETRY_";

/// Failure while reading or applying retry settings.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    /// A variable was set but could not be parsed.
    #[error("{name}: cannot parse {value:?}")]
    Unparsable {
        /// Variable name.
        name: String,
        /// Raw value.
        value: String,
    },
    /// A duration in seconds was negative, NaN, or infinite.
    #[error("{name}: {value} is not a valid number of seconds")]
    InvalidSeconds {
        /// Setting name.
        name: &'static str,
        /// Offending value.
        value: f64,
    },
    /// The resulting policy failed validation.
    #[error(transparent)]
    Policy(#[from] PolicyError),
}

/// Retry settings as read from configuration. Durations are in seconds.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub base_delay: f64,
    /// Cap on the computed delay.
    pub max_delay: f64,
    /// Jitter fraction.
    pub jitter: f64,
    /// Overall budget; unset means unbounded.
    pub timeout: Option<f64>,
}

impl Default for RetrySettings {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts(),
            base_delay: policy.base_delay().as_secs_f64(),
            max_delay: policy.max_delay().as_secs_f64(),
            jitter: policy.jitter(),
            timeout: policy.timeout().map(|t| t.as_secs_f64()),
        }
    }
}

fn lookup_parsed<T, L>(lookup: &L, key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    L: Fn(&str) -> Option<String>,
{
    let name = format!("{}{}", ENV_PREFIX, key);
    match lookup(&name) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Unparsable { name, value: raw }),
    }
}

fn seconds(name: &'static str, value: f64) -> Result<Duration, ConfigError> {
    Duration::try_from_secs_f64(value).map_err(|_| ConfigError::InvalidSeconds { name, value })
}

impl RetrySettings {
    /// Read `RETRY_MAX_ATTEMPTS`, `RETRY_BASE_DELAY`, `RETRY_MAX_DELAY`,
    /// `RETRY_JITTER` and `RETRY_TIMEOUT` from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Like [`from_env`](Self::from_env) with a custom variable source.
    /// Unset or blank variables keep their default.
    pub fn from_lookup<L>(lookup: L) -> Result<Self, ConfigError>
    where
        L: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Ok(Self {
            max_attempts: lookup_parsed(&lookup, "MAX_ATTEMPTS")?.unwrap_or(defaults.max_attempts),
            base_delay: lookup_parsed(&lookup, "BASE_DELAY")?.unwrap_or(defaults.base_delay),
            max_delay: lookup_parsed(&lookup, "MAX_DELAY")?.unwrap_or(defaults.max_delay),
            jitter: lookup_parsed(&lookup, "JITTER")?.unwrap_or(defaults.jitter),
            timeout: lookup_parsed(&lookup, "TIMEOUT")?.or(defaults.timeout),
        })
    }

    /// Every setting as an override. `timeout` is always included, so an
    /// unset timeout clears any previously configured one.
    pub fn to_overrides(&self) -> Result<PolicyOverrides, ConfigError> {
        let timeout = self
            .timeout
            .map(|t| seconds("timeout", t))
            .transpose()?;
        Ok(PolicyOverrides::new()
            .max_attempts(self.max_attempts)
            .base_delay(seconds("base_delay", self.base_delay)?)
            .max_delay(seconds("max_delay", self.max_delay)?)
            .jitter(self.jitter)
            .timeout(timeout))
    }

    /// Apply to `registry`, returning the installed policy.
    pub fn apply_to(&self, registry: &PolicyRegistry) -> Result<Arc<RetryPolicy>, ConfigError> {
        Ok(registry.configure(&self.to_overrides()?)?)
    }
}

/// Configure the process-wide default policy from `settings`.
///
/// Meant to run once during startup, before any retrying work begins.
pub fn initialize_default_policy(settings: &RetrySettings) -> Result<Arc<RetryPolicy>, ConfigError> {
    tracing::info!(?settings, "initializing default retry policy");
    settings.apply_to(PolicyRegistry::global())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults_match_default_policy() {
        let settings = RetrySettings::from_lookup(|_| None).unwrap();
        assert_eq!(settings, RetrySettings::default());
        assert_eq!(settings.max_attempts, 3);
        assert_eq!(settings.base_delay, 0.1);
        assert_eq!(settings.max_delay, 10.0);
        assert_eq!(settings.jitter, 0.1);
        assert_eq!(settings.timeout, None);
    }

    #[test]
    fn test_reads_all_variables() {
        let settings = RetrySettings::from_lookup(lookup_from(&[
            ("RETRY_MAX_ATTEMPTS", "6"),
            ("RETRY_BASE_DELAY", "0.25"),
            ("RETRY_MAX_DELAY", " 4 "),
            ("RETRY_JITTER", "0"),
            ("RETRY_TIMEOUT", "12.5"),
        ]))
        .unwrap();

        assert_eq!(
            settings,
            RetrySettings {
                max_attempts: 6,
                base_delay: 0.25,
                max_delay: 4.0,
                jitter: 0.0,
                timeout: Some(12.5),
            }
        );
    }

    #[test]
    fn test_blank_variable_keeps_default() {
        let settings =
            RetrySettings::from_lookup(lookup_from(&[("RETRY_MAX_ATTEMPTS", "  ")])).unwrap();
        assert_eq!(settings.max_attempts, 3);
    }

    #[test]
    fn test_unparsable_variable_is_named() {
        let err = RetrySettings::from_lookup(lookup_from(&[("RETRY_MAX_ATTEMPTS", "three")]))
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::Unparsable {
                name: "RETRY_MAX_ATTEMPTS".into(),
                value: "three".into(),
            }
        );
        assert_eq!(err.to_string(), "RETRY_MAX_ATTEMPTS: cannot parse \"three\"");
    }

    #[test]
    fn test_negative_seconds_rejected() {
        let settings = RetrySettings {
            base_delay: -1.0,
            ..RetrySettings::default()
        };
        assert!(matches!(
            settings.to_overrides(),
            Err(ConfigError::InvalidSeconds { name: "base_delay", .. })
        ));
    }

    #[test]
    fn test_apply_to_registry() {
        let registry = PolicyRegistry::default();
        let settings = RetrySettings {
            max_attempts: 4,
            timeout: Some(2.0),
            ..RetrySettings::default()
        };

        let policy = settings.apply_to(&registry).unwrap();

        assert_eq!(policy.max_attempts(), 4);
        assert_eq!(policy.timeout(), Some(Duration::from_secs(2)));
        assert_eq!(policy.base_delay(), Duration::from_millis(100));
        assert_eq!(registry.get(), policy);
    }

    #[test]
    fn test_invalid_policy_is_reported() {
        let registry = PolicyRegistry::default();
        let settings = RetrySettings {
            max_delay: 0.01,
            ..RetrySettings::default()
        };

        let err = settings.apply_to(&registry).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Policy(PolicyError::MaxDelayBelowBase { .. })
        ));
        assert_eq!(*registry.get(), RetryPolicy::default());
    }

    #[test]
    fn test_deserializes_with_defaults() {
        let settings: RetrySettings =
            serde_json::from_str(r#"{"max_attempts": 8, "timeout": 3.0}"#).unwrap();
        assert_eq!(settings.max_attempts, 8);
        assert_eq!(settings.jitter, 0.1);
        assert_eq!(settings.timeout, Some(3.0));
    }
}
