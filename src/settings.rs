//! Configuration loading.
//!
//! Breaker thresholds and per-category retry overrides are read from a TOML
//! file, with environment overrides using the `BULWARK` prefix and a double
//! underscore separator (e.g. `BULWARK__BREAKER__COOLDOWN_SECS=30`).
//!
//! ```toml
//! [breaker]
//! failure_threshold = 5
//! cooldown_secs = 60
//! quiet_period_secs = 300
//!
//! [retry.rate_limit]
//! max_retries = 1
//! base_delay_ms = 10000
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backoff::{RetryConfig, RetryPolicy};
use crate::breaker::{BreakerConfig, CircuitBreakerRegistry};
use crate::error::ErrorCategory;
use crate::executor::ResilientExecutor;

/// Errors that can occur when loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file was not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// The configuration file path is invalid.
    #[error("invalid configuration path: {0}")]
    InvalidPath(String),

    /// The configuration could not be parsed.
    #[error("failed to parse configuration: {0}")]
    ParseError(#[from] config::ConfigError),

    /// A `[retry.<name>]` table names no known category.
    #[error("unknown error category in [retry.{0}]")]
    UnknownCategory(String),

    /// One or more values are out of range.
    #[error("invalid configuration: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

/// Breaker thresholds.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    pub cooldown_secs: u64,
    pub quiet_period_secs: u64,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        let defaults = BreakerConfig::default();
        Self {
            failure_threshold: defaults.failure_threshold,
            cooldown_secs: defaults.cooldown.as_secs(),
            quiet_period_secs: defaults.quiet_period.as_secs(),
        }
    }
}

impl From<&BreakerSettings> for BreakerConfig {
    fn from(settings: &BreakerSettings) -> Self {
        BreakerConfig {
            failure_threshold: settings.failure_threshold,
            cooldown: Duration::from_secs(settings.cooldown_secs),
            quiet_period: Duration::from_secs(settings.quiet_period_secs),
        }
    }
}

/// Partial override of a category's retry configuration.
///
/// Unset fields keep the category default.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct RetrySettings {
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub base_delay_ms: Option<u64>,
    #[serde(default)]
    pub max_delay_ms: Option<u64>,
    #[serde(default)]
    pub backoff_multiplier: Option<f64>,
    #[serde(default)]
    pub jitter: Option<bool>,
}

impl RetrySettings {
    /// Applies the set fields on top of `base`.
    pub fn apply(&self, base: &RetryConfig) -> RetryConfig {
        let mut config = base.clone();
        if let Some(max_retries) = self.max_retries {
            config.max_retries = max_retries;
        }
        if let Some(ms) = self.base_delay_ms {
            config.base_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = self.max_delay_ms {
            config.max_delay = Duration::from_millis(ms);
        }
        if let Some(multiplier) = self.backoff_multiplier {
            config.backoff_multiplier = multiplier;
        }
        if let Some(jitter) = self.jitter {
            config.jitter = jitter;
        }
        config
    }
}

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ResilienceConfig {
    #[serde(default)]
    pub breaker: BreakerSettings,
    /// Overrides keyed by category name (`network`, `rate_limit`, ...).
    #[serde(default)]
    pub retry: HashMap<String, RetrySettings>,
}

impl ResilienceConfig {
    /// Loads configuration from a TOML file plus `BULWARK__` environment
    /// overrides, then validates it.
    ///
    /// # Errors
    ///
    /// Returns an error if the file does not exist, cannot be parsed, or
    /// fails validation.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let path_str = path
            .to_str()
            .ok_or_else(|| ConfigError::InvalidPath(format!("{:?}", path)))?;

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path_str.to_string()));
        }

        let config = Config::builder()
            .add_source(File::new(path_str, FileFormat::Toml))
            .add_source(
                Environment::with_prefix("BULWARK")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let loaded: ResilienceConfig = config.try_deserialize()?;
        loaded.validate()?;
        tracing::debug!(path = path_str, overrides = loaded.retry.len(), "configuration loaded");
        Ok(loaded)
    }

    /// Parses and validates configuration from a TOML string.
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?;
        let parsed: ResilienceConfig = config.try_deserialize()?;
        parsed.validate()?;
        Ok(parsed)
    }

    /// Checks value ranges, reporting every problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();

        if self.breaker.failure_threshold == 0 {
            problems.push("breaker.failure_threshold must be at least 1".to_string());
        }
        if self.breaker.cooldown_secs == 0 {
            problems.push("breaker.cooldown_secs must be at least 1".to_string());
        }
        if self.breaker.quiet_period_secs == 0 {
            problems.push("breaker.quiet_period_secs must be at least 1".to_string());
        }

        let defaults = RetryPolicy::default();
        for (name, settings) in &self.retry {
            let category = parse_category(name)?;
            let merged = settings.apply(defaults.for_category(category));
            if merged.backoff_multiplier < 1.0 || !merged.backoff_multiplier.is_finite() {
                problems.push(format!(
                    "retry.{}.backoff_multiplier must be a finite number >= 1",
                    name
                ));
            }
            if merged.max_retries > 0 && merged.base_delay > merged.max_delay {
                problems.push(format!(
                    "retry.{}.base_delay_ms must not exceed max_delay_ms",
                    name
                ));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            problems.sort();
            Err(ConfigError::Invalid(problems))
        }
    }

    pub fn breaker_config(&self) -> BreakerConfig {
        BreakerConfig::from(&self.breaker)
    }

    /// Builds the per-category retry policy with overrides applied.
    pub fn retry_policy(&self) -> Result<RetryPolicy, ConfigError> {
        let mut policy = RetryPolicy::default();
        for (name, settings) in &self.retry {
            let category = parse_category(name)?;
            let merged = settings.apply(policy.for_category(category));
            policy.set(category, merged);
        }
        Ok(policy)
    }

    /// Builds an executor with a fresh breaker registry and this policy.
    pub fn build_executor(&self) -> Result<ResilientExecutor, ConfigError> {
        let registry = CircuitBreakerRegistry::new(self.breaker_config());
        Ok(ResilientExecutor::new(registry).with_policy(self.retry_policy()?))
    }
}

fn parse_category(name: &str) -> Result<ErrorCategory, ConfigError> {
    name.parse()
        .map_err(|_| ConfigError::UnknownCategory(name.to_string()))
}
