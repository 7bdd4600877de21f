//! Retry configuration and exponential backoff.
//!
//! [`BackoffPolicy::compute_delay`] yields
//! `min(base * multiplier^attempt, max)` with optional ±25% jitter floored at
//! the base delay. The random source is owned by the policy and can be seeded
//! so delays are reproducible in tests.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{ErrorCategory, ErrorClassification};

/// Lower bound of the jitter factor.
pub const JITTER_MIN: f64 = 0.75;
/// Upper bound of the jitter factor.
pub const JITTER_MAX: f64 = 1.25;

/// Custom predicate evaluated before each retry is scheduled.
///
/// Receives the zero-based attempt that just failed and its classification.
pub type RetryCondition = Arc<dyn Fn(u32, &ErrorClassification) -> bool + Send + Sync>;

/// Retry behaviour for one category of failure.
#[derive(Clone)]
pub struct RetryConfig {
    /// Maximum number of retries after the initial attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Cap applied before jitter.
    pub max_delay: Duration,
    /// Growth factor per attempt.
    pub backoff_multiplier: f64,
    /// Whether to randomize delays by ±25%.
    pub jitter: bool,
    retry_condition: Option<RetryCondition>,
}

impl fmt::Debug for RetryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryConfig")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .field("backoff_multiplier", &self.backoff_multiplier)
            .field("jitter", &self.jitter)
            .field("retry_condition", &self.retry_condition.is_some())
            .finish()
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1), Duration::from_secs(10), 2.0, true)
    }
}

impl RetryConfig {
    /// Creates a retry configuration without a custom condition.
    pub fn new(
        max_retries: u32,
        base_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f64,
        jitter: bool,
    ) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
            backoff_multiplier,
            jitter,
            retry_condition: None,
        }
    }

    /// A configuration that never retries.
    pub fn no_retry() -> Self {
        Self::new(0, Duration::ZERO, Duration::ZERO, 1.0, false)
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Sets a predicate that can veto a retry regardless of remaining budget.
    pub fn with_retry_condition<F>(mut self, condition: F) -> Self
    where
        F: Fn(u32, &ErrorClassification) -> bool + Send + Sync + 'static,
    {
        self.retry_condition = Some(Arc::new(condition));
        self
    }

    /// Returns true if `attempt` (zero-based, just failed) may be followed by
    /// another attempt: budget remains and the custom condition agrees.
    pub fn should_retry(&self, attempt: u32, classification: &ErrorClassification) -> bool {
        if attempt >= self.max_retries {
            return false;
        }
        match &self.retry_condition {
            Some(condition) => condition(attempt, classification),
            None => true,
        }
    }
}

/// Per-category retry configurations.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    configs: HashMap<ErrorCategory, RetryConfig>,
    fallback: RetryConfig,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        let ms = Duration::from_millis;
        let mut configs = HashMap::new();
        configs.insert(
            ErrorCategory::Network,
            RetryConfig::new(3, ms(1_000), ms(10_000), 2.0, true),
        );
        configs.insert(
            ErrorCategory::RateLimit,
            RetryConfig::new(2, ms(5_000), ms(60_000), 2.0, true),
        );
        configs.insert(
            ErrorCategory::Server,
            RetryConfig::new(3, ms(2_000), ms(30_000), 2.0, true),
        );
        configs.insert(
            ErrorCategory::NotFound,
            RetryConfig::new(1, ms(1_000), ms(1_000), 1.0, false),
        );
        configs.insert(
            ErrorCategory::Timeout,
            RetryConfig::new(3, ms(1_000), ms(15_000), 2.0, true),
        );
        configs.insert(
            ErrorCategory::Unknown,
            RetryConfig::new(2, ms(1_000), ms(10_000), 2.0, true),
        );
        for category in [
            ErrorCategory::Authentication,
            ErrorCategory::Validation,
            ErrorCategory::PermissionDenied,
            ErrorCategory::CircuitBreakerOpen,
        ] {
            configs.insert(category, RetryConfig::no_retry());
        }

        Self {
            configs,
            fallback: RetryConfig::no_retry(),
        }
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the configuration for a category.
    pub fn for_category(&self, category: ErrorCategory) -> &RetryConfig {
        self.configs.get(&category).unwrap_or(&self.fallback)
    }

    /// Replaces the configuration for a category.
    pub fn set(&mut self, category: ErrorCategory, config: RetryConfig) {
        self.configs.insert(category, config);
    }

    /// Builder form of [`set`](Self::set).
    pub fn with(mut self, category: ErrorCategory, config: RetryConfig) -> Self {
        self.set(category, config);
        self
    }
}

/// Computes retry delays.
pub struct BackoffPolicy {
    rng: Mutex<StdRng>,
}

impl fmt::Debug for BackoffPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackoffPolicy").finish_non_exhaustive()
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl BackoffPolicy {
    /// Creates a policy seeded from OS entropy.
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Creates a policy whose jitter sequence is fixed by `seed`.
    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    pub fn with_rng(rng: StdRng) -> Self {
        Self {
            rng: Mutex::new(rng),
        }
    }

    /// The un-jittered delay: `min(base * multiplier^attempt, max)`.
    pub fn expected_delay(attempt: u32, config: &RetryConfig) -> Duration {
        Duration::from_millis(Self::expected_millis(attempt, config).round() as u64)
    }

    /// Computes the delay before retrying after `attempt` (zero-based).
    pub fn compute_delay(&self, attempt: u32, config: &RetryConfig) -> Duration {
        let expected = Self::expected_millis(attempt, config);
        if !config.jitter {
            return Duration::from_millis(expected.round() as u64);
        }

        let factor = {
            let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
            rng.gen_range(JITTER_MIN..=JITTER_MAX)
        };
        // The floor never exceeds the cap, so a config with `max < base`
        // still stays within the jitter band around the capped delay.
        let floor = config.base_delay.min(config.max_delay).as_millis() as f64;
        let jittered = (expected * factor).max(floor);
        Duration::from_millis(jittered.round() as u64)
    }

    /// The delay before each retry in the configured budget.
    pub fn schedule(&self, config: &RetryConfig) -> Vec<Duration> {
        (0..config.max_retries)
            .map(|attempt| self.compute_delay(attempt, config))
            .collect()
    }

    fn expected_millis(attempt: u32, config: &RetryConfig) -> f64 {
        let base = config.base_delay.as_millis() as f64;
        let max = config.max_delay.as_millis() as f64;
        // Large exponents saturate to infinity and are capped by `max`.
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let raw = base * config.backoff_multiplier.powi(exponent);
        if raw.is_nan() {
            return max;
        }
        raw.min(max)
    }
}
