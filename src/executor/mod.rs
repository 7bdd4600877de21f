//! Resilient execution of unreliable async operations.
//!
//! # Data Flow
//! ```text
//! run(operation, context)
//!     → breaker.try_acquire(key)        rejected → CIRCUIT_BREAKER_OPEN
//!     → operation()
//!         Ok  → breaker.record_success → return value
//!         Err → classifier.classify → breaker.record_failure
//!             → not retryable / budget spent / condition vetoed → ClassifiedError
//!             → failure opened the breaker → CIRCUIT_BREAKER_OPEN, no sleep
//!             → backoff.compute_delay → sleep (cancellable) → next attempt
//! ```
//!
//! Attempts within one run are strictly sequential. The backoff sleep is the
//! only suspension point owned by the executor; cancellation is observed there,
//! before every attempt, and while an attempt is in flight. A cancelled attempt
//! records neither success nor failure.

pub mod context;
pub mod status;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::backoff::{BackoffPolicy, RetryConfig, RetryPolicy};
use crate::breaker::CircuitBreakerRegistry;
use crate::error::{
    ClassifiedError, ErrorCategory, ErrorClassification, ErrorClassifier, Failure,
};

pub use context::OperationContext;
pub use status::RetryStatus;

use status::{RetryTracker, RunGuard};

/// Outcome of a failed run.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RunError {
    /// The operation failed terminally; carries the classification.
    #[error(transparent)]
    Failed(#[from] ClassifiedError),
    /// The caller cancelled the run.
    #[error("operation cancelled")]
    Cancelled,
}

impl RunError {
    /// Returns the classification, unless the run was cancelled.
    pub fn classification(&self) -> Option<&ErrorClassification> {
        match self {
            RunError::Failed(err) => Some(err.classification()),
            RunError::Cancelled => None,
        }
    }

    pub fn category(&self) -> Option<ErrorCategory> {
        self.classification().map(|c| c.category)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, RunError::Cancelled)
    }
}

/// Progress notifications emitted by the executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutorEvent {
    /// A retry will be attempted after `delay`.
    RetryScheduled {
        key: String,
        /// One-based number of the upcoming retry.
        attempt: u32,
        delay: Duration,
    },
    /// A call was rejected by an open breaker.
    BreakerRejected { key: String, retry_in: Duration },
}

/// Per-call options for [`ResilientExecutor::run_with`].
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    config: Option<RetryConfig>,
    cancel: Option<CancellationToken>,
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses `config` for every category instead of the per-category policy.
    pub fn with_config(mut self, config: RetryConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Lets the caller cancel the run.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// Runs operations with classification, retries and circuit breaking.
#[derive(Debug, Clone)]
pub struct ResilientExecutor {
    classifier: ErrorClassifier,
    backoff: Arc<BackoffPolicy>,
    breakers: CircuitBreakerRegistry,
    policy: RetryPolicy,
    tracker: RetryTracker,
    events: Option<UnboundedSender<ExecutorEvent>>,
}

impl Default for ResilientExecutor {
    fn default() -> Self {
        Self::new(CircuitBreakerRegistry::default())
    }
}

impl ResilientExecutor {
    /// Creates an executor sharing the given breaker registry.
    pub fn new(breakers: CircuitBreakerRegistry) -> Self {
        Self {
            classifier: ErrorClassifier::new(),
            backoff: Arc::new(BackoffPolicy::new()),
            breakers,
            policy: RetryPolicy::default(),
            tracker: RetryTracker::default(),
            events: None,
        }
    }

    pub fn with_classifier(mut self, classifier: ErrorClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = Arc::new(backoff);
        self
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Sends progress events to `sender`. Sending never blocks; events are
    /// dropped once the receiver is gone.
    pub fn with_events(mut self, sender: UnboundedSender<ExecutorEvent>) -> Self {
        self.events = Some(sender);
        self
    }

    pub fn breakers(&self) -> &CircuitBreakerRegistry {
        &self.breakers
    }

    pub fn classifier(&self) -> &ErrorClassifier {
        &self.classifier
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Retry progress of the in-flight run for `key`, if any. Never mutates.
    pub fn retry_status(&self, key: &str) -> Option<RetryStatus> {
        self.tracker.status(key)
    }

    /// Runs `operation` with the per-category retry policy and no cancellation.
    pub async fn run<T, E, F, Fut>(
        &self,
        operation: F,
        context: &OperationContext,
    ) -> Result<T, RunError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<Failure>,
    {
        self.run_with(operation, context, RunOptions::default())
            .await
    }

    /// Runs `operation` until it succeeds, fails terminally, or is cancelled.
    pub async fn run_with<T, E, F, Fut>(
        &self,
        mut operation: F,
        context: &OperationContext,
        options: RunOptions,
    ) -> Result<T, RunError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<Failure>,
    {
        let key = context.breaker_key();
        let cancel = options.cancel.unwrap_or_default();
        let override_config = options.config;
        let guard = RunGuard::new(
            &self.tracker,
            &key,
            override_config.as_ref().map_or(0, |c| c.max_retries),
        );

        let mut attempt: u32 = 0;
        loop {
            if cancel.is_cancelled() {
                tracing::debug!(key = %key, attempt = attempt, "run cancelled before attempt");
                return Err(RunError::Cancelled);
            }

            if let Err(retry_in) = self.breakers.try_acquire(&key) {
                tracing::warn!(
                    key = %key,
                    retry_in_ms = retry_in.as_millis() as u64,
                    "circuit breaker open, failing fast"
                );
                self.emit(ExecutorEvent::BreakerRejected {
                    key: key.clone(),
                    retry_in,
                });
                let classification =
                    ErrorClassification::circuit_open(&key, retry_in).with_context(context.clone());
                return Err(ClassifiedError::new(classification).into());
            }

            tracing::debug!(key = %key, attempt = attempt, "attempting operation");
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.breakers.release_probe(&key);
                    tracing::debug!(key = %key, attempt = attempt, "run cancelled during attempt");
                    return Err(RunError::Cancelled);
                }
                outcome = operation() => outcome,
            };

            let failure: Failure = match outcome {
                Ok(value) => {
                    self.breakers.record_success(&key);
                    if attempt > 0 {
                        tracing::info!(key = %key, retries = attempt, "operation recovered");
                    }
                    return Ok(value);
                }
                Err(err) => err.into(),
            };

            let classification = self.classifier.classify(&failure, Some(context));
            self.breakers.record_failure(&key);

            let config = override_config
                .as_ref()
                .unwrap_or_else(|| self.policy.for_category(classification.category));

            if !classification.retryable || !config.should_retry(attempt, &classification) {
                tracing::warn!(
                    key = %key,
                    attempt = attempt,
                    category = %classification.category,
                    severity = %classification.severity,
                    retryable = classification.retryable,
                    error = %classification.original_error,
                    "operation failed"
                );
                return Err(ClassifiedError::new(classification).into());
            }

            // A retry the breaker would reject is never scheduled.
            if let Some(retry_in) = self.breakers.cooldown_remaining(&key) {
                tracing::warn!(
                    key = %key,
                    attempt = attempt,
                    category = %classification.category,
                    retry_in_ms = retry_in.as_millis() as u64,
                    error = %classification.original_error,
                    "circuit breaker opened, abandoning retries"
                );
                let classification =
                    ErrorClassification::circuit_open(&key, retry_in).with_context(context.clone());
                return Err(ClassifiedError::new(classification).into());
            }

            let delay = self.backoff.compute_delay(attempt, config);
            let next = attempt + 1;
            self.tracker
                .scheduled(&key, guard.run_id(), next, config.max_retries, delay);
            self.emit(ExecutorEvent::RetryScheduled {
                key: key.clone(),
                attempt: next,
                delay,
            });
            tracing::info!(
                key = %key,
                attempt = next,
                max_retries = config.max_retries,
                category = %classification.category,
                delay_ms = delay.as_millis() as u64,
                "retrying operation"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::debug!(key = %key, attempt = next, "run cancelled during backoff");
                    return Err(RunError::Cancelled);
                }
                _ = tokio::time::sleep(delay) => {}
            }
            attempt = next;
        }
    }

    fn emit(&self, event: ExecutorEvent) {
        if let Some(sender) = &self.events {
            let _ = sender.send(event);
        }
    }
}
