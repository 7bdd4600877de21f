//! Integration tests for resilient execution.
//!
//! Exercises classification, backoff, circuit breaking and cancellation
//! together through the public API. Timing-sensitive tests run on a paused
//! tokio clock so backoff sleeps complete instantly and elapsed time is exact.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bulwark::breaker::ManualClock;
use bulwark::error::ErrorPattern;
use bulwark::{
    classify, BackoffPolicy, BreakerConfig, BreakerState, CircuitBreakerRegistry, ErrorCategory,
    ErrorClassifier, ExecutorEvent, Failure, OperationContext, RecoveryKind,
    RecoveryStrategyCatalog, ResilienceConfig, ResilientExecutor, RetryConfig, RunError,
    RunOptions, Severity,
};
use tokio_util::sync::CancellationToken;

fn feed_context() -> OperationContext {
    OperationContext::new("feed", "load_page")
}

fn seeded_executor() -> ResilientExecutor {
    ResilientExecutor::default().with_backoff(BackoffPolicy::seeded(42))
}

// ============================================================================
// Retry budget tests
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_network_failure_exhausts_three_retries() {
    let executor = seeded_executor();
    let calls = AtomicU32::new(0);
    let config = RetryConfig::default().with_max_retries(3);

    let err = executor
        .run_with(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(Failure::message("Failed to fetch")) }
            },
            &feed_context(),
            RunOptions::new().with_config(config),
        )
        .await
        .unwrap_err();

    assert_eq!(calls.load(Ordering::SeqCst), 4);
    assert_eq!(err.category(), Some(ErrorCategory::Network));
    assert_eq!(
        err.to_string(),
        ErrorCategory::Network.user_message(),
        "terminal error shows the user-safe message"
    );
}

#[tokio::test(start_paused = true)]
async fn test_auth_failure_is_not_retried_and_never_waits() {
    let executor = seeded_executor();
    let calls = AtomicU32::new(0);
    let start = tokio::time::Instant::now();

    let err = executor
        .run_with(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(Failure::status(401, "token expired")) }
            },
            &feed_context(),
            RunOptions::new().with_config(RetryConfig::default().with_max_retries(10)),
        )
        .await
        .unwrap_err();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(start.elapsed(), Duration::ZERO);
    let classification = err.classification().unwrap();
    assert_eq!(classification.category, ErrorCategory::Authentication);
    assert_eq!(classification.severity, Severity::Critical);
    assert!(!classification.retryable);
}

#[tokio::test(start_paused = true)]
async fn test_validation_is_never_retried_even_with_permissive_predicate() {
    let classifier = ErrorClassifier::new().with_retry_predicate(|_, _| true);
    let executor = seeded_executor().with_classifier(classifier);
    let calls = AtomicU32::new(0);

    let err = executor
        .run(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(Failure::status(422, "email is invalid")) }
            },
            &feed_context(),
        )
        .await
        .unwrap_err();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(err.category(), Some(ErrorCategory::Validation));
}

#[tokio::test(start_paused = true)]
async fn test_backoff_delays_follow_exponential_schedule() {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    // Six failures must not trip the breaker for the whole schedule to run.
    let registry = CircuitBreakerRegistry::new(BreakerConfig::default().with_failure_threshold(10));
    let executor = ResilientExecutor::new(registry).with_events(tx);
    let config = RetryConfig::default()
        .with_max_retries(5)
        .with_jitter(false);
    let start = tokio::time::Instant::now();

    let _ = executor
        .run_with(
            || async { Err::<(), _>(Failure::message("network unreachable")) },
            &feed_context(),
            RunOptions::new().with_config(config),
        )
        .await;

    let mut delays = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let ExecutorEvent::RetryScheduled { delay, .. } = event {
            delays.push(delay.as_millis() as u64);
        }
    }
    assert_eq!(delays, vec![1000, 2000, 4000, 8000, 10000]);
    assert_eq!(start.elapsed(), Duration::from_millis(25_000));
}

#[tokio::test(start_paused = true)]
async fn test_custom_pattern_changes_retry_budget() {
    let pattern = ErrorPattern::new(
        r"(?i)quota exhausted",
        ErrorCategory::RateLimit,
        "upstream quota",
    )
    .unwrap();
    let executor = seeded_executor().with_classifier(ErrorClassifier::new().with_pattern(pattern));
    let calls = AtomicU32::new(0);

    let err = executor
        .run(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(Failure::message("Quota exhausted for project")) }
            },
            &feed_context(),
        )
        .await
        .unwrap_err();

    assert_eq!(err.category(), Some(ErrorCategory::RateLimit));
    // RATE_LIMIT allows two retries by default.
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

// ============================================================================
// Circuit breaker tests
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_breaker_opens_after_five_failed_runs_and_recovers_after_cooldown() {
    let clock = ManualClock::new();
    let registry = CircuitBreakerRegistry::with_clock(BreakerConfig::default(), Arc::new(clock.clone()));
    let executor = ResilientExecutor::new(registry.clone());
    let ctx = OperationContext::new("friends", "unfriend").with_entity_id("user-7");
    let calls = AtomicU32::new(0);

    for _ in 0..5 {
        let result: Result<(), RunError> = executor
            .run(
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(Failure::status(403, "forbidden")) }
                },
                &ctx,
            )
            .await;
        assert_eq!(result.unwrap_err().category(), Some(ErrorCategory::Authentication));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 5);
    assert_eq!(
        registry.snapshot("friends_unfriend").unwrap().state,
        BreakerState::Open
    );

    // Rejected without invoking the operation.
    let err = executor
        .run(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, Failure>(()) }
            },
            &ctx,
        )
        .await
        .unwrap_err();
    assert_eq!(calls.load(Ordering::SeqCst), 5);
    assert_eq!(err.category(), Some(ErrorCategory::CircuitBreakerOpen));
    assert!(err.classification().unwrap().retryable);
    assert_eq!(
        err.classification().unwrap().message,
        "Service temporarily unavailable. Please retry in 60s."
    );

    clock.advance(Duration::from_secs(60));

    executor
        .run(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, Failure>(()) }
            },
            &ctx,
        )
        .await
        .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 6);
    let snapshot = registry.snapshot("friends_unfriend").unwrap();
    assert_eq!(snapshot.state, BreakerState::Closed);
    assert_eq!(snapshot.failure_count, 0);
}

#[tokio::test(start_paused = true)]
async fn test_breakers_are_isolated_per_operation() {
    let registry = CircuitBreakerRegistry::new(BreakerConfig::default().with_failure_threshold(1));
    let executor = ResilientExecutor::new(registry.clone());

    let _ = executor
        .run(
            || async { Err::<(), _>(Failure::status(401, "nope")) },
            &OperationContext::new("notifications", "mark_read"),
        )
        .await;

    assert!(!registry.is_allowed("notifications_mark_read"));
    assert!(registry.is_allowed("feed_load_page"));

    let value = executor
        .run(|| async { Ok::<_, Failure>("ok") }, &feed_context())
        .await
        .unwrap();
    assert_eq!(value, "ok");
}

#[tokio::test(start_paused = true)]
async fn test_shared_breaker_key_groups_operations() {
    let registry = CircuitBreakerRegistry::new(BreakerConfig::default().with_failure_threshold(2));
    let executor = ResilientExecutor::new(registry.clone());
    let read = OperationContext::new("notifications", "list").with_breaker_key("notifications");
    let write = OperationContext::new("notifications", "mark_read").with_breaker_key("notifications");

    for ctx in [&read, &write] {
        let _ = executor
            .run(|| async { Err::<(), _>(Failure::status(400, "bad")) }, ctx)
            .await;
    }

    assert_eq!(
        registry.snapshot("notifications").unwrap().state,
        BreakerState::Open
    );
    assert!(registry.snapshot("notifications_list").is_none());
}

// ============================================================================
// Cancellation tests
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_cancel_during_backoff_stops_further_attempts() {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let executor = seeded_executor().with_events(tx);
    let token = CancellationToken::new();
    let calls = Arc::new(AtomicU32::new(0));

    let handle = {
        let executor = executor.clone();
        let token = token.clone();
        let calls = Arc::clone(&calls);
        tokio::spawn(async move {
            executor
                .run_with(
                    || {
                        calls.fetch_add(1, Ordering::SeqCst);
                        async { Err::<(), _>(Failure::message("network down")) }
                    },
                    &feed_context(),
                    RunOptions::new().with_cancellation(token),
                )
                .await
        })
    };

    // Wait until the first retry is scheduled, then cancel mid-backoff.
    let event = rx.recv().await.unwrap();
    assert!(matches!(event, ExecutorEvent::RetryScheduled { attempt: 1, .. }));
    let status = executor.retry_status("feed_load_page").unwrap();
    assert!(status.is_retrying);
    assert_eq!(status.attempt, 1);
    assert!(status.ms_until_next_retry >= 1000);

    token.cancel();
    let result = handle.await.unwrap();

    assert!(matches!(result, Err(RunError::Cancelled)));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    // Only the first failure was recorded; cancellation records nothing.
    assert_eq!(
        executor
            .breakers()
            .snapshot("feed_load_page")
            .unwrap()
            .failure_count,
        1
    );
    assert!(executor.retry_status("feed_load_page").is_none());
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_attempt_records_nothing() {
    let executor = seeded_executor();
    let token = CancellationToken::new();
    let calls = Arc::new(AtomicU32::new(0));
    let (started_tx, mut started_rx) = tokio::sync::mpsc::unbounded_channel();

    let handle = {
        let executor = executor.clone();
        let token = token.clone();
        let calls = Arc::clone(&calls);
        tokio::spawn(async move {
            executor
                .run_with(
                    || {
                        calls.fetch_add(1, Ordering::SeqCst);
                        let _ = started_tx.send(());
                        std::future::pending::<Result<(), Failure>>()
                    },
                    &feed_context(),
                    RunOptions::new().with_cancellation(token),
                )
                .await
        })
    };

    started_rx.recv().await.unwrap();
    let status = executor.retry_status("feed_load_page").unwrap();
    assert_eq!(status.attempt, 0);
    assert_eq!(status.max_retries, 0);
    assert!(!status.is_retrying);

    token.cancel();
    let result = handle.await.unwrap();

    assert_eq!(result, Err(RunError::Cancelled));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(executor.breakers().snapshot("feed_load_page").is_none());
    assert!(executor.retry_status("feed_load_page").is_none());
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_half_open_attempt_frees_the_slot() {
    let clock = ManualClock::new();
    let registry = CircuitBreakerRegistry::with_clock(
        BreakerConfig::default().with_failure_threshold(1),
        Arc::new(clock.clone()),
    );
    registry.record_failure("feed_load_page");
    clock.advance(Duration::from_secs(60));

    let executor = ResilientExecutor::new(registry.clone());
    let token = CancellationToken::new();
    let (started_tx, mut started_rx) = tokio::sync::mpsc::unbounded_channel();

    let handle = {
        let executor = executor.clone();
        let token = token.clone();
        tokio::spawn(async move {
            executor
                .run_with(
                    || {
                        let _ = started_tx.send(());
                        std::future::pending::<Result<(), Failure>>()
                    },
                    &feed_context(),
                    RunOptions::new().with_cancellation(token),
                )
                .await
        })
    };

    started_rx.recv().await.unwrap();
    let snapshot = registry.snapshot("feed_load_page").unwrap();
    assert_eq!(snapshot.state, BreakerState::HalfOpen);
    // The half-open slot is taken while the attempt is in flight.
    assert!(registry.cooldown_remaining("feed_load_page").is_some());

    token.cancel();
    assert_eq!(handle.await.unwrap(), Err(RunError::Cancelled));

    let snapshot = registry.snapshot("feed_load_page").unwrap();
    assert_eq!(snapshot.state, BreakerState::HalfOpen);
    assert_eq!(snapshot.failure_count, 1);

    // The next caller goes through at once, without waiting out another cooldown.
    let value = executor
        .run(|| async { Ok::<_, Failure>("fresh") }, &feed_context())
        .await
        .unwrap();
    assert_eq!(value, "fresh");
    assert_eq!(
        registry.snapshot("feed_load_page").unwrap().state,
        BreakerState::Closed
    );
}

#[tokio::test(start_paused = true)]
async fn test_opening_failure_ends_run_without_backoff() {
    let registry = CircuitBreakerRegistry::new(BreakerConfig::default().with_failure_threshold(1));
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let executor = ResilientExecutor::new(registry).with_events(tx);
    let calls = AtomicU32::new(0);
    let start = tokio::time::Instant::now();

    let err = executor
        .run(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(Failure::status(503, "unavailable")) }
            },
            &feed_context(),
        )
        .await
        .unwrap_err();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(start.elapsed(), Duration::ZERO);
    assert_eq!(err.category(), Some(ErrorCategory::CircuitBreakerOpen));
    assert!(rx.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_before_start_never_invokes() {
    let executor = seeded_executor();
    let token = CancellationToken::new();
    token.cancel();
    let calls = AtomicU32::new(0);

    let result = executor
        .run_with(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, Failure>(()) }
            },
            &feed_context(),
            RunOptions::new().with_cancellation(token),
        )
        .await;

    assert_eq!(result, Err(RunError::Cancelled));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(executor.breakers().snapshot("feed_load_page").is_none());
}

// ============================================================================
// Backoff policy tests
// ============================================================================

#[test]
fn test_jitter_stays_within_bounds() {
    let backoff = BackoffPolicy::new();
    let config = RetryConfig::default();
    for _ in 0..1000 {
        let delay = backoff.compute_delay(1, &config).as_millis() as u64;
        assert!((1500..=2500).contains(&delay), "delay {} out of range", delay);
    }
}

#[test]
fn test_jittered_delay_never_drops_below_base() {
    let backoff = BackoffPolicy::seeded(3);
    let config = RetryConfig::default();
    for _ in 0..1000 {
        assert!(backoff.compute_delay(0, &config) >= config.base_delay);
    }
}

// ============================================================================
// Classification and recovery tests
// ============================================================================

#[test]
fn test_classification_and_recovery_line_up() {
    let catalog = RecoveryStrategyCatalog::new();
    let cases = [
        (Failure::message("Failed to fetch"), RecoveryKind::RetryWithFallback),
        (Failure::status(429, "slow down"), RecoveryKind::WaitAndRetry),
        (Failure::status(401, "expired"), RecoveryKind::RedirectToAuth),
        (Failure::status(422, "bad email"), RecoveryKind::ShowValidationError),
        (Failure::status(503, "unavailable"), RecoveryKind::ShowCached),
    ];
    for (failure, expected) in cases {
        let classification = classify(&failure, None);
        assert_eq!(catalog.for_classification(&classification).kind, expected);
    }
}

#[test]
fn test_classification_carries_context() {
    let ctx = OperationContext::new("feed", "load_page").with_entity_id("tab-1");
    let classification = classify(&Failure::status(500, "boom"), Some(&ctx));
    assert_eq!(classification.category, ErrorCategory::Server);
    assert_eq!(classification.context.as_ref(), Some(&ctx));
    assert_eq!(classification.original_error, "boom");
}

// ============================================================================
// Configuration tests
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_executor_built_from_config_uses_overrides() {
    let config = ResilienceConfig::from_toml_str(
        r#"
        [breaker]
        failure_threshold = 10

        [retry.network]
        max_retries = 1
        jitter = false
        "#,
    )
    .unwrap();
    let executor = config.build_executor().unwrap();
    let calls = AtomicU32::new(0);

    let _ = executor
        .run(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(Failure::message("connection refused by network")) }
            },
            &feed_context(),
        )
        .await;

    assert_eq!(calls.load(Ordering::SeqCst), 2);
}
