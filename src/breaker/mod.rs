//! Per-operation circuit breakers.
//!
//! # States
//! - Closed: calls pass through, failures are counted
//! - Open: calls are rejected until the cooldown has elapsed
//! - Half-Open: a single probe call is allowed through
//!
//! # State Transitions
//! ```text
//! Closed    → Open:      failure_count >= failure_threshold
//! Open      → Half-Open: cooldown elapsed since the last failure (checked on access)
//! Half-Open → Closed:    probe succeeds
//! Half-Open → Open:      probe fails
//! ```
//!
//! Breakers are created lazily on the first recorded failure for a key. Each
//! key's read-modify-write happens under its map shard lock, so concurrent
//! failures can never under-count or skip the transition to Open.
//!
//! Closed breakers idle for longer than the quiet period are pruned every
//! [`PRUNE_INTERVAL`] recorded outcomes, so registries keyed per entity do not
//! grow without bound. [`CircuitBreakerRegistry::prune_idle`] can also be
//! called directly.

pub mod clock;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;

pub use clock::{Clock, ManualClock, SystemClock};

/// Recorded outcomes between automatic prunes of idle breakers.
pub const PRUNE_INTERVAL: u64 = 256;

/// Thresholds shared by every breaker in a registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerConfig {
    /// Consecutive failures that open the breaker.
    pub failure_threshold: u32,
    /// How long an open breaker rejects calls.
    pub cooldown: Duration,
    /// Idle time after which a closed breaker forgets its failures.
    /// Zero disables the reset.
    pub quiet_period: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(60),
            quiet_period: Duration::from_secs(300),
        }
    }
}

impl BreakerConfig {
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn with_quiet_period(mut self, quiet_period: Duration) -> Self {
        self.quiet_period = quiet_period;
        self
    }
}

/// State of a single breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BreakerState {
    #[default]
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct BreakerEntry {
    failure_count: u32,
    last_failure_at: Option<Instant>,
    last_activity: Instant,
    state: BreakerState,
    probe_started_at: Option<Instant>,
}

impl BreakerEntry {
    fn new(now: Instant) -> Self {
        Self {
            failure_count: 0,
            last_failure_at: None,
            last_activity: now,
            state: BreakerState::Closed,
            probe_started_at: None,
        }
    }

    fn since_last_failure(&self, now: Instant) -> Duration {
        self.last_failure_at
            .map(|at| now.saturating_duration_since(at))
            .unwrap_or(Duration::MAX)
    }

    /// Forgets stale failures on a closed breaker.
    fn expire_quiet(&mut self, now: Instant, quiet_period: Duration) {
        if self.state == BreakerState::Closed
            && !quiet_period.is_zero()
            && self.failure_count > 0
            && self.since_last_failure(now) >= quiet_period
        {
            self.failure_count = 0;
        }
    }

    fn remaining(&self, now: Instant, cooldown: Duration) -> Option<Duration> {
        match self.state {
            BreakerState::Closed => None,
            BreakerState::Open => {
                let remaining = cooldown.saturating_sub(self.since_last_failure(now));
                (!remaining.is_zero()).then_some(remaining)
            }
            BreakerState::HalfOpen => {
                let started = self.probe_started_at?;
                let remaining = cooldown.saturating_sub(now.saturating_duration_since(started));
                (!remaining.is_zero()).then_some(remaining)
            }
        }
    }
}

/// Read-only view of a breaker, for telemetry and UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BreakerSnapshot {
    pub key: String,
    pub state: BreakerState,
    pub failure_count: u32,
    /// Time since the last recorded failure.
    pub since_last_failure: Option<Duration>,
    /// Time until calls are let through again, if currently rejecting.
    pub retry_in: Option<Duration>,
}

/// Registry of circuit breakers keyed by operation identifier.
///
/// Cloning is cheap and clones share state.
#[derive(Debug, Clone)]
pub struct CircuitBreakerRegistry {
    entries: Arc<DashMap<String, BreakerEntry>>,
    config: BreakerConfig,
    clock: Arc<dyn Clock>,
    recorded: Arc<AtomicU64>,
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}

impl CircuitBreakerRegistry {
    /// Creates a registry using the system clock.
    pub fn new(config: BreakerConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Creates a registry with an explicit time source.
    pub fn with_clock(config: BreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            config,
            clock,
            recorded: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    /// Returns true if a call for `key` may proceed.
    ///
    /// An open breaker whose cooldown has elapsed moves to half-open and lets
    /// exactly one probe through; further calls are rejected until the probe's
    /// outcome is recorded.
    pub fn is_allowed(&self, key: &str) -> bool {
        self.try_acquire(key).is_ok()
    }

    /// Like [`is_allowed`](Self::is_allowed), but on rejection returns how long
    /// until calls are let through again.
    pub fn try_acquire(&self, key: &str) -> Result<(), Duration> {
        let Some(mut entry) = self.entries.get_mut(key) else {
            return Ok(());
        };
        let now = self.clock.now();
        let cooldown = self.config.cooldown;
        entry.expire_quiet(now, self.config.quiet_period);

        match entry.state {
            BreakerState::Closed => Ok(()),
            BreakerState::Open => match entry.remaining(now, cooldown) {
                Some(remaining) => Err(remaining),
                None => {
                    entry.state = BreakerState::HalfOpen;
                    entry.probe_started_at = Some(now);
                    entry.last_activity = now;
                    tracing::info!(
                        key = key,
                        failures = entry.failure_count,
                        "circuit breaker half-open, allowing probe"
                    );
                    Ok(())
                }
            },
            BreakerState::HalfOpen => match entry.remaining(now, cooldown) {
                Some(remaining) => Err(remaining),
                None => {
                    // The previous probe never reported back.
                    entry.probe_started_at = Some(now);
                    entry.last_activity = now;
                    Ok(())
                }
            },
        }
    }

    /// Records a failed call.
    pub fn record_failure(&self, key: &str) {
        self.maybe_prune();
        let now = self.clock.now();
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| BreakerEntry::new(now));
        entry.expire_quiet(now, self.config.quiet_period);

        entry.failure_count = entry.failure_count.saturating_add(1);
        entry.last_failure_at = Some(now);
        entry.last_activity = now;

        match entry.state {
            BreakerState::HalfOpen => {
                entry.state = BreakerState::Open;
                entry.probe_started_at = None;
                tracing::warn!(
                    key = key,
                    failures = entry.failure_count,
                    "circuit breaker probe failed, re-opened"
                );
            }
            BreakerState::Closed if entry.failure_count >= self.config.failure_threshold => {
                entry.state = BreakerState::Open;
                tracing::warn!(
                    key = key,
                    failures = entry.failure_count,
                    cooldown_secs = self.config.cooldown.as_secs(),
                    "circuit breaker opened"
                );
            }
            _ => {}
        }
    }

    /// Records a successful call, closing the breaker from any state.
    pub fn record_success(&self, key: &str) {
        self.maybe_prune();
        let Some(mut entry) = self.entries.get_mut(key) else {
            return;
        };
        let previous = entry.state;
        entry.failure_count = 0;
        entry.state = BreakerState::Closed;
        entry.probe_started_at = None;
        entry.last_activity = self.clock.now();

        if previous != BreakerState::Closed {
            tracing::info!(key = key, "circuit breaker closed after successful call");
        }
    }

    /// Gives back a half-open probe slot whose call was abandoned without an
    /// outcome, so the next caller may probe immediately.
    pub fn release_probe(&self, key: &str) {
        if let Some(mut entry) = self.entries.get_mut(key) {
            if entry.state == BreakerState::HalfOpen {
                entry.probe_started_at = None;
            }
        }
    }

    /// Time until `key` accepts calls again, or `None` if it accepts them now.
    pub fn cooldown_remaining(&self, key: &str) -> Option<Duration> {
        let entry = self.entries.get(key)?;
        entry.remaining(self.clock.now(), self.config.cooldown)
    }

    /// Returns a read-only view of the breaker for `key`.
    pub fn snapshot(&self, key: &str) -> Option<BreakerSnapshot> {
        let entry = self.entries.get(key)?;
        let now = self.clock.now();
        Some(BreakerSnapshot {
            key: key.to_string(),
            state: entry.state,
            failure_count: entry.failure_count,
            since_last_failure: entry
                .last_failure_at
                .map(|at| now.saturating_duration_since(at)),
            retry_in: entry.remaining(now, self.config.cooldown),
        })
    }

    /// Removes the breaker for `key`. Returns true if one existed.
    pub fn reset(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Drops closed breakers idle for longer than the quiet period.
    ///
    /// Returns the number of breakers removed. Nothing is pruned when the
    /// quiet period is zero.
    pub fn prune_idle(&self) -> usize {
        let quiet_period = self.config.quiet_period;
        if quiet_period.is_zero() {
            return 0;
        }
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| {
            entry.state != BreakerState::Closed
                || now.saturating_duration_since(entry.last_activity) < quiet_period
        });
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            tracing::debug!(removed = removed, "pruned idle circuit breakers");
        }
        removed
    }

    /// Must be called before any entry guard is taken; pruning locks every shard.
    fn maybe_prune(&self) {
        let recorded = self.recorded.fetch_add(1, Ordering::Relaxed) + 1;
        if recorded % PRUNE_INTERVAL == 0 {
            self.prune_idle();
        }
    }

    /// Number of tracked breakers.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
