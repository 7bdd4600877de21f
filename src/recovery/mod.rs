//! Recovery strategies for presenting failures.
//!
//! Each error category maps to a hint describing how the user (or the UI on
//! their behalf) should respond. The executor never reads these back; they
//! exist for the presentation layer only.

use std::collections::HashMap;

use serde::Serialize;

use crate::error::{ErrorCategory, ErrorClassification};

/// The kind of remediation suggested for a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryKind {
    /// Offer a retry and fall back to cached content meanwhile.
    RetryWithFallback,
    /// Wait out a throttle before retrying.
    WaitAndRetry,
    /// Send the user to sign in again.
    RedirectToAuth,
    /// Highlight the invalid input.
    ShowValidationError,
    /// Show the last good data while the backend recovers.
    ShowCached,
    /// Hide the affected feature and keep the rest usable.
    Degrade,
    /// Explain the missing permission.
    RequestAccess,
    /// Offer a plain retry.
    Retry,
}

/// A presentation hint for a category of failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecoveryStrategy {
    #[serde(rename = "type")]
    pub kind: RecoveryKind,
    pub description: String,
    pub suggested_actions: Vec<String>,
}

impl RecoveryStrategy {
    pub fn new(kind: RecoveryKind, description: impl Into<String>, actions: &[&str]) -> Self {
        Self {
            kind,
            description: description.into(),
            suggested_actions: actions.iter().map(|a| a.to_string()).collect(),
        }
    }
}

/// Lookup table from category to recovery strategy.
#[derive(Debug, Clone)]
pub struct RecoveryStrategyCatalog {
    strategies: HashMap<ErrorCategory, RecoveryStrategy>,
}

impl Default for RecoveryStrategyCatalog {
    fn default() -> Self {
        let strategies = ErrorCategory::ALL
            .iter()
            .map(|category| (*category, Self::builtin(*category)))
            .collect();
        Self { strategies }
    }
}

impl RecoveryStrategyCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the strategy for one category.
    pub fn with_strategy(mut self, category: ErrorCategory, strategy: RecoveryStrategy) -> Self {
        self.strategies.insert(category, strategy);
        self
    }

    /// Returns the strategy for a category.
    pub fn strategy_for(&self, category: ErrorCategory) -> RecoveryStrategy {
        self.strategies
            .get(&category)
            .cloned()
            .unwrap_or_else(|| Self::builtin(category))
    }

    /// Returns the strategy for a classification.
    pub fn for_classification(&self, classification: &ErrorClassification) -> RecoveryStrategy {
        self.strategy_for(classification.category)
    }

    fn builtin(category: ErrorCategory) -> RecoveryStrategy {
        use RecoveryKind::*;

        match category {
            ErrorCategory::Network => RecoveryStrategy::new(
                RetryWithFallback,
                "Connection problem; retry and show cached content if available",
                &[
                    "Check your internet connection",
                    "Try again",
                    "Show cached content",
                ],
            ),
            ErrorCategory::RateLimit => RecoveryStrategy::new(
                WaitAndRetry,
                "Too many requests; wait before retrying",
                &["Wait a moment", "Try again later"],
            ),
            ErrorCategory::Authentication => RecoveryStrategy::new(
                RedirectToAuth,
                "Session is no longer valid; the user must sign in again",
                &["Sign in again"],
            ),
            ErrorCategory::Validation => RecoveryStrategy::new(
                ShowValidationError,
                "Input was rejected; show the validation error next to the field",
                &["Review the highlighted fields", "Correct the input and resubmit"],
            ),
            ErrorCategory::Server => RecoveryStrategy::new(
                ShowCached,
                "Backend failure; keep showing the last good data",
                &["Show cached content", "Try again in a few minutes"],
            ),
            ErrorCategory::NotFound => RecoveryStrategy::new(
                Degrade,
                "Resource is gone; hide it and keep the rest of the view usable",
                &["Refresh the list", "Go back"],
            ),
            ErrorCategory::Timeout => RecoveryStrategy::new(
                Retry,
                "The request took too long; a retry usually succeeds",
                &["Try again"],
            ),
            ErrorCategory::PermissionDenied => RecoveryStrategy::new(
                RequestAccess,
                "The user is not allowed to perform this action",
                &["Ask the owner for access", "Go back"],
            ),
            ErrorCategory::CircuitBreakerOpen => RecoveryStrategy::new(
                Degrade,
                "Service is temporarily disabled after repeated failures",
                &["Show cached content", "Try again after the cooldown"],
            ),
            ErrorCategory::Unknown => RecoveryStrategy::new(
                Retry,
                "Unexpected failure",
                &["Try again", "Contact support if the problem persists"],
            ),
        }
    }
}
