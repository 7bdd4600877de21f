//! Error classification types.
//!
//! A raw [`Failure`](super::Failure) is mapped to an [`ErrorClassification`]:
//! a closed category, a severity derived from that category, a user-facing
//! message rendered from a per-category template, and a retryability flag.
//! Classifications are plain values, recomputed for every failure.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::executor::OperationContext;

/// The category of a failure, determining severity, wording and retry policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCategory {
    /// Connectivity problems: DNS, refused or reset connections, failed fetches.
    #[serde(rename = "NETWORK_ERROR")]
    Network,
    /// The remote side is throttling requests (HTTP 429).
    #[serde(rename = "RATE_LIMIT_ERROR")]
    RateLimit,
    /// Missing, expired or invalid credentials (HTTP 401/403).
    #[serde(rename = "AUTHENTICATION_ERROR")]
    Authentication,
    /// The request itself was rejected as malformed (HTTP 400/422).
    #[serde(rename = "VALIDATION_ERROR")]
    Validation,
    /// Server-side failure (HTTP 5xx).
    #[serde(rename = "SERVER_ERROR")]
    Server,
    /// The requested resource does not exist (HTTP 404).
    #[serde(rename = "NOT_FOUND_ERROR")]
    NotFound,
    /// The operation exceeded its own deadline.
    #[serde(rename = "TIMEOUT_ERROR")]
    Timeout,
    /// Authenticated but not allowed to perform the operation.
    #[serde(rename = "PERMISSION_DENIED")]
    PermissionDenied,
    /// Synthesized locally when the breaker for the operation is open.
    #[serde(rename = "CIRCUIT_BREAKER_OPEN")]
    CircuitBreakerOpen,
    /// Nothing matched.
    #[serde(rename = "UNKNOWN_ERROR")]
    Unknown,
}

impl ErrorCategory {
    /// Every category.
    pub const ALL: [ErrorCategory; 10] = [
        ErrorCategory::Network,
        ErrorCategory::RateLimit,
        ErrorCategory::Authentication,
        ErrorCategory::PermissionDenied,
        ErrorCategory::Validation,
        ErrorCategory::NotFound,
        ErrorCategory::Timeout,
        ErrorCategory::Server,
        ErrorCategory::CircuitBreakerOpen,
        ErrorCategory::Unknown,
    ];

    /// Returns the wire name of the category (e.g. `NETWORK_ERROR`).
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Network => "NETWORK_ERROR",
            ErrorCategory::RateLimit => "RATE_LIMIT_ERROR",
            ErrorCategory::Authentication => "AUTHENTICATION_ERROR",
            ErrorCategory::Validation => "VALIDATION_ERROR",
            ErrorCategory::Server => "SERVER_ERROR",
            ErrorCategory::NotFound => "NOT_FOUND_ERROR",
            ErrorCategory::Timeout => "TIMEOUT_ERROR",
            ErrorCategory::PermissionDenied => "PERMISSION_DENIED",
            ErrorCategory::CircuitBreakerOpen => "CIRCUIT_BREAKER_OPEN",
            ErrorCategory::Unknown => "UNKNOWN_ERROR",
        }
    }

    /// Returns the severity assigned to this category.
    pub fn severity(&self) -> Severity {
        match self {
            ErrorCategory::Authentication => Severity::Critical,
            ErrorCategory::Server
            | ErrorCategory::Network
            | ErrorCategory::RateLimit
            | ErrorCategory::PermissionDenied => Severity::High,
            ErrorCategory::Timeout
            | ErrorCategory::NotFound
            | ErrorCategory::CircuitBreakerOpen
            | ErrorCategory::Unknown => Severity::Medium,
            ErrorCategory::Validation => Severity::Low,
        }
    }

    /// Returns false for categories that must never be retried.
    pub fn is_retryable_by_default(&self) -> bool {
        !matches!(
            self,
            ErrorCategory::Authentication | ErrorCategory::Validation
        )
    }

    /// Returns the message shown to end users for this category.
    ///
    /// The text never depends on the raw error, so internal details cannot leak.
    pub fn user_message(&self) -> &'static str {
        match self {
            ErrorCategory::Network => {
                "We couldn't reach the server. Check your connection and try again."
            }
            ErrorCategory::RateLimit => {
                "You're doing that a little too often. Please wait a moment and try again."
            }
            ErrorCategory::Authentication => "Your session has expired. Please sign in again.",
            ErrorCategory::Validation => {
                "Some of the information provided isn't valid. Please review it and try again."
            }
            ErrorCategory::Server => "Something went wrong on our end. Please try again shortly.",
            ErrorCategory::NotFound => "We couldn't find what you were looking for.",
            ErrorCategory::Timeout => "The request took too long to complete. Please try again.",
            ErrorCategory::PermissionDenied => "You don't have permission to do that.",
            ErrorCategory::CircuitBreakerOpen => {
                "Service temporarily unavailable. Please try again later."
            }
            ErrorCategory::Unknown => "An unexpected error occurred. Please try again.",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a category name cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown error category: {0}")]
pub struct ParseCategoryError(pub String);

impl FromStr for ErrorCategory {
    type Err = ParseCategoryError;

    /// Accepts wire names (`RATE_LIMIT_ERROR`) as well as short snake or
    /// kebab case names (`rate_limit`, `rate-limit`), case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
        let short = normalized
            .strip_suffix("_ERROR")
            .unwrap_or(normalized.as_str());
        match short {
            "NETWORK" => Ok(ErrorCategory::Network),
            "RATE_LIMIT" => Ok(ErrorCategory::RateLimit),
            "AUTHENTICATION" => Ok(ErrorCategory::Authentication),
            "VALIDATION" => Ok(ErrorCategory::Validation),
            "SERVER" => Ok(ErrorCategory::Server),
            "NOT_FOUND" => Ok(ErrorCategory::NotFound),
            "TIMEOUT" => Ok(ErrorCategory::Timeout),
            "PERMISSION_DENIED" => Ok(ErrorCategory::PermissionDenied),
            "CIRCUIT_BREAKER_OPEN" => Ok(ErrorCategory::CircuitBreakerOpen),
            "UNKNOWN" => Ok(ErrorCategory::Unknown),
            _ => Err(ParseCategoryError(s.to_string())),
        }
    }
}

/// How serious a failure is, from the user's point of view.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        };
        f.write_str(name)
    }
}

/// The result of classifying a failure.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ErrorClassification {
    /// The category of the failure.
    pub category: ErrorCategory,
    /// Severity derived from the category.
    pub severity: Severity,
    /// User-facing message rendered from the category template.
    pub message: String,
    /// Whether the executor may retry the operation.
    pub retryable: bool,
    /// Raw failure text. For logs only, never for display.
    pub original_error: String,
    /// Description of the rule that produced the category, if any matched.
    pub matched_rule: Option<String>,
    /// Caller-supplied metadata about the operation.
    pub context: Option<OperationContext>,
}

impl ErrorClassification {
    /// Creates a classification for a category with its default attributes.
    pub fn new(category: ErrorCategory, original_error: impl Into<String>) -> Self {
        Self {
            category,
            severity: category.severity(),
            message: category.user_message().to_string(),
            retryable: category.is_retryable_by_default(),
            original_error: original_error.into(),
            matched_rule: None,
            context: None,
        }
    }

    /// Synthesizes the classification for a call rejected by an open breaker.
    ///
    /// `retry_in` is rounded up to whole seconds, never below one.
    pub fn circuit_open(key: &str, retry_in: Duration) -> Self {
        let secs = retry_in.as_millis().div_ceil(1000).max(1);
        Self {
            message: format!(
                "Service temporarily unavailable. Please retry in {}s.",
                secs
            ),
            matched_rule: Some("circuit breaker open".to_string()),
            ..Self::new(
                ErrorCategory::CircuitBreakerOpen,
                format!("circuit breaker open for '{}'", key),
            )
        }
    }

    /// Attaches the operation context.
    pub fn with_context(mut self, context: OperationContext) -> Self {
        self.context = Some(context);
        self
    }

    /// Records which rule matched.
    pub fn with_matched_rule(mut self, rule: impl Into<String>) -> Self {
        self.matched_rule = Some(rule.into());
        self
    }
}

/// A failure surfaced to the caller after classification.
///
/// Its `Display` output is the user-facing message only.
#[derive(Clone, Debug, PartialEq)]
pub struct ClassifiedError {
    classification: ErrorClassification,
}

impl ClassifiedError {
    /// Wraps a classification.
    pub fn new(classification: ErrorClassification) -> Self {
        Self { classification }
    }

    /// Returns the category.
    pub fn category(&self) -> ErrorCategory {
        self.classification.category
    }

    /// Returns the severity.
    pub fn severity(&self) -> Severity {
        self.classification.severity
    }

    /// Returns the pre-rendered user-facing message.
    pub fn user_message(&self) -> &str {
        &self.classification.message
    }

    /// Returns true if the category was retryable.
    pub fn is_retryable(&self) -> bool {
        self.classification.retryable
    }

    /// Returns the full classification.
    pub fn classification(&self) -> &ErrorClassification {
        &self.classification
    }

    /// Consumes the error and returns the classification.
    pub fn into_classification(self) -> ErrorClassification {
        self.classification
    }
}

impl fmt::Display for ClassifiedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.classification.message)
    }
}

impl std::error::Error for ClassifiedError {}

impl From<ErrorClassification> for ClassifiedError {
    fn from(classification: ErrorClassification) -> Self {
        Self::new(classification)
    }
}
