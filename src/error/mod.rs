//! Failure classification.
//!
//! Raw failures enter as a [`Failure`], are matched against a shared pattern
//! table by the [`ErrorClassifier`], and leave as an [`ErrorClassification`]
//! carrying category, severity, a user-safe message and retryability. Failures
//! surfaced to callers are wrapped in [`ClassifiedError`].

pub mod classification;
pub mod classifier;
pub mod failure;

use std::sync::OnceLock;

pub use classification::{
    ClassifiedError, ErrorCategory, ErrorClassification, ParseCategoryError, Severity,
};
pub use classifier::{ErrorClassifier, ErrorPattern, PatternTable, RetryPredicate, StatusRule};
pub use failure::Failure;

use crate::executor::OperationContext;

/// Classifies a failure with the default classifier.
pub fn classify(failure: &Failure, context: Option<&OperationContext>) -> ErrorClassification {
    static DEFAULT: OnceLock<ErrorClassifier> = OnceLock::new();
    DEFAULT
        .get_or_init(ErrorClassifier::new)
        .classify(failure, context)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_free_function() {
        let c = classify(&Failure::message("Failed to fetch"), None);
        assert_eq!(c.category, ErrorCategory::Network);
        assert!(c.retryable);

        let c = classify(&Failure::status(401, "expired"), None);
        assert_eq!(c.category, ErrorCategory::Authentication);
        assert!(!c.retryable);
    }
}
