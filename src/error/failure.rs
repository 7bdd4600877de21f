//! Raw failure representation at the classifier boundary.
//!
//! Every failure produced by a wrapped operation is converted into a
//! [`Failure`] exactly once, where it leaves the caller's code. The variant is
//! the discriminant the classifier dispatches on; nothing downstream inspects
//! the shape of the original error again.

use std::fmt;

use super::ErrorCategory;

/// A failure reported by a protected operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Failure {
    /// A response carrying a status code (HTTP or HTTP-like) and its text.
    Status {
        /// The status code returned by the remote side.
        status: u16,
        /// Raw message accompanying the status.
        message: String,
    },
    /// A failure known only by its message text.
    Message(String),
    /// A failure whose category was already decided by the caller.
    Tagged {
        /// The category assigned at the boundary.
        category: ErrorCategory,
        /// Raw message for logging.
        message: String,
    },
}

impl Failure {
    /// Creates a failure from a status code and message.
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self::Status {
            status,
            message: message.into(),
        }
    }

    /// Creates a failure from message text alone.
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }

    /// Creates a failure with a pre-assigned category.
    pub fn tagged(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self::Tagged {
            category,
            message: message.into(),
        }
    }

    /// Converts any error into a message failure, keeping its source chain.
    pub fn from_error(error: &(dyn std::error::Error + 'static)) -> Self {
        let mut text = error.to_string();
        let mut source = error.source();
        while let Some(cause) = source {
            text.push_str(": ");
            text.push_str(&cause.to_string());
            source = cause.source();
        }
        Self::Message(text)
    }

    /// Returns the status code, if the failure carries one.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns the raw text of the failure.
    pub fn text(&self) -> &str {
        match self {
            Self::Status { message, .. } => message,
            Self::Message(message) => message,
            Self::Tagged { message, .. } => message,
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Status { status, message } => write!(f, "status {}: {}", status, message),
            Self::Message(message) => write!(f, "{}", message),
            Self::Tagged { category, message } => write!(f, "{}: {}", category, message),
        }
    }
}

impl From<String> for Failure {
    fn from(message: String) -> Self {
        Self::Message(message)
    }
}

impl From<&str> for Failure {
    fn from(message: &str) -> Self {
        Self::Message(message.to_string())
    }
}
