//! Bulwark - resilient execution of unreliable async operations
//!
//! Failures are classified into a small set of categories, retried with
//! category-specific exponential backoff, and guarded by a circuit breaker per
//! logical operation so a failing backend is not hammered.
//!
//! ```no_run
//! use bulwark::{Failure, OperationContext, ResilientExecutor};
//!
//! # async fn demo() {
//! let executor = ResilientExecutor::default();
//! let context = OperationContext::new("feed", "load_page");
//! let page = executor
//!     .run(|| async { Err::<String, _>(Failure::status(503, "unavailable")) }, &context)
//!     .await;
//! # }
//! ```

pub mod backoff;
pub mod breaker;
pub mod error;
pub mod executor;
pub mod logging;
pub mod recovery;
pub mod settings;

pub use backoff::{BackoffPolicy, RetryConfig, RetryPolicy};
pub use breaker::{BreakerConfig, BreakerSnapshot, BreakerState, CircuitBreakerRegistry};
pub use error::{
    classify, ClassifiedError, ErrorCategory, ErrorClassification, ErrorClassifier, Failure,
    Severity,
};
pub use executor::{
    ExecutorEvent, OperationContext, ResilientExecutor, RetryStatus, RunError, RunOptions,
};
pub use recovery::{RecoveryKind, RecoveryStrategy, RecoveryStrategyCatalog};
pub use settings::{ConfigError, ResilienceConfig};
