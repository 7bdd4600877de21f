//! Caller-supplied metadata for a protected operation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Describes one logical operation, e.g. loading a page of the feed.
///
/// Threaded through classification and logging, and used to derive the
/// breaker key (`"{feature}_{operation}"` unless overridden).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationContext {
    /// Feature area the operation belongs to (`feed`, `friends`, ...).
    pub feature: String,
    /// Operation name within the feature (`load_page`, `unfriend`, ...).
    pub operation: String,
    /// Entity the operation acts on, if any.
    pub entity_id: Option<String>,
    /// When the caller issued the operation.
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    breaker_key: Option<String>,
}

impl OperationContext {
    pub fn new(feature: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            feature: feature.into(),
            operation: operation.into(),
            entity_id: None,
            timestamp: Utc::now(),
            breaker_key: None,
        }
    }

    pub fn with_entity_id(mut self, entity_id: impl Into<String>) -> Self {
        self.entity_id = Some(entity_id.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Shares breaker state under an explicit key instead of the derived one.
    pub fn with_breaker_key(mut self, key: impl Into<String>) -> Self {
        self.breaker_key = Some(key.into());
        self
    }

    /// The key identifying this operation's circuit breaker.
    pub fn breaker_key(&self) -> String {
        match &self.breaker_key {
            Some(key) => key.clone(),
            None => format!("{}_{}", self.feature, self.operation),
        }
    }
}
