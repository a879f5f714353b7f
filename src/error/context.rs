//! Error context for enriched error information.
//!
//! Context records where a failure happened so the classifier can route it
//! (notably whether a refresh token was involved) and so logs carry enough
//! detail without exposing it to the end user.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Context information attached to errors for routing and debugging.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorContext {
    /// Name of the operation that failed (e.g. `sign_in`, `exchange`).
    pub operation: String,

    /// Component where the error originated (`identity_gateway`, ...).
    pub component: Option<String>,

    /// Whether the failing call presented a refresh token.
    pub refresh_token_involved: bool,

    /// Number of retry attempts made before this error.
    pub retry_count: u32,

    /// User the operation acted for, if known.
    pub user_id: Option<String>,

    /// Correlation ID for tracing across services.
    pub correlation_id: Option<String>,

    /// Timestamp when the error occurred.
    pub timestamp: DateTime<Utc>,
}

impl ErrorContext {
    /// Create a new ErrorContext for an operation.
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            component: None,
            refresh_token_involved: false,
            retry_count: 0,
            user_id: None,
            correlation_id: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_component(mut self, component: impl Into<String>) -> Self {
        self.component = Some(component.into());
        self
    }

    /// Mark the operation as one that presented a refresh token.
    pub fn with_refresh_token(mut self) -> Self {
        self.refresh_token_involved = true;
        self
    }

    pub fn with_retry_count(mut self, count: u32) -> Self {
        self.retry_count = count;
        self
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Increment the retry count and return a new context.
    pub fn next_retry(&self) -> Self {
        Self {
            retry_count: self.retry_count + 1,
            timestamp: Utc::now(),
            ..self.clone()
        }
    }

    /// Format the context as `key=value` pairs for logging.
    pub fn to_log_string(&self) -> String {
        let mut parts = vec![format!("operation={}", self.operation)];

        if let Some(ref component) = self.component {
            parts.push(format!("component={}", component));
        }
        if self.refresh_token_involved {
            parts.push("refresh_token=true".to_string());
        }
        if let Some(ref user_id) = self.user_id {
            parts.push(format!("user_id={}", user_id));
        }
        if let Some(ref correlation_id) = self.correlation_id {
            parts.push(format!("correlation_id={}", correlation_id));
        }
        if self.retry_count > 0 {
            parts.push(format!("retry_count={}", self.retry_count));
        }

        parts.push(format!("timestamp={}", self.timestamp.to_rfc3339()));
        parts.join(" ")
    }
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self::new("unknown")
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.operation)?;
        if let Some(ref component) = self.component {
            write!(f, " in {}", component)?;
        }
        if self.retry_count > 0 {
            write!(f, " (retry {})", self.retry_count)?;
        }
        Ok(())
    }
}
