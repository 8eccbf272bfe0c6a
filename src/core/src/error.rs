//! Error handling for Allend Core.
//!
//! This module provides:
//! - The crate error type raised synchronously by the aggregator
//! - Machine-readable error codes with numeric values and categories
//! - Severity levels that drive logging
//! - Metrics integration for error tracking
//!
//! Failures of the aggregated operations themselves never surface here; they
//! travel through [`AggregateError`](crate::aggregate::AggregateError) on the
//! aggregation's future.
//!
//! # Usage
//!
//! ```rust,ignore
//! use allend_core::error::{AllendError, ErrorCode, Result};
//!
//! fn check(len: usize, expected: usize) -> Result<()> {
//!     if len != expected {
//!         return Err(AllendError::new(ErrorCode::PolicyKeyMismatch, "length differs"));
//!     }
//!     Ok(())
//! }
//! ```

use metrics::counter;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tracing::{error, warn};

// ═══════════════════════════════════════════════════════════════════════════════
// Result Type Alias
// ═══════════════════════════════════════════════════════════════════════════════

/// A specialized Result type for Allend operations.
pub type Result<T> = std::result::Result<T, AllendError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Error Codes
// ═══════════════════════════════════════════════════════════════════════════════

/// Machine-readable error codes.
///
/// These codes are stable and can be used by callers for programmatic error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Configuration Errors (5000-5099)
    InvalidConfiguration,
    PolicyShapeMismatch,
    PolicyKeyMismatch,
    DuplicateKey,
    ResidualHandlerAlreadyRegistered,

    // Runtime Errors (6000-6099)
    RuntimeUnavailable,

    // Internal Errors (9000-9099)
    InternalError,
}

impl ErrorCode {
    /// Get the numeric code for this error.
    pub const fn numeric_code(&self) -> u32 {
        match self {
            Self::InvalidConfiguration => 5001,
            Self::PolicyShapeMismatch => 5002,
            Self::PolicyKeyMismatch => 5003,
            Self::DuplicateKey => 5004,
            Self::ResidualHandlerAlreadyRegistered => 5005,

            Self::RuntimeUnavailable => 6000,

            Self::InternalError => 9000,
        }
    }

    /// Get the error category for grouping.
    pub const fn category(&self) -> &'static str {
        match self.numeric_code() {
            5000..=5099 => "configuration",
            6000..=6099 => "runtime",
            9000..=9099 => "internal",
            _ => "unknown",
        }
    }

    /// Whether this code belongs to the configuration family.
    ///
    /// Configuration errors are raised synchronously at call time and are
    /// always programming errors on the caller's side.
    pub const fn is_configuration(&self) -> bool {
        matches!(self.numeric_code(), 5000..=5099)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Severity
// ═══════════════════════════════════════════════════════════════════════════════

/// Severity level for errors (affects logging).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    /// Caller mistakes (bad policy, duplicate keys)
    Low,
    /// Environment issues (no runtime available)
    Medium,
    /// Bugs inside the crate
    Critical,
}

impl ErrorSeverity {
    /// Get severity based on error code.
    pub const fn from_code(code: &ErrorCode) -> Self {
        match code {
            ErrorCode::InvalidConfiguration
            | ErrorCode::PolicyShapeMismatch
            | ErrorCode::PolicyKeyMismatch
            | ErrorCode::DuplicateKey
            | ErrorCode::ResidualHandlerAlreadyRegistered => Self::Low,

            ErrorCode::RuntimeUnavailable => Self::Medium,

            ErrorCode::InternalError => Self::Critical,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Details
// ═══════════════════════════════════════════════════════════════════════════════

/// Additional structured details about an error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// Additional context key-value pairs
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, serde_json::Value>,

    /// Operation key the error refers to, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,

    /// Suggested action for resolution
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_action: Option<String>,
}

impl ErrorDetails {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggested_action = Some(suggestion.into());
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Main Error Type
// ═══════════════════════════════════════════════════════════════════════════════

/// The main error type for Allend Core.
///
/// Raised synchronously, before any operation is awaited, when an aggregation
/// is misconfigured or cannot be started.
#[derive(Error, Debug)]
pub struct AllendError {
    /// Machine-readable error code
    code: ErrorCode,

    /// Human-readable message
    message: Cow<'static, str>,

    /// Additional structured details
    details: ErrorDetails,

    /// The source error that caused this error
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl fmt::Display for AllendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        if let Some(ref key) = self.details.key {
            write!(f, " (key: {})", key)?;
        }
        Ok(())
    }
}

impl AllendError {
    // ─────────────────────────────────────────────────────────────────────────
    // Constructors
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a new error with code and message.
    pub fn new(code: ErrorCode, message: impl Into<Cow<'static, str>>) -> Self {
        let error = Self {
            code,
            message: message.into(),
            details: ErrorDetails::default(),
            source: None,
        };
        error.record_metrics();
        error
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message.into())
    }

    /// A per-key policy was built for a different input shape.
    pub fn policy_shape_mismatch(policy_shape: &str, input_shape: &str) -> Self {
        Self::new(
            ErrorCode::PolicyShapeMismatch,
            format!(
                "requirement policy is {} but input is {}",
                policy_shape, input_shape
            ),
        )
        .with_context("policy_shape", policy_shape)
        .with_context("input_shape", input_shape)
        .with_suggestion("build the policy with per_index for lists and per_name for maps")
    }

    /// A per-key policy does not name exactly the input's keys.
    pub fn policy_key_mismatch(key: impl fmt::Display, reason: &'static str) -> Self {
        let key = key.to_string();
        Self::new(
            ErrorCode::PolicyKeyMismatch,
            format!("requirement policy key set differs from input: {}", reason),
        )
        .with_details(ErrorDetails::new().with_key(key))
    }

    /// The same name was supplied twice for a keyed input.
    pub fn duplicate_key(key: impl Into<String>) -> Self {
        let key = key.into();
        Self::new(
            ErrorCode::DuplicateKey,
            format!("operation key '{}' supplied more than once", key),
        )
        .with_details(ErrorDetails::new().with_key(key))
    }

    /// The residual-failure callback was registered twice.
    pub fn residual_handler_already_registered() -> Self {
        Self::new(
            ErrorCode::ResidualHandlerAlreadyRegistered,
            "residual failure handler may be registered at most once per aggregation",
        )
    }

    /// No async runtime is available to drive the operations.
    pub fn runtime_unavailable<E>(source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::new(
            ErrorCode::RuntimeUnavailable,
            "aggregation must be started from within a tokio runtime",
        )
        .with_source(source)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Builder Methods
    // ─────────────────────────────────────────────────────────────────────────

    /// Add a source error.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    /// Add error details.
    pub fn with_details(mut self, details: ErrorDetails) -> Self {
        self.details = details;
        self
    }

    /// Add context to details.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.details.context.insert(key.into(), v);
        }
        self
    }

    /// Add a suggested action.
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.details.suggested_action = Some(suggestion.into());
        self
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    /// Get the error code.
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// Get the message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Get the error details.
    pub fn details(&self) -> &ErrorDetails {
        &self.details
    }

    /// Get the error severity.
    pub fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::from_code(&self.code)
    }

    /// Whether this is a configuration error.
    pub fn is_configuration(&self) -> bool {
        self.code.is_configuration()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Logging
    // ─────────────────────────────────────────────────────────────────────────

    /// Log this error with appropriate severity.
    pub fn log(&self) {
        let code = self.code.to_string();
        let category = self.code.category();

        match self.severity() {
            ErrorSeverity::Critical => {
                error!(
                    error_code = %code,
                    category = category,
                    message = %self.message,
                    details = ?self.details,
                    source = ?self.source,
                    "CRITICAL ERROR"
                );
            }
            ErrorSeverity::Medium => {
                warn!(
                    error_code = %code,
                    category = category,
                    message = %self.message,
                    "Medium severity error"
                );
            }
            ErrorSeverity::Low => {
                tracing::debug!(
                    error_code = %code,
                    category = category,
                    message = %self.message,
                    "Low severity error"
                );
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Metrics
    // ─────────────────────────────────────────────────────────────────────────

    /// Record error metrics.
    fn record_metrics(&self) {
        counter!(
            "allend_errors_total",
            "code" => self.code.to_string(),
            "category" => self.code.category().to_string(),
            "severity" => format!("{:?}", self.severity()),
        )
        .increment(1);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// From Implementations for Common Error Types
// ═══════════════════════════════════════════════════════════════════════════════

impl From<config::ConfigError> for AllendError {
    fn from(error: config::ConfigError) -> Self {
        let user_msg = match &error {
            config::ConfigError::NotFound(key) => format!("Missing configuration: {}", key),
            config::ConfigError::Type { key, .. } => {
                format!("Invalid configuration type for: {:?}", key)
            }
            _ => "Configuration error".to_string(),
        };

        Self::new(ErrorCode::InvalidConfiguration, user_msg).with_source(error)
    }
}

impl From<tokio::runtime::TryCurrentError> for AllendError {
    fn from(error: tokio::runtime::TryCurrentError) -> Self {
        Self::runtime_unavailable(error)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
