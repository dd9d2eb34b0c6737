//! Error types for cascade engine operations.
//!
//! This module provides structured error handling for the enrichment cascade,
//! including categorization, severity levels, and retry guidance.
//!
//! # Error Handling Example
//!
//! ```rust,no_run
//! use captely_cascade::{EngineError, EngineResult};
//!
//! fn handle_error(err: EngineError) {
//!     if err.is_retryable() {
//!         println!("Retryable error: {}", err);
//!     }
//!
//!     let user_msg = err.user_message();
//!     println!("Tell user: {}", user_msg);
//!
//!     match err.category() {
//!         captely_cascade::error::ErrorCategory::Transient => {
//!             println!("Temporary issue, try again later");
//!         }
//!         captely_cascade::error::ErrorCategory::Client => {
//!             println!("Fix the request and try again");
//!         }
//!         _ => {
//!             println!("System issue, contact support");
//!         }
//!     }
//! }
//! ```

use crate::logging::{log_error, log_warn};
use thiserror::Error;

// ============================================================================
// Error categorization types
// ============================================================================

/// High-level categorization of errors for routing and handling decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Expected business logic outcomes (not typically errors).
    BusinessLogic,
    /// External provider failures (network, provider outages).
    External,
    /// Internal system errors (bugs, invariant violations).
    Internal,
    /// Caller errors (invalid input, missing quota, bad contact data).
    Client,
    /// Temporary failures that should be retried.
    Transient,
}

/// Severity level for logging and alerting decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// System is unusable or data integrity is at risk.
    Critical,
    /// Action failed but system is stable.
    Error,
    /// Unexpected but recoverable situation.
    Warning,
    /// Expected failure (e.g., not found, validation error).
    Info,
}

/// Typed reason a Contact did not reach `enriched`, surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum FailureReason {
    /// Quota precheck failed before any provider was consulted.
    QuotaExceeded,
    /// Every provider in the cascade returned a non-retryable failure.
    ProviderUnavailable,
    /// Contact data did not satisfy the ingestion contract.
    InvalidInput,
    /// Worker-level exception; the contact was retried once then failed.
    Internal,
}

// ============================================================================
// Engine error types
// ============================================================================

/// Convenient result type for cascade engine operations.
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Errors that can occur during cascade engine operations.
///
/// Each variant can be categorized via [`category()`](Self::category),
/// assessed for severity via [`severity()`](Self::severity), checked for
/// retryability via [`is_retryable()`](Self::is_retryable), and converted to
/// a user-friendly message via [`user_message()`](Self::user_message).
#[derive(Error, Debug)]
pub enum EngineError {
    /// The submitted contact does not satisfy the ingestion contract.
    #[error("Invalid input: {message}")]
    InvalidInput {
        /// Description of what was missing or malformed.
        message: String,
    },

    /// A provider's rate limiter could not grant a token before the deadline.
    ///
    /// Never surfaced to the caller for a single contact: the Coordinator
    /// treats this as a backoff signal and either retries or skips ahead.
    #[error("Rate limited by provider {provider}, retry after {retry_after_ms}ms")]
    RateLimited {
        /// Provider whose bucket was exhausted.
        provider: String,
        /// Suggested wait before retrying.
        retry_after_ms: u64,
    },

    /// A provider is non-retryable for this attempt (circuit open, auth
    /// failure, or the provider itself reports an outage).
    #[error("Provider unavailable: {provider} - {message}")]
    ProviderUnavailable {
        /// Provider that failed.
        provider: String,
        /// Details about the failure.
        message: String,
    },

    /// The HTTP request to a provider failed.
    #[error("Request to {provider} failed: {message}")]
    RequestFailed {
        /// Provider the request was sent to.
        provider: String,
        /// Description of the failure.
        message: String,
        /// The underlying error, if available.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Failed to parse a provider's response.
    #[error("Response parsing failed for {provider}: {message}")]
    InvalidResponse {
        /// Provider whose response could not be parsed.
        provider: String,
        /// Details about the parsing failure.
        message: String,
    },

    /// A quota (balance, daily, monthly, or per-provider) would be breached.
    #[error("Quota exceeded for user {user_id}: {reason}")]
    QuotaExceeded {
        /// The user whose quota was breached.
        user_id: String,
        /// Which quota was breached.
        reason: String,
    },

    /// A verification step produced an inconclusive result.
    ///
    /// Recorded as a score/flag on the Contact, never surfaced as an error
    /// to the caller.
    #[error("Verification inconclusive: {message}")]
    VerificationInconclusive {
        /// What was inconclusive and why.
        message: String,
    },

    /// Persistence layer failure.
    #[error("Persistence error: {message}")]
    Persistence {
        /// Description of the failure.
        message: String,
        /// The underlying error, if available.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Worker-level exception unrelated to any specific provider.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal failure.
        message: String,
    },
}

impl EngineError {
    /// Get the error category for routing and handling decisions.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidInput { .. } => ErrorCategory::Client,
            Self::RateLimited { .. } => ErrorCategory::Transient,
            Self::ProviderUnavailable { .. } => ErrorCategory::External,
            Self::RequestFailed { .. } => ErrorCategory::External,
            Self::InvalidResponse { .. } => ErrorCategory::External,
            Self::QuotaExceeded { .. } => ErrorCategory::Client,
            Self::VerificationInconclusive { .. } => ErrorCategory::BusinessLogic,
            Self::Persistence { .. } => ErrorCategory::Internal,
            Self::Internal { .. } => ErrorCategory::Internal,
        }
    }

    /// Get the error severity for logging and alerting.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::InvalidInput { .. } => ErrorSeverity::Info,
            Self::RateLimited { .. } => ErrorSeverity::Warning,
            Self::ProviderUnavailable { .. } => ErrorSeverity::Warning,
            Self::RequestFailed { .. } => ErrorSeverity::Warning,
            Self::InvalidResponse { .. } => ErrorSeverity::Warning,
            Self::QuotaExceeded { .. } => ErrorSeverity::Info,
            Self::VerificationInconclusive { .. } => ErrorSeverity::Info,
            Self::Persistence { .. } => ErrorSeverity::Critical,
            Self::Internal { .. } => ErrorSeverity::Error,
        }
    }

    /// Whether this error is transient and should trigger a retry.
    ///
    /// Only `RateLimited` and `RequestFailed` are retryable at the adapter
    /// layer; the Coordinator is the only caller that acts on this.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::RequestFailed { .. })
    }

    /// Convert to a user-friendly message suitable for display.
    pub fn user_message(&self) -> String {
        match self {
            Self::InvalidInput { .. } => {
                "The contact is missing required identifying fields".to_string()
            }
            Self::RateLimited { .. } => "Provider is busy, retrying shortly".to_string(),
            Self::ProviderUnavailable { .. } => {
                "A data provider is temporarily unavailable".to_string()
            }
            Self::RequestFailed { .. } => {
                "Unable to reach a data provider. Please try again".to_string()
            }
            Self::InvalidResponse { .. } => {
                "Received an invalid response from a data provider".to_string()
            }
            Self::QuotaExceeded { .. } => {
                "Your credit or usage limit has been reached".to_string()
            }
            Self::VerificationInconclusive { .. } => {
                "Could not conclusively verify the discovered contact details".to_string()
            }
            Self::Persistence { .. } => "A storage error occurred. Please try again".to_string(),
            Self::Internal { .. } => "An unexpected error occurred".to_string(),
        }
    }

    // =========================================================================
    // Constructor methods with automatic logging
    // =========================================================================

    pub fn invalid_input(message: impl Into<String>) -> Self {
        let message = message.into();
        log_warn!(error_type = "invalid_input", message = %message, "Contact rejected at ingestion");
        Self::InvalidInput { message }
    }

    pub fn rate_limited(provider: impl Into<String>, retry_after_ms: u64) -> Self {
        let provider = provider.into();
        log_warn!(error_type = "rate_limited", provider = %provider, retry_after_ms, "Provider rate limit exceeded");
        Self::RateLimited {
            provider,
            retry_after_ms,
        }
    }

    pub fn provider_unavailable(provider: impl Into<String>, message: impl Into<String>) -> Self {
        let provider = provider.into();
        let message = message.into();
        log_warn!(error_type = "provider_unavailable", provider = %provider, message = %message, "Provider unavailable");
        Self::ProviderUnavailable { provider, message }
    }

    pub fn request_failed(
        provider: impl Into<String>,
        message: impl Into<String>,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        let provider = provider.into();
        let message = message.into();
        log_warn!(error_type = "request_failed", provider = %provider, message = %message, has_source = source.is_some(), "Provider request failed");
        Self::RequestFailed {
            provider,
            message,
            source,
        }
    }

    pub fn invalid_response(provider: impl Into<String>, message: impl Into<String>) -> Self {
        let provider = provider.into();
        let message = message.into();
        log_warn!(error_type = "invalid_response", provider = %provider, message = %message, "Provider response invalid");
        Self::InvalidResponse { provider, message }
    }

    pub fn quota_exceeded(user_id: impl Into<String>, reason: impl Into<String>) -> Self {
        let user_id = user_id.into();
        let reason = reason.into();
        log_warn!(error_type = "quota_exceeded", user_id = %user_id, reason = %reason, "User quota exceeded");
        Self::QuotaExceeded { user_id, reason }
    }

    pub fn verification_inconclusive(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::VerificationInconclusive { message }
    }

    pub fn persistence(
        message: impl Into<String>,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        let message = message.into();
        log_error!(error_type = "persistence", message = %message, "Persistence layer failure");
        Self::Persistence { message, source }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        let message = message.into();
        log_error!(error_type = "internal", message = %message, "Internal engine error");
        Self::Internal { message }
    }
}

impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> Self {
        EngineError::persistence(err.to_string(), Some(Box::new(err)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_rate_limited_and_request_failed_are_retryable() {
        assert!(EngineError::rate_limited("hunter", 100).is_retryable());
        assert!(EngineError::request_failed("hunter", "timeout", None).is_retryable());
        assert!(!EngineError::invalid_input("missing company").is_retryable());
        assert!(!EngineError::quota_exceeded("u1", "daily ceiling").is_retryable());
        assert!(!EngineError::internal("bug").is_retryable());
    }

    #[test]
    fn quota_and_input_errors_are_client_category_at_info_severity() {
        let err = EngineError::quota_exceeded("u1", "monthly ceiling");
        assert_eq!(err.category(), ErrorCategory::Client);
        assert_eq!(err.severity(), ErrorSeverity::Info);
    }

    #[test]
    fn persistence_errors_are_internal_category_at_critical_severity() {
        let err = EngineError::persistence("connection reset", None);
        assert_eq!(err.category(), ErrorCategory::Internal);
        assert_eq!(err.severity(), ErrorSeverity::Critical);
    }

    #[test]
    fn user_message_never_leaks_internal_detail() {
        let err = EngineError::persistence("duplicate key value violates unique constraint", None);
        assert!(!err.user_message().contains("constraint"));
    }
}
