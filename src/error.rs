//! Error handling for the payments backend
//!
//! A single [`AppError`] carries every failure the engine can surface, with
//! HTTP status mapping, machine-readable codes, and user-facing messages.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes for programmatic handling by clients
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCode {
    // Domain errors (4xx)
    #[serde(rename = "NOT_FOUND")]
    NotFound,
    #[serde(rename = "FORBIDDEN")]
    Forbidden,
    #[serde(rename = "INVALID_STATE")]
    InvalidState,
    #[serde(rename = "TOO_MANY_ATTEMPTS")]
    TooManyAttempts,
    #[serde(rename = "UNVERIFIED_WEBHOOK")]
    UnverifiedWebhook,

    // Infrastructure errors (5xx)
    #[serde(rename = "DATABASE_ERROR")]
    DatabaseError,
    #[serde(rename = "STORAGE_ERROR")]
    StorageError,
    #[serde(rename = "CONFIGURATION_ERROR")]
    ConfigurationError,
    #[serde(rename = "OPERATION_FAILED")]
    OperationFailed,

    // External errors (502, 504, 429)
    #[serde(rename = "GATEWAY_ERROR")]
    GatewayError,
    #[serde(rename = "RATE_LIMIT_ERROR")]
    RateLimitError,
    #[serde(rename = "EXTERNAL_SERVICE_TIMEOUT")]
    ExternalServiceTimeout,

    // Generic
    #[serde(rename = "INTERNAL_ERROR")]
    InternalError,
    #[serde(rename = "VALIDATION_ERROR")]
    ValidationError,
}

/// Business rule violations
#[derive(Debug, Clone)]
pub enum DomainError {
    /// Entity with the given id does not exist
    NotFound { entity: String, id: String },
    /// Caller may not act on the resource
    Forbidden { reason: String },
    /// Operation is not allowed from the current status
    InvalidState {
        transaction_id: String,
        current: String,
        operation: String,
    },
    /// Proof upload cap exceeded
    TooManyAttempts {
        transaction_id: String,
        max_attempts: u32,
    },
    /// Webhook failed signature verification
    UnverifiedWebhook { provider: String, reason: String },
}

/// Infrastructure-level errors (database, storage, configuration)
#[derive(Debug, Clone)]
pub enum InfrastructureError {
    Database { message: String, is_retryable: bool },
    Storage { message: String },
    Configuration { message: String },
    /// Untyped failure wrapped at an operation boundary
    OperationFailed { operation: String, message: String },
}

/// Payment gateway and other third-party failures
#[derive(Debug, Clone)]
pub enum ExternalError {
    Gateway {
        provider: String,
        message: String,
        is_retryable: bool,
    },
    RateLimit {
        service: String,
        retry_after: Option<u64>,
    },
    Timeout { service: String, timeout_secs: u64 },
}

/// Input validation errors
#[derive(Debug, Clone)]
pub enum ValidationError {
    InvalidAmount { amount: String, reason: String },
    InvalidCurrency { currency: String, reason: String },
    MissingField { field: String },
    InvalidField { field: String, reason: String },
    /// Refund would push the refunded total past the captured amount
    RefundExceedsRemaining { requested: String, remaining: String },
}

/// Unified application error type
#[derive(Debug, Clone)]
pub struct AppError {
    pub kind: AppErrorKind,
    pub request_id: Option<String>,
    pub context: Option<String>,
}

#[derive(Debug, Clone)]
pub enum AppErrorKind {
    Domain(DomainError),
    Infrastructure(InfrastructureError),
    External(ExternalError),
    Validation(ValidationError),
}

impl AppError {
    pub fn new(kind: AppErrorKind) -> Self {
        Self {
            kind,
            request_id: None,
            context: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn not_found(entity: impl Into<String>, id: impl fmt::Display) -> Self {
        Self::new(AppErrorKind::Domain(DomainError::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }))
    }

    pub fn forbidden(reason: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Domain(DomainError::Forbidden {
            reason: reason.into(),
        }))
    }

    pub fn invalid_state(
        transaction_id: impl fmt::Display,
        current: impl fmt::Display,
        operation: impl Into<String>,
    ) -> Self {
        Self::new(AppErrorKind::Domain(DomainError::InvalidState {
            transaction_id: transaction_id.to_string(),
            current: current.to_string(),
            operation: operation.into(),
        }))
    }

    pub fn invalid_field(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Validation(ValidationError::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }))
    }

    /// Keep typed failures as-is and fold infrastructure noise into a generic
    /// "operation failed" error. The hidden cause is logged here.
    pub fn or_operation_failed(self, operation: &str) -> Self {
        match self.kind {
            AppErrorKind::Infrastructure(InfrastructureError::OperationFailed { .. }) => self,
            AppErrorKind::Infrastructure(ref inner) => {
                tracing::error!(operation, error = ?inner, "operation failed");
                AppError {
                    kind: AppErrorKind::Infrastructure(InfrastructureError::OperationFailed {
                        operation: operation.to_string(),
                        message: format!("{:?}", inner),
                    }),
                    request_id: self.request_id,
                    context: self.context,
                }
            }
            _ => self,
        }
    }

    /// Map error to HTTP status code
    pub fn status_code(&self) -> u16 {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::NotFound { .. } => 404,
                DomainError::Forbidden { .. } => 403,
                DomainError::InvalidState { .. } => 409,
                DomainError::TooManyAttempts { .. } => 429,
                DomainError::UnverifiedWebhook { .. } => 401,
            },
            AppErrorKind::Infrastructure(_) => 500,
            AppErrorKind::External(err) => match err {
                ExternalError::Gateway { .. } => 502,
                ExternalError::RateLimit { .. } => 429,
                ExternalError::Timeout { .. } => 504,
            },
            AppErrorKind::Validation(_) => 400,
        }
    }

    /// Get error code for client handling
    pub fn error_code(&self) -> ErrorCode {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::NotFound { .. } => ErrorCode::NotFound,
                DomainError::Forbidden { .. } => ErrorCode::Forbidden,
                DomainError::InvalidState { .. } => ErrorCode::InvalidState,
                DomainError::TooManyAttempts { .. } => ErrorCode::TooManyAttempts,
                DomainError::UnverifiedWebhook { .. } => ErrorCode::UnverifiedWebhook,
            },
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { .. } => ErrorCode::DatabaseError,
                InfrastructureError::Storage { .. } => ErrorCode::StorageError,
                InfrastructureError::Configuration { .. } => ErrorCode::ConfigurationError,
                InfrastructureError::OperationFailed { .. } => ErrorCode::OperationFailed,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::Gateway { .. } => ErrorCode::GatewayError,
                ExternalError::RateLimit { .. } => ErrorCode::RateLimitError,
                ExternalError::Timeout { .. } => ErrorCode::ExternalServiceTimeout,
            },
            AppErrorKind::Validation(_) => ErrorCode::ValidationError,
        }
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::NotFound { entity, id } => format!("{} '{}' not found", entity, id),
                DomainError::Forbidden { reason } => reason.clone(),
                DomainError::InvalidState {
                    transaction_id,
                    current,
                    operation,
                } => format!(
                    "Cannot {} transaction '{}' while it is {}",
                    operation, transaction_id, current
                ),
                DomainError::TooManyAttempts { max_attempts, .. } => format!(
                    "Maximum of {} payment proof uploads reached for this transaction",
                    max_attempts
                ),
                DomainError::UnverifiedWebhook { provider, .. } => {
                    format!("Webhook from '{}' failed signature verification", provider)
                }
            },
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::OperationFailed { operation, .. } => {
                    format!("Failed to {}", operation)
                }
                _ => "Service temporarily unavailable. Please try again later".to_string(),
            },
            AppErrorKind::External(err) => match err {
                ExternalError::Gateway {
                    provider,
                    message,
                    is_retryable,
                } => {
                    if *is_retryable {
                        format!(
                            "Payment provider ({}) is temporarily unavailable. Please try again",
                            provider
                        )
                    } else {
                        format!("Payment provider ({}) rejected the request: {}", provider, message)
                    }
                }
                ExternalError::RateLimit {
                    service,
                    retry_after,
                } => match retry_after {
                    Some(secs) => format!(
                        "Rate limit exceeded for {}. Please try again in {} seconds",
                        service, secs
                    ),
                    None => format!("Rate limit exceeded for {}. Please try again later", service),
                },
                ExternalError::Timeout {
                    service,
                    timeout_secs,
                } => format!(
                    "{} request timed out after {} seconds. Please try again",
                    service, timeout_secs
                ),
            },
            AppErrorKind::Validation(err) => match err {
                ValidationError::InvalidAmount { amount, reason } => {
                    format!("Invalid amount '{}': {}", amount, reason)
                }
                ValidationError::InvalidCurrency { currency, reason } => {
                    format!("Invalid currency '{}': {}", currency, reason)
                }
                ValidationError::MissingField { field } => {
                    format!("Required field '{}' is missing", field)
                }
                ValidationError::InvalidField { field, reason } => {
                    format!("Invalid value for '{}': {}", field, reason)
                }
                ValidationError::RefundExceedsRemaining {
                    requested,
                    remaining,
                } => format!(
                    "Refund of {} exceeds the refundable balance of {}",
                    requested, remaining
                ),
            },
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match &self.kind {
            AppErrorKind::Domain(_) => false,
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { is_retryable, .. } => *is_retryable,
                InfrastructureError::Storage { .. } => true,
                InfrastructureError::Configuration { .. } => false,
                InfrastructureError::OperationFailed { .. } => false,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::Gateway { is_retryable, .. } => *is_retryable,
                ExternalError::RateLimit { .. } => true,
                ExternalError::Timeout { .. } => true,
            },
            AppErrorKind::Validation(_) => false,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.user_message())
    }
}

impl std::error::Error for AppError {}

// From<DatabaseError> lives in database/error.rs, From<PaymentError> in payments/error.rs

/// Result type for operations that can fail with AppError
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_error() {
        let error = AppError::not_found("Transaction", "abc");

        assert_eq!(error.status_code(), 404);
        assert_eq!(error.error_code(), ErrorCode::NotFound);
        assert!(error.user_message().contains("abc"));
        assert!(!error.is_retryable());
    }

    #[test]
    fn test_too_many_attempts_error() {
        let error = AppError::new(AppErrorKind::Domain(DomainError::TooManyAttempts {
            transaction_id: "t1".to_string(),
            max_attempts: 3,
        }));

        assert_eq!(error.status_code(), 429);
        assert_eq!(error.error_code(), ErrorCode::TooManyAttempts);
        assert!(error.user_message().contains('3'));
    }

    #[test]
    fn test_refund_exceeds_remaining_is_validation() {
        let error = AppError::new(AppErrorKind::Validation(
            ValidationError::RefundExceedsRemaining {
                requested: "80.00".to_string(),
                remaining: "70.00".to_string(),
            },
        ));

        assert_eq!(error.status_code(), 400);
        assert_eq!(error.error_code(), ErrorCode::ValidationError);
    }

    #[test]
    fn test_operation_failed_wraps_infrastructure_only() {
        let db = AppError::new(AppErrorKind::Infrastructure(InfrastructureError::Database {
            message: "connection reset".to_string(),
            is_retryable: true,
        }))
        .or_operation_failed("create payment intent");
        assert_eq!(db.error_code(), ErrorCode::OperationFailed);
        assert_eq!(db.user_message(), "Failed to create payment intent");

        let forbidden = AppError::forbidden("not yours").or_operation_failed("confirm payment");
        assert_eq!(forbidden.error_code(), ErrorCode::Forbidden);
    }

    #[test]
    fn test_timeout_error() {
        let error = AppError::new(AppErrorKind::External(ExternalError::Timeout {
            service: "paystack".to_string(),
            timeout_secs: 15,
        }));

        assert_eq!(error.status_code(), 504);
        assert!(error.is_retryable());
    }
}
