use thiserror::Error;

pub type PaymentResult<T> = Result<T, PaymentError>;

#[derive(Debug, Clone, Error)]
pub enum PaymentError {
    #[error("Validation error: {message}")]
    ValidationError {
        message: String,
        field: Option<String>,
    },

    #[error("Payment declined: {message}")]
    PaymentDeclinedError {
        message: String,
        provider_code: Option<String>,
    },

    #[error("Network error: {message}")]
    NetworkError { message: String },

    #[error("Rate limit exceeded: {message}")]
    RateLimitError {
        message: String,
        retry_after_seconds: Option<u64>,
    },

    #[error("Gateway timeout: provider={provider}, after {timeout_secs}s")]
    TimeoutError { provider: String, timeout_secs: u64 },

    #[error("Webhook verification failed: {message}")]
    WebhookVerificationError { message: String },

    #[error("Unsupported provider: {provider}")]
    UnsupportedProvider { provider: String },

    #[error("Provider error: provider={provider}, message={message}")]
    ProviderError {
        provider: String,
        message: String,
        provider_code: Option<String>,
        retryable: bool,
    },
}

impl PaymentError {
    pub fn is_retryable(&self) -> bool {
        match self {
            PaymentError::ValidationError { .. } => false,
            PaymentError::PaymentDeclinedError { .. } => false,
            PaymentError::NetworkError { .. } => true,
            PaymentError::RateLimitError { .. } => true,
            PaymentError::TimeoutError { .. } => true,
            PaymentError::WebhookVerificationError { .. } => false,
            PaymentError::UnsupportedProvider { .. } => false,
            PaymentError::ProviderError { retryable, .. } => *retryable,
        }
    }

    pub fn http_status_code(&self) -> u16 {
        match self {
            PaymentError::ValidationError { .. } => 400,
            PaymentError::PaymentDeclinedError { .. } => 402,
            PaymentError::NetworkError { .. } => 503,
            PaymentError::RateLimitError { .. } => 429,
            PaymentError::TimeoutError { .. } => 504,
            PaymentError::WebhookVerificationError { .. } => 401,
            PaymentError::UnsupportedProvider { .. } => 404,
            PaymentError::ProviderError { .. } => 502,
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            PaymentError::ValidationError { message, .. } => message.clone(),
            PaymentError::PaymentDeclinedError { .. } => {
                "Payment was declined by the provider".to_string()
            }
            PaymentError::NetworkError { .. } => {
                "Payment provider is temporarily unavailable".to_string()
            }
            PaymentError::RateLimitError { .. } => {
                "Too many requests to payment provider. Please retry shortly".to_string()
            }
            PaymentError::TimeoutError { .. } => {
                "Payment provider did not respond in time".to_string()
            }
            PaymentError::WebhookVerificationError { .. } => {
                "Invalid webhook signature".to_string()
            }
            PaymentError::UnsupportedProvider { provider } => {
                format!("Payment provider '{}' is not available", provider)
            }
            PaymentError::ProviderError { .. } => "Payment provider returned an error".to_string(),
        }
    }

    fn provider_name(&self) -> String {
        match self {
            PaymentError::ProviderError { provider, .. }
            | PaymentError::TimeoutError { provider, .. } => provider.clone(),
            _ => "payments".to_string(),
        }
    }
}

impl From<PaymentError> for crate::error::AppError {
    fn from(err: PaymentError) -> Self {
        use crate::error::{
            AppError, AppErrorKind, DomainError, ExternalError, ValidationError,
        };

        let kind = match &err {
            PaymentError::ValidationError { message, field } => {
                AppErrorKind::Validation(ValidationError::InvalidField {
                    field: field.clone().unwrap_or_else(|| "request".to_string()),
                    reason: message.clone(),
                })
            }
            PaymentError::UnsupportedProvider { provider } => {
                AppErrorKind::Domain(DomainError::NotFound {
                    entity: "Payment provider".to_string(),
                    id: provider.clone(),
                })
            }
            PaymentError::WebhookVerificationError { message } => {
                AppErrorKind::Domain(DomainError::UnverifiedWebhook {
                    provider: err.provider_name(),
                    reason: message.clone(),
                })
            }
            PaymentError::RateLimitError {
                retry_after_seconds,
                ..
            } => AppErrorKind::External(ExternalError::RateLimit {
                service: err.provider_name(),
                retry_after: *retry_after_seconds,
            }),
            PaymentError::TimeoutError {
                provider,
                timeout_secs,
            } => AppErrorKind::External(ExternalError::Timeout {
                service: provider.clone(),
                timeout_secs: *timeout_secs,
            }),
            _ => AppErrorKind::External(ExternalError::Gateway {
                provider: err.provider_name(),
                message: err.to_string(),
                is_retryable: err.is_retryable(),
            }),
        };

        AppError::new(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AppError, ErrorCode};

    #[test]
    fn error_http_status_mapping_is_correct() {
        assert_eq!(
            PaymentError::ValidationError {
                message: "bad".to_string(),
                field: None
            }
            .http_status_code(),
            400
        );
        assert_eq!(
            PaymentError::TimeoutError {
                provider: "paystack".to_string(),
                timeout_secs: 15
            }
            .http_status_code(),
            504
        );
    }

    #[test]
    fn retryable_flags_are_set() {
        assert!(PaymentError::NetworkError {
            message: "timeout".to_string()
        }
        .is_retryable());
        assert!(!PaymentError::PaymentDeclinedError {
            message: "declined".to_string(),
            provider_code: None
        }
        .is_retryable());
    }

    #[test]
    fn provider_errors_become_gateway_errors() {
        let app: AppError = PaymentError::ProviderError {
            provider: "paystack".to_string(),
            message: "card declined".to_string(),
            provider_code: Some("402".to_string()),
            retryable: false,
        }
        .into();
        assert_eq!(app.error_code(), ErrorCode::GatewayError);
        assert_eq!(app.status_code(), 502);
        assert!(app.user_message().contains("paystack"));
    }

    #[test]
    fn unsupported_provider_is_not_found() {
        let app: AppError = PaymentError::UnsupportedProvider {
            provider: "stripe".to_string(),
        }
        .into();
        assert_eq!(app.error_code(), ErrorCode::NotFound);
    }
}
