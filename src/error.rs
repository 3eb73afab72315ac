use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::fmt;

use crate::models::ValidationError;

/// Application error types
#[derive(Debug)]
pub enum AppError {
    /// Malformed request fields, raised before any billing call
    Validation(String),
    /// Caller is unregistered or has a non-positive balance
    PaymentRequired(String),
    /// The billing gate refused the charge (message is passed through verbatim)
    ChargeDeclined(String),
    /// Upstream generation API returned a non-success status or unusable body
    ProviderFailure { status: StatusCode, details: String },
    /// Cache write-back failed; absorbed by the persist worker, never surfaced
    Persistence(String),
    /// Requested artifact is not in the cache
    NotFound(String),
    /// Configuration error
    Config(String),
    /// Any other unexpected fault
    Internal(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation(msg) => write!(f, "Validation error: {}", msg),
            Self::PaymentRequired(msg) => write!(f, "Payment required: {}", msg),
            Self::ChargeDeclined(msg) => write!(f, "Charge declined: {}", msg),
            Self::ProviderFailure { status, details } => {
                write!(f, "Provider failure ({}): {}", status, details)
            }
            Self::Persistence(msg) => write!(f, "Persistence error: {}", msg),
            Self::NotFound(msg) => write!(f, "Not found: {}", msg),
            Self::Config(msg) => write!(f, "Configuration error: {}", msg),
            Self::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

impl AppError {
    /// HTTP status used when the error is returned to a caller
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::PaymentRequired(_) | Self::ChargeDeclined(_) => StatusCode::PAYMENT_REQUIRED,
            Self::ProviderFailure { status, .. } => {
                if status.is_client_error() || status.is_server_error() {
                    *status
                } else {
                    StatusCode::BAD_GATEWAY
                }
            }
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Persistence(_) | Self::Config(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_message = match &self {
            Self::Validation(msg)
            | Self::PaymentRequired(msg)
            | Self::ChargeDeclined(msg)
            | Self::NotFound(msg) => msg.clone(),
            Self::ProviderFailure { details, .. } => details.clone(),
            // Internal details stay in the logs
            Self::Persistence(_) | Self::Config(_) | Self::Internal(_) => {
                tracing::error!(error = %self, "Request failed with internal error");
                "Internal server error".to_string()
            }
        };

        let body = Json(json!({
            "error": {
                "message": error_message,
                "type": error_type_name(&self),
            }
        }));

        (status, body).into_response()
    }
}

fn error_type_name(error: &AppError) -> &'static str {
    match error {
        AppError::Validation(_) => "validation_error",
        AppError::PaymentRequired(_) => "payment_required",
        AppError::ChargeDeclined(_) => "charge_declined",
        AppError::ProviderFailure { .. } => "provider_failure",
        AppError::Persistence(_) => "persistence_error",
        AppError::NotFound(_) => "not_found",
        AppError::Config(_) => "config_error",
        AppError::Internal(_) => "internal_error",
    }
}

impl From<ValidationError> for AppError {
    fn from(err: ValidationError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        let status = err.status().unwrap_or(StatusCode::BAD_GATEWAY);
        Self::ProviderFailure {
            status,
            details: format!("HTTP request error: {}", err),
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        Self::Internal(format!("Database error: {}", err))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(format!("JSON error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = AppError::ChargeDeclined("Insufficient funds".to_string());
        assert_eq!(error.to_string(), "Charge declined: Insufficient funds");
    }

    #[test]
    fn test_error_type_name() {
        assert_eq!(
            error_type_name(&AppError::PaymentRequired("test".to_string())),
            "payment_required"
        );
        assert_eq!(
            error_type_name(&AppError::Validation("test".to_string())),
            "validation_error"
        );
    }

    #[test]
    fn test_provider_failure_keeps_upstream_status() {
        let error = AppError::ProviderFailure {
            status: StatusCode::TOO_MANY_REQUESTS,
            details: "rate limited".to_string(),
        };
        assert_eq!(error.status_code(), StatusCode::TOO_MANY_REQUESTS);

        let odd = AppError::ProviderFailure {
            status: StatusCode::OK,
            details: "no images in response".to_string(),
        };
        assert_eq!(odd.status_code(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_error_response() {
        let error = AppError::PaymentRequired("Balance is zero".to_string());
        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
    }

    #[tokio::test]
    async fn test_internal_error_hides_details() {
        let error = AppError::Internal("db path /secret/x.db unreadable".to_string());
        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"]["message"], "Internal server error");
        assert_eq!(json["error"]["type"], "internal_error");
    }
}
