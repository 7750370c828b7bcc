//! HTTP error mapping for the registrar API.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::{error, warn};

use crate::error::RegistrationError;

/// API-facing error: a domain error plus its HTTP mapping.
///
/// Business rejections map to 4xx, gateway trouble to 502, and invariant
/// violations to 500 (logged loudly; they mean a bug, not bad input).
#[derive(Debug, Clone)]
pub struct ApiError(pub RegistrationError);

impl ApiError {
    /// HTTP status for the wrapped error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match &self.0 {
            RegistrationError::Validation { .. }
            | RegistrationError::InvalidAmount { .. }
            | RegistrationError::EventIsFree { .. } => StatusCode::BAD_REQUEST,

            RegistrationError::InsufficientFunds { .. } => StatusCode::PAYMENT_REQUIRED,

            RegistrationError::UserNotFound { .. }
            | RegistrationError::EventNotFound { .. }
            | RegistrationError::PaymentNotFound { .. }
            | RegistrationError::NotRegistered { .. } => StatusCode::NOT_FOUND,

            RegistrationError::AlreadyRegistered { .. }
            | RegistrationError::DuplicateRefund { .. }
            | RegistrationError::CancellationWindowClosed { .. }
            | RegistrationError::EventAlreadyEnded { .. } => StatusCode::CONFLICT,

            RegistrationError::PaymentGateway { .. } => StatusCode::BAD_GATEWAY,

            RegistrationError::InvariantViolation { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code for clients.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match &self.0 {
            RegistrationError::Validation { .. } => "validation_failed",
            RegistrationError::InvalidAmount { .. } => "invalid_amount",
            RegistrationError::EventIsFree { .. } => "event_is_free",
            RegistrationError::InsufficientFunds { .. } => "insufficient_funds",
            RegistrationError::UserNotFound { .. } => "user_not_found",
            RegistrationError::EventNotFound { .. } => "event_not_found",
            RegistrationError::PaymentNotFound { .. } => "payment_not_found",
            RegistrationError::NotRegistered { .. } => "not_registered",
            RegistrationError::AlreadyRegistered { .. } => "already_registered",
            RegistrationError::DuplicateRefund { .. } => "duplicate_refund",
            RegistrationError::CancellationWindowClosed { .. } => "cancellation_window_closed",
            RegistrationError::EventAlreadyEnded { .. } => "event_already_ended",
            RegistrationError::PaymentGateway { .. } => "payment_gateway_error",
            RegistrationError::InvariantViolation { .. } => "internal_error",
        }
    }

    /// Message safe to show to clients.
    #[must_use]
    pub fn message(&self) -> String {
        if self.0.is_invariant_violation() {
            // Details stay in the logs.
            "Internal error".to_string()
        } else {
            self.0.to_string()
        }
    }
}

impl From<RegistrationError> for ApiError {
    fn from(err: RegistrationError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self.0, status = %status, "Request failed");
        } else if status == StatusCode::BAD_GATEWAY {
            warn!(error = %self.0, "Payment gateway unavailable");
        }

        let body = Json(json!({
            "error": {
                "code": self.code(),
                "message": self.message(),
                "retryable": self.0.is_retryable(),
            }
        }));

        (status, body).into_response()
    }
}
