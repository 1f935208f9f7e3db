//! API error types

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use voxledger_billing::BillingError;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Billing not available")]
    BillingUnavailable,

    #[error(transparent)]
    Billing(#[from] BillingError),

    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BillingUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Billing(e) => match e {
                BillingError::InsufficientFunds { .. } => StatusCode::PAYMENT_REQUIRED,
                BillingError::WebhookSignatureInvalid => StatusCode::BAD_REQUEST,
                BillingError::UnexpectedPayload(_) => StatusCode::BAD_REQUEST,
                BillingError::NotConfigured(_) | BillingError::StoreUnavailable(_) => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
                BillingError::Stripe(_) => StatusCode::BAD_GATEWAY,
                BillingError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to hand to clients. Infrastructure details stay in logs.
    fn public_message(&self) -> String {
        match self {
            ApiError::BadRequest(msg) | ApiError::NotFound(msg) => msg.clone(),
            ApiError::BillingUnavailable => "Billing is not available".to_string(),
            ApiError::Billing(BillingError::InsufficientFunds { needed }) => {
                format!("Insufficient minutes: {} needed", needed)
            }
            ApiError::Billing(BillingError::WebhookSignatureInvalid) => {
                "Invalid webhook signature".to_string()
            }
            ApiError::Billing(BillingError::UnexpectedPayload(_)) => {
                "Malformed billing request".to_string()
            }
            ApiError::Billing(
                BillingError::NotConfigured(_) | BillingError::StoreUnavailable(_),
            ) => "Billing temporarily unavailable".to_string(),
            ApiError::Billing(BillingError::Stripe(_)) => {
                "Payment provider error".to_string()
            }
            _ => "Internal server error".to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        if status.is_server_error() {
            tracing::error!(error = %self, status = %status, "Request failed");
        } else {
            tracing::debug!(error = %self, status = %status, "Request rejected");
        }

        (status, Json(json!({ "error": self.public_message() }))).into_response()
    }
}
