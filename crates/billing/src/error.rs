//! Billing error taxonomy
//!
//! Admission and settlement failures are typed results, never panics: the
//! caller decides user-facing messaging. Webhook errors distinguish "reject
//! the delivery" (signature failure) from "accept but ignore" (unknown event,
//! missing metadata) so the payment provider does not retry forever.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BillingError {
    /// Store credentials or webhook secret missing. Degrades billing to
    /// disabled, never fatal to the process.
    #[error("billing not configured: {0}")]
    NotConfigured(String),

    /// Webhook signature verification failed. The delivery is rejected and
    /// no state changes.
    #[error("webhook signature verification failed")]
    WebhookSignatureInvalid,

    /// No pool can fully fund the requested charge. Surfaced to the caller
    /// as a payment-required response.
    #[error("insufficient minutes: {needed} minute(s) required")]
    InsufficientFunds { needed: i64 },

    /// Webhook payload did not carry the object its event type promises.
    #[error("unexpected webhook payload: {0}")]
    UnexpectedPayload(String),

    /// Transient storage failure. Retryable; must never be conflated with
    /// InsufficientFunds.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("stripe error: {0}")]
    Stripe(#[from] stripe::StripeError),

    #[error("{0}")]
    Internal(String),
}

impl From<sqlx::Error> for BillingError {
    fn from(e: sqlx::Error) -> Self {
        BillingError::StoreUnavailable(e.to_string())
    }
}

impl BillingError {
    /// Whether the caller should retry the operation.
    pub fn is_transient(&self) -> bool {
        matches!(self, BillingError::StoreUnavailable(_))
    }
}

pub type BillingResult<T> = Result<T, BillingError>;
