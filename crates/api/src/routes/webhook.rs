//! Stripe webhook endpoint

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde_json::json;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// POST /payments/webhook - signed Stripe event deliveries.
///
/// The body must stay raw: signature verification runs over the exact bytes
/// Stripe sent. Verification failures are 400 so Stripe surfaces them in the
/// dashboard; processing failures are 5xx so Stripe redelivers.
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> ApiResult<Json<serde_json::Value>> {
    let billing = state.billing_service().ok_or(ApiError::BillingUnavailable)?;

    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::BadRequest("Missing stripe-signature header".to_string()))?;

    let event = billing.webhooks.verify_event(&body, signature)?;
    let outcome = billing.webhooks.handle_event(event).await?;

    Ok(Json(json!({ "received": true, "outcome": outcome.as_str() })))
}
