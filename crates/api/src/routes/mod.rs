//! HTTP routes

pub mod checkout;
pub mod credits;
pub mod usage;
pub mod webhook;

use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/credits", get(credits::get_credits))
        .route("/usage", post(usage::record_usage).get(usage::usage_history))
        .route("/payments/webhook", post(webhook::stripe_webhook))
        .route("/payments/checkout", post(checkout::create_checkout))
        .route("/payments/portal", post(checkout::create_portal))
        .route("/admin/invariants", get(credits::run_invariant_checks))
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

/// Caller identity from the `x-user-id` header.
///
/// Authentication is terminated upstream; the gateway injects the verified
/// user id before the request reaches this service.
pub(crate) fn require_user_id(headers: &HeaderMap) -> ApiResult<String> {
    headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ApiError::BadRequest("Missing x-user-id header".to_string()))
}
