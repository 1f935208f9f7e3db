//! Checkout and billing portal endpoints

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;

use voxledger_billing::CheckoutResponse;

use crate::error::{ApiError, ApiResult};
use crate::routes::require_user_id;
use crate::state::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckoutKind {
    Package,
    Subscription,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    pub kind: CheckoutKind,
    /// Package id (`pkg_*`) or subscription plan id (`sub_*`)
    pub id: String,
    pub email: String,
    pub success_url: String,
    pub cancel_url: String,
}

/// POST /payments/checkout - create a Stripe Checkout session for a minute
/// package or a subscription plan.
pub async fn create_checkout(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CheckoutRequest>,
) -> ApiResult<Json<CheckoutResponse>> {
    let user_id = require_user_id(&headers)?;
    let billing = state.billing_service().ok_or(ApiError::BillingUnavailable)?;

    let known = match req.kind {
        CheckoutKind::Package => billing.checkout.catalog().package(&req.id).is_some(),
        CheckoutKind::Subscription => billing.checkout.catalog().subscription(&req.id).is_some(),
    };
    if !known {
        return Err(ApiError::NotFound(format!("Unknown product {}", req.id)));
    }

    let response = match req.kind {
        CheckoutKind::Package => {
            billing
                .checkout
                .create_package_checkout(
                    &req.id,
                    &user_id,
                    &req.email,
                    &req.success_url,
                    &req.cancel_url,
                )
                .await?
        }
        CheckoutKind::Subscription => {
            billing
                .checkout
                .create_subscription_checkout(
                    &req.id,
                    &user_id,
                    &req.email,
                    &req.success_url,
                    &req.cancel_url,
                )
                .await?
        }
    };

    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortalRequest {
    pub return_url: String,
}

/// POST /payments/portal - create a billing portal session so subscribers
/// can manage or cancel their plan.
pub async fn create_portal(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<PortalRequest>,
) -> ApiResult<Json<CheckoutResponse>> {
    let user_id = require_user_id(&headers)?;
    let billing = state.billing_service().ok_or(ApiError::BillingUnavailable)?;

    let account = billing.accounts.get_or_create(&user_id).await?;
    let Some(customer_id) = account.stripe_customer_id else {
        return Err(ApiError::BadRequest(
            "No billing profile for this account yet".to_string(),
        ));
    };

    let response = billing
        .checkout
        .create_portal_session(&customer_id, &req.return_url)
        .await?;

    Ok(Json(response))
}
