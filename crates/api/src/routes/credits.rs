//! Credit balance and ledger health endpoints

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use voxledger_billing::DEFAULT_FREE_MINUTES;
use voxledger_shared::FundingSource;

use crate::error::{ApiError, ApiResult};
use crate::routes::require_user_id;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditsQuery {
    pub user_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditsResponse {
    pub balance_minutes: i64,
    pub subscription_tier: Option<String>,
    /// `-1` means unlimited
    pub subscription_minutes_remaining: i64,
    #[serde(with = "time::serde::rfc3339::option")]
    pub subscription_reset_date: Option<OffsetDateTime>,
    pub can_start: bool,
    /// Minutes the selected pool can fund; `-1` means unlimited
    pub available_minutes: i64,
    pub source: &'static str,
}

/// GET /credits - the caller's minute pools and whether a session may start.
///
/// Identity comes from the `x-user-id` header or a `userId` query parameter.
/// Without billing configured every caller is served the static free-tier
/// default; nothing is persisted until billing comes up.
pub async fn get_credits(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<CreditsQuery>,
) -> ApiResult<Json<CreditsResponse>> {
    let user_id = match query.user_id.filter(|s| !s.is_empty()) {
        Some(id) => id,
        None => require_user_id(&headers)?,
    };

    let Some(billing) = state.billing_service() else {
        return Ok(Json(CreditsResponse {
            balance_minutes: DEFAULT_FREE_MINUTES,
            subscription_tier: None,
            subscription_minutes_remaining: 0,
            subscription_reset_date: None,
            can_start: true,
            available_minutes: DEFAULT_FREE_MINUTES,
            source: FundingSource::Credits.as_str(),
        }));
    };

    let (account, admission) = billing.admission.can_start(&user_id).await?;

    let remaining = account
        .allowance()
        .map(|a| a.as_api_minutes())
        .unwrap_or(0);

    Ok(Json(CreditsResponse {
        balance_minutes: account.balance_minutes,
        subscription_tier: account.subscription_tier,
        subscription_minutes_remaining: remaining,
        subscription_reset_date: account.subscription_reset_date,
        can_start: admission.can_start,
        available_minutes: admission.available.as_api_minutes(),
        source: admission.source.as_str(),
    }))
}

/// GET /admin/invariants - run the ledger consistency checks.
pub async fn run_invariant_checks(
    State(state): State<AppState>,
) -> ApiResult<Json<voxledger_billing::InvariantCheckSummary>> {
    let billing = state.billing_service().ok_or(ApiError::BillingUnavailable)?;
    let summary = billing.invariants.run_all_checks().await?;

    if !summary.healthy {
        tracing::warn!(
            violations = summary.violations.len(),
            "Ledger invariant violations detected"
        );
    }

    Ok(Json(summary))
}
