//! Session settlement and usage history endpoints

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;

use voxledger_billing::{BillingError, UsageRecord};

use crate::error::{ApiError, ApiResult};
use crate::routes::require_user_id;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordUsageRequest {
    pub agent_id: String,
    pub duration_seconds: u64,
    /// Idempotency token; retried deliveries with the same id settle once
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordUsageResponse {
    pub success: bool,
    pub billing_type: &'static str,
    pub minutes_charged: i64,
    pub duplicate: bool,
}

/// POST /usage - settle a completed session.
///
/// Transient store failures are retried with backoff before giving up;
/// insufficient funds and other terminal errors surface immediately.
pub async fn record_usage(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<RecordUsageRequest>,
) -> ApiResult<Json<RecordUsageResponse>> {
    let user_id = require_user_id(&headers)?;

    if req.agent_id.is_empty() {
        return Err(ApiError::BadRequest("agentId must not be empty".to_string()));
    }

    let billing = state.billing_service().ok_or(ApiError::BillingUnavailable)?;

    let strategy = ExponentialBackoff::from_millis(50).map(jitter).take(3);

    let settlement = RetryIf::spawn(
        strategy,
        || {
            billing.usage.settle(
                &user_id,
                &req.agent_id,
                req.duration_seconds,
                req.session_id.as_deref(),
            )
        },
        |e: &BillingError| e.is_transient(),
    )
    .await?;

    Ok(Json(RecordUsageResponse {
        success: true,
        billing_type: settlement.billing_type.as_str(),
        minutes_charged: settlement.minutes_charged,
        duplicate: settlement.duplicate,
    }))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageHistoryResponse {
    pub history: Vec<UsageRecord>,
}

/// GET /usage - most recent usage records for the caller, newest first.
pub async fn usage_history(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<UsageHistoryResponse>> {
    let user_id = require_user_id(&headers)?;
    let billing = state.billing_service().ok_or(ApiError::BillingUnavailable)?;

    let limit = query.limit.unwrap_or(20).clamp(1, 200);
    let history = billing.accounts.usage_history(&user_id, limit).await?;

    Ok(Json(UsageHistoryResponse { history }))
}
