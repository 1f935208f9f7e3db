//! Ledger invariant checks
//!
//! Runnable consistency checks over the minute ledger. Each invariant is a
//! real SQL query; checks only read, never write, and can be run after any
//! webhook replay or settlement batch.

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingResult;

/// A single invariant violation with enough context to debug it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantViolation {
    pub invariant: String,
    pub user_ids: Vec<String>,
    pub description: String,
    pub context: serde_json::Value,
    pub severity: ViolationSeverity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViolationSeverity {
    /// Users may be billed incorrectly
    Critical,
    /// Data inconsistency that needs attention
    High,
    /// Should investigate
    Medium,
}

impl std::fmt::Display for ViolationSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViolationSeverity::Critical => write!(f, "CRITICAL"),
            ViolationSeverity::High => write!(f, "HIGH"),
            ViolationSeverity::Medium => write!(f, "MEDIUM"),
        }
    }
}

/// Summary of a full invariant run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantCheckSummary {
    pub checked_at: OffsetDateTime,
    pub checks_run: usize,
    pub checks_failed: usize,
    pub violations: Vec<InvariantViolation>,
    pub healthy: bool,
}

#[derive(Debug, sqlx::FromRow)]
struct NegativePoolRow {
    user_id: String,
    balance_minutes: i64,
    subscription_minutes_remaining: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct BadChargeRow {
    id: Uuid,
    user_id: String,
    duration_seconds: i64,
    minutes_charged: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct OrphanRemainderRow {
    user_id: String,
    subscription_minutes_remaining: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct MissingCustomerRow {
    user_id: String,
    subscription_tier: String,
}

#[derive(Debug, sqlx::FromRow)]
struct BadBillingTypeRow {
    id: Uuid,
    user_id: String,
    billing_type: String,
}

/// Read-only consistency checker over the ledger tables
pub struct InvariantChecker {
    pool: PgPool,
}

impl InvariantChecker {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn run_all_checks(&self) -> BillingResult<InvariantCheckSummary> {
        let now = OffsetDateTime::now_utc();
        let mut violations = Vec::new();

        violations.extend(self.check_non_negative_pools().await?);
        violations.extend(self.check_charge_matches_duration().await?);
        violations.extend(self.check_remainder_implies_tier().await?);
        violations.extend(self.check_subscriber_has_customer().await?);
        violations.extend(self.check_billing_type_in_enum().await?);

        let checks_run = 5;
        let checks_failed = violations
            .iter()
            .map(|v| &v.invariant)
            .collect::<std::collections::HashSet<_>>()
            .len();

        Ok(InvariantCheckSummary {
            checked_at: now,
            checks_run,
            checks_failed,
            healthy: violations.is_empty(),
            violations,
        })
    }

    /// Pools are never negative. The CHECK constraints enforce this at
    /// write time; this catches constraint drift after manual surgery.
    async fn check_non_negative_pools(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<NegativePoolRow> = sqlx::query_as(
            r#"
            SELECT user_id, balance_minutes, subscription_minutes_remaining
            FROM accounts
            WHERE balance_minutes < 0 OR subscription_minutes_remaining < 0
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "non_negative_pools".to_string(),
                user_ids: vec![row.user_id],
                description: "Account has a negative minute pool".to_string(),
                context: serde_json::json!({
                    "balance_minutes": row.balance_minutes,
                    "subscription_minutes_remaining": row.subscription_minutes_remaining,
                }),
                severity: ViolationSeverity::Critical,
            })
            .collect())
    }

    /// Every usage record charges exactly ceil(duration / 60) minutes.
    async fn check_charge_matches_duration(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<BadChargeRow> = sqlx::query_as(
            r#"
            SELECT id, user_id, duration_seconds, minutes_charged
            FROM usage_records
            WHERE minutes_charged <> CEIL(duration_seconds / 60.0)
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "charge_matches_duration".to_string(),
                user_ids: vec![row.user_id],
                description: format!(
                    "Usage record {} charged {} minutes for {} seconds",
                    row.id, row.minutes_charged, row.duration_seconds
                ),
                context: serde_json::json!({
                    "record_id": row.id,
                    "duration_seconds": row.duration_seconds,
                    "minutes_charged": row.minutes_charged,
                }),
                severity: ViolationSeverity::High,
            })
            .collect())
    }

    /// A subscription remainder without a tier tag is unreachable by any
    /// debit and indicates a broken cancellation.
    async fn check_remainder_implies_tier(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<OrphanRemainderRow> = sqlx::query_as(
            r#"
            SELECT user_id, subscription_minutes_remaining
            FROM accounts
            WHERE subscription_tier IS NULL AND subscription_minutes_remaining > 0
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "remainder_implies_tier".to_string(),
                user_ids: vec![row.user_id],
                description: "Subscription minutes remain but no tier is set".to_string(),
                context: serde_json::json!({
                    "subscription_minutes_remaining": row.subscription_minutes_remaining,
                }),
                severity: ViolationSeverity::High,
            })
            .collect())
    }

    /// Every subscribed account should carry the Stripe customer reference
    /// that renewal webhooks correlate on.
    async fn check_subscriber_has_customer(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<MissingCustomerRow> = sqlx::query_as(
            r#"
            SELECT user_id, subscription_tier
            FROM accounts
            WHERE subscription_tier IS NOT NULL AND stripe_customer_id IS NULL
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "subscriber_has_customer".to_string(),
                user_ids: vec![row.user_id],
                description: "Subscribed account has no Stripe customer reference".to_string(),
                context: serde_json::json!({
                    "subscription_tier": row.subscription_tier,
                }),
                severity: ViolationSeverity::Medium,
            })
            .collect())
    }

    /// Usage record billing types stay within the known set. The CHECK
    /// constraint enforces this; drift here means the constraint was dropped.
    async fn check_billing_type_in_enum(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<BadBillingTypeRow> = sqlx::query_as(
            r#"
            SELECT id, user_id, billing_type
            FROM usage_records
            WHERE billing_type NOT IN ('free_tier', 'subscription', 'credits')
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "billing_type_in_enum".to_string(),
                user_ids: vec![row.user_id],
                description: format!(
                    "Usage record {} has unknown billing type {}",
                    row.id, row.billing_type
                ),
                context: serde_json::json!({
                    "record_id": row.id,
                    "billing_type": row.billing_type,
                }),
                severity: ViolationSeverity::High,
            })
            .collect())
    }
}
