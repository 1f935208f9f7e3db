//! Account store
//!
//! The durable per-user minute ledger. All mutations are single conditional
//! statements at the storage layer, never read-modify-write in application
//! code: two sessions for the same user can settle concurrently and the only
//! coordination point is this table.

use sqlx::PgPool;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use voxledger_shared::{Allowance, BillingType};

use crate::error::BillingResult;

/// Minutes granted to every account on first access.
pub const DEFAULT_FREE_MINUTES: i64 = 3;

/// One row of the `accounts` table
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Account {
    pub user_id: String,
    pub balance_minutes: i64,
    pub subscription_tier: Option<String>,
    pub subscription_minutes_remaining: i64,
    pub subscription_reset_date: Option<OffsetDateTime>,
    pub stripe_customer_id: Option<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// The reserved tier tag whose allowance is unmetered.
pub const UNLIMITED_TIER: &str = "unlimited";

impl Account {
    /// The subscription allowance, if any. The reserved `unlimited` tag maps
    /// to the tagged variant; the stored remaining counter is ignored for it.
    pub fn allowance(&self) -> Option<Allowance> {
        match self.subscription_tier.as_deref() {
            None => None,
            Some(UNLIMITED_TIER) => Some(Allowance::Unlimited),
            Some(_) => Some(Allowance::Limited(
                self.subscription_minutes_remaining.max(0) as u64,
            )),
        }
    }

    /// Billing type for a debit drawn from `balance_minutes`.
    ///
    /// The sign-up grant shares the balance pool; until the account has ever
    /// attached a payment customer, balance debits are recorded as the free
    /// tier rather than purchased credits.
    pub fn balance_billing_type(&self) -> BillingType {
        if self.stripe_customer_id.is_none() {
            BillingType::FreeTier
        } else {
            BillingType::Credits
        }
    }
}

/// One row of the append-only `usage_records` table
#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct UsageRecord {
    pub id: Uuid,
    pub session_id: Option<String>,
    pub user_id: String,
    pub agent_id: String,
    pub duration_seconds: i64,
    pub minutes_charged: i64,
    pub billing_type: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Durable account operations
#[derive(Clone)]
pub struct AccountStore {
    pool: PgPool,
}

impl AccountStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Fetch the account, inserting the default free-tier row if absent.
    ///
    /// The unique constraint on `user_id` plus ON CONFLICT DO NOTHING means
    /// two concurrent first lookups cannot race-create duplicate rows; the
    /// loser of the insert reads the winner's row.
    pub async fn get_or_create(&self, user_id: &str) -> BillingResult<Account> {
        let inserted: Option<Account> = sqlx::query_as(
            r#"
            INSERT INTO accounts (user_id, balance_minutes)
            VALUES ($1, $2)
            ON CONFLICT (user_id) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(DEFAULT_FREE_MINUTES)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(account) = inserted {
            tracing::info!(user_id = %user_id, "Created account with free-tier grant");
            return Ok(account);
        }

        let account: Account = sqlx::query_as("SELECT * FROM accounts WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(account)
    }

    /// Atomically add purchased minutes to the credit balance.
    ///
    /// A single increment statement, so concurrent grants cannot lose
    /// updates. `customer_ref` is recorded when the purchase carried one.
    pub async fn grant_credits(
        &self,
        user_id: &str,
        minutes: u64,
        customer_ref: Option<&str>,
    ) -> BillingResult<()> {
        // Row must exist before the increment; lazily create it.
        self.get_or_create(user_id).await?;

        sqlx::query(
            r#"
            UPDATE accounts
            SET balance_minutes = balance_minutes + $2,
                stripe_customer_id = COALESCE($3, stripe_customer_id),
                updated_at = NOW()
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .bind(minutes as i64)
        .bind(customer_ref)
        .execute(&self.pool)
        .await?;

        tracing::info!(user_id = %user_id, minutes = minutes, "Granted credits");
        Ok(())
    }

    /// Upsert the subscription fields after an activation or plan change.
    ///
    /// Idempotent: replaying the same event lands the account in the same
    /// state. Unlimited plans store the reserved tier tag and a zero
    /// remaining counter, never a fake large number.
    pub async fn set_subscription(
        &self,
        user_id: &str,
        tier: &str,
        allowance: Allowance,
        customer_ref: &str,
    ) -> BillingResult<()> {
        let remaining = match allowance {
            Allowance::Unlimited => 0i64,
            Allowance::Limited(m) => m as i64,
        };
        let reset_date = OffsetDateTime::now_utc() + Duration::days(30);

        sqlx::query(
            r#"
            INSERT INTO accounts
                (user_id, balance_minutes, subscription_tier,
                 subscription_minutes_remaining, subscription_reset_date,
                 stripe_customer_id)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (user_id) DO UPDATE SET
                subscription_tier = EXCLUDED.subscription_tier,
                subscription_minutes_remaining = EXCLUDED.subscription_minutes_remaining,
                subscription_reset_date = EXCLUDED.subscription_reset_date,
                stripe_customer_id = EXCLUDED.stripe_customer_id,
                updated_at = NOW()
            "#,
        )
        .bind(user_id)
        .bind(DEFAULT_FREE_MINUTES)
        .bind(tier)
        .bind(remaining)
        .bind(reset_date)
        .bind(customer_ref)
        .execute(&self.pool)
        .await?;

        tracing::info!(
            user_id = %user_id,
            tier = %tier,
            remaining = remaining,
            "Subscription set"
        );
        Ok(())
    }

    /// Clear the subscription after cancellation. Prepaid credits stay.
    pub async fn clear_subscription(&self, user_id: &str, customer_ref: &str) -> BillingResult<()> {
        sqlx::query(
            r#"
            UPDATE accounts
            SET subscription_tier = NULL,
                subscription_minutes_remaining = 0,
                subscription_reset_date = NULL,
                stripe_customer_id = COALESCE(stripe_customer_id, $2),
                updated_at = NOW()
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .bind(customer_ref)
        .execute(&self.pool)
        .await?;

        tracing::info!(user_id = %user_id, "Subscription cleared, credits retained");
        Ok(())
    }

    /// Replace the subscription remainder with the plan's fresh monthly
    /// allotment on a successful renewal invoice.
    pub async fn reset_monthly_allowance(
        &self,
        user_id: &str,
        allowance: Allowance,
    ) -> BillingResult<()> {
        let remaining = match allowance {
            Allowance::Unlimited => 0i64,
            Allowance::Limited(m) => m as i64,
        };
        let reset_date = OffsetDateTime::now_utc() + Duration::days(30);

        let result = sqlx::query(
            r#"
            UPDATE accounts
            SET subscription_minutes_remaining = $2,
                subscription_reset_date = $3,
                updated_at = NOW()
            WHERE user_id = $1 AND subscription_tier IS NOT NULL
            "#,
        )
        .bind(user_id)
        .bind(remaining)
        .bind(reset_date)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            tracing::warn!(
                user_id = %user_id,
                "Renewal invoice for account without a subscription - ignored"
            );
        } else {
            tracing::info!(user_id = %user_id, remaining = remaining, "Monthly allowance reset");
        }
        Ok(())
    }

    /// Most recent usage records for a user, newest first.
    pub async fn usage_history(&self, user_id: &str, limit: i64) -> BillingResult<Vec<UsageRecord>> {
        let records: Vec<UsageRecord> = sqlx::query_as(
            r#"
            SELECT * FROM usage_records
            WHERE user_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(tier: Option<&str>, remaining: i64, balance: i64, customer: Option<&str>) -> Account {
        Account {
            user_id: "u1".to_string(),
            balance_minutes: balance,
            subscription_tier: tier.map(str::to_string),
            subscription_minutes_remaining: remaining,
            subscription_reset_date: None,
            stripe_customer_id: customer.map(str::to_string),
            created_at: OffsetDateTime::now_utc(),
            updated_at: OffsetDateTime::now_utc(),
        }
    }

    #[test]
    fn unlimited_tier_maps_to_tagged_variant() {
        let acct = account(Some("unlimited"), 0, 0, Some("cus_1"));
        assert_eq!(acct.allowance(), Some(Allowance::Unlimited));
    }

    #[test]
    fn limited_tier_exposes_remaining_counter() {
        let acct = account(Some("basic"), 42, 0, Some("cus_1"));
        assert_eq!(acct.allowance(), Some(Allowance::Limited(42)));
        assert_eq!(account(None, 42, 0, None).allowance(), None);
    }

    #[test]
    fn balance_debits_bill_free_tier_until_first_payment() {
        assert_eq!(
            account(None, 0, 3, None).balance_billing_type(),
            BillingType::FreeTier
        );
        assert_eq!(
            account(None, 0, 63, Some("cus_1")).balance_billing_type(),
            BillingType::Credits
        );
    }
}
