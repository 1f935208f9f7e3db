//! Usage metering and settlement
//!
//! Converts a completed session's elapsed time into a minute charge and
//! debits the account exactly once. The whole settlement runs in one
//! transaction: check the session's idempotency token, decrement the funding
//! pool with a guarded update, claim the token, commit. No partial debits,
//! no usage record on failure.

use sqlx::PgPool;
use uuid::Uuid;

use voxledger_shared::{Allowance, BillingType};

use crate::accounts::{Account, UsageRecord, DEFAULT_FREE_MINUTES};
use crate::error::{BillingError, BillingResult};

/// Outcome of a successful settlement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settlement {
    pub billing_type: BillingType,
    pub minutes_charged: i64,
    /// True when the idempotency token had already been settled; the
    /// original outcome is returned and nothing was mutated.
    pub duplicate: bool,
}

/// Minutes billed for a session: seconds rounded up to whole minutes.
pub fn minutes_charged(duration_seconds: u64) -> u64 {
    duration_seconds.div_ceil(60)
}

/// Select the pool that will fund a charge of `minutes`, using the same
/// precedence as admission control. A pool pays only when it fully covers
/// the charge; otherwise the next pool is tried.
pub fn select_pool(account: &Account, minutes: u64) -> Option<BillingType> {
    match account.allowance() {
        Some(allowance) if allowance.covers(minutes) => {
            return Some(BillingType::Subscription);
        }
        _ => {}
    }

    if account.balance_minutes >= 0 && account.balance_minutes as u64 >= minutes {
        return Some(account.balance_billing_type());
    }

    None
}

/// Settles completed sessions against the account store
#[derive(Clone)]
pub struct UsageMeter {
    pool: PgPool,
}

impl UsageMeter {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Settle a completed session.
    ///
    /// `session_id` is the caller's idempotency token; a duplicate token
    /// silently no-ops and reports the original outcome. Ending a session
    /// early is a normal path, so `duration_seconds` is whatever was
    /// actually observed, including zero.
    pub async fn settle(
        &self,
        user_id: &str,
        agent_id: &str,
        duration_seconds: u64,
        session_id: Option<&str>,
    ) -> BillingResult<Settlement> {
        let minutes = minutes_charged(duration_seconds);

        let mut tx = self.pool.begin().await?;

        // The token must be checked before any pool arithmetic: a retry of a
        // settlement that already drained the funds would otherwise read an
        // empty pool and misreport insufficient funds.
        if let Some(token) = session_id {
            let existing: Option<UsageRecord> =
                sqlx::query_as("SELECT * FROM usage_records WHERE session_id = $1")
                    .bind(token)
                    .fetch_optional(&mut *tx)
                    .await?;

            if let Some(record) = existing {
                tracing::info!(
                    session_id = %token,
                    "Duplicate settlement for already-billed session - no-op"
                );
                return settlement_from_record(&record);
            }
        }

        // Settlement may be a user's very first interaction; lazily create
        // the default free-tier row like any other access.
        sqlx::query(
            r#"
            INSERT INTO accounts (user_id, balance_minutes)
            VALUES ($1, $2)
            ON CONFLICT (user_id) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(DEFAULT_FREE_MINUTES)
        .execute(&mut *tx)
        .await?;

        // Row lock serializes concurrent settlements for the same user; the
        // guarded decrements below stay as a second line of defense.
        let account: Account =
            sqlx::query_as("SELECT * FROM accounts WHERE user_id = $1 FOR UPDATE")
                .bind(user_id)
                .fetch_one(&mut *tx)
                .await?;

        let Some(billing_type) = select_pool(&account, minutes) else {
            tracing::info!(
                user_id = %user_id,
                minutes = minutes,
                balance = account.balance_minutes,
                "Settlement denied: no pool covers the charge"
            );
            return Err(BillingError::InsufficientFunds {
                needed: minutes as i64,
            });
        };

        // Unlimited subscriptions record usage without mutating any counter.
        if minutes > 0 {
            let decremented = match billing_type {
                BillingType::Subscription => {
                    if account.allowance() == Some(Allowance::Unlimited) {
                        true
                    } else {
                        let result = sqlx::query(
                            r#"
                            UPDATE accounts
                            SET subscription_minutes_remaining =
                                    subscription_minutes_remaining - $2,
                                updated_at = NOW()
                            WHERE user_id = $1
                              AND subscription_minutes_remaining >= $2
                            "#,
                        )
                        .bind(user_id)
                        .bind(minutes as i64)
                        .execute(&mut *tx)
                        .await?;
                        result.rows_affected() == 1
                    }
                }
                BillingType::Credits | BillingType::FreeTier => {
                    let result = sqlx::query(
                        r#"
                        UPDATE accounts
                        SET balance_minutes = balance_minutes - $2,
                            updated_at = NOW()
                        WHERE user_id = $1 AND balance_minutes >= $2
                        "#,
                    )
                    .bind(user_id)
                    .bind(minutes as i64)
                    .execute(&mut *tx)
                    .await?;
                    result.rows_affected() == 1
                }
            };

            if !decremented {
                tx.rollback().await?;
                return Err(BillingError::InsufficientFunds {
                    needed: minutes as i64,
                });
            }
        }

        // Claim the idempotency token. A conflict means this session was
        // already settled; roll the debit back and report the original.
        let inserted = sqlx::query(
            r#"
            INSERT INTO usage_records
                (id, session_id, user_id, agent_id, duration_seconds,
                 minutes_charged, billing_type)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (session_id) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(session_id)
        .bind(user_id)
        .bind(agent_id)
        .bind(duration_seconds as i64)
        .bind(minutes as i64)
        .bind(billing_type.as_str())
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            tx.rollback().await?;
            return self.duplicate_settlement(session_id).await;
        }

        tx.commit().await?;

        tracing::info!(
            user_id = %user_id,
            agent_id = %agent_id,
            minutes = minutes,
            billing_type = billing_type.as_str(),
            "Session settled"
        );

        Ok(Settlement {
            billing_type,
            minutes_charged: minutes as i64,
            duplicate: false,
        })
    }

    /// Report the outcome of the settlement that already claimed this token.
    /// Reached only when a concurrent settlement won the claim between the
    /// duplicate pre-check and the insert.
    async fn duplicate_settlement(&self, session_id: Option<&str>) -> BillingResult<Settlement> {
        let Some(token) = session_id else {
            // Unreachable: NULL tokens never conflict.
            return Err(BillingError::Internal(
                "usage record conflict without a session token".to_string(),
            ));
        };

        let record: UsageRecord =
            sqlx::query_as("SELECT * FROM usage_records WHERE session_id = $1")
                .bind(token)
                .fetch_one(&self.pool)
                .await?;

        tracing::info!(
            session_id = %token,
            "Duplicate settlement for already-billed session - no-op"
        );

        settlement_from_record(&record)
    }
}

/// The outcome originally recorded for a settled session.
fn settlement_from_record(record: &UsageRecord) -> BillingResult<Settlement> {
    let billing_type = BillingType::from_str(&record.billing_type).ok_or_else(|| {
        BillingError::Internal(format!(
            "usage record {} has unknown billing type {}",
            record.id, record.billing_type
        ))
    })?;

    Ok(Settlement {
        billing_type,
        minutes_charged: record.minutes_charged,
        duplicate: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn charges_round_up_to_whole_minutes() {
        assert_eq!(minutes_charged(0), 0);
        assert_eq!(minutes_charged(1), 1);
        assert_eq!(minutes_charged(60), 1);
        assert_eq!(minutes_charged(61), 2);
        assert_eq!(minutes_charged(125), 3);
        assert_eq!(minutes_charged(3600), 60);
    }
}
