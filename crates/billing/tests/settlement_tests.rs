// Test file - these are expected patterns in test code
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

//! Settlement integration tests against a live Postgres.
//!
//! These exercise the transactional paths the pure-function tests cannot:
//! idempotent duplicate settlement, lazy first-access account creation, and
//! concurrent settlements racing for the same pool. Each test runs against
//! `DATABASE_URL` and is skipped when it is unset, so the suite stays green
//! on machines without a database.

use sqlx::PgPool;
use uuid::Uuid;

use voxledger_billing::{AccountStore, BillingError, UsageMeter};
use voxledger_shared::BillingType;

async fn test_pool() -> Option<PgPool> {
    let url = std::env::var("DATABASE_URL").ok()?;
    let pool = voxledger_shared::create_pool(&url)
        .await
        .expect("failed to connect to DATABASE_URL");
    voxledger_shared::run_migrations(&pool)
        .await
        .expect("failed to run migrations");
    Some(pool)
}

fn fresh_user() -> String {
    format!("it_user_{}", Uuid::new_v4())
}

// =============================================================================
// LDG-I01: Retrying a settlement that already drained the funds no-ops and
//          reports the original outcome, not insufficient funds
// =============================================================================
#[tokio::test]
async fn test_duplicate_settlement_noops_after_funds_are_spent() {
    let Some(pool) = test_pool().await else {
        eprintln!("skipping: DATABASE_URL not set");
        return;
    };
    let store = AccountStore::new(pool.clone());
    let meter = UsageMeter::new(pool);

    let user = fresh_user();
    let session = format!("sess_{}", Uuid::new_v4());

    // 3 free minutes + 60 purchased
    store.grant_credits(&user, 60, Some("cus_it_1")).await.unwrap();

    let first = meter
        .settle(&user, "agent_a", 3600, Some(&session))
        .await
        .unwrap();
    assert!(!first.duplicate);
    assert_eq!(first.minutes_charged, 60);
    assert_eq!(first.billing_type, BillingType::Credits);

    let balance_after_first = store.get_or_create(&user).await.unwrap().balance_minutes;
    assert_eq!(balance_after_first, 3);

    // Identical retry: the remaining 3 minutes cannot cover another 60, so
    // anything but a no-op would misreport or double-bill
    let retry = meter
        .settle(&user, "agent_a", 3600, Some(&session))
        .await
        .unwrap();
    assert!(retry.duplicate);
    assert_eq!(retry.minutes_charged, 60);
    assert_eq!(retry.billing_type, BillingType::Credits);

    let balance_after_retry = store.get_or_create(&user).await.unwrap().balance_minutes;
    assert_eq!(balance_after_retry, 3, "retry must not debit again");
}

// =============================================================================
// LDG-I02: A user whose very first interaction is settlement gets the lazy
//          free-tier grant, not a denial
// =============================================================================
#[tokio::test]
async fn test_first_access_settlement_uses_free_grant() {
    let Some(pool) = test_pool().await else {
        eprintln!("skipping: DATABASE_URL not set");
        return;
    };
    let store = AccountStore::new(pool.clone());
    let meter = UsageMeter::new(pool);

    let user = fresh_user();
    let session = format!("sess_{}", Uuid::new_v4());

    let settlement = meter
        .settle(&user, "agent_a", 120, Some(&session))
        .await
        .unwrap();
    assert_eq!(settlement.minutes_charged, 2);
    assert_eq!(settlement.billing_type, BillingType::FreeTier);
    assert!(!settlement.duplicate);

    let account = store.get_or_create(&user).await.unwrap();
    assert_eq!(account.balance_minutes, 1);
}

// =============================================================================
// LDG-I03: Two simultaneous settlements with funds for only one yield exactly
//          one success and one insufficient-funds error, never a negative pool
// =============================================================================
#[tokio::test]
async fn test_concurrent_settlements_cannot_overdraw() {
    let Some(pool) = test_pool().await else {
        eprintln!("skipping: DATABASE_URL not set");
        return;
    };
    let store = AccountStore::new(pool.clone());
    let meter = UsageMeter::new(pool);

    // The 3-minute free grant funds exactly one 3-minute session
    let user = fresh_user();
    store.get_or_create(&user).await.unwrap();

    let (meter_a, meter_b) = (meter.clone(), meter.clone());
    let (user_a, user_b) = (user.clone(), user.clone());
    let session_a = format!("sess_{}", Uuid::new_v4());
    let session_b = format!("sess_{}", Uuid::new_v4());

    let task_a = tokio::spawn(async move {
        meter_a.settle(&user_a, "agent_a", 180, Some(&session_a)).await
    });
    let task_b = tokio::spawn(async move {
        meter_b.settle(&user_b, "agent_b", 180, Some(&session_b)).await
    });

    let results = [task_a.await.unwrap(), task_b.await.unwrap()];

    let successes = results.iter().filter(|r| r.is_ok()).count();
    let denials = results
        .iter()
        .filter(|r| matches!(r, Err(BillingError::InsufficientFunds { .. })))
        .count();
    assert_eq!(successes, 1, "exactly one settlement may win the pool");
    assert_eq!(denials, 1, "the loser must see insufficient funds");

    let account = store.get_or_create(&user).await.unwrap();
    assert_eq!(account.balance_minutes, 0);
}

// =============================================================================
// LDG-I04: Concurrent settlements with the same token settle once; the loser
//          of the claim reports the winner's outcome
// =============================================================================
#[tokio::test]
async fn test_concurrent_duplicate_tokens_settle_once() {
    let Some(pool) = test_pool().await else {
        eprintln!("skipping: DATABASE_URL not set");
        return;
    };
    let store = AccountStore::new(pool.clone());
    let meter = UsageMeter::new(pool);

    let user = fresh_user();
    store.grant_credits(&user, 60, Some("cus_it_2")).await.unwrap();
    let session = format!("sess_{}", Uuid::new_v4());

    let (meter_a, meter_b) = (meter.clone(), meter.clone());
    let (user_a, user_b) = (user.clone(), user.clone());
    let (session_a, session_b) = (session.clone(), session.clone());

    let task_a = tokio::spawn(async move {
        meter_a.settle(&user_a, "agent_a", 600, Some(&session_a)).await
    });
    let task_b = tokio::spawn(async move {
        meter_b.settle(&user_b, "agent_a", 600, Some(&session_b)).await
    });

    let a = task_a.await.unwrap().unwrap();
    let b = task_b.await.unwrap().unwrap();

    assert_eq!(
        [a.duplicate, b.duplicate].iter().filter(|d| **d).count(),
        1,
        "exactly one call performs the debit"
    );
    assert_eq!(a.minutes_charged, 10);
    assert_eq!(b.minutes_charged, 10);

    // One 10-minute debit against 3 + 60
    let account = store.get_or_create(&user).await.unwrap();
    assert_eq!(account.balance_minutes, 53);
}
