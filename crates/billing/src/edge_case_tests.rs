// Test file - these are expected patterns in test code
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

//! Edge Case Tests for the Minute Ledger
//!
//! Tests critical boundary conditions in:
//! - Admission precedence (LDG-A01 to LDG-A07)
//! - Settlement pool selection (LDG-S01 to LDG-S08)
//! - Webhook signatures and metadata (LDG-W01 to LDG-W08)

#[cfg(test)]
mod admission_tests {
    use crate::accounts::Account;
    use crate::admission::admit;
    use time::OffsetDateTime;
    use voxledger_shared::{Allowance, FundingSource};

    fn account(tier: Option<&str>, remaining: i64, balance: i64) -> Account {
        Account {
            user_id: "user_1".to_string(),
            balance_minutes: balance,
            subscription_tier: tier.map(str::to_string),
            subscription_minutes_remaining: remaining,
            subscription_reset_date: None,
            stripe_customer_id: tier.map(|_| "cus_1".to_string()),
            created_at: OffsetDateTime::now_utc(),
            updated_at: OffsetDateTime::now_utc(),
        }
    }

    // =========================================================================
    // LDG-A01: Unlimited subscription admits regardless of counters
    // =========================================================================
    #[test]
    fn test_unlimited_subscription_always_admits() {
        let admission = admit(&account(Some("unlimited"), 0, 0));
        assert!(admission.can_start);
        assert_eq!(admission.available, Allowance::Unlimited);
        assert_eq!(admission.source, FundingSource::Subscription);
    }

    // =========================================================================
    // LDG-A02: Limited subscription with minutes left wins over credits
    // =========================================================================
    #[test]
    fn test_limited_subscription_precedes_credits() {
        let admission = admit(&account(Some("basic"), 10, 500));
        assert!(admission.can_start);
        assert_eq!(admission.available, Allowance::Limited(10));
        assert_eq!(admission.source, FundingSource::Subscription);
    }

    // =========================================================================
    // LDG-A03: Exhausted subscription falls through to the credit balance
    // =========================================================================
    #[test]
    fn test_exhausted_subscription_falls_back_to_credits() {
        let admission = admit(&account(Some("basic"), 0, 7));
        assert!(admission.can_start);
        assert_eq!(admission.available, Allowance::Limited(7));
        assert_eq!(admission.source, FundingSource::Credits);
    }

    // =========================================================================
    // LDG-A04: Exhausted subscription and empty balance - denied, source none
    // =========================================================================
    #[test]
    fn test_exhausted_everything_denied() {
        let admission = admit(&account(Some("basic"), 0, 0));
        assert!(!admission.can_start);
        assert_eq!(admission.available, Allowance::Limited(0));
        assert_eq!(admission.source, FundingSource::None);
    }

    // =========================================================================
    // LDG-A05: No subscription, positive balance - credits admit
    // =========================================================================
    #[test]
    fn test_credits_only_admits() {
        let admission = admit(&account(None, 0, 3));
        assert!(admission.can_start);
        assert_eq!(admission.available, Allowance::Limited(3));
        assert_eq!(admission.source, FundingSource::Credits);
    }

    // =========================================================================
    // LDG-A06: Fresh zero-balance account - denied
    // =========================================================================
    #[test]
    fn test_zero_balance_denied() {
        let admission = admit(&account(None, 0, 0));
        assert!(!admission.can_start);
        assert_eq!(admission.source, FundingSource::None);
    }

    // =========================================================================
    // LDG-A07: Stale remaining counter without a tier tag never admits
    //          the subscription pool
    // =========================================================================
    #[test]
    fn test_remaining_without_tier_is_not_a_subscription() {
        let admission = admit(&account(None, 50, 0));
        assert!(!admission.can_start);
        assert_eq!(admission.source, FundingSource::None);
    }
}

#[cfg(test)]
mod settlement_tests {
    use crate::accounts::Account;
    use crate::usage::{minutes_charged, select_pool};
    use time::OffsetDateTime;
    use voxledger_shared::BillingType;

    fn account(
        tier: Option<&str>,
        remaining: i64,
        balance: i64,
        customer: Option<&str>,
    ) -> Account {
        Account {
            user_id: "user_1".to_string(),
            balance_minutes: balance,
            subscription_tier: tier.map(str::to_string),
            subscription_minutes_remaining: remaining,
            subscription_reset_date: None,
            stripe_customer_id: customer.map(str::to_string),
            created_at: OffsetDateTime::now_utc(),
            updated_at: OffsetDateTime::now_utc(),
        }
    }

    // =========================================================================
    // LDG-S01: A partial final minute bills as a full minute
    // =========================================================================
    #[test]
    fn test_partial_minute_rounds_up() {
        assert_eq!(minutes_charged(61), 2);
        assert_eq!(minutes_charged(119), 2);
        assert_eq!(minutes_charged(120), 2);
        assert_eq!(minutes_charged(121), 3);
    }

    // =========================================================================
    // LDG-S02: Sub-minute sessions bill exactly one minute
    // =========================================================================
    #[test]
    fn test_one_second_bills_one_minute() {
        assert_eq!(minutes_charged(1), 1);
        assert_eq!(minutes_charged(59), 1);
    }

    // =========================================================================
    // LDG-S03: Zero-duration session bills nothing
    // =========================================================================
    #[test]
    fn test_zero_duration_bills_nothing() {
        assert_eq!(minutes_charged(0), 0);
    }

    // =========================================================================
    // LDG-S04: Subscription covers the whole charge - subscription pays
    // =========================================================================
    #[test]
    fn test_subscription_covers_charge() {
        let acct = account(Some("basic"), 10, 100, Some("cus_1"));
        assert_eq!(select_pool(&acct, 10), Some(BillingType::Subscription));
    }

    // =========================================================================
    // LDG-S05: Charge exceeds subscription remainder - falls to credits even
    //          though subscription minutes remain (no pool splitting)
    // =========================================================================
    #[test]
    fn test_insufficient_subscription_falls_to_credits() {
        let acct = account(Some("basic"), 3, 100, Some("cus_1"));
        assert_eq!(select_pool(&acct, 5), Some(BillingType::Credits));
    }

    // =========================================================================
    // LDG-S06: Unlimited subscription covers any charge
    // =========================================================================
    #[test]
    fn test_unlimited_covers_any_charge() {
        let acct = account(Some("unlimited"), 0, 0, Some("cus_1"));
        assert_eq!(select_pool(&acct, 10_000), Some(BillingType::Subscription));
    }

    // =========================================================================
    // LDG-S07: No pool covers the charge - settlement has no funding source
    // =========================================================================
    #[test]
    fn test_no_pool_covers_charge() {
        let acct = account(Some("basic"), 3, 4, Some("cus_1"));
        assert_eq!(select_pool(&acct, 5), None);
    }

    // =========================================================================
    // LDG-S08: Balance debits bill as free tier before any payment attaches
    // =========================================================================
    #[test]
    fn test_unpaid_balance_bills_free_tier() {
        let fresh = account(None, 0, 3, None);
        assert_eq!(select_pool(&fresh, 2), Some(BillingType::FreeTier));

        let paid = account(None, 0, 33, Some("cus_1"));
        assert_eq!(select_pool(&paid, 2), Some(BillingType::Credits));
    }
}

#[cfg(test)]
mod webhook_tests {
    use std::collections::HashMap;

    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    use crate::webhooks::{package_grant_from_metadata, user_id_from_metadata, verify_signature};

    const SECRET: &str = "whsec_test_secret_value";

    fn sign(payload: &str, timestamp: i64, secret_key: &str) -> String {
        let signed_payload = format!("{}.{}", timestamp, payload);
        let mut mac = Hmac::<Sha256>::new_from_slice(secret_key.as_bytes()).unwrap();
        mac.update(signed_payload.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn now() -> i64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs() as i64
    }

    // =========================================================================
    // LDG-W01: A correctly signed, fresh payload verifies
    // =========================================================================
    #[test]
    fn test_valid_signature_accepted() {
        let payload = r#"{"id":"evt_1","type":"checkout.session.completed"}"#;
        let ts = now();
        // The whsec_ prefix is stripped before keying
        let sig = sign(payload, ts, "test_secret_value");
        let header = format!("t={},v1={}", ts, sig);

        assert!(verify_signature(payload, &header, SECRET).is_ok());
    }

    // =========================================================================
    // LDG-W02: A tampered payload fails verification
    // =========================================================================
    #[test]
    fn test_tampered_payload_rejected() {
        let payload = r#"{"id":"evt_1","minutes":"30"}"#;
        let ts = now();
        let sig = sign(payload, ts, "test_secret_value");
        let header = format!("t={},v1={}", ts, sig);

        let tampered = r#"{"id":"evt_1","minutes":"30000"}"#;
        assert!(verify_signature(tampered, &header, SECRET).is_err());
    }

    // =========================================================================
    // LDG-W03: A stale timestamp outside tolerance is rejected even with a
    //          valid signature (replay window)
    // =========================================================================
    #[test]
    fn test_stale_timestamp_rejected() {
        let payload = r#"{"id":"evt_1"}"#;
        let ts = now() - 3600;
        let sig = sign(payload, ts, "test_secret_value");
        let header = format!("t={},v1={}", ts, sig);

        assert!(verify_signature(payload, &header, SECRET).is_err());
    }

    // =========================================================================
    // LDG-W04: A header missing t= or v1= is rejected
    // =========================================================================
    #[test]
    fn test_malformed_header_rejected() {
        let payload = r#"{"id":"evt_1"}"#;
        assert!(verify_signature(payload, "v1=deadbeef", SECRET).is_err());
        assert!(verify_signature(payload, "t=12345", SECRET).is_err());
        assert!(verify_signature(payload, "", SECRET).is_err());
    }

    // =========================================================================
    // LDG-W05: Secrets without the whsec_ prefix key the HMAC as-is
    // =========================================================================
    #[test]
    fn test_unprefixed_secret_accepted() {
        let payload = r#"{"id":"evt_2"}"#;
        let ts = now();
        let sig = sign(payload, ts, "raw_secret");
        let header = format!("t={},v1={}", ts, sig);

        assert!(verify_signature(payload, &header, "raw_secret").is_ok());
    }

    // =========================================================================
    // LDG-W06: userId extraction ignores empty values
    // =========================================================================
    #[test]
    fn test_user_id_extraction() {
        let mut metadata = HashMap::new();
        assert_eq!(user_id_from_metadata(&metadata), None);

        metadata.insert("userId".to_string(), "".to_string());
        assert_eq!(user_id_from_metadata(&metadata), None);

        metadata.insert("userId".to_string(), "user_42".to_string());
        assert_eq!(user_id_from_metadata(&metadata), Some("user_42"));
    }

    // =========================================================================
    // LDG-W07: Package grants parse only from package-typed metadata with a
    //          positive minute count
    // =========================================================================
    #[test]
    fn test_package_grant_parsing() {
        let mut metadata = HashMap::new();
        metadata.insert("userId".to_string(), "user_42".to_string());
        metadata.insert("type".to_string(), "package".to_string());
        metadata.insert("packageId".to_string(), "pkg_starter".to_string());
        metadata.insert("minutes".to_string(), "30".to_string());

        assert_eq!(
            package_grant_from_metadata(&metadata),
            Some(("user_42", 30))
        );

        metadata.insert("minutes".to_string(), "0".to_string());
        assert_eq!(package_grant_from_metadata(&metadata), None);

        metadata.insert("minutes".to_string(), "not-a-number".to_string());
        assert_eq!(package_grant_from_metadata(&metadata), None);
    }

    // =========================================================================
    // LDG-W08: Subscription checkout metadata is not a package grant
    // =========================================================================
    #[test]
    fn test_subscription_checkout_is_not_a_grant() {
        let mut metadata = HashMap::new();
        metadata.insert("userId".to_string(), "user_42".to_string());
        metadata.insert("type".to_string(), "subscription".to_string());
        metadata.insert("monthlyMinutes".to_string(), "60".to_string());

        assert_eq!(package_grant_from_metadata(&metadata), None);
    }
}
