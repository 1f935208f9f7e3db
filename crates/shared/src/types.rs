//! Core billing domain types

use serde::{Deserialize, Serialize};

/// Which pool funded a session.
///
/// Stored as text in `usage_records.billing_type` and surfaced verbatim in
/// API responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingType {
    /// The sign-up grant, on an account that has never paid
    FreeTier,
    /// Monthly subscription allotment
    Subscription,
    /// Prepaid minute credits
    Credits,
}

impl BillingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingType::FreeTier => "free_tier",
            BillingType::Subscription => "subscription",
            BillingType::Credits => "credits",
        }
    }

    /// Parse the database representation. Unknown values are rejected so a
    /// corrupted row is noticed rather than silently re-bucketed.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "free_tier" => Some(BillingType::FreeTier),
            "subscription" => Some(BillingType::Subscription),
            "credits" => Some(BillingType::Credits),
            _ => None,
        }
    }
}

impl std::fmt::Display for BillingType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A subscription plan's monthly minute allotment.
///
/// Unlimited is a real variant, not a large finite number, so comparisons
/// can never silently exhaust a fake infinity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Allowance {
    Unlimited,
    Limited(u64),
}

impl Allowance {
    /// Whether this allowance can fully fund a charge of `minutes`.
    pub fn covers(&self, minutes: u64) -> bool {
        match self {
            Allowance::Unlimited => true,
            Allowance::Limited(remaining) => *remaining >= minutes,
        }
    }

    pub fn is_unlimited(&self) -> bool {
        matches!(self, Allowance::Unlimited)
    }

    /// Wire representation for clients: `-1` means unlimited.
    ///
    /// The tagged enum stays internal; the HTTP layer keeps the sentinel the
    /// original dashboard already understands.
    pub fn as_api_minutes(&self) -> i64 {
        match self {
            Allowance::Unlimited => -1,
            Allowance::Limited(m) => *m as i64,
        }
    }
}

/// Which pool an admission check would draw from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FundingSource {
    Subscription,
    Credits,
    None,
}

impl FundingSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            FundingSource::Subscription => "subscription",
            FundingSource::Credits => "credits",
            FundingSource::None => "none",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn billing_type_round_trips_through_db_text() {
        for bt in [
            BillingType::FreeTier,
            BillingType::Subscription,
            BillingType::Credits,
        ] {
            assert_eq!(BillingType::from_str(bt.as_str()), Some(bt));
        }
        assert_eq!(BillingType::from_str("overage"), None);
    }

    #[test]
    fn unlimited_allowance_covers_any_charge() {
        assert!(Allowance::Unlimited.covers(0));
        assert!(Allowance::Unlimited.covers(u64::MAX));
        assert_eq!(Allowance::Unlimited.as_api_minutes(), -1);
    }

    #[test]
    fn limited_allowance_requires_full_coverage() {
        let a = Allowance::Limited(5);
        assert!(a.covers(5));
        assert!(!a.covers(6));
        assert_eq!(a.as_api_minutes(), 5);
    }
}
