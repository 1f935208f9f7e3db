//! Plan catalog
//!
//! Minute packages (one-time purchases) and subscription plans, mapped to
//! Stripe price IDs supplied by the environment. A webhook resolves the
//! purchased price back to a plan through this catalog; an unrecognized
//! price is skipped by the caller, never defaulted to some plan.

use std::sync::Arc;

use voxledger_shared::Allowance;

/// One-time minute package
#[derive(Debug, Clone)]
pub struct MinutePackage {
    pub id: &'static str,
    pub name: &'static str,
    pub minutes: u64,
    pub price_cents: i64,
    /// Stripe price id; None when the env var is unset (package unsellable)
    pub price_id: Option<String>,
}

/// Monthly subscription plan
#[derive(Debug, Clone)]
pub struct SubscriptionPlan {
    pub id: &'static str,
    /// Tier tag stored on the account. The reserved tag `unlimited` marks
    /// the unmetered plan.
    pub tier: &'static str,
    pub allowance: Allowance,
    pub price_cents: i64,
    pub price_id: Option<String>,
}

/// The full product catalog
#[derive(Debug, Clone)]
pub struct PlanCatalog {
    pub packages: Vec<MinutePackage>,
    pub subscriptions: Vec<SubscriptionPlan>,
}

impl PlanCatalog {
    /// Build the catalog with price IDs from `STRIPE_PRICE_*` env vars.
    pub fn from_env() -> Arc<Self> {
        let price = |var: &str| std::env::var(var).ok();

        Arc::new(Self {
            packages: vec![
                MinutePackage {
                    id: "pkg_starter",
                    name: "Starter Pack",
                    minutes: 30,
                    price_cents: 1500,
                    price_id: price("STRIPE_PRICE_STARTER_PACK"),
                },
                MinutePackage {
                    id: "pkg_pro",
                    name: "Pro Pack",
                    minutes: 120,
                    price_cents: 5000,
                    price_id: price("STRIPE_PRICE_PRO_PACK"),
                },
                MinutePackage {
                    id: "pkg_enterprise",
                    name: "Enterprise Pack",
                    minutes: 500,
                    price_cents: 17500,
                    price_id: price("STRIPE_PRICE_ENTERPRISE_PACK"),
                },
            ],
            subscriptions: vec![
                SubscriptionPlan {
                    id: "sub_basic",
                    tier: "basic",
                    allowance: Allowance::Limited(60),
                    price_cents: 2900,
                    price_id: price("STRIPE_PRICE_BASIC_SUB"),
                },
                SubscriptionPlan {
                    id: "sub_professional",
                    tier: "professional",
                    allowance: Allowance::Limited(200),
                    price_cents: 7900,
                    price_id: price("STRIPE_PRICE_PROFESSIONAL_SUB"),
                },
                SubscriptionPlan {
                    id: "sub_unlimited",
                    tier: "unlimited",
                    allowance: Allowance::Unlimited,
                    price_cents: 19900,
                    price_id: price("STRIPE_PRICE_UNLIMITED_SUB"),
                },
            ],
        })
    }

    /// Build a catalog with explicit price IDs (used by tests).
    pub fn with_price_ids(
        package_prices: [&str; 3],
        subscription_prices: [&str; 3],
    ) -> Arc<Self> {
        let mut catalog = Self {
            packages: vec![
                MinutePackage {
                    id: "pkg_starter",
                    name: "Starter Pack",
                    minutes: 30,
                    price_cents: 1500,
                    price_id: None,
                },
                MinutePackage {
                    id: "pkg_pro",
                    name: "Pro Pack",
                    minutes: 120,
                    price_cents: 5000,
                    price_id: None,
                },
                MinutePackage {
                    id: "pkg_enterprise",
                    name: "Enterprise Pack",
                    minutes: 500,
                    price_cents: 17500,
                    price_id: None,
                },
            ],
            subscriptions: vec![
                SubscriptionPlan {
                    id: "sub_basic",
                    tier: "basic",
                    allowance: Allowance::Limited(60),
                    price_cents: 2900,
                    price_id: None,
                },
                SubscriptionPlan {
                    id: "sub_professional",
                    tier: "professional",
                    allowance: Allowance::Limited(200),
                    price_cents: 7900,
                    price_id: None,
                },
                SubscriptionPlan {
                    id: "sub_unlimited",
                    tier: "unlimited",
                    allowance: Allowance::Unlimited,
                    price_cents: 19900,
                    price_id: None,
                },
            ],
        };
        for (pkg, id) in catalog.packages.iter_mut().zip(package_prices) {
            pkg.price_id = Some(id.to_string());
        }
        for (sub, id) in catalog.subscriptions.iter_mut().zip(subscription_prices) {
            sub.price_id = Some(id.to_string());
        }
        Arc::new(catalog)
    }

    pub fn package(&self, id: &str) -> Option<&MinutePackage> {
        self.packages.iter().find(|p| p.id == id)
    }

    pub fn subscription(&self, id: &str) -> Option<&SubscriptionPlan> {
        self.subscriptions.iter().find(|s| s.id == id)
    }

    /// Resolve a Stripe price id to the subscription plan it sells.
    pub fn resolve_subscription_price(&self, price_id: &str) -> Option<&SubscriptionPlan> {
        self.subscriptions
            .iter()
            .find(|s| s.price_id.as_deref() == Some(price_id))
    }
}
