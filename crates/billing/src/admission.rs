//! Session admission control
//!
//! Answers "can this user start a session, and from which pool?". A pure
//! read: the decision function over an account row is shared with the usage
//! meter so a user is never told they can start and then denied a matching
//! pool at settlement.

use serde::Serialize;

use voxledger_shared::{Allowance, FundingSource};

use crate::accounts::{Account, AccountStore};
use crate::error::BillingResult;

/// Result of an admission check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SessionAdmission {
    pub can_start: bool,
    /// Minutes available from the selected pool. `Limited(0)` when denied.
    pub available: Allowance,
    pub source: FundingSource,
}

impl SessionAdmission {
    fn denied() -> Self {
        Self {
            can_start: false,
            available: Allowance::Limited(0),
            source: FundingSource::None,
        }
    }
}

/// Pool precedence for admission: unlimited subscription, then a limited
/// subscription with minutes left, then the credit balance.
pub fn admit(account: &Account) -> SessionAdmission {
    match account.allowance() {
        Some(Allowance::Unlimited) => {
            return SessionAdmission {
                can_start: true,
                available: Allowance::Unlimited,
                source: FundingSource::Subscription,
            };
        }
        Some(Allowance::Limited(remaining)) if remaining > 0 => {
            return SessionAdmission {
                can_start: true,
                available: Allowance::Limited(remaining),
                source: FundingSource::Subscription,
            };
        }
        _ => {}
    }

    if account.balance_minutes > 0 {
        return SessionAdmission {
            can_start: true,
            available: Allowance::Limited(account.balance_minutes as u64),
            source: FundingSource::Credits,
        };
    }

    SessionAdmission::denied()
}

/// Admission controller over the durable store
#[derive(Clone)]
pub struct AdmissionController {
    store: AccountStore,
}

impl AdmissionController {
    pub fn new(store: AccountStore) -> Self {
        Self { store }
    }

    /// Check whether `user_id` may start a session. Creates the account on
    /// first access; performs no other mutation.
    pub async fn can_start(&self, user_id: &str) -> BillingResult<(Account, SessionAdmission)> {
        let account = self.store.get_or_create(user_id).await?;
        let admission = admit(&account);

        tracing::debug!(
            user_id = %user_id,
            can_start = admission.can_start,
            source = admission.source.as_str(),
            "Admission check"
        );

        Ok((account, admission))
    }
}
