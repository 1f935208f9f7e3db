//! Stripe webhook handling
//!
//! The state machine that keeps the minute ledger consistent with the
//! payment processor: package checkouts grant credits, subscription
//! lifecycle events set or clear the subscription, renewal invoices reset
//! the monthly allotment. Every delivery is signature-verified and claimed
//! in `stripe_webhook_events` before any ledger mutation, so redelivery can
//! never double-grant.

use std::collections::HashMap;

use hmac::{Hmac, Mac};
use sha2::Sha256;
use sqlx::PgPool;
use stripe::{
    Event, EventObject, EventType, Expandable, Invoice, InvoiceBillingReason, Subscription,
    SubscriptionStatus, Webhook,
};
use uuid::Uuid;

use crate::accounts::AccountStore;
use crate::client::StripeClient;
use crate::error::{BillingError, BillingResult};
use crate::plans::PlanCatalog;
use std::sync::Arc;

type HmacSha256 = Hmac<Sha256>;

/// How far a delivery's timestamp may drift before it is rejected.
const SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// What became of an acknowledged delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// The ledger was mutated (or deliberately left alone by the handler)
    Processed,
    /// Event understood but unusable (missing correlation, unknown price)
    Skipped,
    /// Event type has no handler
    Ignored,
    /// Event id was already claimed by an earlier delivery
    Duplicate,
}

impl WebhookOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookOutcome::Processed => "processed",
            WebhookOutcome::Skipped => "skipped",
            WebhookOutcome::Ignored => "ignored",
            WebhookOutcome::Duplicate => "duplicate",
        }
    }
}

/// Verify a Stripe signature header against the raw payload.
///
/// Header format: `t=<unix>,v1=<hex hmac>`. The signed payload is
/// `"{t}.{body}"` keyed with the endpoint secret. Pure so it is testable
/// without a full Stripe event.
pub fn verify_signature(payload: &str, signature: &str, secret: &str) -> BillingResult<()> {
    let mut timestamp: Option<i64> = None;
    let mut v1_signature: Option<&str> = None;

    for part in signature.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse().ok(),
            Some(("v1", value)) => v1_signature = Some(value),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(BillingError::WebhookSignatureInvalid)?;
    let v1_signature = v1_signature.ok_or(BillingError::WebhookSignatureInvalid)?;

    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_err(|_| BillingError::WebhookSignatureInvalid)?
        .as_secs() as i64;

    if (now - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
        tracing::warn!(
            timestamp = timestamp,
            now = now,
            "Webhook timestamp outside tolerance"
        );
        return Err(BillingError::WebhookSignatureInvalid);
    }

    let secret_key = secret.strip_prefix("whsec_").unwrap_or(secret);
    let signed_payload = format!("{}.{}", timestamp, payload);

    let mut mac = HmacSha256::new_from_slice(secret_key.as_bytes())
        .map_err(|_| BillingError::WebhookSignatureInvalid)?;
    mac.update(signed_payload.as_bytes());
    let computed = hex::encode(mac.finalize().into_bytes());

    if computed != v1_signature {
        return Err(BillingError::WebhookSignatureInvalid);
    }

    Ok(())
}

/// Pull the correlating user id out of event metadata.
pub fn user_id_from_metadata(metadata: &HashMap<String, String>) -> Option<&str> {
    metadata.get("userId").map(String::as_str).filter(|s| !s.is_empty())
}

/// Parse a package checkout's metadata into (user id, minutes purchased).
///
/// Returns None for subscription checkouts; those complete via subscription
/// lifecycle events instead.
pub fn package_grant_from_metadata(
    metadata: &HashMap<String, String>,
) -> Option<(&str, u64)> {
    if metadata.get("type").map(String::as_str) != Some("package") {
        return None;
    }
    let user_id = user_id_from_metadata(metadata)?;
    let minutes: u64 = metadata.get("minutes")?.parse().ok()?;
    if minutes == 0 {
        return None;
    }
    Some((user_id, minutes))
}

/// Webhook handler for Stripe events
pub struct WebhookHandler {
    stripe: StripeClient,
    store: AccountStore,
    catalog: Arc<PlanCatalog>,
    pool: PgPool,
}

impl WebhookHandler {
    pub fn new(
        stripe: StripeClient,
        store: AccountStore,
        catalog: Arc<PlanCatalog>,
        pool: PgPool,
    ) -> Self {
        Self {
            stripe,
            store,
            catalog,
            pool,
        }
    }

    /// Verify and parse a Stripe webhook delivery.
    ///
    /// Tries the library's verifier first, then falls back to manual
    /// verification: newer Stripe API versions ship event payloads the
    /// pinned async-stripe release rejects even when the signature is fine.
    pub fn verify_event(&self, payload: &str, signature: &str) -> BillingResult<Event> {
        let webhook_secret = &self.stripe.config().webhook_secret;

        match Webhook::construct_event(payload, signature, webhook_secret) {
            Ok(event) => return Ok(event),
            Err(e) => {
                tracing::debug!(
                    stripe_error = %e,
                    "Library webhook verification failed, trying manual verification"
                );
            }
        }

        verify_signature(payload, signature, webhook_secret)?;

        let event: Event = serde_json::from_str(payload).map_err(|e| {
            tracing::error!(parse_error = %e, "Failed to parse webhook event JSON");
            BillingError::WebhookSignatureInvalid
        })?;

        Ok(event)
    }

    /// Handle a verified Stripe event.
    ///
    /// Atomically claims the event id first: INSERT..ON CONFLICT..RETURNING
    /// means only one concurrent delivery can win, so grant-style handlers
    /// cannot double-apply on redelivery.
    pub async fn handle_event(&self, event: Event) -> BillingResult<WebhookOutcome> {
        let event_id = event.id.to_string();
        let event_type = event.type_.to_string();

        let claimed: Option<(Uuid,)> = sqlx::query_as(
            r#"
            INSERT INTO stripe_webhook_events (id, stripe_event_id, event_type)
            VALUES ($1, $2, $3)
            ON CONFLICT (stripe_event_id) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&event_id)
        .bind(&event_type)
        .fetch_optional(&self.pool)
        .await?;

        if claimed.is_none() {
            tracing::info!(
                event_id = %event_id,
                event_type = %event_type,
                "Duplicate webhook delivery - already claimed"
            );
            return Ok(WebhookOutcome::Duplicate);
        }

        tracing::info!(
            event_id = %event_id,
            event_type = %event_type,
            "Processing Stripe webhook event"
        );

        let result = self.process_event(&event).await;

        let (processing_result, error_message) = match &result {
            Ok(outcome) => (outcome.as_str().to_string(), None),
            Err(e) => ("error".to_string(), Some(e.to_string())),
        };

        if let Err(e) = sqlx::query(
            r#"
            UPDATE stripe_webhook_events
            SET processing_result = $1, error_message = $2
            WHERE stripe_event_id = $3
            "#,
        )
        .bind(&processing_result)
        .bind(&error_message)
        .bind(&event_id)
        .execute(&self.pool)
        .await
        {
            tracing::error!(
                event_id = %event_id,
                error = %e,
                "Failed to record webhook processing result"
            );
        }

        result
    }

    async fn process_event(&self, event: &Event) -> BillingResult<WebhookOutcome> {
        match event.type_ {
            EventType::CheckoutSessionCompleted => {
                self.handle_checkout_completed(event.clone()).await
            }
            EventType::CustomerSubscriptionCreated | EventType::CustomerSubscriptionUpdated => {
                self.handle_subscription_updated(event.clone()).await
            }
            EventType::CustomerSubscriptionDeleted => {
                self.handle_subscription_deleted(event.clone()).await
            }
            EventType::InvoicePaymentSucceeded => {
                self.handle_invoice_payment_succeeded(event.clone()).await
            }
            EventType::InvoicePaymentFailed => {
                let invoice = self.extract_invoice(event.clone())?;
                tracing::warn!(
                    invoice_id = %invoice.id,
                    amount_due = ?invoice.amount_due,
                    "Invoice payment failed - no ledger mutation, awaiting provider retry"
                );
                Ok(WebhookOutcome::Processed)
            }
            _ => {
                tracing::info!(
                    event_type = %event.type_,
                    event_id = %event.id,
                    "Unhandled Stripe event type - acknowledged, no-op"
                );
                Ok(WebhookOutcome::Ignored)
            }
        }
    }

    /// `checkout.session.completed`: grant purchased package minutes.
    ///
    /// Subscription checkouts are intentionally not handled here; the
    /// subscription lifecycle events carry everything needed.
    async fn handle_checkout_completed(&self, event: Event) -> BillingResult<WebhookOutcome> {
        let session = match event.data.object {
            EventObject::CheckoutSession(session) => session,
            _ => {
                return Err(BillingError::UnexpectedPayload(
                    "expected CheckoutSession".to_string(),
                ))
            }
        };

        let Some(metadata) = &session.metadata else {
            tracing::warn!(session_id = %session.id, "Checkout completed without metadata - skipped");
            return Ok(WebhookOutcome::Skipped);
        };

        if user_id_from_metadata(metadata).is_none() {
            tracing::warn!(
                session_id = %session.id,
                "Checkout completed without userId metadata - skipped"
            );
            return Ok(WebhookOutcome::Skipped);
        }

        let Some((user_id, minutes)) = package_grant_from_metadata(metadata) else {
            // A subscription checkout; its subscription events do the work.
            tracing::debug!(
                session_id = %session.id,
                "Non-package checkout completed - deferring to subscription events"
            );
            return Ok(WebhookOutcome::Processed);
        };

        let customer_ref = match &session.customer {
            Some(Expandable::Id(id)) => Some(id.to_string()),
            Some(Expandable::Object(c)) => Some(c.id.to_string()),
            None => None,
        };

        self.store
            .grant_credits(user_id, minutes, customer_ref.as_deref())
            .await?;

        tracing::info!(
            user_id = %user_id,
            minutes = minutes,
            session_id = %session.id,
            "Package checkout completed, credits granted"
        );

        Ok(WebhookOutcome::Processed)
    }

    /// `customer.subscription.created` / `.updated`: activate or refresh the
    /// account's subscription from the purchased price.
    async fn handle_subscription_updated(&self, event: Event) -> BillingResult<WebhookOutcome> {
        let subscription = self.extract_subscription(event)?;

        let Some(user_id) = user_id_from_metadata(&subscription.metadata) else {
            tracing::warn!(
                subscription_id = %subscription.id,
                "Subscription event without userId metadata - skipped"
            );
            return Ok(WebhookOutcome::Skipped);
        };
        let user_id = user_id.to_string();

        if subscription.status != SubscriptionStatus::Active {
            tracing::info!(
                user_id = %user_id,
                subscription_id = %subscription.id,
                status = ?subscription.status,
                "Subscription not active - no ledger change"
            );
            return Ok(WebhookOutcome::Processed);
        }

        let Some(plan) = self.resolve_plan(&subscription) else {
            tracing::warn!(
                user_id = %user_id,
                subscription_id = %subscription.id,
                "Subscription price does not resolve to a configured plan - skipped"
            );
            return Ok(WebhookOutcome::Skipped);
        };
        let (tier, allowance) = (plan.tier, plan.allowance);

        let customer_ref = expandable_customer_id(&subscription.customer);
        self.store
            .set_subscription(&user_id, tier, allowance, &customer_ref)
            .await?;

        tracing::info!(
            user_id = %user_id,
            tier = %tier,
            subscription_id = %subscription.id,
            "Subscription activated"
        );

        Ok(WebhookOutcome::Processed)
    }

    /// `customer.subscription.deleted`: clear the subscription, keep credits.
    async fn handle_subscription_deleted(&self, event: Event) -> BillingResult<WebhookOutcome> {
        let subscription = self.extract_subscription(event)?;

        let Some(user_id) = user_id_from_metadata(&subscription.metadata) else {
            tracing::warn!(
                subscription_id = %subscription.id,
                "Subscription deletion without userId metadata - skipped"
            );
            return Ok(WebhookOutcome::Skipped);
        };

        let customer_ref = expandable_customer_id(&subscription.customer);
        self.store.clear_subscription(user_id, &customer_ref).await?;

        tracing::info!(
            user_id = %user_id,
            subscription_id = %subscription.id,
            "Subscription cancelled, prepaid credits retained"
        );

        Ok(WebhookOutcome::Processed)
    }

    /// `invoice.payment_succeeded` on a renewal cycle: re-fetch the
    /// subscription from Stripe and reset the monthly allotment.
    async fn handle_invoice_payment_succeeded(&self, event: Event) -> BillingResult<WebhookOutcome> {
        let invoice = self.extract_invoice(event)?;

        if invoice.billing_reason != Some(InvoiceBillingReason::SubscriptionCycle) {
            tracing::debug!(
                invoice_id = %invoice.id,
                billing_reason = ?invoice.billing_reason,
                "Invoice paid but not a renewal cycle - no allowance reset"
            );
            return Ok(WebhookOutcome::Processed);
        }

        let subscription_id = match &invoice.subscription {
            Some(Expandable::Id(id)) => id.clone(),
            Some(Expandable::Object(s)) => s.id.clone(),
            None => {
                tracing::warn!(
                    invoice_id = %invoice.id,
                    "Renewal invoice without subscription reference - skipped"
                );
                return Ok(WebhookOutcome::Skipped);
            }
        };

        // Invoices carry no userId metadata; the subscription does.
        let subscription =
            Subscription::retrieve(self.stripe.inner(), &subscription_id, &[]).await?;

        let Some(user_id) = user_id_from_metadata(&subscription.metadata) else {
            tracing::warn!(
                subscription_id = %subscription.id,
                "Renewed subscription without userId metadata - skipped"
            );
            return Ok(WebhookOutcome::Skipped);
        };

        let Some(plan) = self.resolve_plan(&subscription) else {
            tracing::warn!(
                subscription_id = %subscription.id,
                "Renewed subscription price does not resolve to a plan - skipped"
            );
            return Ok(WebhookOutcome::Skipped);
        };

        self.store
            .reset_monthly_allowance(user_id, plan.allowance)
            .await?;

        tracing::info!(
            user_id = %user_id,
            tier = %plan.tier,
            invoice_id = %invoice.id,
            "Monthly allowance reset on renewal"
        );

        Ok(WebhookOutcome::Processed)
    }

    fn resolve_plan(&self, subscription: &Subscription) -> Option<&crate::plans::SubscriptionPlan> {
        let price_id = subscription
            .items
            .data
            .first()
            .and_then(|item| item.price.as_ref())
            .map(|price| price.id.to_string())?;
        self.catalog.resolve_subscription_price(&price_id)
    }

    fn extract_subscription(&self, event: Event) -> BillingResult<Subscription> {
        match event.data.object {
            EventObject::Subscription(subscription) => Ok(subscription),
            _ => Err(BillingError::UnexpectedPayload(
                "expected Subscription".to_string(),
            )),
        }
    }

    fn extract_invoice(&self, event: Event) -> BillingResult<Invoice> {
        match event.data.object {
            EventObject::Invoice(invoice) => Ok(invoice),
            _ => Err(BillingError::UnexpectedPayload(
                "expected Invoice".to_string(),
            )),
        }
    }
}

fn expandable_customer_id(customer: &Expandable<stripe::Customer>) -> String {
    match customer {
        Expandable::Id(id) => id.to_string(),
        Expandable::Object(c) => c.id.to_string(),
    }
}
