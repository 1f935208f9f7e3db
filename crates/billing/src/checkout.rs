//! Checkout and billing portal sessions
//!
//! Creates Stripe Checkout sessions for minute packages and subscription
//! plans. The metadata attached here is what the webhook state machine later
//! correlates on, so `userId` and the purchase kind are always present.

use std::collections::HashMap;
use std::sync::Arc;

use stripe::{
    BillingPortalSession, CheckoutSession, CheckoutSessionMode, CreateBillingPortalSession,
    CreateCheckoutSession, CreateCheckoutSessionLineItems, CreateCustomer, Customer, CustomerId,
    ListCustomers,
};

use crate::client::StripeClient;
use crate::error::{BillingError, BillingResult};
use crate::plans::PlanCatalog;

/// A created checkout or portal session, reduced to what the client needs
#[derive(Debug, Clone, serde::Serialize)]
pub struct CheckoutResponse {
    pub session_id: String,
    pub url: String,
}

/// Checkout session creation against the Stripe API
#[derive(Clone)]
pub struct CheckoutService {
    stripe: StripeClient,
    catalog: Arc<PlanCatalog>,
}

impl CheckoutService {
    pub fn new(stripe: StripeClient, catalog: Arc<PlanCatalog>) -> Self {
        Self { stripe, catalog }
    }

    pub fn catalog(&self) -> &PlanCatalog {
        &self.catalog
    }

    /// Create a payment-mode checkout for a one-time minute package.
    pub async fn create_package_checkout(
        &self,
        package_id: &str,
        user_id: &str,
        email: &str,
        success_url: &str,
        cancel_url: &str,
    ) -> BillingResult<CheckoutResponse> {
        let package = self
            .catalog
            .package(package_id)
            .ok_or_else(|| BillingError::Internal(format!("unknown package {}", package_id)))?;
        let price_id = package.price_id.clone().ok_or_else(|| {
            BillingError::NotConfigured(format!("no Stripe price for package {}", package_id))
        })?;

        let mut metadata = HashMap::new();
        metadata.insert("userId".to_string(), user_id.to_string());
        metadata.insert("type".to_string(), "package".to_string());
        metadata.insert("packageId".to_string(), package.id.to_string());
        metadata.insert("minutes".to_string(), package.minutes.to_string());

        let mut params = CreateCheckoutSession::new();
        params.mode = Some(CheckoutSessionMode::Payment);
        params.customer_email = Some(email);
        params.success_url = Some(success_url);
        params.cancel_url = Some(cancel_url);
        params.metadata = Some(metadata);
        params.line_items = Some(vec![CreateCheckoutSessionLineItems {
            price: Some(price_id),
            quantity: Some(1),
            ..Default::default()
        }]);

        let session = CheckoutSession::create(self.stripe.inner(), params).await?;
        let url = session
            .url
            .ok_or_else(|| BillingError::Internal("checkout session has no URL".to_string()))?;

        tracing::info!(
            user_id = %user_id,
            package_id = %package_id,
            session_id = %session.id,
            "Package checkout session created"
        );

        Ok(CheckoutResponse {
            session_id: session.id.to_string(),
            url,
        })
    }

    /// Create a subscription-mode checkout for a monthly plan.
    pub async fn create_subscription_checkout(
        &self,
        plan_id: &str,
        user_id: &str,
        email: &str,
        success_url: &str,
        cancel_url: &str,
    ) -> BillingResult<CheckoutResponse> {
        let plan = self
            .catalog
            .subscription(plan_id)
            .ok_or_else(|| BillingError::Internal(format!("unknown plan {}", plan_id)))?;
        let price_id = plan.price_id.clone().ok_or_else(|| {
            BillingError::NotConfigured(format!("no Stripe price for plan {}", plan_id))
        })?;

        let mut metadata = HashMap::new();
        metadata.insert("userId".to_string(), user_id.to_string());
        metadata.insert("type".to_string(), "subscription".to_string());
        metadata.insert("subscriptionId".to_string(), plan.id.to_string());
        metadata.insert(
            "monthlyMinutes".to_string(),
            plan.allowance.as_api_minutes().to_string(),
        );

        // Subscriptions hang off a durable customer so renewals and portal
        // sessions resolve to the same one across purchases.
        let customer = self.get_or_create_customer(user_id, email).await?;

        let mut params = CreateCheckoutSession::new();
        params.mode = Some(CheckoutSessionMode::Subscription);
        params.customer = Some(customer.id);
        params.success_url = Some(success_url);
        params.cancel_url = Some(cancel_url);
        params.metadata = Some(metadata.clone());
        // Copied onto the subscription object so lifecycle webhooks can
        // correlate back to the user.
        params.subscription_data = Some(stripe::CreateCheckoutSessionSubscriptionData {
            metadata: Some(metadata),
            ..Default::default()
        });
        params.line_items = Some(vec![CreateCheckoutSessionLineItems {
            price: Some(price_id),
            quantity: Some(1),
            ..Default::default()
        }]);

        let session = CheckoutSession::create(self.stripe.inner(), params).await?;
        let url = session
            .url
            .ok_or_else(|| BillingError::Internal("checkout session has no URL".to_string()))?;

        tracing::info!(
            user_id = %user_id,
            plan_id = %plan_id,
            session_id = %session.id,
            "Subscription checkout session created"
        );

        Ok(CheckoutResponse {
            session_id: session.id.to_string(),
            url,
        })
    }

    /// Create a billing portal session for subscription self-service.
    pub async fn create_portal_session(
        &self,
        customer_id: &str,
        return_url: &str,
    ) -> BillingResult<CheckoutResponse> {
        let customer_id: CustomerId = customer_id
            .parse()
            .map_err(|_| BillingError::Internal(format!("invalid customer id {}", customer_id)))?;

        let mut params = CreateBillingPortalSession::new(customer_id);
        params.return_url = Some(return_url);

        let session = BillingPortalSession::create(self.stripe.inner(), params).await?;

        Ok(CheckoutResponse {
            session_id: session.id.to_string(),
            url: session.url,
        })
    }

    /// Find the Stripe customer for this user by email, creating one tagged
    /// with `userId` metadata if none exists.
    pub async fn get_or_create_customer(
        &self,
        user_id: &str,
        email: &str,
    ) -> BillingResult<Customer> {
        let mut list_params = ListCustomers::new();
        list_params.email = Some(email);
        list_params.limit = Some(1);

        let existing = Customer::list(self.stripe.inner(), &list_params).await?;
        if let Some(customer) = existing.data.into_iter().next() {
            return Ok(customer);
        }

        let mut metadata = HashMap::new();
        metadata.insert("userId".to_string(), user_id.to_string());

        let mut params = CreateCustomer::new();
        params.email = Some(email);
        params.metadata = Some(metadata);

        let customer = Customer::create(self.stripe.inner(), params).await?;
        tracing::info!(user_id = %user_id, customer_id = %customer.id, "Stripe customer created");
        Ok(customer)
    }
}
