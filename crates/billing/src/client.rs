//! Stripe client wrapper
//!
//! Holds the API client plus the webhook secret. Passed explicitly into each
//! service so tests can construct fakes and so there is no module-level
//! shared state.

use std::sync::Arc;

use crate::error::{BillingError, BillingResult};

/// Stripe configuration loaded from the environment
#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    pub webhook_secret: String,
}

impl StripeConfig {
    pub fn from_env() -> BillingResult<Self> {
        let secret_key = std::env::var("STRIPE_SECRET_KEY")
            .map_err(|_| BillingError::NotConfigured("STRIPE_SECRET_KEY not set".to_string()))?;
        let webhook_secret = std::env::var("STRIPE_WEBHOOK_SECRET")
            .map_err(|_| BillingError::NotConfigured("STRIPE_WEBHOOK_SECRET not set".to_string()))?;

        Ok(Self {
            secret_key,
            webhook_secret,
        })
    }
}

/// Shared Stripe API client
#[derive(Clone)]
pub struct StripeClient {
    client: stripe::Client,
    config: Arc<StripeConfig>,
}

impl StripeClient {
    pub fn new(config: StripeConfig) -> Self {
        let client = stripe::Client::new(config.secret_key.clone());
        Self {
            client,
            config: Arc::new(config),
        }
    }

    pub fn from_env() -> BillingResult<Self> {
        Ok(Self::new(StripeConfig::from_env()?))
    }

    pub fn inner(&self) -> &stripe::Client {
        &self.client
    }

    pub fn config(&self) -> &StripeConfig {
        &self.config
    }
}
