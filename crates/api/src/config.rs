//! Server configuration

use anyhow::Context;

/// Runtime configuration loaded from the environment
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection URL
    pub database_url: String,
    /// Address the HTTP server binds to
    pub bind_address: String,
    /// Comma-separated list of allowed CORS origins
    pub allowed_origins: String,
    /// Master switch for Stripe billing; the server runs in a degraded
    /// free-tier-only mode when disabled or unconfigured
    pub enable_billing: bool,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;

        let bind_address =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

        let allowed_origins = std::env::var("ALLOWED_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:3000,http://127.0.0.1:3000".to_string());

        let enable_billing = std::env::var("ENABLE_BILLING")
            .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
            .unwrap_or(true);

        Ok(Self {
            database_url,
            bind_address,
            allowed_origins,
            enable_billing,
        })
    }
}
