#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Voxledger Shared Types
//!
//! Domain types and database plumbing shared between the billing core and
//! the API server: minute allowances, billing types, pool construction, and
//! embedded migrations.

pub mod db;
pub mod types;

pub use db::{create_pool, run_migrations};
pub use types::{Allowance, BillingType, FundingSource};
