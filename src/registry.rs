//! Subscription registry seam.
//!
//! The scheduler only needs to enumerate enabled subscriptions and write back
//! cycle results (baseline, last error). Hosts embedding the crate can supply
//! their own store; the shipped SQLite implementation lives in [`crate::db`].

use crate::Result;
use crate::types::Subscription;
use async_trait::async_trait;

/// Owns subscription records and their cycle state
#[async_trait]
pub trait SubscriptionRegistry: Send + Sync {
    /// All enabled subscriptions, in sweep order
    async fn list_enabled(&self) -> Result<Vec<Subscription>>;

    /// Look up a subscription by its id
    async fn get(&self, id: &str) -> Result<Subscription>;

    /// Persist a subscription's mutable state
    ///
    /// Idempotent full replace: writing the same value twice is harmless.
    async fn update(&self, sub: &Subscription) -> Result<()>;
}
