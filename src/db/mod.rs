//! Database layer for feedcourier
//!
//! Handles SQLite persistence for subscriptions and the delivery ledger.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - [`migrations`] — Database lifecycle, schema migrations
//! - [`subscriptions`] — Subscription CRUD and registry backing
//! - [`ledger`] — Delivered-item records for dedup and baseline recovery

use crate::types::{FilterRules, Recipient, Subscription};
use crate::{Error, Result};
use chrono::{TimeZone, Utc};
use sqlx::{FromRow, sqlite::SqlitePool};

mod ledger;
mod migrations;
mod subscriptions;

/// Subscription record from database
#[derive(Debug, Clone, FromRow)]
pub struct SubscriptionRow {
    /// Stable UUID string
    pub id: String,
    /// Display name, unique
    pub name: String,
    /// Feed URL
    pub url: String,
    /// Whether the subscription is enabled (0 = disabled, 1 = enabled)
    pub enabled: i32,
    /// Recipient list as a JSON array
    pub recipients: String,
    /// Unix timestamp of the most recently delivered entry's publish-time
    pub baseline: Option<i64>,
    /// Last error message from reconciling the subscription
    pub last_error: Option<String>,
    /// Per-cycle delivery cap
    pub max_items_per_cycle: i64,
    /// Custom render template
    pub template: Option<String>,
    /// Filter rules as JSON, if any
    pub filters: Option<String>,
    /// Unix timestamp when the subscription was created
    pub created_at: i64,
}

impl SubscriptionRow {
    /// Decode the JSON columns into a domain [`Subscription`]
    fn into_subscription(self) -> Result<Subscription> {
        let recipients: Vec<Recipient> =
            serde_json::from_str(&self.recipients).map_err(Error::Serialization)?;
        let filters: Option<FilterRules> = match &self.filters {
            Some(json) => Some(serde_json::from_str(json).map_err(Error::Serialization)?),
            None => None,
        };

        Ok(Subscription {
            id: self.id,
            name: self.name,
            url: self.url,
            enabled: self.enabled != 0,
            recipients,
            baseline: self
                .baseline
                .and_then(|ts| Utc.timestamp_opt(ts, 0).single()),
            last_error: self.last_error,
            max_items_per_cycle: self.max_items_per_cycle as u32,
            template: self.template,
            filters,
            created_at: Utc
                .timestamp_opt(self.created_at, 0)
                .single()
                .unwrap_or_else(Utc::now),
        })
    }
}

/// Delivered-item record from the ledger
#[derive(Debug, Clone, FromRow)]
pub struct LedgerRow {
    /// Entry guid
    pub guid: String,
    /// Subscription the entry was delivered for
    pub subscription_id: String,
    /// Unix timestamp of the entry's publish-time
    pub published_at: i64,
    /// Unix timestamp when the delivery was recorded
    pub delivered_at: i64,
}

/// Database handle for feedcourier
pub struct Database {
    pool: SqlitePool,
}
