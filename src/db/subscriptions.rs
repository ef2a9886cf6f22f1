//! Subscription CRUD and the SQLite-backed registry.

use crate::error::DatabaseError;
use crate::registry::SubscriptionRegistry;
use crate::types::Subscription;
use crate::{Error, Result};
use async_trait::async_trait;

use super::{Database, SubscriptionRow};

impl Database {
    /// Insert a new subscription
    pub async fn insert_subscription(&self, sub: &Subscription) -> Result<()> {
        let recipients = serde_json::to_string(&sub.recipients).map_err(Error::Serialization)?;
        let filters = match &sub.filters {
            Some(f) => Some(serde_json::to_string(f).map_err(Error::Serialization)?),
            None => None,
        };

        sqlx::query(
            r#"
            INSERT INTO subscriptions
                (id, name, url, enabled, recipients, baseline, last_error,
                 max_items_per_cycle, template, filters, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&sub.id)
        .bind(&sub.name)
        .bind(&sub.url)
        .bind(sub.enabled as i32)
        .bind(recipients)
        .bind(sub.baseline.map(|dt| dt.timestamp()))
        .bind(&sub.last_error)
        .bind(sub.max_items_per_cycle as i64)
        .bind(&sub.template)
        .bind(filters)
        .bind(sub.created_at.timestamp())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to insert subscription: {}",
                e
            )))
        })?;

        Ok(())
    }

    /// Get a subscription by ID
    pub async fn get_subscription(&self, id: &str) -> Result<Subscription> {
        let row: Option<SubscriptionRow> =
            sqlx::query_as("SELECT * FROM subscriptions WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to get subscription: {}",
                        e
                    )))
                })?;

        match row {
            Some(row) => row.into_subscription(),
            None => Err(Error::NotFound(id.to_string())),
        }
    }

    /// Get a subscription by name
    pub async fn get_subscription_by_name(&self, name: &str) -> Result<Option<Subscription>> {
        let row: Option<SubscriptionRow> =
            sqlx::query_as("SELECT * FROM subscriptions WHERE name = ?")
                .bind(name)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to get subscription by name: {}",
                        e
                    )))
                })?;

        row.map(SubscriptionRow::into_subscription).transpose()
    }

    /// List all subscriptions, newest first
    pub async fn list_subscriptions(&self) -> Result<Vec<Subscription>> {
        let rows: Vec<SubscriptionRow> =
            sqlx::query_as("SELECT * FROM subscriptions ORDER BY created_at DESC")
                .fetch_all(&self.pool)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to list subscriptions: {}",
                        e
                    )))
                })?;

        rows.into_iter()
            .map(SubscriptionRow::into_subscription)
            .collect()
    }

    /// List enabled subscriptions, oldest first for stable sweep order
    pub async fn list_enabled_subscriptions(&self) -> Result<Vec<Subscription>> {
        let rows: Vec<SubscriptionRow> =
            sqlx::query_as("SELECT * FROM subscriptions WHERE enabled = 1 ORDER BY created_at ASC")
                .fetch_all(&self.pool)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to list enabled subscriptions: {}",
                        e
                    )))
                })?;

        rows.into_iter()
            .map(SubscriptionRow::into_subscription)
            .collect()
    }

    /// Update an existing subscription (full replace keyed on id)
    pub async fn update_subscription(&self, sub: &Subscription) -> Result<()> {
        let recipients = serde_json::to_string(&sub.recipients).map_err(Error::Serialization)?;
        let filters = match &sub.filters {
            Some(f) => Some(serde_json::to_string(f).map_err(Error::Serialization)?),
            None => None,
        };

        let result = sqlx::query(
            r#"
            UPDATE subscriptions
            SET name = ?, url = ?, enabled = ?, recipients = ?, baseline = ?,
                last_error = ?, max_items_per_cycle = ?, template = ?, filters = ?
            WHERE id = ?
            "#,
        )
        .bind(&sub.name)
        .bind(&sub.url)
        .bind(sub.enabled as i32)
        .bind(recipients)
        .bind(sub.baseline.map(|dt| dt.timestamp()))
        .bind(&sub.last_error)
        .bind(sub.max_items_per_cycle as i64)
        .bind(&sub.template)
        .bind(filters)
        .bind(&sub.id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to update subscription: {}",
                e
            )))
        })?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(sub.id.clone()));
        }

        Ok(())
    }

    /// Enable or disable a subscription
    pub async fn set_subscription_enabled(&self, id: &str, enabled: bool) -> Result<()> {
        let result = sqlx::query("UPDATE subscriptions SET enabled = ? WHERE id = ?")
            .bind(enabled as i32)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to set subscription enabled: {}",
                    e
                )))
            })?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(id.to_string()));
        }

        Ok(())
    }

    /// Delete a subscription and its ledger records
    pub async fn delete_subscription(&self, id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM subscriptions WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to delete subscription: {}",
                    e
                )))
            })?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(id.to_string()));
        }

        // Ledger records for a deleted subscription are dead weight
        sqlx::query("DELETE FROM delivered_items WHERE subscription_id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to delete subscription ledger records: {}",
                    e
                )))
            })?;

        Ok(())
    }
}

#[async_trait]
impl SubscriptionRegistry for Database {
    async fn list_enabled(&self) -> Result<Vec<Subscription>> {
        self.list_enabled_subscriptions().await
    }

    async fn get(&self, id: &str) -> Result<Subscription> {
        self.get_subscription(id).await
    }

    async fn update(&self, sub: &Subscription) -> Result<()> {
        self.update_subscription(sub).await
    }
}
