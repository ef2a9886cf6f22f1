//! Delivered-item ledger: exact-match dedup and baseline recovery.
//!
//! Each record keys an entry guid to a subscription with the entry's
//! publish-time. The ledger backs two scheduler behaviors: suppressing
//! re-delivery of boundary entries the baseline alone cannot distinguish,
//! and recovering a lost baseline from the newest stored publish-time.

use crate::error::DatabaseError;
use crate::{Error, Result};
use chrono::{DateTime, TimeZone, Utc};

use super::Database;

impl Database {
    /// Check whether an entry has already been delivered for a subscription
    pub async fn is_delivered(&self, guid: &str, subscription_id: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM delivered_items WHERE guid = ? AND subscription_id = ?
            "#,
        )
        .bind(guid)
        .bind(subscription_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to check if item is delivered: {}",
                e
            )))
        })?;

        Ok(count > 0)
    }

    /// Record a delivered entry
    ///
    /// Idempotent: re-recording an existing (guid, subscription) pair updates
    /// the stored publish-time rather than failing.
    pub async fn record_delivery(
        &self,
        guid: &str,
        subscription_id: &str,
        published_at: DateTime<Utc>,
    ) -> Result<()> {
        let now = Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO delivered_items (guid, subscription_id, published_at, delivered_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(guid, subscription_id) DO UPDATE SET published_at = ?, delivered_at = ?
            "#,
        )
        .bind(guid)
        .bind(subscription_id)
        .bind(published_at.timestamp())
        .bind(now)
        .bind(published_at.timestamp())
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to record delivery: {}",
                e
            )))
        })?;

        Ok(())
    }

    /// Newest publish-time recorded for a subscription
    ///
    /// Used to recover a baseline when the subscription record has lost one.
    pub async fn last_delivered_publish_time(
        &self,
        subscription_id: &str,
    ) -> Result<Option<DateTime<Utc>>> {
        let max: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT MAX(published_at) FROM delivered_items WHERE subscription_id = ?
            "#,
        )
        .bind(subscription_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to query last delivered publish time: {}",
                e
            )))
        })?;

        Ok(max.and_then(|ts| Utc.timestamp_opt(ts, 0).single()))
    }

    /// Delete ledger records whose publish-time is older than the cutoff
    ///
    /// Retention is keyed on publish-time, not on when the record was written.
    /// Returns the number of deleted records.
    pub async fn prune_delivered_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM delivered_items WHERE published_at < ?
            "#,
        )
        .bind(cutoff.timestamp())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to prune delivered items: {}",
                e
            )))
        })?;

        Ok(result.rows_affected())
    }

    /// Count ledger records for a subscription
    pub async fn delivered_count(&self, subscription_id: &str) -> Result<i64> {
        sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM delivered_items WHERE subscription_id = ?
            "#,
        )
        .bind(subscription_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to count delivered items: {}",
                e
            )))
        })
    }
}
