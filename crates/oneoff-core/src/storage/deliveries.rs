//! Webhook delivery rows.
//!
//! A delivery row is created `pending` with zero attempts and carries the
//! serialized payload bytes for its whole retry sequence. `attempts` only
//! ever increments; status updates overwrite the latest response fields.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::{
    error::{CoreError, Result},
    models::{DeliveryId, DeliveryStatus, WebhookDelivery, WebhookId},
};

/// Repository for delivery rows.
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Creates a repository over the shared pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Inserts a new delivery row.
    pub async fn create(&self, delivery: &WebhookDelivery) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO webhook_deliveries (id, webhook_id, event_type, payload,
                                            status, attempts, next_retry_at, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(delivery.id)
        .bind(delivery.webhook_id)
        .bind(&delivery.event_type)
        .bind(&delivery.payload)
        .bind(delivery.status)
        .bind(delivery.attempts)
        .bind(delivery.next_retry_at)
        .bind(delivery.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Fetches a delivery by id.
    pub async fn get(&self, id: DeliveryId) -> Result<WebhookDelivery> {
        sqlx::query_as::<_, WebhookDelivery>("SELECT * FROM webhook_deliveries WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("delivery {id}")))
    }

    /// Records the outcome of a delivery attempt.
    ///
    /// Sets status, latest response fields, and the retry schedule in one
    /// statement. `next_retry_at = None` on a terminal status.
    pub async fn update(
        &self,
        id: DeliveryId,
        status: DeliveryStatus,
        response_code: Option<i64>,
        response_body: &str,
        error: &str,
        next_retry_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let result = sqlx::query(
            r"
            UPDATE webhook_deliveries
            SET status = ?, response_code = ?, response_body = ?, error = ?, next_retry_at = ?
            WHERE id = ?
            ",
        )
        .bind(status)
        .bind(response_code)
        .bind(response_body)
        .bind(error)
        .bind(next_retry_at)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::not_found(format!("delivery {id}")));
        }
        Ok(())
    }

    /// Increments the attempt counter.
    pub async fn increment_attempts(&self, id: DeliveryId) -> Result<()> {
        sqlx::query("UPDATE webhook_deliveries SET attempts = attempts + 1 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Pending deliveries eligible for (re)delivery, oldest first.
    ///
    /// A NULL `next_retry_at` means immediately eligible; that is how rows
    /// dropped by a full delivery queue get picked back up.
    pub async fn pending_due(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<WebhookDelivery>> {
        let deliveries = sqlx::query_as::<_, WebhookDelivery>(
            r"
            SELECT * FROM webhook_deliveries
            WHERE status = 'pending' AND (next_retry_at IS NULL OR next_retry_at <= ?)
            ORDER BY created_at ASC
            LIMIT ?
            ",
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(deliveries)
    }

    /// Deliveries targeting one webhook, newest first.
    pub async fn list_for_webhook(
        &self,
        webhook_id: WebhookId,
        limit: i64,
    ) -> Result<Vec<WebhookDelivery>> {
        let deliveries = sqlx::query_as::<_, WebhookDelivery>(
            r"
            SELECT * FROM webhook_deliveries
            WHERE webhook_id = ?
            ORDER BY created_at DESC
            LIMIT ?
            ",
        )
        .bind(webhook_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(deliveries)
    }
}
