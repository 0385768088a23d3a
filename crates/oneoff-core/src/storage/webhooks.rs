//! Webhook subscription rows.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::{
    error::{CoreError, Result},
    models::{Webhook, WebhookId},
};

/// Repository for webhook subscriptions.
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Creates a repository over the shared pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Inserts a new webhook row.
    pub async fn create(&self, webhook: &Webhook) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO webhooks (id, name, url, secret, events, is_active,
                                  created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(webhook.id)
        .bind(&webhook.name)
        .bind(&webhook.url)
        .bind(&webhook.secret)
        .bind(&webhook.events)
        .bind(webhook.is_active)
        .bind(webhook.created_at)
        .bind(webhook.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Fetches a webhook by id.
    pub async fn get(&self, id: WebhookId) -> Result<Webhook> {
        sqlx::query_as::<_, Webhook>("SELECT * FROM webhooks WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("webhook {id}")))
    }

    /// All webhooks, newest first.
    pub async fn list(&self) -> Result<Vec<Webhook>> {
        let webhooks =
            sqlx::query_as::<_, Webhook>("SELECT * FROM webhooks ORDER BY created_at DESC")
                .fetch_all(&self.pool)
                .await?;

        Ok(webhooks)
    }

    /// Active webhooks subscribed to the given event type.
    ///
    /// Subscription lists are comma-separated; matching happens here rather
    /// than in SQL so whitespace-sloppy lists still match.
    pub async fn active_for_event(&self, event: &str) -> Result<Vec<Webhook>> {
        let webhooks =
            sqlx::query_as::<_, Webhook>("SELECT * FROM webhooks WHERE is_active = 1")
                .fetch_all(&self.pool)
                .await?;

        Ok(webhooks.into_iter().filter(|w| w.subscribes_to(event)).collect())
    }

    /// Rewrites the mutable columns of a webhook and bumps `updated_at`.
    pub async fn update(&self, webhook: &Webhook, now: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query(
            r"
            UPDATE webhooks
            SET name = ?, url = ?, secret = ?, events = ?, is_active = ?, updated_at = ?
            WHERE id = ?
            ",
        )
        .bind(&webhook.name)
        .bind(&webhook.url)
        .bind(&webhook.secret)
        .bind(&webhook.events)
        .bind(webhook.is_active)
        .bind(now)
        .bind(webhook.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::not_found(format!("webhook {}", webhook.id)));
        }
        Ok(())
    }

    /// Deletes a webhook row.
    pub async fn delete(&self, id: WebhookId) -> Result<()> {
        let result = sqlx::query("DELETE FROM webhooks WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::not_found(format!("webhook {id}")));
        }
        Ok(())
    }
}
