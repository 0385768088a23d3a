//! Isolated test environment over an in-memory SQLite store.

use chrono::{DateTime, Utc};
use oneoff_core::{
    migrate,
    models::{Job, JobId, JobStatus, Webhook, WebhookId},
    Storage,
};
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};

/// A migrated, in-memory store plus convenience fixtures.
///
/// The pool is capped at a single connection so every handle sees the same
/// `:memory:` database.
pub struct TestEnv {
    /// Raw pool for tests that need direct SQL.
    pub pool: SqlitePool,
    /// Repository aggregate over the same pool.
    pub storage: Storage,
}

impl TestEnv {
    /// Creates a fresh environment with the schema applied.
    ///
    /// # Panics
    ///
    /// Panics when the in-memory database cannot be set up; tests cannot
    /// proceed without one.
    pub async fn new() -> Self {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory sqlite should connect");

        migrate(&pool).await.expect("schema migration should succeed");

        Self { storage: Storage::new(pool.clone()), pool }
    }

    /// Inserts a scheduled job and returns it.
    pub async fn insert_job(
        &self,
        name: &str,
        job_type: &str,
        config: &str,
        scheduled_at: DateTime<Utc>,
        priority: i64,
    ) -> Job {
        let now = Utc::now();
        let job = Job {
            id: JobId::new(),
            name: name.to_string(),
            job_type: job_type.to_string(),
            config: config.to_string(),
            scheduled_at,
            priority,
            project: None,
            timezone: "UTC".to_string(),
            status: JobStatus::Scheduled,
            created_at: now,
            updated_at: now,
        };
        self.storage.jobs.create(&job).await.expect("job insert should succeed");
        job
    }

    /// Inserts an active webhook subscription and returns it.
    pub async fn insert_webhook(&self, url: &str, events: &str, secret: &str) -> Webhook {
        let now = Utc::now();
        let id = WebhookId::new();
        let webhook = Webhook {
            id,
            name: format!("hook-{}", &id.to_string()[..8]),
            url: url.to_string(),
            secret: secret.to_string(),
            events: events.to_string(),
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        self.storage.webhooks.create(&webhook).await.expect("webhook insert should succeed");
        webhook
    }
}
