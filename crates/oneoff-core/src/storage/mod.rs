//! Database access layer implementing the repository pattern for scheduler
//! persistence.
//!
//! The store is the only source of ground truth: jobs, executions, webhooks,
//! and deliveries all live here. Every operation is a single SQL statement
//! that either succeeds atomically or surfaces an error; partial writes are
//! never observable. All database access goes through these repositories.

use std::sync::Arc;

use sqlx::SqlitePool;

pub mod deliveries;
pub mod executions;
pub mod jobs;
pub mod webhooks;

use crate::error::Result;

/// Container for all repository instances providing unified store access.
#[derive(Clone)]
pub struct Storage {
    /// Repository for job rows.
    pub jobs: Arc<jobs::Repository>,

    /// Repository for execution audit rows.
    pub executions: Arc<executions::Repository>,

    /// Repository for webhook subscriptions.
    pub webhooks: Arc<webhooks::Repository>,

    /// Repository for webhook delivery rows.
    pub deliveries: Arc<deliveries::Repository>,
}

impl Storage {
    /// Creates a new storage instance over a shared connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            jobs: Arc::new(jobs::Repository::new(pool.clone())),
            executions: Arc::new(executions::Repository::new(pool.clone())),
            webhooks: Arc::new(webhooks::Repository::new(pool.clone())),
            deliveries: Arc::new(deliveries::Repository::new(pool)),
        }
    }

    /// Verifies database connectivity with a trivial query.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Database` when the connection is unhealthy.
    pub async fn health_check(&self) -> Result<()> {
        let _: (i64,) = sqlx::query_as("SELECT 1").fetch_one(self.jobs.pool()).await?;
        Ok(())
    }
}

/// Applies the schema. Idempotent; invoked at startup and from tests.
///
/// Indices back the hot paths: due-job polling on
/// `(status, scheduled_at, priority)`, the retry scanner on
/// `(status, next_retry_at)`, and per-job audit lookups on `(job_id)`.
///
/// # Errors
///
/// Returns `CoreError::Database` when a statement fails.
pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS jobs (
            id BLOB PRIMARY KEY,
            name TEXT NOT NULL,
            type TEXT NOT NULL,
            config TEXT NOT NULL DEFAULT '{}',
            scheduled_at TEXT NOT NULL,
            priority INTEGER NOT NULL DEFAULT 5,
            project TEXT,
            timezone TEXT NOT NULL DEFAULT 'UTC',
            status TEXT NOT NULL DEFAULT 'scheduled',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        ",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS job_executions (
            id BLOB PRIMARY KEY,
            job_id BLOB NOT NULL,
            started_at TEXT NOT NULL,
            completed_at TEXT,
            status TEXT NOT NULL,
            output TEXT NOT NULL DEFAULT '',
            exit_code INTEGER,
            error TEXT NOT NULL DEFAULT '',
            duration_ms INTEGER,
            created_at TEXT NOT NULL
        )
        ",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS webhooks (
            id BLOB PRIMARY KEY,
            name TEXT NOT NULL,
            url TEXT NOT NULL,
            secret TEXT NOT NULL DEFAULT '',
            events TEXT NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        ",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS webhook_deliveries (
            id BLOB PRIMARY KEY,
            webhook_id BLOB NOT NULL,
            event_type TEXT NOT NULL,
            payload TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            response_code INTEGER,
            response_body TEXT NOT NULL DEFAULT '',
            error TEXT NOT NULL DEFAULT '',
            attempts INTEGER NOT NULL DEFAULT 0,
            next_retry_at TEXT,
            created_at TEXT NOT NULL
        )
        ",
    )
    .execute(pool)
    .await?;

    for statement in [
        "CREATE INDEX IF NOT EXISTS idx_jobs_due ON jobs(status, scheduled_at, priority)",
        "CREATE INDEX IF NOT EXISTS idx_deliveries_pending
         ON webhook_deliveries(status, next_retry_at)",
        "CREATE INDEX IF NOT EXISTS idx_executions_job ON job_executions(job_id)",
    ] {
        sqlx::query(statement).execute(pool).await?;
    }

    Ok(())
}
