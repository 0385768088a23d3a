//! Job row persistence.
//!
//! The scheduler's fairness contract lives in `get_due`: higher priority
//! first, ties broken by earliest schedule. `get_due` never claims a job;
//! claiming is the subsequent `update_status(running)`, which is the race
//! resolution point if multiple schedulers ever exist.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::{
    error::{CoreError, Result},
    models::{Job, JobId, JobStatus},
};

/// Repository for job rows.
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Creates a repository over the shared pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Inserts a new job row.
    pub async fn create(&self, job: &Job) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO jobs (id, name, type, config, scheduled_at, priority,
                              project, timezone, status, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(job.id)
        .bind(&job.name)
        .bind(&job.job_type)
        .bind(&job.config)
        .bind(job.scheduled_at)
        .bind(job.priority)
        .bind(&job.project)
        .bind(&job.timezone)
        .bind(job.status)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Fetches a job by id.
    ///
    /// # Errors
    ///
    /// `CoreError::NotFound` when no such job exists.
    pub async fn get(&self, id: JobId) -> Result<Job> {
        sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("job {id}")))
    }

    /// Rewrites the mutable columns of a job and bumps `updated_at`.
    ///
    /// Callers are expected to have loaded the row and enforced state guards
    /// first; this writes unconditionally.
    pub async fn update(&self, job: &Job, now: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query(
            r"
            UPDATE jobs
            SET name = ?, config = ?, scheduled_at = ?, priority = ?,
                project = ?, timezone = ?, status = ?, updated_at = ?
            WHERE id = ?
            ",
        )
        .bind(&job.name)
        .bind(&job.config)
        .bind(job.scheduled_at)
        .bind(job.priority)
        .bind(&job.project)
        .bind(&job.timezone)
        .bind(job.status)
        .bind(now)
        .bind(job.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::not_found(format!("job {}", job.id)));
        }
        Ok(())
    }

    /// Unconditionally sets a job's status.
    ///
    /// This is the claim operation for `scheduled -> running` and the
    /// idempotent write behind cancellation. Concurrent callers are
    /// serialized by the store.
    ///
    /// # Errors
    ///
    /// `CoreError::NotFound` when the row is absent.
    pub async fn update_status(&self, id: JobId, status: JobStatus, now: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query("UPDATE jobs SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status)
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::not_found(format!("job {id}")));
        }
        Ok(())
    }

    /// Returns scheduled jobs due at or before `before`.
    ///
    /// Ordering defines dispatch fairness: `priority DESC, scheduled_at ASC`.
    pub async fn get_due(&self, before: DateTime<Utc>, limit: i64) -> Result<Vec<Job>> {
        let jobs = sqlx::query_as::<_, Job>(
            r"
            SELECT * FROM jobs
            WHERE status = 'scheduled' AND scheduled_at <= ?
            ORDER BY priority DESC, scheduled_at ASC
            LIMIT ?
            ",
        )
        .bind(before)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(jobs)
    }

    /// Jobs currently marked `running`. Reconciler input after a restart.
    pub async fn running(&self) -> Result<Vec<Job>> {
        let jobs = sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE status = 'running'")
            .fetch_all(&self.pool)
            .await?;

        Ok(jobs)
    }

    /// Deletes a job row.
    ///
    /// # Errors
    ///
    /// `CoreError::NotFound` when the row is absent.
    pub async fn delete(&self, id: JobId) -> Result<()> {
        let result = sqlx::query("DELETE FROM jobs WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::not_found(format!("job {id}")));
        }
        Ok(())
    }
}
