//! Execution audit rows.
//!
//! Executions are append-only once terminal: `complete` sets the terminal
//! status, output, exit code, duration, and `completed_at` in a single
//! statement so a crash can never leave a half-finished terminal row.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::{
    error::{CoreError, Result},
    models::{ExecutionId, ExecutionStatus, JobExecution, JobId},
};

/// Repository for execution rows.
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Creates a repository over the shared pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Inserts a `running` execution row for a job and returns it.
    ///
    /// Created together with the job's `scheduled -> running` transition.
    pub async fn create(&self, job_id: JobId, started_at: DateTime<Utc>) -> Result<JobExecution> {
        let execution = JobExecution {
            id: ExecutionId::new(),
            job_id,
            started_at,
            completed_at: None,
            status: ExecutionStatus::Running,
            output: String::new(),
            exit_code: None,
            error: String::new(),
            duration_ms: None,
            created_at: started_at,
        };

        sqlx::query(
            r"
            INSERT INTO job_executions (id, job_id, started_at, status, created_at)
            VALUES (?, ?, ?, ?, ?)
            ",
        )
        .bind(execution.id)
        .bind(execution.job_id)
        .bind(execution.started_at)
        .bind(execution.status)
        .bind(execution.created_at)
        .execute(&self.pool)
        .await?;

        Ok(execution)
    }

    /// Fetches an execution by id.
    pub async fn get(&self, id: ExecutionId) -> Result<JobExecution> {
        sqlx::query_as::<_, JobExecution>("SELECT * FROM job_executions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("execution {id}")))
    }

    /// Marks an execution terminal, setting every terminal field at once.
    #[allow(clippy::too_many_arguments)]
    pub async fn complete(
        &self,
        id: ExecutionId,
        status: ExecutionStatus,
        output: &str,
        error: &str,
        exit_code: Option<i64>,
        duration_ms: i64,
        completed_at: DateTime<Utc>,
    ) -> Result<()> {
        let result = sqlx::query(
            r"
            UPDATE job_executions
            SET status = ?, output = ?, error = ?, exit_code = ?,
                duration_ms = ?, completed_at = ?
            WHERE id = ?
            ",
        )
        .bind(status)
        .bind(output)
        .bind(error)
        .bind(exit_code)
        .bind(duration_ms)
        .bind(completed_at)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::not_found(format!("execution {id}")));
        }
        Ok(())
    }

    /// All executions of a job, newest first.
    pub async fn list_for_job(&self, job_id: JobId) -> Result<Vec<JobExecution>> {
        let executions = sqlx::query_as::<_, JobExecution>(
            "SELECT * FROM job_executions WHERE job_id = ? ORDER BY started_at DESC",
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(executions)
    }

    /// The most recent still-`running` execution of a job, if any.
    ///
    /// After a crash this is the orphan the reconciler closes out.
    pub async fn latest_running_for_job(&self, job_id: JobId) -> Result<Option<JobExecution>> {
        let execution = sqlx::query_as::<_, JobExecution>(
            r"
            SELECT * FROM job_executions
            WHERE job_id = ? AND status = 'running'
            ORDER BY started_at DESC
            LIMIT 1
            ",
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(execution)
    }

    /// Deletes execution rows created before the cutoff. Returns the count.
    pub async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM job_executions WHERE created_at < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
