//! Startup reconciliation of executions orphaned by a crash.
//!
//! A job stuck in `running` without a terminal execution row means the
//! process died mid-run. Such jobs are failed, never silently re-run: the
//! at-most-once contract outranks completion.

use chrono::Utc;
use oneoff_core::{
    models::{ExecutionStatus, JobStatus},
    Clock, Result, Storage,
};
use tracing::{info, warn};

/// Message recorded on executions closed out by the reconciler.
pub const CRASH_MESSAGE: &str = "process crashed";

/// Fails every `running` job left behind by a previous process.
///
/// For each such job the most recent `running` execution (if any) is
/// completed as `failed` with [`CRASH_MESSAGE`], and the job moves to
/// `failed`. Returns how many jobs were reconciled.
///
/// # Errors
///
/// Propagates store failures; a partially reconciled set is retried on the
/// next startup.
pub async fn reconcile_orphaned_jobs(storage: &Storage, clock: &dyn Clock) -> Result<u64> {
    let orphans = storage.jobs.running().await?;
    if orphans.is_empty() {
        return Ok(0);
    }

    let mut reconciled = 0;
    for job in orphans {
        let now = clock.now_utc();

        if let Some(execution) = storage.executions.latest_running_for_job(job.id).await? {
            let duration_ms = duration_since_ms(execution.started_at, now);
            storage
                .executions
                .complete(
                    execution.id,
                    ExecutionStatus::Failed,
                    "",
                    CRASH_MESSAGE,
                    None,
                    duration_ms,
                    now,
                )
                .await?;
        }

        storage.jobs.update_status(job.id, JobStatus::Failed, now).await?;
        warn!(job_id = %job.id, job_name = %job.name, "marked crashed execution as failed");
        reconciled += 1;
    }

    info!(count = reconciled, "crash reconciliation complete");
    Ok(reconciled)
}

fn duration_since_ms(start: chrono::DateTime<Utc>, end: chrono::DateTime<Utc>) -> i64 {
    (end - start).num_milliseconds().max(0)
}
