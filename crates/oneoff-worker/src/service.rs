//! Job service: validation and state guards in front of the store.
//!
//! The service layer is where invalid transitions are refused before any
//! mutation happens. Only `scheduled` jobs may be updated or deleted
//! (deleting a `running` job requires cancelling it first), and
//! re-execution always rewrites `scheduled_at` explicitly.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use oneoff_core::{
    events::EventType,
    executor::ExecutorRegistry,
    models::{Job, JobId, JobStatus},
    Clock, CoreError, JobEventHandler, Result, Storage,
};
use tracing::info;

use crate::pool::WorkerPool;

/// Request to create a new job.
#[derive(Debug, Clone)]
pub struct CreateJobRequest {
    /// Human-readable job name. Required.
    pub name: String,
    /// Executor type tag. Must be registered.
    pub job_type: String,
    /// Executor config blob, validated through the registry.
    pub config: String,
    /// When to run. `None` schedules the job immediately.
    pub scheduled_at: Option<DateTime<Utc>>,
    /// Dispatch priority 1..=10; defaults to 5.
    pub priority: Option<i64>,
    /// Optional project label.
    pub project: Option<String>,
    /// Informational timezone; storage stays UTC.
    pub timezone: Option<String>,
}

/// Fields of a scheduled job that may be rewritten.
#[derive(Debug, Clone, Default)]
pub struct UpdateJobRequest {
    /// New name.
    pub name: Option<String>,
    /// New config blob, re-validated against the job's type.
    pub config: Option<String>,
    /// New schedule time.
    pub scheduled_at: Option<DateTime<Utc>>,
    /// New priority 1..=10.
    pub priority: Option<i64>,
    /// New project label (`Some(None)` clears it).
    pub project: Option<Option<String>>,
    /// New informational timezone.
    pub timezone: Option<String>,
}

/// Service coordinating job CRUD with the pool and event bus.
pub struct JobService {
    storage: Storage,
    registry: Arc<ExecutorRegistry>,
    pool: Arc<WorkerPool>,
    clock: Arc<dyn Clock>,
    events: Arc<dyn JobEventHandler>,
}

impl JobService {
    /// Creates a service over shared engine components.
    pub fn new(
        storage: Storage,
        registry: Arc<ExecutorRegistry>,
        pool: Arc<WorkerPool>,
        clock: Arc<dyn Clock>,
        events: Arc<dyn JobEventHandler>,
    ) -> Self {
        Self { storage, registry, pool, clock, events }
    }

    /// Creates a job after validating name, priority, and executor config.
    ///
    /// Emits `job.created` on success.
    pub async fn create(&self, request: CreateJobRequest) -> Result<Job> {
        if request.name.trim().is_empty() {
            return Err(CoreError::invalid_input("name is required"));
        }

        let priority = request.priority.unwrap_or(5);
        validate_priority(priority)?;

        self.registry.validate(&request.job_type, &request.config)?;

        let now = self.clock.now_utc();
        let job = Job {
            id: JobId::new(),
            name: request.name,
            job_type: request.job_type,
            config: request.config,
            scheduled_at: request.scheduled_at.unwrap_or(now),
            priority,
            project: request.project,
            timezone: request.timezone.unwrap_or_else(|| "UTC".to_string()),
            status: JobStatus::Scheduled,
            created_at: now,
            updated_at: now,
        };

        self.storage.jobs.create(&job).await?;
        info!(job_id = %job.id, job_type = %job.job_type, scheduled_at = %job.scheduled_at, "job created");

        self.emit_created(&job);
        Ok(job)
    }

    /// Fetches a job.
    pub async fn get(&self, id: JobId) -> Result<Job> {
        self.storage.jobs.get(id).await
    }

    /// Applies updates to a `scheduled` job.
    ///
    /// # Errors
    ///
    /// `InvalidState` for any other status; `InvalidInput` for a bad
    /// priority or config.
    pub async fn update(&self, id: JobId, updates: UpdateJobRequest) -> Result<Job> {
        let mut job = self.storage.jobs.get(id).await?;

        if job.status != JobStatus::Scheduled {
            return Err(CoreError::invalid_state(format!(
                "cannot update job in status: {}",
                job.status
            )));
        }

        if let Some(priority) = updates.priority {
            validate_priority(priority)?;
            job.priority = priority;
        }
        if let Some(config) = updates.config {
            self.registry.validate(&job.job_type, &config)?;
            job.config = config;
        }
        if let Some(name) = updates.name {
            job.name = name;
        }
        if let Some(scheduled_at) = updates.scheduled_at {
            if scheduled_at < self.clock.now_utc() {
                return Err(CoreError::invalid_input("schedule time must be in the future"));
            }
            job.scheduled_at = scheduled_at;
        }
        if let Some(project) = updates.project {
            job.project = project;
        }
        if let Some(timezone) = updates.timezone {
            job.timezone = timezone;
        }

        let now = self.clock.now_utc();
        job.updated_at = now;
        self.storage.jobs.update(&job, now).await?;

        self.storage.jobs.get(id).await
    }

    /// Deletes a job.
    ///
    /// # Errors
    ///
    /// `InvalidState` for `running` jobs; cancel first.
    pub async fn delete(&self, id: JobId) -> Result<()> {
        let job = self.storage.jobs.get(id).await?;

        if job.status == JobStatus::Running {
            return Err(CoreError::invalid_state(
                "cannot delete running job, cancel it first",
            ));
        }

        self.storage.jobs.delete(id).await
    }

    /// Cancels a job. A second cancel of an already-cancelled job succeeds
    /// without touching anything.
    ///
    /// # Errors
    ///
    /// `InvalidState` when the job already completed or failed.
    pub async fn cancel(&self, id: JobId) -> Result<()> {
        let job = self.storage.jobs.get(id).await?;

        match job.status {
            JobStatus::Cancelled => Ok(()),
            JobStatus::Completed | JobStatus::Failed => Err(CoreError::invalid_state(format!(
                "cannot cancel job in status: {}",
                job.status
            ))),
            JobStatus::Scheduled | JobStatus::Running => self.pool.cancel_job(id).await,
        }
    }

    /// Schedules a job for immediate execution by explicitly rewriting
    /// `scheduled_at` to now.
    ///
    /// # Errors
    ///
    /// `InvalidState` when the job is currently running.
    pub async fn run_now(&self, id: JobId) -> Result<Job> {
        let mut job = self.storage.jobs.get(id).await?;

        if job.status == JobStatus::Running {
            return Err(CoreError::invalid_state("job is already running"));
        }

        let now = self.clock.now_utc();
        job.scheduled_at = now;
        job.status = JobStatus::Scheduled;
        job.updated_at = now;
        self.storage.jobs.update(&job, now).await?;

        Ok(job)
    }

    fn emit_created(&self, job: &Job) {
        let event = oneoff_core::events::JobEvent {
            event_type: EventType::JobCreated,
            timestamp: self.clock.now_utc(),
            job: job.clone(),
            execution: None,
        };
        let handler = Arc::clone(&self.events);
        tokio::spawn(async move {
            handler.on_event(event).await;
        });
    }
}

fn validate_priority(priority: i64) -> Result<()> {
    if !(1..=10).contains(&priority) {
        return Err(CoreError::invalid_input("priority must be between 1 and 10"));
    }
    Ok(())
}
