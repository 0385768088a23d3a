//! Bounded worker pool executing due jobs with per-job cancellation.
//!
//! The pool owns the only mutable shared state in the engine: the running
//! table mapping job IDs to cancel handles. Workers pull from a bounded
//! dispatch queue fed by the scheduler, transition job and execution rows
//! through the store, and emit lifecycle events off the executing task.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex as StdMutex, PoisonError, RwLock},
    time::Duration,
};

use oneoff_core::{
    events::{EventType, JobEvent},
    executor::ExecutorRegistry,
    models::{ExecutionStatus, Job, JobExecution, JobId, JobStatus},
    Clock, CoreError, JobEventHandler, NoOpJobEventHandler, RealClock, Storage,
};
use tokio::{
    sync::{mpsc, Mutex},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    error::{Result, WorkerError},
    metrics::{JobMetrics, NoOpJobMetrics},
    reconcile, retention,
    scheduler::Scheduler,
};

/// Configuration for the worker pool and its background tasks.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of concurrent workers.
    pub worker_count: usize,

    /// How often the scheduler polls for due jobs.
    pub poll_interval: Duration,

    /// How often the retention sweeper runs.
    pub cleanup_interval: Duration,

    /// Days to keep execution rows. Zero or negative disables sweeping.
    pub log_retention_days: i64,

    /// Maximum time to wait for workers to drain on shutdown.
    pub shutdown_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            poll_interval: Duration::from_secs(5),
            cleanup_interval: Duration::from_secs(24 * 60 * 60),
            log_retention_days: 90,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// Default worker count: half the available cores, at least one.
pub fn default_worker_count() -> usize {
    std::thread::available_parallelism().map(|n| n.get() / 2).unwrap_or(1).max(1)
}

/// Snapshot of pool occupancy for status endpoints.
#[derive(Debug, Clone)]
pub struct PoolStatus {
    /// Configured worker count.
    pub workers_total: usize,
    /// Workers currently executing a job.
    pub workers_active: usize,
    /// Workers idle right now.
    pub workers_available: usize,
    /// Jobs sitting in the dispatch queue.
    pub queue_depth: usize,
    /// IDs of jobs currently executing.
    pub running: Vec<JobId>,
}

/// Shared engine state handed to worker, scheduler, and sweeper tasks.
pub(crate) struct Inner {
    pub(crate) storage: Storage,
    pub(crate) registry: Arc<ExecutorRegistry>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) event_handler: Arc<dyn JobEventHandler>,
    pub(crate) metrics: Arc<dyn JobMetrics>,
    pub(crate) running: RwLock<HashMap<JobId, CancellationToken>>,
    pub(crate) shutdown: CancellationToken,
}

impl Inner {
    pub(crate) fn is_running(&self, job_id: JobId) -> bool {
        self.running.read().unwrap_or_else(PoisonError::into_inner).contains_key(&job_id)
    }

    /// Emits a lifecycle event without blocking the executing task.
    pub(crate) fn emit(&self, event_type: EventType, job: &Job, execution: Option<&JobExecution>) {
        let event = JobEvent {
            event_type,
            timestamp: self.clock.now_utc(),
            job: job.clone(),
            execution: execution.cloned(),
        };
        let handler = Arc::clone(&self.event_handler);
        tokio::spawn(async move {
            handler.on_event(event).await;
        });
    }
}

/// Deregisters a job from the running table on every exit path.
///
/// Cancels the job token as well, so executor-side resources tied to it are
/// released even when `execute_job` unwinds.
struct RunningGuard {
    inner: Arc<Inner>,
    job_id: JobId,
    token: CancellationToken,
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.token.cancel();
        self.inner
            .running
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.job_id);
    }
}

/// The execution engine: scheduler, workers, reconciler, and sweeper.
pub struct WorkerPool {
    inner: Arc<Inner>,
    config: PoolConfig,
    dispatch_tx: mpsc::Sender<Job>,
    dispatch_rx: Arc<Mutex<mpsc::Receiver<Job>>>,
    handles: StdMutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Creates a stopped pool. Call [`WorkerPool::start`] to begin executing.
    pub fn new(storage: Storage, registry: Arc<ExecutorRegistry>, config: PoolConfig) -> Self {
        let (dispatch_tx, dispatch_rx) = mpsc::channel(config.worker_count.max(1) * 2);

        Self {
            inner: Arc::new(Inner {
                storage,
                registry,
                clock: Arc::new(RealClock),
                event_handler: Arc::new(NoOpJobEventHandler),
                metrics: Arc::new(NoOpJobMetrics),
                running: RwLock::new(HashMap::new()),
                shutdown: CancellationToken::new(),
            }),
            config,
            dispatch_tx,
            dispatch_rx: Arc::new(Mutex::new(dispatch_rx)),
            handles: StdMutex::new(Vec::new()),
        }
    }

    /// Replaces the event handler. Must be called before `start`.
    pub fn with_event_handler(mut self, handler: Arc<dyn JobEventHandler>) -> Self {
        self.update_inner(|inner| inner.event_handler = handler);
        self
    }

    /// Replaces the metrics receiver. Must be called before `start`.
    pub fn with_metrics(mut self, metrics: Arc<dyn JobMetrics>) -> Self {
        self.update_inner(|inner| inner.metrics = metrics);
        self
    }

    /// Replaces the clock. Must be called before `start`.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.update_inner(|inner| inner.clock = clock);
        self
    }

    fn update_inner(&mut self, apply: impl FnOnce(&mut Inner)) {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            apply(inner);
        }
    }

    /// Reconciles crashed executions, then spawns workers, the scheduler,
    /// and the retention sweeper.
    ///
    /// # Errors
    ///
    /// Fails when called twice or when reconciliation cannot reach the
    /// store.
    pub async fn start(&self) -> Result<()> {
        {
            let handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
            if !handles.is_empty() {
                return Err(WorkerError::AlreadyStarted);
            }
        }

        let reconciled =
            reconcile::reconcile_orphaned_jobs(&self.inner.storage, self.inner.clock.as_ref())
                .await?;
        if reconciled > 0 {
            warn!(count = reconciled, "reconciled crashed executions from previous run");
        }

        info!(workers = self.config.worker_count, "starting worker pool");

        let mut handles = Vec::with_capacity(self.config.worker_count + 2);

        for worker_id in 0..self.config.worker_count {
            let inner = Arc::clone(&self.inner);
            let rx = Arc::clone(&self.dispatch_rx);
            handles.push(tokio::spawn(async move {
                worker_loop(inner, rx, worker_id).await;
            }));
        }

        let scheduler = Scheduler::new(
            Arc::clone(&self.inner),
            self.dispatch_tx.clone(),
            self.config.poll_interval,
            (self.config.worker_count * 2) as i64,
        );
        handles.push(tokio::spawn(async move {
            scheduler.run().await;
        }));

        if self.config.log_retention_days > 0 {
            let inner = Arc::clone(&self.inner);
            let retention_days = self.config.log_retention_days;
            let interval = self.config.cleanup_interval;
            handles.push(tokio::spawn(async move {
                retention::retention_loop(inner, retention_days, interval).await;
            }));
            info!(retention_days = self.config.log_retention_days, "retention sweeping enabled");
        }

        *self.handles.lock().unwrap_or_else(PoisonError::into_inner) = handles;

        info!("worker pool started");
        Ok(())
    }

    /// Signals shutdown and waits for workers to drain their current jobs.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::ShutdownTimeout`] when the deadline elapses;
    /// running executors are not hard-killed.
    pub async fn shutdown(&self) -> Result<()> {
        info!("stopping worker pool");
        self.inner.shutdown.cancel();

        let handles: Vec<JoinHandle<()>> =
            std::mem::take(&mut *self.handles.lock().unwrap_or_else(PoisonError::into_inner));

        let drain = async {
            for handle in handles {
                if let Err(join_error) = handle.await {
                    error!(error = %join_error, "pool task panicked during shutdown");
                }
            }
        };

        match tokio::time::timeout(self.config.shutdown_timeout, drain).await {
            Ok(()) => {
                info!("worker pool stopped gracefully");
                Ok(())
            }
            Err(_elapsed) => {
                warn!(
                    timeout_secs = self.config.shutdown_timeout.as_secs(),
                    "worker pool shutdown timed out"
                );
                Err(WorkerError::ShutdownTimeout { timeout: self.config.shutdown_timeout })
            }
        }
    }

    /// Cancels a job.
    ///
    /// The store status goes to `cancelled` first, so a scheduled job is
    /// atomically removed from dispatch eligibility; a registered cancel
    /// handle is fired afterwards so a running executor observes it through
    /// its token. Idempotent.
    pub async fn cancel_job(&self, job_id: JobId) -> std::result::Result<(), CoreError> {
        let handle = self
            .inner
            .running
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&job_id)
            .cloned();

        self.inner
            .storage
            .jobs
            .update_status(job_id, JobStatus::Cancelled, self.inner.clock.now_utc())
            .await?;

        if let Some(token) = handle {
            token.cancel();
            info!(job_id = %job_id, "cancellation signal sent to running job");
        } else {
            debug!(job_id = %job_id, "job not running, status updated only");
        }

        Ok(())
    }

    /// Snapshot of pool occupancy.
    pub fn status(&self) -> PoolStatus {
        let running: Vec<JobId> = self
            .inner
            .running
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect();

        let queue_depth = self.dispatch_tx.max_capacity() - self.dispatch_tx.capacity();
        let workers_active = running.len();

        PoolStatus {
            workers_total: self.config.worker_count,
            workers_active,
            workers_available: self.config.worker_count.saturating_sub(workers_active),
            queue_depth,
            running,
        }
    }
}

async fn worker_loop(inner: Arc<Inner>, rx: Arc<Mutex<mpsc::Receiver<Job>>>, worker_id: usize) {
    debug!(worker_id, "worker started");

    loop {
        let job = tokio::select! {
            () = inner.shutdown.cancelled() => break,
            job = async { rx.lock().await.recv().await } => match job {
                Some(job) => job,
                None => break,
            },
        };

        info!(
            worker_id,
            job_id = %job.id,
            job_type = %job.job_type,
            job_name = %job.name,
            "executing job"
        );

        execute_job(&inner, job).await;
    }

    debug!(worker_id, "worker stopped");
}

/// Runs one job through its full lifecycle.
///
/// Every exit path deregisters the running entry and cancels the job token
/// via [`RunningGuard`]. Store failures before the executor runs abandon the
/// job without marking it failed; the row is still `scheduled` and the next
/// poll retries it.
async fn execute_job(inner: &Arc<Inner>, job: Job) {
    let job_token = inner.shutdown.child_token();
    inner
        .running
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(job.id, job_token.clone());
    let _guard = RunningGuard {
        inner: Arc::clone(inner),
        job_id: job.id,
        token: job_token.clone(),
    };

    let started_at = inner.clock.now_utc();

    if let Err(err) = inner
        .storage
        .jobs
        .update_status(job.id, JobStatus::Running, started_at)
        .await
    {
        error!(job_id = %job.id, error = %err, "failed to mark job running, abandoning");
        return;
    }

    let mut execution = match inner.storage.executions.create(job.id, started_at).await {
        Ok(execution) => execution,
        Err(err) => {
            error!(job_id = %job.id, error = %err, "failed to create execution record, abandoning");
            return;
        }
    };

    let mut job = job;
    job.status = JobStatus::Running;
    inner.emit(EventType::JobStarted, &job, Some(&execution));

    let executor = match inner.registry.create(&job.job_type, &job.config) {
        Ok(executor) => executor,
        Err(err) => {
            error!(job_id = %job.id, job_type = %job.job_type, error = %err, "failed to create executor");
            let message = format!("failed to create executor: {err}");
            finish_job(
                inner,
                &mut job,
                &mut execution,
                Outcome {
                    execution_status: ExecutionStatus::Failed,
                    job_status: JobStatus::Failed,
                    event: EventType::JobFailed,
                    output: String::new(),
                    error: message,
                    exit_code: None,
                },
                started_at,
            )
            .await;
            return;
        }
    };

    let result = executor.execute(job_token.clone()).await;

    let outcome = match result {
        Err(_) if job_token.is_cancelled() => Outcome {
            execution_status: ExecutionStatus::Cancelled,
            job_status: JobStatus::Cancelled,
            event: EventType::JobCancelled,
            output: String::new(),
            error: "job cancelled".to_string(),
            exit_code: None,
        },
        Err(err) => Outcome {
            execution_status: ExecutionStatus::Failed,
            job_status: JobStatus::Failed,
            event: EventType::JobFailed,
            output: String::new(),
            error: format!("execution error: {err}"),
            exit_code: None,
        },
        Ok(result) => {
            let failed = result.exit_code != 0;
            Outcome {
                execution_status: if failed {
                    ExecutionStatus::Failed
                } else {
                    ExecutionStatus::Completed
                },
                job_status: if failed { JobStatus::Failed } else { JobStatus::Completed },
                event: if failed { EventType::JobFailed } else { EventType::JobCompleted },
                output: result.output,
                error: result.error,
                exit_code: Some(result.exit_code),
            }
        }
    };

    finish_job(inner, &mut job, &mut execution, outcome, started_at).await;
}

struct Outcome {
    execution_status: ExecutionStatus,
    job_status: JobStatus,
    event: EventType,
    output: String,
    error: String,
    exit_code: Option<i64>,
}

/// Persists the terminal execution and job state, emits the lifecycle
/// event, and reports metrics.
async fn finish_job(
    inner: &Arc<Inner>,
    job: &mut Job,
    execution: &mut JobExecution,
    outcome: Outcome,
    started_at: chrono::DateTime<chrono::Utc>,
) {
    let completed_at = inner.clock.now_utc();
    let duration_ms = (completed_at - started_at).num_milliseconds().max(0);

    if let Err(err) = inner
        .storage
        .executions
        .complete(
            execution.id,
            outcome.execution_status,
            &outcome.output,
            &outcome.error,
            outcome.exit_code,
            duration_ms,
            completed_at,
        )
        .await
    {
        error!(
            execution_id = %execution.id,
            job_id = %job.id,
            error = %err,
            "failed to complete execution"
        );
    }

    // Idempotent when a cancel call already set the terminal status.
    if let Err(err) = inner
        .storage
        .jobs
        .update_status(job.id, outcome.job_status, completed_at)
        .await
    {
        error!(job_id = %job.id, error = %err, "failed to update job final status");
    }

    execution.status = outcome.execution_status;
    execution.output = outcome.output;
    execution.error = outcome.error;
    execution.exit_code = outcome.exit_code;
    execution.duration_ms = Some(duration_ms);
    execution.completed_at = Some(completed_at);
    job.status = outcome.job_status;

    inner.emit(outcome.event, job, Some(execution));

    inner.metrics.on_job_finished(
        &job.job_type,
        outcome.execution_status,
        Duration::from_millis(duration_ms.unsigned_abs()),
    );

    info!(
        job_id = %job.id,
        job_name = %job.name,
        status = %outcome.execution_status,
        duration_ms,
        "job execution finished"
    );
}
