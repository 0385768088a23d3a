//! Metrics seam for job execution outcomes.
//!
//! The pool reports one observation per finished job; hosting code can feed
//! this into whatever collector it runs. The pool itself never formats or
//! exposes metrics.

use std::time::Duration;

use oneoff_core::ExecutionStatus;

/// Receiver for per-job outcome observations.
pub trait JobMetrics: Send + Sync {
    /// Called once per finished execution with its type tag, final status,
    /// and wall-clock duration.
    fn on_job_finished(&self, job_type: &str, status: ExecutionStatus, duration: Duration);
}

/// Metrics receiver that discards everything.
#[derive(Debug, Default)]
pub struct NoOpJobMetrics;

impl JobMetrics for NoOpJobMetrics {
    fn on_job_finished(&self, _job_type: &str, _status: ExecutionStatus, _duration: Duration) {}
}
