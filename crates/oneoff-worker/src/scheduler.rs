//! Single-task poll loop promoting due jobs into the dispatch queue.
//!
//! The scheduler guarantees liveness, not immediacy: a due job is offered to
//! the pool within one poll interval plus queue drain time. It never blocks
//! on execution; a full queue simply defers the job to the next poll.

use std::{sync::Arc, time::Duration};

use oneoff_core::models::Job;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, error, warn};

use crate::pool::Inner;

pub(crate) struct Scheduler {
    inner: Arc<Inner>,
    dispatch_tx: mpsc::Sender<Job>,
    poll_interval: Duration,
    batch_limit: i64,
}

impl Scheduler {
    pub(crate) fn new(
        inner: Arc<Inner>,
        dispatch_tx: mpsc::Sender<Job>,
        poll_interval: Duration,
        batch_limit: i64,
    ) -> Self {
        Self { inner, dispatch_tx, poll_interval, batch_limit }
    }

    pub(crate) async fn run(self) {
        debug!("scheduler started");

        loop {
            tokio::select! {
                () = self.inner.shutdown.cancelled() => break,
                () = self.inner.clock.sleep(self.poll_interval) => self.poll().await,
            }
        }

        debug!("scheduler stopped");
    }

    /// One poll: fetch due jobs and offer each to the pool.
    async fn poll(&self) {
        let now = self.inner.clock.now_utc();

        let jobs = match self.inner.storage.jobs.get_due(now, self.batch_limit).await {
            Ok(jobs) => jobs,
            Err(err) => {
                error!(error = %err, "failed to fetch due jobs");
                return;
            }
        };

        if jobs.is_empty() {
            return;
        }

        debug!(count = jobs.len(), "found due jobs");

        for job in jobs {
            // Defence in depth: the row may still read `scheduled` while the
            // job already executes in memory.
            if self.inner.is_running(job.id) {
                continue;
            }

            let job_id = job.id;
            match self.dispatch_tx.try_send(job) {
                Ok(()) => debug!(job_id = %job_id, "job queued for execution"),
                Err(TrySendError::Full(_)) => {
                    warn!(job_id = %job_id, "dispatch queue full, will retry on next poll");
                }
                Err(TrySendError::Closed(_)) => return,
            }
        }
    }
}
