//! Background sweeper deleting execution rows past the retention window.

use std::{sync::Arc, time::Duration};

use tracing::{debug, error, info};

use crate::pool::Inner;

/// Runs the sweep immediately, then on every `interval` tick until shutdown.
pub(crate) async fn retention_loop(inner: Arc<Inner>, retention_days: i64, interval: Duration) {
    run_cleanup(&inner, retention_days).await;

    loop {
        tokio::select! {
            () = inner.shutdown.cancelled() => break,
            () = inner.clock.sleep(interval) => run_cleanup(&inner, retention_days).await,
        }
    }

    debug!("retention sweeper stopped");
}

async fn run_cleanup(inner: &Arc<Inner>, retention_days: i64) {
    if retention_days <= 0 {
        return;
    }

    let cutoff = inner.clock.now_utc() - chrono::Duration::days(retention_days);

    match inner.storage.executions.delete_older_than(cutoff).await {
        Ok(0) => debug!("no execution rows past retention"),
        Ok(deleted) => {
            info!(deleted, retention_days, cutoff = %cutoff, "deleted old execution rows");
        }
        Err(err) => error!(error = %err, "retention sweep failed"),
    }
}
