//! Webhook delivery service: intake, bounded workers, and the retry scanner.
//!
//! `dispatch` persists a `pending` delivery per subscribed webhook and tries
//! a non-blocking enqueue; the scanner re-queues anything the queue could
//! not absorb and anything whose retry time has come. Delivery workers own
//! the attempt counter and the backoff schedule.

use std::{
    collections::HashSet,
    sync::{Arc, Mutex as StdMutex, PoisonError},
    time::Duration,
};

use bytes::Bytes;
use oneoff_core::{
    events::{JobEvent, WebhookData, WebhookPayload},
    models::{DeliveryId, DeliveryStatus, Webhook, WebhookDelivery, WebhookId},
    Clock, JobEventHandler, RealClock, Storage,
};
use tokio::{
    sync::{mpsc, Mutex},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    client::{DeliveryClient, DeliveryRequest},
    error::{DeliveryError, Result},
};

/// Reason recorded when the scanner fails a delivery whose webhook was
/// deactivated.
pub const WEBHOOK_DISABLED: &str = "webhook disabled";

/// Configuration for the delivery pipeline.
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    /// Number of delivery workers.
    pub workers: usize,

    /// Delivery queue capacity.
    pub queue_size: usize,

    /// Attempts before a delivery is failed for good.
    pub max_retries: i64,

    /// How often the retry scanner wakes up.
    pub retry_scanner_interval: Duration,

    /// HTTP client timeout per attempt.
    pub http_timeout: Duration,

    /// Response body bytes kept on the delivery row.
    pub response_max_bytes: usize,

    /// Upper bound on the exponential backoff.
    pub backoff_cap: Duration,

    /// Maximum time to wait for workers on shutdown.
    pub shutdown_timeout: Duration,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            workers: 3,
            queue_size: 100,
            max_retries: 5,
            retry_scanner_interval: Duration::from_secs(30),
            http_timeout: Duration::from_secs(30),
            response_max_bytes: 1024,
            backoff_cap: Duration::from_secs(5 * 60),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// Exponential backoff for the next retry: `min(2^min(attempts, 30) s, cap)`.
///
/// The exponent clamp keeps the shift well inside u64 range; the cap is the
/// operational ceiling.
pub fn backoff_delay(attempts: i64, cap: Duration) -> Duration {
    let exponent = attempts.clamp(0, 30) as u32;
    Duration::from_secs(1u64 << exponent).min(cap)
}

struct DeliveryTask {
    webhook: Webhook,
    delivery: WebhookDelivery,
}

struct ServiceInner {
    storage: Storage,
    client: DeliveryClient,
    config: WebhookConfig,
    clock: Arc<dyn Clock>,
    shutdown: CancellationToken,
    /// Deliveries queued or mid-attempt. Rows in here still read `pending`
    /// in the store, so the scanner must not enqueue them a second time.
    in_flight: StdMutex<HashSet<DeliveryId>>,
}

impl ServiceInner {
    /// Marks a delivery in flight. Returns false when it already is.
    fn mark_in_flight(&self, id: DeliveryId) -> bool {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner).insert(id)
    }

    fn clear_in_flight(&self, id: DeliveryId) {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner).remove(&id);
    }
}

/// Asynchronous webhook delivery pipeline.
pub struct WebhookService {
    inner: Arc<ServiceInner>,
    queue_tx: mpsc::Sender<DeliveryTask>,
    queue_rx: Arc<Mutex<mpsc::Receiver<DeliveryTask>>>,
    handles: StdMutex<Vec<JoinHandle<()>>>,
}

impl WebhookService {
    /// Creates a stopped service. Call [`WebhookService::start`] to begin
    /// delivering.
    ///
    /// # Errors
    ///
    /// Fails when the HTTP client cannot be built.
    pub fn new(storage: Storage, config: WebhookConfig) -> Result<Self> {
        Self::with_clock(storage, config, Arc::new(RealClock))
    }

    /// Creates a service with an injected clock.
    ///
    /// # Errors
    ///
    /// Fails when the HTTP client cannot be built.
    pub fn with_clock(
        storage: Storage,
        config: WebhookConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let client = DeliveryClient::new(config.http_timeout, config.response_max_bytes)?;
        let (queue_tx, queue_rx) = mpsc::channel(config.queue_size.max(1));

        Ok(Self {
            inner: Arc::new(ServiceInner {
                storage,
                client,
                config,
                clock,
                shutdown: CancellationToken::new(),
                in_flight: StdMutex::new(HashSet::new()),
            }),
            queue_tx,
            queue_rx: Arc::new(Mutex::new(queue_rx)),
            handles: StdMutex::new(Vec::new()),
        })
    }

    /// Spawns the delivery workers and the retry scanner.
    pub fn start(&self) {
        let mut handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
        if !handles.is_empty() {
            return;
        }

        for worker_id in 0..self.inner.config.workers {
            let inner = Arc::clone(&self.inner);
            let rx = Arc::clone(&self.queue_rx);
            handles.push(tokio::spawn(async move {
                delivery_worker(inner, rx, worker_id).await;
            }));
        }

        let inner = Arc::clone(&self.inner);
        let tx = self.queue_tx.clone();
        handles.push(tokio::spawn(async move {
            retry_scanner(inner, tx).await;
        }));

        info!(workers = self.inner.config.workers, "webhook service started");
    }

    /// Signals shutdown and waits for delivery workers to finish their
    /// current attempt.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();

        let handles: Vec<JoinHandle<()>> =
            std::mem::take(&mut *self.handles.lock().unwrap_or_else(PoisonError::into_inner));

        let drain = async {
            for handle in handles {
                if let Err(join_error) = handle.await {
                    error!(error = %join_error, "webhook task panicked during shutdown");
                }
            }
        };

        if tokio::time::timeout(self.inner.config.shutdown_timeout, drain).await.is_err() {
            warn!("webhook service shutdown timed out");
        } else {
            info!("webhook service stopped");
        }
    }

    /// Fans a lifecycle event out to every subscribed active webhook.
    ///
    /// Serializes the payload once, persists one `pending` delivery per
    /// webhook, and offers each to the queue without blocking. Rows the
    /// queue cannot absorb stay `pending` with no retry time and are picked
    /// up by the scanner.
    pub async fn dispatch(&self, event: &JobEvent) {
        let event_name = event.event_type.as_str();

        let webhooks = match self.inner.storage.webhooks.active_for_event(event_name).await {
            Ok(webhooks) => webhooks,
            Err(err) => {
                error!(event = event_name, error = %err, "failed to load webhooks for event");
                return;
            }
        };

        if webhooks.is_empty() {
            return;
        }

        debug!(event = event_name, webhooks = webhooks.len(), "dispatching webhook event");

        let payload = WebhookPayload {
            event: event_name.to_string(),
            timestamp: event.timestamp,
            data: WebhookData {
                job: Some(event.job.clone()),
                execution: event.execution.clone(),
            },
        };
        let payload_json = match serde_json::to_string(&payload) {
            Ok(json) => json,
            Err(err) => {
                error!(event = event_name, error = %err, "failed to serialize webhook payload");
                return;
            }
        };

        for webhook in webhooks {
            let delivery = WebhookDelivery {
                id: DeliveryId::new(),
                webhook_id: webhook.id,
                event_type: event_name.to_string(),
                payload: payload_json.clone(),
                status: DeliveryStatus::Pending,
                response_code: None,
                response_body: String::new(),
                error: String::new(),
                attempts: 0,
                next_retry_at: None,
                created_at: self.inner.clock.now_utc(),
            };

            if let Err(err) = self.inner.storage.deliveries.create(&delivery).await {
                error!(webhook_id = %webhook.id, error = %err, "failed to create delivery row");
                continue;
            }

            let delivery_id = delivery.id;
            self.inner.mark_in_flight(delivery_id);
            if self.queue_tx.try_send(DeliveryTask { webhook, delivery }).is_err() {
                self.inner.clear_in_flight(delivery_id);
                warn!(delivery_id = %delivery_id, "delivery queue full, scanner will retry");
            }
        }
    }

    /// Sends a synthetic `test` event to one webhook synchronously.
    ///
    /// The delivery row is persisted like any other, but the attempt runs on
    /// the caller's task so the outcome can be returned directly.
    ///
    /// # Errors
    ///
    /// Fails when the webhook does not exist or the store rejects the row.
    pub async fn test(&self, webhook_id: WebhookId) -> Result<WebhookDelivery> {
        let webhook = self.inner.storage.webhooks.get(webhook_id).await?;

        let payload = WebhookPayload {
            event: "test".to_string(),
            timestamp: self.inner.clock.now_utc(),
            data: WebhookData::default(),
        };
        let payload_json = serde_json::to_string(&payload)
            .map_err(|e| DeliveryError::Configuration(format!("payload serialization: {e}")))?;

        let delivery = WebhookDelivery {
            id: DeliveryId::new(),
            webhook_id: webhook.id,
            event_type: "test".to_string(),
            payload: payload_json,
            status: DeliveryStatus::Pending,
            response_code: None,
            response_body: String::new(),
            error: String::new(),
            attempts: 0,
            next_retry_at: None,
            created_at: self.inner.clock.now_utc(),
        };
        self.inner.storage.deliveries.create(&delivery).await?;

        let delivery_id = delivery.id;
        self.inner.mark_in_flight(delivery_id);
        deliver(&self.inner, DeliveryTask { webhook, delivery }).await;

        Ok(self.inner.storage.deliveries.get(delivery_id).await?)
    }
}

#[async_trait::async_trait]
impl JobEventHandler for WebhookService {
    async fn on_event(&self, event: JobEvent) {
        self.dispatch(&event).await;
    }
}

async fn delivery_worker(
    inner: Arc<ServiceInner>,
    rx: Arc<Mutex<mpsc::Receiver<DeliveryTask>>>,
    worker_id: usize,
) {
    debug!(worker_id, "delivery worker started");

    loop {
        let task = tokio::select! {
            () = inner.shutdown.cancelled() => break,
            task = async { rx.lock().await.recv().await } => match task {
                Some(task) => task,
                None => break,
            },
        };

        deliver(&inner, task).await;
    }

    debug!(worker_id, "delivery worker stopped");
}

/// Runs one delivery attempt and records its outcome.
async fn deliver(inner: &Arc<ServiceInner>, task: DeliveryTask) {
    let delivery_id = task.delivery.id;
    attempt_delivery(inner, task).await;
    inner.clear_in_flight(delivery_id);
}

async fn attempt_delivery(inner: &Arc<ServiceInner>, mut task: DeliveryTask) {
    if let Err(err) = inner.storage.deliveries.increment_attempts(task.delivery.id).await {
        error!(delivery_id = %task.delivery.id, error = %err, "failed to increment attempts");
    }
    task.delivery.attempts += 1;

    let request = DeliveryRequest {
        url: task.webhook.url.clone(),
        payload: Bytes::from(task.delivery.payload.clone().into_bytes()),
        event_type: task.delivery.event_type.clone(),
        delivery_id: task.delivery.id,
        secret: task.webhook.secret.clone(),
    };

    match inner.client.deliver(&request).await {
        Ok(response) if response.is_success => {
            if let Err(err) = inner
                .storage
                .deliveries
                .update(
                    task.delivery.id,
                    DeliveryStatus::Success,
                    Some(i64::from(response.status_code)),
                    &response.body,
                    "",
                    None,
                )
                .await
            {
                error!(delivery_id = %task.delivery.id, error = %err, "failed to record success");
            }
            debug!(
                webhook_id = %task.webhook.id,
                delivery_id = %task.delivery.id,
                status = response.status_code,
                "webhook delivered"
            );
        }
        Ok(response) => {
            let message = format!("HTTP {}: {}", response.status_code, response.body);
            record_failure(
                inner,
                &task.delivery,
                Some(i64::from(response.status_code)),
                &response.body,
                &message,
            )
            .await;
        }
        Err(err) => {
            record_failure(inner, &task.delivery, None, "", &err.to_string()).await;
        }
    }
}

/// Failure path: terminal after `max_retries` attempts, exponential backoff
/// otherwise.
async fn record_failure(
    inner: &Arc<ServiceInner>,
    delivery: &WebhookDelivery,
    response_code: Option<i64>,
    response_body: &str,
    message: &str,
) {
    if delivery.attempts >= inner.config.max_retries {
        if let Err(err) = inner
            .storage
            .deliveries
            .update(delivery.id, DeliveryStatus::Failed, response_code, response_body, message, None)
            .await
        {
            error!(delivery_id = %delivery.id, error = %err, "failed to record terminal failure");
        }
        warn!(
            delivery_id = %delivery.id,
            attempts = delivery.attempts,
            error = message,
            "webhook delivery failed after max retries"
        );
        return;
    }

    let backoff = backoff_delay(delivery.attempts, inner.config.backoff_cap);
    let next_retry = inner.clock.now_utc()
        + chrono::Duration::from_std(backoff).unwrap_or_else(|_| chrono::Duration::seconds(300));

    if let Err(err) = inner
        .storage
        .deliveries
        .update(
            delivery.id,
            DeliveryStatus::Pending,
            response_code,
            response_body,
            message,
            Some(next_retry),
        )
        .await
    {
        error!(delivery_id = %delivery.id, error = %err, "failed to schedule retry");
    }

    debug!(
        delivery_id = %delivery.id,
        attempts = delivery.attempts,
        next_retry = %next_retry,
        error = message,
        "webhook delivery failed, retry scheduled"
    );
}

/// Periodically re-queues due pending deliveries.
async fn retry_scanner(inner: Arc<ServiceInner>, queue_tx: mpsc::Sender<DeliveryTask>) {
    debug!("retry scanner started");

    loop {
        tokio::select! {
            () = inner.shutdown.cancelled() => break,
            () = inner.clock.sleep(inner.config.retry_scanner_interval) => {
                process_pending(&inner, &queue_tx).await;
            }
        }
    }

    debug!("retry scanner stopped");
}

async fn process_pending(inner: &Arc<ServiceInner>, queue_tx: &mpsc::Sender<DeliveryTask>) {
    let now = inner.clock.now_utc();
    let deliveries = match inner.storage.deliveries.pending_due(now, 50).await {
        Ok(deliveries) => deliveries,
        Err(err) => {
            error!(error = %err, "failed to load pending deliveries");
            return;
        }
    };

    for delivery in deliveries {
        let webhook = match inner.storage.webhooks.get(delivery.webhook_id).await {
            Ok(webhook) => webhook,
            Err(err) => {
                error!(
                    webhook_id = %delivery.webhook_id,
                    delivery_id = %delivery.id,
                    error = %err,
                    "failed to load webhook for retry"
                );
                continue;
            }
        };

        if !webhook.is_active {
            if let Err(err) = inner
                .storage
                .deliveries
                .update(delivery.id, DeliveryStatus::Failed, None, "", WEBHOOK_DISABLED, None)
                .await
            {
                error!(delivery_id = %delivery.id, error = %err, "failed to fail disabled delivery");
            }
            continue;
        }

        let delivery_id = delivery.id;
        if !inner.mark_in_flight(delivery_id) {
            continue;
        }
        if queue_tx.try_send(DeliveryTask { webhook, delivery }).is_err() {
            inner.clear_in_flight(delivery_id);
            warn!(delivery_id = %delivery_id, "delivery queue full, will retry on next scan");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_until_cap() {
        let cap = Duration::from_secs(300);

        assert_eq!(backoff_delay(0, cap), Duration::from_secs(1));
        assert_eq!(backoff_delay(1, cap), Duration::from_secs(2));
        assert_eq!(backoff_delay(2, cap), Duration::from_secs(4));
        assert_eq!(backoff_delay(5, cap), Duration::from_secs(32));
        assert_eq!(backoff_delay(8, cap), Duration::from_secs(256));
        assert_eq!(backoff_delay(9, cap), cap);
        assert_eq!(backoff_delay(64, cap), cap);
    }

    #[test]
    fn backoff_is_monotone_non_decreasing() {
        let cap = Duration::from_secs(300);
        let delays: Vec<Duration> = (0..40).map(|a| backoff_delay(a, cap)).collect();

        for pair in delays.windows(2) {
            assert!(pair[0] <= pair[1]);
        }
    }
}
