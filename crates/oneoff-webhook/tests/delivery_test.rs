//! Integration tests for the webhook delivery pipeline against a mock
//! receiver: fan-out, signing, retry/backoff, disabled webhooks, and the
//! synchronous test delivery.

use std::{future::Future, sync::Arc, time::Duration};

use chrono::Utc;
use oneoff_core::{
    events::{EventType, JobEvent},
    models::{DeliveryStatus, Job, JobId, JobStatus},
};
use oneoff_testing::TestEnv;
use oneoff_webhook::{verify_signature, WebhookConfig, WebhookService};
use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

fn fast_config() -> WebhookConfig {
    WebhookConfig {
        workers: 2,
        queue_size: 16,
        max_retries: 5,
        retry_scanner_interval: Duration::from_millis(100),
        http_timeout: Duration::from_secs(2),
        response_max_bytes: 1024,
        backoff_cap: Duration::from_secs(1),
        shutdown_timeout: Duration::from_secs(5),
    }
}

fn sample_event() -> JobEvent {
    let now = Utc::now();
    JobEvent {
        event_type: EventType::JobCompleted,
        timestamp: now,
        job: Job {
            id: JobId::new(),
            name: "export".to_string(),
            job_type: "noop-ok".to_string(),
            config: "{}".to_string(),
            scheduled_at: now,
            priority: 5,
            project: None,
            timezone: "UTC".to_string(),
            status: JobStatus::Completed,
            created_at: now,
            updated_at: now,
        },
        execution: None,
    }
}

async fn wait_until<F, Fut>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

#[tokio::test]
async fn dispatch_fans_out_to_subscribed_webhooks_only() {
    let env = TestEnv::new().await;
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("OK"))
        .mount(&server)
        .await;

    let subscribed = env.insert_webhook(&server.uri(), "job.completed,job.failed", "").await;
    let other = env.insert_webhook(&server.uri(), "job.started", "").await;

    let service = Arc::new(WebhookService::new(env.storage.clone(), fast_config()).unwrap());
    service.start();

    service.dispatch(&sample_event()).await;

    assert!(wait_until(Duration::from_secs(5), || async {
        let rows = env.storage.deliveries.list_for_webhook(subscribed.id, 10).await.unwrap();
        rows.first().map(|d| d.status == DeliveryStatus::Success).unwrap_or(false)
    })
    .await);

    let delivery =
        &env.storage.deliveries.list_for_webhook(subscribed.id, 10).await.unwrap()[0];
    assert_eq!(delivery.attempts, 1);
    assert_eq!(delivery.response_code, Some(200));
    assert_eq!(delivery.response_body, "OK");
    assert_eq!(delivery.event_type, "job.completed");

    assert!(env.storage.deliveries.list_for_webhook(other.id, 10).await.unwrap().is_empty());

    let request = &server.received_requests().await.unwrap()[0];
    assert_eq!(request.headers.get("X-OneOff-Event").unwrap().to_str().unwrap(), "job.completed");
    assert_eq!(
        request.headers.get("X-OneOff-Delivery").unwrap().to_str().unwrap(),
        delivery.id.to_string()
    );

    service.shutdown().await;
}

#[tokio::test]
async fn payload_is_signed_when_secret_configured() {
    let env = TestEnv::new().await;
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let webhook = env.insert_webhook(&server.uri(), "job.completed", "top-secret").await;

    let service = Arc::new(WebhookService::new(env.storage.clone(), fast_config()).unwrap());
    service.start();
    service.dispatch(&sample_event()).await;

    assert!(wait_until(Duration::from_secs(5), || async {
        !server.received_requests().await.unwrap().is_empty()
    })
    .await);

    let request = &server.received_requests().await.unwrap()[0];
    let signature = request.headers.get("X-OneOff-Signature").unwrap().to_str().unwrap();
    assert!(signature.starts_with("sha256="));
    assert!(verify_signature(&request.body, signature, "top-secret"));

    // Signature covers the exact stored payload bytes.
    let delivery = &env.storage.deliveries.list_for_webhook(webhook.id, 10).await.unwrap()[0];
    assert_eq!(request.body, delivery.payload.as_bytes());

    service.shutdown().await;
}

#[tokio::test]
async fn retries_with_backoff_until_receiver_recovers() {
    let env = TestEnv::new().await;
    let server = MockServer::start().await;

    // Receiver 500s three times, then accepts.
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("nope"))
        .up_to_n_times(3)
        .mount(&server)
        .await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("finally"))
        .mount(&server)
        .await;

    let webhook = env.insert_webhook(&server.uri(), "job.completed", "").await;

    let service = Arc::new(WebhookService::new(env.storage.clone(), fast_config()).unwrap());
    service.start();
    service.dispatch(&sample_event()).await;

    // First failure lands the row back in `pending` with a retry schedule.
    assert!(wait_until(Duration::from_secs(5), || async {
        let rows = env.storage.deliveries.list_for_webhook(webhook.id, 10).await.unwrap();
        rows.first().map(|d| d.attempts >= 1 && d.next_retry_at.is_some()).unwrap_or(false)
    })
    .await);

    assert!(wait_until(Duration::from_secs(15), || async {
        let rows = env.storage.deliveries.list_for_webhook(webhook.id, 10).await.unwrap();
        rows.first().map(|d| d.status == DeliveryStatus::Success).unwrap_or(false)
    })
    .await);

    let delivery = &env.storage.deliveries.list_for_webhook(webhook.id, 10).await.unwrap()[0];
    assert_eq!(delivery.attempts, 4, "three failures and one success");
    assert_eq!(delivery.response_code, Some(200));
    assert!(delivery.next_retry_at.is_none());

    service.shutdown().await;
}

#[tokio::test]
async fn exhausted_retries_mark_delivery_failed() {
    let env = TestEnv::new().await;
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("down"))
        .mount(&server)
        .await;

    let webhook = env.insert_webhook(&server.uri(), "job.completed", "").await;

    let service = Arc::new(WebhookService::new(env.storage.clone(), fast_config()).unwrap());
    service.start();
    service.dispatch(&sample_event()).await;

    assert!(wait_until(Duration::from_secs(20), || async {
        let rows = env.storage.deliveries.list_for_webhook(webhook.id, 10).await.unwrap();
        rows.first().map(|d| d.status == DeliveryStatus::Failed).unwrap_or(false)
    })
    .await);

    let delivery = &env.storage.deliveries.list_for_webhook(webhook.id, 10).await.unwrap()[0];
    assert_eq!(delivery.attempts, 5);
    assert_eq!(delivery.response_code, Some(500));
    assert!(delivery.error.contains("HTTP 500"));
    assert!(delivery.next_retry_at.is_none());

    service.shutdown().await;
}

#[tokio::test]
async fn transport_failure_records_error_and_retries() {
    let env = TestEnv::new().await;
    // Nothing listens here.
    let webhook = env.insert_webhook("http://127.0.0.1:1/hook", "job.completed", "").await;

    let config = WebhookConfig { max_retries: 2, ..fast_config() };
    let service = Arc::new(WebhookService::new(env.storage.clone(), config).unwrap());
    service.start();
    service.dispatch(&sample_event()).await;

    assert!(wait_until(Duration::from_secs(15), || async {
        let rows = env.storage.deliveries.list_for_webhook(webhook.id, 10).await.unwrap();
        rows.first().map(|d| d.status == DeliveryStatus::Failed).unwrap_or(false)
    })
    .await);

    let delivery = &env.storage.deliveries.list_for_webhook(webhook.id, 10).await.unwrap()[0];
    assert_eq!(delivery.attempts, 2);
    assert_eq!(delivery.response_code, None);
    assert!(delivery.error.contains("request failed"));

    service.shutdown().await;
}

#[tokio::test]
async fn scanner_fails_deliveries_for_disabled_webhooks() {
    let env = TestEnv::new().await;
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let mut webhook = env.insert_webhook(&server.uri(), "job.completed", "").await;

    let service = Arc::new(WebhookService::new(env.storage.clone(), fast_config()).unwrap());
    service.start();
    service.dispatch(&sample_event()).await;

    // Wait for the first failed attempt, then deactivate the webhook.
    assert!(wait_until(Duration::from_secs(5), || async {
        let rows = env.storage.deliveries.list_for_webhook(webhook.id, 10).await.unwrap();
        rows.first().map(|d| d.attempts >= 1).unwrap_or(false)
    })
    .await);

    webhook.is_active = false;
    env.storage.webhooks.update(&webhook, Utc::now()).await.unwrap();

    assert!(wait_until(Duration::from_secs(10), || async {
        let rows = env.storage.deliveries.list_for_webhook(webhook.id, 10).await.unwrap();
        rows.first()
            .map(|d| d.status == DeliveryStatus::Failed && d.error == "webhook disabled")
            .unwrap_or(false)
    })
    .await);

    service.shutdown().await;
}

#[tokio::test]
async fn test_delivery_runs_synchronously_and_returns_outcome() {
    let env = TestEnv::new().await;
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .and(matchers::header("X-OneOff-Event", "test"))
        .respond_with(ResponseTemplate::new(200).set_body_string("pong"))
        .expect(1)
        .mount(&server)
        .await;

    let webhook = env.insert_webhook(&server.uri(), "job.completed", "").await;

    // No workers started: the test delivery must not depend on them.
    let service = Arc::new(WebhookService::new(env.storage.clone(), fast_config()).unwrap());

    let delivery = service.test(webhook.id).await.unwrap();

    assert_eq!(delivery.event_type, "test");
    assert_eq!(delivery.status, DeliveryStatus::Success);
    assert_eq!(delivery.attempts, 1);
    assert_eq!(delivery.response_code, Some(200));
    assert_eq!(delivery.response_body, "pong");

    server.verify().await;
}

#[tokio::test]
async fn test_delivery_for_missing_webhook_is_not_found() {
    let env = TestEnv::new().await;
    let service = Arc::new(WebhookService::new(env.storage.clone(), fast_config()).unwrap());

    let result = service.test(oneoff_core::models::WebhookId::new()).await;
    assert!(result.is_err());
}
