//! Integration tests for the SQLite storage layer.
//!
//! Every test runs against its own migrated in-memory database.

use chrono::{Duration, Utc};
use oneoff_core::{
    migrate,
    models::{
        DeliveryId, DeliveryStatus, ExecutionStatus, Job, JobId, JobStatus, Webhook,
        WebhookDelivery, WebhookId,
    },
    CoreError, Storage,
};
use sqlx::sqlite::SqlitePoolOptions;

async fn storage() -> Storage {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite should connect");
    migrate(&pool).await.expect("migration should succeed");
    Storage::new(pool)
}

fn job(name: &str, scheduled_offset_secs: i64, priority: i64) -> Job {
    let now = Utc::now();
    Job {
        id: JobId::new(),
        name: name.to_string(),
        job_type: "noop-ok".to_string(),
        config: "{}".to_string(),
        scheduled_at: now + Duration::seconds(scheduled_offset_secs),
        priority,
        project: None,
        timezone: "UTC".to_string(),
        status: JobStatus::Scheduled,
        created_at: now,
        updated_at: now,
    }
}

fn webhook(events: &str) -> Webhook {
    let now = Utc::now();
    Webhook {
        id: WebhookId::new(),
        name: "hook".to_string(),
        url: "https://example.com/hook".to_string(),
        secret: String::new(),
        events: events.to_string(),
        is_active: true,
        created_at: now,
        updated_at: now,
    }
}

fn delivery(webhook_id: WebhookId) -> WebhookDelivery {
    WebhookDelivery {
        id: DeliveryId::new(),
        webhook_id,
        event_type: "job.completed".to_string(),
        payload: "{\"event\":\"job.completed\"}".to_string(),
        status: DeliveryStatus::Pending,
        response_code: None,
        response_body: String::new(),
        error: String::new(),
        attempts: 0,
        next_retry_at: None,
        created_at: Utc::now(),
    }
}

#[tokio::test]
async fn job_roundtrip_preserves_fields() {
    let storage = storage().await;
    let job = job("backup", -10, 7);

    storage.jobs.create(&job).await.unwrap();
    let loaded = storage.jobs.get(job.id).await.unwrap();

    assert_eq!(loaded.id, job.id);
    assert_eq!(loaded.name, "backup");
    assert_eq!(loaded.job_type, "noop-ok");
    assert_eq!(loaded.priority, 7);
    assert_eq!(loaded.status, JobStatus::Scheduled);
    assert_eq!(loaded.timezone, "UTC");
}

#[tokio::test]
async fn missing_job_is_not_found() {
    let storage = storage().await;

    let err = storage.jobs.get(JobId::new()).await.unwrap_err();
    assert!(matches!(err, CoreError::NotFound(_)));

    let err = storage
        .jobs
        .update_status(JobId::new(), JobStatus::Running, Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::NotFound(_)));
}

#[tokio::test]
async fn get_due_orders_by_priority_then_schedule() {
    let storage = storage().await;

    let low_late = job("low-late", -5, 3);
    let high = job("high", -10, 9);
    let low_early = job("low-early", -30, 3);
    let future = job("future", 3600, 10);

    for j in [&low_late, &high, &low_early, &future] {
        storage.jobs.create(j).await.unwrap();
    }

    let due = storage.jobs.get_due(Utc::now(), 10).await.unwrap();
    let names: Vec<&str> = due.iter().map(|j| j.name.as_str()).collect();

    assert_eq!(names, vec!["high", "low-early", "low-late"]);
}

#[tokio::test]
async fn get_due_excludes_non_scheduled_statuses() {
    let storage = storage().await;
    let j = job("claimed", -10, 5);
    storage.jobs.create(&j).await.unwrap();

    storage.jobs.update_status(j.id, JobStatus::Running, Utc::now()).await.unwrap();
    assert!(storage.jobs.get_due(Utc::now(), 10).await.unwrap().is_empty());

    storage.jobs.update_status(j.id, JobStatus::Cancelled, Utc::now()).await.unwrap();
    assert!(storage.jobs.get_due(Utc::now(), 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn get_due_respects_limit() {
    let storage = storage().await;
    for i in 0..5 {
        storage.jobs.create(&job(&format!("job-{i}"), -10, 5)).await.unwrap();
    }

    let due = storage.jobs.get_due(Utc::now(), 2).await.unwrap();
    assert_eq!(due.len(), 2);
}

#[tokio::test]
async fn execution_lifecycle_sets_terminal_fields_together() {
    let storage = storage().await;
    let j = job("run", -1, 5);
    storage.jobs.create(&j).await.unwrap();

    let started = Utc::now();
    let execution = storage.executions.create(j.id, started).await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Running);
    assert!(execution.completed_at.is_none());

    let completed_at = started + Duration::milliseconds(250);
    storage
        .executions
        .complete(execution.id, ExecutionStatus::Completed, "out", "", Some(0), 250, completed_at)
        .await
        .unwrap();

    let loaded = storage.executions.get(execution.id).await.unwrap();
    assert_eq!(loaded.status, ExecutionStatus::Completed);
    assert_eq!(loaded.output, "out");
    assert_eq!(loaded.exit_code, Some(0));
    assert_eq!(loaded.duration_ms, Some(250));
    assert!(loaded.completed_at.is_some());
}

#[tokio::test]
async fn latest_running_execution_is_found_per_job() {
    let storage = storage().await;
    let j = job("crashy", -1, 5);
    storage.jobs.create(&j).await.unwrap();

    let old = storage.executions.create(j.id, Utc::now() - Duration::hours(2)).await.unwrap();
    storage
        .executions
        .complete(old.id, ExecutionStatus::Failed, "", "earlier failure", None, 10, Utc::now())
        .await
        .unwrap();

    let orphan = storage.executions.create(j.id, Utc::now() - Duration::minutes(5)).await.unwrap();

    let found = storage.executions.latest_running_for_job(j.id).await.unwrap();
    assert_eq!(found.map(|e| e.id), Some(orphan.id));
}

#[tokio::test]
async fn retention_deletes_only_old_rows() {
    let storage = storage().await;
    let j = job("old", -1, 5);
    storage.jobs.create(&j).await.unwrap();

    let ancient = storage.executions.create(j.id, Utc::now() - Duration::days(120)).await.unwrap();
    let recent = storage.executions.create(j.id, Utc::now()).await.unwrap();

    let deleted =
        storage.executions.delete_older_than(Utc::now() - Duration::days(90)).await.unwrap();

    assert_eq!(deleted, 1);
    assert!(storage.executions.get(ancient.id).await.is_err());
    assert!(storage.executions.get(recent.id).await.is_ok());
}

#[tokio::test]
async fn active_for_event_filters_subscriptions_and_activity() {
    let storage = storage().await;

    let subscribed = webhook("job.completed,job.failed");
    let other_events = webhook("job.started");
    let mut inactive = webhook("job.completed");
    inactive.is_active = false;

    for w in [&subscribed, &other_events, &inactive] {
        storage.webhooks.create(w).await.unwrap();
    }

    let hooks = storage.webhooks.active_for_event("job.completed").await.unwrap();
    assert_eq!(hooks.len(), 1);
    assert_eq!(hooks[0].id, subscribed.id);
}

#[tokio::test]
async fn webhook_crud_roundtrip() {
    let storage = storage().await;

    let mut w = webhook("job.completed");
    storage.webhooks.create(&w).await.unwrap();

    assert_eq!(storage.webhooks.list().await.unwrap().len(), 1);

    w.secret = "s3cret".to_string();
    w.events = "job.failed".to_string();
    storage.webhooks.update(&w, Utc::now()).await.unwrap();

    let loaded = storage.webhooks.get(w.id).await.unwrap();
    assert_eq!(loaded.secret, "s3cret");
    assert!(loaded.subscribes_to("job.failed"));
    assert!(!loaded.subscribes_to("job.completed"));

    storage.webhooks.delete(w.id).await.unwrap();
    assert!(matches!(storage.webhooks.get(w.id).await, Err(CoreError::NotFound(_))));
    assert!(matches!(storage.webhooks.delete(w.id).await, Err(CoreError::NotFound(_))));
}

#[tokio::test]
async fn delivery_attempts_only_increase() {
    let storage = storage().await;
    let w = webhook("job.completed");
    storage.webhooks.create(&w).await.unwrap();

    let d = delivery(w.id);
    storage.deliveries.create(&d).await.unwrap();

    storage.deliveries.increment_attempts(d.id).await.unwrap();
    storage.deliveries.increment_attempts(d.id).await.unwrap();

    let loaded = storage.deliveries.get(d.id).await.unwrap();
    assert_eq!(loaded.attempts, 2);
}

#[tokio::test]
async fn pending_due_includes_null_and_elapsed_retry_times() {
    let storage = storage().await;
    let w = webhook("job.completed");
    storage.webhooks.create(&w).await.unwrap();

    let unqueued = delivery(w.id);
    storage.deliveries.create(&unqueued).await.unwrap();

    let mut due_retry = delivery(w.id);
    due_retry.next_retry_at = Some(Utc::now() - Duration::seconds(10));
    storage.deliveries.create(&due_retry).await.unwrap();

    let mut future_retry = delivery(w.id);
    future_retry.next_retry_at = Some(Utc::now() + Duration::minutes(5));
    storage.deliveries.create(&future_retry).await.unwrap();

    let mut done = delivery(w.id);
    done.status = DeliveryStatus::Success;
    storage.deliveries.create(&done).await.unwrap();

    let pending = storage.deliveries.pending_due(Utc::now(), 50).await.unwrap();
    let ids: Vec<DeliveryId> = pending.iter().map(|d| d.id).collect();

    assert!(ids.contains(&unqueued.id));
    assert!(ids.contains(&due_retry.id));
    assert!(!ids.contains(&future_retry.id));
    assert!(!ids.contains(&done.id));
}

#[tokio::test]
async fn delivery_update_records_outcome() {
    let storage = storage().await;
    let w = webhook("job.completed");
    storage.webhooks.create(&w).await.unwrap();

    let d = delivery(w.id);
    storage.deliveries.create(&d).await.unwrap();

    let next = Utc::now() + Duration::seconds(2);
    storage
        .deliveries
        .update(d.id, DeliveryStatus::Pending, Some(500), "boom", "HTTP 500: boom", Some(next))
        .await
        .unwrap();

    let loaded = storage.deliveries.get(d.id).await.unwrap();
    assert_eq!(loaded.status, DeliveryStatus::Pending);
    assert_eq!(loaded.response_code, Some(500));
    assert_eq!(loaded.response_body, "boom");
    assert!(loaded.next_retry_at.is_some());

    storage
        .deliveries
        .update(d.id, DeliveryStatus::Success, Some(200), "ok", "", None)
        .await
        .unwrap();

    let loaded = storage.deliveries.get(d.id).await.unwrap();
    assert_eq!(loaded.status, DeliveryStatus::Success);
    assert_eq!(loaded.response_code, Some(200));
    assert!(loaded.next_retry_at.is_none());
    assert!(loaded.error.is_empty());
}

#[tokio::test]
async fn health_check_passes_on_live_pool() {
    let storage = storage().await;
    storage.health_check().await.unwrap();
}
