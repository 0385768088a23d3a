//! Job lifecycle events and the in-process event bus seam.
//!
//! The worker pool emits one event per lifecycle transition; hosting code
//! installs a [`JobEventHandler`] at startup (in practice the webhook
//! service) to fan events out. Handlers are invoked off the worker task so
//! slow downstream processing cannot stall executions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Job, JobExecution};

/// Job lifecycle event types that webhooks can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    /// A job was created.
    #[serde(rename = "job.created")]
    JobCreated,
    /// A job transitioned `scheduled -> running`.
    #[serde(rename = "job.started")]
    JobStarted,
    /// A job finished successfully.
    #[serde(rename = "job.completed")]
    JobCompleted,
    /// A job failed.
    #[serde(rename = "job.failed")]
    JobFailed,
    /// A job was cancelled.
    #[serde(rename = "job.cancelled")]
    JobCancelled,
}

impl EventType {
    /// The wire name of the event, as stored in subscriptions and sent in
    /// the `X-OneOff-Event` header.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::JobCreated => "job.created",
            Self::JobStarted => "job.started",
            Self::JobCompleted => "job.completed",
            Self::JobFailed => "job.failed",
            Self::JobCancelled => "job.cancelled",
        }
    }

    /// All event types a webhook may subscribe to.
    pub fn all() -> [EventType; 5] {
        [
            Self::JobCreated,
            Self::JobStarted,
            Self::JobCompleted,
            Self::JobFailed,
            Self::JobCancelled,
        ]
    }

    /// Parses a wire name back into an event type.
    pub fn parse(s: &str) -> Option<Self> {
        Self::all().into_iter().find(|e| e.as_str() == s)
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A lifecycle event carried by value from the worker pool to the handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEvent {
    /// What happened.
    #[serde(rename = "type")]
    pub event_type: EventType,

    /// When it happened, UTC.
    pub timestamp: DateTime<Utc>,

    /// Snapshot of the job at emission time.
    pub job: Job,

    /// Snapshot of the execution, absent for `job.created`.
    pub execution: Option<JobExecution>,
}

/// The outbound webhook payload body.
///
/// Serialized once per event; the resulting bytes are stored on the delivery
/// row, signed, and sent verbatim on every attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookPayload {
    /// Event name, e.g. `job.completed` or `test`.
    pub event: String,

    /// Event timestamp, RFC 3339 UTC.
    pub timestamp: DateTime<Utc>,

    /// Event data.
    pub data: WebhookData,
}

/// The `data` envelope of a webhook payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebhookData {
    /// Job snapshot, absent for test deliveries.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job: Option<Job>,

    /// Execution snapshot, when the event has one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution: Option<JobExecution>,
}

/// Trait for reacting to job lifecycle events.
///
/// Implementations must return quickly; the pool already isolates them in a
/// spawned task, but a handler that blocks forever leaks tasks.
#[async_trait::async_trait]
pub trait JobEventHandler: Send + Sync {
    /// Handles one lifecycle event.
    async fn on_event(&self, event: JobEvent);
}

/// Event handler that discards everything.
///
/// Used when no webhook service is wired up, and in tests.
#[derive(Debug, Default)]
pub struct NoOpJobEventHandler;

#[async_trait::async_trait]
impl JobEventHandler for NoOpJobEventHandler {
    async fn on_event(&self, _event: JobEvent) {}
}
